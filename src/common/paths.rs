use directories::ProjectDirs;
use std::path::{Path, PathBuf};

pub const DEV_CONFIG_FILE: &str = "configs/facegreeter.toml";
pub const DEV_MODELS_DIR: &str = "models";

pub fn system_config_file() -> PathBuf {
    PathBuf::from("/etc/facegreeter/facegreeter.toml")
}

pub fn system_models_dir() -> PathBuf {
    PathBuf::from("/usr/share/facegreeter/models")
}

/// Per-user config location, used when neither a dev nor a system config exists.
pub fn user_config_file() -> Option<PathBuf> {
    ProjectDirs::from("org", "facegreeter", "FaceGreeter")
        .map(|dirs| dirs.config_dir().join("facegreeter.toml"))
}

/// Picks the config file: explicit path, then the dev path, then the system
/// file, then the per-user file.
pub fn resolve_config_file(explicit: Option<&Path>, dev: bool) -> PathBuf {
    if let Some(path) = explicit {
        return path.to_path_buf();
    }
    if dev {
        return PathBuf::from(DEV_CONFIG_FILE);
    }
    let system = system_config_file();
    if system.exists() {
        return system;
    }
    user_config_file()
        .filter(|p| p.exists())
        .unwrap_or(system)
}

pub fn models_dir(dev: bool) -> PathBuf {
    if dev {
        PathBuf::from(DEV_MODELS_DIR)
    } else {
        system_models_dir()
    }
}

pub fn status_file(base_dir: &Path) -> PathBuf {
    base_dir.join("status.json")
}

pub fn reload_marker(base_dir: &Path) -> PathBuf {
    base_dir.join("reload.request")
}

pub fn embedding_cache_file(base_dir: &Path) -> PathBuf {
    base_dir.join("embeddings.bincode")
}

pub fn backups_dir(base_dir: &Path) -> PathBuf {
    base_dir.join("backups")
}
