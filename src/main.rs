use facegreeter::{
    camera::{FrameSource, ImageDirSource, V4lCamera},
    common::{paths, Config, GreeterError},
    core::{annotate, BoundingBox, IdentitySet, LoopPolicy, Notifier, OnnxRecognizer, RecognitionLoop, Recognizer, UnknownFaceSink},
    service::{control, LoopRunner, RunnerSettings},
    speech::{CommandSpeechEngine, SilentEngine, SpeechEngine, SpeechWorker},
    storage::{
        create_backup, known_faces::validate_reference_image, read_status, EmbeddingCache,
        IdentityRepository, KnownFaceRepository, KnownFaces, StatusWriter, UnknownFaceStore,
    },
};

use clap::{Parser, Subcommand};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use image::DynamicImage;
use std::path::{Path, PathBuf};
use std::sync::{mpsc, Arc};
use std::time::Duration;

#[derive(Parser)]
#[command(name = "facegreeter")]
#[command(about = "Greets known faces and collects unknown ones")]
struct Cli {
    /// Enable development mode (local config and models, verbose logging)
    #[arg(long, global = true)]
    dev: bool,

    /// Config file to use instead of the default location
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the recognition loop
    Run {
        /// Replay images from a directory instead of using the camera
        #[arg(long)]
        replay: Option<PathBuf>,
        /// Start the replay over when it reaches the last image
        #[arg(long = "loop", requires = "replay")]
        looping: bool,
        /// Ignore keyboard commands
        #[arg(long)]
        no_keyboard: bool,
        /// Log greetings instead of speaking them
        #[arg(long)]
        silent: bool,
    },
    /// Capture one frame and save it
    TestCamera {
        /// Also run recognition and draw the face boxes
        #[arg(long)]
        detect: bool,
    },
    /// List cameras and their formats
    DetectCamera,
    /// Enroll a known face from a photo
    Add {
        name: String,
        image: PathBuf,
    },
    /// Remove a known face
    Remove {
        name: String,
    },
    /// List known faces
    ListKnown,
    /// List saved unknown faces
    ListUnknown,
    /// Enroll a saved unknown face under a name
    Promote {
        id: String,
        name: String,
    },
    /// Delete a saved unknown face
    DeleteUnknown {
        id: String,
    },
    /// Delete unknown faces older than the retention period
    Clean {
        /// Age in days (default: unknown_faces.retention_days)
        #[arg(long)]
        days: Option<u32>,
    },
    /// Copy known and unknown faces into a timestamped backup
    Backup,
    /// Ask the running loop to reload known faces and config
    Reload,
    /// Show the running loop's status
    Status,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.dev);

    let config_path = paths::resolve_config_file(cli.config.as_deref(), cli.dev);

    match cli.command {
        Commands::DetectCamera => detect_camera()?,
        command => {
            let config = Config::load_from_path(&config_path)?;
            let models_dir = paths::models_dir(cli.dev);
            let app = App { config, config_path, models_dir };
            dispatch(&app, command)?;
        }
    }

    Ok(())
}

struct App {
    config: Config,
    config_path: PathBuf,
    models_dir: PathBuf,
}

impl App {
    fn base_dir(&self) -> &Path {
        &self.config.storage.base_dir
    }

    fn known_faces(&self) -> Result<KnownFaces> {
        Ok(KnownFaces::new(&self.config.storage.known_faces_dir)?)
    }

    fn unknown_faces(&self) -> Result<UnknownFaceStore> {
        Ok(UnknownFaceStore::new(&self.config.storage.unknown_faces_dir)?)
    }

    fn recognizer(&self) -> Result<OnnxRecognizer> {
        OnnxRecognizer::new_with_model_path(&self.config, &self.models_dir)
            .with_context(|| format!("Failed to load models from {}", self.models_dir.display()))
    }

    fn request_reload(&self) {
        match control::request_reload(&paths::reload_marker(self.base_dir())) {
            Ok(()) => println!("A running loop will pick up the change on its next frame."),
            Err(e) => tracing::warn!("Could not request reload: {}", e),
        }
    }
}

fn dispatch(ctx: &App, command: Commands) -> Result<()> {
    match command {
        Commands::Run { replay, looping, no_keyboard, silent } => {
            let source = match replay {
                Some(dir) => Replay::Dir { dir, looping },
                None => Replay::Camera,
            };
            run(ctx, source, no_keyboard, silent)?
        }
        Commands::TestCamera { detect } => test_camera(ctx, detect)?,
        Commands::DetectCamera => detect_camera()?,
        Commands::Add { name, image } => {
            let recognizer = ctx.recognizer()?;
            validate_reference_image(&recognizer, &image, ctx.config.recognition.blur_threshold)
                .with_context(|| format!("{} cannot be used as a reference photo", image.display()))?;
            let stored = ctx.known_faces()?.add(&name, &image)?;
            println!("Added {}", stored.display());
            ctx.request_reload();
        }
        Commands::Remove { name } => {
            let removed = ctx.known_faces()?.remove(&name)?;
            println!("Removed {}", removed.display());
            ctx.request_reload();
        }
        Commands::ListKnown => {
            let faces = ctx.known_faces()?.list()?;
            if faces.is_empty() {
                println!("No known faces in {}", ctx.config.storage.known_faces_dir.display());
            }
            for face in faces {
                println!("{:<24} {}", face.name, face.file_name());
            }
        }
        Commands::ListUnknown => {
            let store = ctx.unknown_faces()?;
            let records = store.list()?;
            if records.is_empty() {
                println!("No unknown faces in {}", store.dir().display());
            }
            for record in records {
                let promoted = record
                    .promoted_name
                    .as_deref()
                    .map(|n| format!(" -> {}", n))
                    .unwrap_or_default();
                println!(
                    "{}  {}  {:?}{}  {}",
                    record.id,
                    record.timestamp.format("%Y-%m-%d %H:%M:%S"),
                    record.status,
                    promoted,
                    record.filename
                );
            }
        }
        Commands::Promote { id, name } => {
            let known = ctx.known_faces()?;
            let stored = ctx.unknown_faces()?.promote(&id, &name, &known, Utc::now())?;
            println!("Promoted {} to {}", id, stored.display());
            ctx.request_reload();
        }
        Commands::DeleteUnknown { id } => {
            ctx.unknown_faces()?.delete(&id)?;
            println!("Deleted {}", id);
        }
        Commands::Clean { days } => {
            let days = days.unwrap_or(ctx.config.unknown_faces.retention_days);
            let report = ctx.unknown_faces()?.clean_older_than(days, Utc::now())?;
            println!(
                "Removed {} records and {} orphaned crops older than {} days",
                report.records_removed, report.orphans_removed, days
            );
        }
        Commands::Backup => {
            let (dest, info) = create_backup(
                &paths::backups_dir(ctx.base_dir()),
                &ctx.config.storage.known_faces_dir,
                &ctx.config.storage.unknown_faces_dir,
                Utc::now(),
            )?;
            println!(
                "Backed up {} known and {} unknown faces to {}",
                info.known_faces, info.unknown_faces, dest.display()
            );
        }
        Commands::Reload => {
            control::request_reload(&paths::reload_marker(ctx.base_dir()))?;
            println!("Reload requested");
        }
        Commands::Status => print_status(ctx)?,
    }
    Ok(())
}

enum Replay {
    Camera,
    Dir { dir: PathBuf, looping: bool },
}

fn run(ctx: &App, replay: Replay, no_keyboard: bool, silent: bool) -> Result<()> {
    let config = &ctx.config;
    let base_dir = ctx.base_dir();

    let onnx = ctx.recognizer()?;
    let cache = EmbeddingCache::load(&paths::embedding_cache_file(base_dir), onnx.model_tag());
    let recognizer: Arc<dyn Recognizer> = Arc::new(onnx);

    let mut repository = KnownFaceRepository::new(ctx.known_faces()?, recognizer.clone(), cache);
    let identities = IdentitySet::new(repository.load_all()?);
    if identities.is_empty() {
        tracing::warn!("No known faces enrolled; everyone will be treated as unknown");
    }

    let engine: Box<dyn SpeechEngine> = if silent {
        Box::new(SilentEngine)
    } else {
        Box::new(CommandSpeechEngine::from_config(&config.greeting))
    };
    let speech = SpeechWorker::spawn(engine, config.greeting.queue_capacity)?;

    let recognition = RecognitionLoop::new(
        recognizer,
        Box::new(speech.notifier()),
        Box::new(ctx.unknown_faces()?),
        identities,
        LoopPolicy::from_config(config),
    );

    let source: Box<dyn FrameSource> = match replay {
        Replay::Dir { dir, looping } => Box::new(ImageDirSource::new(&dir, looping)?),
        Replay::Camera => Box::new(V4lCamera::new(config)?),
    };

    let (tx, rx) = mpsc::channel();
    control::install_signal_handler(tx.clone())?;
    let keyboard = if no_keyboard {
        None
    } else {
        control::spawn_keyboard_listener(tx)?
    };

    let settings = RunnerSettings::from_config(config);
    let mut runner = LoopRunner::new(source, recognition, Box::new(repository), rx, settings)
        .with_config(ctx.config_path.clone(), config.clone())
        .with_reload_marker(paths::reload_marker(base_dir))
        .with_status_writer(StatusWriter::new(&paths::status_file(base_dir), chrono::Duration::seconds(1)));

    if config.greeting.voice_enabled {
        speech.notifier().greet("System ready");
    }

    let result = runner.run();

    // Release the camera before waiting on speech.
    drop(runner);
    if let Some(keyboard) = keyboard {
        keyboard.stop();
    }
    let drain_timeout = Duration::from_millis(config.greeting.drain_timeout_ms);
    if !speech.shutdown(drain_timeout) {
        tracing::warn!("Speech worker abandoned after {:?}", drain_timeout);
    }

    Ok(result?)
}

/// Swallows output for one-shot recognition runs.
struct Discard;

impl Notifier for Discard {
    fn greet(&self, _text: &str) {}
}

impl UnknownFaceSink for Discard {
    fn save_unknown(&mut self, _crop: &DynamicImage, _bbox: BoundingBox, _timestamp: DateTime<Utc>) -> facegreeter::Result<String> {
        Err(GreeterError::Storage("not saving during test-camera".into()))
    }
}

fn test_camera(ctx: &App, detect: bool) -> Result<()> {
    println!("Testing camera...");
    let mut camera = V4lCamera::new(&ctx.config)?;
    let frame = camera.next_frame()?;
    drop(camera);

    std::fs::create_dir_all(ctx.base_dir())?;
    let save_path = ctx.base_dir().join("test_capture.jpg");

    if detect {
        let onnx = ctx.recognizer()?;
        let cache = EmbeddingCache::load(&paths::embedding_cache_file(ctx.base_dir()), onnx.model_tag());
        let recognizer: Arc<dyn Recognizer> = Arc::new(onnx);
        let mut repository = KnownFaceRepository::new(ctx.known_faces()?, recognizer.clone(), cache);

        let policy = LoopPolicy {
            voice_enabled: false,
            auto_save_unknown: false,
            ..LoopPolicy::from_config(&ctx.config)
        };
        let mut recognition = RecognitionLoop::new(
            recognizer,
            Box::new(Discard),
            Box::new(Discard),
            IdentitySet::new(repository.load_all()?),
            policy,
        );

        let outcomes = recognition.tick(&frame, Utc::now());
        for outcome in &outcomes {
            match outcome.distance {
                Some(d) => println!("  {} at {} (distance {:.3})", outcome.label, outcome.bbox, d),
                None => println!("  {} at {}", outcome.label, outcome.bbox),
            }
        }
        println!("Found {} faces", outcomes.len());
        annotate::annotate(&frame, &outcomes).save(&save_path)?;
    } else {
        frame.save(&save_path)?;
    }

    println!("Saved test image to {:?}", save_path);
    Ok(())
}

fn detect_camera() -> Result<()> {
    println!("Detecting available cameras...\n");

    let cameras = V4lCamera::list_all_cameras()?;
    if cameras.is_empty() {
        println!("No cameras found!");
        println!("\nTroubleshooting:");
        println!("  1. Check if cameras are connected");
        println!("  2. Ensure you have permission to access /dev/video*");
        println!("  3. Add your user to the video group");
        return Ok(());
    }

    for camera in &cameras {
        println!("/dev/video{}: {}{}", camera.index, camera.name, if camera.usable { "" } else { " (not usable)" });
        for feature in &camera.features {
            println!("   - {}", feature);
        }
        println!();
    }

    match cameras.iter().find(|c| c.usable) {
        Some(camera) => println!("device_index = 999 (auto-detect) will use /dev/video{}", camera.index),
        None => println!("No camera offers GREY, MJPG or YUYV capture"),
    }
    Ok(())
}

fn print_status(ctx: &App) -> Result<()> {
    let path = paths::status_file(ctx.base_dir());
    if !path.exists() {
        println!("No status at {}; the loop has not run yet.", path.display());
        return Ok(());
    }

    let status = read_status(&path)?;
    let age = Utc::now().signed_duration_since(status.updated_at);
    println!("State:                {}{}", status.state, if age.num_seconds() > 10 { " (stale)" } else { "" });
    println!("Camera available:     {}", status.camera_available);
    match status.last_frame_at {
        Some(at) => println!("Last frame:           {}", at.to_rfc3339()),
        None => println!("Last frame:           never"),
    }
    println!("Frames processed:     {}", status.frames_processed);
    println!("FPS:                  {:.1}", status.fps);
    println!("Known identities:     {}", status.known_identities);
    println!("Unknown faces saved:  {}", status.unknown_faces_saved);
    println!("Acquisition failures: {} ({} in a row)", status.acquisition_failures, status.consecutive_failures);
    println!("Recognition failures: {}", status.recognition_failures);
    println!("Updated:              {}", status.updated_at.to_rfc3339());
    Ok(())
}

fn setup_logging(dev_mode: bool) {
    if dev_mode {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_file(true)
            .with_line_number(true)
            .with_thread_ids(true)
            .init();
    } else {
        tracing_subscriber::fmt::init();
    }
}
