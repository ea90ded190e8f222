use crate::common::{GreeterError, Result};
use crate::core::recognition_loop::UnknownFaceSink;
use crate::core::types::BoundingBox;
use crate::storage::known_faces::KnownFaces;
use chrono::{DateTime, Duration, Utc};
use image::{DynamicImage, ImageFormat};
use serde::{Serialize, Deserialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum UnknownFaceStatus {
    Unknown,
    Promoted,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct UnknownFaceRecord {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub filename: String,
    pub bounding_box: BoundingBox,
    pub status: UnknownFaceStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub promoted_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub promoted_timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CleanReport {
    pub records_removed: usize,
    pub orphans_removed: usize,
}

/// Saved sightings of unrecognized faces: a JPEG crop plus a JSON record each.
pub struct UnknownFaceStore {
    dir: PathBuf,
}

fn new_id() -> String {
    format!("{:08x}", rand::random::<u32>())
}

fn is_valid_id(id: &str) -> bool {
    !id.is_empty() && id.chars().all(|c| c.is_ascii_alphanumeric())
}

fn write_json_atomic(path: &Path, record: &UnknownFaceRecord) -> Result<()> {
    let json = serde_json::to_string_pretty(record)?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, json)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

impl UnknownFaceStore {
    pub fn new(dir: &Path) -> Result<Self> {
        fs::create_dir_all(dir)?;
        Ok(Self { dir: dir.to_path_buf() })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn record_path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", id))
    }

    pub fn image_path(&self, record: &UnknownFaceRecord) -> PathBuf {
        self.dir.join(&record.filename)
    }

    /// Writes the crop and its record. Errors carry the attempted id.
    pub fn save(&self, crop: &DynamicImage, bbox: BoundingBox, timestamp: DateTime<Utc>) -> Result<String> {
        let id = new_id();
        let filename = format!("unknown_{}_{}.jpg", timestamp.format("%Y%m%d_%H%M%S"), id);

        crop.to_rgb8()
            .save_with_format(self.dir.join(&filename), ImageFormat::Jpeg)
            .map_err(|e| GreeterError::Storage(format!("unknown face {}: failed to write crop: {}", id, e)))?;

        let record = UnknownFaceRecord {
            id: id.clone(),
            timestamp,
            filename,
            bounding_box: bbox,
            status: UnknownFaceStatus::Unknown,
            promoted_name: None,
            promoted_timestamp: None,
        };
        write_json_atomic(&self.record_path(&id), &record)
            .map_err(|e| GreeterError::Storage(format!("unknown face {}: failed to write record: {}", id, e)))?;

        Ok(id)
    }

    /// All readable records, oldest first. Unparseable files are skipped.
    pub fn list(&self) -> Result<Vec<UnknownFaceRecord>> {
        let mut records = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match fs::read_to_string(&path).map_err(GreeterError::from)
                .and_then(|s| serde_json::from_str::<UnknownFaceRecord>(&s).map_err(GreeterError::from))
            {
                Ok(record) => records.push(record),
                Err(e) => tracing::warn!("Skipping unreadable record {}: {}", path.display(), e),
            }
        }
        records.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.id.cmp(&b.id)));
        Ok(records)
    }

    pub fn get(&self, id: &str) -> Result<UnknownFaceRecord> {
        if !is_valid_id(id) {
            return Err(GreeterError::UnknownFaceNotFound(id.to_string()));
        }
        let path = self.record_path(id);
        if !path.exists() {
            return Err(GreeterError::UnknownFaceNotFound(id.to_string()));
        }
        let contents = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&contents)?)
    }

    /// Enrolls the crop as a known face and marks the record promoted.
    pub fn promote(
        &self,
        id: &str,
        name: &str,
        known: &KnownFaces,
        now: DateTime<Utc>,
    ) -> Result<PathBuf> {
        let mut record = self.get(id)?;
        if record.status == UnknownFaceStatus::Promoted {
            return Err(GreeterError::Storage(format!(
                "unknown face {} was already promoted as {}",
                id,
                record.promoted_name.as_deref().unwrap_or("?")
            )));
        }

        let crop = self.image_path(&record);
        if !crop.exists() {
            return Err(GreeterError::Storage(format!("unknown face {}: crop {} is missing", id, crop.display())));
        }

        let stored = known.add(name, &crop)?;
        let stored_name = stored
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| name.to_string());

        record.status = UnknownFaceStatus::Promoted;
        record.promoted_name = Some(stored_name);
        record.promoted_timestamp = Some(now);
        write_json_atomic(&self.record_path(id), &record)?;

        tracing::info!("Promoted unknown face {} to {}", id, stored.display());
        Ok(stored)
    }

    pub fn delete(&self, id: &str) -> Result<()> {
        let record = self.get(id)?;
        let crop = self.image_path(&record);
        if crop.exists() {
            fs::remove_file(crop)?;
        }
        fs::remove_file(self.record_path(id))?;
        tracing::info!("Deleted unknown face {}", id);
        Ok(())
    }

    /// Removes records older than `days`, then crops that no record references
    /// and whose file is older than the same cutoff.
    pub fn clean_older_than(&self, days: u32, now: DateTime<Utc>) -> Result<CleanReport> {
        let cutoff = now - Duration::days(i64::from(days));
        let mut report = CleanReport::default();

        let mut referenced = HashSet::new();
        for record in self.list()? {
            if record.timestamp < cutoff {
                self.delete(&record.id)?;
                report.records_removed += 1;
            } else {
                referenced.insert(record.filename);
            }
        }

        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            let Some(filename) = path.file_name().and_then(|n| n.to_str()) else { continue };
            if !filename.ends_with(".jpg") || referenced.contains(filename) {
                continue;
            }
            let modified: DateTime<Utc> = fs::metadata(&path)?.modified()?.into();
            if modified < cutoff {
                fs::remove_file(&path)?;
                report.orphans_removed += 1;
            }
        }

        tracing::info!(
            "Cleaned {} records and {} orphaned crops older than {} days",
            report.records_removed, report.orphans_removed, days
        );
        Ok(report)
    }
}

impl UnknownFaceSink for UnknownFaceStore {
    fn save_unknown(&mut self, crop: &DynamicImage, bbox: BoundingBox, timestamp: DateTime<Utc>) -> Result<String> {
        self.save(crop, bbox, timestamp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn crop() -> DynamicImage {
        DynamicImage::new_rgb8(16, 16)
    }

    #[test]
    fn save_writes_crop_and_record() {
        let tmp = TempDir::new().unwrap();
        let store = UnknownFaceStore::new(tmp.path()).unwrap();
        let bbox = BoundingBox::new(1, 2, 3, 4);

        let id = store.save(&crop(), bbox, at(0)).unwrap();
        assert_eq!(id.len(), 8);

        let record = store.get(&id).unwrap();
        assert_eq!(record.status, UnknownFaceStatus::Unknown);
        assert_eq!(record.bounding_box, bbox);
        assert_eq!(record.filename, format!("unknown_20231114_221320_{}.jpg", id));
        assert!(store.image_path(&record).exists());

        let json = fs::read_to_string(tmp.path().join(format!("{}.json", id))).unwrap();
        assert!(json.contains("\"status\": \"unknown\""));
        assert!(!json.contains("promoted_name"));
    }

    #[test]
    fn list_is_oldest_first_and_skips_garbage() {
        let tmp = TempDir::new().unwrap();
        let store = UnknownFaceStore::new(tmp.path()).unwrap();
        let late = store.save(&crop(), BoundingBox::new(0, 1, 1, 0), at(100)).unwrap();
        let early = store.save(&crop(), BoundingBox::new(0, 1, 1, 0), at(0)).unwrap();
        fs::write(tmp.path().join("junk.json"), "{").unwrap();

        let ids: Vec<String> = store.list().unwrap().into_iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![early, late]);
    }

    #[test]
    fn promote_enrolls_crop_once() {
        let tmp = TempDir::new().unwrap();
        let store = UnknownFaceStore::new(&tmp.path().join("unknown")).unwrap();
        let known = KnownFaces::new(&tmp.path().join("known")).unwrap();
        let id = store.save(&crop(), BoundingBox::new(0, 16, 16, 0), at(0)).unwrap();

        let stored = store.promote(&id, "Dana", &known, at(60)).unwrap();
        assert_eq!(stored, tmp.path().join("known").join("Dana.jpg"));

        let record = store.get(&id).unwrap();
        assert_eq!(record.status, UnknownFaceStatus::Promoted);
        assert_eq!(record.promoted_name.as_deref(), Some("Dana"));
        assert_eq!(record.promoted_timestamp, Some(at(60)));

        assert!(store.promote(&id, "Dana Again", &known, at(61)).is_err());
    }

    #[test]
    fn missing_and_malformed_ids_are_not_found() {
        let tmp = TempDir::new().unwrap();
        let store = UnknownFaceStore::new(tmp.path()).unwrap();
        assert!(matches!(store.get("deadbeef"), Err(GreeterError::UnknownFaceNotFound(_))));
        assert!(matches!(store.get("../x"), Err(GreeterError::UnknownFaceNotFound(_))));
        assert!(matches!(store.delete("deadbeef"), Err(GreeterError::UnknownFaceNotFound(_))));
    }

    #[test]
    fn delete_removes_both_files() {
        let tmp = TempDir::new().unwrap();
        let store = UnknownFaceStore::new(tmp.path()).unwrap();
        let id = store.save(&crop(), BoundingBox::new(0, 1, 1, 0), at(0)).unwrap();
        store.delete(&id).unwrap();
        assert_eq!(fs::read_dir(tmp.path()).unwrap().count(), 0);
    }

    #[test]
    fn clean_removes_old_records_and_keeps_recent_ones() {
        let tmp = TempDir::new().unwrap();
        let store = UnknownFaceStore::new(tmp.path()).unwrap();
        let old = store.save(&crop(), BoundingBox::new(0, 1, 1, 0), at(0)).unwrap();
        let recent = store.save(&crop(), BoundingBox::new(0, 1, 1, 0), at(29 * 86_400)).unwrap();
        // Fresh orphan: mtime is now, so it survives a cutoff in the past.
        crop().save(tmp.path().join("unknown_orphan.jpg")).unwrap();

        let report = store.clean_older_than(30, at(31 * 86_400)).unwrap();
        assert_eq!(report.records_removed, 1);
        assert!(store.get(&old).is_err());
        assert!(store.get(&recent).is_ok());
        assert!(tmp.path().join("unknown_orphan.jpg").exists());
    }

    #[test]
    fn clean_removes_stale_orphans() {
        let tmp = TempDir::new().unwrap();
        let store = UnknownFaceStore::new(tmp.path()).unwrap();
        crop().save(tmp.path().join("unknown_orphan.jpg")).unwrap();

        // Cutoff a day in the future makes the orphan stale.
        let report = store.clean_older_than(0, Utc::now() + Duration::days(1)).unwrap();
        assert_eq!(report.orphans_removed, 1);
    }
}
