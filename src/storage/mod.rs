pub mod backup;
pub mod embedding_cache;
pub mod known_faces;
pub mod status;
pub mod unknown_faces;

pub use backup::{create_backup, BackupInfo};
pub use embedding_cache::EmbeddingCache;
pub use known_faces::{IdentityRepository, KnownFace, KnownFaceRepository, KnownFaces};
pub use status::{read_status, LoopStatus, StatusWriter};
pub use unknown_faces::{UnknownFaceRecord, UnknownFaceStatus, UnknownFaceStore};
