mod blob;
mod settings;

pub use blob::{BlobStore, FsBlobStore, MemoryBlobStore, SharedBlobStore};
pub use settings::{SETTINGS_FILENAME, SettingsStore};
