pub mod loader;
pub mod schema;

pub use loader::{load_settings, load_settings_from_str};
pub use schema::{SyncSettings, DIRECTORY_MAX_FILE_SIZE, FILE_MAX_FILE_SIZE};
