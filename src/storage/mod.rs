pub mod activity_log;
pub mod sessions;

pub use activity_log::{ActivityLog, JsonFileActivityLog, LogEntry};
pub use sessions::{FsSessionStore, SessionMetadata, SessionStore, SessionUpload};
