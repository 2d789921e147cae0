use std::path::PathBuf;
use std::sync::Arc;

use crate::config::Config;
use crate::pipeline::MergePipeline;
use crate::storage::{ActivityLog, SessionStore};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdminCredentials {
    pub username: String,
    pub password: String,
}

/// Router-level settings that do not belong to the pipeline.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub static_dir: PathBuf,
    pub uploads_dir: PathBuf,
    pub body_limit_bytes: usize,
    /// `None` disables the admin routes.
    pub admin: Option<AdminCredentials>,
}

impl ServerSettings {
    pub fn from_config(config: &Config) -> Self {
        ServerSettings {
            static_dir: config.static_dir.clone(),
            uploads_dir: config.uploads_dir.clone(),
            body_limit_bytes: config.body_limit_mb.saturating_mul(1024 * 1024),
            admin: config.admin_enabled().then(|| AdminCredentials {
                username: config.admin_username.clone(),
                password: config.admin_password.clone(),
            }),
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<MergePipeline>,
    pub sessions: Arc<dyn SessionStore>,
    pub activity_log: Arc<dyn ActivityLog>,
    pub settings: Arc<ServerSettings>,
}

impl AppState {
    pub fn new(
        pipeline: MergePipeline,
        sessions: Arc<dyn SessionStore>,
        activity_log: Arc<dyn ActivityLog>,
        settings: ServerSettings,
    ) -> Self {
        AppState {
            pipeline: Arc::new(pipeline),
            sessions,
            activity_log,
            settings: Arc::new(settings),
        }
    }
}
