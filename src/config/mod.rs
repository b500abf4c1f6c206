//! Runtime configuration
//!
//! Typed defaults with environment overrides; config-file loading is the
//! front-end's job. Persisted state lives under `~/.mindmux` (mode 0700).

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::auth::RateLimitConfig;

/// Directory name under the user's home for persisted state
const DATA_DIR_NAME: &str = ".mindmux";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MindmuxConfig {
    /// Where `data.db` and external config files live
    pub data_dir: PathBuf,

    /// HTTP surface bind address
    pub bind_addr: String,

    /// Scheduler tick cadence
    pub tick_interval_ms: u64,

    /// API rate limit: max requests per client per window
    pub rate_limit_max: u32,
    pub rate_limit_window_ms: u64,
}

impl Default for MindmuxConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            bind_addr: "127.0.0.1:8700".to_string(),
            tick_interval_ms: 200,
            rate_limit_max: 100,
            rate_limit_window_ms: 1_000,
        }
    }
}

impl MindmuxConfig {
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("data.db")
    }

    pub fn rate_limit(&self) -> RateLimitConfig {
        RateLimitConfig {
            max: self.rate_limit_max,
            window_ms: self.rate_limit_window_ms,
        }
    }

    /// Create the data directory if missing and restrict it to the owner
    pub fn ensure_data_dir(&self) -> std::io::Result<&Path> {
        std::fs::create_dir_all(&self.data_dir)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = std::fs::Permissions::from_mode(0o700);
            std::fs::set_permissions(&self.data_dir, perms)?;
        }
        Ok(&self.data_dir)
    }
}

fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(DATA_DIR_NAME)
}
