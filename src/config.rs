use std::path::PathBuf;
use std::time::Duration;

/// Gateway configuration. Built once at program start (from the environment
/// or otherwise) and handed to the [`Supervisor`](crate::supervisor::Supervisor)
/// constructor; nothing below this layer reads the environment.
#[derive(Clone, Debug)]
pub struct Config {
    /// Root directory holding one subdirectory per session.
    pub session_dir: PathBuf,
    /// How long a pairing QR stays valid before the connection fails with
    /// `QrExpired`.
    pub qr_timeout: Duration,
    /// How long a resume request may wait for its response.
    pub resume_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            session_dir: PathBuf::from("./sessions"),
            qr_timeout: Duration::from_secs(60),
            resume_timeout: Duration::from_secs(30),
        }
    }
}

impl Config {
    /// Reads the configuration from the process environment. Called exactly
    /// once, at program start.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(dir) = std::env::var("SESSION_DIR") {
            config.session_dir = PathBuf::from(dir);
        }
        if let Some(ms) = std::env::var("QR_TIMEOUT_MS")
            .ok()
            .and_then(|v| v.parse().ok())
        {
            config.qr_timeout = Duration::from_millis(ms);
        }
        config
    }
}
