use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use tracing::warn;

pub const DEFAULT_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_MAX_UPLOAD_MB: usize = 25;

/// Service configuration read from the environment (after `.env` is loaded).
///
/// | Env Var                    | Default                                            |
/// |----------------------------|----------------------------------------------------|
/// | `GEMINI_API_KEY`/`API_KEY` | unset, demo mode                                   |
/// | `GEMINI_API_BASE`          | `https://generativelanguage.googleapis.com/v1beta` |
/// | `PORT`                     | `8080`                                             |
/// | `PRESETS_PATH`             | `hikari-render-presets.json`                       |
/// | `MAX_UPLOAD_MB`            | `25`                                               |
/// | `PROGRESS_GRACE_MS`        | `2000`                                             |
/// | `MEDIA_PROGRESS_GRACE_MS`  | `3000`                                             |
/// | `BATCH_STEP_DELAY_MS`      | `1000`                                             |
/// | `VIDEO_POLL_INTERVAL_SECS` | `10`                                               |
/// | `VIDEO_MAX_POLLS`          | `30`                                               |
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub api_key: Option<String>,
    pub api_base: String,
    pub port: u16,
    pub presets_path: PathBuf,
    /// Request body ceiling; uploads travel base64-encoded inside JSON.
    pub max_upload_bytes: usize,
    pub timings: Timings,
    pub video_polling: PollPolicy,
}

/// Fixed pauses the controller holds so the user perceives each step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timings {
    /// Before progress drops back to 0 after a render or enhance.
    pub progress_grace: Duration,
    /// Same, for text-to-image and image-to-video.
    pub media_progress_grace: Duration,
    /// Between two batch jobs.
    pub batch_step_delay: Duration,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            progress_grace: Duration::from_millis(2000),
            media_progress_grace: Duration::from_millis(3000),
            batch_step_delay: Duration::from_millis(1000),
        }
    }
}

impl Timings {
    pub fn immediate() -> Self {
        Self { progress_grace: Duration::ZERO, media_progress_grace: Duration::ZERO, batch_step_delay: Duration::ZERO }
    }
}

/// Bounded polling for long-running operations: 10 s x 30 is a five minute ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub max_attempts: u32,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self { interval: Duration::from_secs(10), max_attempts: 30 }
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        let api_key = std::env::var("GEMINI_API_KEY")
            .or_else(|_| std::env::var("API_KEY"))
            .ok()
            .filter(|k| !k.trim().is_empty() && k != "DEMO_KEY");
        let defaults = Timings::default();
        let polling = PollPolicy::default();
        Self {
            api_key,
            api_base: std::env::var("GEMINI_API_BASE").unwrap_or_else(|_| DEFAULT_API_BASE.to_string()),
            port: env_or("PORT", 8080),
            presets_path: std::env::var("PRESETS_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("hikari-render-presets.json")),
            max_upload_bytes: env_or("MAX_UPLOAD_MB", DEFAULT_MAX_UPLOAD_MB).saturating_mul(1024 * 1024),
            timings: Timings {
                progress_grace: env_millis("PROGRESS_GRACE_MS", defaults.progress_grace),
                media_progress_grace: env_millis("MEDIA_PROGRESS_GRACE_MS", defaults.media_progress_grace),
                batch_step_delay: env_millis("BATCH_STEP_DELAY_MS", defaults.batch_step_delay),
            },
            video_polling: PollPolicy {
                interval: Duration::from_secs(env_or("VIDEO_POLL_INTERVAL_SECS", polling.interval.as_secs())),
                max_attempts: env_or("VIDEO_MAX_POLLS", polling.max_attempts),
            },
        }
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(raw) => raw.parse().unwrap_or_else(|_| {
            warn!("⚠️ Ignoring unparseable {}={:?}, using default", key, raw);
            default
        }),
        Err(_) => default,
    }
}

fn env_millis(key: &str, default: Duration) -> Duration {
    Duration::from_millis(env_or(key, default.as_millis() as u64))
}
