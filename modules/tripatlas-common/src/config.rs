use std::env;
use std::path::PathBuf;

use tracing::info;

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    // Neo4j
    pub neo4j_uri: String,
    pub neo4j_user: String,
    pub neo4j_password: String,

    /// Explicit Chromium executable. When unset the client scans PATH and
    /// well-known install locations.
    pub chrome_executable: Option<String>,

    /// Directory for seed files, checkpoints, artifacts, and the dead-letter log.
    pub data_dir: PathBuf,

    pub policy: PipelinePolicy,
}

/// Pipeline tuning knobs. The defaults are the empirically-tuned values the
/// crawl has been running with; all of them can be overridden from the
/// environment so anti-detection cadence is adjustable without a rebuild.
#[derive(Debug, Clone)]
pub struct PipelinePolicy {
    /// Force a browser recycle every N seeds, regardless of outcome.
    pub rotate_every_seeds: u32,
    /// Attempts per seed before it is marked failed and skipped.
    pub retry_max_attempts: u32,
    /// Uniform jitter band between seeds, seconds.
    pub seed_delay_secs: (f64, f64),
    /// Uniform jitter band between listing pages, seconds.
    pub page_delay_secs: (f64, f64),
    /// Bounded wait for a listing container to render, seconds.
    pub listing_timeout_secs: u64,
    /// Bounded wait for a detail page's marker element, seconds.
    pub detail_marker_timeout_secs: u64,
    /// Bounded per-field lookup on a detail page, seconds.
    pub detail_field_timeout_secs: u64,
    /// Navigation timeout, seconds.
    pub nav_timeout_secs: u64,
}

impl Default for PipelinePolicy {
    fn default() -> Self {
        Self {
            rotate_every_seeds: 3,
            retry_max_attempts: 3,
            seed_delay_secs: (1.5, 3.5),
            page_delay_secs: (1.0, 3.0),
            listing_timeout_secs: 20,
            detail_marker_timeout_secs: 10,
            detail_field_timeout_secs: 5,
            nav_timeout_secs: 30,
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    /// Panics with a clear message if required vars are missing.
    pub fn from_env() -> Self {
        let defaults = PipelinePolicy::default();
        Self {
            neo4j_uri: required_env("NEO4J_URI"),
            neo4j_user: required_env("NEO4J_USER"),
            neo4j_password: required_env("NEO4J_PASSWORD"),
            chrome_executable: env::var("CHROME_EXECUTABLE").ok(),
            data_dir: env::var("TRIPATLAS_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("data")),
            policy: PipelinePolicy {
                rotate_every_seeds: env_u32("TRIPATLAS_ROTATE_EVERY", defaults.rotate_every_seeds),
                retry_max_attempts: env_u32("TRIPATLAS_MAX_ATTEMPTS", defaults.retry_max_attempts),
                seed_delay_secs: defaults.seed_delay_secs,
                page_delay_secs: defaults.page_delay_secs,
                listing_timeout_secs: env_u64(
                    "TRIPATLAS_LISTING_TIMEOUT",
                    defaults.listing_timeout_secs,
                ),
                detail_marker_timeout_secs: env_u64(
                    "TRIPATLAS_MARKER_TIMEOUT",
                    defaults.detail_marker_timeout_secs,
                ),
                detail_field_timeout_secs: env_u64(
                    "TRIPATLAS_FIELD_TIMEOUT",
                    defaults.detail_field_timeout_secs,
                ),
                nav_timeout_secs: env_u64("TRIPATLAS_NAV_TIMEOUT", defaults.nav_timeout_secs),
            },
        }
    }

    /// Log the effective configuration without credentials.
    pub fn log_redacted(&self) {
        info!(
            neo4j_uri = %self.neo4j_uri,
            neo4j_user = %self.neo4j_user,
            data_dir = %self.data_dir.display(),
            rotate_every = self.policy.rotate_every_seeds,
            max_attempts = self.policy.retry_max_attempts,
            "Configuration loaded"
        );
    }
}

fn required_env(key: &str) -> String {
    env::var(key).unwrap_or_else(|_| panic!("{key} environment variable is required"))
}

fn env_u32(key: &str, default: u32) -> u32 {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
