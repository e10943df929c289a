//! CLI configuration, loaded from environment variables at startup.
//!
//! Command-line flags override individual fields afterwards.

use std::path::PathBuf;
use std::time::Duration;

use vidgen_core::provider::veo::{DEFAULT_BASE_URL, DEFAULT_MODEL};

/// Runtime configuration for the `vidgen` binary.
///
/// Every field except the API key has a default, so only a key is needed to
/// start generating.
#[derive(Debug, Clone)]
pub struct Config {
    /// Gemini API key (`VIDGEN_API_KEY`, falling back to `GEMINI_API_KEY`).
    pub api_key: Option<String>,

    /// API root (default: the public Gemini v1beta endpoint).
    pub api_base: String,

    /// Video model id (default: `"veo-2.0-generate-001"`).
    pub model: String,

    /// Delay between operation polls.
    pub poll_interval: Duration,

    /// Cadence of the narrated status messages.
    pub narrator_interval: Duration,

    /// Give up on a generation after this long. Unset means wait indefinitely.
    pub deadline: Option<Duration>,

    /// Where finished videos are written (default: current directory).
    pub output_dir: PathBuf,

    /// `tracing` filter string, e.g. `"info"` or `"vidgen_core=debug"`.
    pub log_level: String,

    /// When `true`, emit log records as newline-delimited JSON.
    pub log_json: bool,
}

impl Config {
    /// Build [`Config`] from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let non_blank = |k: &String| !k.trim().is_empty();
        let api_key = lookup("VIDGEN_API_KEY")
            .filter(non_blank)
            .or_else(|| lookup("GEMINI_API_KEY").filter(non_blank));

        Self {
            api_key,
            api_base: env_or(&lookup, "VIDGEN_API_BASE", DEFAULT_BASE_URL),
            model: env_or(&lookup, "VIDGEN_MODEL", DEFAULT_MODEL),
            poll_interval: Duration::from_millis(parse_env(&lookup, "VIDGEN_POLL_INTERVAL_MS", 10_000)),
            narrator_interval: Duration::from_millis(parse_env(
                &lookup,
                "VIDGEN_NARRATOR_INTERVAL_MS",
                4_000,
            )),
            deadline: lookup("VIDGEN_DEADLINE_SECS")
                .and_then(|v| v.parse::<u64>().ok())
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs),
            output_dir: PathBuf::from(env_or(&lookup, "VIDGEN_OUTPUT_DIR", ".")),
            log_level: env_or(&lookup, "VIDGEN_LOG", "info"),
            log_json: lookup("VIDGEN_LOG_JSON")
                .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
                .unwrap_or(false),
        }
    }
}

// ── private helpers ──────────────────────────────────────────────────────────

fn env_or(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: &str) -> String {
    lookup(key).unwrap_or_else(|| default.to_owned())
}

fn parse_env<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> T {
    lookup(key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
