//! Backend configuration parsed from environment variables.
//!
//! A missing endpoint, a missing key, or the placeholder values shipped in
//! sample `.env` files all select [`Mode::Demo`], in which no request ever
//! leaves the process.

use std::path::PathBuf;
use std::time::Duration;

pub const DEMO_PLACEHOLDER_URL: &str = "https://demo.supabase.co";
pub const DEMO_PLACEHOLDER_KEY: &str = "demo_key";

pub const DEFAULT_SESSION_TIMEOUT_SECS: u64 = 5;
pub const DEFAULT_PROFILE_TIMEOUT_SECS: u64 = 6;
pub const DEFAULT_PROFILE_MAX_RETRIES: u32 = 2;
pub const DEFAULT_RETRY_BASE_DELAY_MS: u64 = 1000;

/// Credentials for the managed backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendCredentials {
    pub url: String,
    pub anon_key: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mode {
    /// Talk to the configured backend.
    Live(BackendCredentials),
    /// Serve the static demo accounts; no backend.
    Demo,
}

impl Mode {
    #[must_use]
    pub fn is_demo(&self) -> bool {
        matches!(self, Self::Demo)
    }
}

/// Deadlines and retry policy for the synchronizer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timing {
    /// Upper bound on the bootstrap session fetch before `loading` is forced off.
    pub session_timeout: Duration,
    /// Per-attempt deadline on the profile point query.
    pub profile_timeout: Duration,
    /// Retries after the first profile attempt.
    pub profile_max_retries: u32,
    /// Retry `n` (0-based) waits `retry_base_delay * (n + 1)`.
    pub retry_base_delay: Duration,
}

impl Timing {
    /// Worst-case time for profile resolution to settle: every attempt times
    /// out and every retry delay is served.
    #[must_use]
    pub fn profile_budget(&self) -> Duration {
        let retries = u64::from(self.profile_max_retries);
        let attempts = self.profile_max_retries.saturating_add(1);
        // 1 + 2 + ... + retries base delays.
        let delays = retries
            .checked_mul(retries + 1)
            .map_or(u32::MAX, |n| u32::try_from(n / 2).unwrap_or(u32::MAX));
        self.profile_timeout
            .saturating_mul(attempts)
            .saturating_add(self.retry_base_delay.saturating_mul(delays))
    }
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            session_timeout: Duration::from_secs(DEFAULT_SESSION_TIMEOUT_SECS),
            profile_timeout: Duration::from_secs(DEFAULT_PROFILE_TIMEOUT_SECS),
            profile_max_retries: DEFAULT_PROFILE_MAX_RETRIES,
            retry_base_delay: Duration::from_millis(DEFAULT_RETRY_BASE_DELAY_MS),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendConfig {
    pub mode: Mode,
    pub timing: Timing,
    /// Where the signed-in session is persisted; in-memory when absent.
    pub session_file: Option<PathBuf>,
}

impl BackendConfig {
    /// Build typed config from environment variables.
    ///
    /// - `SUPABASE_URL`, `SUPABASE_ANON_KEY`: backend endpoint and anonymous key
    /// - `HMS_SESSION_TIMEOUT_SECS`: default 5
    /// - `HMS_PROFILE_TIMEOUT_SECS`: default 6
    /// - `HMS_PROFILE_MAX_RETRIES`: default 2
    /// - `HMS_RETRY_BASE_DELAY_MS`: default 1000
    /// - `HMS_SESSION_FILE`: optional persisted session path
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build typed config from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let url = lookup("SUPABASE_URL")
            .map(|v| v.trim().trim_end_matches('/').to_string())
            .filter(|v| !v.is_empty());
        let anon_key = lookup("SUPABASE_ANON_KEY")
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty());

        let mode = match (url, anon_key) {
            (Some(url), Some(anon_key)) if url != DEMO_PLACEHOLDER_URL && anon_key != DEMO_PLACEHOLDER_KEY => {
                Mode::Live(BackendCredentials { url, anon_key })
            }
            _ => Mode::Demo,
        };

        let timing = Timing {
            session_timeout: Duration::from_secs(parse_or(
                &lookup,
                "HMS_SESSION_TIMEOUT_SECS",
                DEFAULT_SESSION_TIMEOUT_SECS,
            )),
            profile_timeout: Duration::from_secs(parse_or(
                &lookup,
                "HMS_PROFILE_TIMEOUT_SECS",
                DEFAULT_PROFILE_TIMEOUT_SECS,
            )),
            profile_max_retries: parse_or(&lookup, "HMS_PROFILE_MAX_RETRIES", DEFAULT_PROFILE_MAX_RETRIES),
            retry_base_delay: Duration::from_millis(parse_or(
                &lookup,
                "HMS_RETRY_BASE_DELAY_MS",
                DEFAULT_RETRY_BASE_DELAY_MS,
            )),
        };

        let session_file = lookup("HMS_SESSION_FILE")
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from);

        Self { mode, timing, session_file }
    }

    /// Demo-mode config with default timing.
    #[must_use]
    pub fn demo() -> Self {
        Self { mode: Mode::Demo, timing: Timing::default(), session_file: None }
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> T
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    lookup(key)
        .and_then(|v| v.trim().parse::<T>().ok())
        .unwrap_or(default)
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
