use std::env;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Clone, Debug)]
pub struct Config {
    pub database_url: String,
    pub bind_addr: String,
    pub session_ttl_hours: i64,
    pub model_dir: PathBuf,
    pub upload_dir: PathBuf,
    pub max_upload_bytes: usize,
    pub completion: Option<CompletionConfig>,
    pub outbreak: OutbreakConfig,
    pub bootstrap_admin: Option<BootstrapAdmin>,
}

/// Settings for the OpenAI-compatible text-completion service.
/// Absent when either the URL or the key is unset.
#[derive(Clone, Debug)]
pub struct CompletionConfig {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub max_tokens: u32,
    pub timeout: Duration,
}

#[derive(Clone, Copy, Debug)]
pub struct OutbreakConfig {
    pub radius_km: f64,
    pub min_cases: usize,
    pub window_days: i64,
}

impl Default for OutbreakConfig {
    fn default() -> Self {
        Self {
            radius_km: 5.0,
            min_cases: 5,
            window_days: 14,
        }
    }
}

#[derive(Clone, Debug)]
pub struct BootstrapAdmin {
    pub email: String,
    pub password: String,
}

fn parsed_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|s| s.trim().parse::<T>().ok())
        .unwrap_or(default)
}

const MAX_SESSION_TTL_HOURS: i64 = 24 * 365;
const MAX_WINDOW_DAYS: i64 = 3650;
const MAX_RADIUS_KM: f64 = 20_000.0;

/// Durations feed straight into `chrono` arithmetic, which panics on overflow.
fn check_ranges(session_ttl_hours: i64, outbreak: &OutbreakConfig) -> anyhow::Result<()> {
    if !(1..=MAX_SESSION_TTL_HOURS).contains(&session_ttl_hours) {
        anyhow::bail!("SESSION_TTL_HOURS must be between 1 and {MAX_SESSION_TTL_HOURS}, got {session_ttl_hours}");
    }
    if !(1..=MAX_WINDOW_DAYS).contains(&outbreak.window_days) {
        anyhow::bail!(
            "OUTBREAK_WINDOW_DAYS must be between 1 and {MAX_WINDOW_DAYS}, got {}",
            outbreak.window_days
        );
    }
    if !(outbreak.radius_km > 0.0 && outbreak.radius_km <= MAX_RADIUS_KM) {
        anyhow::bail!("OUTBREAK_RADIUS_KM must be in (0, {MAX_RADIUS_KM}], got {}", outbreak.radius_km);
    }
    if outbreak.min_cases == 0 {
        anyhow::bail!("OUTBREAK_MIN_CASES must be at least 1");
    }
    Ok(())
}

fn non_empty(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.trim().is_empty())
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = env::var("DATABASE_URL")?;
        let bind_addr = env::var("BIND_ADDR").unwrap_or_else(|_| "127.0.0.1:8080".to_string());
        let session_ttl_hours = parsed_or("SESSION_TTL_HOURS", 24i64);

        let model_dir = PathBuf::from(env::var("MODEL_DIR").unwrap_or_else(|_| "models".into()));
        let upload_dir = PathBuf::from(env::var("UPLOAD_DIR").unwrap_or_else(|_| "uploads".into()));
        let max_upload_bytes = parsed_or("MAX_UPLOAD_BYTES", 10 * 1024 * 1024usize);

        let completion = match (non_empty("COMPLETION_API_URL"), non_empty("COMPLETION_API_KEY")) {
            (Some(base_url), Some(api_key)) => Some(CompletionConfig {
                base_url,
                api_key,
                model: env::var("COMPLETION_MODEL").unwrap_or_else(|_| "gpt-4o-mini".into()),
                max_tokens: parsed_or("COMPLETION_MAX_TOKENS", 400u32),
                timeout: Duration::from_secs(parsed_or("COMPLETION_TIMEOUT_SECS", 30u64).clamp(1, 600)),
            }),
            _ => None,
        };

        let defaults = OutbreakConfig::default();
        let outbreak = OutbreakConfig {
            radius_km: parsed_or("OUTBREAK_RADIUS_KM", defaults.radius_km),
            min_cases: parsed_or("OUTBREAK_MIN_CASES", defaults.min_cases),
            window_days: parsed_or("OUTBREAK_WINDOW_DAYS", defaults.window_days),
        };
        check_ranges(session_ttl_hours, &outbreak)?;

        let bootstrap_admin = match (non_empty("BOOTSTRAP_ADMIN_EMAIL"), non_empty("BOOTSTRAP_ADMIN_PASSWORD")) {
            (Some(email), Some(password)) => Some(BootstrapAdmin { email, password }),
            _ => None,
        };

        Ok(Self {
            database_url,
            bind_addr,
            session_ttl_hours,
            model_dir,
            upload_dir,
            max_upload_bytes,
            completion,
            outbreak,
            bootstrap_admin,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_in_range() {
        assert!(check_ranges(24, &OutbreakConfig::default()).is_ok());
    }

    #[test]
    fn rejects_durations_chrono_cannot_hold() {
        let outbreak = OutbreakConfig::default();
        assert!(check_ranges(0, &outbreak).is_err());
        assert!(check_ranges(i64::MAX, &outbreak).is_err());
        assert!(check_ranges(MAX_SESSION_TTL_HOURS, &outbreak).is_ok());

        let huge_window = OutbreakConfig {
            window_days: i64::MAX / 2,
            ..outbreak
        };
        assert!(check_ranges(24, &huge_window).is_err());
        let no_window = OutbreakConfig { window_days: 0, ..outbreak };
        assert!(check_ranges(24, &no_window).is_err());
    }

    #[test]
    fn rejects_bad_outbreak_geometry() {
        let outbreak = OutbreakConfig::default();
        assert!(check_ranges(24, &OutbreakConfig { radius_km: 0.0, ..outbreak }).is_err());
        assert!(check_ranges(24, &OutbreakConfig { radius_km: f64::NAN, ..outbreak }).is_err());
        assert!(check_ranges(24, &OutbreakConfig { min_cases: 0, ..outbreak }).is_err());
    }
}
