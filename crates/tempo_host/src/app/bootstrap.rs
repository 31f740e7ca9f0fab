use std::env;
use std::path::PathBuf;
use std::rc::Rc;
use std::str::FromStr;
use std::time::Duration;

use tempo::{
    EventScheduler, PersistError, SchedulerConfig, SystemTimeSource, TimeSource, VirtualClock,
};
use thiserror::Error;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

pub(crate) const SAVE_PATH_ENV_VAR: &str = "TEMPO_SAVE_PATH";
pub(crate) const RUN_SECONDS_ENV_VAR: &str = "TEMPO_RUN_SECONDS";
pub(crate) const FRAME_HZ_ENV_VAR: &str = "TEMPO_FRAME_HZ";
pub(crate) const AUTOSAVE_SECONDS_ENV_VAR: &str = "TEMPO_AUTOSAVE_SECONDS";

#[derive(Debug, Error)]
pub(crate) enum HostError {
    #[error("invalid host config {field}: {reason}")]
    InvalidConfig {
        field: &'static str,
        reason: String,
    },
    #[error(transparent)]
    Persist(#[from] PersistError),
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct HostConfig {
    pub(crate) save_path: PathBuf,
    pub(crate) run_for: Duration,
    /// `None` runs frames back to back.
    pub(crate) frame_hz: Option<u32>,
    pub(crate) autosave_interval: Duration,
    pub(crate) heartbeat_seconds: f64,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            save_path: PathBuf::from("saves").join("clock.json"),
            run_for: Duration::from_secs(10),
            frame_hz: Some(60),
            autosave_interval: Duration::from_secs(5),
            heartbeat_seconds: 1.0,
        }
    }
}

impl HostConfig {
    pub(crate) fn from_env() -> Self {
        let defaults = Self::default();
        let save_path = env::var_os(SAVE_PATH_ENV_VAR)
            .filter(|value| !value.is_empty())
            .map(PathBuf::from)
            .unwrap_or(defaults.save_path);
        let run_seconds = read_env_or(RUN_SECONDS_ENV_VAR, defaults.run_for.as_secs_f64());
        let frame_hz = read_env_or(FRAME_HZ_ENV_VAR, defaults.frame_hz.unwrap_or(0));
        let autosave_seconds = read_env_or(
            AUTOSAVE_SECONDS_ENV_VAR,
            defaults.autosave_interval.as_secs_f64(),
        );

        Self {
            save_path,
            run_for: seconds_or(run_seconds, defaults.run_for),
            frame_hz: normalize_frame_hz(frame_hz),
            autosave_interval: seconds_or(autosave_seconds, defaults.autosave_interval),
            heartbeat_seconds: defaults.heartbeat_seconds,
        }
    }

    pub(crate) fn validate(&self) -> Result<(), HostError> {
        if self.autosave_interval.is_zero() {
            return Err(HostError::InvalidConfig {
                field: "autosave_interval",
                reason: "must be greater than zero".to_string(),
            });
        }
        if !(self.heartbeat_seconds.is_finite() && self.heartbeat_seconds > 0.0) {
            return Err(HostError::InvalidConfig {
                field: "heartbeat_seconds",
                reason: format!("expected a positive number, got {}", self.heartbeat_seconds),
            });
        }
        if self.save_path.as_os_str().is_empty() {
            return Err(HostError::InvalidConfig {
                field: "save_path",
                reason: "must not be empty".to_string(),
            });
        }
        Ok(())
    }
}

/// Everything the frame loop needs: one clock behind one scheduler.
pub(crate) struct Host {
    pub(crate) config: HostConfig,
    pub(crate) source: Rc<dyn TimeSource>,
    pub(crate) scheduler: Rc<EventScheduler>,
}

pub(crate) fn build_host() -> Result<Host, HostError> {
    init_tracing();
    info!("=== tempo host startup ===");

    let config = HostConfig::from_env();
    config.validate()?;
    info!(
        save_path = %config.save_path.display(),
        run_seconds = config.run_for.as_secs_f64(),
        frame_hz = ?config.frame_hz,
        autosave_seconds = config.autosave_interval.as_secs_f64(),
        "host_config"
    );

    let source: Rc<dyn TimeSource> = Rc::new(SystemTimeSource::new());
    let clock = Rc::new(VirtualClock::new(Rc::clone(&source)));
    let scheduler = Rc::new(EventScheduler::with_config(clock, SchedulerConfig::default()));

    Ok(Host {
        config,
        source,
        scheduler,
    })
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_names(true)
        .compact()
        .init();
}

fn read_env_or<T>(var: &'static str, fallback: T) -> T
where
    T: FromStr + Copy,
{
    match env::var(var) {
        Ok(raw) => parse_value(&raw).unwrap_or_else(|| {
            warn!(
                env_var = var,
                value = raw.as_str(),
                "invalid env var value; falling back to default"
            );
            fallback
        }),
        Err(env::VarError::NotPresent) => fallback,
        Err(err) => {
            warn!(env_var = var, error = %err, "unable to read env var; falling back to default");
            fallback
        }
    }
}

fn parse_value<T: FromStr>(raw: &str) -> Option<T> {
    raw.trim().parse::<T>().ok()
}

fn seconds_or(seconds: f64, fallback: Duration) -> Duration {
    if seconds.is_finite() && seconds >= 0.0 {
        Duration::from_secs_f64(seconds)
    } else {
        warn!(seconds, "negative or non-finite seconds; falling back to default");
        fallback
    }
}

fn normalize_frame_hz(frame_hz: u32) -> Option<u32> {
    if frame_hz == 0 {
        None
    } else {
        Some(frame_hz)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_accepts_trimmed_numbers() {
        assert_eq!(parse_value::<u32>(" 30 "), Some(30));
        assert_eq!(parse_value::<f64>("2.5"), Some(2.5));
    }

    #[test]
    fn parse_rejects_garbage() {
        assert_eq!(parse_value::<u32>("fast"), None);
        assert_eq!(parse_value::<u32>("-1"), None);
    }

    #[test]
    fn seconds_fall_back_when_negative() {
        let fallback = Duration::from_secs(5);
        assert_eq!(seconds_or(-1.0, fallback), fallback);
        assert_eq!(seconds_or(f64::NAN, fallback), fallback);
        assert_eq!(seconds_or(0.5, fallback), Duration::from_millis(500));
    }

    #[test]
    fn zero_frame_rate_means_uncapped() {
        assert_eq!(normalize_frame_hz(0), None);
        assert_eq!(normalize_frame_hz(60), Some(60));
    }

    #[test]
    fn default_config_is_valid() {
        assert!(HostConfig::default().validate().is_ok());
    }

    #[test]
    fn zero_autosave_interval_is_rejected() {
        let config = HostConfig {
            autosave_interval: Duration::ZERO,
            ..HostConfig::default()
        };

        let error = config.validate().expect_err("invalid");
        assert!(error.to_string().contains("autosave_interval"));
    }
}
