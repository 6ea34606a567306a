use serde::{Deserialize, Serialize};
use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;

use crate::data::{ScheduleConstraints, StudioId, parse_time};
use crate::error::ValidationError;

/// Scheduling options as they arrive from callers. Times are `HH:MM` strings;
/// anything left out falls back to [`ScheduleConstraints::default`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConstraintsConfig {
    pub opening_time: Option<String>,
    pub closing_time: Option<String>,
    pub max_concurrent_classes: Option<u32>,
    pub prefer_beginners_in_peak: Option<bool>,
    pub min_break_between_classes: Option<u32>,
    pub peak_hours_start: Option<String>,
    pub peak_hours_end: Option<String>,
    pub slot_increment_minutes: Option<u32>,
}

impl TryFrom<ConstraintsConfig> for ScheduleConstraints {
    type Error = ValidationError;

    fn try_from(config: ConstraintsConfig) -> Result<Self, Self::Error> {
        let defaults = ScheduleConstraints::default();
        let time_or = |raw: Option<String>, fallback| match raw {
            Some(raw) => parse_time(&raw),
            None => Ok(fallback),
        };

        let constraints = ScheduleConstraints {
            opening_time: time_or(config.opening_time, defaults.opening_time)?,
            closing_time: time_or(config.closing_time, defaults.closing_time)?,
            min_break_between_classes: config
                .min_break_between_classes
                .unwrap_or(defaults.min_break_between_classes),
            max_concurrent_classes: config
                .max_concurrent_classes
                .unwrap_or(defaults.max_concurrent_classes),
            peak_hours_start: time_or(config.peak_hours_start, defaults.peak_hours_start)?,
            peak_hours_end: time_or(config.peak_hours_end, defaults.peak_hours_end)?,
            prefer_beginners_in_peak: config
                .prefer_beginners_in_peak
                .unwrap_or(defaults.prefer_beginners_in_peak),
            slot_increment_minutes: config
                .slot_increment_minutes
                .unwrap_or(defaults.slot_increment_minutes),
        };
        constraints.validate()?;
        Ok(constraints)
    }
}

const DEFAULT_BIND: &str = "127.0.0.1:8080";

/// Settings for the HTTP binary, read from the environment.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind: SocketAddr,
    pub studio: StudioId,
    pub seed_path: Option<PathBuf>,
}

impl ServerConfig {
    /// `SCHEDULER_BIND`, `SCHEDULER_STUDIO` and `SCHEDULER_SEED`.
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        use anyhow::Context;

        let bind = lookup("SCHEDULER_BIND")
            .unwrap_or_else(|| DEFAULT_BIND.to_string())
            .parse()
            .context("SCHEDULER_BIND is not a socket address")?;
        let studio = match lookup("SCHEDULER_STUDIO") {
            Some(raw) => raw
                .parse()
                .with_context(|| format!("SCHEDULER_STUDIO '{raw}' is not a studio id"))?,
            None => 1,
        };
        let seed_path = lookup("SCHEDULER_SEED").map(PathBuf::from);

        Ok(Self {
            bind,
            studio,
            seed_path,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn empty_config_yields_defaults() {
        let constraints = ScheduleConstraints::try_from(ConstraintsConfig::default()).unwrap();
        assert_eq!(constraints, ScheduleConstraints::default());
    }

    #[test]
    fn parses_recognised_options() {
        let config: ConstraintsConfig = serde_json::from_str(
            r#"{"openingTime":"08:30","closingTime":"21:00","maxConcurrentClasses":2,"preferBeginnersInPeak":false}"#,
        )
        .unwrap();
        let constraints = ScheduleConstraints::try_from(config).unwrap();
        assert_eq!(constraints.opening_time, parse_time("08:30").unwrap());
        assert_eq!(constraints.closing_time, parse_time("21:00").unwrap());
        assert_eq!(constraints.max_concurrent_classes, 2);
        assert!(!constraints.prefer_beginners_in_peak);
    }

    #[test]
    fn rejects_malformed_and_inverted_hours() {
        let malformed = ConstraintsConfig {
            opening_time: Some("nine".into()),
            ..ConstraintsConfig::default()
        };
        assert_eq!(
            ScheduleConstraints::try_from(malformed),
            Err(ValidationError::InvalidTime("nine".into()))
        );

        let inverted = ConstraintsConfig {
            opening_time: Some("20:00".into()),
            closing_time: Some("08:00".into()),
            ..ConstraintsConfig::default()
        };
        assert!(matches!(
            ScheduleConstraints::try_from(inverted),
            Err(ValidationError::OpeningAfterClosing { .. })
        ));
    }

    #[test]
    fn server_config_defaults_and_overrides() {
        let config = ServerConfig::from_lookup(|_| None).unwrap();
        assert_eq!(config.bind.to_string(), DEFAULT_BIND);
        assert_eq!(config.studio, 1);
        assert!(config.seed_path.is_none());

        let vars = HashMap::from([
            ("SCHEDULER_BIND", "0.0.0.0:9000"),
            ("SCHEDULER_STUDIO", "7"),
            ("SCHEDULER_SEED", "seed.json"),
        ]);
        let config = ServerConfig::from_lookup(|key| vars.get(key).map(|v| v.to_string())).unwrap();
        assert_eq!(config.bind.port(), 9000);
        assert_eq!(config.studio, 7);
        assert_eq!(config.seed_path, Some(PathBuf::from("seed.json")));

        assert!(ServerConfig::from_lookup(|_| Some("not an address".into())).is_err());
    }
}
