use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use posegate_core::EngineConfig;
use serde::Deserialize;

/// CLI configuration: built-in defaults, then an optional TOML file, then
/// `POSEGATE_*` environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Thresholds for the scorer, validator and state machine.
    pub engine: EngineConfig,
    /// Wall-clock limit for one liveness attempt (default: 60 s).
    pub session_timeout: Duration,
    /// Upper bound on a single face-detector call (default: 2 s).
    pub detector_timeout: Duration,
}

/// `[session]` table of the TOML file. Other tables belong to [`EngineConfig`].
#[derive(Debug, Deserialize)]
#[serde(default)]
struct SessionSection {
    timeout_secs: u64,
    detector_timeout_ms: u64,
}

impl Default for SessionSection {
    fn default() -> Self {
        Self {
            timeout_secs: 60,
            detector_timeout_ms: 2000,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FileSections {
    session: SessionSection,
}

impl Config {
    /// Load configuration. `explicit` (from `--config`) wins over `POSEGATE_CONFIG`.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        Self::from_lookup(explicit, |key| std::env::var(key).ok())
    }

    fn from_lookup(explicit: Option<&Path>, env: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let path = explicit
            .map(Path::to_path_buf)
            .or_else(|| env("POSEGATE_CONFIG").map(PathBuf::from));

        let (mut engine, session) = match &path {
            Some(path) => {
                let contents = std::fs::read_to_string(path)
                    .with_context(|| format!("failed to read config file {}", path.display()))?;
                let engine = EngineConfig::from_toml_str(&contents)
                    .with_context(|| format!("invalid config file {}", path.display()))?;
                let sections: FileSections = toml::from_str(&contents)
                    .with_context(|| format!("invalid [session] table in {}", path.display()))?;
                (engine, sections.session)
            }
            None => (EngineConfig::default(), SessionSection::default()),
        };

        let liveness = &mut engine.liveness;
        liveness.required_consecutive_frames = env_parse(
            &env,
            "POSEGATE_REQUIRED_FRAMES",
            liveness.required_consecutive_frames,
        );
        liveness.quality_gate = env_flag(&env, "POSEGATE_QUALITY_GATE", liveness.quality_gate);
        engine.quality.min_stable_frames = env_parse(
            &env,
            "POSEGATE_MIN_STABLE_FRAMES",
            engine.quality.min_stable_frames,
        );
        engine
            .validate()
            .context("invalid configuration after environment overrides")?;

        let timeout_secs = env_parse(&env, "POSEGATE_SESSION_TIMEOUT_SECS", session.timeout_secs);
        let detector_ms = env_parse(
            &env,
            "POSEGATE_DETECTOR_TIMEOUT_MS",
            session.detector_timeout_ms,
        );
        anyhow::ensure!(timeout_secs > 0, "session timeout must be positive");
        anyhow::ensure!(detector_ms > 0, "detector timeout must be positive");

        Ok(Self {
            engine,
            session_timeout: Duration::from_secs(timeout_secs),
            detector_timeout: Duration::from_millis(detector_ms),
        })
    }
}

fn env_parse<T: std::str::FromStr>(
    env: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> T {
    match env(key) {
        Some(raw) => raw.parse().unwrap_or_else(|_| {
            tracing::warn!(key, value = %raw, "ignoring unparsable environment override");
            default
        }),
        None => default,
    }
}

fn env_flag(env: &impl Fn(&str) -> Option<String>, key: &str, default: bool) -> bool {
    env(key).map(|v| v != "0").unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    fn temp_file(name: &str, contents: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "posegate-config-test-{}-{}",
            name,
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap()
                .as_nanos()
        ));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("posegate.toml");
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_lookup(None, lookup(&[])).unwrap();
        assert_eq!(config.engine, EngineConfig::default());
        assert_eq!(config.session_timeout, Duration::from_secs(60));
        assert_eq!(config.detector_timeout, Duration::from_millis(2000));
    }

    #[test]
    fn test_env_overrides() {
        let config = Config::from_lookup(
            None,
            lookup(&[
                ("POSEGATE_REQUIRED_FRAMES", "3"),
                ("POSEGATE_QUALITY_GATE", "1"),
                ("POSEGATE_MIN_STABLE_FRAMES", "4"),
                ("POSEGATE_SESSION_TIMEOUT_SECS", "15"),
            ]),
        )
        .unwrap();
        assert_eq!(config.engine.liveness.required_consecutive_frames, 3);
        assert!(config.engine.liveness.quality_gate);
        assert_eq!(config.engine.quality.min_stable_frames, 4);
        assert_eq!(config.session_timeout, Duration::from_secs(15));
    }

    #[test]
    fn test_unparsable_env_keeps_default() {
        let config =
            Config::from_lookup(None, lookup(&[("POSEGATE_REQUIRED_FRAMES", "many")])).unwrap();
        assert_eq!(config.engine.liveness.required_consecutive_frames, 5);
    }

    #[test]
    fn test_zero_frames_from_env_is_rejected() {
        assert!(Config::from_lookup(None, lookup(&[("POSEGATE_REQUIRED_FRAMES", "0")])).is_err());
    }

    #[test]
    fn test_file_then_env() {
        let path = temp_file(
            "layered",
            "[session]\ntimeout_secs = 30\n\n[liveness]\nrequired_consecutive_frames = 7\n",
        );
        let config = Config::from_lookup(
            Some(&path),
            lookup(&[("POSEGATE_SESSION_TIMEOUT_SECS", "20")]),
        )
        .unwrap();
        assert_eq!(config.engine.liveness.required_consecutive_frames, 7);
        assert_eq!(config.session_timeout, Duration::from_secs(20));
        assert_eq!(config.detector_timeout, Duration::from_millis(2000));
        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn test_config_path_from_env() {
        let path = temp_file("env-path", "[session]\ndetector_timeout_ms = 250\n");
        let config = Config::from_lookup(
            None,
            lookup(&[("POSEGATE_CONFIG", path.to_str().unwrap())]),
        )
        .unwrap();
        assert_eq!(config.detector_timeout, Duration::from_millis(250));
        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let err = Config::from_lookup(Some(Path::new("/nonexistent/posegate.toml")), lookup(&[]))
            .unwrap_err();
        assert!(err.to_string().contains("failed to read config file"));
    }
}
