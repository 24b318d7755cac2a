//! Loop configuration snapshots and the live-reload channel.
//!
//! Every generation starts from a fresh [`LoopConfig`] snapshot produced
//! by a [`ConfigChannel`]. The file-backed channel overlays a JSON
//! overrides file onto the snapshot the previous generation ran with, so
//! an operator can adjust knobs (or request `exit`/`pause`) between
//! generations while values the driver adjusted itself survive a reload.

use std::{fmt, fs, io, path::PathBuf};

use evoker_agent::{Family, RemoveKey};
use serde::{Deserialize, Serialize};

/// Error raised when a configuration snapshot cannot be produced or fails
/// validation.
#[derive(Debug, derive_more::Display, derive_more::Error)]
pub enum ConfigError {
    /// A recognized option carries a value outside its allowed range.
    #[display("invalid value for `{option}`: {reason}")]
    Invalid {
        option: &'static str,
        reason: &'static str,
    },
    /// The overrides file could not be read or written.
    #[display("i/o failure on {}", path.display())]
    Io { path: PathBuf, source: io::Error },
    /// The overrides file is not valid JSON or names an unknown option.
    #[display("malformed config file {}", path.display())]
    Json {
        path: PathBuf,
        source: serde_json::Error,
    },
    /// The overrides file does not hold a JSON object.
    #[display("config file {} does not hold a JSON object", path.display())]
    NotAnObject { path: PathBuf },
}

const fn invalid(option: &'static str, reason: &'static str) -> ConfigError {
    ConfigError::Invalid { option, reason }
}

/// Tunable knobs for one generation of the population loop.
///
/// A snapshot is passed by value into each generation; nothing reads it
/// behind the driver's back. Unknown keys in an overrides file are
/// rejected rather than silently dropped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoopConfig {
    /// Stop the loop at the next generation boundary.
    pub exit: bool,
    /// Hold the loop at each generation boundary until released.
    pub pause: bool,
    /// Families kept alive in the learner cohort.
    pub families: Vec<Family>,
    /// Reference pool target size.
    pub ndmk_refs: usize,
    /// Learner cohort target size.
    pub ndmk_learners: usize,
    /// Training group size.
    pub ndmk_tr: usize,
    /// Test group size.
    pub ndmk_ts: usize,
    /// Hands added to a game size when the controller grows it.
    pub game_size_upd: u64,
    /// Separated-pair fraction below which the test game size grows.
    pub min_sep: f32,
    /// Maximum allowed `game_size_ts` / `game_size_tr` ratio.
    pub factor_ts_tr: u32,
    /// Hands per training round.
    pub game_size_tr: u64,
    /// Table seats per agent while training.
    pub dmk_n_players_tr: u32,
    /// Hands per test round.
    pub game_size_ts: u64,
    /// Table seats per agent while testing.
    pub dmk_n_players_ts: u32,
    /// Separated-pair fraction at which a test group may stop early.
    pub sep_pairs_factor: f32,
    /// Confidence multiplier for the separation factor.
    pub sep_n_stdev: f32,
    /// Lifemark removal rule `[threshold, slack]`.
    pub remove_key: RemoveKey,
    /// Probability that a new learner is fresh rather than a crossover.
    pub prob_fresh_dmk: f64,
    /// Probability that a crossover child starts from a fresh checkpoint.
    pub prob_fresh_ckpt: f64,
    /// Archive a snapshot and run the tournament every this many loops.
    pub n_loops_pmt: u32,
    /// Tournament archive capacity.
    pub n_dmk_pmt: usize,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            exit: false,
            pause: false,
            families: vec![Family::new('a').unwrap()],
            ndmk_refs: 5,
            ndmk_learners: 5,
            ndmk_tr: 5,
            ndmk_ts: 10,
            game_size_upd: 100_000,
            min_sep: 0.4,
            factor_ts_tr: 2,
            game_size_tr: 100_000,
            dmk_n_players_tr: 150,
            game_size_ts: 100_000,
            dmk_n_players_ts: 150,
            sep_pairs_factor: 0.8,
            sep_n_stdev: 1.0,
            remove_key: RemoveKey(4, 1),
            prob_fresh_dmk: 0.8,
            prob_fresh_ckpt: 0.8,
            n_loops_pmt: 5,
            n_dmk_pmt: 20,
        }
    }
}

impl LoopConfig {
    /// Checks every recognized option against its allowed range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.families.is_empty() {
            return Err(invalid("families", "at least one family is required"));
        }
        if self.ndmk_refs == 0 {
            return Err(invalid("ndmk_refs", "must be positive"));
        }
        if self.ndmk_learners == 0 {
            return Err(invalid("ndmk_learners", "must be positive"));
        }
        if self.ndmk_tr == 0 {
            return Err(invalid("ndmk_tr", "must be positive"));
        }
        if self.ndmk_ts < 2 {
            return Err(invalid("ndmk_ts", "must fit at least one test pair"));
        }
        if self.game_size_tr == 0 {
            return Err(invalid("game_size_tr", "must be positive"));
        }
        if self.game_size_ts == 0 {
            return Err(invalid("game_size_ts", "must be positive"));
        }
        if self.factor_ts_tr == 0 {
            return Err(invalid("factor_ts_tr", "must be positive"));
        }
        if !(0.0..=1.0).contains(&self.min_sep) {
            return Err(invalid("min_sep", "must lie in [0, 1]"));
        }
        if !(0.0..=1.0).contains(&self.sep_pairs_factor) {
            return Err(invalid("sep_pairs_factor", "must lie in [0, 1]"));
        }
        if self.sep_n_stdev <= 0.0 {
            return Err(invalid("sep_n_stdev", "must be positive"));
        }
        if self.remove_key.threshold() == 0 {
            return Err(invalid("remove_key", "threshold must be positive"));
        }
        if !(0.0..=1.0).contains(&self.prob_fresh_dmk) {
            return Err(invalid("prob_fresh_dmk", "must lie in [0, 1]"));
        }
        if !(0.0..=1.0).contains(&self.prob_fresh_ckpt) {
            return Err(invalid("prob_fresh_ckpt", "must lie in [0, 1]"));
        }
        if self.n_loops_pmt == 0 {
            return Err(invalid("n_loops_pmt", "must be positive"));
        }
        if self.n_dmk_pmt == 0 {
            return Err(invalid("n_dmk_pmt", "must be positive"));
        }
        Ok(())
    }
}

/// Source of per-generation configuration snapshots.
///
/// `refresh` receives the snapshot the previous generation ran with and
/// returns the snapshot for the next one, so implementations can overlay
/// operator overrides without discarding values the driver adjusted
/// itself (the game-size controller in particular).
pub trait ConfigChannel: fmt::Debug {
    /// Produces the configuration snapshot for the next generation.
    fn refresh(&mut self, current: &LoopConfig) -> Result<LoopConfig, ConfigError>;

    /// Acknowledges a served exit request so the next run does not stop
    /// immediately. The default does nothing.
    fn clear_exit(&mut self) -> Result<(), ConfigError> {
        Ok(())
    }
}

/// Channel that keeps whatever configuration the driver currently holds.
#[derive(Debug, Clone, Copy, Default)]
pub struct StaticConfig;

impl ConfigChannel for StaticConfig {
    fn refresh(&mut self, current: &LoopConfig) -> Result<LoopConfig, ConfigError> {
        Ok(current.clone())
    }
}

/// Channel that overlays a JSON overrides file onto the current snapshot.
///
/// Only keys present in the file are replaced; a missing file keeps the
/// current snapshot unchanged. `clear_exit` removes a served `exit` key
/// from the file so the request is not replayed on the next start.
#[derive(Debug, Clone)]
pub struct FileConfigChannel {
    path: PathBuf,
}

impl FileConfigChannel {
    /// Creates a channel reading overrides from `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn read_overrides(&self) -> Result<Option<serde_json::Map<String, serde_json::Value>>, ConfigError> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(source) if source.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(ConfigError::Io {
                    path: self.path.clone(),
                    source,
                });
            }
        };
        let value: serde_json::Value =
            serde_json::from_str(&raw).map_err(|source| ConfigError::Json {
                path: self.path.clone(),
                source,
            })?;
        match value {
            serde_json::Value::Object(map) => Ok(Some(map)),
            _ => Err(ConfigError::NotAnObject {
                path: self.path.clone(),
            }),
        }
    }
}

impl ConfigChannel for FileConfigChannel {
    fn refresh(&mut self, current: &LoopConfig) -> Result<LoopConfig, ConfigError> {
        let Some(overrides) = self.read_overrides()? else {
            return Ok(current.clone());
        };
        let mut merged = match serde_json::to_value(current) {
            Ok(serde_json::Value::Object(map)) => map,
            Ok(_) | Err(_) => serde_json::Map::new(),
        };
        for (key, value) in overrides {
            merged.insert(key, value);
        }
        serde_json::from_value(serde_json::Value::Object(merged)).map_err(|source| {
            ConfigError::Json {
                path: self.path.clone(),
                source,
            }
        })
    }

    fn clear_exit(&mut self) -> Result<(), ConfigError> {
        let Some(mut overrides) = self.read_overrides()? else {
            return Ok(());
        };
        if overrides.remove("exit").is_some() {
            let text = serde_json::to_string_pretty(&serde_json::Value::Object(overrides))
                .map_err(|source| ConfigError::Json {
                    path: self.path.clone(),
                    source,
                })?;
            fs::write(&self.path, text).map_err(|source| ConfigError::Io {
                path: self.path.clone(),
                source,
            })?;
            tracing::debug!(path = %self.path.display(), "cleared served exit request");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn family(tag: char) -> Family {
        Family::new(tag).unwrap()
    }

    mod validation {
        use super::*;

        #[test]
        fn test_default_config_is_valid() {
            assert!(LoopConfig::default().validate().is_ok());
        }

        #[test]
        fn test_zero_learners_rejected() {
            let config = LoopConfig {
                ndmk_learners: 0,
                ..LoopConfig::default()
            };
            let err = config.validate().unwrap_err();
            assert!(matches!(
                err,
                ConfigError::Invalid {
                    option: "ndmk_learners",
                    ..
                }
            ));
        }

        #[test]
        fn test_out_of_range_min_sep_rejected() {
            let config = LoopConfig {
                min_sep: 1.5,
                ..LoopConfig::default()
            };
            assert!(matches!(
                config.validate(),
                Err(ConfigError::Invalid {
                    option: "min_sep",
                    ..
                })
            ));
        }

        #[test]
        fn test_zero_removal_threshold_rejected() {
            let config = LoopConfig {
                remove_key: RemoveKey(0, 3),
                ..LoopConfig::default()
            };
            assert!(matches!(
                config.validate(),
                Err(ConfigError::Invalid {
                    option: "remove_key",
                    ..
                })
            ));
        }

        #[test]
        fn test_group_size_below_pair_rejected() {
            let config = LoopConfig {
                ndmk_ts: 1,
                ..LoopConfig::default()
            };
            assert!(matches!(
                config.validate(),
                Err(ConfigError::Invalid {
                    option: "ndmk_ts",
                    ..
                })
            ));
        }
    }

    mod channels {
        use super::*;

        #[test]
        fn test_static_channel_returns_current() {
            let current = LoopConfig {
                game_size_ts: 123_456,
                ..LoopConfig::default()
            };
            let next = StaticConfig.refresh(&current).unwrap();
            assert_eq!(next, current);
        }

        #[test]
        fn test_missing_file_keeps_current() {
            let dir = tempfile::tempdir().unwrap();
            let mut channel = FileConfigChannel::new(dir.path().join("config.json"));
            let current = LoopConfig {
                ndmk_learners: 7,
                ..LoopConfig::default()
            };
            assert_eq!(channel.refresh(&current).unwrap(), current);
        }

        #[test]
        fn test_overlay_replaces_only_named_keys() {
            let dir = tempfile::tempdir().unwrap();
            let path = dir.path().join("config.json");
            fs::write(&path, r#"{"pause": true, "game_size_ts": 42000}"#).unwrap();
            let mut channel = FileConfigChannel::new(&path);
            let current = LoopConfig {
                ndmk_learners: 7,
                game_size_ts: 900_000,
                ..LoopConfig::default()
            };
            let next = channel.refresh(&current).unwrap();
            assert!(next.pause);
            assert_eq!(next.game_size_ts, 42_000);
            assert_eq!(next.ndmk_learners, 7);
        }

        #[test]
        fn test_families_overlay_parses_tags() {
            let dir = tempfile::tempdir().unwrap();
            let path = dir.path().join("config.json");
            fs::write(&path, r#"{"families": ["a", "b"]}"#).unwrap();
            let mut channel = FileConfigChannel::new(&path);
            let next = channel.refresh(&LoopConfig::default()).unwrap();
            assert_eq!(next.families, vec![family('a'), family('b')]);
        }

        #[test]
        fn test_malformed_file_rejected() {
            let dir = tempfile::tempdir().unwrap();
            let path = dir.path().join("config.json");
            fs::write(&path, "{not json").unwrap();
            let mut channel = FileConfigChannel::new(&path);
            assert!(matches!(
                channel.refresh(&LoopConfig::default()),
                Err(ConfigError::Json { .. })
            ));
        }

        #[test]
        fn test_unknown_option_rejected() {
            let dir = tempfile::tempdir().unwrap();
            let path = dir.path().join("config.json");
            fs::write(&path, r#"{"game_size_tzz": 1}"#).unwrap();
            let mut channel = FileConfigChannel::new(&path);
            assert!(matches!(
                channel.refresh(&LoopConfig::default()),
                Err(ConfigError::Json { .. })
            ));
        }

        #[test]
        fn test_non_object_file_rejected() {
            let dir = tempfile::tempdir().unwrap();
            let path = dir.path().join("config.json");
            fs::write(&path, "[1, 2]").unwrap();
            let mut channel = FileConfigChannel::new(&path);
            assert!(matches!(
                channel.refresh(&LoopConfig::default()),
                Err(ConfigError::NotAnObject { .. })
            ));
        }

        #[test]
        fn test_clear_exit_rewrites_file() {
            let dir = tempfile::tempdir().unwrap();
            let path = dir.path().join("config.json");
            fs::write(&path, r#"{"exit": true, "pause": true}"#).unwrap();
            let mut channel = FileConfigChannel::new(&path);
            assert!(channel.refresh(&LoopConfig::default()).unwrap().exit);

            channel.clear_exit().unwrap();
            let rewritten: serde_json::Value =
                serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
            assert!(rewritten.get("exit").is_none());
            assert_eq!(rewritten.get("pause"), Some(&serde_json::Value::Bool(true)));
        }
    }
}
