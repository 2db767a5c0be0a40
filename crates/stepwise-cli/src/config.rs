//! CLI configuration
//!
//! A TOML file whose `[engine]` table maps onto `EngineOptions`; missing
//! keys keep their defaults.

use anyhow::Context;
use serde::Deserialize;
use std::path::Path;
use stepwise_engine::EngineOptions;

/// Parsed configuration file
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Engine options
    pub engine: EngineOptions,
}

impl Config {
    /// Engine options with command-line overrides applied
    pub fn engine_options(&self, unoptimized: bool, step_limit: Option<u64>) -> EngineOptions {
        let mut options = self.engine.clone();
        if unoptimized {
            options = EngineOptions {
                cache_lowering: options.cache_lowering,
                step_limit: options.step_limit,
                worker_threads: options.worker_threads,
                ..EngineOptions::unoptimized()
            };
        }
        if let Some(limit) = step_limit {
            options.step_limit = Some(limit);
        }
        options
    }
}

/// Load the configuration at `path`, or the defaults when none is given
pub fn load(path: Option<&Path>) -> anyhow::Result<Config> {
    let Some(path) = path else {
        return Ok(Config::default());
    };
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config {}", path.display()))?;
    let config: Config =
        toml::from_str(&text).with_context(|| format!("invalid config {}", path.display()))?;
    tracing::debug!(target: "stepwise::cli", path = %path.display(), ?config.engine, "loaded config");
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_engine_table() {
        let config: Config = toml::from_str("[engine]\nstep_limit = 50\n").unwrap();
        assert_eq!(config.engine.step_limit, Some(50));
        assert!(config.engine.optimize);
    }

    #[test]
    fn test_empty_file_is_default() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.engine, EngineOptions::default());
    }

    #[test]
    fn test_overrides() {
        let config: Config = toml::from_str("[engine]\nworker_threads = 3\n").unwrap();
        let options = config.engine_options(true, Some(10));
        assert!(!options.optimize);
        assert_eq!(options.worker_threads, 3);
        assert_eq!(options.step_limit, Some(10));
    }

    #[test]
    fn test_unknown_table_rejected() {
        assert!(toml::from_str::<Config>("[server]\nport = 1\n").is_err());
    }
}
