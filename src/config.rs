use serde::Deserialize;
use std::path::PathBuf;

#[derive(Deserialize, Debug, Default, Clone)]
pub struct Config {
    #[serde(default)]
    pub daemon: DaemonConfig,
}

#[derive(Deserialize, Debug, Clone)]
pub struct DaemonConfig {
    /// Maximum concurrent jobs (CPU and GPU combined).
    #[serde(default = "default_max_parallel")]
    pub max_parallel: usize,
    /// GPU-slot sub-capacity that GPU-requiring jobs compete for.
    #[serde(default = "default_gpu_slots")]
    pub gpu_slots: u32,
    #[serde(default = "default_heartbeat_interval_secs")]
    pub heartbeat_interval_secs: u64,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Worker program spawned as `<runner> run --run-dir <dir> --workspace <ws>`.
    /// Defaults to `runforge-runner` on PATH.
    #[serde(default)]
    pub runner: Option<PathBuf>,
}

fn default_max_parallel() -> usize {
    2
}

fn default_gpu_slots() -> u32 {
    1
}

fn default_heartbeat_interval_secs() -> u64 {
    5
}

fn default_poll_interval_ms() -> u64 {
    1000
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            max_parallel: default_max_parallel(),
            gpu_slots: default_gpu_slots(),
            heartbeat_interval_secs: default_heartbeat_interval_secs(),
            poll_interval_ms: default_poll_interval_ms(),
            runner: None,
        }
    }
}

pub fn get_config_dir() -> anyhow::Result<PathBuf> {
    dirs::config_dir()
        .ok_or_else(|| anyhow::anyhow!("Failed to get config directory"))
        .map(|p| p.join("runforge"))
}

pub fn load_config(config_path: Option<&PathBuf>) -> Result<Config, config::ConfigError> {
    let mut config_vec = vec![];

    // User-provided config file
    if let Some(config_path) = config_path {
        if config_path.exists() {
            config_vec.push(config_path.clone());
        } else {
            eprintln!("Warning: Config file {config_path:?} not found.");
        }
    }

    // Default config file
    if let Ok(default_config_path) = get_config_dir().map(|d| d.join("config.toml")) {
        if default_config_path.exists() {
            config_vec.push(default_config_path);
        }
    }

    let settings = config::Config::builder();
    let settings = config_vec.iter().fold(settings, |s, path| {
        s.add_source(config::File::from(path.as_path()))
    });

    settings
        .add_source(
            config::Environment::with_prefix("RUNFORGE")
                .separator("_")
                .try_parsing(true),
        )
        .build()?
        .try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_daemon_contract() {
        let config = Config::default();
        assert_eq!(config.daemon.max_parallel, 2);
        assert_eq!(config.daemon.gpu_slots, 1);
        assert_eq!(config.daemon.heartbeat_interval_secs, 5);
        assert_eq!(config.daemon.poll_interval_ms, 1000);
        assert!(config.daemon.runner.is_none());
    }

    #[test]
    fn partial_config_files_keep_defaults() {
        let config: Config =
            serde_json::from_str(r#"{"daemon": {"max_parallel": 4}}"#).unwrap();
        assert_eq!(config.daemon.max_parallel, 4);
        assert_eq!(config.daemon.gpu_slots, 1);
    }
}
