use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::collector::Collectors;

pub(crate) fn default_true() -> bool {
    true
}

const fn default_interval() -> Duration {
    Duration::from_secs(15)
}

fn default_proc_path() -> String {
    "/proc".to_string()
}

fn default_sys_path() -> String {
    "/sys".to_string()
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("read config failed, {0}")]
    Io(#[from] std::io::Error),

    #[error("parse config failed, {0}")]
    Parse(#[from] serde_yaml::Error),
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// How often counters are gathered and written out.
    #[serde(default = "default_interval", with = "humanize::duration::serde")]
    pub interval: Duration,

    /// Mount point of the proc filesystem.
    #[serde(default = "default_proc_path")]
    pub proc_path: String,

    /// Mount point of the sys filesystem.
    #[serde(default = "default_sys_path")]
    pub sys_path: String,

    #[serde(default)]
    pub collectors: Collectors,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            interval: default_interval(),
            proc_path: default_proc_path(),
            sys_path: default_sys_path(),
            collectors: Collectors::default(),
        }
    }
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, LoadError> {
        let content = std::fs::read_to_string(path)?;
        let config = serde_yaml::from_str(&content)?;
        Ok(config)
    }
}
