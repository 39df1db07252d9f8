use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub default_type: Option<String>,
    pub types: BTreeMap<String, LogTypeConfig>,
    #[serde(default)]
    pub filter: FilterConfig,
    pub remote: Option<RemoteConfig>,
    #[serde(default)]
    pub search: SearchConfig,
}

impl Config {
    /// Look up a log type, falling back to `default_type` (or the only
    /// configured type) when no name is given.
    pub fn log_type(&self, name: Option<&str>) -> Option<(&str, &LogTypeConfig)> {
        let name = match name {
            Some(name) => name,
            None => match &self.default_type {
                Some(default) => default.as_str(),
                None if self.types.len() == 1 => self.types.keys().next()?.as_str(),
                None => return None,
            },
        };
        self.types.get_key_value(name).map(|(k, v)| (k.as_str(), v))
    }

    pub fn available_types(&self) -> Vec<&str> {
        self.types.keys().map(String::as_str).collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogTypeConfig {
    pub glob: GlobList,
    /// Identifier handed to the native filter. Defaults to the type name.
    pub format: Option<String>,
    pub index_dir: Option<PathBuf>,
}

/// One glob or a list of globs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum GlobList {
    One(String),
    Many(Vec<String>),
}

impl GlobList {
    pub fn to_vec(&self) -> Vec<String> {
        match self {
            GlobList::One(glob) => vec![glob.clone()],
            GlobList::Many(globs) => globs.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterConfig {
    #[serde(default = "default_filter_command")]
    pub command: String,
    #[serde(default)]
    pub assets: Vec<PathBuf>,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            command: default_filter_command(),
            assets: Vec::new(),
        }
    }
}

fn default_filter_command() -> String {
    "ug_guts".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
    pub hosts: Vec<String>,
    #[serde(default = "default_remote_dir")]
    pub dir: String,
    #[serde(default)]
    pub sources: Vec<PathBuf>,
    #[serde(default = "default_build_command")]
    pub build: String,
}

fn default_remote_dir() -> String {
    ".timegrep_remote".to_string()
}

fn default_build_command() -> String {
    "make".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    #[serde(with = "humantime_serde", default = "default_flush_interval")]
    pub flush_interval: Duration,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            flush_interval: default_flush_interval(),
        }
    }
}

fn default_flush_interval() -> Duration {
    Duration::from_secs(2)
}
