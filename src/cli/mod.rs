pub mod cat;
pub mod run;
pub mod setup;

use crate::config::{default_config_paths, load_config, resolve_config_path, Config, ConfigError, LogTypeConfig};
use crate::exec::FilterSpec;
use std::path::Path;
use tracing::info;

/// Find and load the config file, `explicit` first.
pub fn load(explicit: Option<&Path>) -> Result<Config, ConfigError> {
    let path = resolve_config_path(explicit).ok_or_else(|| ConfigError::NotFound {
        searched: default_config_paths(),
    })?;
    info!(config_path = %path.display(), "Loading configuration");
    load_config(&path)
}

/// The log type to search: `name` if given, else the configured default.
pub fn select_type<'a>(
    config: &'a Config,
    name: Option<&str>,
) -> Result<(&'a str, &'a LogTypeConfig), ConfigError> {
    config.log_type(name).ok_or_else(|| {
        let available = config
            .available_types()
            .into_iter()
            .map(String::from)
            .collect();
        match name {
            Some(name) => ConfigError::UnknownType {
                name: name.to_string(),
                available,
            },
            None => ConfigError::NoDefaultType { available },
        }
    })
}

/// How the filter is invoked for one log type.
pub fn filter_spec(config: &Config, type_name: &str, log_type: &LogTypeConfig) -> FilterSpec {
    FilterSpec {
        command: config.filter.command.clone(),
        format: log_type
            .format
            .clone()
            .unwrap_or_else(|| type_name.to_string()),
        index_dir: log_type.index_dir.clone(),
    }
}
