pub mod parse;
pub mod types;

use regex::Regex;
use std::path::{Path, PathBuf};

pub use parse::{load_config, ConfigError};
pub use types::{Config, FilterConfig, GlobList, LogTypeConfig, RemoteConfig, SearchConfig};

/// Expands environment variables in a string.
/// Supports $env{VAR_NAME} syntax.
/// If an environment variable is not set, it's left unchanged.
pub fn expand_env_vars(text: &str) -> String {
    let re = Regex::new(r"\$env\{([A-Za-z_][A-Za-z0-9_]*)\}").unwrap();

    re.replace_all(text, |caps: &regex::Captures| {
        let var_name = caps.get(1).unwrap().as_str();
        std::env::var(var_name).unwrap_or_else(|_| caps.get(0).unwrap().as_str().to_string())
    })
    .to_string()
}

/// Expands a leading `~` to the user's home directory.
pub fn expand_tilde(path: &Path) -> PathBuf {
    let path_str = path.to_string_lossy();

    if let Some(rest) = path_str.strip_prefix("~/") {
        if let Some(home_dir) = dirs::home_dir() {
            return home_dir.join(rest);
        }
    } else if path_str == "~" {
        if let Some(home_dir) = dirs::home_dir() {
            return home_dir;
        }
    }

    path.to_path_buf()
}

/// Same as [`expand_tilde`] for glob strings, which are not paths yet.
pub fn expand_tilde_str(pattern: &str) -> String {
    if pattern == "~" || pattern.starts_with("~/") {
        expand_tilde(Path::new(pattern)).to_string_lossy().into_owned()
    } else {
        pattern.to_string()
    }
}

/// Locations searched for a config file when none is given explicitly,
/// in lookup order.
pub fn default_config_paths() -> Vec<PathBuf> {
    let mut paths = vec![PathBuf::from(".timegrep.yml")];
    if let Some(home_dir) = dirs::home_dir() {
        paths.push(home_dir.join(".timegrep.yml"));
    }
    paths.push(PathBuf::from("/etc/timegrep.yml"));
    paths
}

/// Resolves the config file path based on explicit argument or default locations.
/// An explicit path is returned as-is (after tilde expansion) even if it does
/// not exist, so that loading reports it by name.
pub fn resolve_config_path(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(expand_tilde(path));
    }

    default_config_paths().into_iter().find(|path| path.exists())
}
