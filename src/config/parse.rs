use super::types::*;
use crate::config::{expand_env_vars, expand_tilde, expand_tilde_str};
use regex::Regex;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse YAML: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("Please configure timegrep.yml ({})", display_paths(.searched))]
    NotFound { searched: Vec<PathBuf> },

    #[error("no log type named '{name}' (available: {})", .available.join(", "))]
    UnknownType { name: String, available: Vec<String> },

    #[error("no --type given and no 'default_type' configured (available: {})", .available.join(", "))]
    NoDefaultType { available: Vec<String> },

    #[error("remote search requested but the config has no 'remote' section")]
    NoRemote,

    #[error("validation failed:\n{}", .0.join("\n"))]
    ValidationList(Vec<String>),

    #[error("validation failed: {0}")]
    Validation(String),
}

fn display_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    let yaml_string = std::fs::read_to_string(path).map_err(|e| {
        ConfigError::Io(std::io::Error::new(
            e.kind(),
            format!("failed to read config file '{}': {}", path.display(), e),
        ))
    })?;

    parse_config(&yaml_string).map_err(|e| match e {
        ConfigError::YamlParse(e) => ConfigError::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("in file '{}': {}", path.display(), e),
        )),
        other => other,
    })
}

/// Parse and validate a config from YAML text.
pub fn parse_config(yaml: &str) -> Result<Config, ConfigError> {
    let yaml_string = expand_env_vars(yaml);
    check_unexpanded_vars(&yaml_string)?;

    let mut config: Config = serde_yaml::from_str(&yaml_string)?;
    expand_paths(&mut config);
    validate_config(&config)?;

    Ok(config)
}

fn check_unexpanded_vars(yaml_string: &str) -> Result<(), ConfigError> {
    let re = Regex::new(r"\$env\{([A-Za-z_][A-Za-z0-9_]*)\}").unwrap();
    let mut unexpanded_vars: Vec<String> = re
        .captures_iter(yaml_string)
        .map(|cap| cap.get(1).unwrap().as_str().to_string())
        .collect();

    if unexpanded_vars.is_empty() {
        return Ok(());
    }

    unexpanded_vars.sort();
    unexpanded_vars.dedup();

    Err(ConfigError::Validation(format!(
        "environment variables are not set: {}",
        unexpanded_vars.join(", ")
    )))
}

fn expand_paths(config: &mut Config) {
    for log_type in config.types.values_mut() {
        log_type.glob = match &log_type.glob {
            GlobList::One(glob) => GlobList::One(expand_tilde_str(glob)),
            GlobList::Many(globs) => {
                GlobList::Many(globs.iter().map(|g| expand_tilde_str(g)).collect())
            }
        };
        if let Some(dir) = &log_type.index_dir {
            log_type.index_dir = Some(expand_tilde(dir));
        }
    }

    config.filter.assets = config.filter.assets.iter().map(|p| expand_tilde(p)).collect();

    if let Some(remote) = config.remote.as_mut() {
        remote.sources = remote.sources.iter().map(|p| expand_tilde(p)).collect();
    }
}

fn validate_config(config: &Config) -> Result<(), ConfigError> {
    let mut errors = Vec::new();

    if config.types.is_empty() {
        errors.push("'types' must configure at least one log type".to_string());
    }

    for (name, log_type) in &config.types {
        let globs = log_type.glob.to_vec();
        if globs.is_empty() {
            errors.push(format!("type '{}': glob list cannot be empty", name));
        }
        if globs.iter().any(|g| g.trim().is_empty()) {
            errors.push(format!("type '{}': glob cannot be empty", name));
        }
    }

    if let Some(default) = &config.default_type {
        if !config.types.contains_key(default) {
            errors.push(format!(
                "default_type '{}' is not one of the configured types",
                default
            ));
        }
    }

    if config.filter.command.trim().is_empty() {
        errors.push("filter.command cannot be empty".to_string());
    }

    if let Some(remote) = &config.remote {
        if remote.hosts.is_empty() {
            errors.push("remote.hosts must contain at least one host".to_string());
        }
        if remote.hosts.iter().any(|h| h.trim().is_empty()) {
            errors.push("remote.hosts: host name cannot be empty".to_string());
        }
    }

    if config.search.flush_interval.is_zero() {
        errors.push("search.flush_interval must be greater than zero".to_string());
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(ConfigError::ValidationList(errors))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_minimal_config() {
        let config = parse_config(
            r#"
types:
  app:
    glob: "logs/*/*.log-*"
"#,
        )
        .unwrap();

        assert_eq!(config.filter.command, "ug_guts");
        assert_eq!(config.search.flush_interval, Duration::from_secs(2));
        let (name, app) = config.log_type(None).unwrap();
        assert_eq!(name, "app");
        assert_eq!(app.glob.to_vec(), vec!["logs/*/*.log-*".to_string()]);
    }

    #[test]
    fn test_glob_list_and_default_type() {
        let config = parse_config(
            r#"
default_type: work
types:
  app:
    glob: "foo/*/*"
  work:
    glob: ["work/*/*", "jobs/*/*"]
    format: json
search:
  flush_interval: 500ms
"#,
        )
        .unwrap();

        let (name, work) = config.log_type(None).unwrap();
        assert_eq!(name, "work");
        assert_eq!(work.glob.to_vec().len(), 2);
        assert_eq!(work.format.as_deref(), Some("json"));
        assert!(config.log_type(Some("app")).is_some());
        assert!(config.log_type(Some("missing")).is_none());
        assert_eq!(config.search.flush_interval, Duration::from_millis(500));
    }

    #[test]
    fn test_ambiguous_type_without_default() {
        let config = parse_config(
            r#"
types:
  app:
    glob: "a/*"
  work:
    glob: "b/*"
"#,
        )
        .unwrap();

        assert!(config.log_type(None).is_none());
    }

    #[test]
    fn test_validation_errors_are_collected() {
        let err = parse_config(
            r#"
default_type: nope
types:
  app:
    glob: []
remote:
  hosts: []
"#,
        )
        .unwrap_err();

        match err {
            ConfigError::ValidationList(errors) => {
                assert_eq!(errors.len(), 3);
                assert!(errors.iter().any(|e| e.contains("glob list cannot be empty")));
                assert!(errors.iter().any(|e| e.contains("default_type 'nope'")));
                assert!(errors.iter().any(|e| e.contains("remote.hosts")));
            }
            other => panic!("expected ValidationList, got {:?}", other),
        }
    }

    #[test]
    fn test_unset_env_var_is_rejected() {
        let err = parse_config(
            r#"
types:
  app:
    glob: "$env{TIMEGREP_SURELY_UNSET}/*/*"
"#,
        )
        .unwrap_err();

        assert!(matches!(err, ConfigError::Validation(msg) if msg.contains("TIMEGREP_SURELY_UNSET")));
    }

    #[test]
    fn test_remote_defaults() {
        let config = parse_config(
            r#"
types:
  app:
    glob: "/logs/*"
remote:
  hosts: [app1, app2]
"#,
        )
        .unwrap();

        let remote = config.remote.unwrap();
        assert_eq!(remote.dir, ".timegrep_remote");
        assert_eq!(remote.build, "make");
        assert_eq!(remote.hosts, vec!["app1".to_string(), "app2".to_string()]);
    }

    #[test]
    fn test_not_found_message_lists_locations() {
        let err = ConfigError::NotFound {
            searched: vec![PathBuf::from(".timegrep.yml"), PathBuf::from("/etc/timegrep.yml")],
        };
        assert_eq!(
            err.to_string(),
            "Please configure timegrep.yml (.timegrep.yml, /etc/timegrep.yml)"
        );
    }
}
