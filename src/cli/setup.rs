use crate::cli::load;
use crate::cli::run::{build_backend, RunError};
use crate::exec::{Backend, FilterSpec};
use std::path::Path;
use tracing::info;

/// Provision every configured remote host for searching.
pub async fn run(config_path: Option<&Path>) -> Result<(), RunError> {
    let config = load(config_path)?;
    // Only the filter's name matters for provisioning.
    let filter = FilterSpec {
        command: config.filter.command.clone(),
        format: String::new(),
        index_dir: None,
    };

    let backend = build_backend(&config, filter, true, None)?;
    backend.setup().await?;

    info!(backend = backend.name(), "Setup complete");
    Ok(())
}
