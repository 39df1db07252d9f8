use super::{
    filter_argv, shell_pipeline, source_argv, spawn_stage, take_stdout, Backend, ExecError,
    FilterSpec, Pipeline, SeekReader,
};
use crate::locate::glob::expand_all;
use crate::locate::{Candidate, LogFileRef};
use crate::merge::PipelineId;
use crate::query::Query;
use async_trait::async_trait;
use std::process::Stdio;
use tracing::{debug, info};

/// Runs every pipeline as child processes on this machine.
pub struct LocalBackend {
    filter: FilterSpec,
    seek_reader: Option<SeekReader>,
}

impl LocalBackend {
    pub fn new(filter: FilterSpec, seek_reader: Option<SeekReader>) -> Self {
        Self {
            filter,
            seek_reader,
        }
    }
}

#[async_trait]
impl Backend for LocalBackend {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn discover(&self, globs: &[String]) -> Result<Vec<Candidate>, ExecError> {
        let paths = expand_all(globs);
        debug!(globs = ?globs, count = paths.len(), "Expanded local globs");
        Ok(paths.into_iter().map(Candidate::from_local_path).collect())
    }

    async fn launch(
        &self,
        id: PipelineId,
        file: &LogFileRef,
        query: &Query,
    ) -> Result<Pipeline, ExecError> {
        let source = source_argv(
            file,
            query,
            self.seek_reader.as_ref(),
            self.filter.index_dir.as_deref(),
        );
        let filter = filter_argv(&self.filter.command, &self.filter.format, query);
        let command = shell_pipeline(&[source.clone(), filter.clone()]);
        debug!(pipeline = id, command = %command, "Launching local pipeline");

        let mut source_child = spawn_stage(&source, Stdio::null())?;
        let source_out: Stdio = take_stdout(&mut source_child, &source)?.try_into()?;

        // On failure `source_child` is dropped here and killed with it.
        let mut filter_child = spawn_stage(&filter, source_out)?;
        let stdout = take_stdout(&mut filter_child, &filter)?;

        Ok(Pipeline {
            id,
            label: file.path.display().to_string(),
            prefix: String::new(),
            stdout,
            children: vec![source_child, filter_child],
            command,
        })
    }

    async fn setup(&self) -> Result<(), ExecError> {
        info!("Local search needs no setup");
        Ok(())
    }

    fn failure_hint(&self) -> &'static str {
        "trouble running search, perhaps the filter needs to be built (is it on PATH?)"
    }
}
