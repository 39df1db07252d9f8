use super::{
    filter_argv, shell_pipeline, source_argv, spawn_stage, take_stdout, Backend, ExecError,
    FilterSpec, Pipeline,
};
use crate::config::RemoteConfig;
use crate::locate::{Candidate, LogFileRef};
use crate::merge::PipelineId;
use crate::query::Query;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use tokio::process::Command;
use tracing::{debug, info};

/// Runs each pipeline on the host holding the file, over `ssh`.
///
/// Remote hosts keep the filter and its parser assets in `dir`, relative to
/// the remote user's home directory.
pub struct RemoteBackend {
    hosts: Vec<String>,
    dir: String,
    sources: Vec<PathBuf>,
    build: String,
    assets: Vec<PathBuf>,
    filter: FilterSpec,
    ssh: String,
    scp: String,
}

impl RemoteBackend {
    pub fn new(remote: &RemoteConfig, filter: FilterSpec, assets: Vec<PathBuf>) -> Self {
        Self {
            hosts: remote.hosts.clone(),
            dir: remote.dir.trim_end_matches('/').to_string(),
            sources: remote.sources.clone(),
            build: remote.build.clone(),
            assets,
            filter,
            ssh: "ssh".to_string(),
            scp: "scp".to_string(),
        }
    }

    /// Use other programs in place of `ssh` and `scp`. They are invoked with
    /// the same arguments.
    pub fn with_transport(mut self, ssh: impl Into<String>, scp: impl Into<String>) -> Self {
        self.ssh = ssh.into();
        self.scp = scp.into();
        self
    }

    fn ssh(&self, host: &str, command: &str) -> Vec<String> {
        vec![self.ssh.clone(), host.to_string(), command.to_string()]
    }

    fn scp(&self, files: &[PathBuf], host: &str) -> Vec<String> {
        let mut argv = vec![self.scp.clone(), "-r".to_string()];
        argv.extend(files.iter().map(|f| f.display().to_string()));
        argv.push(format!("{}:{}/", host, self.dir));
        argv
    }

    /// Where the filter lives on the remote hosts.
    fn remote_filter(&self) -> String {
        let name = Path::new(&self.filter.command)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.filter.command.clone());
        format!("{}/{}", self.dir, name)
    }

    /// The shell pipeline run on the file's host.
    fn remote_command(&self, file: &LogFileRef, query: &Query) -> String {
        let source = source_argv(file, query, None, None);
        let filter = filter_argv(&self.remote_filter(), &self.filter.format, query);
        shell_pipeline(&[source, filter])
    }

    fn installed_check(&self) -> String {
        format!("[ -f {} ]", shell_words::quote(&self.remote_filter()))
    }

    async fn is_installed(&self, host: &str) -> Result<bool, ExecError> {
        Ok(run(self.ssh(host, &self.installed_check())).await?.status.success())
    }

    async fn setup_host(&self, host: &str) -> Result<(), ExecError> {
        let dir = shell_words::quote(&self.dir).into_owned();
        let step = |step: &str| ExecError::Setup {
            host: host.to_string(),
            step: step.to_string(),
        };

        if self.is_installed(host).await? {
            debug!(host, "Filter already built");
        } else {
            info!(host, "Building filter on remote host");

            if !succeeded(self.ssh(host, &format!("mkdir -p {}", dir))).await? {
                return Err(step("couldn't make remote dir"));
            }
            if !self.sources.is_empty() && !succeeded(self.scp(&self.sources, host)).await? {
                return Err(step("couldn't copy source files"));
            }
            if !succeeded(self.ssh(host, &format!("cd {} && {}", dir, self.build))).await? {
                return Err(step("couldn't build source"));
            }
        }

        if !self.assets.is_empty() && !succeeded(self.scp(&self.assets, host)).await? {
            return Err(step("couldn't copy parser assets"));
        }

        Ok(())
    }
}

#[async_trait]
impl Backend for RemoteBackend {
    fn name(&self) -> &'static str {
        "remote"
    }

    async fn discover(&self, globs: &[String]) -> Result<Vec<Candidate>, ExecError> {
        let mut candidates = Vec::new();

        for host in &self.hosts {
            for glob in globs {
                // Left unquoted so the remote shell expands it.
                let output = run(self.ssh(host, &format!("ls -1 {}", glob))).await?;
                if !output.status.success() {
                    debug!(host = %host, glob = %glob, "No remote files matched");
                    continue;
                }
                candidates.extend(parse_listing(host, &String::from_utf8_lossy(&output.stdout)));
            }
        }

        Ok(candidates)
    }

    async fn launch(
        &self,
        id: PipelineId,
        file: &LogFileRef,
        query: &Query,
    ) -> Result<Pipeline, ExecError> {
        let command = self.remote_command(file, query);
        let argv = self.ssh(&file.host, &command);
        debug!(pipeline = id, host = %file.host, command = %command, "Launching remote pipeline");

        let mut child = spawn_stage(&argv, Stdio::null())?;
        let stdout = take_stdout(&mut child, &argv)?;

        Ok(Pipeline {
            id,
            label: format!("{}:{}", file.host, file.path.display()),
            prefix: format!("{}:", file.host),
            stdout,
            children: vec![child],
            command,
        })
    }

    async fn setup(&self) -> Result<(), ExecError> {
        for host in &self.hosts {
            info!(host = %host, "Checking remote host");
            self.setup_host(host).await?;
        }
        Ok(())
    }

    async fn verify(&self) -> Result<(), ExecError> {
        for host in &self.hosts {
            if !self.is_installed(host).await? {
                return Err(ExecError::SetupRequired { host: host.clone() });
            }
        }
        Ok(())
    }

    fn failure_hint(&self) -> &'static str {
        "trouble running search, perhaps remote setup is needed (`timegrep setup`)"
    }
}

async fn run(argv: Vec<String>) -> Result<Output, ExecError> {
    let command = shell_words::join(&argv);
    debug!(command = %command, "Running");

    Command::new(&argv[0])
        .args(&argv[1..])
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit())
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|source| ExecError::Spawn { command, source })
}

async fn succeeded(argv: Vec<String>) -> Result<bool, ExecError> {
    Ok(run(argv).await?.status.success())
}

/// Candidates from `ls -1` output on `host`.
fn parse_listing(host: &str, listing: &str) -> Vec<Candidate> {
    listing
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| Candidate {
            host: host.to_string(),
            path: PathBuf::from(line),
        })
        .collect()
}
