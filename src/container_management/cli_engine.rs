use std::io;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, error, info, warn};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::task::JoinHandle;

use super::engine::{BuildContext, ContainerEngine};
use super::types::{BuildOptions, ContainerSpec, ContainerState, ExecOutput, ImageFilter, Runtime};
use crate::error_handling::types::ContainerError;

/// How long a build whose stdin broke gets to report its own exit status.
const EARLY_EXIT_GRACE: Duration = Duration::from_secs(2);

/// [`ContainerEngine`] driving a docker-compatible CLI (`docker`, `podman`...).
///
/// Every operation is one invocation of the binary through
/// `tokio::process::Command`. Image builds stream the context into
/// `build ... -` on stdin and read the resulting id back from `--iidfile`,
/// so the archive never touches the disk.
///
/// Child output is forwarded line by line to the `debug` log; nothing else is
/// done with build logs.
#[derive(Debug, Clone)]
pub struct CliEngine {
    runtime: Runtime,
}

impl CliEngine {
    /// Creates a new `CliEngine`.
    ///
    /// Returns an error if the runtime binary cannot be executed.
    pub fn new(runtime: Runtime) -> Result<Self, ContainerError> {
        info!("Initializing container engine: {}", runtime);

        if !Self::is_runtime_available(&runtime) {
            error!("{} is not available on this system", runtime);
            return Err(ContainerError::RuntimeNotAvailable(
                runtime.binary().to_string(),
            ));
        }

        Ok(Self { runtime })
    }

    pub fn runtime(&self) -> &Runtime {
        &self.runtime
    }

    /// Checks whether the runtime binary answers `--version`.
    fn is_runtime_available(runtime: &Runtime) -> bool {
        let available = std::process::Command::new(runtime.binary())
            .arg("--version")
            .stdin(Stdio::null())
            .output()
            .map(|output| output.status.success())
            .unwrap_or(false);

        debug!("{} availability check: {}", runtime, available);
        available
    }

    fn command(&self, args: &[String]) -> Command {
        let mut cmd = Command::new(self.runtime.binary());
        cmd.args(args).stdin(Stdio::null()).kill_on_drop(true);
        cmd
    }

    fn describe(&self, args: &[String]) -> String {
        format!("{} {}", self.runtime.binary(), args.join(" "))
    }

    /// Runs the binary to completion and returns its stdout.
    async fn run(&self, args: Vec<String>) -> Result<String, ContainerError> {
        let command = self.describe(&args);
        debug!("Running {}", command);

        let output = self.command(&args).output().await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
            error!("{} exited with {}: {}", command, output.status, stderr.trim());
            return Err(ContainerError::CommandFailed { command, stderr });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    pub(crate) fn build_args(options: &BuildOptions, iidfile: &Path) -> Vec<String> {
        let dockerfile = if options.dockerfile.is_empty() {
            "Dockerfile"
        } else {
            options.dockerfile.as_str()
        };
        let mut args = vec!["build".to_string(), "--file".to_string(), dockerfile.to_string()];
        for tag in &options.tags {
            args.push("--tag".to_string());
            args.push(tag.clone());
        }
        for (key, value) in &options.build_args {
            args.push("--build-arg".to_string());
            args.push(format!("{}={}", key, value));
        }
        for (key, value) in &options.labels {
            args.push("--label".to_string());
            args.push(format!("{}={}", key, value));
        }
        args.push("--iidfile".to_string());
        args.push(iidfile.display().to_string());
        // context comes from stdin
        args.push("-".to_string());
        args
    }

    pub(crate) fn create_args(spec: &ContainerSpec) -> Vec<String> {
        let mut args = vec!["create".to_string()];
        if let Some(name) = &spec.name {
            args.push("--name".to_string());
            args.push(name.clone());
        }
        for (key, value) in &spec.env {
            args.push("--env".to_string());
            args.push(format!("{}={}", key, value));
        }
        for (key, value) in &spec.labels {
            args.push("--label".to_string());
            args.push(format!("{}={}", key, value));
        }
        if let Some(dir) = &spec.working_dir {
            args.push("--workdir".to_string());
            args.push(dir.clone());
        }
        args.extend(spec.extra_args.iter().cloned());
        args.push(spec.image.clone());
        args.extend(spec.cmd.iter().cloned());
        args
    }

    pub(crate) fn image_list_args(filter: &ImageFilter) -> Vec<String> {
        let mut args = vec![
            "images".to_string(),
            "--quiet".to_string(),
            "--no-trunc".to_string(),
        ];
        if let Some(reference) = &filter.reference {
            args.push("--filter".to_string());
            args.push(format!("reference={}", reference));
        }
        for label in &filter.labels {
            args.push("--filter".to_string());
            args.push(format!("label={}", label));
        }
        args
    }
}

/// Waits for both output forwarders and returns the stderr lines.
async fn collect_output(
    stderr_task: Option<JoinHandle<Vec<String>>>,
    stdout_task: Option<JoinHandle<Vec<String>>>,
) -> String {
    let stderr = match stderr_task {
        Some(task) => task.await.unwrap_or_default().join("\n"),
        None => String::new(),
    };
    if let Some(task) = stdout_task {
        let _ = task.await;
    }
    stderr
}

/// Forwards every line of a child stream to the debug log and returns them.
async fn drain_lines<R>(stream: R, label: String) -> Vec<String>
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(stream).lines();
    let mut lines = Vec::new();
    while let Ok(Some(line)) = reader.next_line().await {
        debug!("[{}] {}", label, line);
        lines.push(line);
    }
    lines
}

#[async_trait]
impl ContainerEngine for CliEngine {
    async fn build_image(
        &self,
        mut context: BuildContext,
        options: &BuildOptions,
    ) -> Result<String, ContainerError> {
        let workdir = tempfile::Builder::new()
            .prefix("fixture-build-")
            .tempdir()?;
        let iidfile = workdir.path().join("image-id");
        let args = Self::build_args(options, &iidfile);
        let command = self.describe(&args);

        info!("Building image from {}", options.context_dir.display());
        debug!("Running {}", command);

        let mut cmd = self.command(&args);
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        let mut child = cmd.spawn()?;

        let binary = self.runtime.binary().to_string();
        let stdout_task = child
            .stdout
            .take()
            .map(|out| tokio::spawn(drain_lines(out, format!("{}:build:stdout", binary))));
        let stderr_task = child
            .stderr
            .take()
            .map(|err| tokio::spawn(drain_lines(err, format!("{}:build:stderr", binary))));

        let mut stdin = child.stdin.take().ok_or_else(|| {
            ContainerError::IoError(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "build stdin is not available",
            ))
        })?;
        let streamed = tokio::io::copy(&mut context, &mut stdin).await;
        // Closing stdin marks the end of the context for the engine
        drop(stdin);
        drop(context);

        if let Err(e) = streamed {
            // A closed stdin usually means the engine gave up on its own
            let exited = match child.try_wait()? {
                Some(status) => Some(status),
                None if e.kind() == io::ErrorKind::BrokenPipe => {
                    tokio::time::timeout(EARLY_EXIT_GRACE, child.wait())
                        .await
                        .ok()
                        .transpose()?
                }
                None => None,
            };
            if let Some(status) = exited.filter(|status| !status.success()) {
                error!("{} exited with {} while receiving the context", command, status);
                let stderr = collect_output(stderr_task, stdout_task).await;
                return Err(ContainerError::CommandFailed { command, stderr });
            }

            warn!("Streaming the build context failed, stopping the build: {}", e);
            if let Err(kill_err) = child.kill().await {
                debug!("Build process already gone: {}", kill_err);
            }
            return Err(ContainerError::IoError(e));
        }

        let status = child.wait().await?;
        let stderr = collect_output(stderr_task, stdout_task).await;

        if !status.success() {
            error!("{} exited with {}", command, status);
            return Err(ContainerError::CommandFailed { command, stderr });
        }

        let id = tokio::fs::read_to_string(&iidfile).await?.trim().to_string();
        if id.is_empty() {
            return Err(ContainerError::ParseError(
                "engine reported an empty image id".to_string(),
            ));
        }
        info!("Built image {}", id);
        Ok(id)
    }

    async fn pull_image(
        &self,
        reference: &str,
        platform: Option<&str>,
    ) -> Result<(), ContainerError> {
        info!("Pulling image {}", reference);
        let mut args = vec!["pull".to_string()];
        if let Some(platform) = platform {
            args.push("--platform".to_string());
            args.push(platform.to_string());
        }
        args.push(reference.to_string());
        let output = self.run(args).await?;
        for line in output.lines() {
            debug!("[pull] {}", line);
        }
        Ok(())
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<String, ContainerError> {
        info!("Creating container from {}", spec.image);
        let id = self.run(Self::create_args(spec)).await?.trim().to_string();
        if id.is_empty() {
            return Err(ContainerError::ParseError(
                "engine reported an empty container id".to_string(),
            ));
        }
        debug!("Created container {}", id);
        Ok(id)
    }

    async fn start_container(&self, id: &str) -> Result<(), ContainerError> {
        info!("Starting container {}", id);
        self.run(vec!["start".to_string(), id.to_string()]).await?;
        Ok(())
    }

    async fn stop_container(&self, id: &str, timeout: Duration) -> Result<(), ContainerError> {
        info!("Stopping container {}", id);
        self.run(vec![
            "stop".to_string(),
            "-t".to_string(),
            timeout.as_secs().to_string(),
            id.to_string(),
        ])
        .await?;
        Ok(())
    }

    async fn remove_container(
        &self,
        id: &str,
        remove_volumes: bool,
    ) -> Result<(), ContainerError> {
        info!("Removing container {}", id);
        let mut args = vec!["rm".to_string()];
        if remove_volumes {
            args.push("--volumes".to_string());
        }
        args.push(id.to_string());
        self.run(args).await?;
        Ok(())
    }

    async fn inspect_container(&self, id: &str) -> Result<ContainerState, ContainerError> {
        let output = self
            .run(vec![
                "inspect".to_string(),
                "--type".to_string(),
                "container".to_string(),
                "--format".to_string(),
                "{{json .State}}".to_string(),
                id.to_string(),
            ])
            .await?;
        let line = output
            .lines()
            .find(|l| !l.trim().is_empty())
            .ok_or_else(|| ContainerError::NotFound(id.to_string()))?;
        serde_json::from_str(line).map_err(|e| ContainerError::ParseError(e.to_string()))
    }

    async fn exec(&self, id: &str, cmd: &[String]) -> Result<ExecOutput, ContainerError> {
        let mut args = vec!["exec".to_string(), id.to_string()];
        args.extend(cmd.iter().cloned());
        debug!("Running {}", self.describe(&args));

        let output = self.command(&args).output().await?;
        let exec = ExecOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };
        debug!("exec in {} exited with {}", id, exec.exit_code);
        Ok(exec)
    }

    async fn list_images(&self, filter: &ImageFilter) -> Result<Vec<String>, ContainerError> {
        let output = self.run(Self::image_list_args(filter)).await?;
        let mut ids: Vec<String> = Vec::new();
        for id in output.lines().map(str::trim).filter(|l| !l.is_empty()) {
            if !ids.iter().any(|known| known == id) {
                ids.push(id.to_string());
            }
        }
        debug!("{} images match {:?}", ids.len(), filter);
        Ok(ids)
    }

    async fn remove_image(&self, id: &str) -> Result<(), ContainerError> {
        info!("Removing image {}", id);
        // an id carrying several tags is refused without --force
        self.run(vec!["rmi".to_string(), "--force".to_string(), id.to_string()])
            .await?;
        Ok(())
    }
}
