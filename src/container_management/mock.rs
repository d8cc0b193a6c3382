//! In-memory engine that records every call, for tests.
//!
//! Builds really drain the context and decode it, so fixture tests exercise
//! the archive stream end to end.

use std::collections::{HashMap, HashSet};
use std::io::Read;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use log::debug;
use tokio::io::AsyncReadExt;

use super::engine::{BuildContext, ContainerEngine};
use super::types::{BuildOptions, ContainerSpec, ContainerState, ExecOutput, ImageFilter};
use crate::error_handling::types::ContainerError;

#[derive(Default)]
pub struct RecordingEngine {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    operations: Vec<String>,
    failing: HashSet<&'static str>,
    built_entries: Vec<(String, Vec<u8>)>,
    running: HashMap<String, bool>,
    pulled: Vec<String>,
    exec_exit_code: i32,
    next_id: usize,
}

impl RecordingEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every later call of `operation` (e.g. `"start"`) fail.
    pub fn fail_on(&self, operation: &'static str) {
        self.inner.lock().unwrap().failing.insert(operation);
    }

    pub fn set_exec_exit_code(&self, code: i32) {
        self.inner.lock().unwrap().exec_exit_code = code;
    }

    /// Recorded calls, in order, as `"<operation>:<detail>"`.
    pub fn operations(&self) -> Vec<String> {
        self.inner.lock().unwrap().operations.clone()
    }

    /// Only the operation names, in order.
    pub fn operation_names(&self) -> Vec<String> {
        self.operations()
            .into_iter()
            .map(|op| op.split(':').next().unwrap_or_default().to_string())
            .collect()
    }

    /// (entry name, content) of every file in the last build context.
    pub fn built_entries(&self) -> Vec<(String, Vec<u8>)> {
        self.inner.lock().unwrap().built_entries.clone()
    }

    fn record(&self, operation: &'static str, detail: &str) -> Result<(), ContainerError> {
        let mut inner = self.inner.lock().unwrap();
        inner.operations.push(format!("{}:{}", operation, detail));
        debug!("recorded {}:{}", operation, detail);
        if inner.failing.contains(operation) {
            return Err(ContainerError::CommandFailed {
                command: format!("mock {} {}", operation, detail),
                stderr: format!("{} refused by test", operation),
            });
        }
        Ok(())
    }

    fn next_id(&self, prefix: &str) -> String {
        let mut inner = self.inner.lock().unwrap();
        inner.next_id += 1;
        format!("{}-{}", prefix, inner.next_id)
    }
}

#[async_trait]
impl ContainerEngine for RecordingEngine {
    async fn build_image(
        &self,
        mut context: BuildContext,
        options: &BuildOptions,
    ) -> Result<String, ContainerError> {
        let mut archive = Vec::new();
        context.read_to_end(&mut archive).await?;

        let mut entries = Vec::new();
        let mut decoded = tar::Archive::new(&archive[..]);
        for entry in decoded.entries()? {
            let mut entry = entry?;
            let name = entry.path()?.to_string_lossy().into_owned();
            let mut content = Vec::new();
            entry.read_to_end(&mut content)?;
            entries.push((name, content));
        }
        self.inner.lock().unwrap().built_entries = entries;

        self.record("build", &options.tags.join(","))?;
        Ok(self.next_id("sha256:built"))
    }

    async fn pull_image(
        &self,
        reference: &str,
        _platform: Option<&str>,
    ) -> Result<(), ContainerError> {
        self.record("pull", reference)?;
        self.inner.lock().unwrap().pulled.push(reference.to_string());
        Ok(())
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<String, ContainerError> {
        self.record("create", &spec.image)?;
        let id = self.next_id("container");
        self.inner.lock().unwrap().running.insert(id.clone(), false);
        Ok(id)
    }

    async fn start_container(&self, id: &str) -> Result<(), ContainerError> {
        self.record("start", id)?;
        self.inner
            .lock()
            .unwrap()
            .running
            .insert(id.to_string(), true);
        Ok(())
    }

    async fn stop_container(&self, id: &str, _timeout: Duration) -> Result<(), ContainerError> {
        self.record("stop", id)?;
        self.inner
            .lock()
            .unwrap()
            .running
            .insert(id.to_string(), false);
        Ok(())
    }

    async fn remove_container(
        &self,
        id: &str,
        _remove_volumes: bool,
    ) -> Result<(), ContainerError> {
        self.record("remove", id)?;
        self.inner.lock().unwrap().running.remove(id);
        Ok(())
    }

    async fn inspect_container(&self, id: &str) -> Result<ContainerState, ContainerError> {
        self.record("inspect", id)?;
        let running = self
            .inner
            .lock()
            .unwrap()
            .running
            .get(id)
            .copied()
            .ok_or_else(|| ContainerError::NotFound(id.to_string()))?;
        Ok(ContainerState {
            running,
            status: if running { "running" } else { "exited" }.to_string(),
            exit_code: 0,
        })
    }

    async fn exec(&self, id: &str, cmd: &[String]) -> Result<ExecOutput, ContainerError> {
        self.record("exec", id)?;
        Ok(ExecOutput {
            exit_code: self.inner.lock().unwrap().exec_exit_code,
            stdout: cmd.join(" "),
            stderr: String::new(),
        })
    }

    async fn list_images(&self, filter: &ImageFilter) -> Result<Vec<String>, ContainerError> {
        let reference = filter.reference.clone().unwrap_or_default();
        self.record("images", &reference)?;
        let pulled = self.inner.lock().unwrap().pulled.clone();
        Ok(pulled
            .into_iter()
            .filter(|image| filter.reference.as_deref().map_or(true, |r| r == image))
            .map(|image| format!("sha256:pulled-{}", image))
            .collect())
    }

    async fn remove_image(&self, id: &str) -> Result<(), ContainerError> {
        self.record("rmi", id)?;
        Ok(())
    }
}
