use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use log::{debug, info};

use crate::container_management::{ContainerEngine, ContainerHandle, ExecOutput, ImageFilter};
use crate::error_handling::types::FixtureError;

pub type RunnerFuture = Pin<Box<dyn Future<Output = Result<(), FixtureError>> + Send>>;

/// A step run against a provisioned fixture: test logic (`exec`) or teardown
/// (`after`).
pub type Runner = Box<dyn FnOnce(FixtureContext) -> RunnerFuture + Send>;

pub(crate) fn boxed_runner<F, Fut>(runner: F) -> Runner
where
    F: FnOnce(FixtureContext) -> Fut + Send + 'static,
    Fut: Future<Output = Result<(), FixtureError>> + Send + 'static,
{
    Box::new(move |ctx| Box::pin(runner(ctx)))
}

/// What runners get to see of a fixture. Cheap to clone: every runner gets
/// its own copy of the state as it was when the runner started.
#[derive(Clone)]
pub struct FixtureContext {
    engine: Arc<dyn ContainerEngine>,
    /// Set once the container has been created.
    pub container: Option<ContainerHandle>,
    /// Image the container was created from: built id or pulled reference.
    pub image: Option<String>,
    /// Ids of the images built for this fixture.
    pub image_tags: Vec<String>,
    pub built: bool,
}

impl FixtureContext {
    pub(crate) fn new(engine: Arc<dyn ContainerEngine>) -> Self {
        Self {
            engine,
            container: None,
            image: None,
            image_tags: Vec::new(),
            built: false,
        }
    }

    pub fn engine(&self) -> &Arc<dyn ContainerEngine> {
        &self.engine
    }

    pub fn container_id(&self) -> Result<&str, FixtureError> {
        self.container
            .as_ref()
            .map(|c| c.id.as_str())
            .ok_or_else(|| FixtureError::Runner("no container has been created".to_string()))
    }

    /// Runs `cmd` in the fixture container. A non-zero exit code is returned
    /// in the output.
    pub async fn exec<S: AsRef<str> + Sync>(&self, cmd: &[S]) -> Result<ExecOutput, FixtureError> {
        let id = self.container_id()?;
        let cmd: Vec<String> = cmd.iter().map(|c| c.as_ref().to_string()).collect();
        debug!("exec in {}: {:?}", id, cmd);
        Ok(self.engine.exec(id, &cmd).await?)
    }

    /// Like [`FixtureContext::exec`] but a non-zero exit code is an error.
    pub async fn exec_checked<S: AsRef<str> + Sync>(
        &self,
        cmd: &[S],
    ) -> Result<ExecOutput, FixtureError> {
        let output = self.exec(cmd).await?;
        if !output.success() {
            let cmd: Vec<&str> = cmd.iter().map(|c| c.as_ref()).collect();
            return Err(FixtureError::Runner(format!(
                "`{}` exited with {}: {}",
                cmd.join(" "),
                output.exit_code,
                output.stderr.trim()
            )));
        }
        Ok(output)
    }

    /// Removes the container together with its volumes. Nothing to do if no
    /// container was created.
    pub async fn remove_container(&self) -> Result<(), FixtureError> {
        match &self.container {
            Some(container) => {
                info!("Removing container {}", container.id);
                self.engine.remove_container(&container.id, true).await?;
            }
            None => debug!("No container to remove"),
        }
        Ok(())
    }

    /// Removes the images built for the fixture, or every image matching the
    /// pulled reference.
    pub async fn remove_images(&self) -> Result<(), FixtureError> {
        let images = if self.built {
            self.image_tags.clone()
        } else {
            match &self.image {
                Some(reference) => {
                    let filter = ImageFilter {
                        reference: Some(reference.clone()),
                        labels: Vec::new(),
                    };
                    self.engine.list_images(&filter).await?
                }
                None => Vec::new(),
            }
        };

        info!("Removing {} image(s)", images.len());
        for image in &images {
            self.engine.remove_image(image).await?;
        }
        Ok(())
    }
}
