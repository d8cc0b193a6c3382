use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use super::context::{boxed_runner, FixtureContext, Runner};
use crate::archive::EntryNaming;
use crate::configuration::FixtureConfig;
use crate::container_management::{
    BuildOptions, ContainerEngine, ContainerSpec, Runtime, DEFAULT_STOP_TIMEOUT,
};
use crate::error_handling::types::FixtureError;

/// Everything about a fixture except its runners.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Plan {
    pub runtime: Runtime,
    /// Build context; `None` means the current directory.
    pub context_dir: Option<PathBuf>,
    /// Set in build mode.
    pub dockerfile: Option<String>,
    pub build: BuildOptions,
    pub spec: ContainerSpec,
    pub platform: Option<String>,
    pub stop_timeout: Duration,
}

impl Default for Plan {
    fn default() -> Self {
        Self {
            runtime: Runtime::default(),
            context_dir: None,
            dockerfile: None,
            build: BuildOptions::default(),
            spec: ContainerSpec::default(),
            platform: None,
            stop_timeout: DEFAULT_STOP_TIMEOUT,
        }
    }
}

/// An ephemeral container set up for a test.
///
/// Options compose in any order. Choosing a [`dockerfile`](Fixture::dockerfile)
/// builds the image from the context directory, otherwise the
/// [`image`](Fixture::image) is pulled. Nothing touches the engine until
/// [`run`](Fixture::run).
///
/// ```ignore
/// let report = Fixture::new()
///     .context_dir("testdata/echo")
///     .dockerfile("Dockerfile")
///     .exec(|ctx| async move {
///         ctx.exec_checked(&["echo", "ready"]).await?;
///         Ok(())
///     })
///     .cleanup_container()
///     .cleanup_image()
///     .run()
///     .await?;
/// ```
#[derive(Default)]
pub struct Fixture {
    pub(crate) engine: Option<Arc<dyn ContainerEngine>>,
    pub(crate) plan: Plan,
    pub(crate) exec_runners: Vec<Runner>,
    pub(crate) after_runners: Vec<Runner>,
}

impl Fixture {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a fixture from a validated configuration, including the
    /// cleanup it asks for.
    pub fn from_config(config: &FixtureConfig) -> Self {
        let mut fixture = Fixture::new()
            .runtime(config.runtime())
            .stop_timeout(Duration::from_secs(config.container.stop_timeout_secs));

        if let Some(name) = &config.name {
            fixture = fixture.name(name);
        }
        if let Some(build) = &config.build {
            fixture = fixture
                .context_dir(&build.context)
                .dockerfile(build.dockerfile.as_deref().unwrap_or("Dockerfile"));
            if build.relative_paths {
                fixture = fixture.naming(EntryNaming::RelativePath);
            }
            for tag in &build.tags {
                fixture = fixture.tag(tag);
            }
            for (key, value) in &build.args {
                fixture = fixture.build_arg(key, value);
            }
            fixture.plan.build.labels.extend(
                build
                    .labels
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone())),
            );
        }
        if let Some(image) = &config.image {
            fixture = fixture.image(image);
        }
        if let Some(platform) = &config.platform {
            fixture = fixture.platform(platform);
        }

        let container = &config.container;
        fixture = fixture.cmd(container.cmd.iter());
        for (key, value) in &container.env {
            fixture = fixture.env(key, value);
        }
        for (key, value) in &container.labels {
            fixture = fixture.label(key, value);
        }
        if let Some(dir) = &container.working_dir {
            fixture = fixture.working_dir(dir);
        }
        for arg in &container.extra_args {
            fixture = fixture.extra_arg(arg);
        }

        if config.cleanup.container {
            fixture = fixture.cleanup_container();
        }
        if config.cleanup.image {
            fixture = fixture.cleanup_image();
        }
        fixture
    }

    /// Uses `engine` instead of a [`CliEngine`](crate::container_management::CliEngine)
    /// for the configured runtime.
    pub fn engine(mut self, engine: Arc<dyn ContainerEngine>) -> Self {
        self.engine = Some(engine);
        self
    }

    pub fn runtime(mut self, runtime: Runtime) -> Self {
        self.plan.runtime = runtime;
        self
    }

    /// Container name.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.plan.spec.name = Some(name.into());
        self
    }

    /// Directory archived as the build context. Relative paths are resolved
    /// against the current directory when the fixture runs.
    pub fn context_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.plan.context_dir = Some(dir.into());
        self
    }

    /// Builds the image with this Dockerfile (a name inside the context).
    pub fn dockerfile(mut self, dockerfile: impl Into<String>) -> Self {
        self.plan.dockerfile = Some(dockerfile.into());
        self
    }

    pub fn build_arg(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.plan.build.build_args.insert(key.into(), value.into());
        self
    }

    /// Extra tag for the built image. A generated `fixture-xxxxxxxx` tag is
    /// always added.
    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.plan.build.tags.push(tag.into());
        self
    }

    /// Label set on the container and, in build mode, on the image.
    pub fn label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let (key, value) = (key.into(), value.into());
        self.plan.build.labels.insert(key.clone(), value.clone());
        self.plan.spec.labels.insert(key, value);
        self
    }

    /// How files are named in the build context.
    pub fn naming(mut self, naming: EntryNaming) -> Self {
        self.plan.build.naming = naming;
        self
    }

    /// Image to pull. Ignored when a Dockerfile is set.
    pub fn image(mut self, image: impl Into<String>) -> Self {
        self.plan.spec.image = image.into();
        self
    }

    pub fn platform(mut self, platform: impl Into<String>) -> Self {
        self.plan.platform = Some(platform.into());
        self
    }

    /// Command the container starts with.
    pub fn cmd<I, S>(mut self, cmd: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.plan.spec.cmd = cmd.into_iter().map(Into::into).collect();
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.plan.spec.env.insert(key.into(), value.into());
        self
    }

    pub fn working_dir(mut self, dir: impl Into<String>) -> Self {
        self.plan.spec.working_dir = Some(dir.into());
        self
    }

    /// Raw argument for the engine's `create` (ports, mounts, networks...).
    pub fn extra_arg(mut self, arg: impl Into<String>) -> Self {
        self.plan.spec.extra_args.push(arg.into());
        self
    }

    pub fn stop_timeout(mut self, timeout: Duration) -> Self {
        self.plan.stop_timeout = timeout;
        self
    }

    /// Adds test logic, run in order once the container is started.
    pub fn exec<F, Fut>(mut self, runner: F) -> Self
    where
        F: FnOnce(FixtureContext) -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), FixtureError>> + Send + 'static,
    {
        self.exec_runners.push(boxed_runner(runner));
        self
    }

    /// Adds teardown logic. After runners always run, in order, whatever
    /// happened before them.
    pub fn after<F, Fut>(mut self, runner: F) -> Self
    where
        F: FnOnce(FixtureContext) -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), FixtureError>> + Send + 'static,
    {
        self.after_runners.push(boxed_runner(runner));
        self
    }

    /// Removes the container and its volumes after the run.
    pub fn cleanup_container(self) -> Self {
        self.after(|ctx| async move { ctx.remove_container().await })
    }

    /// Removes the fixture's image(s) after the run.
    pub fn cleanup_image(self) -> Self {
        self.after(|ctx| async move { ctx.remove_images().await })
    }
}
