use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use log::{debug, error, info, warn};
use uuid::Uuid;

use super::context::{FixtureContext, Runner};
use super::options::{Fixture, Plan};
use crate::archive::TarDirReader;
use crate::container_management::{CliEngine, ContainerEngine, ContainerHandle};
use crate::error_handling::types::FixtureError;

/// Outcome of a successful [`Fixture::run`].
#[derive(Debug, Clone, PartialEq)]
pub struct FixtureReport {
    /// Built image id or pulled reference.
    pub image: String,
    pub container_id: String,
    pub built: bool,
    /// Number of exec runners that ran.
    pub exec_runners: usize,
    pub elapsed: Duration,
}

impl Fixture {
    /// Provisions the image and container, runs the exec runners, stops the
    /// container, then runs the after runners.
    ///
    /// After runners run even when an earlier step failed. An error from
    /// provisioning, an exec runner or the stop is returned in preference to
    /// an after-runner error, which is then only logged.
    pub async fn run(self) -> Result<FixtureReport, FixtureError> {
        let started = Instant::now();
        let Fixture {
            engine,
            plan,
            exec_runners,
            after_runners,
        } = self;

        let engine: Arc<dyn ContainerEngine> = match engine {
            Some(engine) => engine,
            None => Arc::new(CliEngine::new(plan.runtime.clone())?),
        };
        let mut ctx = FixtureContext::new(engine);
        let exec_count = exec_runners.len();

        let outcome = exercise(&plan, &mut ctx, exec_runners).await;
        let after = run_runners(&ctx, after_runners, "after").await;

        match (outcome, after) {
            (Err(e), after) => {
                if let Err(after_err) = after {
                    warn!("After runner failed as well: {}", after_err);
                }
                Err(e)
            }
            (Ok(()), Err(e)) => Err(e),
            (Ok(()), Ok(())) => {
                let report = FixtureReport {
                    image: ctx.image.clone().unwrap_or_default(),
                    container_id: ctx
                        .container
                        .as_ref()
                        .map(|c| c.id.clone())
                        .unwrap_or_default(),
                    built: ctx.built,
                    exec_runners: exec_count,
                    elapsed: started.elapsed(),
                };
                info!(
                    "Fixture finished in {:.2?} (image {})",
                    report.elapsed, report.image
                );
                Ok(report)
            }
        }
    }
}

/// Image, container, exec runners, stop.
async fn exercise(
    plan: &Plan,
    ctx: &mut FixtureContext,
    exec_runners: Vec<Runner>,
) -> Result<(), FixtureError> {
    let image = provision_image(plan, ctx).await?;
    ctx.image = Some(image.clone());

    let mut spec = plan.spec.clone();
    spec.image = image.clone();
    info!("Creating container from {}", image);
    let id = ctx.engine().create_container(&spec).await?;
    ctx.container = Some(ContainerHandle {
        id: id.clone(),
        name: spec.name.clone(),
        image,
        created_at: Utc::now(),
    });

    info!("Starting container {}", id);
    ctx.engine().start_container(&id).await?;

    let exec_result = run_runners(ctx, exec_runners, "exec").await;

    info!("Stopping container {}", id);
    let stop_result = ctx
        .engine()
        .stop_container(&id, plan.stop_timeout)
        .await
        .map_err(FixtureError::from);

    match (exec_result, stop_result) {
        (Err(e), Err(stop_err)) => {
            warn!("Stopping container {} failed as well: {}", id, stop_err);
            Err(e)
        }
        (Err(e), Ok(())) | (Ok(()), Err(e)) => Err(e),
        (Ok(()), Ok(())) => Ok(()),
    }
}

async fn provision_image(plan: &Plan, ctx: &mut FixtureContext) -> Result<String, FixtureError> {
    if let Some(dockerfile) = &plan.dockerfile {
        let context_dir = resolve_context_dir(plan.context_dir.as_ref())?;
        let mut options = plan.build.clone();
        options.context_dir = context_dir.clone();
        options.dockerfile = dockerfile.clone();
        options.tags.push(generated_tag());

        info!("Building image from {}", context_dir.display());
        let reader = TarDirReader::new(&context_dir).with_naming(options.naming);
        let id = ctx.engine().build_image(Box::new(reader), &options).await?;
        ctx.image_tags.push(id.clone());
        ctx.built = true;
        return Ok(id);
    }

    let image = plan.spec.image.trim();
    if image.is_empty() {
        error!("Neither a Dockerfile nor an image was given");
        return Err(FixtureError::NoImageSource);
    }
    info!("Pulling image {}", image);
    ctx.engine()
        .pull_image(image, plan.platform.as_deref())
        .await?;
    Ok(image.to_string())
}

fn resolve_context_dir(dir: Option<&PathBuf>) -> Result<PathBuf, FixtureError> {
    let cwd = std::env::current_dir()?;
    Ok(match dir {
        Some(dir) if dir.is_absolute() => dir.clone(),
        Some(dir) => cwd.join(dir),
        None => cwd,
    })
}

fn generated_tag() -> String {
    let id = Uuid::new_v4().simple().to_string();
    format!("fixture-{}", &id[..8])
}

/// Runs `runners` in order against a snapshot of `ctx`, stopping at the
/// first failure.
async fn run_runners(
    ctx: &FixtureContext,
    runners: Vec<Runner>,
    phase: &str,
) -> Result<(), FixtureError> {
    let total = runners.len();
    for (index, runner) in runners.into_iter().enumerate() {
        debug!("Running {} runner {}/{}", phase, index + 1, total);
        if let Err(e) = runner(ctx.clone()).await {
            error!("{} runner {}/{} failed: {}", phase, index + 1, total, e);
            return Err(e);
        }
    }
    Ok(())
}
