use std::io;
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use fixture_pod::configuration::{FixtureConfig, ENGINE_ENV_VAR};
use fixture_pod::error_handling::types::FixtureError;
use fixture_pod::{EntryNaming, Fixture, TarDirReader};
use log::{error, info, warn};
use tokio::io::AsyncWriteExt;

#[derive(Parser)]
#[command(name = "fixture")]
#[command(version)]
#[command(about = "Ephemeral container fixtures built from a streamed directory context")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Provision the fixture described by a TOML file, run a command in it
    /// and tear it down
    Run {
        config_file: PathBuf,

        /// Engine binary, overriding the configuration file
        #[arg(long, env = ENGINE_ENV_VAR)]
        engine: Option<String>,

        /// Command executed in the container once it is started; a non-zero
        /// exit fails the run
        #[arg(last = true)]
        cmd: Vec<String>,
    },
    /// Write a directory as a tar archive, exactly as it is sent to the engine
    Context {
        dir: PathBuf,

        /// Keep paths relative to DIR instead of flattening to base names
        #[arg(long)]
        relative_paths: bool,

        /// Write to a file instead of stdout
        #[arg(long, short)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .format_target(false)
        .init();

    let args = Args::parse();

    match args.command {
        Command::Run {
            config_file,
            engine,
            cmd,
        } => {
            if let Err(e) = run_fixture(&config_file, engine, cmd).await {
                error!("Fixture failed: {}", e);
                std::process::exit(1);
            }
        }
        Command::Context {
            dir,
            relative_paths,
            output,
        } => {
            let naming = if relative_paths {
                EntryNaming::RelativePath
            } else {
                EntryNaming::BaseName
            };
            match write_context(&dir, naming, output.as_deref()).await {
                Ok(written) => info!("Wrote {} bytes of build context", written),
                Err(e) => {
                    error!("Unable to archive {}: {}", dir.display(), e);
                    std::process::exit(1);
                }
            }
        }
    }
}

async fn run_fixture(
    config_file: &Path,
    engine: Option<String>,
    cmd: Vec<String>,
) -> Result<(), FixtureError> {
    info!("Importing configuration");
    let mut config = FixtureConfig::from_file(config_file)?;
    if let Some(engine) = engine {
        config.engine = engine;
    }
    info!("Configuration imported successfully");

    let mut fixture = Fixture::from_config(&config);
    if !cmd.is_empty() {
        fixture = fixture.exec(move |ctx| async move {
            let output = ctx.exec(cmd.as_slice()).await?;
            print!("{}", output.stdout);
            eprint!("{}", output.stderr);
            if !output.success() {
                return Err(FixtureError::Runner(format!(
                    "`{}` exited with {}",
                    cmd.join(" "),
                    output.exit_code
                )));
            }
            Ok(())
        });
    }

    let report = fixture.run().await?;
    info!(
        "Container {} from {} ran {} command(s) in {:.2?}",
        report.container_id, report.image, report.exec_runners, report.elapsed
    );
    Ok(())
}

async fn write_context(dir: &Path, naming: EntryNaming, output: Option<&Path>) -> io::Result<u64> {
    let mut reader = TarDirReader::new(dir).with_naming(naming);

    match output {
        Some(path) => {
            let mut file = tokio::fs::File::create(path).await?;
            let result = tokio::io::copy(&mut reader, &mut file).await;
            let result = match result {
                Ok(written) => file.flush().await.map(|_| written),
                Err(e) => Err(e),
            };
            if result.is_err() {
                warn!("Removing partial archive {}", path.display());
                if let Err(e) = tokio::fs::remove_file(path).await {
                    warn!("Unable to remove {}: {}", path.display(), e);
                }
            }
            result
        }
        None => {
            let mut stdout = tokio::io::stdout();
            let written = tokio::io::copy(&mut reader, &mut stdout).await?;
            stdout.flush().await?;
            Ok(written)
        }
    }
}
