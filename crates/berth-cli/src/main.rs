mod commands;

use clap::{Parser, Subcommand};
use commands::render::Format;
use commands::{RefArgs, ReleaseError};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "berth", about = "Build, tag, and publish Rust workloads from CI")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the artifact, publish the image, and optionally render the descriptor
    Release {
        #[command(flatten)]
        refs: RefArgs,
        /// Render the workload descriptor to .berth/workload.json
        #[arg(long)]
        render: bool,
        /// Build the image locally without logging in or pushing
        #[arg(long)]
        no_push: bool,
        /// Allow tagged releases with uncommitted changes
        #[arg(long)]
        allow_dirty: bool,
        /// Registry username
        #[arg(long, env = "BERTH_REGISTRY_USER")]
        registry_user: Option<String>,
        /// Registry password or token
        #[arg(long, env = "BERTH_REGISTRY_PASSWORD", hide_env_values = true)]
        registry_password: Option<String>,
    },
    /// Print the image identifier and cache key for the current ref
    Tag {
        #[command(flatten)]
        refs: RefArgs,
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
    /// Render the workload descriptor without building
    Render {
        #[command(flatten)]
        refs: RefArgs,
        #[arg(long, value_enum, default_value_t = Format::Json)]
        format: Format,
        /// Write to a file instead of stdout
        #[arg(long)]
        out: Option<PathBuf>,
        /// Skip checking that every secret binding resolves
        #[arg(long)]
        no_verify: bool,
    },
    /// Run the init step, then the workload, with the local docker daemon
    Launch {
        #[command(flatten)]
        refs: RefArgs,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match run(cli.command).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::from(exit_code(&e))
        }
    }
}

async fn run(command: Commands) -> anyhow::Result<()> {
    match command {
        Commands::Release {
            refs,
            render,
            no_push,
            allow_dirty,
            registry_user,
            registry_password,
        } => {
            commands::release(commands::ReleaseArgs {
                refs,
                render,
                no_push,
                allow_dirty,
                registry_user,
                registry_password,
            })
            .await?
        }
        Commands::Tag { refs, json } => commands::tag(&refs, json)?,
        Commands::Render {
            refs,
            format,
            out,
            no_verify,
        } => commands::render(&refs, format, out.as_deref(), no_verify)?,
        Commands::Launch { refs } => commands::launch(&refs).await?,
    }
    Ok(())
}

/// Stage failures get distinct exit codes so CI can tell them apart.
fn exit_code(err: &anyhow::Error) -> u8 {
    err.downcast_ref::<ReleaseError>()
        .map(|e| e.stage().exit_code())
        .unwrap_or(1)
}
