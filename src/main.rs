use anyhow::Result;
use clap::Parser;
use git_carrier::cli::commands::branches::BranchesCommand;
use git_carrier::cli::commands::config::ConfigCommand;
use git_carrier::cli::commands::log::LogCommand;
use git_carrier::cli::commands::pack::PackCommand;
use git_carrier::cli::commands::range::RangeCommand;
use git_carrier::cli::commands::unpack::UnpackCommand;
use git_carrier::cli::commands::verify::VerifyCommand;
use git_carrier::cli::commands::{report_failure, Command, Context};
use git_carrier::cli::{Cli, Commands};
use git_carrier::{generate_correlation_id, init_telemetry, CarrierConfig, GitCli};
use std::process::ExitCode;
use std::sync::Arc;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let json = cli.json;

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => report_failure(&e, json),
    }
}

async fn run(cli: Cli) -> Result<()> {
    if let Err(e) = CarrierConfig::load_env_file() {
        eprintln!("⚠️  Ignoring unreadable .env file: {e}");
    }
    let config = CarrierConfig::load(cli.config.as_deref())?;
    init_telemetry(&config.observability)?;

    let ctx = Context {
        engine: Arc::new(GitCli::system(&config.git.binary)),
        repo_path: cli.repo,
        config,
        json: cli.json,
        correlation_id: generate_correlation_id(),
    };
    tracing::debug!(correlation_id = %ctx.correlation_id, "starting git-carrier");

    match cli.command {
        Commands::Branches => BranchesCommand.execute(&ctx).await,
        Commands::Log {
            reference,
            page,
            page_size,
        } => {
            LogCommand {
                reference,
                page,
                page_size,
            }
            .execute(&ctx)
            .await
        }
        Commands::Range { reference, base } => RangeCommand { reference, base }.execute(&ctx).await,
        Commands::Pack {
            reference,
            base,
            output,
            force,
        } => {
            PackCommand {
                reference,
                base,
                output,
                force,
            }
            .execute(&ctx)
            .await
        }
        Commands::Verify { bundle } => VerifyCommand { bundle }.execute(&ctx).await,
        Commands::Unpack { bundle, branch } => UnpackCommand { bundle, branch }.execute(&ctx).await,
        Commands::Config => ConfigCommand.execute(&ctx).await,
    }
}
