use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;
use qe_runner::config::Cli;
use qe_runner::config::Commands;
use qe_runner::scenario::Plan;
use qe_runner::scenario::TagFilter;
use qe_runner::RunnerBuilder;
use serde::Serialize;
use utils::version;

/// Sets up global panic hooks.
fn setup_global_hooks() {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        default_hook(panic_info);
        tracing::error!("Thread panicked: {}", panic_info);
    }));
}

#[tokio::main]
async fn main() -> ExitCode {
    setup_global_hooks();
    let _guard = utils::logging::init();

    let cli = Cli::parse();
    tracing::info!("Starting qe-runner {}", &**version::VERSION);

    match run(cli).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(1),
        Err(e) => {
            tracing::error!("{e:#}");
            ExitCode::from(2)
        }
    }
}

/// Returns whether the command passed.
async fn run(cli: Cli) -> Result<bool> {
    // Load the plan before touching the cluster so a broken plan fails fast.
    let plan = match &cli.command {
        Commands::Run(args) => Some(Plan::load(&args.plan)?),
        _ => None,
    };

    let runner = RunnerBuilder::from_args(&cli.cluster).await?.build();

    match cli.command {
        Commands::WaitReady => {
            let result = runner.wait_ready().await?;
            print_json(&result)?;
            Ok(result.is_success())
        }
        Commands::WaitUndeployed => {
            let result = runner.wait_undeployed().await?;
            print_json(&result)?;
            Ok(result.is_success())
        }
        Commands::WaitApp(args) => {
            let result = runner
                .wait_app(&args.label, &args.value, args.replicas)
                .await?;
            print_json(&result)?;
            Ok(result.is_success())
        }
        Commands::Clean => match runner.clean().await {
            Ok(deleted) => {
                tracing::info!("Deleted {deleted} resources");
                Ok(true)
            }
            Err(e) => {
                tracing::error!("Cleanup failed: {e:#}");
                Ok(false)
            }
        },
        Commands::CheckReachable => match runner.check_reachable().await {
            Ok(()) => Ok(true),
            Err(e) => {
                tracing::error!("{e:#}");
                Ok(false)
            }
        },
        Commands::Run(args) => {
            let Some(plan) = plan else {
                anyhow::bail!("no plan loaded");
            };
            let filter = TagFilter::new(&args.tags, &args.skip_tags);
            let report = runner.run_plan(&plan, &filter).await;
            print_json(&report)?;
            Ok(report.passed())
        }
    }
}

fn print_json(value: &impl Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
