//! `bsp` - run BSP jobs described by YAML or JSON files.

use bsp_cli::{load_job_config, run_job, validate_job, Cli, Command};
use clap::Parser;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Run(args) => {
            let config = load_job_config(&args.job)?;
            let summary = run_job(config, args.checkpoint_dir).await?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
            if !summary.is_success() {
                std::process::exit(1);
            }
        }
        Command::Validate(args) => {
            let config = validate_job(&args)?;
            println!(
                "✓ {} is valid: compute={} input={} workers={} partitions={}",
                args.config.display(),
                config.compute,
                config.input,
                config.workers,
                config.num_partitions()
            );
        }
    }

    Ok(())
}
