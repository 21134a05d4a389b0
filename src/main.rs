use anyhow::Context;
use clap::Parser;
use pagesnap::{install_prometheus_recorder, setup_logging, Cli, CliRunner};
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Cli::parse();

    setup_logging(args.verbose)?;

    info!("Starting pagesnap v{}", env!("CARGO_PKG_VERSION"));

    // Must be installed before the engine registers its metric handles
    let prometheus = if args.metrics {
        Some(install_prometheus_recorder().context("failed to install metrics recorder")?)
    } else {
        None
    };

    let runner = CliRunner::new(&args).await?;
    let results = runner.run(&args).await?;

    println!(
        "{}",
        serde_json::to_string_pretty(&results).context("failed to serialize results")?
    );

    if let Some(handle) = prometheus {
        eprintln!("{}", handle.render());
    }

    info!("pagesnap finished");
    Ok(())
}
