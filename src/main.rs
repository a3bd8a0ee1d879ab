use anyhow::Context;
use clap::Parser;
use registry_relay::cli::{Args, Runner};
use registry_relay::logging;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse().from_env();

    let format = args
        .log_format()
        .map_err(anyhow::Error::msg)
        .context("Invalid --log-format")?;
    logging::init(args.verbose, format);

    let runner = Runner::new(args).context("Invalid configuration")?;
    runner.run().await.context("Server failed")?;
    Ok(())
}
