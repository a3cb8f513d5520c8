use std::env;

use anyhow::{Context, Result, bail};
use imgembed::{BatchCoordinator, PipelineConfig};

const USAGE: &str = "usage: imgembed [--config pipeline.yaml] <image>...";

#[tokio::main]
async fn main() -> Result<()> {
    let mut config_path = None;
    let mut sources = Vec::new();
    let mut args = env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "-c" | "--config" => {
                config_path = Some(args.next().context("--config needs a path")?);
            }
            "-h" | "--help" => {
                println!("{USAGE}");
                return Ok(());
            }
            _ => sources.push(arg),
        }
    }
    if sources.is_empty() {
        bail!("{USAGE}");
    }

    let config = match &config_path {
        Some(path) => PipelineConfig::from_file(path)
            .with_context(|| format!("loading pipeline config from {path}"))?,
        None => PipelineConfig::default(),
    };

    let coordinator = BatchCoordinator::start(&config)
        .await
        .context("starting batch pipeline")?;
    let results = coordinator.handle_batch(sources).await?;
    coordinator.shutdown().await?;

    println!("{}", serde_json::to_string_pretty(&results)?);
    Ok(())
}
