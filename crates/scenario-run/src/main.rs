use clap::Parser;
use eyre::Result;

use crate::{app::Args, executor::Executor};

mod app;
mod executor;
mod scenarios;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    scenario_runtime::init_tracing();

    let scenario = scenarios::load_scenario(&args.scenario).await?;

    let executor = Executor::new(scenario, args.options());
    let report = executor.execute().await?;

    println!("{}", serde_json::to_string_pretty(&report)?);

    if !report.succeeded() {
        std::process::exit(1);
    }

    Ok(())
}
