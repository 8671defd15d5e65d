use research_datahub::config::Config;
use research_datahub::services::vix;

use anyhow::Context;
use clap::{App, Arg};
use log::info;

/// Pulls VIXCLS from FRED and replaces `<DATA_DIR>/pulled/vix.parquet`.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let matches = App::new("pull_vix")
        .about("Pull the VIX close series from FRED into pulled/vix.parquet")
        .arg(Arg::with_name("start-date").long("start-date").value_name("DATE").takes_value(true))
        .arg(Arg::with_name("end-date").long("end-date").value_name("DATE").takes_value(true))
        .arg(Arg::with_name("data-dir").long("data-dir").value_name("DIR").takes_value(true))
        .get_matches();

    let mut config = Config::from_env()?;
    if let Some(start) = matches.value_of("start-date") {
        config = config.with_start_date(start);
    }
    if let Some(end) = matches.value_of("end-date") {
        config = config.with_end_date(end);
    }
    if let Some(dir) = matches.value_of("data-dir") {
        config = config.with_data_dir(dir);
    }

    let df = vix::pull_vix_with_config(&config).await
        .context("VIX pull failed")?;
    let path = vix::save_vix(&df, config.data_dir())?;
    info!("Wrote {} rows to {}", df.num_rows(), path.display());

    Ok(())
}
