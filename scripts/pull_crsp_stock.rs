use research_datahub::config::Config;
use research_datahub::services::crsp_stock;

use anyhow::Context;
use clap::{App, Arg};
use log::info;

/// Pulls the CRSP daily stock file with the configured defaults and replaces
/// `<DATA_DIR>/pulled/CRSP_stock.parquet`.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let matches = App::new("pull_crsp_stock")
        .about("Pull CRSP daily stock data from WRDS into pulled/CRSP_stock.parquet")
        .arg(Arg::with_name("start-date").long("start-date").value_name("DATE").takes_value(true))
        .arg(Arg::with_name("end-date").long("end-date").value_name("DATE").takes_value(true))
        .arg(Arg::with_name("data-dir").long("data-dir").value_name("DIR").takes_value(true))
        .arg(Arg::with_name("wrds-username").long("wrds-username").value_name("USER").takes_value(true))
        .arg(
            Arg::with_name("lookback-months")
                .long("lookback-months")
                .value_name("MONTHS")
                .help("Extra months of history before the start date (default 1)")
                .takes_value(true),
        )
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
    if let Some(username) = matches.value_of("wrds-username") {
        config = config.with_wrds_username(username);
    }
    if let Some(months) = matches.value_of("lookback-months") {
        let months = months.parse::<u32>()
            .context("--lookback-months must be a non-negative integer")?;
        config = config.with_lookback_months(months);
    }

    let crsp = crsp_stock::pull_crsp_daily_file_with_config(&config).await
        .context("CRSP pull failed")?;
    let path = crsp_stock::save_crsp_daily_file(&crsp, config.data_dir())?;
    info!("Wrote {} rows to {}", crsp.num_rows(), path.display());

    Ok(())
}
