use research_datahub::config::Config;
use research_datahub::data_provider::PulledDataProvider;
use research_datahub::services::{crsp_stock, vix};
use research_datahub::util::arrow_utils;

use anyhow::{bail, Context};
use arrow::record_batch::RecordBatch;
use arrow::util::pretty::pretty_format_batches;
use clap::{App, Arg, ArgMatches, SubCommand};
use log::info;

fn date_args<'a>(app: App<'a>) -> App<'a> {
    app.arg(
        Arg::with_name("start-date")
            .long("start-date")
            .value_name("DATE")
            .help("First requested date (YYYY-MM-DD), default START_DATE")
            .takes_value(true),
    )
    .arg(
        Arg::with_name("end-date")
            .long("end-date")
            .value_name("DATE")
            .help("Last requested date (YYYY-MM-DD), default END_DATE")
            .takes_value(true),
    )
    .arg(
        Arg::with_name("lookback-months")
            .long("lookback-months")
            .value_name("MONTHS")
            .help("Extra months of CRSP history before the start date")
            .takes_value(true),
    )
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logger
    env_logger::init();

    let app = App::new("research_datahub")
        .version("1.0.0")
        .about("CRSP daily stock and FRED VIX pulls")
        .arg(
            Arg::with_name("data-dir")
                .long("data-dir")
                .value_name("DIR")
                .help("Base data directory, default DATA_DIR or ./data")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("wrds-username")
                .long("wrds-username")
                .value_name("USER")
                .help("WRDS account, default WRDS_USERNAME")
                .takes_value(true),
        );

    // 添加子命令
    let app = app.subcommand(date_args(
        SubCommand::with_name("pull")
            .about("Pull fresh data and overwrite the local snapshot")
            .arg(
                Arg::with_name("dataset")
                    .short('d')
                    .long("dataset")
                    .value_name("DATASET")
                    .help("Dataset to pull (crsp, vix, all)")
                    .takes_value(true)
                    .default_value("all"),
            ),
    ))
    .subcommand(
        SubCommand::with_name("explore")
            .about("Print rows from a local snapshot")
            .arg(
                Arg::with_name("dataset")
                    .short('d')
                    .long("dataset")
                    .value_name("DATASET")
                    .help("Dataset to show (crsp, vix)")
                    .required(true)
                    .takes_value(true),
            )
            .arg(
                Arg::with_name("permno")
                    .short('p')
                    .long("permno")
                    .value_name("PERMNO")
                    .help("Only rows of this CRSP security")
                    .takes_value(true),
            )
            .arg(
                Arg::with_name("limit")
                    .short('l')
                    .long("limit")
                    .value_name("LIMIT")
                    .help("Limit the number of records to display")
                    .takes_value(true)
                    .default_value("10"),
            )
            .arg(
                Arg::with_name("json")
                    .long("json")
                    .help("Print one JSON object per row instead of a table")
                    .takes_value(false),
            ),
    );

    let matches = app.get_matches();
    let mut config = Config::from_env()?;
    if let Some(dir) = matches.value_of("data-dir") {
        config = config.with_data_dir(dir);
    }
    if let Some(username) = matches.value_of("wrds-username") {
        config = config.with_wrds_username(username);
    }

    if let Some(matches) = matches.subcommand_matches("pull") {
        let config = apply_date_args(config, matches)?;
        let dataset = matches.value_of("dataset").unwrap_or("all").to_lowercase();

        match dataset.as_str() {
            "crsp" => pull_crsp(&config).await?,
            "vix" => pull_vix(&config).await?,
            "all" => {
                pull_crsp(&config).await?;
                pull_vix(&config).await?;
            }
            other => bail!("Unknown dataset: {}", other),
        }
    } else if let Some(matches) = matches.subcommand_matches("explore") {
        let dataset = matches.value_of("dataset").unwrap_or_default().to_lowercase();
        let limit = matches.value_of("limit")
            .unwrap_or("10")
            .parse::<usize>()
            .context("--limit must be a non-negative integer")?;
        let permno = matches.value_of("permno")
            .map(|p| p.parse::<i64>())
            .transpose()
            .context("--permno must be an integer")?;

        let batch = match dataset.as_str() {
            "crsp" => explore_crsp(&config, permno)?,
            "vix" => vix::load_vix(config.data_dir())
                .with_context(|| format!("Loading {}", vix::vix_path(config.data_dir()).display()))?,
            other => bail!("Unknown dataset: {}", other),
        };

        info!("Found {} rows", batch.num_rows());
        let shown = batch.slice(0, limit.min(batch.num_rows()));
        if matches.is_present("json") {
            print_json_rows(&dataset, &shown)?;
        } else {
            println!("{}", pretty_format_batches(&[shown])?);
        }
        if batch.num_rows() > limit {
            println!("... and {} more records", batch.num_rows() - limit);
        }
    } else {
        info!("No command specified. Use --help for usage information.");
    }

    Ok(())
}

fn apply_date_args(mut config: Config, matches: &ArgMatches) -> anyhow::Result<Config> {
    if let Some(start) = matches.value_of("start-date") {
        config = config.with_start_date(start);
    }
    if let Some(end) = matches.value_of("end-date") {
        config = config.with_end_date(end);
    }
    if let Some(months) = matches.value_of("lookback-months") {
        let months = months.parse::<u32>()
            .context("--lookback-months must be a non-negative integer")?;
        config = config.with_lookback_months(months);
    }
    Ok(config)
}

async fn pull_crsp(config: &Config) -> anyhow::Result<()> {
    let batch = crsp_stock::pull_crsp_daily_file_with_config(config).await
        .context("CRSP pull failed")?;
    let path = crsp_stock::save_crsp_daily_file(&batch, config.data_dir())?;
    info!("Wrote {} rows to {}", batch.num_rows(), path.display());
    Ok(())
}

async fn pull_vix(config: &Config) -> anyhow::Result<()> {
    let batch = vix::pull_vix_with_config(config).await
        .context("VIX pull failed")?;
    let path = vix::save_vix(&batch, config.data_dir())?;
    info!("Wrote {} rows to {}", batch.num_rows(), path.display());
    Ok(())
}

fn explore_crsp(config: &Config, permno: Option<i64>) -> anyhow::Result<RecordBatch> {
    let permno = match permno {
        Some(permno) => permno,
        None => return crsp_stock::load_crsp_daily_file(config.data_dir())
            .with_context(|| format!(
                "Loading {}", crsp_stock::crsp_stock_path(config.data_dir()).display()
            )),
    };

    let provider = PulledDataProvider::load(config.data_dir())?;
    if !provider.has_stock_data() {
        bail!("No CRSP snapshot under {}; run `pull --dataset crsp` first",
              config.data_dir().display());
    }

    let history: Vec<_> = provider.get_stock_history(permno).into_iter().cloned().collect();
    Ok(arrow_utils::stock_records_to_batch(&history)?)
}

fn print_json_rows(dataset: &str, batch: &RecordBatch) -> anyhow::Result<()> {
    if dataset == "crsp" {
        for record in arrow_utils::stock_records_from_batch(batch)? {
            println!("{}", serde_json::to_string(&record)?);
        }
    } else {
        for observation in arrow_utils::vix_from_batch(batch)? {
            println!("{}", serde_json::to_string(&observation)?);
        }
    }
    Ok(())
}
