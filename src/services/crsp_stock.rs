use crate::config::Config;
use crate::errors::Result;
use crate::models::stock::{SHROUT, SHROUT_MULTIPLIER};
use crate::services::pulled_path;
use crate::sources::{RemoteSource, WrdsCredentials, WrdsSource};
use crate::util::{self, arrow_utils, parquet_utils};
use arrow::record_batch::RecordBatch;
use log::info;
use std::path::{Path, PathBuf};

pub const CRSP_STOCK_FILE: &str = "CRSP_stock.parquet";

pub fn crsp_stock_path(data_dir: &Path) -> PathBuf {
    pulled_path(data_dir, CRSP_STOCK_FILE)
}

/// Raw CRSP daily rows for `[start_date - lookback_months, end_date]`.
///
/// The lookback gives downstream consumers the prior-period market cap of
/// the first requested month. Dates are ISO `YYYY-MM-DD`.
pub async fn pull_crsp_daily_raw(
    source: &(dyn RemoteSource + Send + Sync),
    start_date: &str,
    end_date: &str,
    lookback_months: u32,
) -> Result<RecordBatch> {
    let start = util::lookback_start(start_date, lookback_months)?;
    let end = util::parse_iso_date(end_date)?;

    info!("Pulling CRSP daily stock file from {} ({} to {})",
          source.source_name(), start, end);
    source.fetch(start, end).await
}

/// Drops repeated columns (first one wins) and converts `shrout` from
/// thousands of shares to shares.
pub fn transform_crsp_daily(raw: &RecordBatch) -> Result<RecordBatch> {
    let deduped = arrow_utils::drop_duplicate_columns(raw)?;
    arrow_utils::scale_column(&deduped, SHROUT, SHROUT_MULTIPLIER)
}

pub async fn pull_crsp_daily_file(
    source: &(dyn RemoteSource + Send + Sync),
    start_date: &str,
    end_date: &str,
    lookback_months: u32,
) -> Result<RecordBatch> {
    let raw = pull_crsp_daily_raw(source, start_date, end_date, lookback_months).await?;
    let batch = transform_crsp_daily(&raw)?;
    info!("Pulled {} CRSP daily rows", batch.num_rows());
    Ok(batch)
}

/// Pull against WRDS with the configured credentials, dates and lookback.
pub async fn pull_crsp_daily_file_with_config(config: &Config) -> Result<RecordBatch> {
    let credentials = WrdsCredentials::new(
        &config.wrds_username,
        config.wrds_password.as_deref(),
    );
    let source = WrdsSource::crsp_daily_stock(credentials);
    pull_crsp_daily_file(&source, &config.start_date, &config.end_date, config.lookback_months).await
}

pub fn load_crsp_daily_file(data_dir: &Path) -> Result<RecordBatch> {
    parquet_utils::read_batch(&crsp_stock_path(data_dir))
}

/// Replaces the stock snapshot under `data_dir`; returns the path written.
pub fn save_crsp_daily_file(batch: &RecordBatch, data_dir: &Path) -> Result<PathBuf> {
    let path = crsp_stock_path(data_dir);
    parquet_utils::write_batch(batch, &path)?;
    Ok(path)
}
