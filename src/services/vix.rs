use crate::config::Config;
use crate::errors::Result;
use crate::services::pulled_path;
use crate::sources::{FredSource, RemoteSource};
use crate::util::{self, parquet_utils};
use arrow::record_batch::RecordBatch;
use log::info;
use std::path::{Path, PathBuf};

pub const VIX_FILE: &str = "vix.parquet";

pub fn vix_path(data_dir: &Path) -> PathBuf {
    pulled_path(data_dir, VIX_FILE)
}

/// VIX closes for exactly `[start_date, end_date]`; unlike the CRSP pull
/// there is no lookback.
pub async fn pull_vix_from_fred(
    source: &(dyn RemoteSource + Send + Sync),
    start_date: &str,
    end_date: &str,
) -> Result<RecordBatch> {
    let start = util::parse_iso_date(start_date)?;
    let end = util::parse_iso_date(end_date)?;

    let batch = source.fetch(start, end).await?;
    info!("Pulled {} VIX rows from {}", batch.num_rows(), source.source_name());
    Ok(batch)
}

pub async fn pull_vix_with_config(config: &Config) -> Result<RecordBatch> {
    let source = FredSource::vix(config.http_timeout)?;
    pull_vix_from_fred(&source, &config.start_date, &config.end_date).await
}

pub fn load_vix(data_dir: &Path) -> Result<RecordBatch> {
    parquet_utils::read_batch(&vix_path(data_dir))
}

pub fn save_vix(batch: &RecordBatch, data_dir: &Path) -> Result<PathBuf> {
    let path = vix_path(data_dir);
    parquet_utils::write_batch(batch, &path)?;
    Ok(path)
}
