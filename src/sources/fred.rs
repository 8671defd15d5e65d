use crate::errors::{DataHubError, Result};
use crate::models::vix::{VixObservation, VIX_SERIES_ID};
use crate::sources::base::RemoteSource;
use crate::util::{self, arrow_utils};
use arrow::record_batch::RecordBatch;
use async_trait::async_trait;
use chrono::NaiveDate;
use log::{debug, info};
use reqwest::Client;
use std::time::Duration;

pub const FRED_GRAPH_CSV_URL: &str = "https://fred.stlouisfed.org/graph/fredgraph.csv";

/// FRED's marker for a day without an observation.
const MISSING_VALUE: &str = ".";

/// Pulls one named FRED series as a date-indexed table.
pub struct FredSource {
    client: Client,
    series_id: String,
    base_url: String,
}

impl FredSource {
    pub fn new(series_id: &str, timeout: Option<Duration>) -> Result<Self> {
        let mut builder = Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder.build()?;

        Ok(Self {
            client,
            series_id: series_id.to_string(),
            base_url: FRED_GRAPH_CSV_URL.to_string(),
        })
    }

    pub fn vix(timeout: Option<Duration>) -> Result<Self> {
        Self::new(VIX_SERIES_ID, timeout)
    }

    pub fn with_base_url(mut self, url: &str) -> Self {
        self.base_url = url.to_string();
        self
    }

    pub fn series_id(&self) -> &str {
        &self.series_id
    }
}

#[async_trait]
impl RemoteSource for FredSource {
    fn source_name(&self) -> &'static str {
        "FRED"
    }

    async fn fetch(&self, start: NaiveDate, end: NaiveDate) -> Result<RecordBatch> {
        info!("Requesting {} from FRED for {} to {}", self.series_id, start, end);

        let response = self.client
            .get(&self.base_url)
            .query(&[
                ("id", self.series_id.as_str()),
                ("cosd", util::format_iso_date(&start).as_str()),
                ("coed", util::format_iso_date(&end).as_str()),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(DataHubError::SeriesError(format!(
                "FRED returned HTTP {} for series {}", status, self.series_id
            )));
        }

        let text = response.text().await?;
        debug!("Received FRED response ({} bytes)", text.len());

        let observations = parse_series_csv(&text, &self.series_id, start, end)?;
        info!("Received {} {} observations", observations.len(), self.series_id);

        arrow_utils::vix_to_batch(&self.series_id, &observations)
    }
}

/// Parses a `fredgraph.csv` body: a date column followed by a column named
/// after the series. Rows outside `[start, end]` are dropped.
pub fn parse_series_csv(
    text: &str,
    series_id: &str,
    start: NaiveDate,
    end: NaiveDate,
) -> Result<Vec<VixObservation>> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(text.as_bytes());

    let headers = reader.headers()?.clone();
    let value_index = headers
        .iter()
        .position(|h| h.eq_ignore_ascii_case(series_id))
        .filter(|&i| i > 0)
        .ok_or_else(|| DataHubError::SeriesError(format!(
            "Series {} not recognized by FRED", series_id
        )))?;

    let mut observations = Vec::new();
    for record in reader.records() {
        let record = record?;
        let date = util::parse_iso_date(record.get(0).unwrap_or_default())?;
        if date < start || date > end {
            continue;
        }

        let raw = record.get(value_index).unwrap_or_default();
        let value = if raw.is_empty() || raw == MISSING_VALUE {
            None
        } else {
            Some(raw.parse::<f64>().map_err(|e| DataHubError::DataError(format!(
                "Bad {} value {:?} on {}: {}", series_id, raw, date, e
            )))?)
        };

        observations.push(VixObservation { date, value });
    }

    Ok(observations)
}
