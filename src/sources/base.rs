use crate::errors::Result;
use arrow::record_batch::RecordBatch;
use async_trait::async_trait;
use chrono::NaiveDate;

/// A remote table that can be pulled for an inclusive date range.
#[async_trait]
pub trait RemoteSource {
    /// Short name used in log lines
    fn source_name(&self) -> &'static str;

    /// Fetch every row dated within `[start, end]`.
    /// One call is one remote query; nothing is retried.
    async fn fetch(&self, start: NaiveDate, end: NaiveDate) -> Result<RecordBatch>;
}
