use arrow_schema::{DataType, Field, Schema};
use chrono::NaiveDate;
use serde::Serialize;

pub const VIX_SERIES_ID: &str = "VIXCLS";
pub const DATE: &str = "date";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VixObservation {
    pub date: NaiveDate,
    /// `None` on days FRED publishes no close.
    pub value: Option<f64>,
}

/// Date-indexed single-value table; the value column is named after the series.
pub fn series_schema(series_id: &str) -> Schema {
    Schema::new(vec![
        Field::new(DATE, DataType::Date32, false),
        Field::new(series_id, DataType::Float64, true),
    ])
}
