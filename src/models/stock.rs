use arrow_schema::{DataType, Field, Schema};
use chrono::NaiveDate;
use serde::Serialize;

pub const DATE: &str = "date";
pub const PERMNO: &str = "permno";
pub const PERMCO: &str = "permco";
pub const EXCHCD: &str = "exchcd";
pub const PRC: &str = "prc";
pub const BID: &str = "bid";
pub const ASK: &str = "ask";
pub const SHROUT: &str = "shrout";
pub const CFACPR: &str = "cfacpr";
pub const CFACSHR: &str = "cfacshr";
pub const RET: &str = "ret";
pub const RETX: &str = "retx";

/// CRSP reports shares outstanding in thousands.
pub const SHROUT_MULTIPLIER: f64 = 1000.0;

/// One CRSP daily stock file row after post-processing.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DailyStockRecord {
    pub date: NaiveDate,
    /// Security identifier, stable across corporate actions.
    pub permno: i64,
    /// Company identifier.
    pub permco: i64,
    pub exchcd: i64,
    /// Negative when CRSP falls back to the bid/ask midpoint.
    pub prc: Option<f64>,
    pub bid: Option<f64>,
    pub ask: Option<f64>,
    /// Raw share count.
    pub shrout: Option<f64>,
    pub cfacpr: Option<f64>,
    pub cfacshr: Option<f64>,
    pub ret: Option<f64>,
    pub retx: Option<f64>,
}

impl DailyStockRecord {
    pub fn market_cap(&self) -> Option<f64> {
        match (self.prc, self.shrout) {
            (Some(prc), Some(shrout)) => Some(prc.abs() * shrout),
            _ => None,
        }
    }
}

/// Column layout of the CRSP daily stock table, in query order. Every
/// column is nullable, as in a non-empty pull.
pub fn stock_schema() -> Schema {
    let int = |name: &str| Field::new(name, DataType::Int64, true);
    let float = |name: &str| Field::new(name, DataType::Float64, true);
    Schema::new(vec![
        Field::new(DATE, DataType::Date32, true),
        int(PERMNO),
        int(PERMCO),
        int(EXCHCD),
        float(PRC),
        float(BID),
        float(ASK),
        float(SHROUT),
        float(CFACPR),
        float(CFACSHR),
        float(RET),
        float(RETX),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(prc: Option<f64>, shrout: Option<f64>) -> DailyStockRecord {
        DailyStockRecord {
            date: NaiveDate::from_ymd_opt(2020, 3, 2).unwrap(),
            permno: 10001,
            permco: 7953,
            exchcd: 3,
            prc,
            bid: None,
            ask: None,
            shrout,
            cfacpr: Some(1.0),
            cfacshr: Some(1.0),
            ret: None,
            retx: None,
        }
    }

    #[test]
    fn market_cap_uses_absolute_price() {
        assert_eq!(record(Some(-12.5), Some(2_000.0)).market_cap(), Some(25_000.0));
        assert_eq!(record(Some(12.5), Some(2_000.0)).market_cap(), Some(25_000.0));
        assert_eq!(record(None, Some(2_000.0)).market_cap(), None);
    }

    #[test]
    fn schema_matches_query_order() {
        let names: Vec<String> = stock_schema()
            .fields()
            .iter()
            .map(|f| f.name().clone())
            .collect();
        assert_eq!(
            names,
            vec![DATE, PERMNO, PERMCO, EXCHCD, PRC, BID, ASK, SHROUT, CFACPR, CFACSHR, RET, RETX]
        );
    }

    #[test]
    fn empty_and_pulled_tables_share_nullability() {
        assert!(stock_schema().fields().iter().all(|f| f.is_nullable()));
    }
}
