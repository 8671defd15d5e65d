use chrono::{Months, NaiveDate};
use log::debug;
use crate::errors::{Result, DataHubError};

pub const ISO_DATE_FORMAT: &str = "%Y-%m-%d";

// 日期转换工具
pub fn parse_iso_date(date_str: &str) -> Result<NaiveDate> {
    Ok(NaiveDate::parse_from_str(date_str.trim(), ISO_DATE_FORMAT)?)
}

pub fn format_iso_date(date: &NaiveDate) -> String {
    date.format(ISO_DATE_FORMAT).to_string()
}

/// Calendar-month subtraction; the day is clamped to the end of the target
/// month (`2020-03-31` minus one month is `2020-02-29`).
pub fn subtract_months(date: NaiveDate, months: u32) -> Result<NaiveDate> {
    date.checked_sub_months(Months::new(months))
        .ok_or_else(|| DataHubError::DataError(format!(
            "Cannot subtract {} months from {}", months, date
        )))
}

/// Effective start of a pull that carries `lookback_months` of extra history.
pub fn lookback_start(start_date: &str, lookback_months: u32) -> Result<NaiveDate> {
    let requested = parse_iso_date(start_date)?;
    let effective = subtract_months(requested, lookback_months)?;
    debug!("Requested start {} widened to {} ({} month lookback)",
           requested, effective, lookback_months);
    Ok(effective)
}

// Arrow数据转换工具
pub mod arrow_utils {
    use super::*;
    use crate::models::stock::{self, DailyStockRecord};
    use crate::models::vix::{self, VixObservation};
    use arrow_array::{Array, ArrayRef, Date32Array, Float64Array, Int64Array};
    use arrow_array::types::{Date32Type, Float64Type};
    use arrow::record_batch::RecordBatch;
    use std::collections::HashSet;
    use std::sync::Arc;

    pub fn date32_from_naive(date: NaiveDate) -> i32 {
        Date32Type::from_naive_date(date)
    }

    pub fn naive_from_date32(days: i32) -> NaiveDate {
        Date32Type::to_naive_date(days)
    }

    /// Keeps the first column of every name and drops later repeats.
    pub fn drop_duplicate_columns(batch: &RecordBatch) -> Result<RecordBatch> {
        let schema = batch.schema();
        let mut seen = HashSet::new();
        let keep: Vec<usize> = schema
            .fields()
            .iter()
            .enumerate()
            .filter(|(_, field)| seen.insert(field.name().clone()))
            .map(|(i, _)| i)
            .collect();

        if keep.len() < schema.fields().len() {
            debug!("Dropping {} duplicate column(s)", schema.fields().len() - keep.len());
        }

        Ok(batch.project(&keep)?)
    }

    /// Multiplies a Float64 column by `factor`, leaving nulls in place. When
    /// the name repeats, the first column is the one scaled.
    pub fn scale_column(batch: &RecordBatch, name: &str, factor: f64) -> Result<RecordBatch> {
        let schema = batch.schema();
        let index = schema.index_of(name)?;
        let values = batch.column(index).as_any().downcast_ref::<Float64Array>()
            .ok_or_else(|| DataHubError::DataError(format!(
                "Column {} is {}, expected Float64", name, batch.column(index).data_type()
            )))?;

        let scaled: Float64Array = values.unary::<_, Float64Type>(|v| v * factor);

        let mut columns = batch.columns().to_vec();
        columns[index] = Arc::new(scaled);
        Ok(RecordBatch::try_new(schema, columns)?)
    }

    fn column<'a, T: Array + 'static>(batch: &'a RecordBatch, name: &str) -> Result<&'a T> {
        batch.column_by_name(name)
            .ok_or_else(|| DataHubError::DataError(format!("Missing column {}", name)))?
            .as_any()
            .downcast_ref::<T>()
            .ok_or_else(|| DataHubError::DataError(format!("Failed to downcast {} column", name)))
    }

    fn optional(array: &Float64Array, i: usize) -> Option<f64> {
        if array.is_null(i) { None } else { Some(array.value(i)) }
    }

    fn required(array: &Int64Array, i: usize, name: &str) -> Result<i64> {
        if array.is_null(i) {
            return Err(DataHubError::DataError(format!("Null {} at row {}", name, i)));
        }
        Ok(array.value(i))
    }

    pub fn stock_records_to_batch(records: &[DailyStockRecord]) -> Result<RecordBatch> {
        let floats = |f: fn(&DailyStockRecord) -> Option<f64>| -> ArrayRef {
            Arc::new(records.iter().map(f).collect::<Float64Array>())
        };

        let columns: Vec<ArrayRef> = vec![
            Arc::new(Date32Array::from_iter_values(records.iter().map(|r| date32_from_naive(r.date)))),
            Arc::new(Int64Array::from_iter_values(records.iter().map(|r| r.permno))),
            Arc::new(Int64Array::from_iter_values(records.iter().map(|r| r.permco))),
            Arc::new(Int64Array::from_iter_values(records.iter().map(|r| r.exchcd))),
            floats(|r| r.prc),
            floats(|r| r.bid),
            floats(|r| r.ask),
            floats(|r| r.shrout),
            floats(|r| r.cfacpr),
            floats(|r| r.cfacshr),
            floats(|r| r.ret),
            floats(|r| r.retx),
        ];

        Ok(RecordBatch::try_new(Arc::new(stock::stock_schema()), columns)?)
    }

    pub fn stock_records_from_batch(batch: &RecordBatch) -> Result<Vec<DailyStockRecord>> {
        let date = column::<Date32Array>(batch, stock::DATE)?;
        let permno = column::<Int64Array>(batch, stock::PERMNO)?;
        let permco = column::<Int64Array>(batch, stock::PERMCO)?;
        let exchcd = column::<Int64Array>(batch, stock::EXCHCD)?;
        let prc = column::<Float64Array>(batch, stock::PRC)?;
        let bid = column::<Float64Array>(batch, stock::BID)?;
        let ask = column::<Float64Array>(batch, stock::ASK)?;
        let shrout = column::<Float64Array>(batch, stock::SHROUT)?;
        let cfacpr = column::<Float64Array>(batch, stock::CFACPR)?;
        let cfacshr = column::<Float64Array>(batch, stock::CFACSHR)?;
        let ret = column::<Float64Array>(batch, stock::RET)?;
        let retx = column::<Float64Array>(batch, stock::RETX)?;

        let mut records = Vec::with_capacity(batch.num_rows());
        for i in 0..batch.num_rows() {
            if date.is_null(i) {
                return Err(DataHubError::DataError(format!("Null date at row {}", i)));
            }
            records.push(DailyStockRecord {
                date: naive_from_date32(date.value(i)),
                permno: required(permno, i, stock::PERMNO)?,
                permco: required(permco, i, stock::PERMCO)?,
                exchcd: required(exchcd, i, stock::EXCHCD)?,
                prc: optional(prc, i),
                bid: optional(bid, i),
                ask: optional(ask, i),
                shrout: optional(shrout, i),
                cfacpr: optional(cfacpr, i),
                cfacshr: optional(cfacshr, i),
                ret: optional(ret, i),
                retx: optional(retx, i),
            });
        }

        Ok(records)
    }

    pub fn vix_to_batch(series_id: &str, observations: &[VixObservation]) -> Result<RecordBatch> {
        let dates = Date32Array::from_iter_values(observations.iter().map(|o| date32_from_naive(o.date)));
        let values: Float64Array = observations.iter().map(|o| o.value).collect();

        Ok(RecordBatch::try_new(
            Arc::new(vix::series_schema(series_id)),
            vec![Arc::new(dates), Arc::new(values)],
        )?)
    }

    /// Reads the date column and the first value column, whatever the series id.
    pub fn vix_from_batch(batch: &RecordBatch) -> Result<Vec<VixObservation>> {
        let date = column::<Date32Array>(batch, vix::DATE)?;
        let value_index = batch.schema()
            .fields()
            .iter()
            .position(|f| f.name() != vix::DATE)
            .ok_or_else(|| DataHubError::DataError("Missing series value column".to_string()))?;
        let value = batch.column(value_index).as_any().downcast_ref::<Float64Array>()
            .ok_or_else(|| DataHubError::DataError("Failed to downcast series value column".to_string()))?;

        Ok((0..batch.num_rows())
            .filter(|&i| !date.is_null(i))
            .map(|i| VixObservation {
                date: naive_from_date32(date.value(i)),
                value: optional(value, i),
            })
            .collect())
    }
}

// Parquet读写工具
pub mod parquet_utils {
    use super::*;
    use arrow::compute::concat_batches;
    use arrow::record_batch::RecordBatch;
    use log::{info, warn};
    use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
    use parquet::arrow::ArrowWriter;
    use std::fs::{self, File};
    use std::path::Path;

    /// Replaces `path` with `batch`. The data is written to a sibling
    /// `.tmp` file first and renamed over the target once complete; a failed
    /// write removes the temporary file and leaves the target untouched.
    pub fn write_batch(batch: &RecordBatch, path: &Path) -> Result<()> {
        // 确保目录存在
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent)?;
            }
        }

        info!("Saving {} rows x {} columns to {}",
              batch.num_rows(), batch.num_columns(), path.display());

        let tmp_path = path.with_extension("parquet.tmp");
        let written = (|| -> Result<()> {
            let file = File::create(&tmp_path)?;
            let mut writer = ArrowWriter::try_new(file, batch.schema(), None)?;
            writer.write(batch)?;
            writer.close()?;
            fs::rename(&tmp_path, path)?;
            Ok(())
        })();

        if written.is_err() && tmp_path.exists() {
            if let Err(e) = fs::remove_file(&tmp_path) {
                warn!("Failed to remove {}: {}", tmp_path.display(), e);
            }
        }
        written
    }

    /// Reads every row group of `path` into one batch. A missing file is an
    /// error, never an empty table.
    pub fn read_batch(path: &Path) -> Result<RecordBatch> {
        let file = File::open(path)?;
        let builder = ParquetRecordBatchReaderBuilder::try_new(file)?;
        let schema = builder.schema().clone();
        let reader = builder.build()?;

        let batches = reader.collect::<std::result::Result<Vec<_>, _>>()?;
        let batch = concat_batches(&schema, &batches)?;
        debug!("Loaded {} rows from {}", batch.num_rows(), path.display());
        Ok(batch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::arrow_utils::*;
    use super::parquet_utils;
    use arrow::array::{Array, Float64Array, Int64Array, RunArray};
    use arrow::datatypes::Int32Type;
    use arrow::datatypes::{DataType, Field, Schema};
    use arrow::record_batch::RecordBatch;
    use chrono::Datelike;
    use proptest::prelude::*;
    use std::sync::Arc;

    fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn lookback_mid_month_keeps_day() {
        assert_eq!(lookback_start("2020-03-15", 1).unwrap(), ymd(2020, 2, 15));
    }

    #[test]
    fn lookback_clamps_to_month_end() {
        assert_eq!(lookback_start("2020-03-31", 1).unwrap(), ymd(2020, 2, 29));
        assert_eq!(lookback_start("2021-03-31", 1).unwrap(), ymd(2021, 2, 28));
        assert_eq!(lookback_start("2020-05-31", 1).unwrap(), ymd(2020, 4, 30));
    }

    #[test]
    fn lookback_crosses_year_boundary() {
        assert_eq!(lookback_start("2020-01-10", 1).unwrap(), ymd(2019, 12, 10));
    }

    #[test]
    fn zero_lookback_is_identity() {
        assert_eq!(lookback_start("2020-03-31", 0).unwrap(), ymd(2020, 3, 31));
    }

    #[test]
    fn unparseable_start_is_date_error() {
        assert!(matches!(lookback_start("03/15/2020", 1), Err(DataHubError::DateError(_))));
        assert!(matches!(lookback_start("2020-02-30", 1), Err(DataHubError::DateError(_))));
    }

    proptest! {
        #[test]
        fn lookback_is_one_calendar_month(days in 0i64..40_000) {
            let start = ymd(1926, 1, 1) + chrono::Duration::days(days);
            let effective = subtract_months(start, 1).unwrap();

            let (y, m) = if start.month0() == 0 {
                (start.year() - 1, 12)
            } else {
                (start.year(), start.month0())
            };
            prop_assert_eq!(effective.year(), y);
            prop_assert_eq!(effective.month(), m);
            prop_assert!(effective.day() <= start.day());
            if effective.day() < start.day() {
                // clamped: must be the last day of its month
                prop_assert_eq!(effective.succ_opt().unwrap().day(), 1);
            }
        }
    }

    fn batch_with_duplicates() -> RecordBatch {
        let schema = Schema::new(vec![
            Field::new("permno", DataType::Int64, false),
            Field::new("shrout", DataType::Float64, true),
            Field::new("permno", DataType::Int64, false),
        ]);
        RecordBatch::try_new(
            Arc::new(schema),
            vec![
                Arc::new(Int64Array::from(vec![10001, 10002])),
                Arc::new(Float64Array::from(vec![Some(1.5), None])),
                Arc::new(Int64Array::from(vec![99, 98])),
            ],
        )
        .unwrap()
    }

    #[test]
    fn duplicate_columns_keep_first() {
        let deduped = drop_duplicate_columns(&batch_with_duplicates()).unwrap();
        let names: Vec<&str> = deduped.schema_ref().fields().iter().map(|f| f.name().as_str()).collect();
        assert_eq!(names, vec!["permno", "shrout"]);

        let permno = deduped.column(0).as_any().downcast_ref::<Int64Array>().unwrap();
        assert_eq!(permno.values().to_vec(), vec![10001, 10002]);
    }

    #[test]
    fn scale_column_multiplies_and_keeps_nulls() {
        let scaled = scale_column(&batch_with_duplicates(), "shrout", 1000.0).unwrap();
        let shrout = scaled.column(1).as_any().downcast_ref::<Float64Array>().unwrap();
        assert_eq!(shrout.value(0), 1500.0);
        assert!(shrout.is_null(1));
    }

    #[test]
    fn scale_column_rejects_non_float() {
        assert!(matches!(
            scale_column(&batch_with_duplicates(), "permno", 1000.0),
            Err(DataHubError::DataError(_))
        ));
        assert!(scale_column(&batch_with_duplicates(), "missing", 1000.0).is_err());
    }

    #[test]
    fn failed_write_leaves_no_temp_file() {
        // run-end encoded columns have no parquet mapping
        let codes: RunArray<Int32Type> = vec!["NYSE", "NYSE", "AMEX"].into_iter().collect();
        let schema = Schema::new(vec![Field::new("exchange", codes.data_type().clone(), true)]);
        let batch = RecordBatch::try_new(Arc::new(schema), vec![Arc::new(codes)]).unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pulled").join("CRSP_stock.parquet");

        assert!(parquet_utils::write_batch(&batch, &path).is_err());
        assert!(!path.exists());
        assert!(!path.with_extension("parquet.tmp").exists());
    }
}
