use chrono::NaiveDate;
use log::info;

use crate::errors::Result;
use crate::models::stock::DailyStockRecord;
use crate::models::vix::VixObservation;
use crate::services::{crsp_stock, vix};
use crate::util::arrow_utils;
use std::collections::HashMap;
use std::path::Path;

/// Typed, indexed view over the pulled snapshots.
///
/// Either snapshot may be absent; that is reported through
/// [`has_stock_data`](Self::has_stock_data) / [`has_vix_data`](Self::has_vix_data)
/// rather than by pretending the table is empty.
pub struct PulledDataProvider {
    stocks: Option<Vec<DailyStockRecord>>,
    vix: Option<Vec<VixObservation>>,
    // 索引用于快速查找
    permno_index: HashMap<i64, Vec<usize>>,
    vix_index: HashMap<NaiveDate, usize>,
}

impl PulledDataProvider {
    /// Loads whichever of `pulled/CRSP_stock.parquet` and `pulled/vix.parquet`
    /// exist under `data_dir`. A file that exists but cannot be read is an error.
    pub fn load(data_dir: &Path) -> Result<Self> {
        let stocks = if crsp_stock::crsp_stock_path(data_dir).exists() {
            let batch = crsp_stock::load_crsp_daily_file(data_dir)?;
            Some(arrow_utils::stock_records_from_batch(&batch)?)
        } else {
            info!("No CRSP stock snapshot under {}", data_dir.display());
            None
        };

        let vix = if vix::vix_path(data_dir).exists() {
            let batch = vix::load_vix(data_dir)?;
            Some(arrow_utils::vix_from_batch(&batch)?)
        } else {
            info!("No VIX snapshot under {}", data_dir.display());
            None
        };

        Ok(Self::new_with_data(stocks, vix))
    }

    /// 使用提供的数据创建新的数据提供者实例
    pub fn new_with_data(
        stocks: Option<Vec<DailyStockRecord>>,
        vix: Option<Vec<VixObservation>>,
    ) -> Self {
        let mut provider = Self {
            stocks,
            vix,
            permno_index: HashMap::new(),
            vix_index: HashMap::new(),
        };

        provider.rebuild_indices();

        provider
    }

    pub fn has_stock_data(&self) -> bool {
        self.stocks.is_some()
    }

    pub fn has_vix_data(&self) -> bool {
        self.vix.is_some()
    }

    pub fn get_all_stocks(&self) -> &[DailyStockRecord] {
        self.stocks.as_deref().unwrap_or_default()
    }

    /// All rows of one security, in file order.
    pub fn get_stock_history(&self, permno: i64) -> Vec<&DailyStockRecord> {
        let stocks = self.get_all_stocks();
        self.permno_index.get(&permno)
            .map(|indices| indices.iter().map(|&idx| &stocks[idx]).collect())
            .unwrap_or_default()
    }

    pub fn get_permnos(&self) -> Vec<i64> {
        let mut permnos: Vec<i64> = self.permno_index.keys().copied().collect();
        permnos.sort_unstable();
        permnos
    }

    pub fn get_latest_trading_date(&self) -> Option<NaiveDate> {
        self.get_all_stocks().iter().map(|r| r.date).max()
    }

    pub fn get_vix_observations(&self) -> &[VixObservation] {
        self.vix.as_deref().unwrap_or_default()
    }

    /// `None` when the date is absent or FRED published no value for it.
    pub fn get_vix_on(&self, date: &NaiveDate) -> Option<f64> {
        self.vix_index.get(date)
            .and_then(|&idx| self.get_vix_observations()[idx].value)
    }

    /// 重建索引
    fn rebuild_indices(&mut self) {
        self.permno_index.clear();
        self.vix_index.clear();

        let stocks = self.stocks.as_deref().unwrap_or_default();
        for (i, record) in stocks.iter().enumerate() {
            self.permno_index
                .entry(record.permno)
                .or_insert_with(Vec::new)
                .push(i);
        }

        for (i, obs) in self.vix.as_deref().unwrap_or_default().iter().enumerate() {
            self.vix_index.insert(obs.date, i);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn record(permno: i64, date: NaiveDate) -> DailyStockRecord {
        DailyStockRecord {
            date,
            permno,
            permco: permno + 1,
            exchcd: 1,
            prc: Some(10.0),
            bid: None,
            ask: None,
            shrout: Some(5_000.0),
            cfacpr: Some(1.0),
            cfacshr: Some(1.0),
            ret: Some(0.01),
            retx: Some(0.01),
        }
    }

    #[test]
    fn indexes_by_permno_and_date() {
        let provider = PulledDataProvider::new_with_data(
            Some(vec![
                record(10001, ymd(2020, 3, 2)),
                record(10002, ymd(2020, 3, 2)),
                record(10001, ymd(2020, 3, 3)),
            ]),
            Some(vec![
                VixObservation { date: ymd(2020, 3, 2), value: Some(33.42) },
                VixObservation { date: ymd(2020, 3, 3), value: None },
            ]),
        );

        assert_eq!(provider.get_stock_history(10001).len(), 2);
        assert!(provider.get_stock_history(99999).is_empty());
        assert_eq!(provider.get_permnos(), vec![10001, 10002]);
        assert_eq!(provider.get_latest_trading_date(), Some(ymd(2020, 3, 3)));
        assert_eq!(provider.get_vix_on(&ymd(2020, 3, 2)), Some(33.42));
        assert_eq!(provider.get_vix_on(&ymd(2020, 3, 3)), None);
    }

    #[test]
    fn absent_snapshots_are_reported() {
        let provider = PulledDataProvider::new_with_data(None, None);
        assert!(!provider.has_stock_data());
        assert!(!provider.has_vix_data());
        assert!(provider.get_all_stocks().is_empty());
        assert_eq!(provider.get_latest_trading_date(), None);
    }
}
