use crate::errors::{DataHubError, Result};
use chrono::Utc;
use chrono_tz::America::New_York;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_DATA_DIR: &str = "data";
pub const DEFAULT_START_DATE: &str = "2000-01-01";
/// Months of history pulled ahead of the requested CRSP start date, so the
/// first requested month has a prior-period market cap.
pub const DEFAULT_LOOKBACK_MONTHS: u32 = 1;

/// Process-wide settings, built once in `main` and passed to every pull/load.
#[derive(Debug, Clone)]
pub struct Config {
    pub data_dir: PathBuf,
    pub wrds_username: String,
    pub wrds_password: Option<String>,
    pub start_date: String,
    pub end_date: String,
    pub lookback_months: u32,
    pub http_timeout: Option<Duration>,
}

impl Config {
    pub fn new() -> Self {
        Self {
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            wrds_username: String::new(),
            wrds_password: None,
            start_date: DEFAULT_START_DATE.to_string(),
            end_date: today_in_new_york(),
            lookback_months: DEFAULT_LOOKBACK_MONTHS,
            http_timeout: None,
        }
    }

    /// Reads `DATA_DIR`, `WRDS_USERNAME`, `WRDS_PASSWORD`, `START_DATE`,
    /// `END_DATE` and `LOOKBACK_MONTHS`; unset variables keep the defaults.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::new();

        if let Ok(dir) = env::var("DATA_DIR") {
            config = config.with_data_dir(dir);
        }
        if let Ok(username) = env::var("WRDS_USERNAME") {
            config = config.with_wrds_username(&username);
        }
        if let Ok(password) = env::var("WRDS_PASSWORD") {
            config = config.with_wrds_password(&password);
        }
        if let Ok(start) = env::var("START_DATE") {
            config = config.with_start_date(&start);
        }
        if let Ok(end) = env::var("END_DATE") {
            config = config.with_end_date(&end);
        }
        if let Ok(months) = env::var("LOOKBACK_MONTHS") {
            let months = months.trim().parse::<u32>().map_err(|e| {
                DataHubError::ConfigError(format!("LOOKBACK_MONTHS={}: {}", months, e))
            })?;
            config = config.with_lookback_months(months);
        }

        Ok(config)
    }

    pub fn with_data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.data_dir = dir.into();
        self
    }

    pub fn with_wrds_username(mut self, username: &str) -> Self {
        self.wrds_username = username.to_string();
        self
    }

    pub fn with_wrds_password(mut self, password: &str) -> Self {
        self.wrds_password = Some(password.to_string());
        self
    }

    pub fn with_start_date(mut self, date: &str) -> Self {
        self.start_date = date.to_string();
        self
    }

    pub fn with_end_date(mut self, date: &str) -> Self {
        self.end_date = date.to_string();
        self
    }

    pub fn with_lookback_months(mut self, months: u32) -> Self {
        self.lookback_months = months;
        self
    }

    pub fn with_http_timeout(mut self, timeout: Duration) -> Self {
        self.http_timeout = Some(timeout);
        self
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

fn today_in_new_york() -> String {
    Utc::now()
        .with_timezone(&New_York)
        .format("%Y-%m-%d")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn defaults_are_iso_dates() {
        let config = Config::new();
        assert_eq!(config.data_dir, PathBuf::from("data"));
        assert_eq!(config.lookback_months, 1);
        assert!(config.http_timeout.is_none());
        assert!(NaiveDate::parse_from_str(&config.start_date, "%Y-%m-%d").is_ok());
        assert!(NaiveDate::parse_from_str(&config.end_date, "%Y-%m-%d").is_ok());
    }

    #[test]
    fn builders_override_fields() {
        let config = Config::new()
            .with_data_dir("/tmp/research")
            .with_wrds_username("jdoe")
            .with_start_date("2020-03-15")
            .with_end_date("2020-12-31")
            .with_lookback_months(3)
            .with_http_timeout(Duration::from_secs(5));

        assert_eq!(config.data_dir(), Path::new("/tmp/research"));
        assert_eq!(config.wrds_username, "jdoe");
        assert_eq!(config.start_date, "2020-03-15");
        assert_eq!(config.end_date, "2020-12-31");
        assert_eq!(config.lookback_months, 3);
        assert_eq!(config.http_timeout, Some(Duration::from_secs(5)));
    }
}
