// 公开导出的模块，供外部使用
pub mod models;
pub mod data_provider;
pub mod errors;
pub mod config;
pub mod services;
pub mod sources;

#[doc(hidden)]
pub mod util;

// 重新导出常用类型，方便使用
pub use models::stock::DailyStockRecord;
pub use models::vix::VixObservation;
pub use data_provider::PulledDataProvider;
pub use config::Config;
pub use errors::{Result, DataHubError};
