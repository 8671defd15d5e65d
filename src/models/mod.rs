pub mod stock;
pub mod vix;
