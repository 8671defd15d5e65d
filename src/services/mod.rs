use std::path::{Path, PathBuf};

pub mod crsp_stock;
pub mod vix;

/// Subdirectory of the data directory holding pulled snapshots.
pub const PULLED_DIR: &str = "pulled";

pub fn pulled_path(data_dir: &Path, file_name: &str) -> PathBuf {
    data_dir.join(PULLED_DIR).join(file_name)
}
