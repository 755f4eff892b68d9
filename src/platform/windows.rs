use std::path::{Path, PathBuf};

use super::{Platform, resolve_data_dir};

pub struct NativePlatform;

impl Platform for NativePlatform {
    fn restrict_dir_permissions(_path: &Path) {}

    fn restrict_file_permissions(_path: &Path) {}

    fn data_dir() -> PathBuf {
        let base = dirs::data_dir().unwrap_or_else(|| PathBuf::from("."));
        resolve_data_dir(base.join("runmirror"))
    }
}
