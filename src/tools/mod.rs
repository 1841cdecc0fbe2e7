/// Installation of the external CLIs the provisioning steps drive
pub mod download;
pub mod packages;

use std::ffi::OsString;
use std::path::Path;

pub use download::ToolInstaller;
pub use packages::PackageManager;

/// `PATH` with `dir` placed first, so freshly downloaded tools win
pub fn path_with(dir: &Path, current: Option<OsString>) -> OsString {
    let mut paths = vec![dir.to_path_buf()];
    if let Some(current) = current {
        paths.extend(std::env::split_paths(&current).filter(|p| p != dir));
    }
    // join only fails on entries containing the separator, which split_paths cannot yield
    std::env::join_paths(paths).unwrap_or_else(|_| dir.as_os_str().to_os_string())
}
