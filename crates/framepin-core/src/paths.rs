//! Filesystem locations used by framepin.

use dirs::home_dir;
use std::path::{Path, PathBuf};

/// Returns the framepin home directory, or None if the user's home cannot be resolved.
///
/// `FRAMEPIN_HOME` overrides the default of `~/.framepin`.
pub fn try_framepin_home() -> Option<PathBuf> {
    if let Ok(val) = std::env::var("FRAMEPIN_HOME") {
        return Some(PathBuf::from(val));
    }
    home_dir().map(|h| h.join(".framepin"))
}

/// Unpacked modules: `<home>/store`
pub fn store_dir(home: &Path) -> PathBuf {
    home.join("store")
}

/// Verified archives keyed by checksum: `<home>/cache`
pub fn cache_dir(home: &Path) -> PathBuf {
    home.join("cache")
}

/// Extract the filename from a URL.
pub fn filename_from_url(url: &str) -> &str {
    url.split('/').next_back().unwrap_or("")
}
