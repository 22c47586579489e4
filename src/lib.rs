pub mod api;
pub mod pipeline;

use std::path::PathBuf;

/// App root for config and `.env` lookup: `HAIRLAB_APP_ROOT` when set,
/// otherwise the working directory.
pub fn default_app_root() -> PathBuf {
    std::env::var_os("HAIRLAB_APP_ROOT")
        .map(PathBuf::from)
        .filter(|p| !p.as_os_str().is_empty())
        .or_else(|| std::env::current_dir().ok())
        .unwrap_or_else(|| PathBuf::from("."))
}
