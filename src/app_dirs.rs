//! Application directory paths.
//!
//! Uses the [`dirs`] crate for platform-appropriate directory resolution.
//!
//! # Environment Overrides
//!
//! - `VOXCHAT_DATA_DIR`: overrides [`data_dir`]
//! - `VOXCHAT_CONFIG_DIR`: overrides [`config_dir`]

use std::ffi::OsString;
use std::path::PathBuf;

const APP_DIR_NAME: &str = "voxchat";

fn resolve_dir(
    override_dir: Option<OsString>,
    platform_dir: Option<PathBuf>,
    fallback: &str,
) -> PathBuf {
    if let Some(dir) = override_dir {
        return PathBuf::from(dir);
    }
    platform_dir
        .map(|d| d.join(APP_DIR_NAME))
        .unwrap_or_else(|| PathBuf::from(fallback))
}

/// Application data root directory.
///
/// Holds the filesystem-backed session cache. Resolves to
/// `dirs::data_dir()/voxchat/` unless `VOXCHAT_DATA_DIR` is set.
#[must_use]
pub fn data_dir() -> PathBuf {
    resolve_dir(
        std::env::var_os("VOXCHAT_DATA_DIR"),
        dirs::data_dir(),
        "/tmp/voxchat-data",
    )
}

/// Application config directory.
///
/// Resolves to `dirs::config_dir()/voxchat/` unless `VOXCHAT_CONFIG_DIR` is set.
#[must_use]
pub fn config_dir() -> PathBuf {
    resolve_dir(
        std::env::var_os("VOXCHAT_CONFIG_DIR"),
        dirs::config_dir(),
        "/tmp/voxchat-config",
    )
}

/// Main config file path (`config_dir()/config.toml`).
#[must_use]
pub fn config_file() -> PathBuf {
    config_dir().join("config.toml")
}

/// Default directory for the filesystem key-value store (`data_dir()/cache/`).
#[must_use]
pub fn cache_store_dir() -> PathBuf {
    data_dir().join("cache")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn override_wins_over_platform_dir() {
        let dir = resolve_dir(
            Some(OsString::from("/custom/data")),
            Some(PathBuf::from("/home/u/.local/share")),
            "/tmp/x",
        );
        assert_eq!(dir, PathBuf::from("/custom/data"));
    }

    #[test]
    fn platform_dir_gets_app_suffix() {
        let dir = resolve_dir(None, Some(PathBuf::from("/home/u/.config")), "/tmp/x");
        assert_eq!(dir, PathBuf::from("/home/u/.config/voxchat"));
    }

    #[test]
    fn fallback_when_nothing_resolves() {
        let dir = resolve_dir(None, None, "/tmp/voxchat-data");
        assert_eq!(dir, PathBuf::from("/tmp/voxchat-data"));
    }

    #[test]
    fn config_file_ends_with_config_toml() {
        let path = config_file();
        let s = path.to_string_lossy();
        assert!(s.ends_with("config.toml"), "config_file: {s}");
    }

    #[test]
    fn cache_store_dir_is_subpath_of_data_dir() {
        assert!(cache_store_dir().starts_with(data_dir()));
    }
}
