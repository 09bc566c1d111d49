use std::path::{Path, PathBuf};

pub const DATA_DIR_ENV: &str = "AGENTGATE_DATA_DIR";

/// Platform-specific operations abstracted behind a common interface.
/// Each OS provides its own `NativePlatform` implementation so call sites
/// remain free of `#[cfg]` blocks.
pub trait Platform {
    /// Set restrictive *directory* permissions (0o700 on Unix, no-op on Windows).
    fn restrict_dir_permissions(path: &Path);

    /// Set restrictive *file* permissions (0o600 on Unix, no-op on Windows).
    fn restrict_file_permissions(path: &Path);

    /// Root data directory.
    /// Unix: `~/.agentgate`, Windows: `%APPDATA%\agentgate`.
    fn data_dir() -> PathBuf;
}

/// `$AGENTGATE_DATA_DIR` wins over the platform default when set.
pub(crate) fn resolve_data_dir(default: PathBuf) -> PathBuf {
    resolve_data_dir_from(std::env::var(DATA_DIR_ENV).ok(), default)
}

fn resolve_data_dir_from(env_value: Option<String>, default: PathBuf) -> PathBuf {
    match env_value {
        Some(dir) if !dir.trim().is_empty() => PathBuf::from(dir.trim()),
        _ => default,
    }
}

#[cfg(unix)]
mod unix;
#[cfg(unix)]
pub use unix::NativePlatform;

#[cfg(windows)]
mod windows;
#[cfg(windows)]
pub use windows::NativePlatform;
