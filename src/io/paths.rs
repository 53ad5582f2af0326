use crate::error::{Result, StemError};
use directories::ProjectDirs;
use std::{fs, path::{Path, PathBuf}};

/// Per-user cache directory holding downloaded model weights.
pub fn models_cache_dir() -> Result<PathBuf> {
    let proj = ProjectDirs::from("dev", "StemSplitter", "stem-splitter-web")
        .ok_or(StemError::CacheDirUnavailable)?;
    Ok(proj.cache_dir().join("models"))
}

/// `mkdir -p`; an existing directory is fine.
pub fn ensure_dir(dir: &Path) -> Result<()> {
    fs::create_dir_all(dir)?;
    Ok(())
}

/// File name without its extension, or `fallback` when the path has none.
pub fn base_name<'a>(path: &'a Path, fallback: &'a str) -> &'a str {
    path.file_stem()
        .and_then(|s| s.to_str())
        .filter(|s| !s.is_empty())
        .unwrap_or(fallback)
}
