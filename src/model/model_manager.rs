use crate::{
    error::{Result, StemError},
    io::{
        crypto::verify_sha256,
        net::{download_with_progress, http_client},
        paths::{ensure_dir, models_cache_dir},
    },
    model::registry::resolve_manifest_url,
    types::ModelManifest,
};

use std::{fs, path::{Path, PathBuf}};
use tracing::{info, warn};

/// A manifest together with the verified local copy of its weights.
#[derive(Clone, Debug)]
pub struct ModelHandle {
    pub manifest: ModelManifest,
    pub local_path: PathBuf,
}

/// Resolves and caches `model_name` under the per-user cache directory.
pub fn ensure_model(model_name: &str, manifest_url_override: Option<&str>) -> Result<ModelHandle> {
    ensure_model_in(&models_cache_dir()?, model_name, manifest_url_override)
}

/// Fetches the manifest, then reuses the cached artifact when its checksum still matches
/// and downloads it otherwise.
pub fn ensure_model_in(
    cache_dir: &Path,
    model_name: &str,
    manifest_url_override: Option<&str>,
) -> Result<ModelHandle> {
    let manifest_url = match manifest_url_override {
        Some(url) => url.to_string(),
        None => resolve_manifest_url(model_name)?,
    };

    let client = http_client()?;
    let manifest: ModelManifest = client
        .get(&manifest_url)
        .send()?
        .error_for_status()?
        .json()?;

    let a = manifest
        .resolve_primary_artifact()
        .map_err(StemError::Manifest)?;

    ensure_dir(cache_dir)?;
    let ext = Path::new(&a.file)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| format!(".{e}"))
        .unwrap_or_default();
    let short_sha = a
        .sha256
        .get(..8)
        .ok_or_else(|| StemError::Manifest(format!("artifact `{}` has a malformed sha256", a.file)))?;
    let local_path = cache_dir.join(format!("{}-{}{}", manifest.name, short_sha, ext));

    if matches!(verify_sha256(&local_path, &a.sha256), Ok(true)) {
        info!(model = %manifest.name, path = %local_path.display(), "using cached model");
    } else {
        info!(model = %manifest.name, url = %a.url, "downloading model");
        download_with_progress(&client, &a.url, &local_path)?;
        if !verify_sha256(&local_path, &a.sha256)? {
            return Err(StemError::Checksum {
                path: local_path.display().to_string(),
            });
        }
        if a.size_bytes > 0 {
            let size = fs::metadata(&local_path).map(|m| m.len()).unwrap_or(0);
            if size != a.size_bytes {
                warn!(
                    path = %local_path.display(),
                    expected = a.size_bytes,
                    got = size,
                    "model size differs from manifest"
                );
            }
        }
    }

    Ok(ModelHandle {
        manifest,
        local_path,
    })
}
