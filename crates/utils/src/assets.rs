use std::{env, path::PathBuf};

use directories::ProjectDirs;

const PROJECT_ROOT: &str = env!("CARGO_MANIFEST_DIR");
const ASSET_DIR_ENV: &str = "PIPELINE_ASSET_DIR";

/// Directory holding the usage database and other local state.
///
/// `PIPELINE_ASSET_DIR` wins; debug builds use `dev_assets/` at the
/// workspace root; release builds use the platform data directory.
pub fn asset_dir() -> PathBuf {
    if let Ok(custom_dir) = env::var(ASSET_DIR_ENV) {
        PathBuf::from(custom_dir)
    } else if cfg!(debug_assertions) {
        PathBuf::from(PROJECT_ROOT).join("../../dev_assets")
    } else {
        ProjectDirs::from("io", "content-pipeline", "content-pipeline")
            .map(|dirs| dirs.data_dir().to_path_buf())
            .unwrap_or_else(|| PathBuf::from(".content-pipeline"))
    }
}

/// [`asset_dir`], created if missing
pub fn ensure_asset_dir() -> std::io::Result<PathBuf> {
    let path = asset_dir();
    if !path.exists() {
        std::fs::create_dir_all(&path)?;
        tracing::info!("Created asset directory: {}", path.display());
    }
    Ok(path)
}

pub fn database_path() -> PathBuf {
    asset_dir().join("usage.sqlite")
}
