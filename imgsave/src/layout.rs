//! Writers for the legacy `docker save` directory layout:
//!
//! ```text
//! <output>/manifest.json
//! <output>/<config-hex>.json
//! <output>/<layer-id>/VERSION
//! <output>/<layer-id>/json
//! <output>/<layer-id>/layer.tar
//! ```

use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use ociclient::{ImageConfig, ImageManifest, OciDigest};
use serde::Serialize;
use tracing::warn;

use crate::error::{DiffIdError, PullError, Result};

pub const MANIFEST_FILE: &str = "manifest.json";
pub const VERSION_FILE: &str = "VERSION";
pub const LAYER_JSON_FILE: &str = "json";
pub const LEGACY_VERSION: &str = "1.0";

/// Contents of a layer's `json` sidecar
#[derive(Debug, Serialize)]
pub struct LegacyLayerJson<'a> {
    pub id: &'a str,
    pub parent: &'a str,
}

/// Refuse output paths that exist but are not directories.
///
/// Returns whether the directory already exists.
pub fn check_output_dir(path: &Path) -> Result<bool> {
    match fs::metadata(path) {
        Ok(metadata) if metadata.is_dir() => {
            warn!("Directory {} already exists. Contents will be overwritten", path.display());
            Ok(true)
        }
        Ok(_) => Err(PullError::OutputNotDirectory(path.to_path_buf())),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(source) => Err(PullError::OutputDir {
            path: path.to_path_buf(),
            source,
        }),
    }
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> io::Result<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    serde_json::to_writer(&mut writer, value)?;
    writer.write_all(b"\n")?;
    writer.flush()
}

pub fn write_version(layer_dir: &Path) -> io::Result<()> {
    fs::write(layer_dir.join(VERSION_FILE), LEGACY_VERSION)
}

pub fn write_layer_json(layer_dir: &Path, id: &str, parent: &str) -> io::Result<()> {
    write_json(&layer_dir.join(LAYER_JSON_FILE), &LegacyLayerJson { id, parent })
}

/// Write the resolved manifest as `manifest.json` under `output_dir`.
pub fn write_manifest(output_dir: &Path, manifest: &ImageManifest) -> Result<PathBuf> {
    let path = output_dir.join(MANIFEST_FILE);
    write_json(&path, manifest).map_err(|source| PullError::WriteManifest {
        path: path.clone(),
        source,
    })?;
    Ok(path)
}

/// Read `rootfs.diff_ids` from a stored image config, in layer order.
pub fn read_diff_ids(config_path: &Path) -> std::result::Result<Vec<OciDigest>, DiffIdError> {
    let file = File::open(config_path).map_err(|source| DiffIdError::Io {
        path: config_path.to_path_buf(),
        source,
    })?;
    let config: ImageConfig = serde_json::from_reader(BufReader::new(file))?;

    config
        .diff_ids()
        .ok_or(DiffIdError::MissingDiffIds)?
        .iter()
        .map(|diff_id| {
            OciDigest::from_str(diff_id).map_err(|e| DiffIdError::InvalidDiffId {
                diff_id: diff_id.clone(),
                reason: e.to_string(),
            })
        })
        .collect()
}
