use std::fs;
use std::path::PathBuf;

use ociclient::digest::short_hex;
use ociclient::{Client, ImageManifest};
use tracing::{debug, info, warn};

use crate::config::PullConfig;
use crate::error::{MaterializeError, PullError, Result};
use crate::layer::{LayerMaterializer, target_path};
use crate::layout;

/// What happened to one layer of the image
#[derive(Debug)]
pub struct LayerOutcome {
    pub digest: String,
    pub legacy_id: String,
    pub result: std::result::Result<u64, MaterializeError>,
}

/// Summary of a finished pull
#[derive(Debug)]
pub struct PullReport {
    pub output_dir: PathBuf,
    pub manifest: ImageManifest,
    pub config_file: PathBuf,
    pub layers: Vec<LayerOutcome>,
}

impl PullReport {
    pub fn failed_layers(&self) -> impl Iterator<Item = &LayerOutcome> {
        self.layers.iter().filter(|layer| layer.result.is_err())
    }

    pub fn is_complete(&self) -> bool {
        self.failed_layers().next().is_none()
    }
}

/// Pull `config.image` at `config.reference` into `config.output_dir`.
///
/// Authentication, manifest resolution, the image config and its diff ids
/// are required: any failure there aborts the pull. A layer that cannot be
/// downloaded is logged, recorded in the report and skipped.
pub async fn pull_image(config: &PullConfig) -> Result<PullReport> {
    let client = Client::with_timeout(config.registry_url.clone(), config.timeout)?;

    // 1. access the registry, get a 401 and exchange it for a token
    let mut auth = client.auth_session();
    let credential = auth.login(&config.image).await?;
    let session = client.new_session(config.image.clone(), credential);

    // 2. resolve the reference to a manifest for the target platform
    let manifest = session
        .resolve_manifest(&config.reference, &config.os, &config.arch)
        .await?;
    info!(
        "Resolved {}:{} with {} layers",
        session.repository(),
        config.reference,
        manifest.layers.len()
    );

    fs::create_dir_all(&config.output_dir).map_err(|source| PullError::OutputDir {
        path: config.output_dir.clone(),
        source,
    })?;

    // 3. image config, which names the layers
    let materializer = LayerMaterializer::new(&session);
    materializer
        .materialize(&manifest.config, &config.output_dir, None)
        .await
        .map_err(PullError::ConfigBlob)?;
    let config_file =
        target_path(&manifest.config, &config.output_dir, None).map_err(PullError::ConfigBlob)?;

    let diff_ids = layout::read_diff_ids(&config_file)?;
    debug!("Loaded {} layers from config json", diff_ids.len());
    if diff_ids.len() != manifest.layers.len() {
        return Err(PullError::LayerCountMismatch {
            expected: manifest.layers.len(),
            found: diff_ids.len(),
        });
    }

    // 4. layers, base first, each pointing at its predecessor
    let mut layers = Vec::with_capacity(manifest.layers.len());
    let mut parent = String::new();
    for (index, (layer, diff_id)) in manifest.layers.iter().zip(&diff_ids).enumerate() {
        let legacy_id = diff_id.hex().to_string();
        info!(
            "Downloading layer {}/{} ({})",
            index + 1,
            manifest.layers.len(),
            short_hex(&layer.digest)
        );

        let layer_dir = config.output_dir.join(&legacy_id);
        if let Err(e) = fs::create_dir_all(&layer_dir) {
            warn!("Failed to create folder {}: {}", layer_dir.display(), e);
        }
        if let Err(e) = layout::write_version(&layer_dir) {
            warn!("Failed to write version: {}", e);
        }
        if let Err(e) = layout::write_layer_json(&layer_dir, &legacy_id, &parent) {
            warn!("Failed to write json: {}", e);
        }

        let result = materializer
            .materialize(layer, &config.output_dir, Some(&legacy_id))
            .await;
        if let Err(e) = &result {
            warn!("Failed to download layer {}: {}", short_hex(&layer.digest), e);
        }

        layers.push(LayerOutcome {
            digest: layer.digest.clone(),
            legacy_id: legacy_id.clone(),
            result,
        });
        parent = legacy_id;
    }

    layout::write_manifest(&config.output_dir, &manifest)?;

    Ok(PullReport {
        output_dir: config.output_dir.clone(),
        manifest,
        config_file,
        layers,
    })
}
