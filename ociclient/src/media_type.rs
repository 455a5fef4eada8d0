//! Media types the client understands and the on-disk naming derived
//! from a blob's media type and digest.

use crate::digest::OciDigest;

pub const MANIFEST_LIST_V2: &str = "application/vnd.docker.distribution.manifest.list.v2+json";
pub const MANIFEST_V2: &str = "application/vnd.docker.distribution.manifest.v2+json";

/// File name every gzip layer is written to inside its legacy directory
pub const LAYER_TAR: &str = "layer.tar";

/// How a blob body has to be decoded before it is written to disk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    Gzip,
    Identity,
}

impl Encoding {
    pub fn for_media_type(media_type: &str) -> Self {
        if is_gzip(media_type) {
            Encoding::Gzip
        } else {
            Encoding::Identity
        }
    }
}

pub fn is_gzip(media_type: &str) -> bool {
    media_type.ends_with("gzip")
}

/// Kind of document a manifest response carries, judged by Content-Type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManifestKind {
    List,
    Manifest,
}

impl ManifestKind {
    /// Classify a Content-Type header value; parameters after `;` are ignored.
    pub fn from_content_type(content_type: &str) -> Option<Self> {
        let essence = content_type.split(';').next().unwrap_or_default().trim();
        match essence {
            MANIFEST_LIST_V2 => Some(ManifestKind::List),
            MANIFEST_V2 => Some(ManifestKind::Manifest),
            _ => None,
        }
    }
}

/// File name a blob is stored under.
///
/// Gzip layers are always `layer.tar` (placed in their legacy id directory);
/// anything else, i.e. the image config, is `<hex>.json` in the output root.
pub fn blob_file_name(media_type: &str, digest: &OciDigest) -> String {
    match Encoding::for_media_type(media_type) {
        Encoding::Gzip => LAYER_TAR.to_string(),
        Encoding::Identity => format!("{}.json", digest.hex()),
    }
}
