use serde::{Deserialize, Serialize};

/// Represents a descriptor for a blob or manifest in a registry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Descriptor {
    /// Media type of the referenced content
    #[serde(default)]
    pub media_type: String,
    /// Size of the referenced content in bytes
    #[serde(default)]
    pub size: i64,
    /// Digest of the referenced content, `<algorithm>:<hex>`
    #[serde(default)]
    pub digest: String,
}

/// Represents platform information for a manifest list entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Platform {
    /// Operating system
    #[serde(default)]
    pub os: String,
    /// CPU architecture
    #[serde(default)]
    pub architecture: String,
    /// Optional variant
    #[serde(skip_serializing_if = "Option::is_none")]
    pub variant: Option<String>,
}

impl Platform {
    pub fn matches(&self, os: &str, architecture: &str) -> bool {
        self.os == os && self.architecture == architecture
    }

    fn unknown() -> Self {
        Platform {
            os: String::new(),
            architecture: String::new(),
            variant: None,
        }
    }
}

/// Represents a concrete, platform specific image manifest
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageManifest {
    /// Schema version of the manifest
    pub schema_version: i32,
    /// Media type of the manifest
    #[serde(default)]
    pub media_type: String,
    /// Descriptor for the config blob
    pub config: Descriptor,
    /// Descriptors for the layer blobs, base layer first
    #[serde(default)]
    pub layers: Vec<Descriptor>,
}

/// One platform specific manifest referenced from a manifest list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestListEntry {
    #[serde(flatten)]
    pub descriptor: Descriptor,
    #[serde(default = "Platform::unknown")]
    pub platform: Platform,
}

/// Represents a multi-arch manifest list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageManifestList {
    /// Schema version of the manifest list
    pub schema_version: i32,
    /// Media type of the manifest list
    #[serde(default)]
    pub media_type: String,
    /// List of manifests
    #[serde(default)]
    pub manifests: Vec<ManifestListEntry>,
}

/// The parts of an image config blob this client reads
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub architecture: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub os: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rootfs: Option<Rootfs>,
}

impl ImageConfig {
    /// Diff ids in layer order, if the config declares them
    pub fn diff_ids(&self) -> Option<&[String]> {
        self.rootfs.as_ref().map(|rootfs| rootfs.diff_ids.as_slice())
    }
}

/// Represents rootfs information in an image config
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rootfs {
    /// Type of the rootfs
    #[serde(rename = "type", default)]
    pub rootfs_type: String,
    /// Diff IDs
    pub diff_ids: Vec<String>,
}
