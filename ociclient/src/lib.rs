pub mod auth;
pub mod client;
pub mod digest;
pub mod error;
pub mod image_reference;
pub mod media_type;
pub mod models;

// Re-export main client types for convenience
pub use auth::{AuthSession, AuthToken, BearerChallenge, Credential};
pub use client::{Client, ClientSession, select_platform};
pub use digest::OciDigest;
pub use error::{AuthError, BlobError, ClientError, ResolveError};
pub use image_reference::ImageReference;
pub use models::{Descriptor, ImageConfig, ImageManifest, ImageManifestList, ManifestListEntry, Platform};
