use std::time::Duration;

use reqwest::{Client as ReqwestClient, RequestBuilder, Response, Url, header};
use serde::de::DeserializeOwned;
use tracing::{debug, info};

use crate::auth::{AuthSession, Credential};
use crate::digest::short_hex;
use crate::error::{BlobError, ClientError, ResolveError};
use crate::media_type::{MANIFEST_LIST_V2, MANIFEST_V2, ManifestKind};
use crate::models::{Descriptor, ImageManifest, ImageManifestList, ManifestListEntry};

/// A client for pulling from one Docker Registry v2 server.
pub struct Client {
    registry_url: String,
    client: ReqwestClient,
}

impl Client {
    /// Create a new client for the given registry URL.
    pub fn new(registry_url: impl Into<String>) -> Result<Self, ClientError> {
        Self::with_client(registry_url.into(), ReqwestClient::new())
    }

    /// Create a client whose requests give up after `timeout`.
    pub fn with_timeout(registry_url: impl Into<String>, timeout: Duration) -> Result<Self, ClientError> {
        let client = ReqwestClient::builder()
            .timeout(timeout)
            .build()
            .map_err(ClientError::Build)?;
        Self::with_client(registry_url.into(), client)
    }

    fn with_client(registry_url: String, client: ReqwestClient) -> Result<Self, ClientError> {
        let parsed = Url::parse(&registry_url).map_err(|e| ClientError::InvalidUrl {
            url: registry_url.clone(),
            reason: e.to_string(),
        })?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(ClientError::InvalidUrl {
                url: registry_url,
                reason: format!("unsupported scheme {}", parsed.scheme()),
            });
        }

        Ok(Self {
            registry_url: registry_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    pub fn registry_url(&self) -> &str {
        &self.registry_url
    }

    /// Start token discovery for this registry.
    pub fn auth_session(&self) -> AuthSession {
        AuthSession::new(self.client.clone(), self.registry_url.clone())
    }

    /// Create a new session for the given repository.
    pub fn new_session(&self, repository: String, credential: Credential) -> ClientSession {
        ClientSession {
            repository,
            registry_url: self.registry_url.clone(),
            client: self.client.clone(),
            credential,
        }
    }
}

/// Authenticated access to a single repository.
pub struct ClientSession {
    repository: String,
    registry_url: String,
    client: ReqwestClient,
    credential: Credential,
}

impl ClientSession {
    pub fn repository(&self) -> &str {
        &self.repository
    }

    fn manifest_url(&self, reference: &str) -> String {
        format!("{}/v2/{}/manifests/{}", self.registry_url, self.repository, reference)
    }

    fn blob_url(&self, digest: &str) -> String {
        format!("{}/v2/{}/blobs/{}", self.registry_url, self.repository, digest)
    }

    fn get(&self, url: &str) -> RequestBuilder {
        self.credential.apply(self.client.get(url))
    }

    /// Resolve `reference` (tag or digest) to the manifest for `os`/`architecture`.
    ///
    /// A manifest list costs a second round trip for the selected entry; a
    /// plain manifest is returned as is, whatever platform it was built for.
    pub async fn resolve_manifest(
        &self,
        reference: &str,
        os: &str,
        architecture: &str,
    ) -> Result<ImageManifest, ResolveError> {
        let url = self.manifest_url(reference);
        debug!("Fetching manifest from {}", url);

        let response = self
            .get(&url)
            .header(header::ACCEPT, format!("{}, {}", MANIFEST_LIST_V2, MANIFEST_V2))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(ResolveError::ManifestFetchFailed(response.status()));
        }

        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default()
            .to_string();

        match ManifestKind::from_content_type(&content_type) {
            Some(ManifestKind::List) => {
                let list: ImageManifestList = decode(response, "manifest list").await?;
                let entry = select_platform(&list, os, architecture)?;
                info!(
                    digest = %entry.descriptor.digest,
                    "Selected manifest for {}/{}", os, architecture
                );
                self.fetch_manifest(&entry.descriptor).await
            }
            Some(ManifestKind::Manifest) => decode(response, "manifest").await,
            None => Err(ResolveError::UnsupportedContentType(content_type)),
        }
    }

    /// Fetch the concrete manifest a manifest list entry points to.
    async fn fetch_manifest(&self, descriptor: &Descriptor) -> Result<ImageManifest, ResolveError> {
        let url = self.manifest_url(&descriptor.digest);
        debug!("manifest url: {}", url);

        let response = self
            .get(&url)
            .header(header::ACCEPT, &descriptor.media_type)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(ResolveError::ManifestFetchFailed(response.status()));
        }

        decode(response, "manifest").await
    }

    /// Start downloading a blob. The body is left unread for the caller to stream.
    pub async fn fetch_blob(
        &self,
        descriptor: &Descriptor,
        accept: Option<&str>,
    ) -> Result<Response, BlobError> {
        let url = self.blob_url(&descriptor.digest);
        debug!("Fetching blob {} from {}", short_hex(&descriptor.digest), url);

        let mut request = self.get(&url);
        if let Some(accept) = accept {
            request = request.header(header::ACCEPT, accept);
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(BlobError::Status(response.status()));
        }
        Ok(response)
    }
}

async fn decode<T: DeserializeOwned>(response: Response, what: &'static str) -> Result<T, ResolveError> {
    let body = response.bytes().await?;
    serde_json::from_slice(&body).map_err(|source| ResolveError::Decode { what, source })
}

/// Pick the manifest list entry for `os`/`architecture`.
///
/// Every entry is inspected; when several match, the last one in list order wins.
pub fn select_platform<'a>(
    list: &'a ImageManifestList,
    os: &str,
    architecture: &str,
) -> Result<&'a ManifestListEntry, ResolveError> {
    if list.manifests.is_empty() {
        return Err(ResolveError::EmptyManifestList);
    }

    list.manifests
        .iter()
        .filter(|entry| entry.platform.matches(os, architecture))
        .last()
        .ok_or_else(|| ResolveError::NoMatchingPlatform {
            os: os.to_string(),
            architecture: architecture.to_string(),
        })
}
