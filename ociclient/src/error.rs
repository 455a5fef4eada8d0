use reqwest::StatusCode;
use thiserror::Error;

/// Errors raised while constructing a registry client
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("failed to build HTTP client: {0}")]
    Build(#[source] reqwest::Error),

    #[error("invalid registry URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },
}

/// Errors raised by token discovery and exchange. All of them abort a run.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("HTTP: {0}")]
    Http(#[from] reqwest::Error),

    #[error("registry /v2/ check failed with status {0}")]
    VersionCheckFailed(StatusCode),

    #[error("registry answered 401 without a WWW-Authenticate header")]
    MissingChallenge,

    #[error("malformed WWW-Authenticate header: {0}")]
    MalformedChallenge(String),

    #[error("WWW-Authenticate header lacks the {0} parameter")]
    MissingChallengeParameter(&'static str),

    #[error("token endpoint has not been discovered")]
    NotDiscovered,

    #[error("invalid token realm {realm}: {reason}")]
    InvalidRealm { realm: String, reason: String },

    #[error("token request failed with status {0}")]
    TokenRequestFailed(StatusCode),

    #[error("failed to decode token response: {0}")]
    TokenDecode(#[source] reqwest::Error),

    #[error("token response has no token field")]
    MissingToken,
}

/// Errors raised while resolving a reference to a concrete manifest.
/// All of them abort a run.
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("HTTP: {0}")]
    Http(#[from] reqwest::Error),

    #[error("manifest request failed with status {0}")]
    ManifestFetchFailed(StatusCode),

    #[error("failed to decode {what}: {source}")]
    Decode {
        what: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("manifest list is empty")]
    EmptyManifestList,

    #[error("no matching manifest for ({os} / {architecture})")]
    NoMatchingPlatform { os: String, architecture: String },

    #[error("not a valid content type: {0}")]
    UnsupportedContentType(String),
}

/// Errors raised while fetching a blob
#[derive(Debug, Error)]
pub enum BlobError {
    #[error("HTTP: {0}")]
    Http(#[from] reqwest::Error),

    #[error("blob request failed with status {0}")]
    Status(StatusCode),
}
