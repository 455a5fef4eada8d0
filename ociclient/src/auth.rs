//! Anonymous bearer-token authentication against a Docker Registry v2.
//!
//! The registry advertises its token service in the `WWW-Authenticate`
//! header of an unauthenticated `GET /v2/`. The token obtained from that
//! service is presented on every later request of the run.

use std::fmt;
use std::str::FromStr;

use http_auth::{ChallengeRef, parser::ChallengeParser};
use reqwest::{Client as ReqwestClient, RequestBuilder, StatusCode, Url, header};
use serde::Deserialize;
use tracing::{debug, info};

use crate::error::AuthError;

/// Parsed `WWW-Authenticate: Bearer ...` challenge
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BearerChallenge {
    pub realm: String,
    pub service: String,
    pub scope: Option<String>,
}

impl FromStr for BearerChallenge {
    type Err = AuthError;

    /// Take the first `Bearer` challenge of the header; other schemes are skipped.
    fn from_str(header: &str) -> Result<Self, Self::Err> {
        for challenge in ChallengeParser::new(header) {
            let challenge = challenge
                .map_err(|e| AuthError::MalformedChallenge(format!("{:?}: {}", e, header)))?;
            if challenge.scheme.eq_ignore_ascii_case("Bearer") {
                return BearerChallenge::try_from(&challenge);
            }
        }
        Err(AuthError::MalformedChallenge(format!(
            "no Bearer challenge: {}",
            header
        )))
    }
}

impl TryFrom<&ChallengeRef<'_>> for BearerChallenge {
    type Error = AuthError;

    fn try_from(value: &ChallengeRef<'_>) -> Result<Self, Self::Error> {
        if !value.scheme.eq_ignore_ascii_case("Bearer") {
            return Err(AuthError::MalformedChallenge(format!(
                "unsupported challenge scheme {}",
                value.scheme
            )));
        }

        let mut realm = None;
        let mut service = None;
        let mut scope = None;
        for (key, param) in &value.params {
            if key.eq_ignore_ascii_case("realm") {
                realm = Some(param.to_unescaped());
            } else if key.eq_ignore_ascii_case("service") {
                service = Some(param.to_unescaped());
            } else if key.eq_ignore_ascii_case("scope") {
                scope = Some(param.to_unescaped());
            }
        }

        Ok(BearerChallenge {
            realm: realm.ok_or(AuthError::MissingChallengeParameter("realm"))?,
            service: service.ok_or(AuthError::MissingChallengeParameter("service"))?,
            scope,
        })
    }
}

/// Bearer token valid for the rest of the run
#[derive(Clone, PartialEq, Eq)]
pub struct AuthToken(String);

impl AuthToken {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn value(&self) -> &str {
        &self.0
    }

    /// Leading characters only, safe for logs
    pub fn redacted(&self) -> String {
        format!("{}..", self.0.chars().take(10).collect::<String>())
    }
}

impl fmt::Debug for AuthToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("AuthToken").field(&self.redacted()).finish()
    }
}

/// Credential attached to authenticated registry requests
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credential {
    /// The registry issued no challenge; requests go out without Authorization
    Anonymous,
    Bearer(AuthToken),
}

impl Credential {
    pub fn apply(&self, request: RequestBuilder) -> RequestBuilder {
        match self {
            Credential::Anonymous => request,
            Credential::Bearer(token) => request.bearer_auth(token.value()),
        }
    }
}

// Token authentication response from the auth service
#[derive(Debug, Deserialize)]
struct TokenResponse {
    token: Option<String>,
}

/// Discovers the token service of one registry and exchanges it for tokens
pub struct AuthSession {
    client: ReqwestClient,
    registry_url: String,
    challenge: Option<BearerChallenge>,
    discovered: bool,
}

impl AuthSession {
    pub(crate) fn new(client: ReqwestClient, registry_url: String) -> Self {
        Self {
            client,
            registry_url,
            challenge: None,
            discovered: false,
        }
    }

    /// The challenge found by [`AuthSession::discover`], if the registry sent one
    pub fn challenge(&self) -> Option<&BearerChallenge> {
        self.challenge.as_ref()
    }

    /// Send `GET /v2/` and record the advertised token endpoint.
    ///
    /// A successful unchallenged `/v2/` leaves the session without a challenge,
    /// which means the registry is accessed anonymously. Any other status is
    /// an error. Discovery runs once it has succeeded.
    pub async fn discover(&mut self) -> Result<Option<&BearerChallenge>, AuthError> {
        if !self.discovered {
            let url = format!("{}/v2/", self.registry_url);
            debug!("Checking registry at {}", url);
            let response = self.client.get(&url).send().await?;

            let status = response.status();
            if status == StatusCode::UNAUTHORIZED {
                let header = response
                    .headers()
                    .get(header::WWW_AUTHENTICATE)
                    .ok_or(AuthError::MissingChallenge)?
                    .to_str()
                    .map_err(|e| AuthError::MalformedChallenge(e.to_string()))?;
                let challenge: BearerChallenge = header.parse()?;
                debug!(realm = %challenge.realm, service = %challenge.service, "Registry requires a token");
                self.challenge = Some(challenge);
            } else if status.is_success() {
                info!("Registry did not challenge /v2/ ({}), continuing anonymously", status);
            } else {
                return Err(AuthError::VersionCheckFailed(status));
            }
            self.discovered = true;
        }
        Ok(self.challenge.as_ref())
    }

    /// Exchange the discovered endpoint for a pull token scoped to `repository`.
    pub async fn authenticate(&self, repository: &str) -> Result<AuthToken, AuthError> {
        let challenge = self.challenge.as_ref().ok_or(AuthError::NotDiscovered)?;

        let mut token_url = Url::parse(&challenge.realm).map_err(|e| AuthError::InvalidRealm {
            realm: challenge.realm.clone(),
            reason: e.to_string(),
        })?;
        token_url
            .query_pairs_mut()
            .append_pair("service", &challenge.service)
            .append_pair("scope", &format!("repository:{}:pull", repository));

        debug!("Get access token from {}", token_url);
        let response = self.client.get(token_url).send().await?;
        if !response.status().is_success() {
            return Err(AuthError::TokenRequestFailed(response.status()));
        }

        let body: TokenResponse = response.json().await.map_err(AuthError::TokenDecode)?;
        let token = AuthToken::new(body.token.ok_or(AuthError::MissingToken)?);
        debug!("token: {}", token.redacted());
        Ok(token)
    }

    /// Discover, then authenticate when the registry asked for it.
    pub async fn login(&mut self, repository: &str) -> Result<Credential, AuthError> {
        let challenged = self.discover().await?.is_some();
        if challenged {
            Ok(Credential::Bearer(self.authenticate(repository).await?))
        } else {
            Ok(Credential::Anonymous)
        }
    }
}
