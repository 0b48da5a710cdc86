//! Component E — the remote document store client used by the Gateway's
//! Forwarder and Control API. A thin `async_trait` wrapper over `reqwest`,
//! mirroring the `Client`/mock split `feature-flags::redis::Client` uses
//! for its Redis dependency — here applied to the REST document store
//! named in `SPEC_FULL.md` §4.E instead of Redis.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Error, Debug)]
pub enum DocumentStoreError {
    #[error("document store request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("document store rejected the request with status {status}: {body}")]
    Rejected { status: u16, body: String },
}

/// The outcome of a write, classified by HTTP status so the Forwarder's
/// `retry::Disposition` can act on it without re-inspecting the response.
#[derive(Debug, Clone)]
pub struct WriteOutcome {
    pub status: u16,
    pub body: String,
}

/// Write semantics requested of `DocumentStoreClient::write`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// Fails if a document already exists at the path.
    Create,
    /// Merges fields into an existing document, creating it if absent.
    Update,
}

#[async_trait]
pub trait DocumentStoreClient: Send + Sync {
    async fn write(
        &self,
        path: &str,
        mode: WriteMode,
        body: &Value,
        bearer_token: &str,
    ) -> Result<WriteOutcome, DocumentStoreError>;

    async fn get(&self, path: &str, bearer_token: &str) -> Result<Option<Value>, DocumentStoreError>;

    /// Fetches the current snapshot of the location-config collection
    /// polled by the Config Subscriber.
    async fn watch_snapshot(
        &self,
        collection_path: &str,
        bearer_token: &str,
    ) -> Result<Value, DocumentStoreError>;
}

pub struct HttpDocumentStoreClient {
    http: reqwest::Client,
    base_url: String,
}

impl HttpDocumentStoreClient {
    pub fn new(base_url: String) -> Result<Self, DocumentStoreError> {
        let http = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self { http, base_url })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), path)
    }
}

#[async_trait]
impl DocumentStoreClient for HttpDocumentStoreClient {
    async fn write(
        &self,
        path: &str,
        mode: WriteMode,
        body: &Value,
        bearer_token: &str,
    ) -> Result<WriteOutcome, DocumentStoreError> {
        let mut request = match mode {
            WriteMode::Create => self.http.post(self.url(path)),
            WriteMode::Update => self.http.patch(self.url(path)),
        };
        request = request.bearer_auth(bearer_token).json(body);

        let response = request.send().await?;
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        Ok(WriteOutcome { status, body })
    }

    async fn get(&self, path: &str, bearer_token: &str) -> Result<Option<Value>, DocumentStoreError> {
        let response = self
            .http
            .get(self.url(path))
            .bearer_auth(bearer_token)
            .send()
            .await?;

        if response.status().as_u16() == 404 {
            return Ok(None);
        }
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(DocumentStoreError::Rejected { status, body });
        }
        Ok(Some(response.json().await?))
    }

    async fn watch_snapshot(
        &self,
        collection_path: &str,
        bearer_token: &str,
    ) -> Result<Value, DocumentStoreError> {
        let response = self
            .http
            .get(self.url(collection_path))
            .bearer_auth(bearer_token)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(DocumentStoreError::Rejected { status, body });
        }
        Ok(response.json().await?)
    }
}

#[derive(Serialize)]
struct ValidateInvitationRequest<'a> {
    #[serde(rename = "invitationCode")]
    invitation_code: &'a str,
}

#[derive(Serialize)]
struct RefreshTokenRequest<'a> {
    token: &'a str,
}

/// The invitation-exchange and refresh endpoints used by the Auth Manager.
/// Kept separate from `DocumentStoreClient` because it targets a distinct
/// base URL (the identity provider, not the document store).
#[async_trait]
pub trait AuthEndpointClient: Send + Sync {
    async fn exchange_invitation(&self, invitation_code: &str) -> Result<AuthTokens, DocumentStoreError>;
    async fn refresh(&self, token: &str) -> Result<AuthTokens, DocumentStoreError>;
}

/// The service's literal response shape is
/// `{success, customToken, locationName, companyId, expiresIn}`; this is
/// the credential this client actually works with afterward.
#[derive(Debug, Clone)]
pub struct AuthTokens {
    pub token: String,
    pub location: String,
    pub company: String,
    pub expires_in_seconds: i64,
}

#[derive(Debug, serde::Deserialize)]
struct RawAuthResponse {
    success: bool,
    #[serde(rename = "customToken")]
    custom_token: String,
    #[serde(rename = "locationName", default)]
    location_name: String,
    #[serde(rename = "companyId", default)]
    company_id: String,
    #[serde(rename = "expiresIn")]
    expires_in: i64,
}

impl TryFrom<RawAuthResponse> for AuthTokens {
    type Error = DocumentStoreError;

    fn try_from(raw: RawAuthResponse) -> Result<Self, Self::Error> {
        if !raw.success {
            return Err(DocumentStoreError::Rejected {
                status: 200,
                body: "auth endpoint responded with success: false".to_string(),
            });
        }
        Ok(AuthTokens {
            token: raw.custom_token,
            location: raw.location_name,
            company: raw.company_id,
            expires_in_seconds: raw.expires_in,
        })
    }
}

pub struct HttpAuthEndpointClient {
    http: reqwest::Client,
    base_url: String,
}

impl HttpAuthEndpointClient {
    pub fn new(base_url: String) -> Result<Self, DocumentStoreError> {
        let http = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self { http, base_url })
    }
}

#[async_trait]
impl AuthEndpointClient for HttpAuthEndpointClient {
    async fn exchange_invitation(&self, invitation_code: &str) -> Result<AuthTokens, DocumentStoreError> {
        let response = self
            .http
            .post(format!("{}/validateInvitation", self.base_url))
            .json(&ValidateInvitationRequest { invitation_code })
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(DocumentStoreError::Rejected { status, body });
        }
        let raw: RawAuthResponse = response.json().await?;
        raw.try_into()
    }

    async fn refresh(&self, token: &str) -> Result<AuthTokens, DocumentStoreError> {
        let response = self
            .http
            .post(format!("{}/refreshToken", self.base_url))
            .json(&RefreshTokenRequest { token })
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(DocumentStoreError::Rejected { status, body });
        }
        let raw: RawAuthResponse = response.json().await?;
        raw.try_into()
    }
}
