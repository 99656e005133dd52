//! Session resolution against the identity provider's backend API.
//!
//! Admin requests carry the provider's session id in the [`SESSION_HEADER`] header. A
//! [`SessionDirectory`] turns that id into a [`SessionIdentity`], which the access gate queries
//! and, for an unauthorised user, signs out by revoking the session.
//!
//! Endpoints used (Clerk backend API shape):
//! - `GET {api}/sessions/{session_id}`
//! - `GET {api}/users/{user_id}`
//! - `POST {api}/sessions/{session_id}/revoke`

use clinic_core::{ClinicError, ClinicResult, Identity, IdentityProvider, ProviderError};
use reqwest::header::AUTHORIZATION;
use reqwest::{Response, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::Deserialize;

/// Request header carrying the identity provider session id.
pub const SESSION_HEADER: &str = "x-session-id";

/// Hands out per-request identity providers.
pub trait SessionResolver: Send + Sync + 'static {
    type Provider: IdentityProvider;

    fn resolve(&self, session_id: &str) -> Self::Provider;
}

#[derive(Deserialize)]
struct SessionRecord {
    status: String,
    user_id: String,
}

#[derive(Deserialize)]
struct EmailRecord {
    id: String,
    email_address: String,
}

#[derive(Deserialize)]
struct UserRecord {
    #[serde(default)]
    primary_email_address_id: Option<String>,
    #[serde(default)]
    email_addresses: Vec<EmailRecord>,
}

impl UserRecord {
    fn primary_email(self) -> Option<String> {
        let primary = self.primary_email_address_id;
        let mut addresses = self.email_addresses;
        let index = addresses
            .iter()
            .position(|e| primary.as_deref() == Some(e.id.as_str()))
            .unwrap_or(0);
        (index < addresses.len()).then(|| addresses.swap_remove(index).email_address)
    }
}

/// Client for the identity provider's session and user endpoints.
#[derive(Clone, Debug)]
pub struct SessionDirectory {
    http: reqwest::Client,
    api_url: Url,
    secret_key: String,
}

impl SessionDirectory {
    /// # Errors
    ///
    /// Returns [`ClinicError::InvalidConfig`] if `api_url` is not an http(s) URL or the secret key
    /// is blank.
    pub fn new(api_url: &str, secret_key: impl Into<String>) -> ClinicResult<Self> {
        let api_url = Url::parse(api_url.trim())
            .map_err(|e| ClinicError::InvalidConfig(format!("identity API URL '{api_url}': {e}")))?;
        if !matches!(api_url.scheme(), "http" | "https") {
            return Err(ClinicError::InvalidConfig(format!(
                "identity API URL must be http(s), got '{}'",
                api_url.scheme()
            )));
        }

        let secret_key = secret_key.into();
        if secret_key.trim().is_empty() {
            return Err(ClinicError::InvalidConfig(
                "identity secret key cannot be empty".into(),
            ));
        }

        Ok(Self {
            http: reqwest::Client::new(),
            api_url,
            secret_key,
        })
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, ProviderError> {
        let mut url = self.api_url.clone();
        url.path_segments_mut()
            .map_err(|_| ProviderError::Request("identity API URL cannot be a base".into()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn fetch<T: DeserializeOwned>(&self, segments: &[&str]) -> Result<Option<T>, ProviderError> {
        let response = self
            .http
            .get(self.endpoint(segments)?)
            .header(AUTHORIZATION, format!("Bearer {}", self.secret_key))
            .send()
            .await
            .map_err(|e| ProviderError::Request(e.to_string()))?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = check(response)?;
        response
            .json::<T>()
            .await
            .map(Some)
            .map_err(|e| ProviderError::Request(e.to_string()))
    }

    /// Resolves a session id to the identity behind it.
    ///
    /// Unknown or inactive sessions resolve to a loaded, signed-out identity.
    pub async fn lookup(&self, session_id: &str) -> Result<Identity, ProviderError> {
        let Some(session) = self.fetch::<SessionRecord>(&["sessions", session_id]).await? else {
            return Ok(Identity::signed_out());
        };
        if session.status != "active" {
            tracing::debug!(status = %session.status, "session not active");
            return Ok(Identity::signed_out());
        }

        let user = self.fetch::<UserRecord>(&["users", &session.user_id]).await?;
        Ok(match user.and_then(UserRecord::primary_email) {
            Some(email) => Identity::signed_in(email),
            None => Identity::signed_out(),
        })
    }

    pub async fn revoke(&self, session_id: &str) -> Result<(), ProviderError> {
        let response = self
            .http
            .post(self.endpoint(&["sessions", session_id, "revoke"])?)
            .header(AUTHORIZATION, format!("Bearer {}", self.secret_key))
            .send()
            .await
            .map_err(|e| ProviderError::Request(e.to_string()))?;
        check(response)?;
        tracing::info!("session revoked");
        Ok(())
    }
}

fn check(response: Response) -> Result<Response, ProviderError> {
    if response.status().is_success() {
        Ok(response)
    } else {
        Err(ProviderError::Status {
            status: response.status().as_u16(),
        })
    }
}

impl SessionResolver for SessionDirectory {
    type Provider = SessionIdentity;

    fn resolve(&self, session_id: &str) -> SessionIdentity {
        SessionIdentity {
            directory: self.clone(),
            session_id: session_id.to_owned(),
        }
    }
}

/// Identity provider bound to one session id.
#[derive(Clone, Debug)]
pub struct SessionIdentity {
    directory: SessionDirectory,
    session_id: String,
}

impl IdentityProvider for SessionIdentity {
    /// A provider outage reports the identity as still loading rather than signed out.
    async fn identity(&self) -> Identity {
        match self.directory.lookup(&self.session_id).await {
            Ok(identity) => identity,
            Err(e) => {
                tracing::warn!("identity lookup failed: {:?}", e);
                Identity::loading()
            }
        }
    }

    async fn sign_out(&self) -> Result<(), ProviderError> {
        self.directory.revoke(&self.session_id).await
    }
}
