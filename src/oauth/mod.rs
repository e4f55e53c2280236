//! Google Sign-In ID token verification.
//!
//! Tokens are checked against Google's `tokeninfo` endpoint, which validates
//! the signature and expiry; the audience and email state are checked here.

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

const TOKENINFO_URL: &str = "https://oauth2.googleapis.com/tokeninfo";

/// Verified identity extracted from a Google ID token
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GoogleIdentity {
    pub subject: String,
    pub email: String,
    pub name: Option<String>,
    pub picture: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum OAuthError {
    #[error("Google login is not configured")]
    NotConfigured,
    #[error("token rejected by Google: {0}")]
    Rejected(String),
    #[error("token audience does not match this application")]
    AudienceMismatch,
    #[error("Google account email is not verified")]
    EmailNotVerified,
    #[error("request to Google failed: {0}")]
    Http(#[from] reqwest::Error),
}

#[async_trait]
pub trait GoogleIdentityVerifier: Send + Sync {
    async fn verify(&self, id_token: &str) -> Result<GoogleIdentity, OAuthError>;
}

/// Raw `tokeninfo` payload; Google encodes booleans as strings here
#[derive(Debug, Deserialize)]
struct TokenInfo {
    aud: String,
    sub: String,
    email: Option<String>,
    #[serde(default)]
    email_verified: Option<String>,
    name: Option<String>,
    picture: Option<String>,
}

pub struct TokenInfoVerifier {
    client: reqwest::Client,
    client_id: Option<String>,
}

impl TokenInfoVerifier {
    pub fn new(client_id: Option<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();

        Self {
            client,
            client_id,
        }
    }
}

fn identity_from(info: TokenInfo, client_id: &str) -> Result<GoogleIdentity, OAuthError> {
    if info.aud != client_id {
        return Err(OAuthError::AudienceMismatch);
    }

    let verified = info
        .email_verified
        .as_deref()
        .map(|v| v.eq_ignore_ascii_case("true"))
        .unwrap_or(false);

    let email = match info.email {
        Some(email) if verified => email,
        _ => return Err(OAuthError::EmailNotVerified),
    };

    Ok(GoogleIdentity {
        subject: info.sub,
        email,
        name: info.name,
        picture: info.picture,
    })
}

#[async_trait]
impl GoogleIdentityVerifier for TokenInfoVerifier {
    async fn verify(&self, id_token: &str) -> Result<GoogleIdentity, OAuthError> {
        let client_id = self.client_id.as_deref().ok_or(OAuthError::NotConfigured)?;

        let response = self
            .client
            .get(TOKENINFO_URL)
            .query(&[("id_token", id_token)])
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            return Err(OAuthError::Rejected(format!("status {}", status)));
        }

        let info: TokenInfo = response.json().await?;
        identity_from(info, client_id)
    }
}
