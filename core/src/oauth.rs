//! The identity-provider refresh protocol consumed when a `Session`'s
//! access token has expired (spec.md §4.7). Out of scope: login/callback
//! handling itself — only the refresh call is a first-class capability,
//! since the worker and request handlers both need it mid-flight.

use crate::error::Error;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

#[derive(Debug, Clone)]
pub struct RefreshedTokens {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: DateTime<Utc>,
}

/// Exchanges a refresh token for a new access token with the upstream
/// identity provider. One HTTP implementation (`HttpTokenRefresher`);
/// a scripted mock is used in `storage`'s session-refresh tests.
#[async_trait]
pub trait TokenRefresher: Send + Sync {
    async fn refresh(&self, refresh_token: &str) -> Result<RefreshedTokens, Error>;
}

pub struct HttpTokenRefresher {
    client: reqwest::Client,
    token_url: String,
    client_id: String,
    client_secret: String,
}

impl HttpTokenRefresher {
    pub fn new(token_url: String, client_id: String, client_secret: String) -> Self {
        Self { client: reqwest::Client::new(), token_url, client_id, client_secret }
    }
}

#[derive(serde::Deserialize)]
struct RefreshResponseDto {
    access_token: String,
    refresh_token: Option<String>,
    expires_in: i64,
}

#[async_trait]
impl TokenRefresher for HttpTokenRefresher {
    async fn refresh(&self, refresh_token: &str) -> Result<RefreshedTokens, Error> {
        let resp = self
            .client
            .post(&self.token_url)
            .form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token),
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
            ])
            .send()
            .await?
            .error_for_status()?;
        let dto: RefreshResponseDto = resp.json().await?;
        Ok(RefreshedTokens {
            access_token: dto.access_token,
            refresh_token: dto.refresh_token,
            expires_at: Utc::now() + chrono::Duration::seconds(dto.expires_in),
        })
    }
}
