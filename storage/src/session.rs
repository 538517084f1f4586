//! Shared session-credential resolution (spec.md §4.1 step 1, §4.7):
//! find a non-expired `Session` for a user, refreshing a stale one via the
//! identity provider when needed. Used by both the worker pipeline and the
//! folder synchronizer so the "resolve an access token" step is defined
//! once and exercised identically from both callers.

use crate::traits::SessionStore;
use async_trait::async_trait;
use chrono::Utc;
use drivescout_core::error::Error;
use drivescout_core::oauth::TokenRefresher;
use uuid::Uuid;

/// Decrypts tokens at the point of use, never logging or persisting them
/// in plaintext (spec.md §3 Session invariant: "tokens are never logged").
pub trait TokenCrypto: Send + Sync {
    fn decrypt(&self, ciphertext: &str) -> Result<String, Error>;
    fn encrypt(&self, plaintext: &str) -> Result<String, Error>;
}

pub struct AppSecretCrypto<'a> {
    pub secret_key: &'a str,
}

impl TokenCrypto for AppSecretCrypto<'_> {
    fn decrypt(&self, ciphertext: &str) -> Result<String, Error> {
        drivescout_core::crypto::decrypt_tolerant(self.secret_key, ciphertext)
    }
    fn encrypt(&self, plaintext: &str) -> Result<String, Error> {
        drivescout_core::crypto::encrypt(self.secret_key, plaintext)
    }
}

/// Owning variant of `AppSecretCrypto` for long-lived process binaries that
/// need a `'static` `Arc<dyn TokenCrypto>` (the worker's executor pool),
/// where borrowing `&AppConfig` for the process lifetime isn't practical.
pub struct OwnedSecretCrypto {
    pub secret_key: String,
}

impl TokenCrypto for OwnedSecretCrypto {
    fn decrypt(&self, ciphertext: &str) -> Result<String, Error> {
        drivescout_core::crypto::decrypt_tolerant(&self.secret_key, ciphertext)
    }
    fn encrypt(&self, plaintext: &str) -> Result<String, Error> {
        drivescout_core::crypto::encrypt(&self.secret_key, plaintext)
    }
}

/// Resolves a usable (decrypted) access token for `user_id`: reuses a
/// non-expired session as-is, refreshes an expired one and persists the
/// result, or fails permanently (spec.md §4.1 step 1: "if none, try to
/// refresh an expired one; if that fails, fail permanently").
///
/// `update_session_tokens`/`delete_session` on the concrete Postgres store
/// are each single atomic statements, so two callers racing to refresh the
/// same session both reach a valid upstream token; the DB simply keeps
/// whichever write lands last. That's an accepted trade against taking a
/// cross-process advisory lock here, which would require a concrete
/// `PgPool` and defeat testing this helper against a `SessionStore` mock.
pub async fn resolve_access_token(
    sessions: &dyn SessionStore,
    refresher: &dyn TokenRefresher,
    crypto: &dyn TokenCrypto,
    user_id: Uuid,
) -> Result<String, Error> {
    let session = sessions
        .get_session_for_user(user_id)
        .await?
        .ok_or_else(|| Error::Auth(format!("no session for user {user_id}")))?;

    if !session.is_expired(Utc::now()) {
        return crypto.decrypt(&session.access_token_enc);
    }

    let refresh_token = crypto.decrypt(&session.refresh_token_enc)?;
    match refresher.refresh(&refresh_token).await {
        Ok(refreshed) => {
            let access_enc = crypto.encrypt(&refreshed.access_token)?;
            let refresh_enc = refreshed.refresh_token.as_deref().map(|t| crypto.encrypt(t)).transpose()?;
            sessions.update_session_tokens(session.id, access_enc, refresh_enc, refreshed.expires_at).await?;
            Ok(refreshed.access_token)
        }
        Err(e) => {
            sessions.delete_session(session.id).await?;
            Err(Error::Auth(format!("session refresh failed: {e}")))
        }
    }
}
