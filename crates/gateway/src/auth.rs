//! Identity verification for REST calls and WebSocket handshakes.
//!
//! Tokens are HS256 JWTs minted by the account service with a `userId`
//! claim. The gateway trusts any token whose signature and expiry check out.

use {
    axum::http::{HeaderMap, header},
    axum_extra::extract::cookie::CookieJar,
    jsonwebtoken::{Algorithm, DecodingKey, Validation, decode},
    serde::{Deserialize, Serialize},
};

// ── Types ────────────────────────────────────────────────────────────────────

/// Claims carried by an identity token.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Claims {
    pub user_id: String,
    pub exp: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iat: Option<u64>,
}

/// Resolved gateway auth configuration.
#[derive(Clone)]
pub struct ResolvedAuth {
    key: Option<DecodingKey>,
    validation: Validation,
    pub cookie_name: String,
}

impl std::fmt::Debug for ResolvedAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedAuth")
            .field("configured", &self.key.is_some())
            .field("cookie_name", &self.cookie_name)
            .finish()
    }
}

impl ResolvedAuth {
    pub fn is_configured(&self) -> bool {
        self.key.is_some()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("no identity token supplied")]
    MissingToken,
    #[error("token verification is not configured")]
    NotConfigured,
    #[error("invalid token: {0}")]
    Invalid(#[from] jsonwebtoken::errors::Error),
    #[error("token carries an empty user id")]
    EmptySubject,
}

// ── Auth logic ───────────────────────────────────────────────────────────────

/// Build the verifier from the configured shared secret.
pub fn resolve_auth(secret: Option<String>, cookie_name: impl Into<String>) -> ResolvedAuth {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.leeway = 30;
    ResolvedAuth {
        key: secret.map(|s| DecodingKey::from_secret(s.as_bytes())),
        validation,
        cookie_name: cookie_name.into(),
    }
}

/// Find a token in (in order) the auth cookie, a bearer header, or the
/// `?token=` query value used by browser WebSocket clients.
pub fn extract_token(
    auth: &ResolvedAuth,
    headers: &HeaderMap,
    query_token: Option<&str>,
) -> Option<String> {
    if let Some(cookie) = CookieJar::from_headers(headers).get(&auth.cookie_name) {
        return Some(cookie.value().to_string());
    }
    if let Some(bearer) = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
    {
        return Some(bearer.trim().to_string());
    }
    query_token.filter(|t| !t.is_empty()).map(str::to_string)
}

/// Verify a token and return the user id it vouches for.
pub fn verify_token(auth: &ResolvedAuth, token: Option<&str>) -> Result<String, AuthError> {
    let key = auth.key.as_ref().ok_or(AuthError::NotConfigured)?;
    let token = token.ok_or(AuthError::MissingToken)?;
    let data = decode::<Claims>(token, key, &auth.validation)?;
    let user_id = data.claims.user_id.trim();
    if user_id.is_empty() {
        return Err(AuthError::EmptySubject);
    }
    Ok(user_id.to_string())
}
