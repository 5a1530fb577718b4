use crate::error::AppError;
use crate::state::SharedState;
use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts},
    http::{header, request::Parts, HeaderMap},
};
use base64::{engine::general_purpose, Engine as _};
use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

pub const SESSION_COOKIE: &str = "session";

#[derive(Debug, Clone, PartialEq)]
pub struct SessionClaims {
    pub username: String,
    pub exp: i64,
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum SessionError {
    #[error("invalid token format")]
    Invalid,
    #[error("signature mismatch")]
    Signature,
    #[error("expired")]
    Expired,
}

pub fn sign_session(
    username: &str,
    ttl_hours: i64,
    key: &[u8],
    now: DateTime<Utc>,
) -> Result<String, SessionError> {
    let exp = now + Duration::hours(ttl_hours);
    let payload = format!("{}|{}", username, exp.timestamp());
    let mut mac = HmacSha256::new_from_slice(key).map_err(|_| SessionError::Invalid)?;
    mac.update(payload.as_bytes());
    let sig = mac.finalize().into_bytes();
    Ok(format!(
        "{}.{}",
        general_purpose::URL_SAFE_NO_PAD.encode(payload.as_bytes()),
        general_purpose::URL_SAFE_NO_PAD.encode(sig)
    ))
}

pub fn verify_session(token: &str, key: &[u8], now: DateTime<Utc>) -> Result<SessionClaims, SessionError> {
    let (payload_b64, sig_b64) = token.split_once('.').ok_or(SessionError::Invalid)?;
    let payload_bytes = general_purpose::URL_SAFE_NO_PAD
        .decode(payload_b64)
        .map_err(|_| SessionError::Invalid)?;
    let sig_bytes = general_purpose::URL_SAFE_NO_PAD
        .decode(sig_b64)
        .map_err(|_| SessionError::Invalid)?;

    let mut mac = HmacSha256::new_from_slice(key).map_err(|_| SessionError::Invalid)?;
    mac.update(&payload_bytes);
    mac.verify_slice(&sig_bytes)
        .map_err(|_| SessionError::Signature)?;

    let payload = String::from_utf8(payload_bytes).map_err(|_| SessionError::Invalid)?;
    // Usernames may not contain '|', so the last separator splits off exp.
    let (username, exp) = payload.rsplit_once('|').ok_or(SessionError::Invalid)?;
    let exp: i64 = exp.parse().map_err(|_| SessionError::Invalid)?;
    if now.timestamp() > exp {
        return Err(SessionError::Expired);
    }
    Ok(SessionClaims {
        username: username.to_string(),
        exp,
    })
}

pub fn extract_token(headers: &HeaderMap) -> Option<String> {
    if let Some(auth) = headers.get(header::AUTHORIZATION) {
        if let Ok(val) = auth.to_str() {
            if let Some(bearer) = val.strip_prefix("Bearer ") {
                return Some(bearer.trim().to_string());
            }
        }
    }
    if let Some(cookie) = headers.get(header::COOKIE) {
        if let Ok(val) = cookie.to_str() {
            for pair in val.split(';') {
                if let Some(rest) = pair.trim().strip_prefix("session=") {
                    return Some(rest.to_string());
                }
            }
        }
    }
    None
}

pub fn session_cookie(token: &str, max_age_secs: i64, secure: bool) -> String {
    format!(
        "{}={}; Path=/; HttpOnly; SameSite=Lax; Max-Age={}{}",
        SESSION_COOKIE,
        token,
        max_age_secs,
        if secure { "; Secure" } else { "" }
    )
}

/// Extractor for routes that need a signed-in administrator.
pub struct AdminSession(pub String);

#[async_trait]
impl<S> FromRequestParts<S> for AdminSession
where
    S: Send + Sync,
    SharedState: FromRef<S>,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let shared = SharedState::from_ref(state);
        let token = extract_token(&parts.headers).ok_or(AppError::Unauthorized)?;

        let claims = verify_session(&token, &shared.config.admin.session_key, Utc::now()).map_err(|e| {
            tracing::warn!("Admin session rejected: {}", e);
            AppError::Unauthorized
        })?;
        if claims.username != shared.config.admin.username {
            return Err(AppError::Unauthorized);
        }
        Ok(AdminSession(claims.username))
    }
}
