//! Signed session cookie (spec.md 6): `<timestamp>:<hex16>:<hmac-sha256>`,
//! constant-time verified, sliding 30-day expiration, HttpOnly/SameSite=Lax,
//! Secure in production.

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use hmac::{Hmac, Mac};
use rand::RngCore;
use serde::Deserialize;
use serde_json::json;
use sha2::Sha256;

use super::{AppState, SharedState};

const COOKIE_NAME: &str = "meremail_session";
const MAX_AGE_SECS: i64 = 30 * 24 * 60 * 60;

type HmacSha256 = Hmac<Sha256>;

#[derive(Deserialize)]
pub struct LoginRequest {
    username: String,
    password: String,
}

fn constant_time_eq(a: &str, b: &str) -> bool {
    let (a, b) = (a.as_bytes(), b.as_bytes());
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

fn sign(timestamp: i64, nonce: &str, secret: &str) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("hmac accepts any key length");
    mac.update(format!("{timestamp}:{nonce}:{secret}").as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

fn issue_cookie_value(secret: &str) -> String {
    let timestamp = chrono::Utc::now().timestamp();
    let mut nonce_bytes = [0u8; 8];
    rand::thread_rng().fill_bytes(&mut nonce_bytes);
    let nonce = hex::encode(nonce_bytes);
    let signature = sign(timestamp, &nonce, secret);
    format!("{timestamp}:{nonce}:{signature}")
}

fn verify_cookie_value(value: &str, secret: &str) -> bool {
    let mut parts = value.splitn(3, ':');
    let (Some(ts), Some(nonce), Some(sig)) = (parts.next(), parts.next(), parts.next()) else {
        return false;
    };
    let Ok(timestamp) = ts.parse::<i64>() else {
        return false;
    };
    let age = chrono::Utc::now().timestamp() - timestamp;
    if age < 0 || age > MAX_AGE_SECS {
        return false;
    }
    let expected = sign(timestamp, nonce, secret);
    constant_time_eq(sig, &expected)
}

fn set_cookie_header(value: &str, is_production: bool) -> String {
    let secure = if is_production { "; Secure" } else { "" };
    format!(
        "{COOKIE_NAME}={value}; Path=/; HttpOnly; SameSite=Lax; Max-Age={MAX_AGE_SECS}{secure}"
    )
}

fn read_cookie(headers: &HeaderMap) -> Option<String> {
    let raw = headers.get(header::COOKIE)?.to_str().ok()?;
    raw.split(';').find_map(|kv| {
        let kv = kv.trim();
        let (name, value) = kv.split_once('=')?;
        (name == COOKIE_NAME).then(|| value.to_string())
    })
}

pub async fn login(
    State(state): State<SharedState>,
    Json(req): Json<LoginRequest>,
) -> Response {
    let username_ok = constant_time_eq(&req.username, &state.config.auth_username);
    let password_ok = constant_time_eq(&req.password, &state.config.auth_password);

    if username_ok && password_ok {
        let value = issue_cookie_value(&state.config.auth_cookie_secret);
        let mut headers = HeaderMap::new();
        if let Ok(header_value) = set_cookie_header(&value, state.config.is_production).parse() {
            headers.insert(header::SET_COOKIE, header_value);
        }
        (StatusCode::OK, headers, Json(json!({ "authenticated": true }))).into_response()
    } else {
        let delay_ms = 100 + (rand::thread_rng().next_u32() % 100) as u64;
        tokio::time::sleep(std::time::Duration::from_millis(delay_ms)).await;
        (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "error": "invalid credentials" })),
        )
            .into_response()
    }
}

pub async fn logout(State(state): State<SharedState>) -> Response {
    let mut headers = HeaderMap::new();
    let expired = format!(
        "{COOKIE_NAME}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0{}",
        if state.config.is_production { "; Secure" } else { "" }
    );
    if let Ok(header_value) = expired.parse() {
        headers.insert(header::SET_COOKIE, header_value);
    }
    (StatusCode::OK, headers, Json(json!({ "authenticated": false }))).into_response()
}

pub async fn me(headers: HeaderMap, State(state): State<SharedState>) -> Json<serde_json::Value> {
    let authenticated = read_cookie(&headers)
        .map(|v| verify_cookie_value(&v, &state.config.auth_cookie_secret))
        .unwrap_or(false);
    Json(json!({ "authenticated": authenticated }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constant_time_eq_rejects_different_lengths_and_content() {
        assert!(constant_time_eq("abc", "abc"));
        assert!(!constant_time_eq("abc", "abd"));
        assert!(!constant_time_eq("abc", "ab"));
    }

    #[test]
    fn issued_cookie_verifies_against_the_same_secret() {
        let value = issue_cookie_value("super-secret");
        assert!(verify_cookie_value(&value, "super-secret"));
    }

    #[test]
    fn cookie_does_not_verify_against_a_different_secret() {
        let value = issue_cookie_value("super-secret");
        assert!(!verify_cookie_value(&value, "other-secret"));
    }

    #[test]
    fn tampered_signature_is_rejected() {
        let value = issue_cookie_value("super-secret");
        let mut parts: Vec<&str> = value.splitn(3, ':').collect();
        parts[2] = "0000000000000000000000000000000000000000000000000000000000000000";
        let tampered = parts.join(":");
        assert!(!verify_cookie_value(&tampered, "super-secret"));
    }

    #[test]
    fn expired_timestamp_is_rejected() {
        let stale_timestamp = chrono::Utc::now().timestamp() - MAX_AGE_SECS - 1;
        let nonce = "0123456789abcdef";
        let signature = sign(stale_timestamp, nonce, "super-secret");
        let value = format!("{stale_timestamp}:{nonce}:{signature}");
        assert!(!verify_cookie_value(&value, "super-secret"));
    }

    #[test]
    fn malformed_value_is_rejected() {
        assert!(!verify_cookie_value("not-a-valid-cookie", "super-secret"));
    }
}

/// Rejects requests without a valid session cookie; re-emits a fresh cookie
/// on every authenticated request (sliding expiration).
pub async fn require_session(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    request: Request,
    next: Next,
) -> Response {
    let Some(cookie_value) = read_cookie(&headers) else {
        return StatusCode::UNAUTHORIZED.into_response();
    };
    if !verify_cookie_value(&cookie_value, &state.config.auth_cookie_secret) {
        return StatusCode::UNAUTHORIZED.into_response();
    }

    let mut response = next.run(request).await;
    let refreshed = issue_cookie_value(&state.config.auth_cookie_secret);
    if let Ok(header_value) = set_cookie_header(&refreshed, state.config.is_production).parse() {
        response.headers_mut().insert(header::SET_COOKIE, header_value);
    }
    response
}
