//! Password gate for the GitDigest pages and API.
//!
//! A correct password earns an HTTP-only cookie holding a 32-bit rolling hash of the
//! password and a fixed salt. The middleware recomputes that hash for every protected
//! request. This keeps casual visitors out; it is not real access control.

use crate::error::ApiError;
use crate::AppState;
use axum::{
    extract::{rejection::JsonRejection, Request, State},
    http::{header, HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Redirect, Response},
    Json,
};
use serde::Deserialize;
use std::sync::Arc;

pub const COOKIE_NAME: &str = "gitdigest_auth";
pub const COOKIE_MAX_AGE_SECS: u64 = 7 * 24 * 60 * 60;
pub const SALT: &str = "gitdigest-salt-v1";

pub const LOGIN_PATH: &str = "/gitdigest/login";
pub const AUTH_API_PATH: &str = "/api/gitdigest/auth";

const BASE36_DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// 32-bit rolling hash (`h = h * 31 + unit`) over UTF-16 code units, in base 36.
pub fn hash_token(input: &str) -> String {
    let hash = input
        .encode_utf16()
        .fold(0i32, |h, unit| h.wrapping_mul(31).wrapping_add(i32::from(unit)));

    let mut n = hash.unsigned_abs();
    if n == 0 {
        return "0".to_string();
    }
    let mut digits = Vec::new();
    while n > 0 {
        digits.push(BASE36_DIGITS[(n % 36) as usize]);
        n /= 36;
    }
    digits.iter().rev().map(|&d| d as char).collect()
}

/// The cookie value issued for `password`.
pub fn session_token(password: &str) -> String {
    hash_token(&format!("{password}{SALT}"))
}

pub fn session_cookie(token: &str, secure: bool) -> String {
    let mut cookie = format!(
        "{COOKIE_NAME}={token}; Path=/; HttpOnly; SameSite=Lax; Max-Age={COOKIE_MAX_AGE_SECS}"
    );
    if secure {
        cookie.push_str("; Secure");
    }
    cookie
}

pub fn clear_cookie(secure: bool) -> String {
    let mut cookie = format!("{COOKIE_NAME}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0");
    if secure {
        cookie.push_str("; Secure");
    }
    cookie
}

/// Finds a cookie by name across all `Cookie` headers.
pub fn read_cookie<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value)
}

/// Whether the request carries the cookie for the configured password.
pub fn is_authenticated(headers: &HeaderMap, password: Option<&str>) -> bool {
    match (password, read_cookie(headers, COOKIE_NAME)) {
        (Some(password), Some(cookie)) => cookie == session_token(password),
        _ => false,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Gate {
    Open,
    Page,
    Api,
}

fn gate_for(path: &str) -> Gate {
    let path = match path.trim_end_matches('/') {
        "" => "/",
        trimmed => trimmed,
    };

    if path == LOGIN_PATH || path == AUTH_API_PATH {
        Gate::Open
    } else if path == "/gitdigest" || path.starts_with("/gitdigest/") {
        Gate::Page
    } else if path == "/api/gitdigest" || path.starts_with("/api/gitdigest/") {
        Gate::Api
    } else {
        Gate::Open
    }
}

/// `/gitdigest/login?redirect=<path>`, with the path form-encoded.
pub fn login_redirect(path: &str) -> String {
    match reqwest::Url::parse_with_params(
        &format!("http://localhost{LOGIN_PATH}"),
        &[("redirect", path)],
    ) {
        Ok(url) => format!("{}?{}", url.path(), url.query().unwrap_or_default()),
        Err(_) => LOGIN_PATH.to_string(),
    }
}

/// Intercepts GitDigest pages and API calls that lack a valid auth cookie.
pub async fn require_auth(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    let path = request.uri().path().to_string();
    let gate = gate_for(&path);
    if gate == Gate::Open
        || is_authenticated(request.headers(), state.config.gitdigest_password.as_deref())
    {
        return next.run(request).await;
    }

    tracing::debug!(path = %path, "Rejecting unauthenticated request");
    match gate {
        Gate::Page => Redirect::temporary(&login_redirect(&path)).into_response(),
        _ => ApiError::unauthorized("Authentication required").into_response(),
    }
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub password: Option<String>,
}

pub async fn login(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(payload) = payload?;
    let password = payload
        .password
        .ok_or_else(|| ApiError::bad_request("Password is required"))?;

    let expected = state
        .config
        .gitdigest_password
        .as_deref()
        .ok_or_else(|| ApiError::internal("GitDigest password is not configured"))?;

    // An empty password never matches, even against an empty configured secret.
    if password.is_empty() || password != expected {
        tracing::warn!("Rejected GitDigest login attempt");
        return Err(ApiError::unauthorized("Invalid password"));
    }

    tracing::info!("GitDigest login succeeded");
    let cookie = session_cookie(&session_token(&password), state.config.cookie_secure);
    Ok((
        StatusCode::OK,
        [(header::SET_COOKIE, cookie)],
        Json(serde_json::json!({ "success": true })),
    )
        .into_response())
}

pub async fn logout(State(state): State<Arc<AppState>>) -> Response {
    (
        StatusCode::OK,
        [(header::SET_COOKIE, clear_cookie(state.config.cookie_secure))],
        Json(serde_json::json!({ "success": true })),
    )
        .into_response()
}
