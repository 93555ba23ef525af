/// Login, registration and token inspection handlers
use super::HttpServerState;
use crate::broker::names;
use crate::error::BrokerError;
use crate::models::Principal;
use crate::security::IssuedToken;
use crate::services::oauth::CODE_FIELD;
use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Redirect, Response},
    Form, Json,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

type ApiResult<T> = std::result::Result<T, BrokerError>;

/// Cookie carrying the issued token
pub const TOKEN_COOKIE: &str = "token";

#[derive(Debug, Deserialize)]
pub(super) struct CredentialsForm {
    #[serde(default)]
    username: String,
    #[serde(default)]
    password: String,
}

impl CredentialsForm {
    fn into_fields(self) -> HashMap<String, String> {
        HashMap::from([
            ("username".to_string(), self.username),
            ("password".to_string(), self.password),
        ])
    }
}

#[derive(Debug, Deserialize)]
pub(super) struct CallbackQuery {
    code: Option<String>,
}

#[derive(Debug, Serialize)]
struct RegisterResponse {
    username: String,
}

#[derive(Debug, Serialize)]
struct LoginResponse {
    token: String,
    token_type: &'static str,
    subject: String,
    expires_at: i64,
}

#[derive(Debug, Serialize)]
struct LogoutResponse {
    status: &'static str,
}

fn token_cookie(value: &str, max_age: i64, secure: bool) -> String {
    let mut cookie = format!(
        "{}={}; Path=/; HttpOnly; SameSite=Lax; Max-Age={}",
        TOKEN_COOKIE, value, max_age
    );
    if secure {
        cookie.push_str("; Secure");
    }
    cookie
}

fn login_response(state: &HttpServerState, issued: IssuedToken) -> Response {
    let cookie = token_cookie(&issued.token, issued.ttl_seconds(), state.cookie_secure);
    let body = LoginResponse {
        subject: issued.claims.sub.clone(),
        expires_at: issued.claims.exp,
        token_type: "Bearer",
        token: issued.token,
    };
    (StatusCode::OK, [(header::SET_COOKIE, cookie)], Json(body)).into_response()
}

/// `Authorization: Bearer` wins over the cookie
fn presented_token(headers: &HeaderMap) -> Option<String> {
    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty());
    if let Some(token) = bearer {
        return Some(token.to_string());
    }

    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|raw| raw.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == TOKEN_COOKIE)
        .map(|(_, value)| value.to_string())
        .filter(|token| !token.is_empty())
}

/// POST /register
pub(super) async fn register(
    State(state): State<Arc<HttpServerState>>,
    Form(form): Form<CredentialsForm>,
) -> ApiResult<impl IntoResponse> {
    let record = state.broker.register(&form.username, &form.password).await?;
    Ok((
        StatusCode::CREATED,
        Json(RegisterResponse {
            username: record.username,
        }),
    ))
}

/// POST /login
pub(super) async fn login_local(
    State(state): State<Arc<HttpServerState>>,
    Form(form): Form<CredentialsForm>,
) -> ApiResult<Response> {
    let issued = state
        .broker
        .authenticate(names::LOCAL, form.into_fields())
        .await?;
    Ok(login_response(&state, issued))
}

/// POST /login-radius
pub(super) async fn login_radius(
    State(state): State<Arc<HttpServerState>>,
    Form(form): Form<CredentialsForm>,
) -> ApiResult<Response> {
    let issued = state
        .broker
        .authenticate(names::RADIUS, form.into_fields())
        .await?;
    Ok(login_response(&state, issued))
}

/// POST /login/:strategy with a JSON object of credential fields
pub(super) async fn login_with(
    State(state): State<Arc<HttpServerState>>,
    Path(strategy): Path<String>,
    Json(fields): Json<HashMap<String, String>>,
) -> ApiResult<Response> {
    let issued = state.broker.authenticate(&strategy, fields).await?;
    Ok(login_response(&state, issued))
}

/// GET /oauth/:provider
pub(super) async fn oauth_start(
    State(state): State<Arc<HttpServerState>>,
    Path(provider): Path<String>,
) -> ApiResult<Redirect> {
    state
        .broker
        .authorize_url(&provider)
        .map(Redirect::to)
        .ok_or(BrokerError::UnknownStrategy(provider))
}

/// GET /oauth/:provider/callback?code=
///
/// Only strategies with a redirect flow answer here; the password and
/// token strategies are reachable through `/login` routes alone.
pub(super) async fn oauth_callback(
    State(state): State<Arc<HttpServerState>>,
    Path(provider): Path<String>,
    Query(query): Query<CallbackQuery>,
) -> ApiResult<Response> {
    let code = query
        .code
        .filter(|code| !code.is_empty())
        .ok_or_else(|| BrokerError::Validation("no code provided".to_string()))?;
    if state.broker.authorize_url(&provider).is_none() {
        return Err(BrokerError::UnknownStrategy(provider));
    }

    let fields = HashMap::from([(CODE_FIELD.to_string(), code)]);
    let issued = state.broker.authenticate(&provider, fields).await?;
    Ok(login_response(&state, issued))
}

/// GET /
pub(super) async fn whoami(
    State(state): State<Arc<HttpServerState>>,
    headers: HeaderMap,
) -> ApiResult<Json<Principal>> {
    let token = presented_token(&headers).ok_or(BrokerError::Malformed)?;
    let principal = state.broker.validate_bearer(&token)?;
    Ok(Json(principal))
}

/// GET /logout
///
/// Tokens are stateless; logging out only drops the cookie.
pub(super) async fn logout(State(state): State<Arc<HttpServerState>>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::SET_COOKIE, token_cookie("", 0, state.cookie_secure))],
        Json(LogoutResponse {
            status: "logged_out",
        }),
    )
}
