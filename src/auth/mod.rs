/*!
 * # Authentication and Authorization Module
 *
 * JWT authentication for the FoodHub API. Tokens are read from the
 * `Authorization: Bearer` header or, for browser clients, from the httpOnly
 * `token` cookie. Route groups are gated by account role; admins pass every
 * gate.
 */

use axum::{
    async_trait,
    extract::{FromRequestParts, Request, State},
    http::{header, request::Parts, HeaderMap},
    middleware::Next,
    response::{IntoResponse, Response},
};
use chrono::{Duration as ChronoDuration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use crate::config::AppConfig;
use crate::entities::account::{self, AccountRole};
use crate::errors::ServiceError;

pub mod password;

/// Name of the cookie carrying the session token
pub const TOKEN_COOKIE: &str = "token";

/// Claim structure for JWT tokens
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,       // Account ID
    pub role: AccountRole, // Account role
    pub email: String,     // Account email
    pub iss: String,       // Issuer
    pub aud: String,       // Audience
    pub iat: i64,          // Issued at time
    pub exp: i64,          // Expiration time
}

/// Authenticated principal extracted from a validated token
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthUser {
    pub account_id: Uuid,
    pub role: AccountRole,
    pub email: String,
}

impl AuthUser {
    pub fn is_admin(&self) -> bool {
        self.role == AccountRole::Admin
    }

    /// Admins satisfy every role requirement.
    pub fn has_role(&self, role: AccountRole) -> bool {
        self.is_admin() || self.role == role
    }
}

#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub jwt_secret: String,
    pub jwt_issuer: String,
    pub jwt_audience: String,
    pub token_expiration: std::time::Duration,
}

impl AuthConfig {
    pub fn new(
        jwt_secret: String,
        jwt_issuer: String,
        jwt_audience: String,
        token_expiration: std::time::Duration,
    ) -> Self {
        Self {
            jwt_secret,
            jwt_issuer,
            jwt_audience,
            token_expiration,
        }
    }
}

impl From<&AppConfig> for AuthConfig {
    fn from(config: &AppConfig) -> Self {
        Self::new(
            config.jwt_secret.clone(),
            config.jwt_issuer.clone(),
            config.jwt_audience.clone(),
            std::time::Duration::from_secs(config.jwt_expiration_secs),
        )
    }
}

/// Issued token returned by register and login
#[derive(Debug, Clone, Serialize, Deserialize, utoipa::ToSchema)]
pub struct AccessToken {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: i64,
}

#[derive(Debug, Clone)]
pub struct AuthService {
    config: AuthConfig,
}

impl AuthService {
    pub fn new(config: AuthConfig) -> Self {
        Self { config }
    }

    pub fn token_expiration_secs(&self) -> i64 {
        self.config.token_expiration.as_secs() as i64
    }

    /// Issue an access token for an account
    pub fn issue_token(&self, account: &account::Model) -> Result<AccessToken, AuthError> {
        let now = Utc::now();
        let exp = now
            + ChronoDuration::from_std(self.config.token_expiration)
                .map_err(|_| AuthError::InternalError("Invalid token duration".to_string()))?;

        let claims = Claims {
            sub: account.id.to_string(),
            role: account.role,
            email: account.email.clone(),
            iss: self.config.jwt_issuer.clone(),
            aud: self.config.jwt_audience.clone(),
            iat: now.timestamp(),
            exp: exp.timestamp(),
        };

        let access_token = encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(self.config.jwt_secret.as_bytes()),
        )
        .map_err(|e| AuthError::TokenCreation(e.to_string()))?;

        Ok(AccessToken {
            access_token,
            token_type: "Bearer".to_string(),
            expires_in: self.token_expiration_secs(),
        })
    }

    /// Validate a JWT token and extract the claims
    pub fn validate_token(&self, token: &str) -> Result<Claims, AuthError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[self.config.jwt_issuer.as_str()]);
        validation.set_audience(&[self.config.jwt_audience.as_str()]);

        let claims = decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.config.jwt_secret.as_bytes()),
            &validation,
        )
        .map_err(|e| match e.kind() {
            jsonwebtoken::errors::ErrorKind::ExpiredSignature => AuthError::TokenExpired,
            _ => AuthError::InvalidToken,
        })?
        .claims;

        Ok(claims)
    }

    /// Resolve the principal of a validated token
    pub fn authenticate(&self, token: &str) -> Result<AuthUser, AuthError> {
        let claims = self.validate_token(token)?;
        let account_id = Uuid::parse_str(&claims.sub).map_err(|_| AuthError::InvalidToken)?;
        Ok(AuthUser {
            account_id,
            role: claims.role,
            email: claims.email,
        })
    }
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Authentication required")]
    MissingAuth,

    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Invalid authentication token")]
    InvalidToken,

    #[error("Token has expired")]
    TokenExpired,

    #[error("Token creation failed: {0}")]
    TokenCreation(String),

    #[error("Insufficient permissions")]
    InsufficientPermissions,

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl From<AuthError> for ServiceError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::MissingAuth
            | AuthError::InvalidCredentials
            | AuthError::InvalidToken
            | AuthError::TokenExpired => ServiceError::Unauthorized(err.to_string()),
            AuthError::InsufficientPermissions => ServiceError::Forbidden(err.to_string()),
            AuthError::TokenCreation(msg) | AuthError::InternalError(msg) => {
                ServiceError::InternalError(msg)
            }
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        ServiceError::from(self).into_response()
    }
}

/// Handlers behind `with_auth` take the principal as an extractor
#[async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthUser>()
            .cloned()
            .ok_or(AuthError::MissingAuth)
    }
}

/// Role middleware to check if a user has the required role
pub async fn role_middleware(
    State(required_role): State<AccountRole>,
    request: Request,
    next: Next,
) -> Result<Response, AuthError> {
    let user = request
        .extensions()
        .get::<AuthUser>()
        .ok_or(AuthError::MissingAuth)?;

    if !user.has_role(required_role) {
        debug!(
            account_id = %user.account_id,
            role = %user.role,
            required = %required_role,
            "Role gate rejected request"
        );
        return Err(AuthError::InsufficientPermissions);
    }

    Ok(next.run(request).await)
}

/// Authentication middleware that extracts and validates auth tokens
pub async fn auth_middleware(mut request: Request, next: Next) -> Response {
    let auth_service = match request.extensions().get::<Arc<AuthService>>() {
        Some(service) => service.clone(),
        None => {
            return AuthError::InternalError("Authentication service not available".to_string())
                .into_response();
        }
    };

    let user = extract_token(request.headers())
        .ok_or(AuthError::MissingAuth)
        .and_then(|token| auth_service.authenticate(&token));

    match user {
        Ok(user) => {
            request.extensions_mut().insert(user);
            next.run(request).await
        }
        Err(e) => e.into_response(),
    }
}

/// Bearer header first, then the `token` cookie.
pub fn extract_token(headers: &HeaderMap) -> Option<String> {
    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(|token| token.trim().to_string())
        .filter(|token| !token.is_empty());
    if bearer.is_some() {
        return bearer;
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

/// `Set-Cookie` value for a freshly issued token
pub fn session_cookie(token: &AccessToken, secure: bool) -> String {
    let mut cookie = format!(
        "{}={}; HttpOnly; Path=/; SameSite=Lax; Max-Age={}",
        TOKEN_COOKIE, token.access_token, token.expires_in
    );
    if secure {
        cookie.push_str("; Secure");
    }
    cookie
}

/// Extension methods for Router to add auth middleware
pub trait AuthRouterExt {
    fn with_auth(self) -> Self;
    fn with_role(self, role: AccountRole) -> Self;
}

impl<S> AuthRouterExt for axum::Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    fn with_auth(self) -> Self {
        self.layer(axum::middleware::from_fn(auth_middleware))
    }

    fn with_role(self, role: AccountRole) -> Self {
        self.layer(axum::middleware::from_fn_with_state(role, role_middleware))
            .with_auth()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::account::AccountStatus;
    use assert_matches::assert_matches;
    use axum::{body::Body, http::StatusCode, routing::get, Extension, Router};
    use tower::ServiceExt;

    fn service() -> AuthService {
        AuthService::new(AuthConfig::new(
            "unit-test-secret-that-is-long-enough-for-hs256-signing".into(),
            "foodhub-auth".into(),
            "foodhub-api".into(),
            std::time::Duration::from_secs(3600),
        ))
    }

    fn account(role: AccountRole) -> account::Model {
        account::Model {
            id: Uuid::new_v4(),
            email: "diner@example.com".into(),
            username: "diner".into(),
            password_hash: String::new(),
            role,
            status: AccountStatus::Active,
            reset_token_hash: None,
            reset_token_expires_at: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn issued_token_round_trips() {
        let auth = service();
        let account = account(AccountRole::Customer);
        let token = auth.issue_token(&account).unwrap();

        let user = auth.authenticate(&token.access_token).unwrap();
        assert_eq!(user.account_id, account.id);
        assert_eq!(user.role, AccountRole::Customer);
        assert_eq!(user.email, "diner@example.com");
    }

    #[test]
    fn token_from_other_audience_is_rejected() {
        let auth = service();
        let other = AuthService::new(AuthConfig::new(
            "unit-test-secret-that-is-long-enough-for-hs256-signing".into(),
            "foodhub-auth".into(),
            "someone-else".into(),
            std::time::Duration::from_secs(3600),
        ));
        let token = other.issue_token(&account(AccountRole::Admin)).unwrap();
        assert_matches!(
            auth.validate_token(&token.access_token),
            Err(AuthError::InvalidToken)
        );
    }

    #[test]
    fn admin_passes_every_role_gate() {
        let admin = AuthUser {
            account_id: Uuid::new_v4(),
            role: AccountRole::Admin,
            email: "root@example.com".into(),
        };
        assert!(admin.has_role(AccountRole::Customer));
        assert!(admin.has_role(AccountRole::Enterprise));

        let customer = AuthUser {
            role: AccountRole::Customer,
            ..admin
        };
        assert!(!customer.has_role(AccountRole::Enterprise));
    }

    #[test]
    fn token_is_read_from_cookie_when_header_missing() {
        let mut headers = HeaderMap::new();
        headers.insert(header::COOKIE, "theme=dark; token=abc.def".parse().unwrap());
        assert_eq!(extract_token(&headers).as_deref(), Some("abc.def"));

        headers.insert(header::AUTHORIZATION, "Bearer from-header".parse().unwrap());
        assert_eq!(extract_token(&headers).as_deref(), Some("from-header"));
    }

    async fn status_for(role: AccountRole, token: Option<String>) -> StatusCode {
        let auth = Arc::new(service());
        let app = Router::new()
            .route("/gated", get(|| async { "ok" }))
            .with_role(role)
            .layer(Extension(auth));

        let mut request = axum::http::Request::builder().uri("/gated");
        if let Some(token) = token {
            request = request.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        app.oneshot(request.body(Body::empty()).unwrap())
            .await
            .unwrap()
            .status()
    }

    #[tokio::test]
    async fn role_gate_statuses() {
        let auth = service();
        let customer = auth.issue_token(&account(AccountRole::Customer)).unwrap();
        let admin = auth.issue_token(&account(AccountRole::Admin)).unwrap();

        assert_eq!(
            status_for(AccountRole::Customer, None).await,
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            status_for(AccountRole::Customer, Some("garbage".into())).await,
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            status_for(AccountRole::Enterprise, Some(customer.access_token.clone())).await,
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            status_for(AccountRole::Customer, Some(customer.access_token)).await,
            StatusCode::OK
        );
        assert_eq!(
            status_for(AccountRole::Enterprise, Some(admin.access_token)).await,
            StatusCode::OK
        );
    }
}
