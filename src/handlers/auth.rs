use axum::{
    extract::State,
    http::{header, StatusCode},
    response::Json,
};

use crate::{
    auth::session_cookie,
    errors::ServiceError,
    services::accounts::{
        AuthResponse, ForgotPasswordRequest, ForgotPasswordResponse, LoginRequest,
        RegisterRequest, ResetPasswordRequest,
    },
    ApiResponse, ApiResult, AppState,
};

type SessionResponse = (
    StatusCode,
    [(header::HeaderName, String); 1],
    Json<ApiResponse<AuthResponse>>,
);

fn with_session(state: &AppState, status: StatusCode, auth: AuthResponse) -> SessionResponse {
    let cookie = session_cookie(&auth.token, state.config.is_production());
    (
        status,
        [(header::SET_COOKIE, cookie)],
        Json(ApiResponse::success(auth)),
    )
}

#[utoipa::path(
    post,
    path = "/api/auth/register",
    summary = "Register account",
    description = "Create a customer or enterprise account and its profile",
    request_body = RegisterRequest,
    responses(
        (status = 201, description = "Account created", body = ApiResponse<AuthResponse>),
        (status = 400, description = "Invalid request data", body = crate::errors::ErrorResponse),
        (status = 409, description = "Email or username taken", body = crate::errors::ErrorResponse),
    ),
    tag = "auth"
)]
pub async fn register(
    State(state): State<AppState>,
    Json(request): Json<RegisterRequest>,
) -> Result<SessionResponse, ServiceError> {
    let auth = state.services.accounts.register(request).await?;
    Ok(with_session(&state, StatusCode::CREATED, auth))
}

#[utoipa::path(
    post,
    path = "/api/auth/login",
    summary = "Log in",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Logged in; the token is also set as an httpOnly cookie", body = ApiResponse<AuthResponse>),
        (status = 401, description = "Invalid credentials", body = crate::errors::ErrorResponse),
        (status = 403, description = "Account inactive", body = crate::errors::ErrorResponse),
    ),
    tag = "auth"
)]
pub async fn login(
    State(state): State<AppState>,
    Json(request): Json<LoginRequest>,
) -> Result<SessionResponse, ServiceError> {
    let auth = state.services.accounts.login(request).await?;
    Ok(with_session(&state, StatusCode::OK, auth))
}

#[utoipa::path(
    post,
    path = "/api/auth/forgot-password",
    summary = "Request a password reset",
    request_body = ForgotPasswordRequest,
    responses(
        (status = 200, description = "Accepted whether or not the email exists", body = ApiResponse<ForgotPasswordResponse>),
        (status = 429, description = "Rate limit exceeded", body = crate::errors::ErrorResponse),
    ),
    tag = "auth"
)]
pub async fn forgot_password(
    State(state): State<AppState>,
    Json(request): Json<ForgotPasswordRequest>,
) -> ApiResult<ForgotPasswordResponse> {
    let response = state.services.accounts.forgot_password(request).await?;
    Ok(Json(ApiResponse::success(response)))
}

#[utoipa::path(
    post,
    path = "/api/auth/forgot-password/resend",
    summary = "Resend a password reset",
    request_body = ForgotPasswordRequest,
    responses(
        (status = 200, description = "Accepted whether or not the email exists", body = ApiResponse<ForgotPasswordResponse>),
        (status = 429, description = "Rate limit exceeded", body = crate::errors::ErrorResponse),
    ),
    tag = "auth"
)]
pub async fn resend_reset(
    State(state): State<AppState>,
    Json(request): Json<ForgotPasswordRequest>,
) -> ApiResult<ForgotPasswordResponse> {
    let response = state.services.accounts.resend_reset(request).await?;
    Ok(Json(ApiResponse::success(response)))
}

#[utoipa::path(
    post,
    path = "/api/auth/reset-password",
    summary = "Reset password with a token",
    request_body = ResetPasswordRequest,
    responses(
        (status = 200, description = "Password updated"),
        (status = 400, description = "Invalid or expired token", body = crate::errors::ErrorResponse),
    ),
    tag = "auth"
)]
pub async fn reset_password(
    State(state): State<AppState>,
    Json(request): Json<ResetPasswordRequest>,
) -> ApiResult<()> {
    state.services.accounts.reset_password(request).await?;
    let mut response = ApiResponse::success(());
    response.message = Some("Password updated".to_string());
    Ok(Json(response))
}
