use crate::{
    auth::{
        password::{generate_reset_token, hash_password, hash_reset_token, verify_password},
        AccessToken, AuthService,
    },
    config::AppConfig,
    db::DbPool,
    entities::{
        account::{self, AccountRole, AccountStatus},
        customer, enterprise,
    },
    errors::ServiceError,
    rate_limiter::{policies, RateLimitPolicy, RateLimiter},
};
use chrono::{DateTime, Duration, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, ConnectionTrait, EntityTrait, QueryFilter, Set,
    TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

const RESET_TOKEN_TTL_MINUTES: i64 = 60;
const RESET_REQUESTED_MESSAGE: &str =
    "If an account exists for this email, password reset instructions have been sent";

/// Customer profile owned by an account, if any.
pub async fn customer_profile<C>(
    conn: &C,
    account_id: Uuid,
) -> Result<Option<customer::Model>, ServiceError>
where
    C: ConnectionTrait,
{
    Ok(customer::Entity::find()
        .filter(customer::Column::AccountId.eq(account_id))
        .one(conn)
        .await?)
}

/// Enterprise profile owned by an account, if any.
pub async fn enterprise_profile<C>(
    conn: &C,
    account_id: Uuid,
) -> Result<Option<enterprise::Model>, ServiceError>
where
    C: ConnectionTrait,
{
    Ok(enterprise::Entity::find()
        .filter(enterprise::Column::AccountId.eq(account_id))
        .one(conn)
        .await?)
}

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct RegisterRequest {
    #[validate(email(message = "Invalid email address"))]
    pub email: String,
    #[validate(length(min = 3, max = 50, message = "Username must be 3-50 characters"))]
    pub username: String,
    #[validate(length(min = 8, max = 128, message = "Password must be 8-128 characters"))]
    pub password: String,
    pub role: AccountRole,
    #[validate(length(max = 100))]
    pub full_name: Option<String>,
    #[validate(length(min = 8, max = 20))]
    pub phone: Option<String>,
    #[validate(length(max = 500))]
    pub address: Option<String>,
    #[validate(length(min = 1, max = 100))]
    pub enterprise_name: Option<String>,
    pub open_hours: Option<String>,
    pub close_hours: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct LoginRequest {
    #[validate(email(message = "Invalid email address"))]
    pub email: String,
    #[validate(length(min = 1, message = "Password is required"))]
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct ForgotPasswordRequest {
    #[validate(email(message = "Invalid email address"))]
    pub email: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct ResetPasswordRequest {
    #[validate(length(min = 1, message = "Reset token is required"))]
    pub token: String,
    #[validate(length(min = 8, max = 128, message = "Password must be 8-128 characters"))]
    pub new_password: String,
}

/// Public view of an account
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AccountView {
    pub id: Uuid,
    pub email: String,
    pub username: String,
    pub role: AccountRole,
    pub created_at: DateTime<Utc>,
}

impl From<account::Model> for AccountView {
    fn from(model: account::Model) -> Self {
        Self {
            id: model.id,
            email: model.email,
            username: model.username,
            role: model.role,
            created_at: model.created_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AuthResponse {
    pub account: AccountView,
    pub token: AccessToken,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ForgotPasswordResponse {
    pub message: String,
    /// Only populated in development, where no mail is sent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reset_token: Option<String>,
}

#[derive(Clone)]
pub struct AccountService {
    db: Arc<DbPool>,
    auth: Arc<AuthService>,
    rate_limiter: RateLimiter,
    config: Arc<AppConfig>,
}

impl AccountService {
    pub fn new(
        db: Arc<DbPool>,
        auth: Arc<AuthService>,
        rate_limiter: RateLimiter,
        config: Arc<AppConfig>,
    ) -> Self {
        Self {
            db,
            auth,
            rate_limiter,
            config,
        }
    }

    /// Creates an account and its customer or enterprise profile.
    #[instrument(skip(self, request), fields(username = %request.username, role = %request.role))]
    pub async fn register(&self, request: RegisterRequest) -> Result<AuthResponse, ServiceError> {
        request.validate()?;
        if request.role == AccountRole::Admin {
            return Err(ServiceError::ValidationError(
                "Admin accounts cannot be self-registered".to_string(),
            ));
        }

        let email = normalize_email(&request.email);
        let username = request.username.trim().to_string();
        let db = &*self.db;

        let taken = account::Entity::find()
            .filter(
                Condition::any()
                    .add(account::Column::Email.eq(email.clone()))
                    .add(account::Column::Username.eq(username.clone())),
            )
            .one(db)
            .await?;
        if taken.is_some() {
            return Err(ServiceError::Conflict(
                "Email or username is already registered".to_string(),
            ));
        }

        let password_hash = hash_password(&request.password)?;
        let now = Utc::now();
        let account_id = Uuid::new_v4();

        let txn = db.begin().await?;

        let account = account::ActiveModel {
            id: Set(account_id),
            email: Set(email),
            username: Set(username.clone()),
            password_hash: Set(password_hash),
            role: Set(request.role),
            status: Set(AccountStatus::Active),
            reset_token_hash: Set(None),
            reset_token_expires_at: Set(None),
            created_at: Set(now),
        }
        .insert(&txn)
        .await
        .map_err(|e| match e.sql_err() {
            Some(sea_orm::SqlErr::UniqueConstraintViolation(_)) => {
                ServiceError::Conflict("Email or username is already registered".to_string())
            }
            _ => ServiceError::DatabaseError(e),
        })?;

        match request.role {
            AccountRole::Enterprise => {
                let name = request.enterprise_name.clone().ok_or_else(|| {
                    ServiceError::ValidationError("enterprise_name is required".to_string())
                })?;
                enterprise::ActiveModel {
                    id: Set(Uuid::new_v4()),
                    account_id: Set(account_id),
                    name: Set(name),
                    address: Set(request.address.clone().unwrap_or_default()),
                    phone: Set(request.phone.clone().unwrap_or_default()),
                    commission_rate: Set(None),
                    open_hours: Set(request.open_hours.clone().unwrap_or_else(|| "08:00".into())),
                    close_hours: Set(request
                        .close_hours
                        .clone()
                        .unwrap_or_else(|| "22:00".into())),
                    is_active: Set(true),
                }
                .insert(&txn)
                .await?;
            }
            _ => {
                customer::ActiveModel {
                    id: Set(Uuid::new_v4()),
                    account_id: Set(account_id),
                    full_name: Set(request.full_name.clone().unwrap_or(username)),
                    phone: Set(request.phone.clone()),
                    address: Set(request.address.clone()),
                }
                .insert(&txn)
                .await?;
            }
        }

        txn.commit().await?;

        let token = self.auth.issue_token(&account)?;
        info!(%account_id, "Account registered");
        Ok(AuthResponse {
            account: account.into(),
            token,
        })
    }

    #[instrument(skip(self, request))]
    pub async fn login(&self, request: LoginRequest) -> Result<AuthResponse, ServiceError> {
        request.validate()?;

        let account = account::Entity::find()
            .filter(account::Column::Email.eq(normalize_email(&request.email)))
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::Unauthorized("Invalid credentials".to_string()))?;

        if !verify_password(&request.password, &account.password_hash)? {
            warn!(account_id = %account.id, "Failed login attempt");
            return Err(ServiceError::Unauthorized("Invalid credentials".to_string()));
        }
        if account.status != AccountStatus::Active {
            return Err(ServiceError::Forbidden("Account is inactive".to_string()));
        }

        let token = self.auth.issue_token(&account)?;
        info!(account_id = %account.id, "Login succeeded");
        Ok(AuthResponse {
            account: account.into(),
            token,
        })
    }

    /// Always answers the same way whether or not the email is known.
    pub async fn forgot_password(
        &self,
        request: ForgotPasswordRequest,
    ) -> Result<ForgotPasswordResponse, ServiceError> {
        self.issue_reset(request, &policies::FORGOT_PASSWORD).await
    }

    pub async fn resend_reset(
        &self,
        request: ForgotPasswordRequest,
    ) -> Result<ForgotPasswordResponse, ServiceError> {
        self.issue_reset(request, &policies::RESEND_RESET).await
    }

    #[instrument(skip(self, request), fields(purpose = policy.purpose))]
    async fn issue_reset(
        &self,
        request: ForgotPasswordRequest,
        policy: &RateLimitPolicy,
    ) -> Result<ForgotPasswordResponse, ServiceError> {
        request.validate()?;
        let email = normalize_email(&request.email);
        self.rate_limiter.enforce(policy, &email).await?;

        let account = account::Entity::find()
            .filter(account::Column::Email.eq(email))
            .one(&*self.db)
            .await?;

        let mut issued = None;
        if let Some(account) = account {
            let token = generate_reset_token();
            let account_id = account.id;
            let mut active: account::ActiveModel = account.into();
            active.reset_token_hash = Set(Some(hash_reset_token(&token)));
            active.reset_token_expires_at =
                Set(Some(Utc::now() + Duration::minutes(RESET_TOKEN_TTL_MINUTES)));
            active.update(&*self.db).await?;

            info!(%account_id, "Password reset token issued");
            issued = Some(token);
        }

        Ok(ForgotPasswordResponse {
            message: RESET_REQUESTED_MESSAGE.to_string(),
            reset_token: issued.filter(|_| self.config.is_development()),
        })
    }

    #[instrument(skip(self, request))]
    pub async fn reset_password(&self, request: ResetPasswordRequest) -> Result<(), ServiceError> {
        request.validate()?;

        let invalid = || ServiceError::BadRequest("Invalid or expired reset token".to_string());
        let account = account::Entity::find()
            .filter(account::Column::ResetTokenHash.eq(hash_reset_token(request.token.trim())))
            .one(&*self.db)
            .await?
            .ok_or_else(invalid)?;

        let expired = account
            .reset_token_expires_at
            .map(|expires_at| expires_at <= Utc::now())
            .unwrap_or(true);
        if expired {
            return Err(invalid());
        }

        let account_id = account.id;
        let mut active: account::ActiveModel = account.into();
        active.password_hash = Set(hash_password(&request.new_password)?);
        active.reset_token_hash = Set(None);
        active.reset_token_expires_at = Set(None);
        active.update(&*self.db).await?;

        info!(%account_id, "Password reset completed");
        Ok(())
    }
}
