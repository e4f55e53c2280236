//! User accounts, roles and the auth DTOs built from them.

use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};

use super::common::{
    bind_all, bind_all_scalar, like_pattern, Filters, Page, SqlValue,
};

/// Account roles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    User,
    Admin,
}

impl UserRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserRole::User => "user",
            UserRole::Admin => "admin",
        }
    }
}

impl std::fmt::Display for UserRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for UserRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "user" => Ok(UserRole::User),
            "admin" => Ok(UserRole::Admin),
            _ => Err(format!("Unknown role: {}", s)),
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct User {
    pub id: String,
    pub name: String,
    pub email: String,
    pub password_hash: Option<String>,
    pub role: String,
    pub avatar: Option<String>,
    pub google_id: Option<String>,
    pub is_email_verified: bool,
    pub is_active: bool,
    pub email_verification_otp: Option<String>,
    pub email_verification_expires: Option<String>,
    pub reset_password_token_hash: Option<String>,
    pub reset_password_expires: Option<String>,
    pub last_login: Option<String>,
    pub deleted_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl User {
    pub fn role_enum(&self) -> UserRole {
        self.role.parse().unwrap_or(UserRole::User)
    }

    pub fn is_admin(&self) -> bool {
        self.role_enum() == UserRole::Admin
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

/// Compact user view returned with session tokens
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserSummary {
    pub id: String,
    pub name: String,
    pub email: String,
    pub role: String,
    pub avatar: Option<String>,
}

impl From<&User> for UserSummary {
    fn from(user: &User) -> Self {
        Self {
            id: user.id.clone(),
            name: user.name.clone(),
            email: user.email.clone(),
            role: user.role.clone(),
            avatar: user.avatar.clone(),
        }
    }
}

/// Full profile view for the owner and for admins; never exposes secrets
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub id: String,
    pub name: String,
    pub email: String,
    pub role: String,
    pub avatar: Option<String>,
    pub is_email_verified: bool,
    pub is_active: bool,
    pub has_password: bool,
    pub google_linked: bool,
    pub last_login: Option<String>,
    pub deleted_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl From<User> for UserProfile {
    fn from(user: User) -> Self {
        Self {
            has_password: user.password_hash.is_some(),
            google_linked: user.google_id.is_some(),
            id: user.id,
            name: user.name,
            email: user.email,
            role: user.role,
            avatar: user.avatar,
            is_email_verified: user.is_email_verified,
            is_active: user.is_active,
            last_login: user.last_login,
            deleted_at: user.deleted_at,
            created_at: user.created_at,
            updated_at: user.updated_at,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterResponse {
    pub message: String,
    pub requires_verification: bool,
    pub email: String,
}

#[derive(Debug, Deserialize)]
pub struct VerifyEmailRequest {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub otp: String,
}

#[derive(Debug, Deserialize)]
pub struct EmailRequest {
    #[serde(default)]
    pub email: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct GoogleLoginRequest {
    pub token: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResetPasswordRequest {
    pub token: String,
    pub new_password: String,
}

#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub message: String,
    pub token: String,
    pub user: UserSummary,
}

#[derive(Debug, Serialize)]
pub struct CurrentUserResponse {
    pub user: UserSummary,
}

#[derive(Debug, Serialize)]
pub struct ProfileResponse {
    pub user: UserProfile,
}

#[derive(Debug, Serialize)]
pub struct UserMessageResponse {
    pub message: String,
    pub user: UserProfile,
}

#[derive(Debug, Deserialize)]
pub struct UpdateProfileRequest {
    pub name: Option<String>,
    pub email: Option<String>,
    pub avatar: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangePasswordRequest {
    #[serde(default)]
    pub current_password: Option<String>,
    pub new_password: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminUpdateUserRequest {
    pub name: Option<String>,
    pub email: Option<String>,
    pub role: Option<String>,
    pub is_active: Option<bool>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct UserListQuery {
    pub page: Option<i64>,
    pub limit: Option<i64>,
    pub search: Option<String>,
    pub role: Option<String>,
    pub is_active: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserListResponse {
    pub users: Vec<UserProfile>,
    pub total_pages: i64,
    pub current_page: i64,
    pub total: i64,
}

/// Per-user activity counters
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserStats {
    pub total_media: i64,
    pub total_size: i64,
    pub total_views: i64,
    pub total_downloads: i64,
    pub total_galleries: i64,
    pub total_shared_galleries: i64,
    pub total_messages: i64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserStatsResponse {
    pub user_id: String,
    pub stats: UserStats,
}

/// Normalize an email address the way it is stored
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

pub async fn find_user_by_id(db: &SqlitePool, id: &str) -> Result<Option<User>, sqlx::Error> {
    sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = ?")
        .bind(id)
        .fetch_optional(db)
        .await
}

/// Look up by email, soft-deleted accounts included
pub async fn find_user_by_email(db: &SqlitePool, email: &str) -> Result<Option<User>, sqlx::Error> {
    sqlx::query_as::<_, User>("SELECT * FROM users WHERE email = ?")
        .bind(normalize_email(email))
        .fetch_optional(db)
        .await
}

/// Look up by email, ignoring soft-deleted accounts
pub async fn find_live_user_by_email(
    db: &SqlitePool,
    email: &str,
) -> Result<Option<User>, sqlx::Error> {
    sqlx::query_as::<_, User>("SELECT * FROM users WHERE email = ? AND deleted_at IS NULL")
        .bind(normalize_email(email))
        .fetch_optional(db)
        .await
}

/// Fields for a freshly created account
#[derive(Debug, Clone)]
pub struct NewUser {
    pub name: String,
    pub email: String,
    pub password_hash: Option<String>,
    pub role: UserRole,
    pub avatar: Option<String>,
    pub google_id: Option<String>,
    pub is_email_verified: bool,
    pub email_verification_otp: Option<String>,
    pub email_verification_expires: Option<String>,
}

/// Insert a new account and return it
pub async fn insert_user(db: &SqlitePool, new: NewUser) -> Result<User, sqlx::Error> {
    let id = uuid::Uuid::new_v4().to_string();
    let now = crate::utils::now_rfc3339();

    sqlx::query(
        r#"
        INSERT INTO users (id, name, email, password_hash, role, avatar, google_id,
                           is_email_verified, is_active, email_verification_otp,
                           email_verification_expires, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, 1, ?, ?, ?, ?)
        "#,
    )
    .bind(&id)
    .bind(new.name.trim())
    .bind(normalize_email(&new.email))
    .bind(&new.password_hash)
    .bind(new.role.as_str())
    .bind(&new.avatar)
    .bind(&new.google_id)
    .bind(new.is_email_verified)
    .bind(&new.email_verification_otp)
    .bind(&new.email_verification_expires)
    .bind(&now)
    .bind(&now)
    .execute(db)
    .await?;

    find_user_by_id(db, &id)
        .await?
        .ok_or(sqlx::Error::RowNotFound)
}

pub async fn count_admins(db: &SqlitePool) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar("SELECT COUNT(*) FROM users WHERE role = 'admin' AND deleted_at IS NULL")
        .fetch_one(db)
        .await
}

/// List users, either live or soft-deleted, with admin filters
pub async fn list_users(
    db: &SqlitePool,
    query: &UserListQuery,
    deleted: bool,
) -> Result<UserListResponse, sqlx::Error> {
    let page = Page::new(query.page, query.limit, 20, 1000);

    let mut filters = Filters::new();
    if deleted {
        filters.push("deleted_at IS NOT NULL", []);
    } else {
        filters.push("deleted_at IS NULL", []);
    }

    if let Some(search) = query.search.as_deref().filter(|s| !s.trim().is_empty()) {
        let pattern = like_pattern(search.trim());
        filters.push(
            "(name LIKE ? ESCAPE '\\' OR email LIKE ? ESCAPE '\\')",
            [SqlValue::Text(pattern.clone()), SqlValue::Text(pattern)],
        );
    }

    if let Some(role) = query.role.as_deref().and_then(|r| r.parse::<UserRole>().ok()) {
        filters.push("role = ?", [SqlValue::Text(role.as_str().to_string())]);
    }

    if let Some(active) = query.is_active.as_deref() {
        let active = active.eq_ignore_ascii_case("true") || active == "1";
        filters.push("is_active = ?", [SqlValue::Int(active as i64)]);
    }

    let where_clause = filters.where_clause();

    let count_sql = format!("SELECT COUNT(*) FROM users {}", where_clause);
    let total = bind_all_scalar(sqlx::query_scalar::<_, i64>(&count_sql), &filters)
        .fetch_one(db)
        .await?;

    let order = if deleted { "deleted_at DESC" } else { "created_at DESC" };
    let sql = format!(
        "SELECT * FROM users {} ORDER BY {} LIMIT ? OFFSET ?",
        where_clause, order
    );
    let users = bind_all(sqlx::query_as::<_, User>(&sql), &filters)
        .bind(page.limit)
        .bind(page.offset())
        .fetch_all(db)
        .await?;

    Ok(UserListResponse {
        users: users.into_iter().map(UserProfile::from).collect(),
        total_pages: page.total_pages(total),
        current_page: page.page,
        total,
    })
}

/// Aggregate activity counters for one user
pub async fn user_stats(db: &SqlitePool, user_id: &str) -> Result<UserStats, sqlx::Error> {
    let totals = super::media::usage_totals(db, user_id).await?;

    let total_galleries: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM galleries WHERE user_id = ?")
        .bind(user_id)
        .fetch_one(db)
        .await?;

    let total_shared_galleries: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM shared_galleries WHERE shared_with = ?")
            .bind(user_id)
            .fetch_one(db)
            .await?;

    let total_messages: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM contacts WHERE user_id = ?")
        .bind(user_id)
        .fetch_one(db)
        .await?;

    Ok(UserStats {
        total_media: totals.total_media,
        total_size: totals.total_size,
        total_views: totals.total_views,
        total_downloads: totals.total_downloads,
        total_galleries,
        total_shared_galleries,
        total_messages,
    })
}
