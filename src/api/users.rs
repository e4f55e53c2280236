//! Profile management for the signed-in user and account moderation for admins.

use axum::{
    extract::{Path, Query, State},
    Json,
};
use std::sync::Arc;
use tracing::info;

use super::auth::{hash_password_or_500, verify_password, AdminUser, AuthUser};
use super::error::{ApiError, ValidationErrorBuilder};
use super::validation::{validate_email, validate_name, validate_password};
use crate::db::{
    filenames_for_user, find_user_by_email, find_user_by_id, list_users, normalize_email,
    user_stats, AdminUpdateUserRequest, ChangePasswordRequest, ProfileResponse,
    UpdateProfileRequest, User, UserListQuery, UserListResponse, UserMessageResponse,
    UserProfile, UserRole, UserStatsResponse,
};
use crate::utils::now_rfc3339;
use crate::AppState;

async fn load_user(state: &AppState, id: &str) -> Result<User, ApiError> {
    find_user_by_id(&state.db, id)
        .await?
        .ok_or_else(|| ApiError::not_found("User not found"))
}

/// Reject an email already used by a different account
async fn ensure_email_free(state: &AppState, email: &str, user_id: &str) -> Result<(), ApiError> {
    match find_user_by_email(&state.db, email).await? {
        Some(other) if other.id != user_id => {
            Err(ApiError::bad_request("Email is already in use"))
        }
        _ => Ok(()),
    }
}

async fn profile_message(
    state: &AppState,
    id: &str,
    message: &str,
) -> Result<Json<UserMessageResponse>, ApiError> {
    let user = load_user(state, id).await?;
    Ok(Json(UserMessageResponse {
        message: message.to_string(),
        user: UserProfile::from(user),
    }))
}

fn message(text: &str) -> Json<serde_json::Value> {
    Json(serde_json::json!({ "message": text }))
}

pub async fn get_profile(AuthUser(user): AuthUser) -> Json<ProfileResponse> {
    Json(ProfileResponse {
        user: UserProfile::from(user),
    })
}

pub async fn update_profile(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    Json(req): Json<UpdateProfileRequest>,
) -> Result<Json<UserMessageResponse>, ApiError> {
    let mut errors = ValidationErrorBuilder::new();
    if let Some(name) = &req.name {
        errors.check("name", validate_name(name));
    }
    if let Some(email) = &req.email {
        errors.check("email", validate_email(email));
    }
    errors.finish()?;

    let name = req
        .name
        .as_deref()
        .map(|n| n.trim().to_string())
        .unwrap_or(user.name.clone());
    let email = req
        .email
        .as_deref()
        .map(normalize_email)
        .unwrap_or(user.email.clone());
    let avatar = match req.avatar {
        Some(a) if a.trim().is_empty() => None,
        Some(a) => Some(a),
        None => user.avatar.clone(),
    };

    if email != user.email {
        ensure_email_free(&state, &email, &user.id).await?;
    }

    sqlx::query("UPDATE users SET name = ?, email = ?, avatar = ?, updated_at = ? WHERE id = ?")
        .bind(&name)
        .bind(&email)
        .bind(&avatar)
        .bind(now_rfc3339())
        .bind(&user.id)
        .execute(&state.db)
        .await?;

    profile_message(&state, &user.id, "Profile updated successfully").await
}

pub async fn change_password(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    Json(req): Json<ChangePasswordRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    validate_password(&req.new_password)
        .map_err(|e| ApiError::validation_field("newPassword", e))?;

    // Accounts created through Google have no password to confirm
    if let Some(hash) = user.password_hash.as_deref() {
        let current = req.current_password.as_deref().unwrap_or("");
        if current.is_empty() {
            return Err(ApiError::bad_request("Current password is required"));
        }
        if !verify_password(current, hash) {
            return Err(ApiError::bad_request("Current password is incorrect"));
        }
    }

    sqlx::query("UPDATE users SET password_hash = ?, updated_at = ? WHERE id = ?")
        .bind(hash_password_or_500(&req.new_password)?)
        .bind(now_rfc3339())
        .bind(&user.id)
        .execute(&state.db)
        .await?;

    info!(user_id = %user.id, "Password changed");
    Ok(message("Password changed successfully"))
}

pub async fn my_stats(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
) -> Result<Json<UserStatsResponse>, ApiError> {
    let stats = user_stats(&state.db, &user.id).await?;
    Ok(Json(UserStatsResponse {
        user_id: user.id,
        stats,
    }))
}

pub async fn admin_list_users(
    State(state): State<Arc<AppState>>,
    AdminUser(_admin): AdminUser,
    Query(query): Query<UserListQuery>,
) -> Result<Json<UserListResponse>, ApiError> {
    Ok(Json(list_users(&state.db, &query, false).await?))
}

pub async fn admin_list_deleted(
    State(state): State<Arc<AppState>>,
    AdminUser(_admin): AdminUser,
    Query(query): Query<UserListQuery>,
) -> Result<Json<UserListResponse>, ApiError> {
    Ok(Json(list_users(&state.db, &query, true).await?))
}

pub async fn admin_get_user(
    State(state): State<Arc<AppState>>,
    AdminUser(_admin): AdminUser,
    Path(id): Path<String>,
) -> Result<Json<ProfileResponse>, ApiError> {
    let user = load_user(&state, &id).await?;
    Ok(Json(ProfileResponse {
        user: UserProfile::from(user),
    }))
}

pub async fn admin_update_user(
    State(state): State<Arc<AppState>>,
    AdminUser(admin): AdminUser,
    Path(id): Path<String>,
    Json(req): Json<AdminUpdateUserRequest>,
) -> Result<Json<UserMessageResponse>, ApiError> {
    let target = load_user(&state, &id).await?;

    let mut errors = ValidationErrorBuilder::new();
    if let Some(name) = &req.name {
        errors.check("name", validate_name(name));
    }
    if let Some(email) = &req.email {
        errors.check("email", validate_email(email));
    }
    errors.finish()?;

    let role = match req.role.as_deref() {
        Some(r) => r
            .parse::<UserRole>()
            .map_err(|_| ApiError::bad_request("Invalid role"))?,
        None => target.role_enum(),
    };
    let is_active = req.is_active.unwrap_or(target.is_active);

    if target.id == admin.id {
        if role != UserRole::Admin {
            return Err(ApiError::bad_request("You cannot change your own role"));
        }
        if !is_active {
            return Err(ApiError::bad_request("You cannot deactivate your own account"));
        }
    }

    let name = req
        .name
        .as_deref()
        .map(|n| n.trim().to_string())
        .unwrap_or(target.name.clone());
    let email = req
        .email
        .as_deref()
        .map(normalize_email)
        .unwrap_or(target.email.clone());

    if email != target.email {
        ensure_email_free(&state, &email, &target.id).await?;
    }

    sqlx::query(
        "UPDATE users SET name = ?, email = ?, role = ?, is_active = ?, updated_at = ? WHERE id = ?",
    )
    .bind(&name)
    .bind(&email)
    .bind(role.as_str())
    .bind(is_active)
    .bind(now_rfc3339())
    .bind(&target.id)
    .execute(&state.db)
    .await?;

    info!(admin_id = %admin.id, user_id = %target.id, role = %role, is_active, "Admin updated user");

    profile_message(&state, &target.id, "User updated successfully").await
}

/// Soft delete: the account is hidden and can no longer sign in
pub async fn admin_delete_user(
    State(state): State<Arc<AppState>>,
    AdminUser(admin): AdminUser,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if id == admin.id {
        return Err(ApiError::bad_request("You cannot delete your own account"));
    }

    let target = load_user(&state, &id).await?;
    if target.is_deleted() {
        return Err(ApiError::bad_request("User is already deleted"));
    }

    let now = now_rfc3339();
    sqlx::query("UPDATE users SET deleted_at = ?, updated_at = ? WHERE id = ?")
        .bind(&now)
        .bind(&now)
        .bind(&target.id)
        .execute(&state.db)
        .await?;

    info!(admin_id = %admin.id, user_id = %target.id, "User soft-deleted");
    Ok(message("User deleted successfully"))
}

pub async fn admin_recover_user(
    State(state): State<Arc<AppState>>,
    AdminUser(admin): AdminUser,
    Path(id): Path<String>,
) -> Result<Json<UserMessageResponse>, ApiError> {
    let target = load_user(&state, &id).await?;
    if !target.is_deleted() {
        return Err(ApiError::bad_request("User is not deleted"));
    }

    sqlx::query("UPDATE users SET deleted_at = NULL, is_active = 1, updated_at = ? WHERE id = ?")
        .bind(now_rfc3339())
        .bind(&target.id)
        .execute(&state.db)
        .await?;

    info!(admin_id = %admin.id, user_id = %target.id, "User recovered");
    profile_message(&state, &target.id, "User recovered successfully").await
}

/// Remove the account with its galleries, shares and media, and unlink its files
pub async fn admin_permanent_delete_user(
    State(state): State<Arc<AppState>>,
    AdminUser(admin): AdminUser,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if id == admin.id {
        return Err(ApiError::bad_request("You cannot delete your own account"));
    }

    let target = load_user(&state, &id).await?;
    let filenames = filenames_for_user(&state.db, &target.id).await?;

    sqlx::query("DELETE FROM users WHERE id = ?")
        .bind(&target.id)
        .execute(&state.db)
        .await?;

    for filename in &filenames {
        state.storage.discard(filename).await;
    }

    info!(
        admin_id = %admin.id,
        user_id = %target.id,
        files = filenames.len(),
        "User permanently deleted"
    );
    Ok(message("User permanently deleted"))
}

pub async fn admin_reactivate_user(
    State(state): State<Arc<AppState>>,
    AdminUser(admin): AdminUser,
    Path(id): Path<String>,
) -> Result<Json<UserMessageResponse>, ApiError> {
    let target = load_user(&state, &id).await?;

    sqlx::query("UPDATE users SET is_active = 1, updated_at = ? WHERE id = ?")
        .bind(now_rfc3339())
        .bind(&target.id)
        .execute(&state.db)
        .await?;

    info!(admin_id = %admin.id, user_id = %target.id, "User reactivated");
    profile_message(&state, &target.id, "User reactivated successfully").await
}

pub async fn admin_user_stats(
    State(state): State<Arc<AppState>>,
    AdminUser(_admin): AdminUser,
    Path(id): Path<String>,
) -> Result<Json<UserStatsResponse>, ApiError> {
    let target = load_user(&state, &id).await?;
    let stats = user_stats(&state.db, &target.id).await?;
    Ok(Json(UserStatsResponse {
        user_id: target.id,
        stats,
    }))
}
