//! Gallery CRUD and sharing.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use std::sync::Arc;
use tracing::info;

use super::access::{ensure_gallery_modifiable, ensure_gallery_viewable, load_gallery};
use super::auth::AuthUser;
use super::error::{ApiError, ValidationErrorBuilder};
use super::validation::{validate_description, validate_gallery_name};
use crate::db::{
    find_live_user_by_email, find_share, find_user_by_id, gallery_details, list_galleries,
    list_shared_with, list_shares, name_taken, CreateGalleryRequest, GalleryEnvelope,
    GalleryListQuery, GalleryListResponse, GalleryMessageResponse, GalleryResponse,
    ShareCreatedResponse, ShareGalleryRequest, ShareListResponse, UpdateGalleryRequest, User,
};
use crate::utils::now_rfc3339;
use crate::AppState;

async fn render(state: &AppState, id: &str, viewer: &User) -> Result<GalleryResponse, ApiError> {
    gallery_details(&state.db, id, &viewer.id)
        .await?
        .ok_or_else(|| ApiError::not_found("Gallery not found"))
}

pub async fn create_gallery(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    Json(req): Json<CreateGalleryRequest>,
) -> Result<(StatusCode, Json<GalleryMessageResponse>), ApiError> {
    let name = req.name.trim().to_string();
    let description = req.description.unwrap_or_default().trim().to_string();

    let mut errors = ValidationErrorBuilder::new();
    errors
        .check("name", validate_gallery_name(&name))
        .check("description", validate_description(&description));
    errors.finish()?;

    if name_taken(&state.db, &user.id, &name, None).await? {
        return Err(ApiError::bad_request("Gallery with this name already exists"));
    }

    let id = uuid::Uuid::new_v4().to_string();
    let now = now_rfc3339();

    sqlx::query(
        r#"
        INSERT INTO galleries (id, name, description, user_id, is_public, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&id)
    .bind(&name)
    .bind(&description)
    .bind(&user.id)
    .bind(req.is_public.unwrap_or(false))
    .bind(&now)
    .bind(&now)
    .execute(&state.db)
    .await?;

    info!(gallery_id = %id, user_id = %user.id, "Gallery created");

    Ok((
        StatusCode::CREATED,
        Json(GalleryMessageResponse {
            message: "Gallery created successfully".to_string(),
            gallery: render(&state, &id, &user).await?,
        }),
    ))
}

pub async fn list(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    Query(query): Query<GalleryListQuery>,
) -> Result<Json<GalleryListResponse>, ApiError> {
    let galleries = list_galleries(&state.db, &user.id, &query).await?;
    Ok(Json(GalleryListResponse { galleries }))
}

pub async fn shared_with_me(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
) -> Result<Json<GalleryListResponse>, ApiError> {
    let galleries = list_shared_with(&state.db, &user.id).await?;
    Ok(Json(GalleryListResponse { galleries }))
}

pub async fn get_gallery(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    Path(id): Path<String>,
) -> Result<Json<GalleryEnvelope>, ApiError> {
    let gallery = load_gallery(&state.db, &id).await?;
    ensure_gallery_viewable(&state.db, Some(&user), &gallery).await?;

    Ok(Json(GalleryEnvelope {
        gallery: render(&state, &gallery.id, &user).await?,
    }))
}

pub async fn update_gallery(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    Path(id): Path<String>,
    Json(req): Json<UpdateGalleryRequest>,
) -> Result<Json<GalleryMessageResponse>, ApiError> {
    let gallery = load_gallery(&state.db, &id).await?;
    ensure_gallery_modifiable(&user, &gallery)?;

    let name = req
        .name
        .map(|n| n.trim().to_string())
        .unwrap_or(gallery.name.clone());
    let description = req
        .description
        .map(|d| d.trim().to_string())
        .unwrap_or(gallery.description.clone());

    let mut errors = ValidationErrorBuilder::new();
    errors
        .check("name", validate_gallery_name(&name))
        .check("description", validate_description(&description));
    errors.finish()?;

    if name != gallery.name
        && name_taken(&state.db, &gallery.user_id, &name, Some(&gallery.id)).await?
    {
        return Err(ApiError::bad_request("Gallery with this name already exists"));
    }

    sqlx::query(
        r#"
        UPDATE galleries
        SET name = ?, description = ?, is_public = ?, cover_image = ?, updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(&name)
    .bind(&description)
    .bind(req.is_public.unwrap_or(gallery.is_public))
    .bind(req.cover_image.unwrap_or(gallery.cover_image.clone()))
    .bind(now_rfc3339())
    .bind(&gallery.id)
    .execute(&state.db)
    .await?;

    Ok(Json(GalleryMessageResponse {
        message: "Gallery updated successfully".to_string(),
        gallery: render(&state, &gallery.id, &user).await?,
    }))
}

/// Media in the gallery is detached, shares are removed with it
pub async fn delete_gallery(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let gallery = load_gallery(&state.db, &id).await?;
    ensure_gallery_modifiable(&user, &gallery)?;

    let mut tx = state.db.begin().await?;
    sqlx::query("UPDATE media SET gallery_id = NULL, updated_at = ? WHERE gallery_id = ?")
        .bind(now_rfc3339())
        .bind(&gallery.id)
        .execute(&mut *tx)
        .await?;
    sqlx::query("DELETE FROM shared_galleries WHERE gallery_id = ?")
        .bind(&gallery.id)
        .execute(&mut *tx)
        .await?;
    sqlx::query("DELETE FROM galleries WHERE id = ?")
        .bind(&gallery.id)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;

    info!(gallery_id = %gallery.id, user_id = %user.id, "Gallery deleted");
    Ok(Json(serde_json::json!({ "message": "Gallery deleted successfully" })))
}

pub async fn share_gallery(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    Path(id): Path<String>,
    Json(req): Json<ShareGalleryRequest>,
) -> Result<(StatusCode, Json<ShareCreatedResponse>), ApiError> {
    let gallery = load_gallery(&state.db, &id).await?;
    ensure_gallery_modifiable(&user, &gallery)?;

    let email = req.email.as_deref().map(str::trim).filter(|e| !e.is_empty());
    let user_id = req.user_id.as_deref().map(str::trim).filter(|u| !u.is_empty());

    let target = match (email, user_id) {
        (Some(email), _) => find_live_user_by_email(&state.db, email).await?,
        (None, Some(user_id)) => find_user_by_id(&state.db, user_id)
            .await?
            .filter(|u| !u.is_deleted()),
        (None, None) => {
            return Err(ApiError::bad_request("Email or user ID is required"));
        }
    }
    .ok_or_else(|| ApiError::not_found("User not found"))?;

    if target.id == gallery.user_id {
        return Err(ApiError::bad_request("Cannot share a gallery with its owner"));
    }

    if find_share(&state.db, &gallery.id, &target.id).await?.is_some() {
        return Err(ApiError::bad_request("Gallery is already shared with this user"));
    }

    sqlx::query(
        r#"
        INSERT INTO shared_galleries (id, gallery_id, shared_by, shared_with, shared_at)
        VALUES (?, ?, ?, ?, ?)
        "#,
    )
    .bind(uuid::Uuid::new_v4().to_string())
    .bind(&gallery.id)
    .bind(&user.id)
    .bind(&target.id)
    .bind(now_rfc3339())
    .execute(&state.db)
    .await?;

    info!(
        gallery_id = %gallery.id,
        shared_by = %user.id,
        shared_with = %target.id,
        "Gallery shared"
    );

    let share = find_share(&state.db, &gallery.id, &target.id)
        .await?
        .ok_or_else(|| ApiError::internal("Share was not recorded"))?;

    Ok((
        StatusCode::CREATED,
        Json(ShareCreatedResponse {
            message: "Gallery shared successfully".to_string(),
            share,
        }),
    ))
}

pub async fn gallery_shares(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    Path(id): Path<String>,
) -> Result<Json<ShareListResponse>, ApiError> {
    let gallery = load_gallery(&state.db, &id).await?;
    ensure_gallery_modifiable(&user, &gallery)?;

    let shares = list_shares(&state.db, &gallery.id).await?;
    Ok(Json(ShareListResponse { shares }))
}

/// The owner or an admin revokes a share; the share target may also leave
pub async fn unshare_gallery(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    Path((id, user_id)): Path<(String, String)>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let gallery = load_gallery(&state.db, &id).await?;
    if user.id != user_id {
        ensure_gallery_modifiable(&user, &gallery)?;
    }

    let result =
        sqlx::query("DELETE FROM shared_galleries WHERE gallery_id = ? AND shared_with = ?")
            .bind(&gallery.id)
            .bind(&user_id)
            .execute(&state.db)
            .await?;

    if result.rows_affected() == 0 {
        return Err(ApiError::not_found("Share not found"));
    }

    info!(gallery_id = %gallery.id, user_id = %user_id, removed_by = %user.id, "Gallery share removed");
    Ok(Json(serde_json::json!({ "message": "Gallery unshared successfully" })))
}
