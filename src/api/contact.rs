//! Contact messages: submitted by anyone, managed by their sender and by admins.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use std::sync::Arc;
use tracing::info;

use super::auth::{AdminUser, AuthUser, OptionalUser};
use super::error::{ApiError, ValidationErrorBuilder};
use super::validation::{validate_email, validate_message, validate_name};
use crate::db::{
    contact_details, find_contact, list_contacts, normalize_email, Contact, ContactListQuery,
    ContactListResponse, ContactMessageResponse, ContactResponse, ContactStatus,
    SubmitContactRequest, UpdateContactRequest, UpdateContactStatusRequest, User,
};
use crate::utils::now_rfc3339;
use crate::AppState;

async fn load_contact(state: &AppState, id: &str) -> Result<Contact, ApiError> {
    find_contact(&state.db, id)
        .await?
        .ok_or_else(|| ApiError::not_found("Message not found"))
}

async fn render(state: &AppState, id: &str) -> Result<ContactResponse, ApiError> {
    contact_details(&state.db, id)
        .await?
        .ok_or_else(|| ApiError::not_found("Message not found"))
}

fn ensure_sender(user: &User, contact: &Contact) -> Result<(), ApiError> {
    if contact.user_id.as_deref() == Some(user.id.as_str()) {
        Ok(())
    } else {
        Err(ApiError::forbidden("Access denied"))
    }
}

/// Signed-in senders are linked to the message and may omit name and email
pub async fn submit(
    State(state): State<Arc<AppState>>,
    OptionalUser(sender): OptionalUser,
    Json(req): Json<SubmitContactRequest>,
) -> Result<(StatusCode, Json<ContactMessageResponse>), ApiError> {
    let provided = |v: Option<String>| v.map(|s| s.trim().to_string()).filter(|s| !s.is_empty());

    let name = provided(req.name)
        .or_else(|| sender.as_ref().map(|u| u.name.clone()))
        .unwrap_or_default();
    let email = provided(req.email)
        .or_else(|| sender.as_ref().map(|u| u.email.clone()))
        .unwrap_or_default();
    let message = req.message.trim().to_string();

    let mut errors = ValidationErrorBuilder::new();
    errors
        .check("name", validate_name(&name))
        .check("email", validate_email(&email))
        .check("message", validate_message(&message));
    errors.finish()?;

    let id = uuid::Uuid::new_v4().to_string();
    let now = now_rfc3339();

    sqlx::query(
        r#"
        INSERT INTO contacts (id, name, email, message, user_id, status, is_resolved, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, 0, ?, ?)
        "#,
    )
    .bind(&id)
    .bind(&name)
    .bind(normalize_email(&email))
    .bind(&message)
    .bind(sender.as_ref().map(|u| u.id.as_str()))
    .bind(ContactStatus::Unread.as_str())
    .bind(&now)
    .bind(&now)
    .execute(&state.db)
    .await?;

    info!(contact_id = %id, linked = sender.is_some(), "Contact message submitted");

    Ok((
        StatusCode::CREATED,
        Json(ContactMessageResponse {
            message: "Message submitted successfully".to_string(),
            contact: render(&state, &id).await?,
        }),
    ))
}

pub async fn my_messages(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    Query(query): Query<ContactListQuery>,
) -> Result<Json<ContactListResponse>, ApiError> {
    Ok(Json(list_contacts(&state.db, Some(&user.id), &query).await?))
}

pub async fn update_message(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    Path(id): Path<String>,
    Json(req): Json<UpdateContactRequest>,
) -> Result<Json<ContactMessageResponse>, ApiError> {
    let contact = load_contact(&state, &id).await?;
    ensure_sender(&user, &contact)?;

    let message = req.message.trim().to_string();
    validate_message(&message).map_err(|e| ApiError::validation_field("message", e))?;

    sqlx::query("UPDATE contacts SET message = ?, updated_at = ? WHERE id = ?")
        .bind(&message)
        .bind(now_rfc3339())
        .bind(&contact.id)
        .execute(&state.db)
        .await?;

    Ok(Json(ContactMessageResponse {
        message: "Message updated successfully".to_string(),
        contact: render(&state, &contact.id).await?,
    }))
}

pub async fn delete_message(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let contact = load_contact(&state, &id).await?;
    ensure_sender(&user, &contact)?;

    sqlx::query("DELETE FROM contacts WHERE id = ?")
        .bind(&contact.id)
        .execute(&state.db)
        .await?;

    Ok(Json(serde_json::json!({ "message": "Message deleted successfully" })))
}

pub async fn admin_list(
    State(state): State<Arc<AppState>>,
    AdminUser(_admin): AdminUser,
    Query(query): Query<ContactListQuery>,
) -> Result<Json<ContactListResponse>, ApiError> {
    Ok(Json(list_contacts(&state.db, None, &query).await?))
}

pub async fn admin_delete(
    State(state): State<Arc<AppState>>,
    AdminUser(admin): AdminUser,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let contact = load_contact(&state, &id).await?;

    sqlx::query("DELETE FROM contacts WHERE id = ?")
        .bind(&contact.id)
        .execute(&state.db)
        .await?;

    info!(contact_id = %contact.id, admin_id = %admin.id, "Contact message deleted by admin");
    Ok(Json(serde_json::json!({ "message": "Message deleted successfully" })))
}

pub async fn admin_update_status(
    State(state): State<Arc<AppState>>,
    AdminUser(_admin): AdminUser,
    Path(id): Path<String>,
    Json(req): Json<UpdateContactStatusRequest>,
) -> Result<Json<ContactMessageResponse>, ApiError> {
    let contact = load_contact(&state, &id).await?;

    let status = match req.status.as_deref() {
        Some(s) => s
            .parse::<ContactStatus>()
            .map_err(|_| ApiError::bad_request("Invalid status"))?
            .as_str()
            .to_string(),
        None => contact.status.clone(),
    };

    sqlx::query("UPDATE contacts SET status = ?, is_resolved = ?, updated_at = ? WHERE id = ?")
        .bind(&status)
        .bind(req.is_resolved.unwrap_or(contact.is_resolved))
        .bind(now_rfc3339())
        .bind(&contact.id)
        .execute(&state.db)
        .await?;

    Ok(Json(ContactMessageResponse {
        message: "Message status updated successfully".to_string(),
        contact: render(&state, &contact.id).await?,
    }))
}
