use axum::{
    body::Body,
    extract::{Multipart, Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_util::io::ReaderStream;
use tracing::{error, info, warn};

use super::access::{
    ensure_gallery_modifiable, ensure_gallery_viewable, ensure_media_modifiable,
    ensure_media_viewable, load_gallery, load_media, sees_private_gallery_media,
};
use super::auth::{AuthUser, OptionalUser};
use super::error::{ApiError, ValidationErrorBuilder};
use super::validation::{validate_description, validate_tags, validate_title};
use crate::db::{
    find_media_many, increment_downloads, increment_views, list_media, media_details,
    parse_flag, recent_media, split_list, user_stats, DownloadZipRequest,
    GalleryMediaResponse, MediaEnvelope, MediaListQuery, MediaListResponse,
    MediaMessageResponse, MediaResponse, MediaScope, Pagination, RecentMedia,
    UpdateMediaRequest, User, UserStats,
};
use crate::storage::archive::{build_zip, ArchiveEntry, ArchiveError};
use crate::storage::{image_dimensions, StoredFile};
use crate::utils::now_rfc3339;
use crate::AppState;

const RECENT_MEDIA_LIMIT: i64 = 5;
const ZIP_FILENAME: &str = "media-gallery.zip";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaStatsResponse {
    pub stats: UserStats,
    pub recent_media: Vec<RecentMedia>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaStatsQuery {
    pub user_id: Option<String>,
}

/// Fields collected from the upload form
#[derive(Default)]
struct UploadForm {
    file: Option<UploadedFile>,
    title: Option<String>,
    description: Option<String>,
    tags: Option<String>,
    is_public: Option<String>,
    gallery: Option<String>,
}

struct UploadedFile {
    bytes: Vec<u8>,
    original_name: String,
    content_type: String,
}

async fn read_upload_form(mut multipart: Multipart) -> Result<UploadForm, ApiError> {
    let mut form = UploadForm::default();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(format!("Failed to read multipart: {}", e)))?
    {
        let name = field.name().map(str::to_string).unwrap_or_default();

        match name.as_str() {
            "media" | "file" => {
                if form.file.is_some() {
                    return Err(ApiError::bad_request("Only one file may be uploaded at a time"));
                }
                let original_name = field.file_name().unwrap_or("upload").to_string();
                let content_type = field
                    .content_type()
                    .unwrap_or("application/octet-stream")
                    .to_string();
                let bytes = field.bytes().await.map_err(|e| {
                    ApiError::bad_request(format!("Failed to read file data: {}", e))
                })?;
                form.file = Some(UploadedFile {
                    bytes: bytes.to_vec(),
                    original_name,
                    content_type,
                });
            }
            "title" | "description" | "tags" | "isPublic" | "gallery" => {
                let value = field.text().await.map_err(|e| {
                    ApiError::bad_request(format!("Failed to read field {}: {}", name, e))
                })?;
                let slot = match name.as_str() {
                    "title" => &mut form.title,
                    "description" => &mut form.description,
                    "tags" => &mut form.tags,
                    "isPublic" => &mut form.is_public,
                    _ => &mut form.gallery,
                };
                *slot = Some(value);
            }
            _ => {}
        }
    }

    Ok(form)
}

/// Title defaults to the uploaded file's name without its extension
fn default_title(original_name: &str) -> String {
    std::path::Path::new(original_name)
        .file_stem()
        .and_then(|s| s.to_str())
        .filter(|s| !s.trim().is_empty())
        .unwrap_or("Untitled")
        .to_string()
}

async fn load_media_response(state: &AppState, id: &str) -> Result<MediaResponse, ApiError> {
    media_details(&state.db, id)
        .await?
        .ok_or_else(|| ApiError::not_found("Media not found"))
}

pub async fn upload(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    multipart: Multipart,
) -> Result<(StatusCode, Json<MediaMessageResponse>), ApiError> {
    let form = read_upload_form(multipart).await?;
    let file = form
        .file
        .ok_or_else(|| ApiError::bad_request("No file uploaded"))?;

    let title = form
        .title
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| default_title(&file.original_name));
    let description = form.description.unwrap_or_default().trim().to_string();
    let tags = form.tags.as_deref().map(split_list).unwrap_or_default();
    let is_public = parse_flag(form.is_public.as_deref()).unwrap_or(false);

    let mut errors = ValidationErrorBuilder::new();
    errors
        .check("title", validate_title(&title))
        .check("description", validate_description(&description))
        .check("tags", validate_tags(&tags));
    errors.finish()?;

    let gallery_id = match form.gallery.as_deref().map(str::trim) {
        Some(id) if !id.is_empty() => {
            let gallery = load_gallery(&state.db, id).await?;
            if gallery.user_id != user.id {
                return Err(ApiError::forbidden("You can only upload to your own galleries"));
            }
            Some(gallery.id)
        }
        _ => None,
    };

    let kind = state.storage.validate(&file.content_type, &file.bytes)?;
    let stored = state.storage.save(kind, &file.bytes).await?;

    let dimensions = image_dimensions(&file.bytes);
    if dimensions.is_none() {
        warn!(filename = %stored.filename, "Could not read image dimensions");
    }

    let id = uuid::Uuid::new_v4().to_string();
    if let Err(e) = insert_media(
        &state,
        &id,
        &user,
        &stored,
        &file.original_name,
        (&title, &description, &tags),
        dimensions,
        gallery_id.as_deref(),
        is_public,
    )
    .await
    {
        state.storage.discard(&stored.filename).await;
        return Err(e);
    }

    info!(
        media_id = %id,
        user_id = %user.id,
        filename = %stored.filename,
        size = stored.size,
        "Media uploaded"
    );

    let media = load_media_response(&state, &id).await?;
    Ok((
        StatusCode::CREATED,
        Json(MediaMessageResponse {
            message: "Media uploaded successfully".to_string(),
            media,
        }),
    ))
}

#[allow(clippy::too_many_arguments)]
async fn insert_media(
    state: &AppState,
    id: &str,
    user: &User,
    stored: &StoredFile,
    original_name: &str,
    (title, description, tags): (&str, &str, &[String]),
    dimensions: Option<(u32, u32)>,
    gallery_id: Option<&str>,
    is_public: bool,
) -> Result<(), ApiError> {
    let now = now_rfc3339();
    let tags_json = serde_json::to_string(tags)
        .map_err(|e| ApiError::internal(format!("Failed to encode tags: {}", e)))?;

    sqlx::query(
        r#"
        INSERT INTO media (
            id, title, description, tags, filename, original_name, file_url, file_size,
            mime_type, width, height, user_id, gallery_id, is_public, created_at, updated_at
        )
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(id)
    .bind(title)
    .bind(description)
    .bind(&tags_json)
    .bind(&stored.filename)
    .bind(original_name)
    .bind(stored.url())
    .bind(stored.size as i64)
    .bind(stored.kind.mime_type())
    .bind(dimensions.map(|(w, _)| w as i64))
    .bind(dimensions.map(|(_, h)| h as i64))
    .bind(&user.id)
    .bind(gallery_id)
    .bind(is_public)
    .bind(&now)
    .bind(&now)
    .execute(&state.db)
    .await?;

    Ok(())
}

/// Non-admins list their own media, or only the public media of someone else
pub async fn list(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    Query(query): Query<MediaListQuery>,
) -> Result<Json<MediaListResponse>, ApiError> {
    let requested = query.user_id.as_deref().filter(|id| !id.is_empty());

    let scope = match (user.is_admin(), requested) {
        (true, Some(id)) => MediaScope::OwnedBy(id.to_string()),
        (true, None) => MediaScope::Everything,
        (false, Some(id)) if id != user.id => MediaScope::PublicOf(id.to_string()),
        (false, _) => MediaScope::OwnedBy(user.id.clone()),
    };

    let (media, total, page) = list_media(&state.db, &scope, &query).await?;

    Ok(Json(MediaListResponse {
        media,
        total_pages: page.total_pages(total),
        current_page: page.page,
        total,
    }))
}

pub async fn stats(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    Query(query): Query<MediaStatsQuery>,
) -> Result<Json<MediaStatsResponse>, ApiError> {
    let target = match query.user_id.as_deref().filter(|id| !id.is_empty()) {
        Some(id) if id != user.id => {
            if !user.is_admin() {
                return Err(ApiError::forbidden("Access denied"));
            }
            id.to_string()
        }
        _ => user.id.clone(),
    };

    let stats = user_stats(&state.db, &target).await?;
    let recent = recent_media(&state.db, &target, RECENT_MEDIA_LIMIT).await?;

    Ok(Json(MediaStatsResponse {
        stats,
        recent_media: recent,
    }))
}

pub async fn by_gallery(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    Path(gallery_id): Path<String>,
    Query(query): Query<MediaListQuery>,
) -> Result<Json<GalleryMediaResponse>, ApiError> {
    let gallery = load_gallery(&state.db, &gallery_id).await?;
    ensure_gallery_viewable(&state.db, Some(&user), &gallery).await?;

    let visitor = if sees_private_gallery_media(&state.db, &user, &gallery).await? {
        None
    } else {
        Some(user.id.clone())
    };
    let scope = MediaScope::InGallery {
        gallery_id: gallery.id,
        visitor,
    };
    let (media, total, page) = list_media(&state.db, &scope, &query).await?;
    let total_pages = page.total_pages(total);

    Ok(Json(GalleryMediaResponse {
        media,
        pagination: Pagination {
            current_page: page.page,
            total_pages,
            total_items: total,
            has_next: page.page < total_pages,
            has_prev: page.page > 1,
        },
    }))
}

pub async fn download_zip(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    Json(req): Json<DownloadZipRequest>,
) -> Result<Response, ApiError> {
    if req.media_ids.is_empty() {
        return Err(ApiError::bad_request("No media selected"));
    }
    let max_items = state.config.uploads.max_zip_items;
    if req.media_ids.len() > max_items {
        return Err(ApiError::bad_request(format!(
            "At most {} media can be downloaded at once",
            max_items
        )));
    }

    let mut entries = Vec::new();
    for media in find_media_many(&state.db, &req.media_ids).await? {
        if ensure_media_viewable(&state.db, Some(&user), &media).await.is_err() {
            continue;
        }
        if let Some(path) = state.storage.path_for(&media.filename) {
            entries.push(ArchiveEntry {
                id: media.id,
                path,
                name: media.original_name,
            });
        }
    }

    if entries.is_empty() {
        return Err(ApiError::not_found("No accessible media found"));
    }

    let archive = tokio::task::spawn_blocking(move || build_zip(entries))
        .await
        .map_err(|e| {
            error!(error = %e, "ZIP task panicked");
            ApiError::internal("Failed to create ZIP file")
        })?
        .map_err(|e| match e {
            ArchiveError::Empty => ApiError::not_found("No accessible media found"),
            other => {
                error!(error = %other, "Failed to build ZIP");
                ApiError::internal("Failed to create ZIP file")
            }
        })?;

    increment_downloads(&state.db, &archive.included).await?;

    info!(
        user_id = %user.id,
        files = archive.included.len(),
        size = archive.bytes.len(),
        "Built media ZIP"
    );

    Ok((
        [
            (header::CONTENT_TYPE, "application/zip".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", ZIP_FILENAME),
            ),
        ],
        archive.bytes,
    )
        .into_response())
}

/// Anonymous callers see public media; signed-in callers also count a view
pub async fn get_media(
    State(state): State<Arc<AppState>>,
    OptionalUser(viewer): OptionalUser,
    Path(id): Path<String>,
) -> Result<Json<MediaEnvelope>, ApiError> {
    let media = load_media(&state.db, &id).await?;
    ensure_media_viewable(&state.db, viewer.as_ref(), &media).await?;

    if viewer.is_some() {
        increment_views(&state.db, &media.id).await?;
    }

    Ok(Json(MediaEnvelope {
        media: load_media_response(&state, &media.id).await?,
    }))
}

pub async fn update_media(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    Path(id): Path<String>,
    Json(req): Json<UpdateMediaRequest>,
) -> Result<Json<MediaMessageResponse>, ApiError> {
    let media = load_media(&state.db, &id).await?;
    ensure_media_modifiable(&state.db, &user, &media).await?;

    let title = req
        .title
        .map(|t| t.trim().to_string())
        .unwrap_or(media.title.clone());
    let description = req
        .description
        .map(|d| d.trim().to_string())
        .unwrap_or(media.description.clone());
    let tags = req
        .tags
        .map(|t| t.into_tags())
        .unwrap_or_else(|| media.tag_list());

    let mut errors = ValidationErrorBuilder::new();
    errors
        .check("title", validate_title(&title))
        .check("description", validate_description(&description))
        .check("tags", validate_tags(&tags));
    errors.finish()?;

    let gallery_id = match req.gallery.as_deref().map(str::trim) {
        None => media.gallery_id.clone(),
        Some("") => None,
        Some(gallery_id) => {
            let gallery = load_gallery(&state.db, gallery_id).await?;
            ensure_gallery_modifiable(&user, &gallery)?;
            Some(gallery.id)
        }
    };

    let tags_json = serde_json::to_string(&tags)
        .map_err(|e| ApiError::internal(format!("Failed to encode tags: {}", e)))?;

    sqlx::query(
        r#"
        UPDATE media
        SET title = ?, description = ?, tags = ?, is_public = ?, gallery_id = ?, updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(&title)
    .bind(&description)
    .bind(&tags_json)
    .bind(req.is_public.unwrap_or(media.is_public))
    .bind(&gallery_id)
    .bind(now_rfc3339())
    .bind(&media.id)
    .execute(&state.db)
    .await?;

    Ok(Json(MediaMessageResponse {
        message: "Media updated successfully".to_string(),
        media: load_media_response(&state, &media.id).await?,
    }))
}

pub async fn delete_media(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let media = load_media(&state.db, &id).await?;
    ensure_media_modifiable(&state.db, &user, &media).await?;

    state.storage.discard(&media.filename).await;

    sqlx::query("DELETE FROM media WHERE id = ?")
        .bind(&media.id)
        .execute(&state.db)
        .await?;

    info!(media_id = %media.id, user_id = %user.id, "Media deleted");
    Ok(Json(serde_json::json!({ "message": "Media deleted successfully" })))
}

pub async fn download(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let media = load_media(&state.db, &id).await?;
    ensure_media_viewable(&state.db, Some(&user), &media).await?;

    let path = state
        .storage
        .path_for(&media.filename)
        .ok_or_else(|| ApiError::not_found("File not found"))?;

    let file = match tokio::fs::File::open(&path).await {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(ApiError::not_found("File not found"));
        }
        Err(e) => {
            error!(error = %e, path = %path.display(), "Failed to open media file");
            return Err(ApiError::storage("Failed to read media file"));
        }
    };

    let metadata = file.metadata().await.map_err(|e| {
        error!(error = %e, "Failed to read file metadata");
        ApiError::storage("Failed to read media file")
    })?;

    increment_downloads(&state.db, std::slice::from_ref(&media.id)).await?;

    let content_type = mime_guess::from_path(&media.original_name)
        .first()
        .map(|m| m.essence_str().to_string())
        .unwrap_or_else(|| media.mime_type.clone());

    let response = Response::builder()
        .header(header::CONTENT_TYPE, content_type)
        .header(
            header::CONTENT_DISPOSITION,
            format!(
                "attachment; filename=\"{}\"",
                attachment_name(&media.original_name)
            ),
        )
        .header(header::CONTENT_LENGTH, metadata.len())
        .body(Body::from_stream(ReaderStream::new(file)))
        .map_err(|e| {
            error!(error = %e, "Failed to build response");
            ApiError::internal("Failed to build response")
        })?;

    Ok(response)
}

/// Quote-safe name for a Content-Disposition header
fn attachment_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .filter(|c| !c.is_control() && *c != '"' && *c != '\\')
        .collect();
    if cleaned.trim().is_empty() {
        "download".to_string()
    } else {
        cleaned
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_title() {
        assert_eq!(default_title("beach day.jpg"), "beach day");
        assert_eq!(default_title(".png"), ".png");
        assert_eq!(default_title(""), "Untitled");
    }

    #[test]
    fn test_attachment_name() {
        assert_eq!(attachment_name("sunset.jpg"), "sunset.jpg");
        assert_eq!(attachment_name("a\"b\r\n.png"), "ab.png");
        assert_eq!(attachment_name("\"\""), "download");
    }
}
