//! Who may view or modify media and galleries.
//!
//! Handlers never inline ownership checks; they describe the resource as a
//! `Resource` and ask `can_view` / `can_modify`.

use sqlx::SqlitePool;

use super::error::ApiError;
use crate::db::{find_gallery, is_shared_with, Gallery, Media, User};

/// The facts an access decision is made from
#[derive(Debug, Clone, Copy)]
pub struct Resource<'a> {
    pub owner_id: &'a str,
    pub is_public: bool,
    /// The caller holds a share granting read access
    pub shared_with_viewer: bool,
}

/// Anonymous callers see public resources only; signed-in callers also see
/// their own, those shared with them, and everything when admin.
pub fn can_view(viewer: Option<&User>, resource: &Resource<'_>) -> bool {
    if resource.is_public {
        return true;
    }
    match viewer {
        Some(user) => {
            user.is_admin() || user.id == resource.owner_id || resource.shared_with_viewer
        }
        None => false,
    }
}

/// Only the owner or an admin may change or delete a resource
pub fn can_modify(viewer: &User, resource: &Resource<'_>) -> bool {
    viewer.is_admin() || viewer.id == resource.owner_id
}

pub async fn gallery_resource<'a>(
    db: &SqlitePool,
    viewer: Option<&User>,
    gallery: &'a Gallery,
) -> Result<Resource<'a>, ApiError> {
    let shared_with_viewer = match viewer {
        Some(user) if user.id != gallery.user_id => {
            is_shared_with(db, &gallery.id, &user.id).await?
        }
        _ => false,
    };

    Ok(Resource {
        owner_id: &gallery.user_id,
        is_public: gallery.is_public,
        shared_with_viewer,
    })
}

/// Whether the caller may see a gallery's private media: owner, admin or a
/// share target. Visitors of a public gallery only see its public items.
pub async fn sees_private_gallery_media(
    db: &SqlitePool,
    viewer: &User,
    gallery: &Gallery,
) -> Result<bool, ApiError> {
    let resource = gallery_resource(db, Some(viewer), gallery).await?;
    Ok(can_view(
        Some(viewer),
        &Resource {
            is_public: false,
            ..resource
        },
    ))
}

/// Media inherits read access from a gallery shared with the caller
pub async fn media_resource<'a>(
    db: &SqlitePool,
    viewer: Option<&User>,
    media: &'a Media,
) -> Result<Resource<'a>, ApiError> {
    let shared_with_viewer = match (viewer, media.gallery_id.as_deref()) {
        (Some(user), Some(gallery_id)) if user.id != media.user_id => {
            is_shared_with(db, gallery_id, &user.id).await?
        }
        _ => false,
    };

    Ok(Resource {
        owner_id: &media.user_id,
        is_public: media.is_public,
        shared_with_viewer,
    })
}

pub async fn ensure_media_viewable(
    db: &SqlitePool,
    viewer: Option<&User>,
    media: &Media,
) -> Result<(), ApiError> {
    let resource = media_resource(db, viewer, media).await?;
    if can_view(viewer, &resource) {
        Ok(())
    } else {
        Err(ApiError::forbidden("Access denied"))
    }
}

pub async fn ensure_media_modifiable(
    db: &SqlitePool,
    viewer: &User,
    media: &Media,
) -> Result<(), ApiError> {
    let resource = media_resource(db, Some(viewer), media).await?;
    if can_modify(viewer, &resource) {
        Ok(())
    } else {
        Err(ApiError::forbidden("Access denied"))
    }
}

pub async fn ensure_gallery_viewable(
    db: &SqlitePool,
    viewer: Option<&User>,
    gallery: &Gallery,
) -> Result<(), ApiError> {
    let resource = gallery_resource(db, viewer, gallery).await?;
    if can_view(viewer, &resource) {
        Ok(())
    } else {
        Err(ApiError::forbidden("Access denied"))
    }
}

pub fn ensure_gallery_modifiable(viewer: &User, gallery: &Gallery) -> Result<(), ApiError> {
    let resource = Resource {
        owner_id: &gallery.user_id,
        is_public: gallery.is_public,
        shared_with_viewer: false,
    };
    if can_modify(viewer, &resource) {
        Ok(())
    } else {
        Err(ApiError::forbidden("Access denied"))
    }
}

/// Load a gallery by id or fail with 404
pub async fn load_gallery(db: &SqlitePool, id: &str) -> Result<Gallery, ApiError> {
    find_gallery(db, id)
        .await?
        .ok_or_else(|| ApiError::not_found("Gallery not found"))
}

/// Load a media item by id or fail with 404
pub async fn load_media(db: &SqlitePool, id: &str) -> Result<Media, ApiError> {
    crate::db::find_media(db, id)
        .await?
        .ok_or_else(|| ApiError::not_found("Media not found"))
}
