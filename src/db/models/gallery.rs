//! Galleries and the share records granting read access to them.

use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};

use super::common::{bind_all, like_pattern, parse_flag, Filters, OwnerSummary, SqlValue};

#[derive(Debug, Clone, FromRow)]
pub struct Gallery {
    pub id: String,
    pub name: String,
    pub description: String,
    pub user_id: String,
    pub is_public: bool,
    pub cover_image: String,
    pub created_at: String,
    pub updated_at: String,
}

/// Gallery joined with its owner, media count and, when viewed by a share
/// target, the share that grants access
#[derive(Debug, Clone, FromRow)]
struct GalleryDetailRow {
    id: String,
    name: String,
    description: String,
    user_id: String,
    is_public: bool,
    cover_image: String,
    created_at: String,
    updated_at: String,
    owner_name: String,
    owner_email: String,
    media_count: i64,
    shared_by: Option<String>,
    shared_by_name: Option<String>,
    shared_by_email: Option<String>,
    shared_at: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GalleryResponse {
    pub id: String,
    pub name: String,
    pub description: String,
    pub is_public: bool,
    pub cover_image: String,
    pub user: OwnerSummary,
    pub media_count: i64,
    pub is_owner: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shared_by: Option<OwnerSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shared_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl GalleryDetailRow {
    fn into_response(self, viewer_id: &str) -> GalleryResponse {
        let shared_by = match (self.shared_by, self.shared_by_name, self.shared_by_email) {
            (Some(id), Some(name), Some(email)) => Some(OwnerSummary { id, name, email }),
            _ => None,
        };

        GalleryResponse {
            is_owner: self.user_id == viewer_id,
            user: OwnerSummary {
                id: self.user_id,
                name: self.owner_name,
                email: self.owner_email,
            },
            id: self.id,
            name: self.name,
            description: self.description,
            is_public: self.is_public,
            cover_image: self.cover_image,
            media_count: self.media_count,
            shared_by,
            shared_at: self.shared_at,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateGalleryRequest {
    #[serde(default)]
    pub name: String,
    pub description: Option<String>,
    pub is_public: Option<bool>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateGalleryRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    pub is_public: Option<bool>,
    pub cover_image: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct GalleryListQuery {
    pub search: Option<String>,
    pub is_public: Option<String>,
    pub owned_only: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShareGalleryRequest {
    pub email: Option<String>,
    pub user_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct GalleryEnvelope {
    pub gallery: GalleryResponse,
}

#[derive(Debug, Serialize)]
pub struct GalleryMessageResponse {
    pub message: String,
    pub gallery: GalleryResponse,
}

#[derive(Debug, Serialize)]
pub struct GalleryListResponse {
    pub galleries: Vec<GalleryResponse>,
}

#[derive(Debug, Clone, FromRow)]
struct ShareRow {
    id: String,
    gallery_id: String,
    shared_with: String,
    user_name: String,
    user_email: String,
    shared_at: String,
}

/// One share of a gallery, as seen by its owner
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ShareResponse {
    pub id: String,
    pub gallery_id: String,
    pub user: OwnerSummary,
    pub shared_at: String,
}

impl From<ShareRow> for ShareResponse {
    fn from(row: ShareRow) -> Self {
        Self {
            id: row.id,
            gallery_id: row.gallery_id,
            user: OwnerSummary {
                id: row.shared_with,
                name: row.user_name,
                email: row.user_email,
            },
            shared_at: row.shared_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ShareListResponse {
    pub shares: Vec<ShareResponse>,
}

#[derive(Debug, Serialize)]
pub struct ShareCreatedResponse {
    pub message: String,
    pub share: ShareResponse,
}

const DETAIL_SELECT: &str = r#"
    SELECT g.id, g.name, g.description, g.user_id, g.is_public, g.cover_image,
           g.created_at, g.updated_at,
           u.name AS owner_name, u.email AS owner_email,
           (SELECT COUNT(*) FROM media m WHERE m.gallery_id = g.id) AS media_count,
           s.shared_by AS shared_by, sb.name AS shared_by_name, sb.email AS shared_by_email,
           s.shared_at AS shared_at
    FROM galleries g
    JOIN users u ON u.id = g.user_id
    LEFT JOIN shared_galleries s ON s.gallery_id = g.id AND s.shared_with = ?
    LEFT JOIN users sb ON sb.id = s.shared_by
"#;

pub async fn find_gallery(db: &SqlitePool, id: &str) -> Result<Option<Gallery>, sqlx::Error> {
    sqlx::query_as::<_, Gallery>("SELECT * FROM galleries WHERE id = ?")
        .bind(id)
        .fetch_optional(db)
        .await
}

/// Gallery with owner and counts, rendered for `viewer_id`
pub async fn gallery_details(
    db: &SqlitePool,
    id: &str,
    viewer_id: &str,
) -> Result<Option<GalleryResponse>, sqlx::Error> {
    let sql = format!("{} WHERE g.id = ?", DETAIL_SELECT);
    let row = sqlx::query_as::<_, GalleryDetailRow>(&sql)
        .bind(viewer_id)
        .bind(id)
        .fetch_optional(db)
        .await?;

    Ok(row.map(|r| r.into_response(viewer_id)))
}

/// Galleries owned by `viewer_id`, plus those shared with them unless `ownedOnly` is set
pub async fn list_galleries(
    db: &SqlitePool,
    viewer_id: &str,
    query: &GalleryListQuery,
) -> Result<Vec<GalleryResponse>, sqlx::Error> {
    let mut filters = Filters::new();

    if parse_flag(query.owned_only.as_deref()).unwrap_or(false) {
        filters.push("g.user_id = ?", [SqlValue::Text(viewer_id.to_string())]);
    } else {
        filters.push(
            "(g.user_id = ? OR s.id IS NOT NULL)",
            [SqlValue::Text(viewer_id.to_string())],
        );
    }

    if let Some(search) = query.search.as_deref().filter(|s| !s.trim().is_empty()) {
        let pattern = like_pattern(search.trim());
        filters.push(
            "(g.name LIKE ? ESCAPE '\\' OR g.description LIKE ? ESCAPE '\\')",
            [SqlValue::Text(pattern.clone()), SqlValue::Text(pattern)],
        );
    }

    if let Some(public) = parse_flag(query.is_public.as_deref()) {
        filters.push("g.is_public = ?", [SqlValue::Int(public as i64)]);
    }

    let sql = format!(
        "{} {} ORDER BY g.created_at DESC",
        DETAIL_SELECT,
        filters.where_clause()
    );

    let rows = bind_all(
        sqlx::query_as::<_, GalleryDetailRow>(&sql).bind(viewer_id),
        &filters,
    )
    .fetch_all(db)
    .await?;

    Ok(rows.into_iter().map(|r| r.into_response(viewer_id)).collect())
}

/// Galleries shared with `user_id`, most recent share first
pub async fn list_shared_with(
    db: &SqlitePool,
    user_id: &str,
) -> Result<Vec<GalleryResponse>, sqlx::Error> {
    let sql = format!("{} WHERE s.id IS NOT NULL ORDER BY s.shared_at DESC", DETAIL_SELECT);
    let rows = sqlx::query_as::<_, GalleryDetailRow>(&sql)
        .bind(user_id)
        .fetch_all(db)
        .await?;

    Ok(rows.into_iter().map(|r| r.into_response(user_id)).collect())
}

pub async fn is_shared_with(
    db: &SqlitePool,
    gallery_id: &str,
    user_id: &str,
) -> Result<bool, sqlx::Error> {
    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM shared_galleries WHERE gallery_id = ? AND shared_with = ?",
    )
    .bind(gallery_id)
    .bind(user_id)
    .fetch_one(db)
    .await?;

    Ok(count > 0)
}

pub async fn name_taken(
    db: &SqlitePool,
    owner_id: &str,
    name: &str,
    except_id: Option<&str>,
) -> Result<bool, sqlx::Error> {
    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM galleries WHERE user_id = ? AND name = ? AND id != ?",
    )
    .bind(owner_id)
    .bind(name)
    .bind(except_id.unwrap_or(""))
    .fetch_one(db)
    .await?;

    Ok(count > 0)
}

pub async fn list_shares(
    db: &SqlitePool,
    gallery_id: &str,
) -> Result<Vec<ShareResponse>, sqlx::Error> {
    let rows = sqlx::query_as::<_, ShareRow>(
        r#"
        SELECT s.id, s.gallery_id, s.shared_with, u.name AS user_name, u.email AS user_email,
               s.shared_at
        FROM shared_galleries s
        JOIN users u ON u.id = s.shared_with
        WHERE s.gallery_id = ?
        ORDER BY s.shared_at DESC
        "#,
    )
    .bind(gallery_id)
    .fetch_all(db)
    .await?;

    Ok(rows.into_iter().map(ShareResponse::from).collect())
}

pub async fn find_share(
    db: &SqlitePool,
    gallery_id: &str,
    user_id: &str,
) -> Result<Option<ShareResponse>, sqlx::Error> {
    let row = sqlx::query_as::<_, ShareRow>(
        r#"
        SELECT s.id, s.gallery_id, s.shared_with, u.name AS user_name, u.email AS user_email,
               s.shared_at
        FROM shared_galleries s
        JOIN users u ON u.id = s.shared_with
        WHERE s.gallery_id = ? AND s.shared_with = ?
        "#,
    )
    .bind(gallery_id)
    .bind(user_id)
    .fetch_optional(db)
    .await?;

    Ok(row.map(ShareResponse::from))
}
