//! Uploaded media items and their listing queries.

use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};

use super::common::{
    bind_all, bind_all_scalar, like_pattern, parse_flag, split_list, Filters, OwnerSummary, Page,
    SortOrder, SqlValue, UsageTotals,
};
use crate::utils::format_size;

#[derive(Debug, Clone, FromRow)]
pub struct Media {
    pub id: String,
    pub title: String,
    pub description: String,
    /// JSON array of strings
    pub tags: String,
    pub filename: String,
    pub original_name: String,
    pub file_url: String,
    pub file_size: i64,
    pub mime_type: String,
    pub width: Option<i64>,
    pub height: Option<i64>,
    pub user_id: String,
    pub gallery_id: Option<String>,
    pub views: i64,
    pub downloads: i64,
    pub is_public: bool,
    pub created_at: String,
    pub updated_at: String,
}

impl Media {
    pub fn tag_list(&self) -> Vec<String> {
        serde_json::from_str(&self.tags).unwrap_or_default()
    }
}

#[derive(Debug, Clone, FromRow)]
struct MediaWithOwner {
    #[sqlx(flatten)]
    media: Media,
    owner_name: String,
    owner_email: String,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct Dimensions {
    pub width: i64,
    pub height: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaResponse {
    pub id: String,
    pub title: String,
    pub description: String,
    pub tags: Vec<String>,
    pub filename: String,
    pub original_name: String,
    pub file_url: String,
    pub file_size: i64,
    pub formatted_size: String,
    pub mime_type: String,
    pub dimensions: Option<Dimensions>,
    pub user: OwnerSummary,
    pub gallery: Option<String>,
    pub views: i64,
    pub downloads: i64,
    pub is_public: bool,
    pub created_at: String,
    pub updated_at: String,
}

impl From<MediaWithOwner> for MediaResponse {
    fn from(row: MediaWithOwner) -> Self {
        let m = row.media;
        let tags = m.tag_list();
        let dimensions = match (m.width, m.height) {
            (Some(width), Some(height)) => Some(Dimensions { width, height }),
            _ => None,
        };

        Self {
            formatted_size: format_size(m.file_size),
            user: OwnerSummary {
                id: m.user_id,
                name: row.owner_name,
                email: row.owner_email,
            },
            id: m.id,
            title: m.title,
            description: m.description,
            tags,
            filename: m.filename,
            original_name: m.original_name,
            file_url: m.file_url,
            file_size: m.file_size,
            mime_type: m.mime_type,
            dimensions,
            gallery: m.gallery_id,
            views: m.views,
            downloads: m.downloads,
            is_public: m.is_public,
            created_at: m.created_at,
            updated_at: m.updated_at,
        }
    }
}

/// Which rows a listing may draw from, decided by the caller's permissions
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaScope {
    Everything,
    OwnedBy(String),
    PublicOf(String),
    /// A gallery's media; with `visitor`, only public items and the
    /// visitor's own
    InGallery {
        gallery_id: String,
        visitor: Option<String>,
    },
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct MediaListQuery {
    pub page: Option<i64>,
    pub limit: Option<i64>,
    pub search: Option<String>,
    pub tags: Option<String>,
    pub user_id: Option<String>,
    pub is_public: Option<String>,
    pub sort_by: Option<String>,
    pub sort_order: Option<SortOrder>,
}

/// Whitelisted sort keys; anything else sorts by creation time
pub fn sort_column(sort_by: Option<&str>) -> &'static str {
    match sort_by {
        Some("updatedAt") => "m.updated_at",
        Some("title") => "m.title",
        Some("views") => "m.views",
        Some("downloads") => "m.downloads",
        Some("fileSize") => "m.file_size",
        _ => "m.created_at",
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaListResponse {
    pub media: Vec<MediaResponse>,
    pub total_pages: i64,
    pub current_page: i64,
    pub total: i64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    pub current_page: i64,
    pub total_pages: i64,
    pub total_items: i64,
    pub has_next: bool,
    pub has_prev: bool,
}

#[derive(Debug, Serialize)]
pub struct GalleryMediaResponse {
    pub media: Vec<MediaResponse>,
    pub pagination: Pagination,
}

#[derive(Debug, Serialize)]
pub struct MediaEnvelope {
    pub media: MediaResponse,
}

#[derive(Debug, Serialize)]
pub struct MediaMessageResponse {
    pub message: String,
    pub media: MediaResponse,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum TagsInput {
    List(Vec<String>),
    Csv(String),
}

impl TagsInput {
    pub fn into_tags(self) -> Vec<String> {
        match self {
            TagsInput::List(tags) => tags
                .into_iter()
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty())
                .collect(),
            TagsInput::Csv(csv) => split_list(&csv),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateMediaRequest {
    pub title: Option<String>,
    pub description: Option<String>,
    pub tags: Option<TagsInput>,
    pub is_public: Option<bool>,
    /// Gallery id, or an empty string to detach
    pub gallery: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadZipRequest {
    #[serde(default)]
    pub media_ids: Vec<String>,
}

#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct RecentMedia {
    pub id: String,
    pub title: String,
    pub file_url: String,
    pub created_at: String,
}

const SELECT_WITH_OWNER: &str = r#"
    SELECT m.*, u.name AS owner_name, u.email AS owner_email
    FROM media m
    JOIN users u ON u.id = m.user_id
"#;

pub async fn find_media(db: &SqlitePool, id: &str) -> Result<Option<Media>, sqlx::Error> {
    sqlx::query_as::<_, Media>("SELECT * FROM media WHERE id = ?")
        .bind(id)
        .fetch_optional(db)
        .await
}

pub async fn find_media_many(db: &SqlitePool, ids: &[String]) -> Result<Vec<Media>, sqlx::Error> {
    if ids.is_empty() {
        return Ok(Vec::new());
    }

    let placeholders = vec!["?"; ids.len()].join(", ");
    let sql = format!(
        "SELECT * FROM media WHERE id IN ({}) ORDER BY created_at DESC",
        placeholders
    );
    let mut query = sqlx::query_as::<_, Media>(&sql);
    for id in ids {
        query = query.bind(id);
    }
    query.fetch_all(db).await
}

pub async fn media_details(
    db: &SqlitePool,
    id: &str,
) -> Result<Option<MediaResponse>, sqlx::Error> {
    let sql = format!("{} WHERE m.id = ?", SELECT_WITH_OWNER);
    let row = sqlx::query_as::<_, MediaWithOwner>(&sql)
        .bind(id)
        .fetch_optional(db)
        .await?;

    Ok(row.map(MediaResponse::from))
}

/// Filtered, sorted and paginated listing within `scope`.
///
/// Returns the page of media, the total matching count and the resolved page.
pub async fn list_media(
    db: &SqlitePool,
    scope: &MediaScope,
    query: &MediaListQuery,
) -> Result<(Vec<MediaResponse>, i64, Page), sqlx::Error> {
    let page = Page::new(query.page, query.limit, 12, 100);
    let mut filters = Filters::new();

    match scope {
        MediaScope::Everything => {}
        MediaScope::OwnedBy(user_id) => {
            filters.push("m.user_id = ?", [SqlValue::Text(user_id.clone())]);
        }
        MediaScope::PublicOf(user_id) => {
            filters.push(
                "m.user_id = ? AND m.is_public = 1",
                [SqlValue::Text(user_id.clone())],
            );
        }
        MediaScope::InGallery {
            gallery_id,
            visitor: None,
        } => {
            filters.push("m.gallery_id = ?", [SqlValue::Text(gallery_id.clone())]);
        }
        MediaScope::InGallery {
            gallery_id,
            visitor: Some(visitor_id),
        } => {
            filters.push(
                "m.gallery_id = ? AND (m.is_public = 1 OR m.user_id = ?)",
                [
                    SqlValue::Text(gallery_id.clone()),
                    SqlValue::Text(visitor_id.clone()),
                ],
            );
        }
    }

    if let Some(search) = query.search.as_deref().filter(|s| !s.trim().is_empty()) {
        let pattern = like_pattern(search.trim());
        filters.push(
            "(m.title LIKE ? ESCAPE '\\' OR m.description LIKE ? ESCAPE '\\' \
             OR EXISTS (SELECT 1 FROM json_each(m.tags) t WHERE t.value LIKE ? ESCAPE '\\'))",
            [
                SqlValue::Text(pattern.clone()),
                SqlValue::Text(pattern.clone()),
                SqlValue::Text(pattern),
            ],
        );
    }

    if let Some(tags) = query.tags.as_deref() {
        let tags = split_list(tags);
        if !tags.is_empty() {
            let placeholders = vec!["?"; tags.len()].join(", ");
            filters.push(
                format!(
                    "EXISTS (SELECT 1 FROM json_each(m.tags) t WHERE t.value IN ({}))",
                    placeholders
                ),
                tags.into_iter().map(SqlValue::Text),
            );
        }
    }

    if !matches!(scope, MediaScope::PublicOf(_)) {
        if let Some(public) = parse_flag(query.is_public.as_deref()) {
            filters.push("m.is_public = ?", [SqlValue::Int(public as i64)]);
        }
    }

    let where_clause = filters.where_clause();

    let count_sql = format!("SELECT COUNT(*) FROM media m {}", where_clause);
    let total = bind_all_scalar(sqlx::query_scalar::<_, i64>(&count_sql), &filters)
        .fetch_one(db)
        .await?;

    let sql = format!(
        "{} {} ORDER BY {} {}, m.id {} LIMIT ? OFFSET ?",
        SELECT_WITH_OWNER,
        where_clause,
        sort_column(query.sort_by.as_deref()),
        query.sort_order.unwrap_or_default().as_sql(),
        query.sort_order.unwrap_or_default().as_sql(),
    );
    let rows = bind_all(sqlx::query_as::<_, MediaWithOwner>(&sql), &filters)
        .bind(page.limit)
        .bind(page.offset())
        .fetch_all(db)
        .await?;

    Ok((rows.into_iter().map(MediaResponse::from).collect(), total, page))
}

pub async fn usage_totals(db: &SqlitePool, user_id: &str) -> Result<UsageTotals, sqlx::Error> {
    sqlx::query_as::<_, UsageTotals>(
        r#"
        SELECT COUNT(*) AS total_media,
               COALESCE(SUM(file_size), 0) AS total_size,
               COALESCE(SUM(views), 0) AS total_views,
               COALESCE(SUM(downloads), 0) AS total_downloads
        FROM media WHERE user_id = ?
        "#,
    )
    .bind(user_id)
    .fetch_one(db)
    .await
}

pub async fn recent_media(
    db: &SqlitePool,
    user_id: &str,
    limit: i64,
) -> Result<Vec<RecentMedia>, sqlx::Error> {
    sqlx::query_as::<_, RecentMedia>(
        "SELECT id, title, file_url, created_at FROM media WHERE user_id = ? ORDER BY created_at DESC LIMIT ?",
    )
    .bind(user_id)
    .bind(limit)
    .fetch_all(db)
    .await
}

pub async fn increment_views(db: &SqlitePool, id: &str) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE media SET views = views + 1 WHERE id = ?")
        .bind(id)
        .execute(db)
        .await?;
    Ok(())
}

pub async fn increment_downloads(db: &SqlitePool, ids: &[String]) -> Result<(), sqlx::Error> {
    for id in ids {
        sqlx::query("UPDATE media SET downloads = downloads + 1 WHERE id = ?")
            .bind(id)
            .execute(db)
            .await?;
    }
    Ok(())
}

/// Stored filenames of every media item owned by `user_id`
pub async fn filenames_for_user(db: &SqlitePool, user_id: &str) -> Result<Vec<String>, sqlx::Error> {
    sqlx::query_scalar("SELECT filename FROM media WHERE user_id = ?")
        .bind(user_id)
        .fetch_all(db)
        .await
}
