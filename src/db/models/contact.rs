use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};

use super::common::{
    bind_all, bind_all_scalar, like_pattern, Filters, OwnerSummary, Page, SqlValue,
};

/// Moderation state of a contact message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContactStatus {
    Unread,
    Read,
    Replied,
}

impl ContactStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContactStatus::Unread => "unread",
            ContactStatus::Read => "read",
            ContactStatus::Replied => "replied",
        }
    }
}

impl std::fmt::Display for ContactStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ContactStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unread" => Ok(ContactStatus::Unread),
            "read" => Ok(ContactStatus::Read),
            "replied" => Ok(ContactStatus::Replied),
            _ => Err(format!("Invalid status: {}", s)),
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct Contact {
    pub id: String,
    pub name: String,
    pub email: String,
    pub message: String,
    pub user_id: Option<String>,
    pub status: String,
    pub is_resolved: bool,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, FromRow)]
struct ContactWithSender {
    #[sqlx(flatten)]
    contact: Contact,
    sender_name: Option<String>,
    sender_email: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContactResponse {
    pub id: String,
    pub name: String,
    pub email: String,
    pub message: String,
    /// Registered sender, when the message was sent while signed in
    pub user: Option<OwnerSummary>,
    pub status: String,
    pub is_resolved: bool,
    pub created_at: String,
    pub updated_at: String,
}

impl From<ContactWithSender> for ContactResponse {
    fn from(row: ContactWithSender) -> Self {
        let c = row.contact;
        let user = match (c.user_id, row.sender_name, row.sender_email) {
            (Some(id), Some(name), Some(email)) => Some(OwnerSummary { id, name, email }),
            _ => None,
        };

        Self {
            id: c.id,
            name: c.name,
            email: c.email,
            message: c.message,
            user,
            status: c.status,
            is_resolved: c.is_resolved,
            created_at: c.created_at,
            updated_at: c.updated_at,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct SubmitContactRequest {
    pub name: Option<String>,
    pub email: Option<String>,
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub struct UpdateContactRequest {
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateContactStatusRequest {
    pub status: Option<String>,
    pub is_resolved: Option<bool>,
}

#[derive(Debug, Deserialize, Default)]
pub struct ContactListQuery {
    pub page: Option<i64>,
    pub limit: Option<i64>,
    pub status: Option<String>,
    pub search: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContactListResponse {
    pub messages: Vec<ContactResponse>,
    pub total_pages: i64,
    pub current_page: i64,
    pub total: i64,
}

#[derive(Debug, Serialize)]
pub struct ContactMessageResponse {
    pub message: String,
    pub contact: ContactResponse,
}

const SELECT_WITH_SENDER: &str = r#"
    SELECT c.*, u.name AS sender_name, u.email AS sender_email
    FROM contacts c
    LEFT JOIN users u ON u.id = c.user_id
"#;

pub async fn find_contact(db: &SqlitePool, id: &str) -> Result<Option<Contact>, sqlx::Error> {
    sqlx::query_as::<_, Contact>("SELECT * FROM contacts WHERE id = ?")
        .bind(id)
        .fetch_optional(db)
        .await
}

pub async fn contact_details(
    db: &SqlitePool,
    id: &str,
) -> Result<Option<ContactResponse>, sqlx::Error> {
    let sql = format!("{} WHERE c.id = ?", SELECT_WITH_SENDER);
    let row = sqlx::query_as::<_, ContactWithSender>(&sql)
        .bind(id)
        .fetch_optional(db)
        .await?;

    Ok(row.map(ContactResponse::from))
}

/// Messages sent by `sender_id`, or every message when `sender_id` is `None`
pub async fn list_contacts(
    db: &SqlitePool,
    sender_id: Option<&str>,
    query: &ContactListQuery,
) -> Result<ContactListResponse, sqlx::Error> {
    let default_limit = if sender_id.is_some() { 10 } else { 20 };
    let page = Page::new(query.page, query.limit, default_limit, 100);

    let mut filters = Filters::new();

    if let Some(sender_id) = sender_id {
        filters.push("c.user_id = ?", [SqlValue::Text(sender_id.to_string())]);
    }

    if let Some(status) = query
        .status
        .as_deref()
        .and_then(|s| s.parse::<ContactStatus>().ok())
    {
        filters.push("c.status = ?", [SqlValue::Text(status.as_str().to_string())]);
    }

    if let Some(search) = query.search.as_deref().filter(|s| !s.trim().is_empty()) {
        let pattern = like_pattern(search.trim());
        filters.push(
            "(c.name LIKE ? ESCAPE '\\' OR c.email LIKE ? ESCAPE '\\' OR c.message LIKE ? ESCAPE '\\')",
            [
                SqlValue::Text(pattern.clone()),
                SqlValue::Text(pattern.clone()),
                SqlValue::Text(pattern),
            ],
        );
    }

    let where_clause = filters.where_clause();

    let count_sql = format!("SELECT COUNT(*) FROM contacts c {}", where_clause);
    let total = bind_all_scalar(sqlx::query_scalar::<_, i64>(&count_sql), &filters)
        .fetch_one(db)
        .await?;

    let sql = format!(
        "{} {} ORDER BY c.created_at DESC LIMIT ? OFFSET ?",
        SELECT_WITH_SENDER, where_clause
    );
    let rows = bind_all(sqlx::query_as::<_, ContactWithSender>(&sql), &filters)
        .bind(page.limit)
        .bind(page.offset())
        .fetch_all(db)
        .await?;

    Ok(ContactListResponse {
        messages: rows.into_iter().map(ContactResponse::from).collect(),
        total_pages: page.total_pages(total),
        current_page: page.page,
        total,
    })
}
