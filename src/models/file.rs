use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// File visibility
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    Public,
    Private,
}

impl Visibility {
    pub fn as_str(&self) -> &'static str {
        match self {
            Visibility::Public => "public",
            Visibility::Private => "private",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "public" => Some(Visibility::Public),
            "private" => Some(Visibility::Private),
            _ => None,
        }
    }
}

/// File record model - a named, owned pointer to a content blob
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct FileRecord {
    pub id: String,
    pub owner_id: String,
    pub hash: String,
    pub display_name: String,
    pub folder_id: Option<String>,
    pub visibility: String,
    pub download_count: i64,
    pub created_at: String,
    pub updated_at: String,
}

/// File record response with blob metadata joined in
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct FileRecordResponse {
    pub id: String,
    pub owner_id: String,
    pub hash: String,
    pub display_name: String,
    pub folder_id: Option<String>,
    pub visibility: String,
    pub download_count: i64,
    pub size: i64,
    pub mime_type: String,
    pub created_at: String,
    pub updated_at: String,
}

impl FileRecordResponse {
    pub fn is_public(&self) -> bool {
        self.visibility == "public"
    }
}

/// Upload response; `is_new_content` reports whether quota was consumed
/// for novel content or the payload deduplicated against an existing blob.
#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub file: FileRecordResponse,
    pub is_new_content: bool,
}

/// Update file request (rename / move / visibility change)
#[derive(Debug, Deserialize)]
pub struct UpdateFileRequest {
    pub display_name: Option<String>,
    pub folder_id: Option<String>,
    pub visibility: Option<Visibility>,
}

/// Sort key for file listings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SortKey {
    #[default]
    CreatedAt,
    Name,
    Size,
}

impl SortKey {
    pub fn column(&self) -> &'static str {
        match self {
            SortKey::CreatedAt => "f.created_at",
            SortKey::Name => "f.display_name",
            SortKey::Size => "b.size",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    Desc,
}

impl SortOrder {
    pub fn keyword(&self) -> &'static str {
        match self {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        }
    }
}

/// File listing query parameters
#[derive(Debug, Deserialize, Default)]
pub struct ListQuery {
    pub folder_id: Option<String>,
    pub visibility: Option<Visibility>,
    /// Substring match on the display name
    pub name: Option<String>,
    pub sort: Option<SortKey>,
    pub order: Option<SortOrder>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// File list response
#[derive(Debug, Serialize)]
pub struct FileListResponse {
    pub files: Vec<FileRecordResponse>,
}
