use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum IwError {
    #[error("note not found: {0}")]
    NoteNotFound(Uuid),

    #[error("bookmark not found: {0}")]
    BookmarkNotFound(Uuid),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("cache error: {0}")]
    Cache(String),

    #[error("embedding error: {0}")]
    Embedding(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("auth error: {0}")]
    Auth(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl IwError {
    /// Not-found error for the given entity kind.
    pub fn not_found(kind: crate::EntityKind, id: Uuid) -> Self {
        match kind {
            crate::EntityKind::Note => Self::NoteNotFound(id),
            crate::EntityKind::Bookmark => Self::BookmarkNotFound(id),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NoteNotFound(_) | Self::BookmarkNotFound(_))
    }
}

pub type IwResult<T> = Result<T, IwError>;
