use thiserror::Error;

use crate::document::Variant;

/// Why a raw JSON value could not be turned into a document.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("document must be a JSON object")]
    NotAnObject,
    #[error("missing required field: {0}")]
    MissingField(&'static str),
    #[error("{0} must be an array")]
    TypeError(&'static str),
    #[error("invalid JSON: {0}")]
    InvalidJson(String),
}

#[derive(Debug, Error)]
pub enum EditorError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("at least one document must be kept")]
    LastDocument,

    #[error("attachment not found in blob store: {key}")]
    AttachmentMissing { key: String },

    #[error("blob store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("no exportable documents: every document needs a title")]
    NoExportableDocuments,

    #[error("document index {index} out of range (len {len})")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("document {index} is a {actual} document but the editor is in {mode} mode")]
    ModeMismatch {
        index: usize,
        mode: Variant,
        actual: Variant,
    },

    #[error("tips can be nested at most {max} levels deep")]
    TipDepthExceeded { max: usize },

    #[error("invalid attachment: {0}")]
    InvalidAttachment(String),

    #[error("invalid edit: {0}")]
    InvalidEdit(String),

    #[error("document {index} is not a recipe document")]
    NotARecipe { index: usize },

    #[error("archive: {0}")]
    Archive(String),

    #[error("persistence: {0}")]
    Persistence(String),
}

impl From<zip::result::ZipError> for EditorError {
    fn from(err: zip::result::ZipError) -> Self {
        Self::Archive(err.to_string())
    }
}

pub type EditorResult<T> = Result<T, EditorError>;
