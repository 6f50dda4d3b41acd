#![forbid(unsafe_code)]

pub mod archive;
pub mod blob_store;
pub mod cli;
pub mod collection;
pub mod config;
pub mod document;
pub mod error;
pub mod form;
pub mod logging;
pub mod naming;
pub mod normalize;
pub mod persist;
pub mod session;
pub mod workspace;

pub use collection::DocumentCollection;
pub use document::{Document, Variant};
pub use error::{EditorError, EditorResult, ValidationError};
pub use session::{Command, CommandOutcome, EditorSession, SharedSession};
