//! Model file handling.
//!
//! Loading itself belongs to the backend; this module only validates files.

mod loader;

pub use loader::{validate_model_file, LoadError, ModelFileInfo, GGUF_MAGIC, SUPPORTED_VERSIONS};
