//! Model file validation.
//!
//! Checks the GGUF header before a path is handed to the backend so a
//! wrong or truncated file fails fast with a format error instead of a
//! backend crash.

use memmap2::Mmap;
use std::fs::File;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::engine::InferenceError;

/// File magic of GGUF model files.
pub const GGUF_MAGIC: &[u8; 4] = b"GGUF";

/// Header versions accepted.
pub const SUPPORTED_VERSIONS: std::ops::RangeInclusive<u32> = 1..=3;

const V1_HEADER_LEN: usize = 4 + 4 + 4 + 4;
const HEADER_LEN: usize = 4 + 4 + 8 + 8;

#[derive(Error, Debug)]
pub enum LoadError {
    #[error("Model file not found: {0}")]
    NotFound(PathBuf),

    #[error("Invalid model format: {0}")]
    InvalidFormat(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<LoadError> for InferenceError {
    fn from(err: LoadError) -> Self {
        match err {
            LoadError::InvalidFormat(msg) => InferenceError::InvalidFormat(msg),
            other => InferenceError::ModelLoad(other.to_string()),
        }
    }
}

/// Header facts of a validated model file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelFileInfo {
    pub name: String,
    pub size_bytes: u64,
    pub version: u32,
    pub tensor_count: u64,
    pub metadata_count: u64,
}

/// Validate a model file's header.
pub fn validate_model_file(path: &Path) -> Result<ModelFileInfo, LoadError> {
    if !path.is_file() {
        return Err(LoadError::NotFound(path.to_path_buf()));
    }
    let size_bytes = std::fs::metadata(path)?.len();
    if size_bytes < V1_HEADER_LEN as u64 {
        return Err(LoadError::InvalidFormat(format!("file too small ({size_bytes} bytes)")));
    }

    let file = File::open(path)?;
    // SAFETY: read-only mapping; the file is only read for the header check.
    let mmap = unsafe { Mmap::map(&file)? };
    let header = parse_header(&mmap)?;

    let name = path.file_stem().and_then(|s| s.to_str()).unwrap_or("unknown").to_string();
    Ok(ModelFileInfo { name, size_bytes, ..header })
}

fn parse_header(bytes: &[u8]) -> Result<ModelFileInfo, LoadError> {
    if &bytes[..4] != GGUF_MAGIC {
        return Err(LoadError::InvalidFormat("missing GGUF magic".into()));
    }
    let version = read_u32(bytes, 4)?;
    if !SUPPORTED_VERSIONS.contains(&version) {
        return Err(LoadError::InvalidFormat(format!("unsupported GGUF version {version}")));
    }

    let (tensor_count, metadata_count) = if version == 1 {
        (u64::from(read_u32(bytes, 8)?), u64::from(read_u32(bytes, 12)?))
    } else {
        if bytes.len() < HEADER_LEN {
            return Err(LoadError::InvalidFormat("truncated header".into()));
        }
        (read_u64(bytes, 8)?, read_u64(bytes, 16)?)
    };

    Ok(ModelFileInfo {
        name: String::new(),
        size_bytes: bytes.len() as u64,
        version,
        tensor_count,
        metadata_count,
    })
}

fn read_u32(bytes: &[u8], at: usize) -> Result<u32, LoadError> {
    bytes
        .get(at..at + 4)
        .and_then(|b| b.try_into().ok())
        .map(u32::from_le_bytes)
        .ok_or_else(|| LoadError::InvalidFormat("truncated header".into()))
}

fn read_u64(bytes: &[u8], at: usize) -> Result<u64, LoadError> {
    bytes
        .get(at..at + 8)
        .and_then(|b| b.try_into().ok())
        .map(u64::from_le_bytes)
        .ok_or_else(|| LoadError::InvalidFormat("truncated header".into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_file(bytes: &[u8]) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(bytes).unwrap();
        file.flush().unwrap();
        file
    }

    fn v3_header(tensors: u64, kvs: u64) -> Vec<u8> {
        let mut bytes = GGUF_MAGIC.to_vec();
        bytes.extend_from_slice(&3u32.to_le_bytes());
        bytes.extend_from_slice(&tensors.to_le_bytes());
        bytes.extend_from_slice(&kvs.to_le_bytes());
        bytes
    }

    #[test]
    fn test_valid_v3_header() {
        let file = write_file(&v3_header(291, 24));
        let info = validate_model_file(file.path()).unwrap();
        assert_eq!(info.version, 3);
        assert_eq!(info.tensor_count, 291);
        assert_eq!(info.metadata_count, 24);
        assert_eq!(info.size_bytes, 24);
    }

    #[test]
    fn test_bad_magic_rejected() {
        let mut bytes = v3_header(1, 1);
        bytes[..4].copy_from_slice(b"GGML");
        let file = write_file(&bytes);
        let err = validate_model_file(file.path()).unwrap_err();
        assert!(matches!(err, LoadError::InvalidFormat(_)));
        assert!(matches!(InferenceError::from(err), InferenceError::InvalidFormat(_)));
    }

    #[test]
    fn test_unsupported_version_rejected() {
        let mut bytes = v3_header(1, 1);
        bytes[4..8].copy_from_slice(&9u32.to_le_bytes());
        let file = write_file(&bytes);
        assert!(matches!(validate_model_file(file.path()), Err(LoadError::InvalidFormat(_))));
    }

    #[test]
    fn test_truncated_file_rejected() {
        let file = write_file(b"GGUF");
        assert!(matches!(validate_model_file(file.path()), Err(LoadError::InvalidFormat(_))));
    }

    #[test]
    fn test_missing_file_maps_to_model_load() {
        let err = validate_model_file(Path::new("/nonexistent/model.gguf")).unwrap_err();
        assert!(matches!(err, LoadError::NotFound(_)));
        assert!(matches!(InferenceError::from(err), InferenceError::ModelLoad(_)));
    }
}
