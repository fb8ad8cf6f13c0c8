//! Interpreter module-search path construction

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use crate::error::BridgeError;

/// Ordered module-search path handed to the interpreter at initialization
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchPath {
    root: PathBuf,
    entries: Vec<PathBuf>,
}

impl SearchPath {
    /// `[root, root/archive, extra...]`
    pub fn build(root: &str, archive: &str, extra: &[PathBuf]) -> Result<Self, BridgeError> {
        Self::validate_root(root)?;

        let root = PathBuf::from(root);
        let mut entries = vec![root.clone(), root.join(archive)];
        entries.extend(extra.iter().cloned());

        Ok(Self { root, entries })
    }

    pub fn validate_root(root: &str) -> Result<(), BridgeError> {
        if root.trim().is_empty() {
            return Err(BridgeError::InvalidArgument(
                "search path root must not be empty".to_string(),
            ));
        }
        if root.contains('\0') {
            return Err(BridgeError::InvalidArgument(
                "search path root contains a NUL byte".to_string(),
            ));
        }
        Ok(())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn entries(&self) -> &[PathBuf] {
        &self.entries
    }

    /// Entries joined with the platform path separator
    pub fn joined(&self) -> Result<OsString, BridgeError> {
        std::env::join_paths(&self.entries)
            .map_err(|e| BridgeError::InvalidArgument(format!("invalid search path entry: {}", e)))
    }
}

impl std::fmt::Display for SearchPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.joined() {
            Ok(joined) => write!(f, "{}", joined.to_string_lossy()),
            Err(_) => write!(f, "{:?}", self.entries),
        }
    }
}
