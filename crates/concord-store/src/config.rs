//! Backend selection

use crate::backend::{GraphBackend, StoreResult};
use crate::memory::MemoryBackend;
use crate::sqlite::SqliteBackend;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Which storage strategy backs a graph
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum StoreConfig {
    #[default]
    Memory,
    Sqlite {
        /// Database file; `":memory:"` opens a private in-memory database
        path: PathBuf,
    },
}

impl StoreConfig {
    #[inline]
    #[must_use]
    pub fn sqlite(path: impl Into<PathBuf>) -> Self {
        Self::Sqlite { path: path.into() }
    }

    /// Open the configured backend
    ///
    /// # Errors
    /// Returns error if the backing store cannot be opened.
    pub fn open(&self) -> StoreResult<Box<dyn GraphBackend>> {
        let backend: Box<dyn GraphBackend> = match self {
            Self::Memory => Box::new(MemoryBackend::new()),
            Self::Sqlite { path } if path.as_os_str() == ":memory:" => {
                Box::new(SqliteBackend::open_in_memory()?)
            }
            Self::Sqlite { path } => {
                if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                    std::fs::create_dir_all(parent)?;
                }
                Box::new(SqliteBackend::open(path)?)
            }
        };
        tracing::info!(backend = backend.name(), "opened graph backend");
        Ok(backend)
    }
}
