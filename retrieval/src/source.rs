//! Source record feeds consumed by the index builder.

use core::future::Future;
use std::path::{Path, PathBuf};

use crate::error::{IndexError, Result};
use crate::types::SourceRecord;

/// Produces the raw rows a build run indexes.
///
/// The feed is an external collaborator: a scraper dump, a database export, or an in-memory
/// list in tests. Rows are validated and cleaned by the builder, not by the source.
pub trait RecordSource: Send + Sync {
    /// Loads every row.
    fn load(&self) -> impl Future<Output = Result<Vec<SourceRecord>>> + Send;
}

impl RecordSource for Vec<SourceRecord> {
    async fn load(&self) -> Result<Vec<SourceRecord>> {
        Ok(self.clone())
    }
}

/// Reads a JSON array of rows, such as the scraper's `papers.json`.
///
/// ```json
/// [{"title": "Denoising Diffusion", "authors": "Ho, Jain, Abbeel", "link": "https://..."}]
/// ```
#[derive(Debug, Clone)]
pub struct JsonFileSource {
    path: PathBuf,
}

impl JsonFileSource {
    /// Creates a source reading `path`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Returns the file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl RecordSource for JsonFileSource {
    async fn load(&self) -> Result<Vec<SourceRecord>> {
        let path = self.path.clone();
        let bytes = tokio::task::spawn_blocking(move || std::fs::read(path))
            .await
            .map_err(|e| IndexError::failed(format!("reading source feed panicked: {e}")))??;
        let rows: Vec<SourceRecord> = serde_json::from_slice(&bytes)?;
        Ok(rows)
    }
}
