use std::path::PathBuf;

use rusqlite::{Connection, OpenFlags};
use tracing::warn;

use super::error::{MetaError, Result};

/// Handle to the relational metadata store.
///
/// The service is read-only, so connections are opened with read-only flags,
/// one per query, and dropped before the calling operation returns. Nothing
/// is pooled or held across await points.
#[derive(Debug, Clone)]
pub struct MetadataStore {
    path: PathBuf,
}

impl MetadataStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn connect(&self) -> Result<Connection> {
        Connection::open_with_flags(
            &self.path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(|err| {
            warn!("cannot open metadata store {}: {err}", self.path.display());
            MetaError::StoreConnectivity(err.to_string())
        })
    }
}
