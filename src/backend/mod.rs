//! The storage backend abstraction.
//!
//! The backend (authentication, catalog database, replica storage) is an
//! external collaborator: the dispatcher and primitives only ever see
//! this trait. `http.rs` provides the concrete implementation used in
//! production, speaking to the backend's REST catalog/data API over
//! `reqwest`, the same way this codebase's other HTTP client module
//! talks to its server.

pub mod http;

use async_trait::async_trait;

use crate::errors::ExecutorResult;
use crate::query::Query;

/// One page of catalog query results plus the cursor to continue from.
#[derive(Debug, Clone, Default)]
pub struct QueryPage {
    pub rows: Vec<std::collections::HashMap<&'static str, String>>,
    pub next_cursor: Option<String>,
}

/// One entry of a collection listing.
#[derive(Debug, Clone)]
pub struct CollectionEntry {
    pub name: String,
    pub is_collection: bool,
}

/// An open handle to a collection being iterated. `close` must be
/// called exactly once; primitives wrap this in a scope guard so it is
/// always called regardless of how the loop exits (see
/// [`crate::primitives::list`]).
#[async_trait]
pub trait CollectionIterator: Send {
    async fn next_entry(&mut self) -> ExecutorResult<Option<CollectionEntry>>;
    async fn close(&mut self) -> ExecutorResult<()>;
}

/// The backend operations the dispatcher and primitives are written
/// against. A mismatch between what a primitive needs and what this
/// trait exposes is a compile error, not a runtime surprise.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    async fn login(&mut self, host: &str, port: u16, zone: &str, user: &str) -> ExecutorResult<()>;
    async fn disconnect(&mut self) -> ExecutorResult<()>;

    /// Submits one page of a catalog query. Returning `rows: []` and
    /// `next_cursor: None` is a normal "no rows" termination, not an
    /// error.
    async fn query_page(&self, query: &Query) -> ExecutorResult<QueryPage>;

    async fn open_collection(&self, path: &str) -> ExecutorResult<Box<dyn CollectionIterator>>;

    async fn add_metadata(
        &self,
        collection: &str,
        data_object: Option<&str>,
        attribute: &str,
        value: &str,
        units: &str,
    ) -> ExecutorResult<()>;

    async fn remove_metadata(
        &self,
        collection: &str,
        data_object: Option<&str>,
        attribute: &str,
        value: &str,
        units: &str,
    ) -> ExecutorResult<()>;

    async fn modify_permission(
        &self,
        collection: &str,
        data_object: Option<&str>,
        owner: &str,
        zone: Option<&str>,
        level: &str,
        recursive: bool,
    ) -> ExecutorResult<()>;

    async fn checksum(&self, collection: &str, data_object: &str) -> ExecutorResult<String>;

    /// Everything `list-path` might need to enrich a data-object entry,
    /// gathered in one call rather than one round trip per flag.
    async fn object_info(&self, collection: &str, data_object: &str) -> ExecutorResult<ObjectInfo>;

    async fn get_object(
        &self,
        collection: &str,
        data_object: &str,
        buffer_size: usize,
    ) -> ExecutorResult<Vec<u8>>;

    async fn put_object(
        &self,
        collection: &str,
        data_object: &str,
        bytes: &[u8],
        force: bool,
    ) -> ExecutorResult<()>;

    async fn move_object(&self, collection: &str, data_object: &str, new_path: &str) -> ExecutorResult<()>;

    async fn remove_object(&self, collection: &str, data_object: &str, force: bool) -> ExecutorResult<()>;

    async fn make_collection(&self, collection: &str, force: bool) -> ExecutorResult<()>;

    async fn remove_collection(&self, collection: &str, recursive: bool, force: bool) -> ExecutorResult<()>;

    /// Stat a path to classify it; used by the path resolver.
    async fn stat(&self, path: &str) -> ExecutorResult<StatKind>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatKind {
    DataObject,
    Collection,
    Absent,
}

/// Enrichment data for a single data object, gathered in one backend
/// call and sliced by the caller according to which `PRINT_*` flags
/// were set.
#[derive(Debug, Clone, Default)]
pub struct ObjectInfo {
    pub size: Option<u64>,
    pub checksum: Option<String>,
    pub created_at: Option<String>,
    pub modified_at: Option<String>,
    pub replicas: Vec<String>,
    pub acl: Vec<AclEntry>,
    pub avus: Vec<(String, String, Option<String>)>,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct AclEntry {
    pub owner: String,
    pub zone: String,
    pub level: String,
}
