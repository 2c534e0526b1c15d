//! HTTP implementation of [`StorageBackend`], speaking to the data
//! grid's catalog/data REST API over `reqwest`. Grounded on this
//! codebase's existing HTTP client module: connection pooling via a
//! single shared `reqwest::Client`, JSON bodies, and response/error
//! parsing that distinguishes structured server errors from raw HTTP
//! failures.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

use crate::backend::{AclEntry, CollectionEntry, CollectionIterator, ObjectInfo, QueryPage, StatKind, StorageBackend};
use crate::errors::{ExecutorError, ExecutorResult};
use crate::query::{render_condition, Query};

pub struct HttpStorageBackend {
    base_url: String,
    client: Client,
    session: Option<Session>,
}

struct Session {
    zone: String,
    user: String,
}

#[derive(Debug, Serialize)]
struct LoginRequest<'a> {
    host: &'a str,
    port: u16,
    zone: &'a str,
    user: &'a str,
}

#[derive(Debug, Deserialize)]
struct BackendError {
    code: i32,
    #[serde(default)]
    symbol: Option<String>,
    message: String,
}

impl HttpStorageBackend {
    pub fn new(base_url: String, timeout: Duration) -> ExecutorResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent("gridexec/0.1")
            .build()
            .map_err(|e| ExecutorError::Resource(format!("failed to build HTTP client: {e}")))?;
        Ok(HttpStorageBackend {
            base_url,
            client,
            session: None,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn handle<T: for<'de> Deserialize<'de>>(&self, response: reqwest::Response) -> ExecutorResult<T> {
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| ExecutorError::Resource(format!("failed reading response body: {e}")))?;

        if status.is_success() {
            serde_json::from_str(&text)
                .map_err(|e| ExecutorError::Resource(format!("invalid response body: {e}: {text}")))
        } else {
            match serde_json::from_str::<BackendError>(&text) {
                Ok(err) if status.as_u16() == 404 => Err(ExecutorError::not_found(err.message)),
                Ok(err) => Err(ExecutorError::backend(err.code, err.symbol, err.message)),
                Err(_) if status.as_u16() == 404 => Err(ExecutorError::not_found(text)),
                Err(_) => Err(ExecutorError::backend(status.as_u16() as i32, None, text)),
            }
        }
    }
}

#[async_trait]
impl StorageBackend for HttpStorageBackend {
    async fn login(&mut self, host: &str, port: u16, zone: &str, user: &str) -> ExecutorResult<()> {
        let url = self.url("/api/v1/auth/login");
        debug!("logging in to {url} as {zone}#{user}");
        let response = self
            .client
            .post(&url)
            .json(&LoginRequest { host, port, zone, user })
            .send()
            .await
            .map_err(|e| ExecutorError::backend(-1, None, format!("login failed: {e}")))?;
        let _: Value = self.handle(response).await?;
        self.session = Some(Session {
            zone: zone.to_string(),
            user: user.to_string(),
        });
        Ok(())
    }

    async fn disconnect(&mut self) -> ExecutorResult<()> {
        self.session = None;
        Ok(())
    }

    async fn query_page(&self, query: &Query) -> ExecutorResult<QueryPage> {
        let conditions: Vec<Value> = query
            .conditions
            .iter()
            .map(|c| {
                serde_json::json!({
                    "column": format!("{:?}", c.column),
                    "clause": render_condition(c),
                })
            })
            .collect();
        let body = serde_json::json!({
            "columns": query.columns.iter().map(|c| format!("{c:?}")).collect::<Vec<_>>(),
            "conditions": conditions,
            "qualifiers": query.qualifiers,
            "page_size": query.page_size,
            "cursor": query.cursor,
        });

        let response = self
            .client
            .post(self.url("/api/v1/catalog/query"))
            .json(&body)
            .send()
            .await
            .map_err(|e| ExecutorError::backend(-2, None, format!("query failed: {e}")))?;

        #[derive(Deserialize)]
        struct RawPage {
            rows: Vec<HashMap<String, String>>,
            next_cursor: Option<String>,
        }
        let page: RawPage = self.handle(response).await?;

        let labels: Vec<&'static str> = query.columns.iter().map(|c| c.label()).collect();
        let rows = page
            .rows
            .into_iter()
            .map(|row| {
                let mut out = HashMap::new();
                for label in &labels {
                    if let Some(v) = row.get(*label) {
                        if !v.is_empty() {
                            out.insert(*label, v.clone());
                        }
                    }
                }
                out
            })
            .collect();

        Ok(QueryPage {
            rows,
            next_cursor: page.next_cursor,
        })
    }

    async fn open_collection(&self, path: &str) -> ExecutorResult<Box<dyn CollectionIterator>> {
        let response = self
            .client
            .get(self.url(&format!("/api/v1/collections/{}", urlencode(path))))
            .send()
            .await
            .map_err(|e| ExecutorError::backend(-3, None, format!("list failed: {e}")))?;

        #[derive(Deserialize)]
        struct Listing {
            entries: Vec<RawEntry>,
        }
        #[derive(Deserialize)]
        struct RawEntry {
            name: String,
            is_collection: bool,
        }
        let listing: Listing = self.handle(response).await?;
        Ok(Box::new(HttpCollectionIterator {
            entries: listing
                .entries
                .into_iter()
                .map(|e| CollectionEntry {
                    name: e.name,
                    is_collection: e.is_collection,
                })
                .collect(),
            position: 0,
            closed: false,
        }))
    }

    async fn add_metadata(
        &self,
        collection: &str,
        data_object: Option<&str>,
        attribute: &str,
        value: &str,
        units: &str,
    ) -> ExecutorResult<()> {
        self.modify_metadata(collection, data_object, attribute, value, units, "add")
            .await
    }

    async fn remove_metadata(
        &self,
        collection: &str,
        data_object: Option<&str>,
        attribute: &str,
        value: &str,
        units: &str,
    ) -> ExecutorResult<()> {
        self.modify_metadata(collection, data_object, attribute, value, units, "remove")
            .await
    }

    async fn modify_permission(
        &self,
        collection: &str,
        data_object: Option<&str>,
        owner: &str,
        zone: Option<&str>,
        level: &str,
        recursive: bool,
    ) -> ExecutorResult<()> {
        let body = serde_json::json!({
            "collection": collection,
            "data_object": data_object,
            "owner": owner,
            "zone": zone,
            "level": level,
            "recursive": recursive,
        });
        let response = self
            .client
            .post(self.url("/api/v1/permissions"))
            .json(&body)
            .send()
            .await
            .map_err(|e| ExecutorError::backend(-4, None, format!("chmod failed: {e}")))?;
        let _: Value = self.handle(response).await?;
        Ok(())
    }

    async fn checksum(&self, collection: &str, data_object: &str) -> ExecutorResult<String> {
        #[derive(Deserialize)]
        struct ChecksumResponse {
            checksum: String,
        }
        let response = self
            .client
            .get(self.url(&format!(
                "/api/v1/collections/{}/data/{}/checksum",
                urlencode(collection),
                urlencode(data_object)
            )))
            .send()
            .await
            .map_err(|e| ExecutorError::backend(-5, None, format!("checksum failed: {e}")))?;
        let parsed: ChecksumResponse = self.handle(response).await?;
        Ok(parsed.checksum)
    }

    async fn object_info(&self, collection: &str, data_object: &str) -> ExecutorResult<ObjectInfo> {
        #[derive(Deserialize)]
        struct RawInfo {
            size: Option<u64>,
            checksum: Option<String>,
            created_at: Option<String>,
            modified_at: Option<String>,
            #[serde(default)]
            replicas: Vec<String>,
            #[serde(default)]
            acl: Vec<AclEntry>,
            #[serde(default)]
            avus: Vec<(String, String, Option<String>)>,
        }
        let response = self
            .client
            .get(self.url(&format!(
                "/api/v1/collections/{}/data/{}/info",
                urlencode(collection),
                urlencode(data_object)
            )))
            .send()
            .await
            .map_err(|e| ExecutorError::backend(-14, None, format!("object_info failed: {e}")))?;
        let raw: RawInfo = self.handle(response).await?;
        Ok(ObjectInfo {
            size: raw.size,
            checksum: raw.checksum,
            created_at: raw.created_at.as_deref().map(normalize_timestamp).transpose()?,
            modified_at: raw.modified_at.as_deref().map(normalize_timestamp).transpose()?,
            replicas: raw.replicas,
            acl: raw.acl,
            avus: raw.avus,
        })
    }

    async fn get_object(
        &self,
        collection: &str,
        data_object: &str,
        buffer_size: usize,
    ) -> ExecutorResult<Vec<u8>> {
        let response = self
            .client
            .get(self.url(&format!(
                "/api/v1/collections/{}/data/{}",
                urlencode(collection),
                urlencode(data_object)
            )))
            .send()
            .await
            .map_err(|e| ExecutorError::backend(-6, None, format!("get failed: {e}")))?;
        if !response.status().is_success() {
            return self.handle::<Vec<u8>>(response).await;
        }
        let bytes = response
            .bytes()
            .await
            .map_err(|e| ExecutorError::Resource(format!("failed reading object body: {e}")))?;
        if bytes.len() > buffer_size {
            return Err(ExecutorError::Resource(format!(
                "object of {} bytes exceeds configured buffer_size {buffer_size}",
                bytes.len()
            )));
        }
        Ok(bytes.to_vec())
    }

    async fn put_object(
        &self,
        collection: &str,
        data_object: &str,
        bytes: &[u8],
        force: bool,
    ) -> ExecutorResult<()> {
        let response = self
            .client
            .put(self.url(&format!(
                "/api/v1/collections/{}/data/{}?force={force}",
                urlencode(collection),
                urlencode(data_object)
            )))
            .body(bytes.to_vec())
            .send()
            .await
            .map_err(|e| ExecutorError::backend(-7, None, format!("put failed: {e}")))?;
        let _: Value = self.handle(response).await?;
        Ok(())
    }

    async fn move_object(&self, collection: &str, data_object: &str, new_path: &str) -> ExecutorResult<()> {
        let body = serde_json::json!({ "to": new_path });
        let response = self
            .client
            .post(self.url(&format!(
                "/api/v1/collections/{}/data/{}/move",
                urlencode(collection),
                urlencode(data_object)
            )))
            .json(&body)
            .send()
            .await
            .map_err(|e| ExecutorError::backend(-8, None, format!("move failed: {e}")))?;
        let _: Value = self.handle(response).await?;
        Ok(())
    }

    async fn remove_object(&self, collection: &str, data_object: &str, force: bool) -> ExecutorResult<()> {
        let response = self
            .client
            .delete(self.url(&format!(
                "/api/v1/collections/{}/data/{}?force={force}",
                urlencode(collection),
                urlencode(data_object)
            )))
            .send()
            .await
            .map_err(|e| ExecutorError::backend(-9, None, format!("remove failed: {e}")))?;
        let _: Value = self.handle(response).await?;
        Ok(())
    }

    async fn make_collection(&self, collection: &str, force: bool) -> ExecutorResult<()> {
        let response = self
            .client
            .put(self.url(&format!("/api/v1/collections/{}?force={force}", urlencode(collection))))
            .send()
            .await
            .map_err(|e| ExecutorError::backend(-10, None, format!("mkcoll failed: {e}")))?;
        let _: Value = self.handle(response).await?;
        Ok(())
    }

    async fn remove_collection(&self, collection: &str, recursive: bool, force: bool) -> ExecutorResult<()> {
        let response = self
            .client
            .delete(self.url(&format!(
                "/api/v1/collections/{}?recursive={recursive}&force={force}",
                urlencode(collection)
            )))
            .send()
            .await
            .map_err(|e| ExecutorError::backend(-11, None, format!("rmcoll failed: {e}")))?;
        let _: Value = self.handle(response).await?;
        Ok(())
    }

    async fn stat(&self, path: &str) -> ExecutorResult<StatKind> {
        #[derive(Deserialize)]
        struct StatResponse {
            kind: String,
        }
        let response = self
            .client
            .get(self.url(&format!("/api/v1/stat/{}", urlencode(path))))
            .send()
            .await
            .map_err(|e| ExecutorError::backend(-12, None, format!("stat failed: {e}")))?;
        if response.status().as_u16() == 404 {
            return Ok(StatKind::Absent);
        }
        let parsed: StatResponse = self.handle(response).await?;
        Ok(match parsed.kind.as_str() {
            "data_object" => StatKind::DataObject,
            "collection" => StatKind::Collection,
            _ => StatKind::Absent,
        })
    }
}

impl HttpStorageBackend {
    async fn modify_metadata(
        &self,
        collection: &str,
        data_object: Option<&str>,
        attribute: &str,
        value: &str,
        units: &str,
        op: &str,
    ) -> ExecutorResult<()> {
        let body = serde_json::json!({
            "collection": collection,
            "data_object": data_object,
            "attribute": attribute,
            "value": value,
            "units": units,
            "operation": op,
        });
        let response = self
            .client
            .post(self.url("/api/v1/metadata"))
            .json(&body)
            .send()
            .await
            .map_err(|e| ExecutorError::backend(-13, None, format!("metamod failed: {e}")))?;
        let _: Value = self.handle(response).await?;
        Ok(())
    }
}

fn urlencode(s: &str) -> String {
    s.replace('%', "%25").replace('/', "%2F")
}

/// The backend's timestamps arrive as RFC 3339 strings; parsing and
/// re-rendering through `chrono` catches a malformed value here rather
/// than passing it through to the caller unchecked.
fn normalize_timestamp(raw: &str) -> ExecutorResult<String> {
    raw.parse::<DateTime<Utc>>()
        .map(|dt| dt.to_rfc3339())
        .map_err(|e| ExecutorError::Resource(format!("invalid timestamp {raw:?}: {e}")))
}

struct HttpCollectionIterator {
    entries: Vec<CollectionEntry>,
    position: usize,
    closed: bool,
}

#[async_trait]
impl CollectionIterator for HttpCollectionIterator {
    async fn next_entry(&mut self) -> ExecutorResult<Option<CollectionEntry>> {
        if self.position >= self.entries.len() {
            return Ok(None);
        }
        let entry = self.entries[self.position].clone();
        self.position += 1;
        Ok(Some(entry))
    }

    async fn close(&mut self) -> ExecutorResult<()> {
        self.closed = true;
        Ok(())
    }
}
