//! An in-memory fake [`StorageBackend`], used by both unit tests and the
//! end-to-end stream-loop tests under `tests/`. Not behind `#[cfg(test)]`
//! so integration tests in a separate test binary can use it too — the
//! same split this codebase's CLI crate uses between unit tests near
//! the code and its `integration_tests` module.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::backend::{
    AclEntry, CollectionEntry, CollectionIterator, ObjectInfo, QueryPage, StatKind, StorageBackend,
};
use crate::errors::{ExecutorError, ExecutorResult};
use crate::query::Query;

#[derive(Debug, Clone, Default)]
struct StoredAvu {
    attribute: String,
    value: String,
    units: String,
}

#[derive(Debug, Clone, Default)]
struct StoredObject {
    bytes: Vec<u8>,
    avus: Vec<StoredAvu>,
    acl: Vec<AclEntry>,
}

/// An in-memory data grid: collections map to child names (data objects
/// or sub-collections), data objects map to their stored bytes/AVUs.
#[derive(Default)]
pub struct FakeBackend {
    pub collections: Mutex<BTreeMap<String, Vec<String>>>,
    pub objects: Mutex<HashMap<String, StoredObject>>,
    pub collection_avus: Mutex<HashMap<String, Vec<StoredAvu>>>,
    pub logged_in: Mutex<bool>,
    pub login_should_fail: bool,
}

impl FakeBackend {
    pub fn new() -> Self {
        FakeBackend::default()
    }

    pub fn with_collection(self, path: &str) -> Self {
        self.collections.lock().unwrap().entry(path.to_string()).or_default();
        self
    }

    pub fn with_data_object(self, collection: &str, name: &str, bytes: &[u8]) -> Self {
        self.collections
            .lock()
            .unwrap()
            .entry(collection.to_string())
            .or_default()
            .push(name.to_string());
        self.objects.lock().unwrap().insert(
            format!("{collection}/{name}"),
            StoredObject {
                bytes: bytes.to_vec(),
                ..Default::default()
            },
        );
        self
    }

    fn key(collection: &str, data_object: &str) -> String {
        format!("{collection}/{data_object}")
    }
}

#[async_trait]
impl StorageBackend for FakeBackend {
    async fn login(&mut self, _host: &str, _port: u16, _zone: &str, _user: &str) -> ExecutorResult<()> {
        if self.login_should_fail {
            return Err(ExecutorError::backend(-1, None, "login failed"));
        }
        *self.logged_in.lock().unwrap() = true;
        Ok(())
    }

    async fn disconnect(&mut self) -> ExecutorResult<()> {
        *self.logged_in.lock().unwrap() = false;
        Ok(())
    }

    async fn query_page(&self, query: &Query) -> ExecutorResult<QueryPage> {
        use crate::column::CatalogColumn;

        let mut coll_eq = None;
        let mut coll_like = None;
        let mut data_filter = None;
        let mut attr_filter = None;

        for cond in &query.conditions {
            match cond.column {
                CatalogColumn::CollName if cond.operator.eq_ignore_ascii_case("LIKE") => {
                    coll_like = Some(cond.literal.clone())
                }
                CatalogColumn::CollName => coll_eq = Some(cond.literal.clone()),
                CatalogColumn::DataName => data_filter = Some(cond.literal.clone()),
                CatalogColumn::MetaDataAttrName | CatalogColumn::MetaCollAttrName => {
                    attr_filter = Some(cond.literal.clone())
                }
                _ => {}
            }
        }

        let mut rows = Vec::new();

        let is_metadata_query = query.columns.iter().any(|c| {
            matches!(
                c,
                CatalogColumn::MetaDataAttrName
                    | CatalogColumn::MetaDataAttrValue
                    | CatalogColumn::MetaDataAttrUnits
                    | CatalogColumn::MetaCollAttrName
                    | CatalogColumn::MetaCollAttrValue
                    | CatalogColumn::MetaCollAttrUnits
            )
        }) || query.conditions.iter().any(|c| {
            matches!(
                c.column,
                CatalogColumn::MetaDataAttrName
                    | CatalogColumn::MetaDataAttrValue
                    | CatalogColumn::MetaCollAttrName
                    | CatalogColumn::MetaCollAttrValue
            )
        });

        if is_metadata_query {
            // metadata listing / search
            let objects = self.objects.lock().unwrap();
            let colls = self.collection_avus.lock().unwrap();
            if let (Some(coll), Some(data)) = (&coll_eq, &data_filter) {
                if let Some(obj) = objects.get(&Self::key(coll, data)) {
                    for avu in &obj.avus {
                        if attr_filter.as_deref().map_or(true, |a| a == avu.attribute) {
                            rows.push(avu_row(avu));
                        }
                    }
                }
            } else if let Some(coll) = &coll_eq {
                if let Some(avus) = colls.get(coll) {
                    for avu in avus {
                        if attr_filter.as_deref().map_or(true, |a| a == avu.attribute) {
                            rows.push(avu_row(avu));
                        }
                    }
                }
            } else {
                // Unfiltered metadata search: `metaquery` issues one query
                // selecting just `COLL_NAME` to search collection AVUs and
                // another selecting `COLL_NAME, DATA_NAME` to search data
                // object AVUs; the selected columns are what distinguish
                // the two, since neither one constrains `coll_eq`. A
                // `target.collection` that names a subtree root arrives as
                // a `LIKE` condition instead, captured in `coll_like`.
                let search_objects = query.columns.contains(&CatalogColumn::DataName);
                let search_collections = !search_objects;
                let pattern = coll_like.as_deref();

                if search_collections {
                    for (coll, avus) in colls.iter() {
                        if !pattern.map_or(true, |p| like_match(p, coll)) {
                            continue;
                        }
                        for avu in avus {
                            if matches(&query.conditions, avu) {
                                let mut m = avu_row(avu);
                                m.insert("collection", coll.clone());
                                rows.push(m);
                            }
                        }
                    }
                }
                if search_objects {
                    for (key, obj) in objects.iter() {
                        let (coll, data) = key.rsplit_once('/').unwrap_or(("", key.as_str()));
                        if !pattern.map_or(true, |p| like_match(p, coll)) {
                            continue;
                        }
                        for avu in &obj.avus {
                            if matches(&query.conditions, avu) {
                                let mut m = avu_row(avu);
                                m.insert("collection", coll.to_string());
                                m.insert("data_object", data.to_string());
                                rows.push(m);
                            }
                        }
                    }
                }
            }
        }

        Ok(QueryPage {
            rows,
            next_cursor: None,
        })
    }

    async fn open_collection(&self, path: &str) -> ExecutorResult<Box<dyn CollectionIterator>> {
        let colls = self.collections.lock().unwrap();
        let children = colls
            .get(path)
            .ok_or_else(|| ExecutorError::not_found(format!("collection {path} does not exist")))?;
        let objects = self.objects.lock().unwrap();
        let entries = children
            .iter()
            .map(|name| CollectionEntry {
                name: name.clone(),
                is_collection: !objects.contains_key(&Self::key(path, name)),
            })
            .collect();
        Ok(Box::new(FakeCollectionIterator { entries, position: 0 }))
    }

    async fn add_metadata(
        &self,
        collection: &str,
        data_object: Option<&str>,
        attribute: &str,
        value: &str,
        units: &str,
    ) -> ExecutorResult<()> {
        let avu = StoredAvu {
            attribute: attribute.to_string(),
            value: value.to_string(),
            units: units.to_string(),
        };
        match data_object {
            Some(data) => {
                let mut objects = self.objects.lock().unwrap();
                objects.entry(Self::key(collection, data)).or_default().avus.push(avu);
            }
            None => {
                let mut colls = self.collection_avus.lock().unwrap();
                colls.entry(collection.to_string()).or_default().push(avu);
            }
        }
        Ok(())
    }

    async fn remove_metadata(
        &self,
        collection: &str,
        data_object: Option<&str>,
        attribute: &str,
        value: &str,
        units: &str,
    ) -> ExecutorResult<()> {
        let retain = |v: &mut Vec<StoredAvu>| {
            v.retain(|a| !(a.attribute == attribute && a.value == value && a.units == units))
        };
        match data_object {
            Some(data) => {
                if let Some(obj) = self.objects.lock().unwrap().get_mut(&Self::key(collection, data)) {
                    retain(&mut obj.avus);
                }
            }
            None => {
                if let Some(avus) = self.collection_avus.lock().unwrap().get_mut(collection) {
                    retain(avus);
                }
            }
        }
        Ok(())
    }

    async fn modify_permission(
        &self,
        collection: &str,
        data_object: Option<&str>,
        owner: &str,
        zone: Option<&str>,
        level: &str,
        _recursive: bool,
    ) -> ExecutorResult<()> {
        if let Some(data) = data_object {
            let mut objects = self.objects.lock().unwrap();
            let obj = objects.entry(Self::key(collection, data)).or_default();
            obj.acl.push(AclEntry {
                owner: owner.to_string(),
                zone: zone.unwrap_or_default().to_string(),
                level: level.to_string(),
            });
        }
        Ok(())
    }

    async fn checksum(&self, collection: &str, data_object: &str) -> ExecutorResult<String> {
        let objects = self.objects.lock().unwrap();
        let obj = objects
            .get(&Self::key(collection, data_object))
            .ok_or_else(|| ExecutorError::not_found(format!("{collection}/{data_object} does not exist")))?;
        Ok(format!("{:x}", md5_like(&obj.bytes)))
    }

    async fn object_info(&self, collection: &str, data_object: &str) -> ExecutorResult<ObjectInfo> {
        let objects = self.objects.lock().unwrap();
        let obj = objects
            .get(&Self::key(collection, data_object))
            .ok_or_else(|| ExecutorError::not_found(format!("{collection}/{data_object} does not exist")))?;
        Ok(ObjectInfo {
            size: Some(obj.bytes.len() as u64),
            checksum: Some(format!("{:x}", md5_like(&obj.bytes))),
            created_at: Some("2024-01-01T00:00:00Z".to_string()),
            modified_at: Some("2024-01-01T00:00:00Z".to_string()),
            replicas: vec!["resc0".to_string()],
            acl: obj.acl.clone(),
            avus: obj
                .avus
                .iter()
                .map(|a| (a.attribute.clone(), a.value.clone(), Some(a.units.clone())))
                .collect(),
        })
    }

    async fn get_object(&self, collection: &str, data_object: &str, buffer_size: usize) -> ExecutorResult<Vec<u8>> {
        let objects = self.objects.lock().unwrap();
        let obj = objects
            .get(&Self::key(collection, data_object))
            .ok_or_else(|| ExecutorError::not_found(format!("{collection}/{data_object} does not exist")))?;
        if obj.bytes.len() > buffer_size {
            return Err(ExecutorError::Resource("object exceeds buffer_size".to_string()));
        }
        Ok(obj.bytes.clone())
    }

    async fn put_object(&self, collection: &str, data_object: &str, bytes: &[u8], force: bool) -> ExecutorResult<()> {
        let key = Self::key(collection, data_object);
        let mut objects = self.objects.lock().unwrap();
        if objects.contains_key(&key) && !force {
            return Err(ExecutorError::backend(-809000, None, "data object already exists"));
        }
        objects.insert(
            key,
            StoredObject {
                bytes: bytes.to_vec(),
                ..Default::default()
            },
        );
        self.collections
            .lock()
            .unwrap()
            .entry(collection.to_string())
            .or_default()
            .push(data_object.to_string());
        Ok(())
    }

    async fn move_object(&self, collection: &str, data_object: &str, new_path: &str) -> ExecutorResult<()> {
        let mut objects = self.objects.lock().unwrap();
        let obj = objects
            .remove(&Self::key(collection, data_object))
            .ok_or_else(|| ExecutorError::not_found(format!("{collection}/{data_object} does not exist")))?;
        objects.insert(new_path.to_string(), obj);
        Ok(())
    }

    async fn remove_object(&self, collection: &str, data_object: &str, _force: bool) -> ExecutorResult<()> {
        let mut objects = self.objects.lock().unwrap();
        objects
            .remove(&Self::key(collection, data_object))
            .ok_or_else(|| ExecutorError::not_found(format!("{collection}/{data_object} does not exist")))?;
        Ok(())
    }

    async fn make_collection(&self, collection: &str, force: bool) -> ExecutorResult<()> {
        let mut colls = self.collections.lock().unwrap();
        if colls.contains_key(collection) && !force {
            return Err(ExecutorError::backend(-809000, None, "collection already exists"));
        }
        colls.entry(collection.to_string()).or_default();
        Ok(())
    }

    async fn remove_collection(&self, collection: &str, recursive: bool, _force: bool) -> ExecutorResult<()> {
        let mut colls = self.collections.lock().unwrap();
        let children = colls
            .get(collection)
            .ok_or_else(|| ExecutorError::not_found(format!("{collection} does not exist")))?;
        if !children.is_empty() && !recursive {
            return Err(ExecutorError::backend(-815000, None, "collection is not empty"));
        }
        colls.remove(collection);
        Ok(())
    }

    async fn stat(&self, path: &str) -> ExecutorResult<StatKind> {
        if self.objects.lock().unwrap().contains_key(path) {
            return Ok(StatKind::DataObject);
        }
        if let Some((coll, data)) = path.rsplit_once('/') {
            if self.objects.lock().unwrap().contains_key(&Self::key(coll, data)) {
                return Ok(StatKind::DataObject);
            }
        }
        if self.collections.lock().unwrap().contains_key(path) {
            return Ok(StatKind::Collection);
        }
        Ok(StatKind::Absent)
    }
}

fn avu_row(avu: &StoredAvu) -> HashMap<&'static str, String> {
    let mut m = HashMap::new();
    m.insert("attribute", avu.attribute.clone());
    m.insert("value", avu.value.clone());
    if !avu.units.is_empty() {
        m.insert("units", avu.units.clone());
    }
    m
}

fn matches(conditions: &[crate::query::Condition], avu: &StoredAvu) -> bool {
    use crate::column::CatalogColumn;
    conditions.iter().all(|c| match c.column {
        CatalogColumn::MetaDataAttrName | CatalogColumn::MetaCollAttrName => c.literal == avu.attribute,
        CatalogColumn::MetaDataAttrValue | CatalogColumn::MetaCollAttrValue => c.literal == avu.value,
        _ => true,
    })
}

/// Matches `value` against a SQL-`LIKE`-style `pattern` with a `%`
/// wildcard at one or both ends — the only shapes
/// [`crate::query::subtree_pattern`] ever produces.
fn like_match(pattern: &str, value: &str) -> bool {
    match (pattern.starts_with('%'), pattern.ends_with('%')) {
        (true, true) if pattern.len() >= 2 => value.contains(&pattern[1..pattern.len() - 1]),
        (true, true) => true,
        (false, true) => value.starts_with(&pattern[..pattern.len() - 1]),
        (true, false) => value.ends_with(&pattern[1..]),
        (false, false) => value == pattern,
    }
}

/// A deterministic, non-cryptographic stand-in for a real checksum
/// algorithm — good enough to prove two identical byte strings collide
/// and two different ones don't, which is all the test suite needs.
fn md5_like(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf29ce484222325;
    for b in bytes {
        hash ^= *b as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}

struct FakeCollectionIterator {
    entries: Vec<CollectionEntry>,
    position: usize,
}

#[async_trait]
impl CollectionIterator for FakeCollectionIterator {
    async fn next_entry(&mut self) -> ExecutorResult<Option<CollectionEntry>> {
        if self.position >= self.entries.len() {
            return Ok(None);
        }
        let entry = self.entries[self.position].clone();
        self.position += 1;
        Ok(Some(entry))
    }

    async fn close(&mut self) -> ExecutorResult<()> {
        Ok(())
    }
}
