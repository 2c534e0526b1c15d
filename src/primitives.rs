//! Storage Primitives.
//!
//! Each primitive is a (mostly) pure function of `(backend, target,
//! flags)` that returns a result payload or a typed error. Every
//! primitive validates its target's kind against its own precondition
//! before touching the backend — via
//! [`crate::model::RawTarget::require_data_object`] /
//! `require_collection` / `require_avus` / `require_access` — so a
//! mismatch is always an invalid-argument error, never a panic or a
//! backend round trip. `target.collection` is "absolute or
//! environment-relative" per the data model, and
//! [`crate::dispatcher::dispatch`] qualifies it against the environment
//! before routing to any primitive that treats it as a backend path —
//! `metaquery` is the one exception, since it treats `target.collection`
//! as a catalog-query subtree root rather than a path to resolve (see
//! `metaquery`'s own doc comment). `checksum` additionally takes the
//! `Environment` itself, to run the qualified target through
//! `resolver::resolve` before touching the backend.

use serde_json::{json, Value};

use crate::backend::{CollectionIterator, StorageBackend};
use crate::column::CatalogColumn;
use crate::config::Config;
use crate::environment::Environment;
use crate::errors::{ExecutorError, ExecutorResult};
use crate::executor;
use crate::flags::{Flag, OptionFlags};
use crate::model::{AccessLevel, RawTarget, Target};
use crate::query;
use crate::resolver::{self, Kind};

fn target_json(target: &RawTarget) -> ExecutorResult<Value> {
    serde_json::to_value(target).map_err(|e| ExecutorError::Resource(format!("failed to serialize target: {e}")))
}

/// Builds and executes the list-metadata query for a data object or a
/// collection. `attr`, when set, further restricts the result to a
/// single attribute name.
pub async fn list_metadata(backend: &dyn StorageBackend, target: &RawTarget, attr: Option<&str>) -> ExecutorResult<Vec<Value>> {
    let (columns, conds) = match target.classify() {
        Target::DataObject { collection, data_object } => (
            vec![
                CatalogColumn::MetaDataAttrName,
                CatalogColumn::MetaDataAttrValue,
                CatalogColumn::MetaDataAttrUnits,
            ],
            query::list_metadata_data_object_conditions(&format!("{collection}/{data_object}"), attr),
        ),
        Target::Collection { collection } => (
            vec![
                CatalogColumn::MetaCollAttrName,
                CatalogColumn::MetaCollAttrValue,
                CatalogColumn::MetaCollAttrUnits,
            ],
            query::list_metadata_collection_conditions(&collection, attr),
        ),
        Target::Query => {
            return Err(ExecutorError::invalid_argument(
                "list-metadata requires a collection or data object target",
            ))
        }
    };

    let mut q = query::make_query(500, &columns);
    query::add_conditions(&mut q, conds)?;
    executor::execute(backend, q).await
}

async fn collect_entries(iter: &mut dyn CollectionIterator, collection: &str) -> ExecutorResult<Value> {
    let mut out = Vec::new();
    while let Some(entry) = iter.next_entry().await? {
        out.push(json!({
            "collection": collection,
            "data_object": entry.name,
            "is_collection": entry.is_collection,
        }));
    }
    Ok(Value::Array(out))
}

/// `list` (list-path). For a data object, a small enriched record; for
/// a collection, the backend's collection-iterator walked to
/// exhaustion. The iterator is always closed before this function
/// returns, success or error — `close()` is awaited unconditionally
/// rather than only on the happy path. `target.collection` is expected
/// to already be qualified against the caller's environment — the
/// dispatcher does this once, for every operation, before calling any
/// primitive.
pub async fn list(backend: &dyn StorageBackend, target: &RawTarget, flags: &OptionFlags) -> ExecutorResult<Option<Value>> {
    match target.classify() {
        Target::DataObject { collection, data_object } => {
            let mut obj = serde_json::Map::new();
            obj.insert("collection".to_string(), json!(collection));
            obj.insert("data_object".to_string(), json!(data_object));

            let needs_info = flags.has(Flag::PrintSize)
                || flags.has(Flag::PrintChecksum)
                || flags.has(Flag::PrintTimestamp)
                || flags.has(Flag::PrintReplicate)
                || flags.has(Flag::PrintAcl);
            if needs_info {
                let info = backend.object_info(&collection, &data_object).await?;
                if flags.has(Flag::PrintSize) {
                    if let Some(size) = info.size {
                        obj.insert("size".to_string(), json!(size));
                    }
                }
                if flags.has(Flag::PrintChecksum) {
                    if let Some(sum) = info.checksum {
                        obj.insert("checksum".to_string(), json!(sum));
                    }
                }
                if flags.has(Flag::PrintTimestamp) {
                    if let Some(c) = &info.created_at {
                        obj.insert("created_at".to_string(), json!(c));
                    }
                    if let Some(m) = &info.modified_at {
                        obj.insert("modified_at".to_string(), json!(m));
                    }
                }
                if flags.has(Flag::PrintReplicate) {
                    obj.insert("replicate".to_string(), json!(info.replicas));
                }
                if flags.has(Flag::PrintAcl) {
                    obj.insert("acl".to_string(), json!(info.acl));
                }
            }
            if flags.has(Flag::PrintAvu) {
                let avus = list_metadata(backend, target, None).await?;
                obj.insert("avus".to_string(), Value::Array(avus));
            }

            Ok(Some(Value::Object(obj)))
        }
        Target::Collection { collection } => {
            let mut iter = backend.open_collection(&collection).await?;
            let result = collect_entries(iter.as_mut(), &collection).await;
            let close_result = iter.close().await;
            let entries = result?;
            close_result?;
            Ok(Some(entries))
        }
        Target::Query => Err(ExecutorError::invalid_argument("list requires a collection or data object target")),
    }
}

/// `chmod` (modify-permissions). Iterates `target.access`, applying
/// each grant; recursion only propagates when the target is a
/// collection.
pub async fn chmod(backend: &dyn StorageBackend, target: &RawTarget, flags: &OptionFlags) -> ExecutorResult<Option<Value>> {
    let access = target.require_access()?;
    let (collection, data_object) = match target.classify() {
        Target::DataObject { collection, data_object } => (collection, Some(data_object)),
        Target::Collection { collection } => (collection, None),
        Target::Query => return Err(ExecutorError::invalid_argument("chmod requires a collection or data object target")),
    };
    let recursive = flags.has(Flag::Recursive) && data_object.is_none();

    for grant in access {
        let level = match grant.level {
            AccessLevel::Null => "null",
            AccessLevel::Read => "read",
            AccessLevel::Write => "write",
            AccessLevel::Own => "own",
        };
        backend
            .modify_permission(&collection, data_object.as_deref(), &grant.owner, grant.zone.as_deref(), level, recursive)
            .await?;
    }

    Ok(Some(target_json(target)?))
}

/// `checksum`. Data-object only; a collection target is an
/// invalid-argument error before any backend call is made. Runs the
/// target through the path resolver first: `checksum` requires
/// existence, so a resolved `Kind::Absent`/`Kind::Collection` (the
/// object was removed, or the caller's `collection`/`data_object` split
/// pointed somewhere else entirely) becomes a `NotFound` error here
/// rather than surfacing whatever the backend's own checksum call
/// happens to return for a missing path.
pub async fn checksum(backend: &dyn StorageBackend, env: &Environment, target: &RawTarget) -> ExecutorResult<Option<Value>> {
    let (collection, data_object) = target.require_data_object("checksum")?;
    let full_path = format!("{collection}/{data_object}");
    let (absolute, kind) = resolver::resolve(env, backend, &full_path).await?;
    if kind != Kind::DataObject {
        return Err(ExecutorError::not_found(format!("{absolute} does not exist")));
    }
    let sum = backend.checksum(&collection, &data_object).await?;
    Ok(Some(json!({
        "collection": collection,
        "data_object": data_object,
        "checksum": sum,
    })))
}

/// `metamod` (modify-metadata). Exactly one of `ADD_AVU`/`REMOVE_AVU`
/// must be set — that comes from the dispatcher's `arguments.operation`
/// translation; having neither is itself an invalid-argument error.
/// Missing `units` are sent to the backend as `""`.
pub async fn metamod(backend: &dyn StorageBackend, target: &RawTarget, flags: &OptionFlags) -> ExecutorResult<Option<Value>> {
    let avus = target.require_avus()?;
    let add = flags.has(Flag::AddAvu);
    let remove = flags.has(Flag::RemoveAvu);
    if !add && !remove {
        return Err(ExecutorError::invalid_argument("No metadata operation was specified"));
    }

    let (collection, data_object) = match target.classify() {
        Target::DataObject { collection, data_object } => (collection, Some(data_object)),
        Target::Collection { collection } => (collection, None),
        Target::Query => return Err(ExecutorError::invalid_argument("metamod requires a collection or data object target")),
    };

    for avu in avus {
        let units = avu.units_or_empty();
        if add {
            backend
                .add_metadata(&collection, data_object.as_deref(), &avu.attribute, &avu.value, units)
                .await?;
        } else {
            backend
                .remove_metadata(&collection, data_object.as_deref(), &avu.attribute, &avu.value, units)
                .await?;
        }
    }

    Ok(Some(target_json(target)?))
}

/// `metaquery` (search-metadata). Runs the collection search and the
/// data-object search as two independent queries and concatenates
/// their rows, collections first. Each search is scoped by every `avu`
/// clause, an optional subtree restriction taken from
/// `target.collection`, and the configured zone.
///
/// Unlike every other primitive, `target.collection` here is read
/// exactly as the envelope supplied it — [`crate::dispatcher::dispatch`]
/// deliberately skips environment-qualifying it before this call, since
/// `query::subtree_pattern` gives a bare (non-absolute) root a different
/// `LIKE` shape (`%root%`, matches anywhere) than an absolute one
/// (`root%`, prefix only).
pub async fn metaquery(backend: &dyn StorageBackend, target: &RawTarget, flags: &OptionFlags, config: &Config) -> ExecutorResult<Option<Value>> {
    let avus = target.require_avus()?;
    let root = target.collection.as_deref();
    let zone = config.zone_name.as_deref();

    // Absent `collection`/`object` arguments search both; naming one
    // explicitly restricts to that side only.
    let search_collections = flags.has(Flag::SearchCollections) || !flags.has(Flag::SearchObjects);
    let search_objects = flags.has(Flag::SearchObjects) || !flags.has(Flag::SearchCollections);

    let mut results = Vec::new();

    if search_collections {
        let mut q = query::make_query(500, &[CatalogColumn::CollName]);
        for avu in avus {
            query::add_conditions(
                &mut q,
                query::search_collection_avu_conditions(&avu.attribute, &avu.value, avu.operator_or_eq()),
            )?;
        }
        if let Some(root) = root {
            query::add_conditions(&mut q, vec![(CatalogColumn::CollName, "LIKE".to_string(), query::subtree_pattern(root))])?;
        }
        if let Some(zone) = zone {
            query::add_qualifier(&mut q, "zone", zone);
        }
        results.extend(executor::execute(backend, q).await?);
    }

    if search_objects {
        let mut q = query::make_query(500, &[CatalogColumn::CollName, CatalogColumn::DataName]);
        for avu in avus {
            query::add_conditions(
                &mut q,
                query::search_data_object_avu_conditions(&avu.attribute, &avu.value, avu.operator_or_eq()),
            )?;
        }
        if let Some(root) = root {
            query::add_conditions(&mut q, vec![(CatalogColumn::CollName, "LIKE".to_string(), query::subtree_pattern(root))])?;
        }
        if let Some(zone) = zone {
            query::add_qualifier(&mut q, "zone", zone);
        }
        results.extend(executor::execute(backend, q).await?);
    }

    Ok(Some(Value::Array(results)))
}

/// `get`. Three mutually exclusive modes: save to a local file when
/// `target.directory`/`target.file` are both present, print raw bytes
/// to stdout under `PRINT_RAW`, or the default enriched JSON record.
/// `PRINT_CONTENTS` renders the object as UTF-8 (lossily for binary
/// data); binary-safe transport is out of scope.
pub async fn get(backend: &dyn StorageBackend, target: &RawTarget, flags: &OptionFlags, config: &Config) -> ExecutorResult<Option<Value>> {
    let (collection, data_object) = target.require_data_object("get")?;
    let bytes = backend.get_object(&collection, &data_object, config.buffer_size).await?;

    if let (Some(dir), Some(file)) = (&target.directory, &target.file) {
        let path = std::path::Path::new(dir).join(file);
        tokio::fs::write(&path, &bytes).await?;
        return Ok(Some(json!({
            "collection": collection,
            "data_object": data_object,
            "saved_to": path.display().to_string(),
        })));
    }

    if flags.has(Flag::PrintRaw) {
        use tokio::io::AsyncWriteExt;
        tokio::io::stdout().write_all(&bytes).await?;
        return Ok(None);
    }

    let mut obj = serde_json::Map::new();
    obj.insert("collection".to_string(), json!(collection));
    obj.insert("data_object".to_string(), json!(data_object));
    if flags.has(Flag::PrintSize) {
        obj.insert("size".to_string(), json!(bytes.len()));
    }
    if flags.has(Flag::CalculateChecksum) || flags.has(Flag::PrintChecksum) {
        let sum = backend.checksum(&collection, &data_object).await?;
        obj.insert("checksum".to_string(), json!(sum));
    }
    if flags.has(Flag::PrintContents) {
        obj.insert("contents".to_string(), json!(String::from_utf8_lossy(&bytes).into_owned()));
    }

    Ok(Some(Value::Object(obj)))
}

/// `put`/`write`. `write` is the single-server fallback selected by
/// `SINGLE_SERVER`; both read `target.directory`/`target.file` locally
/// and upload through the same backend call — the transfer-strategy
/// distinction is bulk-transfer mechanics this crate treats as out of
/// scope.
pub async fn put(backend: &dyn StorageBackend, target: &RawTarget, flags: &OptionFlags) -> ExecutorResult<Option<Value>> {
    let (collection, data_object) = target.require_data_object("put")?;
    let (dir, file) = (target.directory.as_deref(), target.file.as_deref());
    let (dir, file) = match (dir, file) {
        (Some(d), Some(f)) => (d, f),
        _ => return Err(ExecutorError::invalid_argument("put requires target.directory and target.file")),
    };

    let local_path = std::path::Path::new(dir).join(file);
    let bytes = tokio::fs::read(&local_path).await?;
    backend.put_object(&collection, &data_object, &bytes, flags.has(Flag::Force)).await?;

    let mut obj = serde_json::Map::new();
    obj.insert("collection".to_string(), json!(collection));
    obj.insert("data_object".to_string(), json!(data_object));
    if flags.has(Flag::CalculateChecksum) || flags.has(Flag::PrintChecksum) {
        let sum = backend.checksum(&collection, &data_object).await?;
        obj.insert("checksum".to_string(), json!(sum));
    }

    Ok(Some(Value::Object(obj)))
}

/// `move`. Always returns the updated target as `result` on success,
/// rather than leaving the stream loop to emit the bare input envelope
/// on a `None`.
pub async fn move_target(backend: &dyn StorageBackend, target: &RawTarget, new_path: Option<&str>) -> ExecutorResult<Option<Value>> {
    let (collection, data_object) = target.require_data_object("move")?;
    let new_path = new_path.ok_or_else(|| ExecutorError::invalid_argument("move requires arguments.path"))?;
    backend.move_object(&collection, &data_object, new_path).await?;
    Ok(Some(json!({
        "collection": collection,
        "data_object": data_object,
        "to": new_path,
    })))
}

/// `remove`. Data-object only; `FORCE` skips the backend's trash.
pub async fn remove(backend: &dyn StorageBackend, target: &RawTarget, flags: &OptionFlags) -> ExecutorResult<Option<Value>> {
    let (collection, data_object) = target.require_data_object("remove")?;
    backend.remove_object(&collection, &data_object, flags.has(Flag::Force)).await?;
    Ok(Some(target_json(target)?))
}

/// `mkcoll`. `FORCE` makes an existing collection a no-op success
/// rather than an "already exists" error.
pub async fn mkcoll(backend: &dyn StorageBackend, target: &RawTarget, flags: &OptionFlags) -> ExecutorResult<Option<Value>> {
    let collection = target.require_collection()?;
    backend.make_collection(&collection, flags.has(Flag::Force)).await?;
    Ok(Some(target_json(target)?))
}

/// `rmcoll`. Collection-only; honors `RECURSIVE` and `FORCE`.
pub async fn rmcoll(backend: &dyn StorageBackend, target: &RawTarget, flags: &OptionFlags) -> ExecutorResult<Option<Value>> {
    let collection = target.require_collection()?;
    backend
        .remove_collection(&collection, flags.has(Flag::Recursive), flags.has(Flag::Force))
        .await?;
    Ok(Some(target_json(target)?))
}
