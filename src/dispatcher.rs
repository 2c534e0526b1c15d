//! Dispatcher: routes an envelope's `operation` to its storage
//! primitive, translating `arguments` into a per-call [`OptionFlags`]
//! set.

use serde_json::Value;

use crate::backend::StorageBackend;
use crate::config::Config;
use crate::environment::Environment;
use crate::errors::{ExecutorError, ExecutorResult};
use crate::flags::{Flag, OptionFlags};
use crate::model::RawTarget;
use crate::primitives;

/// The flag set plus the handful of scalar arguments the flag table
/// doesn't capture (`arguments.path` for `move`).
#[derive(Debug, Default)]
pub struct DispatchArgs {
    pub flags: OptionFlags,
    pub move_path: Option<String>,
}

/// Translates `arguments` into a flag set and scalar extras. An
/// unrecognized nested `operation` value (anything other than `"add"`
/// or `"rem"`) is an invalid-argument error; unrecognized boolean keys
/// are silently ignored, matching the additive nature of the table.
pub fn derive_args(arguments: Option<&Value>) -> ExecutorResult<DispatchArgs> {
    let mut flags = OptionFlags::new();
    let mut move_path = None;

    let map = match arguments {
        Some(Value::Object(map)) => map,
        Some(_) => return Err(ExecutorError::invalid_argument("arguments must be a JSON object")),
        None => return Ok(DispatchArgs { flags, move_path }),
    };

    let bool_flag = |key: &str| map.get(key).and_then(Value::as_bool).unwrap_or(false);

    if bool_flag("acl") {
        flags.set(Flag::PrintAcl);
    }
    if bool_flag("avu") {
        flags.set(Flag::PrintAvu);
    }
    if bool_flag("checksum") {
        flags.set(Flag::CalculateChecksum);
        flags.set(Flag::PrintChecksum);
    }
    if bool_flag("contents") {
        flags.set(Flag::PrintContents);
    }
    if bool_flag("replicate") {
        flags.set(Flag::PrintReplicate);
    }
    if bool_flag("size") {
        flags.set(Flag::PrintSize);
    }
    if bool_flag("timestamp") {
        flags.set(Flag::PrintTimestamp);
    }
    if bool_flag("recurse") {
        flags.set(Flag::Recursive);
    }
    if bool_flag("force") {
        flags.set(Flag::Force);
    }
    if bool_flag("collection") {
        flags.set(Flag::SearchCollections);
    }
    if bool_flag("object") {
        flags.set(Flag::SearchObjects);
    }
    if bool_flag("single-server") {
        flags.set(Flag::SingleServer);
    }

    if let Some(op) = map.get("operation").and_then(Value::as_str) {
        match op {
            "add" => flags.set(Flag::AddAvu),
            "rem" => flags.set(Flag::RemoveAvu),
            other => {
                return Err(ExecutorError::invalid_argument(format!(
                    "unknown nested metadata operation {other:?}"
                )))
            }
        }
    }

    if let Some(path) = map.get("path").and_then(Value::as_str) {
        move_path = Some(path.to_string());
    }

    Ok(DispatchArgs { flags, move_path })
}

/// Routes `operation` to its primitive. Returns the primitive's result
/// payload (possibly `None`) or a typed error; an unknown operation
/// name is itself an invalid-argument error.
///
/// The per-call flag set starts from `config.default_flags()` (the
/// process-wide defaults) and OR's in whatever `derive_args` reads from
/// this envelope's `arguments`, per §4.5.
///
/// `target.collection` is "absolute or environment-relative" for every
/// operation that touches an existing backend path — those are
/// qualified against `env` here, before their primitive runs. `metaquery`
/// is the one exception: its `target.collection` is a catalog-query
/// subtree root, not a path the backend must resolve, and
/// `query::subtree_pattern` treats an absolute root and a bare fragment
/// differently (prefix match vs. contains-anywhere match). Qualifying it
/// first would force every root absolute and silently disable the
/// fragment form, so `metaquery` reads `target.collection` exactly as
/// the envelope supplied it.
pub async fn dispatch(
    operation: &str,
    env: &Environment,
    backend: &dyn StorageBackend,
    config: &Config,
    target: &RawTarget,
    arguments: Option<&Value>,
) -> ExecutorResult<Option<Value>> {
    let mut args = derive_args(arguments)?;
    let mut flags = config.default_flags();
    flags.merge(&args.flags);
    args.flags = flags;

    if operation == "metaquery" {
        return primitives::metaquery(backend, target, &args.flags, config).await;
    }

    let target = env.qualify_target(target);

    match operation {
        "list" => primitives::list(backend, &target, &args.flags).await,
        "chmod" => primitives::chmod(backend, &target, &args.flags).await,
        "checksum" => primitives::checksum(backend, env, &target).await,
        "metamod" => primitives::metamod(backend, &target, &args.flags).await,
        "get" => primitives::get(backend, &target, &args.flags, config).await,
        "put" => primitives::put(backend, &target, &args.flags).await,
        "move" => primitives::move_target(backend, &target, args.move_path.as_deref()).await,
        "remove" => primitives::remove(backend, &target, &args.flags).await,
        "mkcoll" => primitives::mkcoll(backend, &target, &args.flags).await,
        "rmcoll" => primitives::rmcoll(backend, &target, &args.flags).await,
        other => Err(ExecutorError::invalid_argument(format!("unknown operation {other:?}"))),
    }
}
