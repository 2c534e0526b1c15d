//! Path Resolver.
//!
//! Classifies a user-supplied path into exactly one of
//! `{data object, collection, absent}` after qualifying it against the
//! caller's environment. `ABSENT` is not itself an error here — it only
//! becomes one when the calling primitive requires existence.

use crate::backend::{StatKind, StorageBackend};
use crate::environment::Environment;
use crate::errors::ExecutorResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    DataObject,
    Collection,
    Absent,
}

pub async fn resolve(
    env: &Environment,
    backend: &dyn StorageBackend,
    path: &str,
) -> ExecutorResult<(String, Kind)> {
    let absolute = env.qualify(path);
    let kind = match backend.stat(&absolute).await? {
        StatKind::DataObject => Kind::DataObject,
        StatKind::Collection => Kind::Collection,
        StatKind::Absent => Kind::Absent,
    };
    Ok((absolute, kind))
}
