//! Wire schema: request envelopes, targets, AVUs, and access specs.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::ExecutorError;

/// One attribute/value/units triple attached to a collection or data
/// object. `operator` only matters for metadata *searches*; it is
/// ignored (and should be absent) on `metamod`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Avu {
    pub attribute: String,
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub units: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operator: Option<String>,
}

impl Avu {
    /// Units compare equal to empty when absent, per the invariant in
    /// the data model: `None` and `Some("")` are the same value on the
    /// wire and in catalog conditions.
    pub fn units_or_empty(&self) -> &str {
        self.units.as_deref().unwrap_or("")
    }

    pub fn operator_or_eq(&self) -> &str {
        self.operator.as_deref().unwrap_or("=")
    }
}

/// One user/zone access grant.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Access {
    pub owner: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zone: Option<String>,
    pub level: AccessLevel,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AccessLevel {
    Null,
    Read,
    Write,
    Own,
}

/// The raw, wire-shaped target object. Kept separate from [`Target`] so
/// serde can deserialize it permissively before the dispatcher commits
/// to a discriminant.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawTarget {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collection: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_object: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avus: Option<Vec<Avu>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access: Option<Vec<Access>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub directory: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
}

/// The tagged variant every primitive actually matches on. Built from
/// [`RawTarget`] by discriminating on the presence of `data_object`, per
/// the "tagged target variants" design note: each primitive's
/// precondition becomes a compile-checked match instead of a runtime
/// duck-typing check repeated at every call site.
#[derive(Debug, Clone)]
pub enum Target {
    DataObject {
        collection: String,
        data_object: String,
    },
    Collection {
        collection: String,
    },
    /// Neither a collection-only nor collection+data_object shape —
    /// e.g. a metadata query target carrying only `avus`.
    Query,
}

impl RawTarget {
    /// Classifies the raw target. Does not touch the backend; pure
    /// discriminator logic only.
    pub fn classify(&self) -> Target {
        match (&self.collection, &self.data_object) {
            (Some(collection), Some(data_object)) => Target::DataObject {
                collection: collection.clone(),
                data_object: data_object.clone(),
            },
            (Some(collection), None) => Target::Collection {
                collection: collection.clone(),
            },
            _ => Target::Query,
        }
    }

    /// `op` names the calling primitive so the error message points at
    /// what actually failed (e.g. `"checksum"`, `"put"`) instead of a
    /// message fixed to one specific caller.
    pub fn require_data_object(&self, op: &str) -> Result<(String, String), ExecutorError> {
        match self.classify() {
            Target::DataObject {
                collection,
                data_object,
            } => Ok((collection, data_object)),
            _ => Err(ExecutorError::invalid_argument(format!(
                "cannot {op} a non-data-object"
            ))),
        }
    }

    pub fn require_collection(&self) -> Result<String, ExecutorError> {
        match self.classify() {
            Target::Collection { collection } => Ok(collection),
            Target::DataObject { .. } => Err(ExecutorError::invalid_argument(
                "expected a collection target, found a data object",
            )),
            Target::Query => Err(ExecutorError::invalid_argument("missing target collection")),
        }
    }

    pub fn require_avus(&self) -> Result<&[Avu], ExecutorError> {
        self.avus
            .as_deref()
            .ok_or_else(|| ExecutorError::invalid_argument("target is missing avus"))
    }

    pub fn require_access(&self) -> Result<&[Access], ExecutorError> {
        self.access
            .as_deref()
            .ok_or_else(|| ExecutorError::invalid_argument("target is missing access"))
    }
}

/// The full request/response envelope as it travels through the stream
/// loop. `result`/`error` are populated by the dispatcher; never both.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub operation: Option<String>,
    #[serde(default)]
    pub target: Option<RawTarget>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arguments: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<Value>,
}

impl Envelope {
    pub fn with_result(mut self, result: Value) -> Self {
        self.result = Some(result);
        self.error = None;
        self
    }

    pub fn with_error(mut self, err: &ExecutorError) -> Self {
        self.error = Some(err.to_annotation());
        self.result = None;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_data_object_target() {
        let raw = RawTarget {
            collection: Some("/z/x".into()),
            data_object: Some("f.txt".into()),
            ..Default::default()
        };
        assert!(matches!(raw.classify(), Target::DataObject { .. }));
    }

    #[test]
    fn classifies_collection_target() {
        let raw = RawTarget {
            collection: Some("/z/x".into()),
            ..Default::default()
        };
        assert!(matches!(raw.classify(), Target::Collection { .. }));
    }

    #[test]
    fn classifies_query_target_when_no_collection_present() {
        let raw = RawTarget {
            avus: Some(vec![]),
            ..Default::default()
        };
        assert!(matches!(raw.classify(), Target::Query));
    }

    #[test]
    fn units_absent_and_empty_compare_equal() {
        let a = Avu {
            attribute: "k".into(),
            value: "v".into(),
            units: None,
            operator: None,
        };
        let b = Avu {
            attribute: "k".into(),
            value: "v".into(),
            units: Some(String::new()),
            operator: None,
        };
        assert_eq!(a.units_or_empty(), b.units_or_empty());
    }
}
