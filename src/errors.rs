//! Error taxonomy for the command executor.
//!
//! Every error that can reach the stream loop is one of the variants below.
//! Per-item errors (everything except [`ExecutorError::Config`] and the
//! fatal forms of [`ExecutorError::Backend`]) are caught by the dispatcher
//! and turned into an `{"error": {...}}` annotation rather than aborting
//! the run; see [`crate::stream_loop`].

use thiserror::Error;

/// The executor's error taxonomy, mirrored onto the wire as `{code, message}`.
#[derive(Error, Debug)]
pub enum ExecutorError {
    /// Missing required key, wrong JSON shape, unknown operation, malformed target.
    #[error("{0}")]
    InvalidArgument(String),

    /// Target path absent or inaccessible.
    #[error("{0}")]
    NotFound(String),

    /// Non-zero status from the storage backend. `page` is the
    /// paginated-query page index at which the failure occurred, if the
    /// error arose from the Query Executor walking a paginated catalog
    /// query; `None` for backend errors from non-paginated calls.
    #[error("{message}")]
    Backend {
        code: i32,
        symbol: Option<String>,
        message: String,
        page: Option<usize>,
    },

    /// stdin read, stdout write, or local file open/close failure.
    #[error("local I/O error: {0}")]
    LocalIo(#[from] std::io::Error),

    /// Allocation or other internal bookkeeping failure. Fatal when it
    /// occurs outside of a single item's dispatch.
    #[error("resource error: {0}")]
    Resource(String),

    /// Malformed JSON at the input boundary.
    #[error("stream error: {0}")]
    Stream(String),

    /// Invalid or missing configuration at startup. Always fatal.
    #[error("configuration error: {0}")]
    Config(String),
}

/// Stable negative error codes, loosely modeled on the backend's own
/// catalog error numbering so a caller can distinguish error classes
/// without string-matching `message`.
pub mod code {
    pub const INVALID_ARGUMENT: i32 = -130000;
    pub const NOT_FOUND: i32 = -310000;
    pub const LOCAL_IO: i32 = -510000;
    pub const RESOURCE: i32 = -620000;
    pub const STREAM: i32 = -720000;
    pub const CONFIG: i32 = -820000;
}

impl ExecutorError {
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        ExecutorError::InvalidArgument(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        ExecutorError::NotFound(msg.into())
    }

    pub fn backend(code: i32, symbol: Option<String>, message: impl Into<String>) -> Self {
        ExecutorError::Backend {
            code,
            symbol,
            message: message.into(),
            page: None,
        }
    }

    /// Attaches a paginated-query page index to a backend error. A no-op
    /// on every other variant — only the Query Executor calls this, and
    /// only ever on the error a `query_page` call just returned.
    pub fn with_page(mut self, page: usize) -> Self {
        if let ExecutorError::Backend { page: p, .. } = &mut self {
            *p = Some(page);
        }
        self
    }

    /// Numeric code attached to the wire-level error annotation.
    pub fn wire_code(&self) -> i32 {
        match self {
            ExecutorError::InvalidArgument(_) => code::INVALID_ARGUMENT,
            ExecutorError::NotFound(_) => code::NOT_FOUND,
            ExecutorError::Backend { code, .. } => *code,
            ExecutorError::LocalIo(_) => code::LOCAL_IO,
            ExecutorError::Resource(_) => code::RESOURCE,
            ExecutorError::Stream(_) => code::STREAM,
            ExecutorError::Config(_) => code::CONFIG,
        }
    }

    /// True for errors that should be attached to an envelope and counted,
    /// rather than terminating the stream loop.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, ExecutorError::Config(_))
    }

    /// Renders the `{"code": ..., "message": ...}` error annotation,
    /// adding a `"page"` key when this is a backend error that occurred
    /// partway through a paginated catalog query.
    pub fn to_annotation(&self) -> serde_json::Value {
        let mut annotation = serde_json::json!({
            "code": self.wire_code(),
            "message": self.to_string(),
        });
        if let ExecutorError::Backend { page: Some(page), .. } = self {
            annotation["page"] = serde_json::json!(page);
        }
        annotation
    }
}

pub type ExecutorResult<T> = Result<T, ExecutorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_error_annotation_omits_page_when_unset() {
        let err = ExecutorError::backend(-1, None, "boom");
        let annotation = err.to_annotation();
        assert!(annotation.get("page").is_none());
    }

    #[test]
    fn with_page_surfaces_the_page_index_in_the_annotation() {
        let err = ExecutorError::backend(-1, None, "boom").with_page(3);
        let annotation = err.to_annotation();
        assert_eq!(annotation["page"], 3);
    }

    #[test]
    fn with_page_is_a_no_op_on_non_backend_variants() {
        let err = ExecutorError::invalid_argument("bad").with_page(3);
        assert!(err.to_annotation().get("page").is_none());
    }
}
