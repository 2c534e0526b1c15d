//! End-to-end tests driving the stream loop against an in-memory fake
//! backend.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use gridexec::backend::{CollectionIterator, ObjectInfo, QueryPage, StatKind, StorageBackend};
use gridexec::config::Config;
use gridexec::environment::Environment;
use gridexec::errors::{ExecutorError, ExecutorResult};
use gridexec::query::Query;
use gridexec::stream_loop;
use gridexec::testsupport::FakeBackend;

/// `ConnectionManager` asks for a fresh `Box<dyn StorageBackend>` on
/// every (re)connect, but these tests need every reconnect to see the
/// same in-memory grid. This wraps a shared `Arc<FakeBackend>` so the
/// underlying state survives across the recycle boundary tested below.
struct SharedFake(Arc<FakeBackend>);

#[async_trait]
impl StorageBackend for SharedFake {
    async fn login(&mut self, host: &str, port: u16, zone: &str, user: &str) -> ExecutorResult<()> {
        if self.0.login_should_fail {
            return Err(ExecutorError::backend(-1, None, "login failed"));
        }
        *self.0.logged_in.lock().unwrap() = true;
        let _ = (host, port, zone, user);
        Ok(())
    }
    async fn disconnect(&mut self) -> ExecutorResult<()> {
        *self.0.logged_in.lock().unwrap() = false;
        Ok(())
    }
    async fn query_page(&self, q: &Query) -> ExecutorResult<QueryPage> {
        self.0.query_page(q).await
    }
    async fn open_collection(&self, path: &str) -> ExecutorResult<Box<dyn CollectionIterator>> {
        self.0.open_collection(path).await
    }
    async fn add_metadata(&self, c: &str, d: Option<&str>, a: &str, v: &str, u: &str) -> ExecutorResult<()> {
        self.0.add_metadata(c, d, a, v, u).await
    }
    async fn remove_metadata(&self, c: &str, d: Option<&str>, a: &str, v: &str, u: &str) -> ExecutorResult<()> {
        self.0.remove_metadata(c, d, a, v, u).await
    }
    async fn modify_permission(&self, c: &str, d: Option<&str>, o: &str, z: Option<&str>, l: &str, r: bool) -> ExecutorResult<()> {
        self.0.modify_permission(c, d, o, z, l, r).await
    }
    async fn checksum(&self, c: &str, d: &str) -> ExecutorResult<String> {
        self.0.checksum(c, d).await
    }
    async fn object_info(&self, c: &str, d: &str) -> ExecutorResult<ObjectInfo> {
        self.0.object_info(c, d).await
    }
    async fn get_object(&self, c: &str, d: &str, b: usize) -> ExecutorResult<Vec<u8>> {
        self.0.get_object(c, d, b).await
    }
    async fn put_object(&self, c: &str, d: &str, b: &[u8], f: bool) -> ExecutorResult<()> {
        self.0.put_object(c, d, b, f).await
    }
    async fn move_object(&self, c: &str, d: &str, n: &str) -> ExecutorResult<()> {
        self.0.move_object(c, d, n).await
    }
    async fn remove_object(&self, c: &str, d: &str, f: bool) -> ExecutorResult<()> {
        self.0.remove_object(c, d, f).await
    }
    async fn make_collection(&self, c: &str, f: bool) -> ExecutorResult<()> {
        self.0.make_collection(c, f).await
    }
    async fn remove_collection(&self, c: &str, r: bool, f: bool) -> ExecutorResult<()> {
        self.0.remove_collection(c, r, f).await
    }
    async fn stat(&self, p: &str) -> ExecutorResult<StatKind> {
        self.0.stat(p).await
    }
}

fn test_environment() -> Environment {
    Environment {
        host: "localhost".to_string(),
        port: 1247,
        zone: "tempZone".to_string(),
        username: "alice".to_string(),
        default_collection: "/tempZone/home/alice".to_string(),
    }
}

async fn drive(backend: Arc<FakeBackend>, config: &Config, input: &str) -> (Vec<Value>, u64) {
    let mut out = Vec::new();
    let new_backend = move || -> Box<dyn StorageBackend> { Box::new(SharedFake(backend.clone())) };
    let errors = stream_loop::run(input.as_bytes(), &mut out, config, &test_environment(), new_backend)
        .await
        .expect("stream loop should not hit a fatal error");
    let lines = String::from_utf8(out)
        .unwrap()
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();
    (lines, errors)
}

/// Listing a collection returns an array of its children.
#[tokio::test]
async fn list_collection_returns_its_children() {
    let backend = Arc::new(
        FakeBackend::new()
            .with_collection("/z/x")
            .with_data_object("/z/x", "f1", b"one")
            .with_data_object("/z/x", "f2", b"two"),
    );
    let input = r#"{"operation":"list","target":{"collection":"/z/x"}}"#;
    let (lines, errors) = drive(backend, &Config::default(), input).await;

    assert_eq!(errors, 0);
    assert_eq!(lines.len(), 1);
    let result = lines[0]["result"].as_array().unwrap();
    assert_eq!(result.len(), 2);
    let names: Vec<&str> = result.iter().map(|e| e["data_object"].as_str().unwrap()).collect();
    assert_eq!(names, vec!["f1", "f2"]);
}

/// `metamod` with the nested `add` operation echoes the target as
/// `result`; omitting the nested operation is an invalid-argument error
/// with the documented message.
#[tokio::test]
async fn metamod_requires_an_explicit_add_or_rem_operation() {
    let backend = Arc::new(FakeBackend::new().with_collection("/z/x"));
    let ok_input = r#"{"operation":"metamod","target":{"collection":"/z/x","avus":[{"attribute":"k","value":"v"}]},"arguments":{"operation":"add"}}"#;
    let (lines, errors) = drive(backend.clone(), &Config::default(), ok_input).await;
    assert_eq!(errors, 0);
    assert!(lines[0]["result"].is_object());

    let missing_op_input = r#"{"operation":"metamod","target":{"collection":"/z/x","avus":[{"attribute":"k","value":"v"}]}}"#;
    let (lines, errors) = drive(backend, &Config::default(), missing_op_input).await;
    assert_eq!(errors, 1);
    assert_eq!(lines[0]["error"]["message"], "No metadata operation was specified");
}

/// `checksum` on a collection-only target is an invalid-argument error
/// naming the precondition it failed.
#[tokio::test]
async fn checksum_rejects_a_non_data_object_target() {
    let backend = Arc::new(FakeBackend::new().with_collection("/z/x"));
    let input = r#"{"operation":"checksum","target":{"collection":"/z/x"}}"#;
    let (lines, errors) = drive(backend, &Config::default(), input).await;

    assert_eq!(errors, 1);
    assert!(lines[0]["error"]["message"]
        .as_str()
        .unwrap()
        .contains("non-data-object"));
}

/// `metaquery` searching both collections and objects returns
/// collection matches before data-object matches.
#[tokio::test]
async fn metaquery_orders_collections_before_data_objects() {
    let backend = Arc::new(
        FakeBackend::new()
            .with_collection("/z/x")
            .with_data_object("/z/x", "f1", b"one"),
    );
    backend.add_metadata("/z/x", None, "k", "v", "").await.unwrap();
    backend.add_metadata("/z/x", Some("f1"), "k", "v", "").await.unwrap();

    let input = r#"{"operation":"metaquery","target":{"avus":[{"attribute":"k","value":"v"}]},"arguments":{"collection":true,"object":true}}"#;
    let (lines, errors) = drive(backend, &Config::default(), input).await;

    assert_eq!(errors, 0);
    let result = lines[0]["result"].as_array().unwrap();
    assert_eq!(result.len(), 2);
    assert!(result[0].get("data_object").is_none(), "collection match should come first");
    assert!(result[1].get("data_object").is_some(), "data object match should come second");
}

/// `metaquery` with a `target.collection` restricts matches to that
/// subtree, excluding AVUs on data objects outside of it.
#[tokio::test]
async fn metaquery_with_subtree_restriction_narrows_results_to_that_branch() {
    let backend = Arc::new(
        FakeBackend::new()
            .with_collection("/z/x")
            .with_data_object("/z/x", "f1", b"one")
            .with_collection("/z/other")
            .with_data_object("/z/other", "f2", b"two"),
    );
    backend.add_metadata("/z/x", Some("f1"), "k", "v", "").await.unwrap();
    backend.add_metadata("/z/other", Some("f2"), "k", "v", "").await.unwrap();

    let input = r#"{"operation":"metaquery","target":{"collection":"/z/x","avus":[{"attribute":"k","value":"v"}]},"arguments":{"object":true}}"#;
    let (lines, errors) = drive(backend, &Config::default(), input).await;

    assert_eq!(errors, 0);
    let result = lines[0]["result"].as_array().unwrap();
    assert_eq!(result.len(), 1);
    assert_eq!(result[0]["collection"], "/z/x");
    assert_eq!(result[0]["data_object"], "f1");
}

/// A non-absolute `target.collection` fed to `metaquery` is used as a
/// `LIKE "%root%"` restriction — matching anywhere in the catalog path —
/// rather than being forced absolute (and thus constrained to a single
/// prefix) before the query runs. Exercises the dispatcher's special
/// case that skips environment-qualifying `metaquery`'s target.
#[tokio::test]
async fn metaquery_subtree_restriction_accepts_a_non_absolute_fragment_root() {
    let backend = Arc::new(
        FakeBackend::new()
            .with_collection("/z/x")
            .with_data_object("/z/x", "f1", b"one")
            .with_collection("/other/y")
            .with_data_object("/other/y", "f2", b"two"),
    );
    backend.add_metadata("/z/x", Some("f1"), "k", "v", "").await.unwrap();
    backend.add_metadata("/other/y", Some("f2"), "k", "v", "").await.unwrap();

    let input = r#"{"operation":"metaquery","target":{"collection":"z","avus":[{"attribute":"k","value":"v"}]},"arguments":{"object":true}}"#;
    let (lines, errors) = drive(backend, &Config::default(), input).await;

    assert_eq!(errors, 0);
    let result = lines[0]["result"].as_array().unwrap();
    assert_eq!(result.len(), 1);
    assert_eq!(result[0]["collection"], "/z/x");
    assert_eq!(result[0]["data_object"], "f1");
}

/// Malformed JSON between two valid items does not suppress or
/// reorder the surrounding valid items' responses.
#[tokio::test]
async fn malformed_json_does_not_disturb_surrounding_valid_items() {
    let backend = Arc::new(FakeBackend::new().with_collection("/z/x").with_collection("/z/y"));
    let input = concat!(
        r#"{"operation":"list","target":{"collection":"/z/x"}}"#,
        "\n{this is not json}\n",
        r#"{"operation":"list","target":{"collection":"/z/y"}}"#,
    );
    let (lines, errors) = drive(backend, &Config::default(), input).await;

    assert_eq!(errors, 1);
    assert_eq!(lines.len(), 2);
    assert_eq!(lines[0]["target"]["collection"], "/z/x");
    assert_eq!(lines[1]["target"]["collection"], "/z/y");
}

/// With `max_connect_time` set so small that any real
/// processing time exceeds it, every item forces a reconnect before the
/// next item's dispatch, yet the shared grid state and the response
/// order are unaffected.
#[tokio::test]
async fn connection_recycles_on_every_item_when_max_connect_time_is_negligible() {
    let backend = Arc::new(
        FakeBackend::new()
            .with_collection("/z/x")
            .with_data_object("/z/x", "f1", b"one"),
    );
    let mut config = Config::default();
    config.max_connect_time = Duration::from_nanos(1);

    let item_list = r#"{"operation":"list","target":{"collection":"/z/x"}}"#;
    let item_checksum = r#"{"operation":"checksum","target":{"collection":"/z/x","data_object":"f1"}}"#;
    let input = format!("{item_list}\n{item_checksum}\n{item_list}");

    let (lines, errors) = drive(backend, &config, &input).await;

    assert_eq!(errors, 0);
    assert_eq!(lines.len(), 3);
    assert_eq!(lines[0]["result"].as_array().unwrap().len(), 1);
    assert!(lines[1]["result"]["checksum"].is_string());
    assert_eq!(lines[2]["result"].as_array().unwrap().len(), 1);
}
