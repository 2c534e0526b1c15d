//! Query Executor.
//!
//! Given a built [`Query`] and a backend, submits it page by page until
//! the cursor indicates exhaustion, materializing each row into a
//! labeled record. Empty-string values are omitted so absent `units`
//! never surfaces as `{"units": ""}`.

use serde_json::Value;

use crate::backend::StorageBackend;
use crate::errors::ExecutorResult;
use crate::query::Query;

/// Runs `query` to exhaustion against `backend`, returning every row as
/// a JSON object keyed by the query's column labels. A backend failure
/// is annotated with the page index it occurred on, so a caller can
/// tell a failure on the first page from one deep into a large result
/// set.
pub async fn execute(backend: &dyn StorageBackend, mut query: Query) -> ExecutorResult<Vec<Value>> {
    let mut rows = Vec::new();
    let mut page_index: usize = 0;

    loop {
        let page = backend
            .query_page(&query)
            .await
            .map_err(|e| e.with_page(page_index))?;
        for row in page.rows {
            let mut obj = serde_json::Map::new();
            for (label, value) in row {
                if value.is_empty() {
                    continue;
                }
                obj.insert(label.to_string(), Value::String(value));
            }
            rows.push(Value::Object(obj));
        }

        match page.next_cursor {
            Some(cursor) if !cursor.is_empty() => {
                query.cursor = cursor;
                page_index += 1;
            }
            _ => break,
        }
    }

    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{CollectionIterator, QueryPage, StatKind};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;

    struct PagedFake {
        pages: Mutex<Vec<QueryPage>>,
    }

    #[async_trait]
    impl StorageBackend for PagedFake {
        async fn login(&mut self, _: &str, _: u16, _: &str, _: &str) -> ExecutorResult<()> {
            Ok(())
        }
        async fn disconnect(&mut self) -> ExecutorResult<()> {
            Ok(())
        }
        async fn query_page(&self, _: &Query) -> ExecutorResult<QueryPage> {
            let mut pages = self.pages.lock().unwrap();
            Ok(if pages.is_empty() {
                QueryPage::default()
            } else {
                pages.remove(0)
            })
        }
        async fn open_collection(&self, _: &str) -> ExecutorResult<Box<dyn CollectionIterator>> {
            unimplemented!()
        }
        async fn add_metadata(&self, _: &str, _: Option<&str>, _: &str, _: &str, _: &str) -> ExecutorResult<()> {
            unimplemented!()
        }
        async fn remove_metadata(&self, _: &str, _: Option<&str>, _: &str, _: &str, _: &str) -> ExecutorResult<()> {
            unimplemented!()
        }
        async fn modify_permission(
            &self,
            _: &str,
            _: Option<&str>,
            _: &str,
            _: Option<&str>,
            _: &str,
            _: bool,
        ) -> ExecutorResult<()> {
            unimplemented!()
        }
        async fn checksum(&self, _: &str, _: &str) -> ExecutorResult<String> {
            unimplemented!()
        }
        async fn object_info(&self, _: &str, _: &str) -> ExecutorResult<crate::backend::ObjectInfo> {
            unimplemented!()
        }
        async fn get_object(&self, _: &str, _: &str, _: usize) -> ExecutorResult<Vec<u8>> {
            unimplemented!()
        }
        async fn put_object(&self, _: &str, _: &str, _: &[u8], _: bool) -> ExecutorResult<()> {
            unimplemented!()
        }
        async fn move_object(&self, _: &str, _: &str, _: &str) -> ExecutorResult<()> {
            unimplemented!()
        }
        async fn remove_object(&self, _: &str, _: &str, _: bool) -> ExecutorResult<()> {
            unimplemented!()
        }
        async fn make_collection(&self, _: &str, _: bool) -> ExecutorResult<()> {
            unimplemented!()
        }
        async fn remove_collection(&self, _: &str, _: bool, _: bool) -> ExecutorResult<()> {
            unimplemented!()
        }
        async fn stat(&self, _: &str) -> ExecutorResult<StatKind> {
            unimplemented!()
        }
    }

    fn row(pairs: &[(&'static str, &str)]) -> HashMap<&'static str, String> {
        pairs.iter().map(|(k, v)| (*k, v.to_string())).collect()
    }

    #[tokio::test]
    async fn paginates_until_cursor_is_exhausted() {
        let backend = PagedFake {
            pages: Mutex::new(vec![
                QueryPage {
                    rows: vec![row(&[("attribute", "a1"), ("value", "v1")])],
                    next_cursor: Some("c1".into()),
                },
                QueryPage {
                    rows: vec![row(&[("attribute", "a2"), ("value", "v2")])],
                    next_cursor: None,
                },
            ]),
        };
        let query = crate::query::make_query(10, &[]);
        let rows = execute(&backend, query).await.unwrap();
        assert_eq!(rows.len(), 2);
    }

    #[tokio::test]
    async fn empty_string_column_values_are_omitted_from_rows() {
        let backend = PagedFake {
            pages: Mutex::new(vec![QueryPage {
                rows: vec![row(&[("attribute", "a"), ("value", "v"), ("units", "")])],
                next_cursor: None,
            }]),
        };
        let query = crate::query::make_query(10, &[]);
        let rows = execute(&backend, query).await.unwrap();
        assert!(rows[0].get("units").is_none());
        assert_eq!(rows[0]["attribute"], Value::String("a".to_string()));
    }

    /// Succeeds on page 0, then fails every page after. Used to pin down
    /// which page index a mid-pagination backend failure is annotated with.
    struct FailingAtPage {
        fail_at: usize,
        next: Mutex<usize>,
    }

    #[async_trait]
    impl StorageBackend for FailingAtPage {
        async fn login(&mut self, _: &str, _: u16, _: &str, _: &str) -> ExecutorResult<()> {
            Ok(())
        }
        async fn disconnect(&mut self) -> ExecutorResult<()> {
            Ok(())
        }
        async fn query_page(&self, _: &Query) -> ExecutorResult<QueryPage> {
            let mut next = self.next.lock().unwrap();
            let index = *next;
            *next += 1;
            if index == self.fail_at {
                return Err(crate::errors::ExecutorError::backend(-1, None, "backend unavailable"));
            }
            Ok(QueryPage {
                rows: vec![row(&[("attribute", "a"), ("value", "v")])],
                next_cursor: Some(format!("c{index}")),
            })
        }
        async fn open_collection(&self, _: &str) -> ExecutorResult<Box<dyn CollectionIterator>> {
            unimplemented!()
        }
        async fn add_metadata(&self, _: &str, _: Option<&str>, _: &str, _: &str, _: &str) -> ExecutorResult<()> {
            unimplemented!()
        }
        async fn remove_metadata(&self, _: &str, _: Option<&str>, _: &str, _: &str, _: &str) -> ExecutorResult<()> {
            unimplemented!()
        }
        async fn modify_permission(
            &self,
            _: &str,
            _: Option<&str>,
            _: &str,
            _: Option<&str>,
            _: &str,
            _: bool,
        ) -> ExecutorResult<()> {
            unimplemented!()
        }
        async fn checksum(&self, _: &str, _: &str) -> ExecutorResult<String> {
            unimplemented!()
        }
        async fn object_info(&self, _: &str, _: &str) -> ExecutorResult<crate::backend::ObjectInfo> {
            unimplemented!()
        }
        async fn get_object(&self, _: &str, _: &str, _: usize) -> ExecutorResult<Vec<u8>> {
            unimplemented!()
        }
        async fn put_object(&self, _: &str, _: &str, _: &[u8], _: bool) -> ExecutorResult<()> {
            unimplemented!()
        }
        async fn move_object(&self, _: &str, _: &str, _: &str) -> ExecutorResult<()> {
            unimplemented!()
        }
        async fn remove_object(&self, _: &str, _: &str, _: bool) -> ExecutorResult<()> {
            unimplemented!()
        }
        async fn make_collection(&self, _: &str, _: bool) -> ExecutorResult<()> {
            unimplemented!()
        }
        async fn remove_collection(&self, _: &str, _: bool, _: bool) -> ExecutorResult<()> {
            unimplemented!()
        }
        async fn stat(&self, _: &str) -> ExecutorResult<StatKind> {
            unimplemented!()
        }
    }

    #[tokio::test]
    async fn backend_failure_mid_pagination_carries_the_page_index() {
        let backend = FailingAtPage {
            fail_at: 2,
            next: Mutex::new(0),
        };
        let query = crate::query::make_query(10, &[]);
        let err = execute(&backend, query).await.unwrap_err();
        match err {
            crate::errors::ExecutorError::Backend { page, .. } => assert_eq!(page, Some(2)),
            other => panic!("expected a Backend error, got {other:?}"),
        }
    }
}
