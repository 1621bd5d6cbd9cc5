//! The result cursor (C5, §4.5): a lazy, backpressured stream of records created by `RUN`.

use std::collections::VecDeque;

use crate::error::{Error, Result};
use crate::packstream::Value;
use crate::protocol::Fields;

/// One row, aligned with the field names `RUN`'s `SUCCESS` returned.
#[derive(Debug, Clone)]
pub struct Record {
    pub fields: Vec<String>,
    pub values: Vec<Value>,
}

impl Record {
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields
            .iter()
            .position(|f| f == field)
            .and_then(|i| self.values.get(i))
    }
}

/// Counters and metadata delivered on the terminal `SUCCESS`/`FAILURE` of a cursor (§4.5).
#[derive(Debug, Clone, Default)]
pub struct Summary {
    pub metadata: Fields,
    pub bookmark: Option<String>,
}

/// One page of results from a `PULL`/`DISCARD`: the records that arrived before its
/// terminal `SUCCESS`, whether the server has more to send, and — only once there's no
/// more — the terminal summary.
pub struct Page {
    pub records: Vec<Vec<Value>>,
    pub has_more: bool,
    pub summary: Option<Summary>,
}

/// What a cursor pulls pages from. `BoltConnection` implements this directly for real use;
/// tests substitute a canned in-memory source. This is the trait seam REDESIGN FLAGS (§9)
/// calls for in place of the source's callback-heavy async: the cursor drives the seam with
/// plain `.await`, no handler pyramid.
#[async_trait::async_trait]
pub trait PageSource: Send {
    async fn pull(&mut self, n: i64) -> Result<Page>;
    async fn discard(&mut self) -> Result<Summary>;
    /// Called synchronously from `Drop` when the cursor is abandoned before exhaustion
    /// (§4.5 step 5). Implementations can't await here, so they flag themselves and issue
    /// the actual `DISCARD` the next time the connection is used (see
    /// `connection::conn::BoltConnection::reclaim`).
    fn mark_abandoned(&mut self) {}
}

/// A lazy Bolt query result (§4.5). Holds the `RUN`-assigned field names, buffers `RECORD`s
/// between pages, and asks its [`PageSource`] for another page as the caller drains the
/// buffer.
pub struct ResultCursor<'a> {
    fields: Vec<String>,
    fetch_size: i64,
    buffer: VecDeque<Vec<Value>>,
    has_more: bool,
    exhausted: bool,
    summary: Option<Summary>,
    source: &'a mut dyn PageSource,
}

impl<'a> ResultCursor<'a> {
    pub fn new(fields: Vec<String>, fetch_size: i64, source: &'a mut dyn PageSource) -> Self {
        Self {
            fields,
            fetch_size,
            buffer: VecDeque::new(),
            has_more: true,
            exhausted: false,
            summary: None,
            source,
        }
    }

    /// Same as [`Self::new`], but the first page (the `PULL` pipelined alongside the `RUN`
    /// that produced this cursor, §4.5 step 1, §8 scenario 2) has already been read off the
    /// wire and is handed over ready-made, so the cursor never has to drive the connection
    /// itself to resolve it.
    pub fn with_first_page(
        fields: Vec<String>,
        fetch_size: i64,
        source: &'a mut dyn PageSource,
        first_page: Page,
    ) -> Self {
        let mut cursor = Self::new(fields, fetch_size, source);
        cursor.ingest_page(first_page);
        cursor
    }

    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    /// Fold a page into the cursor's buffer and has-more/summary state.
    fn ingest_page(&mut self, page: Page) {
        self.has_more = page.has_more;
        if let Some(summary) = page.summary {
            self.summary = Some(summary);
        }
        if page.records.is_empty() && !self.has_more {
            self.exhausted = true;
        }
        self.buffer.extend(page.records);
    }

    /// Pull the next record, fetching another page when the buffer empties and the server
    /// reported more are available.
    pub async fn next(&mut self) -> Result<Option<Record>> {
        loop {
            if let Some(values) = self.buffer.pop_front() {
                return Ok(Some(Record {
                    fields: self.fields.clone(),
                    values,
                }));
            }
            if self.exhausted {
                return Ok(None);
            }
            if !self.has_more {
                self.exhausted = true;
                continue;
            }

            let page = self.source.pull(self.fetch_size).await?;
            self.ingest_page(page);
        }
    }

    /// Drain the remainder via `DISCARD(all)` and return only the summary (§4.5 step 4).
    pub async fn consume(&mut self) -> Result<Summary> {
        if !self.exhausted {
            self.buffer.clear();
            let summary = self.source.discard().await?;
            self.summary = Some(summary);
            self.exhausted = true;
        }
        Ok(self.summary.clone().unwrap_or_default())
    }
}

impl<'a> Drop for ResultCursor<'a> {
    /// Dropping an unexhausted cursor asynchronously issues `DISCARD(all)` (§4.5 step 5).
    fn drop(&mut self) {
        if !self.exhausted {
            self.source.mark_abandoned();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// A canned page source: each call to `pull` pops the next scripted page.
    #[derive(Default)]
    struct ScriptedSource {
        pages: VecDeque<Result<Page>>,
        pulls: AtomicUsize,
        discards: AtomicUsize,
        abandoned: bool,
    }

    impl ScriptedSource {
        fn with_pages(pages: Vec<Page>) -> Self {
            Self {
                pages: pages.into_iter().map(Ok).collect(),
                ..Default::default()
            }
        }
    }

    #[async_trait::async_trait]
    impl PageSource for ScriptedSource {
        async fn pull(&mut self, _n: i64) -> Result<Page> {
            self.pulls.fetch_add(1, Ordering::SeqCst);
            self.pages
                .pop_front()
                .unwrap_or_else(|| Err(Error::ProtocolError("no more scripted pages".into())))
        }

        async fn discard(&mut self) -> Result<Summary> {
            self.discards.fetch_add(1, Ordering::SeqCst);
            Ok(Summary {
                metadata: Fields::new(),
                bookmark: None,
            })
        }

        fn mark_abandoned(&mut self) {
            self.abandoned = true;
        }
    }

    #[tokio::test]
    async fn yields_buffered_records_before_requesting_more() {
        let mut source = ScriptedSource::with_pages(vec![Page {
            records: vec![vec![Value::Integer(1)]],
            has_more: false,
            summary: Some(Summary::default()),
        }]);
        let mut cursor = ResultCursor::new(vec!["n".to_string()], 2, &mut source);

        let record = cursor.next().await.unwrap().unwrap();
        assert_eq!(record.get("n"), Some(&Value::Integer(1)));
        assert!(cursor.next().await.unwrap().is_none());
        assert_eq!(source.pulls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn requests_another_page_when_buffer_empties_and_has_more() {
        let mut source = ScriptedSource::with_pages(vec![
            Page {
                records: vec![],
                has_more: true,
                summary: None,
            },
            Page {
                records: vec![vec![Value::Integer(7)]],
                has_more: false,
                summary: Some(Summary::default()),
            },
        ]);
        let mut cursor = ResultCursor::new(vec!["n".to_string()], 2, &mut source);

        let record = cursor.next().await.unwrap().unwrap();
        assert_eq!(record.get("n"), Some(&Value::Integer(7)));
        assert_eq!(source.pulls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn consume_drains_and_returns_only_summary() {
        let mut source = ScriptedSource::with_pages(vec![Page {
            records: vec![vec![Value::Integer(1)]],
            has_more: false,
            summary: Some(Summary {
                metadata: Fields::new(),
                bookmark: Some("bm:1".to_string()),
            }),
        }]);
        let mut cursor = ResultCursor::new(vec!["n".to_string()], 2, &mut source);

        let summary = cursor.consume().await.unwrap();
        assert_eq!(summary.bookmark.as_deref(), Some("bm:1"));
        assert_eq!(source.discards.load(Ordering::SeqCst), 1);
        assert_eq!(source.pulls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn failure_from_page_source_surfaces_from_next() {
        let mut source = ScriptedSource::default();
        let mut cursor = ResultCursor::new(vec!["n".to_string()], 2, &mut source);
        assert!(cursor.next().await.is_err());
    }

    #[tokio::test]
    async fn first_page_handed_to_the_cursor_is_consumed_before_any_explicit_pull() {
        let mut source = ScriptedSource::default();
        let mut cursor = ResultCursor::with_first_page(
            vec!["n".to_string()],
            2,
            &mut source,
            Page {
                records: vec![vec![Value::Integer(9)]],
                has_more: false,
                summary: Some(Summary::default()),
            },
        );

        let record = cursor.next().await.unwrap().unwrap();
        assert_eq!(record.get("n"), Some(&Value::Integer(9)));
        assert_eq!(source.pulls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn dropping_unexhausted_cursor_marks_the_source_abandoned() {
        let mut source = ScriptedSource::with_pages(vec![Page {
            records: vec![vec![Value::Integer(1)]],
            has_more: true,
            summary: None,
        }]);
        {
            let mut cursor = ResultCursor::new(vec!["n".to_string()], 2, &mut source);
            let _ = cursor.next().await.unwrap();
        }
        assert!(source.abandoned);
    }
}
