//! Session store (spec §3, §4.12, §5): bounded per-session conversation
//! state with per-session serialized mutation.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::Mutex as AsyncMutex;

const DEFAULT_HISTORY_LEN: usize = 10;

#[derive(Debug, Clone, Serialize)]
pub struct TurnRecord {
    pub question: String,
    pub understanding: String,
    pub plan: String,
    pub result_summary: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ResultSnapshot {
    pub metric: Option<String>,
    pub dimensions: Vec<String>,
    pub narrative: Option<String>,
}

#[derive(Debug, Clone)]
pub struct SessionState {
    pub id: String,
    pub history: VecDeque<TurnRecord>,
    pub last_metrics: Vec<String>,
    pub last_dimensions: Vec<String>,
    pub last_intent: Option<String>,
    pub last_result_snapshot: Option<ResultSnapshot>,
    pub created_at: Instant,
    pub last_accessed_at: Instant,
}

impl SessionState {
    fn new(id: String) -> Self {
        let now = Instant::now();
        Self {
            id,
            history: VecDeque::new(),
            last_metrics: Vec::new(),
            last_dimensions: Vec::new(),
            last_intent: None,
            last_result_snapshot: None,
            created_at: now,
            last_accessed_at: now,
        }
    }

    pub fn record_turn(&mut self, history_len: usize, turn: TurnRecord, metrics: Vec<String>, dimensions: Vec<String>, intent: String, snapshot: ResultSnapshot) {
        self.history.push_back(turn);
        while self.history.len() > history_len {
            self.history.pop_front();
        }
        self.last_metrics = metrics;
        self.last_dimensions = dimensions;
        self.last_intent = Some(intent);
        self.last_result_snapshot = Some(snapshot);
        self.last_accessed_at = Instant::now();
    }
}

struct Entry {
    state: AsyncMutex<SessionState>,
    last_touched: std::sync::Mutex<Instant>,
}

/// Bounded map of sessions, each serialized by its own lock so two calls
/// sharing a session id never interleave (spec §4.12, §5). Two concurrent
/// external clients writing the same id observe last-writer-wins ordering
/// under that lock (spec §9 open question 1 — isolation, not fairness).
pub struct SessionStore {
    sessions: DashMap<String, Arc<Entry>>,
    ttl: Duration,
    history_len: usize,
}

impl SessionStore {
    pub fn new(ttl: Duration, history_len: usize) -> Self {
        Self { sessions: DashMap::new(), ttl, history_len: if history_len == 0 { DEFAULT_HISTORY_LEN } else { history_len } }
    }

    fn entry(&self, id: &str) -> Arc<Entry> {
        self.sessions
            .entry(id.to_string())
            .or_insert_with(|| {
                Arc::new(Entry {
                    state: AsyncMutex::new(SessionState::new(id.to_string())),
                    last_touched: std::sync::Mutex::new(Instant::now()),
                })
            })
            .clone()
    }

    /// Runs `f` with exclusive access to the named session's state,
    /// creating it lazily on first use.
    pub async fn with_session<F, R>(&self, id: &str, f: F) -> R
    where
        F: FnOnce(&mut SessionState) -> R,
    {
        let entry = self.entry(id);
        *entry.last_touched.lock().expect("session touch lock poisoned") = Instant::now();
        let mut guard = entry.state.lock().await;
        f(&mut guard)
    }

    pub fn history_len(&self) -> usize {
        self.history_len
    }

    /// Evicts sessions idle longer than the configured TTL.
    pub fn sweep_expired(&self) {
        let ttl = self.ttl;
        self.sessions.retain(|_, entry| {
            entry.last_touched.lock().expect("session touch lock poisoned").elapsed() <= ttl
        });
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn records_turns_and_bounds_history() {
        let store = SessionStore::new(Duration::from_secs(3600), 2);
        for i in 0..5 {
            store
                .with_session("s1", |session| {
                    session.record_turn(
                        store.history_len(),
                        TurnRecord {
                            question: format!("q{i}"),
                            understanding: "".into(),
                            plan: "".into(),
                            result_summary: "".into(),
                            timestamp: chrono::Utc::now(),
                        },
                        vec!["total_mrr".to_string()],
                        vec![],
                        "metric_query".to_string(),
                        ResultSnapshot::default(),
                    );
                })
                .await;
        }
        store
            .with_session("s1", |session| {
                assert_eq!(session.history.len(), 2);
                assert_eq!(session.last_metrics, vec!["total_mrr".to_string()]);
            })
            .await;
    }

    #[tokio::test]
    async fn monotonic_last_metrics_across_successful_turns() {
        let store = SessionStore::new(Duration::from_secs(3600), 10);
        store
            .with_session("s1", |s| {
                s.record_turn(10, turn("q1"), vec!["a".into()], vec![], "metric_query".into(), ResultSnapshot::default())
            })
            .await;
        let observed = store.with_session("s1", |s| s.last_metrics.clone()).await;
        assert_eq!(observed, vec!["a".to_string()]);
    }

    fn turn(q: &str) -> TurnRecord {
        TurnRecord { question: q.into(), understanding: "".into(), plan: "".into(), result_summary: "".into(), timestamp: chrono::Utc::now() }
    }
}
