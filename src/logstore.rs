//! Bounded in-memory log store
//!
//! A FIFO ring of structured entries shared by every orchestrator.
//! Eviction is strictly oldest-first once the cap is reached,
//! regardless of level.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;

/// Retention cap. Inserting past this evicts the oldest entry.
pub const LOG_CAP: usize = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    pub id: u64,
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub source: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Query filters. All present filters must match.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogQuery {
    pub level: Option<LogLevel>,
    pub source: Option<String>,
    pub contains: Option<String>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

pub struct LogStore {
    inner: Mutex<Ring>,
}

struct Ring {
    entries: VecDeque<LogEntry>,
    next_id: u64,
    cap: usize,
}

impl LogStore {
    pub fn new() -> Self {
        Self::with_cap(LOG_CAP)
    }

    pub fn with_cap(cap: usize) -> Self {
        Self {
            inner: Mutex::new(Ring {
                entries: VecDeque::new(),
                next_id: 1,
                cap,
            }),
        }
    }

    pub async fn add(
        &self,
        level: LogLevel,
        source: impl Into<String>,
        message: impl Into<String>,
        data: Option<Value>,
    ) {
        let mut ring = self.inner.lock().await;
        let id = ring.next_id;
        ring.next_id += 1;
        ring.entries.push_back(LogEntry {
            id,
            timestamp: Utc::now(),
            level,
            source: source.into(),
            message: message.into(),
            data,
        });
        while ring.entries.len() > ring.cap {
            ring.entries.pop_front();
        }
    }

    /// Newest-last slice of entries matching the query.
    pub async fn query(&self, query: &LogQuery) -> Vec<LogEntry> {
        let ring = self.inner.lock().await;
        let mut matched: Vec<LogEntry> = ring
            .entries
            .iter()
            .filter(|e| {
                query.level.map_or(true, |l| e.level == l)
                    && query.source.as_deref().map_or(true, |s| e.source == s)
                    && query
                        .contains
                        .as_deref()
                        .map_or(true, |t| e.message.contains(t))
                    && query.since.map_or(true, |t| e.timestamp >= t)
                    && query.until.map_or(true, |t| e.timestamp <= t)
            })
            .cloned()
            .collect();

        if let Some(limit) = query.limit {
            let excess = matched.len().saturating_sub(limit);
            matched.drain(..excess);
        }
        matched
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.entries.len()
    }
}
