//! Completion barrier: per-submission transient lists in fast storage and
//! the aggregation that fires exactly once when the last expected result
//! lands.
//!
//! Every finished test (pruned ones included) appends one entry to three
//! parallel lists in a single atomic operation. The append that brings the
//! timing list to the expected total takes all three lists and deletes them
//! in the same atomic step, so a racing peer that also observes the full
//! length reads empty lists and backs off.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use common::{CorrectnessTier, Verdict};

use crate::engine::TestOutcome;

/// Ratio sentinel when no test produced a positive student CPU time.
pub const NO_SUCCESSFUL_RUN_RATIO: f64 = -999.0;
/// Similarity sentinel when no comparison applied.
pub const NO_SIMILARITY: f64 = -1.0;

#[derive(Debug, Error)]
pub enum BarrierError {
    #[error("transient store error: {0}")]
    Store(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<redis::RedisError> for BarrierError {
    fn from(e: redis::RedisError) -> Self {
        BarrierError::Store(e.to_string())
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct TimingEntry {
    student: f64,
    reference: f64,
}

#[derive(Debug, Serialize, Deserialize)]
struct SimilarityEntry {
    similarity: f64,
}

#[derive(Debug, Serialize, Deserialize)]
struct VerdictEntry {
    test_num: i32,
    verdict: Verdict,
}

/// Raw list contents taken at finalization.
#[derive(Debug, Default)]
pub struct TransientLists {
    pub timing: Vec<String>,
    pub similarity: Vec<String>,
    pub verdict: Vec<String>,
}

/// Storage backing the transient lists. Redis in production; the in-memory
/// implementation backs the concurrency tests.
#[async_trait]
pub trait TransientListStore: Send + Sync {
    /// Append one entry to all three lists atomically; returns the new
    /// length of the timing list.
    async fn append(
        &self,
        filename: &str,
        timing: String,
        similarity: String,
        verdict: String,
    ) -> Result<usize, BarrierError>;

    /// Atomically read and delete all three lists. The first caller gets
    /// the data; a concurrent duplicate gets empty lists.
    async fn take(&self, filename: &str) -> Result<TransientLists, BarrierError>;
}

fn timing_key(filename: &str) -> String {
    format!("cpu_time:{filename}")
}
fn similarity_key(filename: &str) -> String {
    format!("similarity:{filename}")
}
fn verdict_key(filename: &str) -> String {
    format!("verdict:{filename}")
}

pub struct RedisListStore {
    conn: redis::aio::MultiplexedConnection,
    ttl_secs: i64,
}

impl RedisListStore {
    pub async fn connect(url: &str, ttl_secs: u64) -> Result<Self, BarrierError> {
        let client = redis::Client::open(url)?;
        let conn = client.get_multiplexed_async_connection().await?;
        Ok(Self {
            conn,
            ttl_secs: ttl_secs as i64,
        })
    }
}

#[async_trait]
impl TransientListStore for RedisListStore {
    async fn append(
        &self,
        filename: &str,
        timing: String,
        similarity: String,
        verdict: String,
    ) -> Result<usize, BarrierError> {
        let mut conn = self.conn.clone();
        let (len,): (usize,) = redis::pipe()
            .atomic()
            .rpush(timing_key(filename), timing)
            .rpush(similarity_key(filename), similarity)
            .ignore()
            .rpush(verdict_key(filename), verdict)
            .ignore()
            // TTL refresh as a safety net against state leaked by a stage
            // crash mid-aggregation.
            .expire(timing_key(filename), self.ttl_secs)
            .ignore()
            .expire(similarity_key(filename), self.ttl_secs)
            .ignore()
            .expire(verdict_key(filename), self.ttl_secs)
            .ignore()
            .query_async(&mut conn)
            .await?;
        Ok(len)
    }

    async fn take(&self, filename: &str) -> Result<TransientLists, BarrierError> {
        let mut conn = self.conn.clone();
        let (timing, similarity, verdict): (Vec<String>, Vec<String>, Vec<String>) =
            redis::pipe()
                .atomic()
                .lrange(timing_key(filename), 0, -1)
                .lrange(similarity_key(filename), 0, -1)
                .lrange(verdict_key(filename), 0, -1)
                .del(timing_key(filename))
                .ignore()
                .del(similarity_key(filename))
                .ignore()
                .del(verdict_key(filename))
                .ignore()
                .query_async(&mut conn)
                .await?;
        Ok(TransientLists {
            timing,
            similarity,
            verdict,
        })
    }
}

/// In-memory store with the same atomicity guarantees, for tests.
#[derive(Default)]
pub struct MemoryListStore {
    lists: Mutex<HashMap<String, (Vec<String>, Vec<String>, Vec<String>)>>,
}

#[async_trait]
impl TransientListStore for MemoryListStore {
    async fn append(
        &self,
        filename: &str,
        timing: String,
        similarity: String,
        verdict: String,
    ) -> Result<usize, BarrierError> {
        let mut lists = self
            .lists
            .lock()
            .map_err(|e| BarrierError::Store(e.to_string()))?;
        let entry = lists.entry(filename.to_string()).or_default();
        entry.0.push(timing);
        entry.1.push(similarity);
        entry.2.push(verdict);
        Ok(entry.0.len())
    }

    async fn take(&self, filename: &str) -> Result<TransientLists, BarrierError> {
        let mut lists = self
            .lists
            .lock()
            .map_err(|e| BarrierError::Store(e.to_string()))?;
        let (timing, similarity, verdict) = lists.remove(filename).unwrap_or_default();
        Ok(TransientLists {
            timing,
            similarity,
            verdict,
        })
    }
}

/// Aggregated summary ready to persist.
#[derive(Clone, Debug, PartialEq)]
pub struct Aggregate {
    pub avg_cpu_time: f64,
    pub min_similarity: f64,
    /// Ordered by test number.
    pub verdicts: Vec<Verdict>,
    pub tier: CorrectnessTier,
}

pub struct CompletionBarrier {
    store: Arc<dyn TransientListStore>,
}

impl CompletionBarrier {
    pub fn new(store: Arc<dyn TransientListStore>) -> Self {
        Self { store }
    }

    /// Record one finished test. Returns the aggregate when this append
    /// completed the expected set; every other caller (including a
    /// duplicate observer of the full length) gets None.
    pub async fn record(
        &self,
        filename: &str,
        outcome: &TestOutcome,
        expected_total: usize,
    ) -> Result<Option<Aggregate>, BarrierError> {
        let timing = serde_json::to_string(&TimingEntry {
            student: outcome.student_cpu_ms,
            reference: outcome.reference_cpu_ms,
        })?;
        let similarity = serde_json::to_string(&SimilarityEntry {
            similarity: outcome.similarity,
        })?;
        let verdict = serde_json::to_string(&VerdictEntry {
            test_num: outcome.test_num,
            verdict: outcome.verdict,
        })?;

        let len = self
            .store
            .append(filename, timing, similarity, verdict)
            .await?;
        if len < expected_total {
            return Ok(None);
        }

        let lists = self.store.take(filename).await?;
        if lists.verdict.is_empty() {
            // A racing peer already finalized.
            return Ok(None);
        }
        Ok(Some(aggregate(&lists)))
    }
}

/// Pure aggregation over the raw list entries. Entries that fail to parse
/// are skipped rather than failing the whole submission.
fn aggregate(lists: &TransientLists) -> Aggregate {
    let mut student_total = 0.0;
    let mut reference_total = 0.0;
    for raw in &lists.timing {
        if let Ok(entry) = serde_json::from_str::<TimingEntry>(raw) {
            if entry.student > 0.0 {
                student_total += entry.student;
                reference_total += entry.reference;
            }
        }
    }
    let avg_cpu_time = if reference_total == 0.0 {
        NO_SUCCESSFUL_RUN_RATIO
    } else {
        student_total / reference_total
    };

    let mut min_similarity: Option<f64> = None;
    for raw in &lists.similarity {
        if let Ok(entry) = serde_json::from_str::<SimilarityEntry>(raw) {
            if entry.similarity >= 0.0 {
                min_similarity = Some(match min_similarity {
                    Some(current) => current.min(entry.similarity),
                    None => entry.similarity,
                });
            }
        }
    }
    let min_similarity = min_similarity.unwrap_or(NO_SIMILARITY);

    let mut entries: Vec<VerdictEntry> = lists
        .verdict
        .iter()
        .filter_map(|raw| serde_json::from_str(raw).ok())
        .collect();
    entries.sort_by_key(|entry| entry.test_num);
    let verdicts: Vec<Verdict> = entries.into_iter().map(|entry| entry.verdict).collect();

    let tier = CorrectnessTier::from_verdicts(&verdicts);

    Aggregate {
        avg_cpu_time,
        min_similarity,
        verdicts,
        tier,
    }
}
