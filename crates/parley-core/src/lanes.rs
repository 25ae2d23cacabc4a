//! Session lanes: per-session single-flight execution with a bounded FIFO
//! queue behind it.
//!
//! A lane is created lazily on first submission for a session key and
//! dropped again as soon as it has neither a running run nor queued ones.
//! Admission is non-blocking: a submission starts, queues, or is rejected
//! immediately. All lane state sits behind one mutex and no await point
//! ever holds it.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, warn};

use crate::run::{Run, SubmitRequest};

/// Queue cap per lane.
pub const DEFAULT_MAX_PENDING: usize = 100;

/// How long an idempotency key keeps deduplicating after submission.
pub const DEFAULT_IDEMPOTENCY_TTL: Duration = Duration::from_secs(600);

/// Admission decision for one submission.
#[derive(Debug, Clone)]
pub enum Admission {
    /// Admitted into the free slot; the caller must start this run.
    Started(Run),
    Queued {
        run_id: String,
        position: usize,
        queue_depth: usize,
    },
    /// Idempotency-key match; the original admission stands.
    Duplicate {
        run_id: String,
        running: bool,
        position: usize,
        queue_depth: usize,
    },
    /// Queue at capacity; no run was created.
    QueueFull,
}

/// Status snapshot for one lane.
#[derive(Debug, Clone, Serialize)]
pub struct LaneStatus {
    pub session_key: String,
    pub running_run_id: Option<String>,
    pub queued: usize,
    pub queue_depth: usize,
    pub head_wait_ms: Option<i64>,
    pub oldest_enqueued_at: Option<DateTime<Utc>>,
}

/// Aggregate counters across all lanes.
#[derive(Debug, Clone, Serialize)]
pub struct LaneSummary {
    pub running_sessions: usize,
    pub queued_sessions: usize,
    pub total_queued: usize,
}

/// Full lane listing with summary.
#[derive(Debug, Clone, Serialize)]
pub struct LaneReport {
    pub sessions: Vec<LaneStatus>,
    pub summary: LaneSummary,
}

struct IdempotencyEntry {
    run_id: String,
    recorded_at: Instant,
}

#[derive(Default)]
struct Lane {
    running: Option<String>,
    queue: VecDeque<Run>,
    idempotency: HashMap<String, IdempotencyEntry>,
}

impl Lane {
    fn is_idle(&self) -> bool {
        self.running.is_none() && self.queue.is_empty()
    }

    fn status(&self, session_key: &str) -> LaneStatus {
        let oldest = self.queue.front().map(|run| run.enqueued_at);
        LaneStatus {
            session_key: session_key.to_string(),
            running_run_id: self.running.clone(),
            queued: self.queue.len(),
            queue_depth: self.queue.len(),
            head_wait_ms: oldest
                .map(|at| (Utc::now() - at).num_milliseconds())
                .map(|ms| ms.max(0)),
            oldest_enqueued_at: oldest,
        }
    }

    fn prune_idempotency(&mut self, ttl: Duration) {
        let running = self.running.clone();
        let queue_ids: Vec<&str> = self.queue.iter().map(|r| r.run_id.as_str()).collect();
        self.idempotency.retain(|_, entry| {
            if entry.recorded_at.elapsed() > ttl {
                return false;
            }
            running.as_deref() == Some(entry.run_id.as_str())
                || queue_ids.contains(&entry.run_id.as_str())
        });
    }
}

/// Per-session admission control and FIFO scheduling state.
pub struct LaneScheduler {
    max_pending: usize,
    idempotency_ttl: Duration,
    lanes: Mutex<HashMap<String, Lane>>,
}

impl Default for LaneScheduler {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_PENDING)
    }
}

impl LaneScheduler {
    pub fn new(max_pending: usize) -> Self {
        Self {
            max_pending,
            idempotency_ttl: DEFAULT_IDEMPOTENCY_TTL,
            lanes: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_idempotency_ttl(mut self, ttl: Duration) -> Self {
        self.idempotency_ttl = ttl;
        self
    }

    /// Admit, queue, or reject a submission. Never blocks.
    pub fn submit(&self, request: &SubmitRequest) -> Admission {
        let mut lanes = self.lanes.lock();
        let lane = lanes.entry(request.session_key.clone()).or_default();
        lane.prune_idempotency(self.idempotency_ttl);

        if let Some(key) = &request.idempotency_key
            && let Some(entry) = lane.idempotency.get(key)
        {
            let run_id = entry.run_id.clone();
            let running = lane.running.as_deref() == Some(run_id.as_str());
            let position = lane
                .queue
                .iter()
                .position(|r| r.run_id == run_id)
                .map(|idx| idx + 1)
                .unwrap_or(0);
            debug!(
                session_key = %request.session_key,
                run_id = %run_id,
                "Duplicate submission matched by idempotency key"
            );
            return Admission::Duplicate {
                run_id,
                running,
                position,
                queue_depth: lane.queue.len(),
            };
        }

        if lane.running.is_none() && lane.queue.is_empty() {
            let mut run = Run::new(request);
            run.start();
            lane.running = Some(run.run_id.clone());
            Self::remember_key(lane, request, &run.run_id);
            debug!(session_key = %request.session_key, run_id = %run.run_id, "Run admitted");
            return Admission::Started(run);
        }

        if lane.queue.len() >= self.max_pending {
            warn!(
                session_key = %request.session_key,
                queue_depth = lane.queue.len(),
                "Submission rejected, lane queue full"
            );
            return Admission::QueueFull;
        }

        let run = Run::new(request);
        let run_id = run.run_id.clone();
        Self::remember_key(lane, request, &run_id);
        lane.queue.push_back(run);
        debug!(
            session_key = %request.session_key,
            run_id = %run_id,
            position = lane.queue.len(),
            "Run queued"
        );
        Admission::Queued {
            run_id,
            position: lane.queue.len(),
            queue_depth: lane.queue.len(),
        }
    }

    fn remember_key(lane: &mut Lane, request: &SubmitRequest, run_id: &str) {
        if let Some(key) = &request.idempotency_key {
            lane.idempotency.insert(
                key.clone(),
                IdempotencyEntry {
                    run_id: run_id.to_string(),
                    recorded_at: Instant::now(),
                },
            );
        }
    }

    /// Release the running slot for `run_id` and promote the queue head.
    /// Returns the promoted run, already marked running, for the caller to
    /// start. A completion that does not match the running run is ignored.
    pub fn complete(&self, session_key: &str, run_id: &str) -> Option<Run> {
        let mut lanes = self.lanes.lock();
        let lane = lanes.get_mut(session_key)?;
        if lane.running.as_deref() != Some(run_id) {
            warn!(session_key, run_id, "Stale completion ignored");
            return None;
        }

        lane.running = None;
        lane.idempotency.retain(|_, entry| entry.run_id != run_id);

        if let Some(mut next) = lane.queue.pop_front() {
            next.start();
            lane.running = Some(next.run_id.clone());
            debug!(session_key, run_id = %next.run_id, "Promoted queued run");
            return Some(next);
        }

        if lane.is_idle() {
            lanes.remove(session_key);
        }
        None
    }

    /// Status for one lane. A session with no lane reports empty state.
    pub fn status(&self, session_key: &str) -> LaneStatus {
        let lanes = self.lanes.lock();
        match lanes.get(session_key) {
            Some(lane) => lane.status(session_key),
            None => LaneStatus {
                session_key: session_key.to_string(),
                running_run_id: None,
                queued: 0,
                queue_depth: 0,
                head_wait_ms: None,
                oldest_enqueued_at: None,
            },
        }
    }

    /// All lanes, sorted by session key, plus aggregate counters.
    pub fn report(&self) -> LaneReport {
        let lanes = self.lanes.lock();
        let mut sessions: Vec<LaneStatus> = lanes
            .iter()
            .map(|(key, lane)| lane.status(key))
            .collect();
        sessions.sort_by(|a, b| a.session_key.cmp(&b.session_key));

        let summary = LaneSummary {
            running_sessions: lanes.values().filter(|l| l.running.is_some()).count(),
            queued_sessions: lanes.values().filter(|l| !l.queue.is_empty()).count(),
            total_queued: lanes.values().map(|l| l.queue.len()).sum(),
        };
        LaneReport { sessions, summary }
    }
}
