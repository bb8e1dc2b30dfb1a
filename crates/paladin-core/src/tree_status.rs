//! Tree status polling.
//!
//! The tree-status service is advisory infrastructure; sustained inability
//! to reach it fails *open* so a flaky status page cannot wedge the commit
//! queue. Only a definitive "closed" answer for the whole wait window stops
//! a run.

use std::io;
use std::thread;
use std::time::{Duration, Instant};

use serde::Deserialize;
use tracing::{info, warn};

/// State of the tree as reported by the status service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TreeState {
    Open,
    /// Throttled trees still accept commit-queue traffic.
    Throttled,
    Closed,
}

impl TreeState {
    /// Whether the commit queue may proceed.
    pub fn permits_work(self) -> bool {
        matches!(self, TreeState::Open | TreeState::Throttled)
    }
}

/// Source of tree-state readings. One fetch per poll tick.
pub trait TreeStatusSource {
    fn fetch(&self) -> io::Result<TreeState>;
}

#[derive(Debug, Deserialize)]
struct StatusPayload {
    general_state: String,
}

/// The production source: an HTTP endpoint returning
/// `{"general_state": "open" | "throttled" | "closed"}`.
pub struct HttpTreeStatus {
    url: String,
    client: reqwest::blocking::Client,
}

impl HttpTreeStatus {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            client: reqwest::blocking::Client::new(),
        }
    }
}

impl TreeStatusSource for HttpTreeStatus {
    fn fetch(&self) -> io::Result<TreeState> {
        let body = self
            .client
            .get(&self.url)
            .send()
            .and_then(|r| r.error_for_status())
            .and_then(|r| r.text())
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
        let payload: StatusPayload = serde_json::from_str(&body)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        match payload.general_state.as_str() {
            "open" => Ok(TreeState::Open),
            "throttled" => Ok(TreeState::Throttled),
            "closed" => Ok(TreeState::Closed),
            other => Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("unknown tree state {other:?}"),
            )),
        }
    }
}

/// Consecutive fetch failures tolerated before assuming the status service
/// itself is down and failing open.
const MAX_CONSECUTIVE_FETCH_ERRORS: u32 = 5;

const MIN_POLL_INTERVAL: Duration = Duration::from_secs(1);
const MAX_POLL_INTERVAL: Duration = Duration::from_secs(30);

fn poll_interval(timeout: Duration) -> Duration {
    (timeout / 5).clamp(MIN_POLL_INTERVAL, MAX_POLL_INTERVAL)
}

/// Poll until the tree permits work or `timeout` elapses.
///
/// Returns `true` when the tree opened (or the status service stayed
/// unreachable long enough to fail open), `false` when the tree was closed
/// for the entire window.
pub fn wait_for_tree_open(source: &dyn TreeStatusSource, timeout: Duration) -> bool {
    wait_with_interval(source, timeout, poll_interval(timeout))
}

fn wait_with_interval(
    source: &dyn TreeStatusSource,
    timeout: Duration,
    interval: Duration,
) -> bool {
    let deadline = Instant::now() + timeout;
    let mut consecutive_errors = 0u32;
    loop {
        match source.fetch() {
            Ok(state) if state.permits_work() => {
                info!(?state, "tree permits work");
                return true;
            }
            Ok(state) => {
                consecutive_errors = 0;
                info!(?state, "tree closed; waiting");
            }
            Err(e) => {
                consecutive_errors += 1;
                warn!(
                    error = %e,
                    consecutive_errors,
                    "could not fetch tree status"
                );
                if consecutive_errors >= MAX_CONSECUTIVE_FETCH_ERRORS {
                    warn!("tree status unreachable; assuming open");
                    return true;
                }
            }
        }
        if Instant::now() >= deadline {
            return false;
        }
        thread::sleep(interval);
    }
}
