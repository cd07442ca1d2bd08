//! Message content pool.
//!
//! Text arriving in large bursts is held per message id and released in
//! fixed-size slices on a fixed period, so the UI grows smoothly instead of
//! jumping. Entries are not size bounded: when the producer outpaces the
//! timer they simply grow until drained.

use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use futures::Stream;
use indexmap::IndexMap;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_stream::wrappers::UnboundedReceiverStream;

pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_millis(50);
pub const DEFAULT_SLICE_LEN: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacingConfig {
    pub tick_interval: Duration,
    /// Maximum characters released per message per tick.
    pub slice_len: usize,
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            tick_interval: DEFAULT_TICK_INTERVAL,
            slice_len: DEFAULT_SLICE_LEN,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PooledContent {
    pub message_id: String,
    pub message_content: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display)]
#[strum(serialize_all = "snake_case")]
pub enum PoolStatus {
    Idle,
    Running,
    Draining,
    Stopped,
}

pub type PoolOutput = Pin<Box<dyn Stream<Item = PooledContent> + Send>>;

struct PoolState {
    entries: IndexMap<String, String>,
    input_complete: bool,
    status: PoolStatus,
    // Dropping the sender closes the output.
    tx: Option<mpsc::UnboundedSender<PooledContent>>,
}

pub struct MessageContentPool {
    config: PacingConfig,
    state: Arc<Mutex<PoolState>>,
    output: Option<PoolOutput>,
    job: Option<JoinHandle<()>>,
}

impl MessageContentPool {
    pub fn new(config: PacingConfig) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let state = PoolState {
            entries: IndexMap::new(),
            input_complete: false,
            status: PoolStatus::Idle,
            tx: Some(tx),
        };
        Self {
            config,
            state: Arc::new(Mutex::new(state)),
            output: Some(Box::pin(UnboundedReceiverStream::new(rx))),
            job: None,
        }
    }

    /// The slice stream. Available once per pool.
    pub fn take_output(&mut self) -> Option<PoolOutput> {
        self.output.take()
    }

    pub fn status(&self) -> PoolStatus {
        self.state.lock().status
    }

    pub fn add_message_content(&self, message_id: &str, fragment: &str) {
        let mut state = self.state.lock();
        if state.status == PoolStatus::Stopped {
            log::debug!("pool stopped, dropping content for message {}", message_id);
            return;
        }
        state
            .entries
            .entry(message_id.to_string())
            .or_default()
            .push_str(fragment);
    }

    /// Spawns the pacing job. Must be called from within a tokio runtime.
    pub fn start(&mut self) {
        {
            let mut state = self.state.lock();
            if state.status != PoolStatus::Idle {
                log::debug!("pool already {}, ignoring start", state.status);
                return;
            }
            state.status = if state.input_complete {
                PoolStatus::Draining
            } else {
                PoolStatus::Running
            };
        }
        let state = self.state.clone();
        let config = self.config;
        self.job = Some(tokio::spawn(run_job(state, config)));
    }

    /// Marks the input finished. The job keeps ticking until every entry has
    /// been released, then closes the output.
    pub fn input_complete(&self) {
        let mut state = self.state.lock();
        state.input_complete = true;
        if state.status == PoolStatus::Running {
            state.status = PoolStatus::Draining;
        }
    }

    /// Closes the output at once, discarding whatever is still buffered.
    pub fn stop(&mut self) {
        {
            let mut state = self.state.lock();
            if state.status != PoolStatus::Stopped {
                let discarded: usize = state.entries.values().map(|e| e.chars().count()).sum();
                if discarded > 0 {
                    log::debug!("pool stopped with {} buffered characters", discarded);
                }
            }
            state.status = PoolStatus::Stopped;
            state.tx = None;
            state.entries.clear();
        }
        if let Some(job) = self.job.take() {
            job.abort();
        }
    }
}

impl Drop for MessageContentPool {
    fn drop(&mut self) {
        if let Some(job) = self.job.take() {
            job.abort();
        }
    }
}

async fn run_job(state: Arc<Mutex<PoolState>>, config: PacingConfig) {
    let mut ticker = tokio::time::interval_at(
        Instant::now() + config.tick_interval,
        config.tick_interval,
    );
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        if !tick(&mut state.lock(), config.slice_len) {
            break;
        }
    }
}

/// Releases one slice per non-empty entry. Returns whether the job should
/// keep running.
fn tick(state: &mut PoolState, slice_len: usize) -> bool {
    if state.status == PoolStatus::Stopped {
        return false;
    }
    let Some(tx) = state.tx.as_ref() else {
        return false;
    };

    let mut receiver_gone = false;
    for (message_id, remaining) in state.entries.iter_mut() {
        if remaining.is_empty() {
            continue;
        }
        let cut = slice_boundary(remaining, slice_len);
        let message_content: String = remaining.drain(..cut).collect();
        let slice = PooledContent {
            message_id: message_id.clone(),
            message_content,
        };
        if tx.send(slice).is_err() {
            receiver_gone = true;
            break;
        }
    }
    state.entries.retain(|_, remaining| !remaining.is_empty());

    if receiver_gone {
        log::debug!("pool output dropped, stopping pacing job");
    } else if !(state.input_complete && state.entries.is_empty()) {
        return true;
    }
    state.status = PoolStatus::Stopped;
    state.tx = None;
    false
}

/// Byte offset just past the first `slice_len` characters of `text`.
fn slice_boundary(text: &str, slice_len: usize) -> usize {
    text.char_indices()
        .nth(slice_len.max(1))
        .map(|(index, _)| index)
        .unwrap_or(text.len())
}
