use anyhow::{anyhow, Result};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

/// Latest-frame broadcast for live streaming.
///
/// The producer publishes encoded JPEG frames; each subscriber waits for a frame newer
/// than the last one it saw. Slow subscribers skip frames instead of queueing them.
#[derive(Default)]
pub struct LiveFeed {
    state: Mutex<FeedState>,
    ready: Condvar,
}

#[derive(Default)]
struct FeedState {
    seq: u64,
    latest: Option<Arc<Vec<u8>>>,
    closed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedEvent {
    Frame(Arc<Vec<u8>>),
    Timeout,
    Closed,
}

impl LiveFeed {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(&self, jpeg: Vec<u8>) -> Result<()> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| anyhow!("live feed lock poisoned"))?;
        if state.closed {
            return Err(anyhow!("live feed is closed"));
        }
        state.seq += 1;
        state.latest = Some(Arc::new(jpeg));
        drop(state);
        self.ready.notify_all();
        Ok(())
    }

    /// End the stream and wake every subscriber.
    pub fn close(&self) {
        if let Ok(mut state) = self.state.lock() {
            state.closed = true;
        }
        self.ready.notify_all();
    }

    pub fn frames_published(&self) -> u64 {
        self.state.lock().map(|s| s.seq).unwrap_or(0)
    }

    pub fn subscribe(self: &Arc<Self>) -> FeedSubscriber {
        FeedSubscriber {
            feed: Arc::clone(self),
            last_seq: 0,
        }
    }
}

/// One stream consumer. The first call returns the current frame if one exists.
pub struct FeedSubscriber {
    feed: Arc<LiveFeed>,
    last_seq: u64,
}

impl FeedSubscriber {
    pub fn next_frame(&mut self, timeout: Duration) -> Result<FeedEvent> {
        let state = self
            .feed
            .state
            .lock()
            .map_err(|_| anyhow!("live feed lock poisoned"))?;
        let last_seq = self.last_seq;
        let (state, _) = self
            .feed
            .ready
            .wait_timeout_while(state, timeout, |s| !s.closed && s.seq == last_seq)
            .map_err(|_| anyhow!("live feed lock poisoned"))?;

        if state.seq != last_seq {
            if let Some(frame) = &state.latest {
                self.last_seq = state.seq;
                return Ok(FeedEvent::Frame(Arc::clone(frame)));
            }
        }
        if state.closed {
            return Ok(FeedEvent::Closed);
        }
        Ok(FeedEvent::Timeout)
    }
}
