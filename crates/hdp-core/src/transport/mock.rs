//! Mock channel for testing.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use super::traits::{ChannelError, HdpChannel};

/// Scripted inbound item.
#[derive(Debug)]
enum Inbound {
    Chunk(Vec<u8>),
    EndOfStream,
    Fail(String),
}

#[derive(Debug, Default)]
struct MockState {
    inbound: VecDeque<Inbound>,
    writes: Vec<Vec<u8>>,
    closed: bool,
    close_calls: usize,
    fail_writes: bool,
}

/// Mock channel for driving the read loop from tests.
///
/// Reads block until a chunk is queued, the stream is ended, or the channel
/// is closed. A read that waits longer than the read timeout fails, so a test
/// that forgets to end the stream does not hang.
pub struct MockChannel {
    state: Mutex<MockState>,
    changed: Condvar,
    read_timeout: Duration,
}

impl MockChannel {
    pub fn new() -> Self {
        Self::with_read_timeout(Duration::from_secs(5))
    }

    pub fn with_read_timeout(read_timeout: Duration) -> Self {
        Self {
            state: Mutex::new(MockState::default()),
            changed: Condvar::new(),
            read_timeout,
        }
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn push(&self, item: Inbound) {
        self.lock().inbound.push_back(item);
        self.changed.notify_all();
    }

    /// Queue bytes to be returned by a read.
    pub fn queue_chunk(&self, bytes: &[u8]) {
        self.push(Inbound::Chunk(bytes.to_vec()));
    }

    /// Queue the end of the stream; every later read returns `None`.
    pub fn queue_end_of_stream(&self) {
        self.push(Inbound::EndOfStream);
    }

    /// Queue a read failure.
    pub fn queue_read_error(&self, message: &str) {
        self.push(Inbound::Fail(message.to_string()));
    }

    /// Make every following write fail.
    pub fn fail_writes(&self, fail: bool) {
        self.lock().fail_writes = fail;
    }

    /// Get all captured writes.
    pub fn get_writes(&self) -> Vec<Vec<u8>> {
        self.lock().writes.clone()
    }

    /// Clear captured writes.
    pub fn clear_writes(&self) {
        self.lock().writes.clear();
    }

    /// Block until at least `count` writes were captured or `timeout`
    /// elapses, then return the captured writes.
    pub fn wait_for_writes(&self, count: usize, timeout: Duration) -> Vec<Vec<u8>> {
        let deadline = Instant::now() + timeout;
        let mut state = self.lock();
        while state.writes.len() < count {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            state = self
                .changed
                .wait_timeout(state, deadline - now)
                .map(|(guard, _)| guard)
                .unwrap_or_else(|e| e.into_inner().0);
        }
        state.writes.clone()
    }

    /// Number of times `close` was called.
    pub fn close_calls(&self) -> usize {
        self.lock().close_calls
    }
}

impl Default for MockChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl HdpChannel for MockChannel {
    fn read(&self, max_len: usize) -> Result<Option<Vec<u8>>, ChannelError> {
        let deadline = Instant::now() + self.read_timeout;
        let mut state = self.lock();
        loop {
            if state.closed {
                return Ok(None);
            }
            if let Some(item) = state.inbound.pop_front() {
                return match item {
                    Inbound::Chunk(mut chunk) => {
                        if chunk.len() > max_len {
                            let rest = chunk.split_off(max_len);
                            state.inbound.push_front(Inbound::Chunk(rest));
                        }
                        Ok(Some(chunk))
                    }
                    Inbound::EndOfStream => {
                        state.inbound.push_front(Inbound::EndOfStream);
                        Ok(None)
                    }
                    Inbound::Fail(message) => Err(ChannelError::ReadFailed(message)),
                };
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(ChannelError::ReadFailed("mock read timed out".into()));
            }
            state = self
                .changed
                .wait_timeout(state, deadline - now)
                .map(|(guard, _)| guard)
                .unwrap_or_else(|e| e.into_inner().0);
        }
    }

    fn write(&self, data: &[u8]) -> Result<usize, ChannelError> {
        let mut state = self.lock();
        if state.closed {
            return Err(ChannelError::Closed);
        }
        if state.fail_writes {
            return Err(ChannelError::WriteFailed("mock write failure".into()));
        }
        state.writes.push(data.to_vec());
        drop(state);
        self.changed.notify_all();
        Ok(data.len())
    }

    fn close(&self) -> Result<(), ChannelError> {
        let mut state = self.lock();
        state.close_calls += 1;
        state.closed = true;
        drop(state);
        self.changed.notify_all();
        Ok(())
    }

    fn is_open(&self) -> bool {
        !self.lock().closed
    }
}
