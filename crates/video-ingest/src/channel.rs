//! Fixed-capacity frame buffer shared between the capture producer and the
//! control-loop consumer.
//!
//! The channel never blocks the producer: when the buffer is full the oldest
//! queued frame is evicted to make room. Consumers block in [`FrameChannel::pop`]
//! until a frame arrives or the channel is closed.

use std::{
    collections::VecDeque,
    sync::{Condvar, Mutex, MutexGuard},
};

use crate::types::Frame;

/// Default number of frames buffered between acquisition and processing.
pub const DEFAULT_QUEUE_CAPACITY: usize = 15;

/// Result of a [`FrameChannel::push`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Queued,
    /// The frame was queued after evicting the frame with this sequence number.
    Evicted(u64),
    /// The channel is closed; the frame was discarded.
    Closed,
}

struct ChannelState {
    queue: VecDeque<Frame>,
    closed: bool,
    evicted: u64,
}

pub struct FrameChannel {
    capacity: usize,
    state: Mutex<ChannelState>,
    available: Condvar,
}

impl FrameChannel {
    /// Create a channel holding at most `capacity` frames (minimum one).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            state: Mutex::new(ChannelState {
                queue: VecDeque::with_capacity(capacity),
                closed: false,
                evicted: 0,
            }),
            available: Condvar::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Queue a frame, evicting the oldest one when full. Never blocks on the consumer.
    pub fn push(&self, frame: Frame) -> PushOutcome {
        let mut state = self.lock();
        if state.closed {
            return PushOutcome::Closed;
        }

        let outcome = if state.queue.len() >= self.capacity {
            let dropped = state.queue.pop_front().map(|f| f.sequence).unwrap_or_default();
            state.evicted = state.evicted.wrapping_add(1);
            PushOutcome::Evicted(dropped)
        } else {
            PushOutcome::Queued
        };
        state.queue.push_back(frame);
        drop(state);

        self.available.notify_one();
        outcome
    }

    /// Block until a frame is available. Returns `None` once the channel is closed.
    pub fn pop(&self) -> Option<Frame> {
        let mut state = self.lock();
        loop {
            if state.closed {
                return None;
            }
            if let Some(frame) = state.queue.pop_front() {
                return Some(frame);
            }
            state = match self.available.wait(state) {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
        }
    }

    /// Non-blocking variant of [`FrameChannel::pop`].
    pub fn try_pop(&self) -> Option<Frame> {
        let mut state = self.lock();
        if state.closed {
            return None;
        }
        state.queue.pop_front()
    }

    /// Close the channel and wake every blocked consumer. Queued frames are discarded.
    pub fn close(&self) {
        let mut state = self.lock();
        state.closed = true;
        state.queue.clear();
        drop(state);
        self.available.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    pub fn len(&self) -> usize {
        self.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total frames evicted under backpressure since creation.
    pub fn evicted(&self) -> u64 {
        self.lock().evicted
    }

    fn lock(&self) -> MutexGuard<'_, ChannelState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl Default for FrameChannel {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_CAPACITY)
    }
}
