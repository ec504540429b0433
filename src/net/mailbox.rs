//! Per-session outbound mailbox
//!
//! Holds frames waiting for a session's write task. Control messages
//! (admission, membership changes) queue in order up to a fixed bound.
//! State snapshots occupy a single slot: a newer snapshot replaces an unsent
//! one, so a slow peer sees a lower update rate instead of a growing backlog.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::Bytes;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::Notify;

/// Control messages a session may have pending before it is considered stalled
pub const DEFAULT_CONTROL_CAPACITY: usize = 64;

/// A frame payload waiting to be written
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// Must be delivered
    Control(Bytes),
    /// Superseded by any later state
    State(Bytes),
}

impl Outbound {
    pub fn payload(&self) -> &Bytes {
        match self {
            Outbound::Control(b) | Outbound::State(b) => b,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MailboxError {
    /// Too many undelivered control messages
    #[error("mailbox full")]
    Full,
    #[error("mailbox closed")]
    Closed,
}

/// Bounded outbound queue with an overwrite-on-full state slot
#[derive(Debug)]
pub struct Mailbox {
    queue: Mutex<VecDeque<Outbound>>,
    control_capacity: usize,
    closed: AtomicBool,
    notify: Notify,
}

impl Default for Mailbox {
    fn default() -> Self {
        Self::new(DEFAULT_CONTROL_CAPACITY)
    }
}

impl Mailbox {
    pub fn new(control_capacity: usize) -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            control_capacity,
            closed: AtomicBool::new(false),
            notify: Notify::new(),
        }
    }

    /// Queue a message that must be delivered
    pub fn push_control(&self, payload: Bytes) -> Result<(), MailboxError> {
        self.ensure_open()?;
        {
            let mut queue = self.queue.lock();
            let pending = queue
                .iter()
                .filter(|m| matches!(m, Outbound::Control(_)))
                .count();
            if pending >= self.control_capacity {
                return Err(MailboxError::Full);
            }
            queue.push_back(Outbound::Control(payload));
        }
        self.notify.notify_one();
        Ok(())
    }

    /// Offer the newest state. Replaces a pending state if it is still last
    /// in line, so state never overtakes an earlier control message.
    pub fn push_state(&self, payload: Bytes) -> Result<(), MailboxError> {
        self.ensure_open()?;
        {
            let mut queue = self.queue.lock();
            match queue.back_mut() {
                Some(Outbound::State(slot)) => *slot = payload,
                _ => {
                    // An older state further up is stale now.
                    queue.retain(|m| matches!(m, Outbound::Control(_)));
                    queue.push_back(Outbound::State(payload));
                }
            }
        }
        self.notify.notify_one();
        Ok(())
    }

    /// Take the next message without waiting
    pub fn try_pop(&self) -> Option<Outbound> {
        self.queue.lock().pop_front()
    }

    /// Wait for the next message. Returns `None` once the mailbox is closed
    /// and drained.
    pub async fn pop(&self) -> Option<Outbound> {
        loop {
            let notified = self.notify.notified();
            if let Some(msg) = self.try_pop() {
                return Some(msg);
            }
            if self.is_closed() {
                return None;
            }
            notified.await;
        }
    }

    /// Refuse further messages and wake the reader
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.notify.notify_waiters();
        self.notify.notify_one();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn ensure_open(&self) -> Result<(), MailboxError> {
        if self.is_closed() {
            Err(MailboxError::Closed)
        } else {
            Ok(())
        }
    }
}
