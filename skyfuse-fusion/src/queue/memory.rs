use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify};

use super::QueueBackend;
use crate::error::{Error, Result};

/// In-process FIFO queue
///
/// Nothing survives a restart; used when no Redis URL is configured and in
/// tests. `set_offline(true)` makes every call fail.
#[derive(Default)]
pub struct MemoryQueue {
    items: Mutex<VecDeque<String>>,
    dead: Mutex<Vec<String>>,
    notify: Notify,
    offline: AtomicBool,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::Relaxed);
    }

    pub async fn dead_letters(&self) -> Vec<String> {
        self.dead.lock().await.clone()
    }

    fn check_online(&self) -> Result<()> {
        if self.offline.load(Ordering::Relaxed) {
            Err(Error::Unavailable("memory queue offline".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl QueueBackend for MemoryQueue {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn push(&self, payloads: Vec<String>) -> Result<()> {
        self.check_online()?;
        if payloads.is_empty() {
            return Ok(());
        }
        let count = payloads.len();
        self.items.lock().await.extend(payloads);
        for _ in 0..count {
            self.notify.notify_one();
        }
        Ok(())
    }

    async fn pop(&self, timeout: Duration) -> Result<Option<String>> {
        self.check_online()?;
        if let Some(item) = self.items.lock().await.pop_front() {
            return Ok(Some(item));
        }
        // A permit stored by notify_one between the check and here wakes us
        // immediately
        if tokio::time::timeout(timeout, self.notify.notified())
            .await
            .is_err()
        {
            return Ok(None);
        }
        Ok(self.items.lock().await.pop_front())
    }

    async fn dead_letter(&self, payload: String) -> Result<()> {
        self.check_online()?;
        self.dead.lock().await.push(payload);
        Ok(())
    }

    async fn depth(&self) -> Result<usize> {
        self.check_online()?;
        Ok(self.items.lock().await.len())
    }

    async fn dead_letter_depth(&self) -> Result<usize> {
        self.check_online()?;
        Ok(self.dead.lock().await.len())
    }
}
