//! In-test message transports.

use async_trait::async_trait;
use followup::error::{FollowUpError, Result};
use followup::models::ContactRef;
use followup::services::{DispatchReceipt, MessageDispatcher};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

#[derive(Debug, Clone, PartialEq)]
pub struct SentMessage {
    pub phone: String,
    pub text: String,
}

/// Succeeds unless a failure was queued with [`ScriptedDispatcher::fail_next`].
/// Every attempt, failed or not, is recorded.
#[derive(Default)]
pub struct ScriptedDispatcher {
    failures: Mutex<VecDeque<String>>,
    attempts: Mutex<Vec<SentMessage>>,
    delivered: Mutex<Vec<SentMessage>>,
}

#[allow(dead_code)]
impl ScriptedDispatcher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail_next(&self, times: usize, reason: &str) {
        let mut failures = self.failures.lock().unwrap();
        for _ in 0..times {
            failures.push_back(reason.to_string());
        }
    }

    pub fn delivered(&self) -> Vec<SentMessage> {
        self.delivered.lock().unwrap().clone()
    }

    pub fn attempts(&self) -> usize {
        self.attempts.lock().unwrap().len()
    }
}

#[async_trait]
impl MessageDispatcher for ScriptedDispatcher {
    async fn send(&self, contact: &ContactRef, text: &str) -> Result<DispatchReceipt> {
        let message = SentMessage {
            phone: contact.phone.clone(),
            text: text.to_string(),
        };
        self.attempts.lock().unwrap().push(message.clone());

        if let Some(reason) = self.failures.lock().unwrap().pop_front() {
            return Err(FollowUpError::Dispatch(reason));
        }

        let mut delivered = self.delivered.lock().unwrap();
        delivered.push(message);
        Ok(DispatchReceipt {
            external_message_id: Some(format!("wamid.{}", delivered.len())),
        })
    }
}

/// Blocks inside `send` until released, so a test can act while a dispatch
/// is in flight.
#[derive(Default)]
pub struct GatedDispatcher {
    pub entered: Notify,
    pub release: Notify,
    inner: ScriptedDispatcher,
}

#[allow(dead_code)]
impl GatedDispatcher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn delivered(&self) -> Vec<SentMessage> {
        self.inner.delivered()
    }
}

#[async_trait]
impl MessageDispatcher for GatedDispatcher {
    async fn send(&self, contact: &ContactRef, text: &str) -> Result<DispatchReceipt> {
        self.entered.notify_one();
        self.release.notified().await;
        self.inner.send(contact, text).await
    }
}
