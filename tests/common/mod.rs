//! Integration test common infrastructure.
//!
//! Provides a mock platform (config store, membership provider, action
//! dispatcher) and a harness that wires them into an engine, with
//! helpers for asserting on dispatched action flows.

use async_trait::async_trait;
use changuard::{
    ActionDispatcher, Button, ChannelId, ChatPermissions, ConfigStore, Engine, GateConfig,
    GroupConfig, GroupId, MemberStatus, MembershipProvider, MessageId, PlatformError, UserId,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

/// A platform action observed by the mock dispatcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatched {
    Delete {
        chat: GroupId,
        message: MessageId,
    },
    Restrict {
        chat: GroupId,
        user: UserId,
        can_send: bool,
    },
    Send {
        chat: GroupId,
        text: String,
        buttons: usize,
    },
    Answer {
        callback_id: String,
        text: String,
        alert: bool,
    },
}

#[derive(Default)]
pub struct MockConfigStore {
    configs: Mutex<HashMap<GroupId, GroupConfig>>,
    pub calls: AtomicUsize,
}

#[async_trait]
impl ConfigStore for MockConfigStore {
    async fn group_config(&self, group: GroupId) -> Result<Option<GroupConfig>, PlatformError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.configs.lock().get(&group).cloned())
    }
}

#[derive(Default)]
pub struct MockProvider {
    membership: Mutex<HashMap<(ChannelId, UserId), MemberStatus>>,
    failing: AtomicBool,
    pub calls: AtomicUsize,
}

#[async_trait]
impl MembershipProvider for MockProvider {
    async fn chat_member(
        &self,
        channel: ChannelId,
        user: UserId,
    ) -> Result<MemberStatus, PlatformError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(PlatformError::Network("provider down".into()));
        }
        Ok(self
            .membership
            .lock()
            .get(&(channel, user))
            .copied()
            .unwrap_or(MemberStatus::Left))
    }
}

#[derive(Default)]
pub struct RecordingDispatcher {
    dispatched: Mutex<Vec<Dispatched>>,
    next_message: AtomicI64,
}

#[async_trait]
impl ActionDispatcher for RecordingDispatcher {
    async fn delete_message(
        &self,
        chat: GroupId,
        message: MessageId,
    ) -> Result<(), PlatformError> {
        self.dispatched.lock().push(Dispatched::Delete { chat, message });
        Ok(())
    }

    async fn restrict_member(
        &self,
        chat: GroupId,
        user: UserId,
        permissions: ChatPermissions,
    ) -> Result<(), PlatformError> {
        self.dispatched.lock().push(Dispatched::Restrict {
            chat,
            user,
            can_send: permissions.can_send_messages,
        });
        Ok(())
    }

    async fn send_message(
        &self,
        chat: GroupId,
        text: &str,
        buttons: &[Button],
    ) -> Result<MessageId, PlatformError> {
        self.dispatched.lock().push(Dispatched::Send {
            chat,
            text: text.to_string(),
            buttons: buttons.len(),
        });
        Ok(MessageId(5000 + self.next_message.fetch_add(1, Ordering::SeqCst)))
    }

    async fn answer_callback(
        &self,
        callback_id: &str,
        text: &str,
        alert: bool,
    ) -> Result<(), PlatformError> {
        self.dispatched.lock().push(Dispatched::Answer {
            callback_id: callback_id.to_string(),
            text: text.to_string(),
            alert,
        });
        Ok(())
    }
}

/// Engine wired to the mock platform.
pub struct TestHarness {
    pub engine: Engine,
    pub config_store: Arc<MockConfigStore>,
    pub provider: Arc<MockProvider>,
    pub dispatcher: Arc<RecordingDispatcher>,
}

impl TestHarness {
    pub fn new(config: GateConfig) -> Self {
        let config_store = Arc::new(MockConfigStore::default());
        let provider = Arc::new(MockProvider::default());
        let dispatcher = Arc::new(RecordingDispatcher::default());
        let engine = Engine::new(
            &config,
            config_store.clone(),
            provider.clone(),
            dispatcher.clone(),
        );
        Self {
            engine,
            config_store,
            provider,
            dispatcher,
        }
    }

    pub fn set_group(&self, config: GroupConfig) {
        self.config_store
            .configs
            .lock()
            .insert(config.group, config);
    }

    pub fn set_member(&self, channel: ChannelId, user: UserId, status: MemberStatus) {
        self.provider.membership.lock().insert((channel, user), status);
    }

    pub fn set_provider_failing(&self, failing: bool) {
        self.provider.failing.store(failing, Ordering::SeqCst);
    }

    pub fn dispatched(&self) -> Vec<Dispatched> {
        self.dispatcher.dispatched.lock().clone()
    }

    pub fn warnings_sent(&self) -> usize {
        self.dispatched()
            .iter()
            .filter(|d| matches!(d, Dispatched::Send { .. }))
            .count()
    }

    /// Poll until at least `count` actions have been dispatched.
    pub async fn wait_for_dispatches(&self, count: usize) {
        let start = Instant::now();
        while self.dispatcher.dispatched.lock().len() < count {
            if start.elapsed() > Duration::from_secs(5) {
                panic!(
                    "timed out waiting for {count} dispatches, got {:?}",
                    self.dispatched()
                );
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    /// Give queued workers a moment, then assert nothing new went out.
    pub async fn assert_no_new_dispatches(&self, baseline: usize) {
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(
            self.dispatcher.dispatched.lock().len(),
            baseline,
            "unexpected dispatches: {:?}",
            self.dispatched()
        );
    }
}
