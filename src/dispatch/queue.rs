//! Per-chat FIFO queues feeding the action dispatcher.
//!
//! Enforcement actions are queued per chat rather than dropped on the
//! spot; each queue has a bounded depth and sheds its oldest entry once
//! full. A worker task per active chat drains its queue in order,
//! acquiring rate-limiter tokens before every platform call. Platform
//! failures (the message or chat no longer existing, permission
//! revocations) are downgraded to warnings and never propagate.

use crate::error::EnforceError;
use crate::external::ActionDispatcher;
use crate::metrics;
use crate::state::{RestrictionStore, WarningRefOutcome};
use crate::types::{Button, ChannelId, ChatPermissions, GroupId, MessageId, UserId};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{debug, error, warn};

use super::rate_limit::ActionRateLimiter;

/// Callback payload carried by the warning message's verify button.
pub const VERIFY_CALLBACK_DATA: &str = "changuard:verify";

/// Worker tasks exit after this long with an empty queue.
const WORKER_IDLE_SHUTDOWN: Duration = Duration::from_secs(60);

/// A platform action awaiting dispatch for one chat.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Delete a violating message.
    DeleteMessage { message: MessageId },
    /// Revoke a member's send permission.
    Mute { user: UserId },
    /// Post the warning message with the verify button.
    SendWarning {
        user: UserId,
        missing: Vec<ChannelId>,
    },
    /// Restore a member's send permission.
    Unmute { user: UserId },
    /// Delete an outstanding warning message.
    CleanupWarning { message: MessageId },
}

impl Action {
    /// Static label for metrics and logs.
    pub fn label(&self) -> &'static str {
        match self {
            Action::DeleteMessage { .. } => "delete_message",
            Action::Mute { .. } => "mute",
            Action::SendWarning { .. } => "send_warning",
            Action::Unmute { .. } => "unmute",
            Action::CleanupWarning { .. } => "cleanup_warning",
        }
    }
}

struct ChatQueue {
    pending: Mutex<VecDeque<Action>>,
    notify: Notify,
    worker_running: AtomicBool,
}

impl ChatQueue {
    fn new() -> Self {
        Self {
            pending: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            worker_running: AtomicBool::new(false),
        }
    }
}

struct Inner {
    dispatcher: Arc<dyn ActionDispatcher>,
    limiter: Arc<ActionRateLimiter>,
    store: Arc<RestrictionStore>,
    queues: dashmap::DashMap<GroupId, Arc<ChatQueue>>,
    queue_depth: usize,
}

/// Rate-limited, queue-backed front end to the action dispatcher.
#[derive(Clone)]
pub struct DispatchCoordinator {
    inner: Arc<Inner>,
}

impl DispatchCoordinator {
    pub fn new(
        dispatcher: Arc<dyn ActionDispatcher>,
        limiter: Arc<ActionRateLimiter>,
        store: Arc<RestrictionStore>,
        queue_depth: usize,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                dispatcher,
                limiter,
                store,
                queues: dashmap::DashMap::new(),
                queue_depth: queue_depth.max(1),
            }),
        }
    }

    /// Queue an action for a chat, shedding the oldest entry if full.
    pub fn enqueue(&self, chat: GroupId, action: Action) {
        let queue = {
            let entry = self
                .inner
                .queues
                .entry(chat)
                .or_insert_with(|| Arc::new(ChatQueue::new()));
            Arc::clone(entry.value())
        };

        {
            let mut pending = queue.pending.lock();
            if pending.len() >= self.inner.queue_depth {
                if let Some(dropped) = pending.pop_front() {
                    warn!(
                        %chat,
                        action = dropped.label(),
                        depth = self.inner.queue_depth,
                        "action queue full, dropping oldest entry"
                    );
                    metrics::record_action_dropped("queue_full");
                }
            }
            pending.push_back(action);
        }

        if !queue.worker_running.swap(true, Ordering::SeqCst) {
            let inner = Arc::clone(&self.inner);
            tokio::spawn(async move {
                Self::drain(inner, chat, queue).await;
            });
        } else {
            queue.notify.notify_one();
        }
    }

    /// Answer a callback query immediately (not queued: callback ids
    /// expire within the platform's answer window). Still passes through
    /// the global bucket.
    pub async fn answer_callback(&self, callback_id: &str, text: &str, alert: bool) {
        if let Err(err) = self.inner.limiter.acquire(None, 1).await {
            warn!(error = %err, "dropping callback answer");
            metrics::record_action_dropped("rate_limited");
            return;
        }
        if let Err(err) = self
            .inner
            .dispatcher
            .answer_callback(callback_id, text, alert)
            .await
        {
            warn!(error = %err, "callback answer failed");
        }
    }

    /// Number of actions queued for a chat. Test and introspection hook.
    pub fn pending_for(&self, chat: GroupId) -> usize {
        self.inner
            .queues
            .get(&chat)
            .map(|q| q.pending.lock().len())
            .unwrap_or(0)
    }

    async fn drain(inner: Arc<Inner>, chat: GroupId, queue: Arc<ChatQueue>) {
        loop {
            let action = queue.pending.lock().pop_front();
            match action {
                Some(action) => Self::perform(&inner, chat, action).await,
                None => {
                    let parked =
                        tokio::time::timeout(WORKER_IDLE_SHUTDOWN, queue.notify.notified()).await;
                    if parked.is_ok() {
                        continue;
                    }
                    if queue.pending.lock().is_empty() {
                        queue.worker_running.store(false, Ordering::SeqCst);
                        // An enqueue may have raced the shutdown
                        if !queue.pending.lock().is_empty()
                            && !queue.worker_running.swap(true, Ordering::SeqCst)
                        {
                            continue;
                        }
                        debug!(%chat, "dispatch worker parked out");
                        break;
                    }
                }
            }
        }
    }

    async fn perform(inner: &Arc<Inner>, chat: GroupId, action: Action) {
        if let Err(err) = inner.limiter.acquire(Some(chat), 1).await {
            // Dropped, never retried in a tight loop
            warn!(%chat, action = action.label(), error = %err, "dropping rate-limited action");
            metrics::record_action_dropped("rate_limited");
            return;
        }

        let label = action.label();
        let result = match action {
            Action::DeleteMessage { message } => {
                inner.dispatcher.delete_message(chat, message).await
            }
            Action::Mute { user } => {
                inner
                    .dispatcher
                    .restrict_member(chat, user, ChatPermissions::muted())
                    .await
            }
            Action::Unmute { user } => {
                inner
                    .dispatcher
                    .restrict_member(chat, user, ChatPermissions::unrestricted())
                    .await
            }
            Action::CleanupWarning { message } => {
                inner.dispatcher.delete_message(chat, message).await
            }
            Action::SendWarning { user, missing } => {
                match inner
                    .dispatcher
                    .send_message(chat, &warning_text(&missing), &[verify_button()])
                    .await
                {
                    Ok(message) => {
                        metrics::record_warning_dispatched();
                        Self::store_warning_ref(inner, chat, user, message);
                        Ok(())
                    }
                    Err(err) => Err(err),
                }
            }
        };

        if let Err(err) = result {
            warn!(%chat, action = label, error = %err, "platform action failed");
        }
    }

    fn store_warning_ref(inner: &Arc<Inner>, chat: GroupId, user: UserId, message: MessageId) {
        let mut attempt = inner.store.set_warning_ref(chat, user, message);
        if matches!(attempt, Err(EnforceError::StateConflict { .. })) {
            // One retry for a racing transition, then it is an anomaly
            attempt = inner.store.set_warning_ref(chat, user, message);
        }
        match attempt {
            Ok(WarningRefOutcome::Stored) => {}
            Ok(WarningRefOutcome::NotRestricted) => {
                // Reinstated while the warning was in flight; take it back
                debug!(%chat, %user, "user reinstated mid-dispatch, cleaning up warning");
                Self::enqueue_on(inner, chat, Action::CleanupWarning { message });
            }
            Err(err) => {
                error!(%chat, %user, error = %err, "warning ref conflict persisted");
            }
        }
    }

    fn enqueue_on(inner: &Arc<Inner>, chat: GroupId, action: Action) {
        let coordinator = DispatchCoordinator {
            inner: Arc::clone(inner),
        };
        coordinator.enqueue(chat, action);
    }
}

/// Warning text shown to a restricted user.
fn warning_text(missing: &[ChannelId]) -> String {
    if missing.len() <= 1 {
        "You need to join the required channel before posting here. \
         Tap Verify once you have joined."
            .to_string()
    } else {
        format!(
            "You need to join all {} required channels before posting here. \
             Tap Verify once you have joined.",
            missing.len()
        )
    }
}

fn verify_button() -> Button {
    Button {
        text: "Verify".to_string(),
        callback_data: VERIFY_CALLBACK_DATA.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RateLimitConfig;
    use crate::error::PlatformError;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicI64;
    use tokio::sync::Semaphore;

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Call {
        Delete(MessageId),
        Restrict(UserId, bool),
        Send(GroupId),
        Answer(String, bool),
    }

    struct GatedDispatcher {
        calls: Mutex<Vec<Call>>,
        gate: Semaphore,
        next_message: AtomicI64,
    }

    impl GatedDispatcher {
        fn new(initial_permits: usize) -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
                gate: Semaphore::new(initial_permits),
                next_message: AtomicI64::new(1000),
            }
        }

        fn calls(&self) -> Vec<Call> {
            self.calls.lock().clone()
        }
    }

    #[async_trait]
    impl ActionDispatcher for GatedDispatcher {
        async fn delete_message(
            &self,
            _chat: GroupId,
            message: MessageId,
        ) -> Result<(), PlatformError> {
            let permit = self.gate.acquire().await.expect("gate closed");
            permit.forget();
            self.calls.lock().push(Call::Delete(message));
            Ok(())
        }

        async fn restrict_member(
            &self,
            _chat: GroupId,
            user: UserId,
            permissions: ChatPermissions,
        ) -> Result<(), PlatformError> {
            let permit = self.gate.acquire().await.expect("gate closed");
            permit.forget();
            self.calls
                .lock()
                .push(Call::Restrict(user, permissions.can_send_messages));
            Ok(())
        }

        async fn send_message(
            &self,
            chat: GroupId,
            _text: &str,
            _buttons: &[Button],
        ) -> Result<MessageId, PlatformError> {
            let permit = self.gate.acquire().await.expect("gate closed");
            permit.forget();
            self.calls.lock().push(Call::Send(chat));
            Ok(MessageId(
                self.next_message.fetch_add(1, Ordering::SeqCst),
            ))
        }

        async fn answer_callback(
            &self,
            callback_id: &str,
            _text: &str,
            alert: bool,
        ) -> Result<(), PlatformError> {
            self.calls
                .lock()
                .push(Call::Answer(callback_id.to_string(), alert));
            Ok(())
        }
    }

    fn coordinator_with(
        dispatcher: Arc<GatedDispatcher>,
        queue_depth: usize,
    ) -> (DispatchCoordinator, Arc<RestrictionStore>) {
        let config = RateLimitConfig {
            per_chat_per_second: 100,
            per_chat_burst: 100,
            global_per_second: 100,
            ..RateLimitConfig::default()
        };
        let limiter = Arc::new(ActionRateLimiter::new(&config));
        let store = Arc::new(RestrictionStore::new(Duration::from_secs(30)));
        (
            DispatchCoordinator::new(dispatcher, limiter, Arc::clone(&store), queue_depth),
            store,
        )
    }

    async fn wait_for_calls(dispatcher: &GatedDispatcher, count: usize) {
        let start = std::time::Instant::now();
        while dispatcher.calls().len() < count {
            if start.elapsed() > Duration::from_secs(5) {
                panic!(
                    "timed out waiting for {count} calls, got {:?}",
                    dispatcher.calls()
                );
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    const CHAT: GroupId = GroupId(-1001);

    #[tokio::test]
    async fn test_actions_dispatch_in_fifo_order() {
        let dispatcher = Arc::new(GatedDispatcher::new(usize::MAX >> 3));
        let (coordinator, _store) = coordinator_with(dispatcher.clone(), 50);

        coordinator.enqueue(CHAT, Action::DeleteMessage { message: MessageId(1) });
        coordinator.enqueue(CHAT, Action::Mute { user: UserId(7) });
        coordinator.enqueue(CHAT, Action::DeleteMessage { message: MessageId(2) });

        wait_for_calls(&dispatcher, 3).await;
        assert_eq!(
            dispatcher.calls(),
            vec![
                Call::Delete(MessageId(1)),
                Call::Restrict(UserId(7), false),
                Call::Delete(MessageId(2)),
            ]
        );
    }

    #[tokio::test]
    async fn test_full_queue_sheds_oldest() {
        // One permit: the worker blocks inside the first dispatch
        let dispatcher = Arc::new(GatedDispatcher::new(1));
        let (coordinator, _store) = coordinator_with(dispatcher.clone(), 2);

        coordinator.enqueue(CHAT, Action::DeleteMessage { message: MessageId(1) });
        wait_for_calls(&dispatcher, 1).await;

        coordinator.enqueue(CHAT, Action::DeleteMessage { message: MessageId(2) });
        coordinator.enqueue(CHAT, Action::DeleteMessage { message: MessageId(3) });
        // Queue is at depth 2; the oldest queued entry (2) is shed
        coordinator.enqueue(CHAT, Action::DeleteMessage { message: MessageId(4) });
        assert_eq!(coordinator.pending_for(CHAT), 2);

        dispatcher.gate.add_permits(16);
        wait_for_calls(&dispatcher, 3).await;
        assert_eq!(
            dispatcher.calls(),
            vec![
                Call::Delete(MessageId(1)),
                Call::Delete(MessageId(3)),
                Call::Delete(MessageId(4)),
            ]
        );
    }

    #[tokio::test]
    async fn test_send_warning_stores_ref() {
        let dispatcher = Arc::new(GatedDispatcher::new(usize::MAX >> 3));
        let (coordinator, store) = coordinator_with(dispatcher.clone(), 50);

        store.restrict(CHAT, UserId(7), vec![ChannelId(-5)]);
        coordinator.enqueue(
            CHAT,
            Action::SendWarning {
                user: UserId(7),
                missing: vec![ChannelId(-5)],
            },
        );

        wait_for_calls(&dispatcher, 1).await;
        let entry = store.reinstate(CHAT, UserId(7)).unwrap();
        assert_eq!(entry.warning_ref, Some(MessageId(1000)));
    }

    #[tokio::test]
    async fn test_warning_for_reinstated_user_is_cleaned_up() {
        let dispatcher = Arc::new(GatedDispatcher::new(usize::MAX >> 3));
        let (coordinator, _store) = coordinator_with(dispatcher.clone(), 50);

        // No restriction entry exists: the user was reinstated before the
        // warning went out, so the sent message is deleted again
        coordinator.enqueue(
            CHAT,
            Action::SendWarning {
                user: UserId(7),
                missing: vec![],
            },
        );

        wait_for_calls(&dispatcher, 2).await;
        let calls = dispatcher.calls();
        assert_eq!(calls[0], Call::Send(CHAT));
        assert_eq!(calls[1], Call::Delete(MessageId(1000)));
    }

    #[tokio::test]
    async fn test_answer_callback_bypasses_queue() {
        let dispatcher = Arc::new(GatedDispatcher::new(0));
        let (coordinator, _store) = coordinator_with(dispatcher.clone(), 50);

        // The gate would block queued actions, but answers go straight out
        coordinator.answer_callback("cb-1", "not yet a member", true).await;
        assert_eq!(
            dispatcher.calls(),
            vec![Call::Answer("cb-1".to_string(), true)]
        );
    }

    #[test]
    fn test_warning_text_mentions_channel_count() {
        assert!(warning_text(&[ChannelId(-5)]).contains("the required channel"));
        assert!(warning_text(&[ChannelId(-5), ChannelId(-6)]).contains("all 2"));
    }
}
