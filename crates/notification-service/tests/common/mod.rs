//! 集成测试共用的测试替身

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use dispatch_shared::retry::RetryPolicy;
use notification_service::{
    Channel, ChannelSender, ChannelSenders, EventRouter, MemoryNotificationStore, Notification,
    NotificationDispatcher, NotificationStore, RetryCoordinator, SendError,
};

/// 按预设脚本依次返回结果的发送器，脚本耗尽后一律成功
pub struct ScriptedSender {
    channel: Channel,
    outcomes: Mutex<VecDeque<Result<(), SendError>>>,
    calls: AtomicUsize,
    sent: Mutex<Vec<Notification>>,
}

impl ScriptedSender {
    pub fn new(channel: Channel) -> Self {
        Self {
            channel,
            outcomes: Mutex::new(VecDeque::new()),
            calls: AtomicUsize::new(0),
            sent: Mutex::new(Vec::new()),
        }
    }

    pub fn with_outcomes(channel: Channel, outcomes: Vec<Result<(), SendError>>) -> Self {
        let sender = Self::new(channel);
        *sender.outcomes.lock().unwrap() = outcomes.into();
        sender
    }

    /// 连续失败 n 次
    pub fn failing(channel: Channel, n: usize, err: SendError) -> Self {
        Self::with_outcomes(channel, (0..n).map(|_| Err(err.clone())).collect())
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn sent(&self) -> Vec<Notification> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChannelSender for ScriptedSender {
    fn channel(&self) -> Channel {
        self.channel
    }

    async fn send(&self, notification: &Notification) -> Result<(), SendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let outcome = self.outcomes.lock().unwrap().pop_front().unwrap_or(Ok(()));
        if outcome.is_ok() {
            self.sent.lock().unwrap().push(notification.clone());
        }
        outcome
    }
}

pub struct Harness {
    pub store: Arc<MemoryNotificationStore>,
    pub email: Arc<ScriptedSender>,
    pub sms: Arc<ScriptedSender>,
    pub push: Arc<ScriptedSender>,
    pub dispatcher: NotificationDispatcher,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_senders(
            ScriptedSender::new(Channel::Email),
            ScriptedSender::new(Channel::Sms),
            ScriptedSender::new(Channel::Push),
        )
    }

    pub fn with_email(email: ScriptedSender) -> Self {
        Self::with_senders(
            email,
            ScriptedSender::new(Channel::Sms),
            ScriptedSender::new(Channel::Push),
        )
    }

    pub fn with_senders(email: ScriptedSender, sms: ScriptedSender, push: ScriptedSender) -> Self {
        let store = Arc::new(MemoryNotificationStore::new());
        let email = Arc::new(email);
        let sms = Arc::new(sms);
        let push = Arc::new(push);

        let dyn_store: Arc<dyn NotificationStore> = store.clone();
        let coordinator =
            RetryCoordinator::new(dyn_store.clone()).with_policy(RetryPolicy::immediate(3));
        let dispatcher = NotificationDispatcher::new(
            EventRouter::new("inventory@ecommerce.com"),
            coordinator,
            ChannelSenders::new(email.clone(), sms.clone(), push.clone()),
            dyn_store,
        );

        Self {
            store,
            email,
            sms,
            push,
            dispatcher,
        }
    }
}
