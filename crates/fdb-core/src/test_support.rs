use std::{
    sync::{
        atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use async_trait::async_trait;

use crate::{
    domain::{ChannelRef, GuildId, MessageId, MessageRef},
    messaging::{
        port::MessagingPort,
        types::{ChannelInfo, MessagingCapabilities},
    },
    Error, Result,
};

/// Shared ordered record of side effects, for teardown-order assertions.
pub type EventLog = Arc<Mutex<Vec<String>>>;

#[derive(Default)]
pub struct FakeMessenger {
    pub channels: Vec<ChannelInfo>,
    pub max_message_len: Option<usize>,
    /// Number of upcoming sends that fail.
    pub fail_next: AtomicUsize,
    /// Sends are recorded and then never complete.
    pub hang_sends: AtomicBool,
    pub sends: Mutex<Vec<(ChannelRef, String)>>,
    pub events: Option<EventLog>,
    pub next_id: AtomicU64,
}

impl FakeMessenger {
    pub fn sent_texts(&self) -> Vec<String> {
        self.sends
            .lock()
            .unwrap()
            .iter()
            .map(|(_, t)| t.clone())
            .collect()
    }
}

#[async_trait]
impl MessagingPort for FakeMessenger {
    fn capabilities(&self) -> MessagingCapabilities {
        MessagingCapabilities {
            max_message_len: self.max_message_len.unwrap_or(2000),
        }
    }

    async fn send_text(&self, channel: ChannelRef, text: &str) -> Result<MessageRef> {
        self.sends.lock().unwrap().push((channel, text.to_string()));
        if let Some(events) = &self.events {
            events.lock().unwrap().push(format!("send:{text}"));
        }
        if self.hang_sends.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        let failing = self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(Error::External("injected send failure".to_string()));
        }
        Ok(MessageRef {
            channel,
            message_id: MessageId(self.next_id.fetch_add(1, Ordering::SeqCst) + 1),
        })
    }

    async fn list_channels(&self, _guild: GuildId) -> Result<Vec<ChannelInfo>> {
        Ok(self.channels.clone())
    }
}

/// Poll `cond` until it holds or `timeout` passes.
pub async fn wait_until(timeout: Duration, cond: impl Fn() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    cond()
}
