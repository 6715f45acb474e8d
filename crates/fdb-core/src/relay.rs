//! Log tail → chat relay loop.

use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use tokio::{sync::mpsc, time::sleep};
use tokio_util::sync::CancellationToken;

use crate::{
    classifier::{classify, format_relay},
    domain::{ChannelRef, RawLine},
    messaging::{port::MessagingPort, types::truncate_message},
};

/// One send plus one retry.
const SEND_ATTEMPTS: u32 = 2;

#[derive(Clone, Debug)]
pub struct RelayConfig {
    pub marker: String,
    pub tag: String,
    pub retry_backoff: Duration,
}

/// Counters reported when the loop exits.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RelayStats {
    pub lines: u64,
    pub relayed: u64,
    pub read_errors: u64,
    pub dropped: u64,
}

/// Live relay counters, readable while the loop runs and after it is aborted.
#[derive(Debug, Default)]
pub struct RelayCounters {
    lines: AtomicU64,
    relayed: AtomicU64,
    read_errors: AtomicU64,
    dropped: AtomicU64,
}

impl RelayCounters {
    pub fn snapshot(&self) -> RelayStats {
        RelayStats {
            lines: self.lines.load(Ordering::Relaxed),
            relayed: self.relayed.load(Ordering::Relaxed),
            read_errors: self.read_errors.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }

    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Forward chat lines from `lines` to `dest` until `cancel` fires or the line
/// source closes.
///
/// Cancellation is checked before every receive, so once it fires no further
/// line is picked up. A send already in progress is allowed to finish.
pub async fn run_relay(
    lines: mpsc::Receiver<RawLine>,
    messenger: Arc<dyn MessagingPort>,
    dest: ChannelRef,
    cfg: RelayConfig,
    cancel: CancellationToken,
) -> RelayStats {
    run_relay_counted(lines, messenger, dest, cfg, cancel, Arc::default()).await
}

/// [`run_relay`] recording into caller-owned `counters`.
pub async fn run_relay_counted(
    mut lines: mpsc::Receiver<RawLine>,
    messenger: Arc<dyn MessagingPort>,
    dest: ChannelRef,
    cfg: RelayConfig,
    cancel: CancellationToken,
    counters: Arc<RelayCounters>,
) -> RelayStats {
    let max_len = messenger.capabilities().max_message_len;

    loop {
        tokio::select! {
          biased;
          _ = cancel.cancelled() => {
            tracing::debug!("relay cancelled");
            break;
          }
          line = lines.recv() => {
            let Some(line) = line else {
              tracing::warn!("log follower closed its line stream");
              break;
            };
            RelayCounters::bump(&counters.lines);

            let payload = match classify(&line, &cfg.marker) {
              Ok(Some(p)) => p,
              Ok(None) => continue,
              Err(e) => {
                RelayCounters::bump(&counters.read_errors);
                tracing::warn!(error = %e, read_at = %line.read_at, "skipping unreadable log line");
                continue;
              }
            };
            let text = truncate_message(&format_relay(&cfg.tag, payload), max_len);
            tracing::debug!(read_at = %line.read_at, len = text.len(), "relaying chat line");

            if deliver(messenger.as_ref(), dest, &text, cfg.retry_backoff, &cancel).await {
              RelayCounters::bump(&counters.relayed);
            } else {
              RelayCounters::bump(&counters.dropped);
            }
          }
        }
    }

    counters.snapshot()
}

/// Best-effort send with one retry. Returns whether the message went out.
async fn deliver(
    messenger: &dyn MessagingPort,
    dest: ChannelRef,
    text: &str,
    backoff: Duration,
    cancel: &CancellationToken,
) -> bool {
    for attempt in 1..=SEND_ATTEMPTS {
        match messenger.send_text(dest, text).await {
            Ok(_) => return true,
            Err(e) if attempt < SEND_ATTEMPTS => {
                tracing::warn!(attempt, error = %e, "relay send failed, retrying");
                tokio::select! {
                  _ = cancel.cancelled() => {
                    tracing::warn!("shutdown during retry backoff, dropping message");
                    return false;
                  }
                  _ = sleep(backoff) => {}
                }
            }
            Err(e) => {
                tracing::warn!(attempt, error = %e, "relay send failed, dropping message");
            }
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        test_support::{wait_until, FakeMessenger},
        Error,
    };
    use std::sync::atomic::Ordering;

    const DEST: ChannelRef = ChannelRef(555);

    fn cfg() -> RelayConfig {
        RelayConfig {
            marker: "[CHAT]".to_string(),
            tag: "[Factorio]".to_string(),
            retry_backoff: Duration::from_millis(1),
        }
    }

    fn spawn_relay(
        api: Arc<FakeMessenger>,
        cancel: CancellationToken,
    ) -> (
        mpsc::Sender<RawLine>,
        tokio::task::JoinHandle<RelayStats>,
    ) {
        let (tx, rx) = mpsc::channel(16);
        let handle = tokio::spawn(run_relay(rx, api, DEST, cfg(), cancel));
        (tx, handle)
    }

    #[tokio::test]
    async fn relays_chat_lines_only() {
        let api = Arc::new(FakeMessenger::default());
        let cancel = CancellationToken::new();
        let (tx, handle) = spawn_relay(api.clone(), cancel.clone());

        tx.send(RawLine::ok("2021-01-01 12:00:00 [CHAT] alice: hello"))
            .await
            .unwrap();
        tx.send(RawLine::ok("2021-01-01 12:00:00 [JOIN] alice"))
            .await
            .unwrap();
        tx.send(RawLine::ok("2021-01-01 12:00:01 [CHAT]"))
            .await
            .unwrap();
        tx.send(RawLine::failed(Error::External("bad read".to_string())))
            .await
            .unwrap();
        tx.send(RawLine::ok("2021-01-01 12:00:02 [CHAT] bob: hi"))
            .await
            .unwrap();
        tx.send(RawLine::ok("2021-01-01 12:00:03 [CHAT]   "))
            .await
            .unwrap();
        drop(tx);

        let stats = handle.await.unwrap();
        assert_eq!(
            api.sent_texts(),
            vec![
                "[Factorio]alice: hello".to_string(),
                "[Factorio]bob: hi".to_string(),
                "[Factorio]".to_string(),
            ]
        );
        assert!(api.sends.lock().unwrap().iter().all(|(c, _)| *c == DEST));
        assert_eq!(
            stats,
            RelayStats {
                lines: 6,
                relayed: 3,
                read_errors: 1,
                dropped: 0,
            }
        );
    }

    #[tokio::test]
    async fn no_sends_after_cancellation() {
        let api = Arc::new(FakeMessenger::default());
        let cancel = CancellationToken::new();
        let (tx, handle) = spawn_relay(api.clone(), cancel.clone());

        tx.send(RawLine::ok("[CHAT] first")).await.unwrap();
        assert!(wait_until(Duration::from_secs(2), || api.sent_texts().len() == 1).await);

        cancel.cancel();
        let stats = handle.await.unwrap();
        assert_eq!(stats.relayed, 1);

        // The loop is gone: later lines have nowhere to go and nothing is sent.
        assert!(tx.send(RawLine::ok("[CHAT] second")).await.is_err());
        assert_eq!(api.sent_texts(), vec!["[Factorio]first".to_string()]);
    }

    #[tokio::test]
    async fn queued_lines_are_not_sent_once_cancelled() {
        let api = Arc::new(FakeMessenger::default());
        let cancel = CancellationToken::new();
        let (tx, rx) = mpsc::channel(16);
        for i in 0..5 {
            tx.send(RawLine::ok(format!("[CHAT] line {i}"))).await.unwrap();
        }
        cancel.cancel();

        let stats = run_relay(rx, api.clone(), DEST, cfg(), cancel).await;
        assert_eq!(stats, RelayStats::default());
        assert!(api.sent_texts().is_empty());
    }

    #[tokio::test]
    async fn failed_send_is_retried_once() {
        let api = Arc::new(FakeMessenger::default());
        api.fail_next.store(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::channel(4);
        tx.send(RawLine::ok("[CHAT] hello")).await.unwrap();
        drop(tx);

        let stats = run_relay(rx, api.clone(), DEST, cfg(), CancellationToken::new()).await;
        assert_eq!(stats.relayed, 1);
        assert_eq!(stats.dropped, 0);
        assert_eq!(api.sent_texts().len(), 2);
    }

    #[tokio::test]
    async fn message_is_dropped_after_second_failure_and_loop_continues() {
        let api = Arc::new(FakeMessenger::default());
        api.fail_next.store(2, Ordering::SeqCst);
        let (tx, rx) = mpsc::channel(4);
        tx.send(RawLine::ok("[CHAT] lost")).await.unwrap();
        tx.send(RawLine::ok("[CHAT] kept")).await.unwrap();
        drop(tx);

        let stats = run_relay(rx, api.clone(), DEST, cfg(), CancellationToken::new()).await;
        assert_eq!(stats.dropped, 1);
        assert_eq!(stats.relayed, 1);
        assert_eq!(
            api.sent_texts(),
            vec![
                "[Factorio]lost".to_string(),
                "[Factorio]lost".to_string(),
                "[Factorio]kept".to_string()
            ]
        );
    }

    #[tokio::test]
    async fn cancellation_during_backoff_drops_the_message() {
        let api = Arc::new(FakeMessenger::default());
        api.fail_next.store(1, Ordering::SeqCst);
        let cancel = CancellationToken::new();
        let (tx, rx) = mpsc::channel(4);
        tx.send(RawLine::ok("[CHAT] slow")).await.unwrap();

        let relay_cfg = RelayConfig {
            retry_backoff: Duration::from_secs(60),
            ..cfg()
        };
        let handle = tokio::spawn(run_relay(rx, api.clone(), DEST, relay_cfg, cancel.clone()));
        assert!(wait_until(Duration::from_secs(2), || api.sent_texts().len() == 1).await);
        cancel.cancel();

        let stats = tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("relay should stop promptly")
            .unwrap();
        assert_eq!(stats.dropped, 1);
        assert_eq!(api.sent_texts().len(), 1);
        drop(tx);
    }

    #[tokio::test]
    async fn long_lines_are_truncated_to_platform_limit() {
        let api = Arc::new(FakeMessenger {
            max_message_len: Some(20),
            ..Default::default()
        });
        let (tx, rx) = mpsc::channel(4);
        tx.send(RawLine::ok(format!("[CHAT] {}", "x".repeat(100))))
            .await
            .unwrap();
        drop(tx);

        run_relay(rx, api.clone(), DEST, cfg(), CancellationToken::new()).await;
        let sent = api.sent_texts();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].chars().count(), 20);
        assert!(sent[0].starts_with("[Factorio]xxx"));
    }

    #[tokio::test]
    async fn counters_are_visible_while_a_send_hangs() {
        let api = Arc::new(FakeMessenger::default());
        api.hang_sends.store(true, Ordering::SeqCst);
        let counters = Arc::new(RelayCounters::default());
        let (tx, rx) = mpsc::channel(4);
        tx.send(RawLine::ok("[CHAT] stuck")).await.unwrap();

        let handle = tokio::spawn(run_relay_counted(
            rx,
            api.clone(),
            DEST,
            cfg(),
            CancellationToken::new(),
            counters.clone(),
        ));
        assert!(wait_until(Duration::from_secs(2), || api.sent_texts().len() == 1).await);
        handle.abort();

        assert_eq!(
            counters.snapshot(),
            RelayStats {
                lines: 1,
                ..RelayStats::default()
            }
        );
        drop(tx);
    }
}
