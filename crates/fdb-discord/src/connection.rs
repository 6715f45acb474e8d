//! Discord connection lifecycle: authenticate over HTTP, run the gateway for
//! inbound messages, shut the shards down on close.

use std::{
    sync::{Arc, Mutex as StdMutex},
    time::Duration,
};

use anyhow::Context as _;
use async_trait::async_trait;
use serenity::{all::ShardManager, http::Http, Client};
use tokio::{
    sync::{oneshot, Mutex},
    task::JoinHandle,
    time::sleep,
};
use tokio_util::sync::CancellationToken;

use fdb_core::{
    domain::UserId,
    errors::Error,
    messaging::port::MessagingPort,
    ports::{ChatConnection, Connector},
    responder::CommandResponder,
    Result,
};

use crate::{handler::DiscordHandler, DiscordMessenger};

const GATEWAY_STOP_TIMEOUT: Duration = Duration::from_secs(5);
const GATEWAY_READY_TIMEOUT: Duration = Duration::from_secs(30);

/// Connects with a bot token.
#[derive(Clone, Copy, Debug, Default)]
pub struct DiscordConnector;

#[async_trait]
impl Connector for DiscordConnector {
    async fn connect(&self, token: &str) -> Result<Arc<dyn ChatConnection>> {
        let http = Arc::new(Http::new(token));

        // Fails fast on a bad token before anything else is started.
        let me = http
            .get_current_user()
            .await
            .map_err(|e| Error::Auth(format!("discord rejected the bot token: {e}")))?;
        tracing::info!(bot_name = %me.name, user_id = me.id.get(), "authenticated with discord");

        Ok(Arc::new(DiscordConnection {
            token: token.to_string(),
            identity: UserId(me.id.get()),
            messenger: Arc::new(DiscordMessenger::new(http)),
            gateway: Mutex::new(None),
        }))
    }
}

/// A started gateway client. `down` fires once the client task returns, with
/// the reason left in `reason`.
struct Gateway {
    shard_manager: Arc<ShardManager>,
    task: JoinHandle<()>,
    down: CancellationToken,
    reason: Arc<StdMutex<Option<String>>>,
}

impl Gateway {
    async fn stop(self) {
        self.shard_manager.shutdown_all().await;
        let mut task = self.task;
        match tokio::time::timeout(GATEWAY_STOP_TIMEOUT, &mut task).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!(error = %e, "discord gateway task failed"),
            Err(_) => {
                tracing::warn!("discord gateway did not stop in time, aborting");
                task.abort();
            }
        }
    }
}

/// Wait for the first `READY`, the client task exiting, or `limit`.
async fn wait_ready(
    ready: oneshot::Receiver<()>,
    down: &CancellationToken,
    reason: &StdMutex<Option<String>>,
    limit: Duration,
) -> Result<()> {
    tokio::select! {
      biased;
      _ = down.cancelled() => Err(Error::Connection(down_reason(reason))),
      res = ready => res.map_err(|_| Error::Connection(down_reason(reason))),
      _ = sleep(limit) => Err(Error::Connection(format!(
        "discord gateway not ready after {}s",
        limit.as_secs()
      ))),
    }
}

fn down_reason(reason: &StdMutex<Option<String>>) -> String {
    reason
        .lock()
        .ok()
        .and_then(|r| r.clone())
        .unwrap_or_else(|| "discord gateway stopped".to_string())
}

pub struct DiscordConnection {
    token: String,
    identity: UserId,
    messenger: Arc<DiscordMessenger>,
    gateway: Mutex<Option<Gateway>>,
}

impl DiscordConnection {
    async fn start_gateway(
        &self,
        responder: Arc<CommandResponder>,
        ready: oneshot::Sender<()>,
    ) -> anyhow::Result<Gateway> {
        let mut client = Client::builder(&self.token, DiscordHandler::intents())
            .event_handler(DiscordHandler::new(responder, ready))
            .await
            .context("failed to build discord client")?;

        let shard_manager = client.shard_manager.clone();
        let down = CancellationToken::new();
        let reason = Arc::new(StdMutex::new(None));

        let task = {
            let down = down.clone();
            let reason = reason.clone();
            tokio::spawn(async move {
                let why = match client.start().await {
                    Ok(()) => "discord gateway closed".to_string(),
                    Err(e) => {
                        tracing::error!(error = %e, "discord gateway stopped with an error");
                        format!("discord gateway failed: {e}")
                    }
                };
                if let Ok(mut slot) = reason.lock() {
                    *slot = Some(why);
                }
                down.cancel();
            })
        };

        Ok(Gateway {
            shard_manager,
            task,
            down,
            reason,
        })
    }
}

#[async_trait]
impl ChatConnection for DiscordConnection {
    fn identity(&self) -> UserId {
        self.identity
    }

    fn messenger(&self) -> Arc<dyn MessagingPort> {
        self.messenger.clone()
    }

    async fn listen(&self, responder: Arc<CommandResponder>) -> Result<()> {
        let mut gateway = self.gateway.lock().await;
        if gateway.is_some() {
            return Err(Error::Connection(
                "discord gateway already running".to_string(),
            ));
        }

        let (ready_tx, ready_rx) = oneshot::channel();
        let started = self
            .start_gateway(responder, ready_tx)
            .await
            .map_err(|e| Error::Connection(format!("{e:#}")))?;

        let ready = wait_ready(
            ready_rx,
            &started.down,
            &started.reason,
            GATEWAY_READY_TIMEOUT,
        )
        .await;
        if let Err(e) = ready {
            started.stop().await;
            return Err(e);
        }

        *gateway = Some(started);
        tracing::info!("listening for discord messages");
        Ok(())
    }

    async fn terminated(&self) -> Error {
        let watch = self
            .gateway
            .lock()
            .await
            .as_ref()
            .map(|g| (g.down.clone(), g.reason.clone()));
        let Some((down, reason)) = watch else {
            return std::future::pending().await;
        };
        down.cancelled().await;
        Error::Connection(down_reason(&reason))
    }

    async fn close(&self) -> Result<()> {
        let Some(gateway) = self.gateway.lock().await.take() else {
            return Ok(());
        };
        gateway.stop().await;
        tracing::info!("discord connection closed");
        Ok(())
    }
}
