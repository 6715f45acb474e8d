//! Bridge session lifecycle.
//!
//! `Disconnected → Connected → Running → ShuttingDown → Stopped`, strictly in
//! that order. Teardown stops the relay, then releases the log file, then
//! closes the chat connection, so nothing is sent on a closing connection.

use std::{future::Future, sync::Arc};

use tokio::{task::JoinHandle, time::timeout};
use tokio_util::sync::CancellationToken;

use crate::{
    config::Config,
    domain::ChannelRef,
    messaging::types::resolve_channel,
    ports::{ChatConnection, Connector, FileFollower, FollowSource},
    relay::{run_relay_counted, RelayCounters, RelayStats},
    responder::CommandResponder,
    Error, Result,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connected,
    Running,
    ShuttingDown,
    Stopped,
}

impl SessionState {
    fn next(self) -> Option<SessionState> {
        match self {
            Self::Disconnected => Some(Self::Connected),
            Self::Connected => Some(Self::Running),
            Self::Running => Some(Self::ShuttingDown),
            Self::ShuttingDown => Some(Self::Stopped),
            Self::Stopped => None,
        }
    }
}

pub struct BridgeSession {
    cfg: Arc<Config>,
    state: SessionState,
    cancel: CancellationToken,
    connection: Option<Arc<dyn ChatConnection>>,
    follower: Option<Box<dyn FileFollower>>,
    relay: Option<JoinHandle<RelayStats>>,
    counters: Arc<RelayCounters>,
}

impl BridgeSession {
    pub fn new(cfg: Arc<Config>) -> Self {
        Self {
            cfg,
            state: SessionState::Disconnected,
            cancel: CancellationToken::new(),
            connection: None,
            follower: None,
            relay: None,
            counters: Arc::default(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    fn check(&self, to: SessionState) -> Result<()> {
        if self.state.next() == Some(to) {
            Ok(())
        } else {
            Err(Error::InvalidTransition {
                from: self.state,
                to,
            })
        }
    }

    fn advance(&mut self, to: SessionState) -> Result<()> {
        self.check(to)?;
        tracing::info!(from = ?self.state, to = ?to, "session state");
        self.state = to;
        Ok(())
    }

    /// Authenticate and open the chat connection.
    pub async fn connect(&mut self, connector: &dyn Connector) -> Result<()> {
        self.check(SessionState::Connected)?;

        let conn = connector.connect(&self.cfg.discord_token).await?;
        tracing::info!(user_id = conn.identity().0, "connected to chat platform");
        self.connection = Some(conn);

        self.advance(SessionState::Connected)
    }

    /// Resolve the destination channel, start following the log, spawn the
    /// relay and start answering commands.
    ///
    /// On failure anything already started is released again, but the
    /// connection stays open for the caller to close.
    pub async fn start(&mut self, source: &dyn FollowSource) -> Result<ChannelRef> {
        self.check(SessionState::Running)?;
        let conn = self
            .connection
            .clone()
            .ok_or_else(|| Error::Connection("no connection".to_string()))?;
        let messenger = conn.messenger();

        let channels = messenger.list_channels(self.cfg.guild_id).await?;
        let dest = resolve_channel(&channels, &self.cfg.channel_name).ok_or_else(|| {
            Error::ChannelNotFound {
                name: self.cfg.channel_name.clone(),
                guild: self.cfg.guild_id.0,
            }
        })?;
        tracing::info!(
            channel = %self.cfg.channel_name,
            channel_id = dest.0,
            "resolved destination channel"
        );

        let mut follower = source.follow(&self.cfg.log_file, self.cfg.start).await?;
        let Some(lines) = follower.take_lines() else {
            let _ = follower.stop().await;
            return Err(Error::External(
                "log follower line stream already taken".to_string(),
            ));
        };
        tracing::info!(
            path = %self.cfg.log_file.display(),
            offset = follower.tell(),
            "following log file"
        );
        self.follower = Some(follower);

        self.relay = Some(tokio::spawn(run_relay_counted(
            lines,
            messenger.clone(),
            dest,
            self.cfg.relay_config(),
            self.cancel.clone(),
            self.counters.clone(),
        )));

        let responder = Arc::new(CommandResponder::new(conn.identity(), messenger));
        if let Err(e) = conn.listen(responder).await {
            self.release_started().await;
            return Err(e);
        }

        self.advance(SessionState::Running)?;
        Ok(dest)
    }

    /// Block until `shutdown` resolves, then tear everything down.
    ///
    /// The relay ending on its own (the follower died) or the connection
    /// dropping also triggers teardown; the session still stops cleanly but
    /// the cause is returned as an error.
    pub async fn run_until<F>(&mut self, shutdown: F) -> Result<RelayStats>
    where
        F: Future<Output = ()>,
    {
        if self.state != SessionState::Running {
            return Err(Error::InvalidTransition {
                from: self.state,
                to: SessionState::ShuttingDown,
            });
        }
        let conn = self
            .connection
            .clone()
            .ok_or_else(|| Error::Connection("no connection".to_string()))?;

        let relay = self.relay.as_mut();
        let relay_ended = async move {
            match relay {
                Some(handle) => handle.await,
                None => std::future::pending().await,
            }
        };

        let mut failure = None;
        let mut relay_gone = false;
        tokio::select! {
          _ = shutdown => {
            tracing::info!("termination requested");
          }
          res = relay_ended => {
            relay_gone = true;
            if let Err(e) = res {
              tracing::error!(error = %e, "relay task failed");
            }
            tracing::error!("relay loop ended before shutdown was requested");
            failure = Some(Error::External(
              "log follower stopped unexpectedly".to_string(),
            ));
          }
          err = conn.terminated() => {
            tracing::error!(error = %err, "chat connection lost");
            failure = Some(err);
          }
        }
        if relay_gone {
            self.relay = None;
        }

        let stats = self.shutdown().await?;
        match failure {
            Some(e) => Err(e),
            None => Ok(stats),
        }
    }

    /// `Running → ShuttingDown → Stopped`.
    pub async fn shutdown(&mut self) -> Result<RelayStats> {
        self.advance(SessionState::ShuttingDown)?;
        self.cancel.cancel();

        if let Some(mut handle) = self.relay.take() {
            match timeout(self.cfg.shutdown_timeout, &mut handle).await {
                Ok(Ok(_)) => {}
                Ok(Err(e)) => tracing::error!(error = %e, "relay task failed"),
                Err(_) => {
                    tracing::warn!(
                        timeout_ms = self.cfg.shutdown_timeout.as_millis() as u64,
                        "relay did not stop in time, aborting it"
                    );
                    handle.abort();
                }
            }
        }
        let stats = self.counters.snapshot();
        tracing::info!(
            lines = stats.lines,
            relayed = stats.relayed,
            read_errors = stats.read_errors,
            dropped = stats.dropped,
            "relay stopped"
        );

        if let Some(mut follower) = self.follower.take() {
            match follower.stop().await {
                Ok(offset) => tracing::info!(offset, "log follower stopped"),
                Err(e) => tracing::warn!(error = %e, "failed to stop log follower"),
            }
        }

        if let Some(conn) = self.connection.take() {
            if let Err(e) = conn.close().await {
                tracing::warn!(error = %e, "failed to close chat connection");
            }
        }

        self.advance(SessionState::Stopped)?;
        Ok(stats)
    }

    /// Close the connection after a failed startup. No-op once stopped.
    pub async fn abandon(&mut self) {
        self.release_started().await;
        if let Some(conn) = self.connection.take() {
            if let Err(e) = conn.close().await {
                tracing::warn!(error = %e, "failed to close chat connection");
            }
        }
    }

    async fn release_started(&mut self) {
        self.cancel.cancel();
        if let Some(handle) = self.relay.take() {
            let _ = handle.await;
        }
        if let Some(mut follower) = self.follower.take() {
            let _ = follower.stop().await;
        }
    }
}

/// Full bridge run: connect, start, wait for `shutdown`, tear down.
pub async fn run<F>(
    cfg: Arc<Config>,
    connector: &dyn Connector,
    source: &dyn FollowSource,
    shutdown: F,
) -> Result<RelayStats>
where
    F: Future<Output = ()>,
{
    let mut session = BridgeSession::new(cfg);
    session.connect(connector).await?;

    if let Err(e) = session.start(source).await {
        session.abandon().await;
        return Err(e);
    }

    session.run_until(shutdown).await
}
