use std::{path::Path, sync::Arc};

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::{
    domain::{RawLine, StartPosition, UserId},
    messaging::port::MessagingPort,
    responder::CommandResponder,
    Error, Result,
};

/// A running file follow. Lines are published on a channel so the consumer can
/// race the receive against cancellation without interrupting a read.
#[async_trait]
pub trait FileFollower: Send {
    /// Hand over the line stream. `None` once it has been taken.
    fn take_lines(&mut self) -> Option<mpsc::Receiver<RawLine>>;

    /// Byte offset just past the last line published.
    fn tell(&self) -> u64;

    /// Stop following and release the file. Returns the final offset.
    async fn stop(&mut self) -> Result<u64>;
}

/// Opens [`FileFollower`]s.
#[async_trait]
pub trait FollowSource: Send + Sync {
    async fn follow(&self, path: &Path, start: StartPosition) -> Result<Box<dyn FileFollower>>;
}

/// An authenticated chat platform connection.
#[async_trait]
pub trait ChatConnection: Send + Sync {
    /// The bridge's own user on the platform.
    fn identity(&self) -> UserId;

    fn messenger(&self) -> Arc<dyn MessagingPort>;

    /// Start delivering inbound messages to `responder`. Returns once the
    /// platform confirmed delivery is running; messages are handled on the
    /// platform's own tasks.
    async fn listen(&self, responder: Arc<CommandResponder>) -> Result<()>;

    /// Resolves with the cause when inbound delivery stops without
    /// [`close`](Self::close) being called. Pending while not listening.
    async fn terminated(&self) -> Error;

    async fn close(&self) -> Result<()>;
}

/// Establishes a [`ChatConnection`] from a credential.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, token: &str) -> Result<Arc<dyn ChatConnection>>;
}
