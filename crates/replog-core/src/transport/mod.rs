//! Member-to-member messaging
//!
//! The [`Transport`] trait is the seam to the cluster's messaging layer:
//! request/response on named channels plus fire-and-forget unicast. Payloads
//! are opaque frames produced by the protocol codec.
//!
//! [`LocalNetwork`] connects members living in one process; the
//! [`ServerCommunicator`] maps protocol messages onto channels.

pub mod communicator;
pub mod local;

pub use communicator::{ServerCommunicator, ServerProtocol};
pub use local::{LocalNetwork, LocalTransport};

use crate::error::Result;
use async_trait::async_trait;
use bytes::Bytes;
use futures::future::BoxFuture;
use replog_protocol::MemberId;
use std::future::Future;
use std::sync::Arc;

/// Channel handler: receives the sender and the request frame, returns the
/// response frame
pub type Handler = Arc<dyn Fn(MemberId, Bytes) -> BoxFuture<'static, Result<Bytes>> + Send + Sync>;

/// Wrap an async closure as a [`Handler`]
pub fn handler<F, Fut>(f: F) -> Handler
where
    F: Fn(MemberId, Bytes) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Bytes>> + Send + 'static,
{
    Arc::new(move |from, payload| Box::pin(f(from, payload)))
}

/// Messaging between cluster members
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Member this transport sends as
    fn local_member(&self) -> &MemberId;

    /// Send a request on `channel` to `member` and wait for the response
    async fn send(&self, channel: &str, payload: Bytes, member: &MemberId) -> Result<Bytes>;

    /// Deliver a message on `channel` to `member` without waiting for the
    /// handler
    async fn unicast(&self, channel: &str, payload: Bytes, member: &MemberId) -> Result<()>;

    /// Serve `channel` with `handler`, replacing any previous handler
    fn subscribe(&self, channel: &str, handler: Handler);

    /// Stop serving `channel`
    fn unsubscribe(&self, channel: &str);
}
