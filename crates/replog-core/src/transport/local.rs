//! In-process transport
//!
//! Every member gets a [`LocalTransport`] bound to a shared [`LocalNetwork`].
//! Sends resolve the target's handler from the network registry and run it
//! directly. Members can be disconnected to simulate partitions.

use crate::error::{Error, Result};
use crate::transport::{Handler, Transport};
use async_trait::async_trait;
use bytes::Bytes;
use dashmap::{DashMap, DashSet};
use replog_protocol::MemberId;
use std::sync::Arc;

#[derive(Default)]
struct NetworkInner {
    handlers: DashMap<(MemberId, String), Handler>,
    disconnected: DashSet<MemberId>,
}

/// Registry of handlers for members in one process
#[derive(Clone, Default)]
pub struct LocalNetwork {
    inner: Arc<NetworkInner>,
}

impl LocalNetwork {
    /// Create an empty network
    pub fn new() -> Self {
        Self::default()
    }

    /// Transport for `member`
    pub fn transport(&self, member: impl Into<MemberId>) -> Arc<LocalTransport> {
        Arc::new(LocalTransport {
            member: member.into(),
            network: self.clone(),
        })
    }

    /// Cut `member` off: sends to and from it fail
    pub fn disconnect(&self, member: &MemberId) {
        tracing::debug!("Local network: disconnecting {}", member);
        self.inner.disconnected.insert(member.clone());
    }

    /// Undo [`LocalNetwork::disconnect`]
    pub fn reconnect(&self, member: &MemberId) {
        tracing::debug!("Local network: reconnecting {}", member);
        self.inner.disconnected.remove(member);
    }

    /// Whether `member` is reachable
    pub fn is_connected(&self, member: &MemberId) -> bool {
        !self.inner.disconnected.contains(member)
    }

    fn route(&self, from: &MemberId, to: &MemberId, channel: &str) -> Result<Handler> {
        if !self.is_connected(from) || !self.is_connected(to) {
            return Err(Error::transport(format!(
                "{} cannot reach {}: disconnected",
                from, to
            )));
        }
        self.inner
            .handlers
            .get(&(to.clone(), channel.to_string()))
            .map(|entry| entry.value().clone())
            .ok_or_else(|| {
                Error::transport(format!("no handler for channel {} on {}", channel, to))
            })
    }
}

impl std::fmt::Debug for LocalNetwork {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalNetwork")
            .field("handlers", &self.inner.handlers.len())
            .field("disconnected", &self.inner.disconnected.len())
            .finish()
    }
}

/// One member's view of a [`LocalNetwork`]
#[derive(Debug)]
pub struct LocalTransport {
    member: MemberId,
    network: LocalNetwork,
}

#[async_trait]
impl Transport for LocalTransport {
    fn local_member(&self) -> &MemberId {
        &self.member
    }

    async fn send(&self, channel: &str, payload: Bytes, member: &MemberId) -> Result<Bytes> {
        let handler = self.network.route(&self.member, member, channel)?;
        let response = handler(self.member.clone(), payload).await?;

        // A partition that opened while the handler ran loses the response
        if !self.network.is_connected(member) || !self.network.is_connected(&self.member) {
            return Err(Error::transport(format!(
                "response from {} lost: disconnected",
                member
            )));
        }
        Ok(response)
    }

    async fn unicast(&self, channel: &str, payload: Bytes, member: &MemberId) -> Result<()> {
        let handler = self.network.route(&self.member, member, channel)?;
        let from = self.member.clone();
        let channel = channel.to_string();
        tokio::spawn(async move {
            if let Err(e) = handler(from, payload).await {
                tracing::debug!("Unicast handler on {} failed: {}", channel, e);
            }
        });
        Ok(())
    }

    fn subscribe(&self, channel: &str, handler: Handler) {
        self.network
            .inner
            .handlers
            .insert((self.member.clone(), channel.to_string()), handler);
    }

    fn unsubscribe(&self, channel: &str) {
        self.network
            .inner
            .handlers
            .remove(&(self.member.clone(), channel.to_string()));
    }
}
