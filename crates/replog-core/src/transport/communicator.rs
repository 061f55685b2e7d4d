//! Primary/backup protocol over a [`Transport`]
//!
//! Each request type travels on its own channel (see [`MessageContext`]).
//! Outgoing messages are framed with the protocol codec; incoming frames are
//! decoded, handed to the registered handler, and the handler's response is
//! framed back.

use crate::error::{Error, Result};
use crate::transport::{Transport, handler};
use async_trait::async_trait;
use replog_protocol::{
    BackupEvent, BackupRequest, BackupResponse, CloseRequest, CloseResponse, ExecuteRequest,
    ExecuteResponse, MemberId, MessageContext, MetadataRequest, MetadataResponse, RestoreRequest,
    RestoreResponse, SessionId, WireMessage,
};
use std::future::Future;
use std::sync::Arc;

/// Outbound side of the primary/backup protocol
#[async_trait]
pub trait ServerProtocol: Send + Sync + 'static {
    /// Ship a batch of operations to a backup
    async fn backup(&self, member: &MemberId, request: BackupRequest) -> Result<BackupResponse>;

    /// Ask the primary for its current state
    async fn restore(&self, member: &MemberId, request: RestoreRequest)
    -> Result<RestoreResponse>;

    /// Publish an event to a client session hosted on `member`
    async fn event(&self, member: &MemberId, session: SessionId, event: BackupEvent)
    -> Result<()>;
}

/// Maps protocol messages onto transport channels
#[derive(Clone)]
pub struct ServerCommunicator {
    context: MessageContext,
    transport: Arc<dyn Transport>,
}

impl ServerCommunicator {
    /// Create a communicator with optionally prefixed channel names
    pub fn new(prefix: Option<&str>, transport: Arc<dyn Transport>) -> Self {
        Self {
            context: MessageContext::new(prefix),
            transport,
        }
    }

    /// Channel names in use
    pub fn context(&self) -> &MessageContext {
        &self.context
    }

    /// Member this communicator speaks for
    pub fn local_member(&self) -> &MemberId {
        self.transport.local_member()
    }

    async fn request<Req, Resp>(&self, channel: &str, member: &MemberId, request: &Req) -> Result<Resp>
    where
        Req: WireMessage + Sync,
        Resp: WireMessage,
    {
        let frame = request.encode()?;
        let response = self.transport.send(channel, frame, member).await?;
        Ok(Resp::decode(&response)?)
    }

    fn register<Req, Resp, F, Fut>(&self, channel: &str, f: F)
    where
        Req: WireMessage + Send + 'static,
        Resp: WireMessage + Send + 'static,
        F: Fn(MemberId, Req) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Resp>> + Send + 'static,
    {
        let f = Arc::new(f);
        self.transport.subscribe(
            channel,
            handler(move |from, frame| {
                let f = f.clone();
                async move {
                    let request = Req::decode(&frame)?;
                    let response = f(from, request).await?;
                    Ok::<_, Error>(response.encode()?)
                }
            }),
        );
    }

    /// Serve backup requests
    pub fn register_backup_handler<F, Fut>(&self, f: F)
    where
        F: Fn(MemberId, BackupRequest) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<BackupResponse>> + Send + 'static,
    {
        self.register(&self.context.backup_subject, f);
    }

    /// Stop serving backup requests
    pub fn unregister_backup_handler(&self) {
        self.transport.unsubscribe(&self.context.backup_subject);
    }

    /// Serve restore requests
    pub fn register_restore_handler<F, Fut>(&self, f: F)
    where
        F: Fn(MemberId, RestoreRequest) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<RestoreResponse>> + Send + 'static,
    {
        self.register(&self.context.restore_subject, f);
    }

    /// Stop serving restore requests
    pub fn unregister_restore_handler(&self) {
        self.transport.unsubscribe(&self.context.restore_subject);
    }

    /// Serve execute requests
    pub fn register_execute_handler<F, Fut>(&self, f: F)
    where
        F: Fn(MemberId, ExecuteRequest) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<ExecuteResponse>> + Send + 'static,
    {
        self.register(&self.context.execute_subject, f);
    }

    /// Stop serving execute requests
    pub fn unregister_execute_handler(&self) {
        self.transport.unsubscribe(&self.context.execute_subject);
    }

    /// Serve close requests
    pub fn register_close_handler<F, Fut>(&self, f: F)
    where
        F: Fn(MemberId, CloseRequest) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<CloseResponse>> + Send + 'static,
    {
        self.register(&self.context.close_subject, f);
    }

    /// Stop serving close requests
    pub fn unregister_close_handler(&self) {
        self.transport.unsubscribe(&self.context.close_subject);
    }

    /// Serve metadata requests
    pub fn register_metadata_handler<F, Fut>(&self, f: F)
    where
        F: Fn(MemberId, MetadataRequest) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<MetadataResponse>> + Send + 'static,
    {
        self.register(&self.context.metadata_subject, f);
    }

    /// Stop serving metadata requests
    pub fn unregister_metadata_handler(&self) {
        self.transport.unsubscribe(&self.context.metadata_subject);
    }

    /// Receive events for `session`
    pub fn register_event_handler<F, Fut>(&self, session: SessionId, f: F)
    where
        F: Fn(MemberId, BackupEvent) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let f = Arc::new(f);
        self.transport.subscribe(
            &self.context.event_subject(session),
            handler(move |from, frame| {
                let f = f.clone();
                async move {
                    f(from, BackupEvent::decode(&frame)?).await?;
                    Ok::<_, Error>(bytes::Bytes::new())
                }
            }),
        );
    }

    /// Stop receiving events for `session`
    pub fn unregister_event_handler(&self, session: SessionId) {
        self.transport
            .unsubscribe(&self.context.event_subject(session));
    }

    /// Send an execute request to the primary
    pub async fn execute(
        &self,
        member: &MemberId,
        request: ExecuteRequest,
    ) -> Result<ExecuteResponse> {
        self.request(&self.context.execute_subject, member, &request)
            .await
    }

    /// Ask a member to close a primitive
    pub async fn close(&self, member: &MemberId, request: CloseRequest) -> Result<CloseResponse> {
        self.request(&self.context.close_subject, member, &request)
            .await
    }

    /// Query the primitives hosted on a member
    pub async fn metadata(
        &self,
        member: &MemberId,
        request: MetadataRequest,
    ) -> Result<MetadataResponse> {
        self.request(&self.context.metadata_subject, member, &request)
            .await
    }
}

#[async_trait]
impl ServerProtocol for ServerCommunicator {
    async fn backup(&self, member: &MemberId, request: BackupRequest) -> Result<BackupResponse> {
        tracing::trace!(
            "Sending {} operations to {} (last index {})",
            request.operations.len(),
            member,
            request.last_index()
        );
        self.request(&self.context.backup_subject, member, &request)
            .await
    }

    async fn restore(
        &self,
        member: &MemberId,
        request: RestoreRequest,
    ) -> Result<RestoreResponse> {
        self.request(&self.context.restore_subject, member, &request)
            .await
    }

    async fn event(
        &self,
        member: &MemberId,
        session: SessionId,
        event: BackupEvent,
    ) -> Result<()> {
        let frame = event.encode()?;
        self.transport
            .unicast(&self.context.event_subject(session), frame, member)
            .await
    }
}

impl std::fmt::Debug for ServerCommunicator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerCommunicator")
            .field("member", self.local_member())
            .field("prefix", &self.context.prefix())
            .finish()
    }
}
