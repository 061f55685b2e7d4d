//! Primary side of a replicated log
//!
//! [`ReplicatedLog`] is a cheap handle to an actor task that owns the log
//! writer and the [`SynchronousReplicator`]. Every mutation, including the
//! outcome of each backup request, goes through the actor's mailbox, so log
//! and replication state are only ever touched from one task.
//!
//! ```text
//! append ──► mailbox ──► actor: writer.append, replicator.replicate
//!                          │
//!                          └─ spawn: protocol.backup(member, batch)
//!                                     │
//!            mailbox ◄── BackupComplete
//! ```

use crate::error::{Error, Result};
use crate::replication::config::ReplicationConfig;
use crate::replication::snapshot::CommittedLog;
use crate::replication::replicator::{
    CompletionHandle, ReplicationContext, ReplicationStatus, SynchronousReplicator,
};
use crate::storage::{Entry, Index, LogReader, LogWriter, ReadMode, SegmentedLog, Term};
use crate::transport::{ServerCommunicator, ServerProtocol};
use bytes::Bytes;
use replog_protocol::{
    BackupOperation, BackupRequest, BackupResponse, CloseResponse, ExecuteResponse, MemberId,
    MetadataResponse, PrimitiveDescriptor, ResponseStatus, RestoreRequest, RestoreResponse,
};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

/// Result of an append: the assigned index and its commit completion
#[derive(Debug)]
pub struct Appended {
    /// Index assigned to the entry
    pub index: Index,
    /// Resolves once every backup holds the entry
    pub completion: CompletionHandle,
}

enum Command {
    Append {
        payload: Bytes,
        reply: oneshot::Sender<Result<Appended>>,
    },
    BackupComplete {
        member: MemberId,
        last_index: Index,
        result: Result<BackupResponse>,
    },
    SetBackups {
        backups: Vec<MemberId>,
        reply: oneshot::Sender<Result<()>>,
    },
    Truncate {
        index: Index,
        reply: oneshot::Sender<Result<()>>,
    },
    Status {
        reply: oneshot::Sender<ReplicationStatus>,
    },
    Close {
        reply: oneshot::Sender<()>,
    },
}

/// Replication context of the primary: the log writer plus the path back
/// into the actor's mailbox
struct PrimaryContext {
    member_id: MemberId,
    descriptor: PrimitiveDescriptor,
    term: Term,
    writer: LogWriter,
    protocol: Arc<dyn ServerProtocol>,
    mailbox: mpsc::WeakUnboundedSender<Command>,
}

impl ReplicationContext for PrimaryContext {
    fn member_id(&self) -> &MemberId {
        &self.member_id
    }

    fn descriptor(&self) -> &PrimitiveDescriptor {
        &self.descriptor
    }

    fn current_term(&self) -> Term {
        self.term
    }

    fn commit_index(&self) -> Index {
        self.writer.commit_index()
    }

    fn set_commit_index(&mut self, index: Index) -> Result<()> {
        self.writer.commit(index)
    }

    fn last_index(&self) -> Index {
        self.writer.last_index()
    }

    fn dispatch(&mut self, member: &MemberId, request: BackupRequest) {
        let protocol = self.protocol.clone();
        let mailbox = self.mailbox.clone();
        let member = member.clone();
        let last_index = request.last_index();

        tokio::spawn(async move {
            let result = protocol.backup(&member, request).await;
            // The actor is gone once every handle is dropped
            if let Some(mailbox) = mailbox.upgrade() {
                let _ = mailbox.send(Command::BackupComplete {
                    member,
                    last_index,
                    result,
                });
            }
        });
    }
}

struct PrimaryActor {
    replicator: SynchronousReplicator<PrimaryContext>,
    mailbox: mpsc::UnboundedReceiver<Command>,
    stopped: bool,
}

impl PrimaryActor {
    async fn run(mut self) {
        while let Some(command) = self.mailbox.recv().await {
            if !self.handle(command) {
                break;
            }
        }
        self.shutdown();
    }

    /// Returns false once the actor must stop
    fn handle(&mut self, command: Command) -> bool {
        match command {
            Command::Append { payload, reply } => {
                let (result, keep_running) = self.append(payload);
                let _ = reply.send(result);
                keep_running
            }
            Command::BackupComplete {
                member,
                last_index,
                result,
            } => match self
                .replicator
                .on_backup_complete(&member, last_index, result)
            {
                Ok(()) => true,
                Err(e) => {
                    tracing::error!("Stopping replicated log: {}", e);
                    false
                }
            },
            Command::SetBackups { backups, reply } => {
                let result = self.replicator.set_backups(backups);
                let keep_running = result.is_ok();
                let _ = reply.send(result);
                keep_running
            }
            Command::Truncate { index, reply } => {
                let result = self.truncate(index);
                let _ = reply.send(result);
                true
            }
            Command::Status { reply } => {
                let _ = reply.send(self.replicator.status());
                true
            }
            Command::Close { reply } => {
                self.shutdown();
                let _ = reply.send(());
                false
            }
        }
    }

    fn append(&mut self, payload: Bytes) -> (Result<Appended>, bool) {
        if self.replicator.is_closed() {
            return (Err(Error::OwnershipLost), false);
        }

        let context = self.replicator.context_mut();
        let term = context.term;
        let indexed = match context.writer.append(Entry::new(term, payload)) {
            Ok(indexed) => indexed,
            Err(e) if e.is_fatal() => {
                tracing::error!("Append failed, stopping replicated log: {}", e);
                return (Err(self.replicator.fail(e)), false);
            }
            Err(e) => return (Err(e), true),
        };

        let operation = BackupOperation {
            index: indexed.index(),
            term,
            primary: context.member_id.clone(),
            primitive: context.descriptor.name.clone(),
            payload: indexed.into_entry().payload,
        };
        let index = operation.index;

        match self.replicator.replicate(operation) {
            Ok(completion) => (Ok(Appended { index, completion }), true),
            Err(e) => (Err(e), false),
        }
    }

    fn truncate(&mut self, index: Index) -> Result<()> {
        self.replicator.context_mut().writer.truncate(index)?;
        self.replicator.truncate(index);
        Ok(())
    }

    fn shutdown(&mut self) {
        if std::mem::replace(&mut self.stopped, true) {
            return;
        }
        self.replicator.close();
        self.mailbox.close();
        if let Err(e) = self.replicator.context_mut().writer.flush() {
            tracing::error!("Failed to flush log on shutdown: {}", e);
        }
        tracing::info!(
            "Replicated log {} stopped at index {} (commit {})",
            self.replicator.context().descriptor.name,
            self.replicator.context().last_index(),
            self.replicator.context().commit_index()
        );
    }
}

/// Handle to the primary of a replicated log
///
/// Clones share the same actor. The actor stops when [`ReplicatedLog::close`]
/// is called, after a fatal storage error, or once every handle is dropped.
#[derive(Clone)]
pub struct ReplicatedLog {
    config: Arc<ReplicationConfig>,
    log: Arc<SegmentedLog>,
    mailbox: mpsc::UnboundedSender<Command>,
}

impl ReplicatedLog {
    /// Take the writer role on `log` and start replicating through `protocol`
    ///
    /// Must be called inside a tokio runtime.
    pub fn start(
        config: ReplicationConfig,
        log: Arc<SegmentedLog>,
        protocol: Arc<dyn ServerProtocol>,
    ) -> Result<Self> {
        config.validate().map_err(Error::config)?;
        let writer = log.writer()?;

        let (tx, rx) = mpsc::unbounded_channel();
        let context = PrimaryContext {
            member_id: config.member_id.clone(),
            descriptor: config.primitive.clone(),
            term: config.term,
            writer,
            protocol,
            mailbox: tx.downgrade(),
        };
        let replicator = SynchronousReplicator::new(
            context,
            config.backups.clone(),
            config.max_batch_size,
            config.lag_warning_threshold,
        );

        tracing::info!(
            "Starting primary {} for {} (term {}, backups {:?})",
            config.member_id,
            config.primitive.name,
            config.term,
            config.backups
        );

        tokio::spawn(
            PrimaryActor {
                replicator,
                mailbox: rx,
                stopped: false,
            }
            .run(),
        );

        Ok(Self {
            config: Arc::new(config),
            log,
            mailbox: tx,
        })
    }

    /// Replication configuration
    pub fn config(&self) -> &ReplicationConfig {
        &self.config
    }

    /// Underlying log
    pub fn log(&self) -> &Arc<SegmentedLog> {
        &self.log
    }

    /// Open a reader on the log
    pub fn reader(&self, index: Index, mode: ReadMode) -> LogReader {
        self.log.reader(index, mode)
    }

    /// Commit index of the log
    pub fn commit_index(&self) -> Index {
        self.log.commit_index()
    }

    async fn call<T>(&self, command: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.mailbox
            .send(command(tx))
            .map_err(|_| Error::closed(format!("replicated log {}", self.config.primitive.name)))?;
        rx.await
            .map_err(|_| Error::closed(format!("replicated log {}", self.config.primitive.name)))
    }

    /// Append a payload and start replicating it
    pub async fn append(&self, payload: impl Into<Bytes>) -> Result<Appended> {
        let payload = payload.into();
        self.call(|reply| Command::Append { payload, reply })
            .await?
    }

    /// Append a payload and wait until every backup holds it
    pub async fn append_and_commit(&self, payload: impl Into<Bytes>) -> Result<Index> {
        self.append(payload).await?.completion.await
    }

    /// Remove uncommitted entries after `index`
    ///
    /// Pending completions above `index` fail.
    pub async fn truncate(&self, index: Index) -> Result<()> {
        self.call(|reply| Command::Truncate { index, reply })
            .await?
    }

    /// Replace the backup set
    pub async fn set_backups<I, M>(&self, backups: I) -> Result<()>
    where
        I: IntoIterator<Item = M>,
        M: Into<MemberId>,
    {
        let backups = backups.into_iter().map(Into::into).collect();
        self.call(|reply| Command::SetBackups { backups, reply })
            .await?
    }

    /// Snapshot of the replication state
    pub async fn status(&self) -> Result<ReplicationStatus> {
        self.call(|reply| Command::Status { reply }).await
    }

    /// Delete whole committed segments before `index`
    pub fn compact(&self, index: Index) -> usize {
        self.log.compact(index)
    }

    /// Stop the primary; pending completions fail with
    /// [`Error::OwnershipLost`]
    pub async fn close(&self) -> Result<()> {
        match self.call(|reply| Command::Close { reply }).await {
            Ok(()) | Err(Error::Closed(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Answer a restore request with every retained committed entry
    ///
    /// Requests for another primitive, or from a member that has seen a
    /// newer term than this primary's, are refused.
    pub fn restore(&self, from: &MemberId, request: &RestoreRequest) -> Result<RestoreResponse> {
        if request.primitive != self.config.primitive || request.term > self.config.term {
            tracing::debug!(
                "Refusing restore of {} for {} (term {}, primary term {})",
                request.primitive.name,
                from,
                request.term,
                self.config.term
            );
            return Ok(RestoreResponse {
                status: ResponseStatus::Error,
                index: 0,
                timestamp: 0,
                data: Bytes::new(),
            });
        }

        let committed = CommittedLog::read(&self.log, self.commit_index())?;
        tracing::debug!(
            "Restoring {} for {}: entries {}..={}",
            self.config.primitive.name,
            from,
            committed.first_index,
            committed.last_index()
        );
        let timestamp = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map_or(0, |d| d.as_millis() as u64);
        Ok(RestoreResponse {
            status: ResponseStatus::Ok,
            index: committed.last_index(),
            timestamp,
            data: committed.encode()?,
        })
    }

    /// Serve execute, close, metadata and restore requests for this primitive
    ///
    /// An execute request appends its operation and answers once it is
    /// committed, with the index as little-endian bytes.
    pub fn serve(&self, communicator: &ServerCommunicator) {
        let primary = self.clone();
        communicator.register_execute_handler(move |_from, request| {
            let primary = primary.clone();
            async move {
                let response = match primary.append_and_commit(request.operation).await {
                    Ok(index) => ExecuteResponse {
                        status: ResponseStatus::Ok,
                        result: Bytes::copy_from_slice(&index.to_le_bytes()),
                    },
                    Err(e) => {
                        tracing::debug!("Execute for session {} failed: {}", request.session, e);
                        ExecuteResponse {
                            status: ResponseStatus::Error,
                            result: Bytes::new(),
                        }
                    }
                };
                Ok(response)
            }
        });

        let primary = self.clone();
        communicator.register_close_handler(move |from, request| {
            let primary = primary.clone();
            async move {
                if request.primitive != primary.config.primitive {
                    return Ok(CloseResponse {
                        status: ResponseStatus::Error,
                    });
                }
                tracing::info!("Close of {} requested by {}", request.primitive.name, from);
                primary.close().await?;
                Ok::<_, Error>(CloseResponse {
                    status: ResponseStatus::Ok,
                })
            }
        });

        let primary = self.clone();
        communicator.register_restore_handler(move |from, request| {
            let primary = primary.clone();
            async move { primary.restore(&from, &request) }
        });

        let descriptor = self.config.primitive.clone();
        communicator.register_metadata_handler(move |_from, request| {
            let descriptor = descriptor.clone();
            async move {
                let matches = request
                    .primitive_type
                    .as_deref()
                    .is_none_or(|t| t == descriptor.primitive_type);
                Ok(MetadataResponse {
                    status: ResponseStatus::Ok,
                    primitive_names: if matches {
                        vec![descriptor.name]
                    } else {
                        Vec::new()
                    },
                })
            }
        });
    }
}

impl std::fmt::Debug for ReplicatedLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplicatedLog")
            .field("member", &self.config.member_id)
            .field("primitive", &self.config.primitive.name)
            .field("commit_index", &self.commit_index())
            .finish()
    }
}
