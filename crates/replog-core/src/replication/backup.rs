//! Backup side of a replicated log
//!
//! A [`BackupRole`] owns the writer of its local log and applies the batches
//! a primary ships to it. Entries keep the index and term the primary gave
//! them, so a backup's log is a prefix-identical copy of the primary's.

use crate::error::{Error, Result};
use crate::replication::snapshot::CommittedLog;
use crate::storage::{Entry, Index, Indexed, LogWriter, SegmentedLog, Term};
use crate::transport::{ServerCommunicator, ServerProtocol};
use parking_lot::Mutex;
use replog_protocol::{
    BackupRequest, BackupResponse, MemberId, PrimitiveDescriptor, ResponseStatus, RestoreRequest,
    RestoreResponse,
};
use std::sync::Arc;

struct BackupState {
    writer: LogWriter,
    term: Term,
    primary: Option<MemberId>,
}

/// Applies backup requests to a local log
#[derive(Clone)]
pub struct BackupRole {
    descriptor: PrimitiveDescriptor,
    log: Arc<SegmentedLog>,
    state: Arc<Mutex<BackupState>>,
}

impl BackupRole {
    /// Take the writer role on `log` for `descriptor`
    pub fn new(descriptor: PrimitiveDescriptor, log: Arc<SegmentedLog>) -> Result<Self> {
        let writer = log.writer()?;
        Ok(Self {
            descriptor,
            log,
            state: Arc::new(Mutex::new(BackupState {
                writer,
                term: 0,
                primary: None,
            })),
        })
    }

    /// Underlying log
    pub fn log(&self) -> &Arc<SegmentedLog> {
        &self.log
    }

    /// Highest primary term seen
    pub fn term(&self) -> Term {
        self.state.lock().term
    }

    /// Primary of the highest term seen
    pub fn primary(&self) -> Option<MemberId> {
        self.state.lock().primary.clone()
    }

    /// Serve backup requests arriving through `communicator`
    pub fn register(&self, communicator: &ServerCommunicator) {
        let role = self.clone();
        communicator.register_backup_handler(move |from, request| {
            let role = role.clone();
            async move { Ok(role.handle(&from, request)) }
        });
    }

    /// Stop serving backup requests
    pub fn unregister(&self, communicator: &ServerCommunicator) {
        communicator.unregister_backup_handler();
    }

    /// Apply one request
    pub fn handle(&self, from: &MemberId, request: BackupRequest) -> BackupResponse {
        if request.primitive != self.descriptor {
            tracing::warn!(
                "Backup request from {} for unknown primitive {}",
                from,
                request.primitive.name
            );
            return BackupResponse::error();
        }

        let mut state = self.state.lock();
        if request.term < state.term {
            tracing::debug!(
                "Rejecting backup from {}: term {} is older than {}",
                from,
                request.term,
                state.term
            );
            return BackupResponse::error();
        }
        if request.term > state.term || state.primary.is_none() {
            tracing::info!(
                "Backup of {} following primary {} in term {}",
                self.descriptor.name,
                request.primary,
                request.term
            );
            state.term = request.term;
            state.primary = Some(request.primary.clone());
        }

        for operation in request.operations {
            let entry = Entry::new(operation.term, operation.payload);
            if let Err(reason) = self.apply(&mut state.writer, operation.index, entry) {
                tracing::debug!("Backup of {} rejected batch: {}", self.descriptor.name, reason);
                return BackupResponse::error();
            }
        }

        let commit_index = request.commit_index.min(state.writer.last_index());
        if let Err(e) = state.writer.commit(commit_index) {
            tracing::error!("Backup of {} failed to commit: {}", self.descriptor.name, e);
            return BackupResponse::error();
        }

        BackupResponse::ok()
    }

    fn apply(&self, writer: &mut LogWriter, index: Index, entry: Entry) -> std::result::Result<(), String> {
        if index <= writer.last_index() {
            match self.log.get(index) {
                // Already stored (a retransmission or an overlapping batch)
                Some(existing) if *existing.entry() == entry => return Ok(()),
                Some(existing) => {
                    tracing::info!(
                        "Backup of {}: entry {} (term {}) differs from the primary's (term {}); truncating",
                        self.descriptor.name,
                        index,
                        existing.term(),
                        entry.term
                    );
                    writer.truncate(index - 1).map_err(|e| e.to_string())?;
                }
                // Compacted away, hence committed
                None => return Ok(()),
            }
        }

        let expected = writer.next_index();
        if index != expected {
            return Err(format!("gap: expected index {}, got {}", expected, index));
        }

        writer
            .append_indexed(Indexed::new(index, entry, 0))
            .map(|_| ())
            .map_err(|e| e.to_string())
    }

    /// Bring the local log up to the primary's committed state
    ///
    /// Used after the backup fell behind, e.g. while it was unreachable and
    /// its batches were dropped. Returns the commit index reached.
    pub async fn resync(&self, protocol: &dyn ServerProtocol, primary: &MemberId) -> Result<Index> {
        let request = RestoreRequest {
            primitive: self.descriptor.clone(),
            term: self.term(),
        };
        let response = protocol.restore(primary, request).await?;
        self.restore(response)
    }

    /// Apply a restore response
    ///
    /// Entries the local log lacks are appended, diverging ones replaced. A
    /// log that ends before the first restored entry starts over at it.
    pub fn restore(&self, response: RestoreResponse) -> Result<Index> {
        if response.status != ResponseStatus::Ok {
            return Err(Error::replication(format!(
                "Restore of {} refused by the primary",
                self.descriptor.name
            )));
        }
        let committed = CommittedLog::decode(&response.data)?;
        if committed.last_index() != response.index {
            return Err(Error::replication(format!(
                "Restore of {}: data ends at {}, commit index is {}",
                self.descriptor.name,
                committed.last_index(),
                response.index
            )));
        }

        let mut state = self.state.lock();
        if !committed.entries.is_empty() && state.writer.next_index() < committed.first_index {
            state.writer.reset(committed.first_index)?;
        }

        for (index, entry) in committed.iter() {
            if index <= state.writer.commit_index() {
                continue;
            }
            self.apply(&mut state.writer, index, entry.clone())
                .map_err(|reason| Error::replication(format!("Restore failed: {}", reason)))?;
        }
        state.writer.commit(response.index)?;

        tracing::info!(
            "Backup of {} restored to commit index {} (snapshot taken at {} ms)",
            self.descriptor.name,
            response.index,
            response.timestamp
        );
        Ok(state.writer.commit_index())
    }

    /// Last index of the local log
    pub fn last_index(&self) -> Index {
        self.state.lock().writer.last_index()
    }

    /// Commit index of the local log
    pub fn commit_index(&self) -> Index {
        self.log.commit_index()
    }
}

impl std::fmt::Debug for BackupRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackupRole")
            .field("primitive", &self.descriptor.name)
            .field("last_index", &self.last_index())
            .field("commit_index", &self.commit_index())
            .finish()
    }
}
