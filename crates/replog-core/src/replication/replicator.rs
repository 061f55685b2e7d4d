//! Synchronous replicator
//!
//! An operation is complete once every backup has acknowledged it. The
//! replicator keeps one [`BackupQueue`] per backup and one pending completion
//! per operation:
//!
//! ```text
//! replicate(op 7) ──► futures[7]
//!        │
//!        ├──► queue(b1): [.. 7] ──batch──► b1 ──ack 7──┐
//!        └──► queue(b2): [.. 7] ──batch──► b2 ──ack 5──┤
//!                                                      ▼
//!                              commit = min(7, 5) = 5, resolve ..=5
//! ```
//!
//! The replicator is not thread-safe; its owner serializes every call,
//! including the completions of the batches it dispatched.

use crate::error::{Error, Result};
use crate::replication::queue::BackupQueue;
use crate::storage::{Index, Term};
use replog_protocol::{BackupOperation, BackupRequest, BackupResponse, MemberId, PrimitiveDescriptor};
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::oneshot;

/// What the replicator needs from the member it runs on
pub trait ReplicationContext {
    /// This member
    fn member_id(&self) -> &MemberId;

    /// Primitive being replicated
    fn descriptor(&self) -> &PrimitiveDescriptor;

    /// Current primary term
    fn current_term(&self) -> Term;

    /// Commit index of the local log
    fn commit_index(&self) -> Index;

    /// Advance the commit index of the local log
    ///
    /// An error is fatal for the log.
    fn set_commit_index(&mut self, index: Index) -> Result<()>;

    /// Last index of the local log
    fn last_index(&self) -> Index;

    /// Send `request` to `member` asynchronously
    ///
    /// The outcome must come back through
    /// [`SynchronousReplicator::on_backup_complete`].
    fn dispatch(&mut self, member: &MemberId, request: BackupRequest);
}

/// Resolves when the operation at [`CompletionHandle::index`] is committed
#[derive(Debug)]
pub struct CompletionHandle {
    index: Index,
    receiver: oneshot::Receiver<Result<Index>>,
}

impl CompletionHandle {
    fn pending(index: Index) -> (Self, oneshot::Sender<Result<Index>>) {
        let (tx, receiver) = oneshot::channel();
        (Self { index, receiver }, tx)
    }

    fn ready(index: Index, result: Result<Index>) -> Self {
        let (handle, tx) = Self::pending(index);
        let _ = tx.send(result);
        handle
    }

    /// Log index of the operation
    pub fn index(&self) -> Index {
        self.index
    }
}

impl Future for CompletionHandle {
    type Output = Result<Index>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.receiver).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            // Sender dropped without an answer: the primary went away
            Poll::Ready(Err(_)) => Poll::Ready(Err(Error::OwnershipLost)),
            Poll::Pending => Poll::Pending,
        }
    }
}

/// Replication state of one backup
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupStatus {
    /// Backup member
    pub member: MemberId,
    /// Highest acknowledged index
    pub acked_index: Index,
    /// Operations waiting to be sent
    pub queued: usize,
    /// Whether a batch is awaiting its response
    pub in_flight: bool,
    /// Operations behind the primary's last index
    pub lag: u64,
}

/// Snapshot of the replicator
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplicationStatus {
    /// Commit index of the log
    pub commit_index: Index,
    /// Last index of the log
    pub last_index: Index,
    /// Operations awaiting commit
    pub pending: usize,
    /// Per-backup state, ordered by member
    pub backups: Vec<BackupStatus>,
}

/// Replicator that commits an operation once all backups hold it
pub struct SynchronousReplicator<C> {
    context: C,
    backups: Vec<MemberId>,
    queues: HashMap<MemberId, BackupQueue>,
    futures: BTreeMap<Index, oneshot::Sender<Result<Index>>>,
    max_batch_size: usize,
    lag_warning_threshold: u64,
    closed: bool,
}

impl<C: ReplicationContext> SynchronousReplicator<C> {
    /// Create a replicator for the given backups
    pub fn new(
        context: C,
        backups: Vec<MemberId>,
        max_batch_size: usize,
        lag_warning_threshold: u64,
    ) -> Self {
        Self {
            context,
            backups,
            queues: HashMap::new(),
            futures: BTreeMap::new(),
            max_batch_size,
            lag_warning_threshold,
            closed: false,
        }
    }

    /// Replication context
    pub fn context(&self) -> &C {
        &self.context
    }

    /// Mutable replication context
    pub fn context_mut(&mut self) -> &mut C {
        &mut self.context
    }

    /// Current backup set
    pub fn backups(&self) -> &[MemberId] {
        &self.backups
    }

    /// Number of operations awaiting commit
    pub fn pending(&self) -> usize {
        self.futures.len()
    }

    /// Whether [`SynchronousReplicator::close`] was called
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Replicate an operation already written to the local log
    ///
    /// Without backups the operation commits immediately. An error means the
    /// local commit failed and the log is unusable.
    pub fn replicate(&mut self, operation: BackupOperation) -> Result<CompletionHandle> {
        let index = operation.index;
        if self.closed {
            return Ok(CompletionHandle::ready(index, Err(Error::OwnershipLost)));
        }

        if self.backups.is_empty() {
            if index > self.context.commit_index() {
                if let Err(e) = self.context.set_commit_index(index) {
                    return Err(self.fail(e));
                }
            }
            return Ok(CompletionHandle::ready(index, Ok(index)));
        }

        let (handle, tx) = CompletionHandle::pending(index);
        self.futures.insert(index, tx);

        for member in self.backups.clone() {
            let max_batch_size = self.max_batch_size;
            self.queues
                .entry(member.clone())
                .or_insert_with(|| BackupQueue::new(member.clone(), max_batch_size))
                .add(operation.clone());
            self.maybe_backup(&member);
        }

        Ok(handle)
    }

    fn maybe_backup(&mut self, member: &MemberId) {
        let Some(operations) = self.queues.get_mut(member).and_then(|q| q.next_batch()) else {
            return;
        };

        let request = BackupRequest {
            primitive: self.context.descriptor().clone(),
            primary: self.context.member_id().clone(),
            term: self.context.current_term(),
            commit_index: self.context.commit_index(),
            operations,
        };
        tracing::trace!(
            "Sending {} operations to {} (last index {})",
            request.operations.len(),
            member,
            request.last_index()
        );
        self.context.dispatch(member, request);
    }

    /// Handle the outcome of the batch ending at `last_index` sent to `member`
    ///
    /// Transport errors and ERROR responses drop the batch. Outcomes for
    /// members no longer in the backup set, or arriving after close, are
    /// ignored.
    pub fn on_backup_complete(
        &mut self,
        member: &MemberId,
        last_index: Index,
        result: Result<BackupResponse>,
    ) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        let Some(queue) = self.queues.get_mut(member) else {
            tracing::trace!("Ignoring backup response from removed member {}", member);
            return Ok(());
        };

        let acknowledged = match result {
            Ok(response) if response.is_ok() => true,
            Ok(_) => {
                tracing::trace!("Replication to {} failed: error response", member);
                false
            }
            Err(e) => {
                tracing::trace!("Replication to {} failed: {}", member, e);
                false
            }
        };
        queue.complete(last_index, acknowledged);

        if acknowledged {
            self.complete_futures()?;
        }
        self.maybe_backup(member);
        Ok(())
    }

    /// Replace the backup set
    ///
    /// Queues of departed backups are discarded, which may let the commit
    /// index advance.
    pub fn set_backups(&mut self, backups: Vec<MemberId>) -> Result<()> {
        let removed: Vec<MemberId> = self
            .queues
            .keys()
            .filter(|m| !backups.contains(m))
            .cloned()
            .collect();
        for member in &removed {
            self.queues.remove(member);
        }

        tracing::info!(
            "Backup set for {} changed: {:?} (removed {:?})",
            self.context.descriptor().name,
            backups,
            removed
        );
        self.backups = backups;

        if self.closed {
            return Ok(());
        }
        self.complete_futures()
    }

    /// Advance the commit index to the lowest acknowledged index and resolve
    /// every completion up to it
    ///
    /// A configured backup without a queue has acknowledged nothing.
    fn complete_futures(&mut self) -> Result<()> {
        let commit_index = if self.backups.is_empty() {
            self.context.last_index()
        } else {
            self.backups
                .iter()
                .map(|m| self.queues.get(m).map_or(0, BackupQueue::acked_index))
                .min()
                .unwrap_or(0)
        };

        if commit_index <= self.context.commit_index() {
            return Ok(());
        }

        if let Err(e) = self.context.set_commit_index(commit_index) {
            return Err(self.fail(e));
        }

        let rest = self.futures.split_off(&(commit_index + 1));
        let ready = std::mem::replace(&mut self.futures, rest);
        for (index, tx) in ready {
            let _ = tx.send(Ok(index));
        }
        Ok(())
    }

    /// Forget operations after `index` once the local log was truncated
    ///
    /// Their completions fail; queued copies are never sent.
    pub fn truncate(&mut self, index: Index) {
        let dropped = self.futures.split_off(&(index + 1));
        for (dropped_index, tx) in dropped {
            let _ = tx.send(Err(Error::replication(format!(
                "operation {} truncated before commit",
                dropped_index
            ))));
        }
        for queue in self.queues.values_mut() {
            queue.truncate(index);
        }
    }

    /// Fail every pending completion with a storage error and stop
    ///
    /// Returns `cause` for the caller to surface.
    pub fn fail(&mut self, cause: Error) -> Error {
        let message = cause.to_string();
        tracing::error!(
            "Commit failed for {}, failing {} pending operations: {}",
            self.context.descriptor().name,
            self.futures.len(),
            message
        );
        for (_, tx) in std::mem::take(&mut self.futures) {
            let _ = tx.send(Err(Error::storage(message.clone())));
        }
        self.queues.clear();
        self.closed = true;
        cause
    }

    /// Snapshot of the replication state
    ///
    /// Backups lagging by more than the warning threshold are logged.
    pub fn status(&self) -> ReplicationStatus {
        let last_index = self.context.last_index();
        let mut backups: Vec<BackupStatus> = self
            .backups
            .iter()
            .map(|member| {
                let queue = self.queues.get(member);
                let acked_index = queue.map(BackupQueue::acked_index).unwrap_or(0);
                BackupStatus {
                    member: member.clone(),
                    acked_index,
                    queued: queue.map(BackupQueue::pending).unwrap_or(0),
                    in_flight: queue.map(BackupQueue::is_in_progress).unwrap_or(false),
                    lag: last_index.saturating_sub(acked_index),
                }
            })
            .collect();
        backups.sort_by(|a, b| a.member.cmp(&b.member));

        for backup in &backups {
            if backup.lag > self.lag_warning_threshold {
                tracing::warn!(
                    "Backup {} lag warning: {} operations behind",
                    backup.member,
                    backup.lag
                );
            }
        }

        ReplicationStatus {
            commit_index: self.context.commit_index(),
            last_index,
            pending: self.futures.len(),
            backups,
        }
    }

    /// Fail every pending completion with [`Error::OwnershipLost`]
    ///
    /// Batches already in flight are not cancelled; their outcomes are
    /// ignored.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        let pending = std::mem::take(&mut self.futures);
        if !pending.is_empty() {
            tracing::info!(
                "Replicator for {} closed with {} pending operations",
                self.context.descriptor().name,
                pending.len()
            );
        }
        for (_, tx) in pending {
            let _ = tx.send(Err(Error::OwnershipLost));
        }
        self.queues.clear();
    }
}

impl<C> std::fmt::Debug for SynchronousReplicator<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SynchronousReplicator")
            .field("backups", &self.backups)
            .field("pending", &self.futures.len())
            .field("closed", &self.closed)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use futures::FutureExt;
    use proptest::prelude::*;

    struct MockContext {
        member: MemberId,
        descriptor: PrimitiveDescriptor,
        commit_index: Index,
        last_index: Index,
        fail_commit: bool,
        dispatched: Vec<(MemberId, BackupRequest)>,
    }

    impl MockContext {
        fn new() -> Self {
            Self {
                member: MemberId::from("primary"),
                descriptor: PrimitiveDescriptor::new("test", "log"),
                commit_index: 0,
                last_index: 0,
                fail_commit: false,
                dispatched: Vec::new(),
            }
        }

        fn take_dispatched(&mut self) -> Vec<(MemberId, BackupRequest)> {
            std::mem::take(&mut self.dispatched)
        }
    }

    impl ReplicationContext for MockContext {
        fn member_id(&self) -> &MemberId {
            &self.member
        }

        fn descriptor(&self) -> &PrimitiveDescriptor {
            &self.descriptor
        }

        fn current_term(&self) -> Term {
            1
        }

        fn commit_index(&self) -> Index {
            self.commit_index
        }

        fn set_commit_index(&mut self, index: Index) -> Result<()> {
            if self.fail_commit {
                return Err(Error::storage("disk gone"));
            }
            self.commit_index = index;
            Ok(())
        }

        fn last_index(&self) -> Index {
            self.last_index
        }

        fn dispatch(&mut self, member: &MemberId, request: BackupRequest) {
            self.dispatched.push((member.clone(), request));
        }
    }

    fn members(names: &[&str]) -> Vec<MemberId> {
        names.iter().map(|n| MemberId::from(*n)).collect()
    }

    fn replicator(backups: &[&str]) -> SynchronousReplicator<MockContext> {
        SynchronousReplicator::new(MockContext::new(), members(backups), 100, 10_000)
    }

    fn replicate(r: &mut SynchronousReplicator<MockContext>, index: Index) -> CompletionHandle {
        r.context_mut().last_index = index;
        r.replicate(BackupOperation {
            index,
            term: 1,
            primary: MemberId::from("primary"),
            primitive: "test".to_string(),
            payload: Bytes::from(vec![index as u8]),
        })
        .unwrap()
    }

    fn resolved(handle: &mut CompletionHandle) -> Option<Result<Index>> {
        handle.now_or_never()
    }

    #[test]
    fn test_no_backups_resolves_immediately() {
        let mut r = replicator(&[]);
        let mut handle = replicate(&mut r, 1);
        assert_eq!(resolved(&mut handle).unwrap().unwrap(), 1);
        assert!(r.context().dispatched.is_empty());
        assert_eq!(r.context().commit_index, 1);
        assert_eq!(r.pending(), 0);
    }

    #[test]
    fn test_commit_waits_for_slowest_backup() {
        let mut r = replicator(&["a", "b"]);
        let mut h1 = replicate(&mut r, 1);
        let mut h2 = replicate(&mut r, 2);
        let mut h3 = replicate(&mut r, 3);

        // First op goes out immediately, 2 and 3 wait behind it
        let sent = r.context_mut().take_dispatched();
        assert_eq!(sent.len(), 2);
        assert!(sent.iter().all(|(_, req)| req.last_index() == 1));

        let a = MemberId::from("a");
        let b = MemberId::from("b");

        r.on_backup_complete(&a, 1, Ok(BackupResponse::ok())).unwrap();
        let sent = r.context_mut().take_dispatched();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].1.operations.len(), 2);
        r.on_backup_complete(&a, 3, Ok(BackupResponse::ok())).unwrap();

        // a acked 3, b nothing yet
        assert!(resolved(&mut h1).is_none());

        r.on_backup_complete(&b, 1, Ok(BackupResponse::ok())).unwrap();
        assert_eq!(r.context().commit_index, 1);
        assert_eq!(resolved(&mut h1).unwrap().unwrap(), 1);
        assert!(resolved(&mut h2).is_none());
        assert!(resolved(&mut h3).is_none());

        r.on_backup_complete(&b, 3, Ok(BackupResponse::ok())).unwrap();
        assert_eq!(r.context().commit_index, 3);
        assert_eq!(resolved(&mut h2).unwrap().unwrap(), 2);
        assert_eq!(resolved(&mut h3).unwrap().unwrap(), 3);
    }

    #[test]
    fn test_request_carries_primary_state() {
        let mut r = replicator(&["a"]);
        r.context_mut().commit_index = 0;
        let _h = replicate(&mut r, 1);
        let (member, request) = r.context_mut().take_dispatched().remove(0);
        assert_eq!(member.as_str(), "a");
        assert_eq!(request.primary.as_str(), "primary");
        assert_eq!(request.primitive.name, "test");
        assert_eq!(request.term, 1);
        assert_eq!(request.commit_index, 0);
        assert_eq!(request.operations[0].payload, Bytes::from(vec![1u8]));
    }

    #[test]
    fn test_failed_batch_is_not_retried() {
        let mut r = replicator(&["a"]);
        let a = MemberId::from("a");
        let mut h1 = replicate(&mut r, 1);
        let mut h2 = replicate(&mut r, 2);
        r.context_mut().take_dispatched();

        r.on_backup_complete(&a, 1, Err(Error::transport("timeout")))
            .unwrap();
        let sent = r.context_mut().take_dispatched();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].1.operations[0].index, 2);

        r.on_backup_complete(&a, 2, Ok(BackupResponse::error()))
            .unwrap();
        assert!(r.context_mut().take_dispatched().is_empty());
        assert_eq!(r.context().commit_index, 0);
        assert!(resolved(&mut h1).is_none());
        assert!(resolved(&mut h2).is_none());
    }

    #[test]
    fn test_close_fails_pending_with_ownership_lost() {
        let mut r = replicator(&["a"]);
        let mut h1 = replicate(&mut r, 1);
        let mut h2 = replicate(&mut r, 2);
        r.close();

        assert!(matches!(resolved(&mut h1), Some(Err(Error::OwnershipLost))));
        assert!(matches!(resolved(&mut h2), Some(Err(Error::OwnershipLost))));

        // Late completion is ignored
        r.on_backup_complete(&MemberId::from("a"), 1, Ok(BackupResponse::ok()))
            .unwrap();
        assert_eq!(r.context().commit_index, 0);

        let mut late = replicate(&mut r, 3);
        assert!(matches!(resolved(&mut late), Some(Err(Error::OwnershipLost))));
    }

    #[test]
    fn test_removing_slow_backup_unblocks_commit() {
        let mut r = replicator(&["a", "b"]);
        let mut h1 = replicate(&mut r, 1);
        r.on_backup_complete(&MemberId::from("a"), 1, Ok(BackupResponse::ok()))
            .unwrap();
        assert!(resolved(&mut h1).is_none());

        r.set_backups(members(&["a"])).unwrap();
        assert_eq!(resolved(&mut h1).unwrap().unwrap(), 1);

        // Response from the removed backup is ignored
        r.on_backup_complete(&MemberId::from("b"), 1, Ok(BackupResponse::ok()))
            .unwrap();
    }

    #[test]
    fn test_removing_all_backups_resolves_everything() {
        let mut r = replicator(&["a"]);
        let mut h1 = replicate(&mut r, 1);
        let mut h2 = replicate(&mut r, 2);

        r.set_backups(Vec::new()).unwrap();
        assert_eq!(resolved(&mut h1).unwrap().unwrap(), 1);
        assert_eq!(resolved(&mut h2).unwrap().unwrap(), 2);
        assert_eq!(r.context().commit_index, 2);
    }

    #[test]
    fn test_commit_failure_fails_everything() {
        let mut r = replicator(&["a"]);
        let mut h1 = replicate(&mut r, 1);
        let mut h2 = replicate(&mut r, 2);
        r.context_mut().fail_commit = true;

        let err = r
            .on_backup_complete(&MemberId::from("a"), 1, Ok(BackupResponse::ok()))
            .unwrap_err();
        assert!(matches!(err, Error::Storage(_)));
        assert!(matches!(resolved(&mut h1), Some(Err(Error::Storage(_)))));
        assert!(matches!(resolved(&mut h2), Some(Err(Error::Storage(_)))));
        assert!(r.is_closed());
    }

    #[test]
    fn test_truncate_fails_dropped_operations() {
        let mut r = replicator(&["a"]);
        let a = MemberId::from("a");
        let mut h1 = replicate(&mut r, 1);
        let mut h2 = replicate(&mut r, 2);
        r.context_mut().take_dispatched();

        r.context_mut().last_index = 1;
        r.truncate(1);
        assert!(matches!(resolved(&mut h2), Some(Err(Error::Replication(_)))));

        // The batch in flight held only operation 1, which survived
        r.on_backup_complete(&a, 1, Ok(BackupResponse::ok())).unwrap();
        assert!(r.context_mut().take_dispatched().is_empty());
        assert_eq!(resolved(&mut h1).unwrap().unwrap(), 1);

        let mut h2 = replicate(&mut r, 2);
        r.on_backup_complete(&a, 2, Ok(BackupResponse::ok())).unwrap();
        assert_eq!(resolved(&mut h2).unwrap().unwrap(), 2);
        assert_eq!(r.context().commit_index, 2);
    }

    #[test]
    fn test_truncate_at_last_index_keeps_in_flight_ack() {
        let mut r = replicator(&["a"]);
        let mut h1 = replicate(&mut r, 1);

        r.truncate(1);
        r.on_backup_complete(&MemberId::from("a"), 1, Ok(BackupResponse::ok()))
            .unwrap();
        assert_eq!(r.context().commit_index, 1);
        assert_eq!(resolved(&mut h1).unwrap().unwrap(), 1);
    }

    #[test]
    fn test_truncate_inside_in_flight_batch_counts_surviving_prefix() {
        let mut r = replicator(&["a"]);
        let a = MemberId::from("a");
        let mut h1 = replicate(&mut r, 1);
        let mut h2 = replicate(&mut r, 2);
        let mut h3 = replicate(&mut r, 3);
        r.on_backup_complete(&a, 1, Ok(BackupResponse::ok())).unwrap();
        assert_eq!(resolved(&mut h1).unwrap().unwrap(), 1);

        // Batch [2, 3] is now in flight
        let dispatched = r.context_mut().take_dispatched();
        assert_eq!(dispatched.last().unwrap().1.last_index(), 3);

        r.context_mut().last_index = 2;
        r.truncate(2);
        assert!(matches!(resolved(&mut h3), Some(Err(Error::Replication(_)))));

        r.on_backup_complete(&a, 3, Ok(BackupResponse::ok())).unwrap();
        assert_eq!(r.context().commit_index, 2);
        assert_eq!(resolved(&mut h2).unwrap().unwrap(), 2);
    }

    #[test]
    fn test_replaced_backup_without_acks_blocks_commit() {
        let mut r = replicator(&["a"]);
        let mut h1 = replicate(&mut r, 1);

        r.set_backups(members(&["c"])).unwrap();
        assert_eq!(r.context().commit_index, 0);
        assert!(resolved(&mut h1).is_none());

        // A late response from the departed backup does not count either
        r.on_backup_complete(&MemberId::from("a"), 1, Ok(BackupResponse::ok()))
            .unwrap();
        assert_eq!(r.context().commit_index, 0);
        assert!(resolved(&mut h1).is_none());
    }

    #[test]
    fn test_status_reports_lag() {
        let mut r = SynchronousReplicator::new(MockContext::new(), members(&["b", "a"]), 100, 1);
        for i in 1..=3 {
            replicate(&mut r, i);
        }
        r.on_backup_complete(&MemberId::from("a"), 1, Ok(BackupResponse::ok()))
            .unwrap();

        let status = r.status();
        assert_eq!(status.last_index, 3);
        assert_eq!(status.pending, 3);
        assert_eq!(status.backups[0].member.as_str(), "a");
        assert_eq!(status.backups[0].acked_index, 1);
        assert_eq!(status.backups[0].lag, 2);
        assert!(status.backups[0].in_flight);
        assert_eq!(status.backups[1].queued, 2);
        assert_eq!(status.backups[1].lag, 3);
    }

    #[test]
    fn test_dropped_replicator_reports_ownership_lost() {
        let mut r = replicator(&["a"]);
        let handle = replicate(&mut r, 1);
        drop(r);
        let result = futures::executor::block_on(handle);
        assert!(matches!(result, Err(Error::OwnershipLost)));
    }

    proptest! {
        #[test]
        fn prop_commit_is_min_of_acks(
            count in 1u64..40,
            steps in prop::collection::vec((0usize..3, any::<bool>()), 1..120),
        ) {
            let names = ["a", "b", "c"];
            let mut r = SynchronousReplicator::new(MockContext::new(), members(&names), 4, 10_000);
            let mut handles: Vec<CompletionHandle> =
                (1..=count).map(|i| replicate(&mut r, i)).collect();

            let mut in_flight: HashMap<MemberId, Index> = HashMap::new();
            let mut acked: HashMap<MemberId, Index> = HashMap::new();
            let mut resolved_upto: Index = 0;

            for (who, ok) in steps {
                for (member, request) in r.context_mut().take_dispatched() {
                    in_flight.insert(member, request.last_index());
                }

                let member = MemberId::from(names[who]);
                let Some(last) = in_flight.remove(&member) else { continue };
                let response = if ok { BackupResponse::ok() } else { BackupResponse::error() };
                r.on_backup_complete(&member, last, Ok(response)).unwrap();
                if ok {
                    acked.insert(member, last);
                }

                let expected = names
                    .iter()
                    .map(|n| acked.get(&MemberId::from(*n)).copied().unwrap_or(0))
                    .min()
                    .unwrap_or(0);
                prop_assert_eq!(r.context().commit_index, expected);
                prop_assert!(expected >= resolved_upto);

                for handle in handles.iter_mut() {
                    let index = handle.index();
                    if index <= resolved_upto {
                        continue;
                    }
                    match resolved(handle) {
                        Some(result) => {
                            prop_assert!(index <= expected);
                            prop_assert_eq!(result.unwrap(), index);
                        }
                        None => prop_assert!(index > expected),
                    }
                }
                resolved_upto = expected;
            }
        }
    }
}
