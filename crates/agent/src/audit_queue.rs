//! Fire-and-forget audit delivery.
//!
//! `emit` never waits: records go into a bounded channel and a background task
//! drains them into the audit repository. When the channel is full the newest
//! record is dropped and counted. Audit loss under sustained pressure is
//! accepted; blocking the dispatch loop on audit I/O is not.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tracing::warn;

use conductor_core::audit::{AuditRecord, AuditSink};
use conductor_db::repositories::AuditRepository;

/// Shared count of audit records that never reached the repository.
#[derive(Clone, Debug, Default)]
pub struct AuditDropCounter(Arc<AtomicU64>);

impl AuditDropCounter {
    pub fn increment(&self) -> u64 {
        self.0.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

pub struct QueuedAuditSink {
    sender: mpsc::Sender<AuditRecord>,
    dropped: AuditDropCounter,
}

impl QueuedAuditSink {
    /// Starts the drain task. It exits once every sink clone is dropped and the
    /// queue is empty.
    pub fn spawn(
        repository: Arc<dyn AuditRepository>,
        capacity: usize,
        dropped: AuditDropCounter,
    ) -> (Self, JoinHandle<()>) {
        let (sender, mut receiver) = mpsc::channel::<AuditRecord>(capacity.max(1));
        let drain_dropped = dropped.clone();

        let handle = tokio::spawn(async move {
            while let Some(record) = receiver.recv().await {
                if let Err(error) = repository.append(record.clone()).await {
                    let total = drain_dropped.increment();
                    warn!(
                        event_name = "audit.write.failed",
                        task_id = %record.task_id,
                        correlation_id = %record.task_id,
                        sequence = record.action_sequence,
                        status = record.status.as_str(),
                        dropped_total = total,
                        error = %error,
                        "audit record could not be written"
                    );
                }
            }
        });

        (Self { sender, dropped }, handle)
    }

    pub fn dropped(&self) -> &AuditDropCounter {
        &self.dropped
    }
}

impl AuditSink for QueuedAuditSink {
    fn emit(&self, record: AuditRecord) {
        let (record, reason) = match self.sender.try_send(record) {
            Ok(()) => return,
            Err(TrySendError::Full(record)) => (record, "queue_full"),
            Err(TrySendError::Closed(record)) => (record, "queue_closed"),
        };

        let total = self.dropped.increment();
        warn!(
            event_name = "audit.queue.dropped",
            task_id = %record.task_id,
            correlation_id = %record.task_id,
            sequence = record.action_sequence,
            status = record.status.as_str(),
            reason,
            dropped_total = total,
            "audit record dropped"
        );
    }
}
