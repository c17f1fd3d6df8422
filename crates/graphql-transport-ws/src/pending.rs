//! Operations registered with the protocol loop, replayed after every ack.

use std::collections::{BTreeMap, HashMap};

use crate::{
    error::{ClientError, ClientResult},
    protocol::SubscribePayload,
    types::OperationId,
};

/// Insertion-ordered set of operations the server should be running.
///
/// Owned by the protocol loop only, so no locking.
#[derive(Debug, Default)]
pub struct PendingOperations {
    index: HashMap<OperationId, u64>,
    entries: BTreeMap<u64, (OperationId, SubscribePayload)>,
    next_seq: u64,
}

impl PendingOperations {
    /// Create an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an operation. A second insert of the same id is a protocol violation.
    pub fn insert(&mut self, id: OperationId, payload: SubscribePayload) -> ClientResult<()> {
        if self.index.contains_key(&id) {
            return Err(ClientError::DuplicateOperation { id });
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        self.index.insert(id.clone(), seq);
        self.entries.insert(seq, (id, payload));
        Ok(())
    }

    /// Remove an operation, returning its payload if it was present.
    pub fn remove(&mut self, id: &OperationId) -> Option<SubscribePayload> {
        let seq = self.index.remove(id)?;
        self.entries.remove(&seq).map(|(_, payload)| payload)
    }

    /// Iterate in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&OperationId, &SubscribePayload)> {
        self.entries.values().map(|(id, payload)| (id, payload))
    }

    /// Number of recorded operations.
    pub fn len(&self) -> usize {
        self.index.len()
    }

    /// Returns true if nothing is recorded.
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }
}
