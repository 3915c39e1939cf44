use crate::action::Action;
use serde::{Deserialize, Serialize};

/// Actions captured by one flush, tagged with the id the storage assigned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Batch {
    pub server_id: String,
    pub batch_id: u64,
    pub batch: Vec<Action>,
}

impl Batch {
    pub fn new(server_id: impl Into<String>, batch_id: u64, actions: Vec<Action>) -> Self {
        Self {
            server_id: server_id.into(),
            batch_id,
            batch: actions,
        }
    }

    pub fn len(&self) -> usize {
        self.batch.len()
    }

    pub fn is_empty(&self) -> bool {
        self.batch.is_empty()
    }
}

/// Encoded bytes of a [`Batch`]; the unit that is stored, uploaded and counted against capacity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinaryBatch {
    batch_id: u64,
    bytes: Vec<u8>,
}

impl BinaryBatch {
    pub fn new(batch_id: u64, bytes: Vec<u8>) -> Self {
        Self { batch_id, bytes }
    }

    pub fn batch_id(&self) -> u64 {
        self.batch_id
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}
