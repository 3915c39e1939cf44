//! Batch wire format: JSON compressed with raw DEFLATE.
//!
//! Two JSON shapes exist. The current one writes each action as a plain object
//! carrying its `action` discriminator. The typed shape wraps every action as
//! `{"cls": <class name>, "inst": {...}}`; it is only found in legacy queue files.

use crate::action::Action;
use crate::batch::{Batch, BinaryBatch};
use crate::error::StorageError;
use flate2::Compression;
use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};

/// Turns buffered actions into an encoded batch under an id chosen by the storage.
pub trait BatchFactory: Send + Sync {
    fn create_batch(&self, actions: &[Action], batch_id: u64) -> Result<BinaryBatch, StorageError>;
}

impl<F> BatchFactory for F
where
    F: Fn(&[Action], u64) -> Result<BinaryBatch, StorageError> + Send + Sync,
{
    fn create_batch(&self, actions: &[Action], batch_id: u64) -> Result<BinaryBatch, StorageError> {
        self(actions, batch_id)
    }
}

/// Production encoder: deflated JSON tagged with the writing process's server id.
#[derive(Debug, Clone)]
pub struct DeflateJsonBatchFactory {
    server_id: String,
}

impl DeflateJsonBatchFactory {
    pub fn new(server_id: impl Into<String>) -> Self {
        Self {
            server_id: server_id.into(),
        }
    }

    pub fn server_id(&self) -> &str {
        &self.server_id
    }
}

impl BatchFactory for DeflateJsonBatchFactory {
    fn create_batch(&self, actions: &[Action], batch_id: u64) -> Result<BinaryBatch, StorageError> {
        let batch = Batch::new(self.server_id.clone(), batch_id, actions.to_vec());
        let bytes = encode_batch(&batch)?;
        Ok(BinaryBatch::new(batch_id, bytes))
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct TypedBatchRef<'a> {
    server_id: &'a str,
    batch_id: u64,
    batch: Vec<TypedActionRef<'a>>,
}

#[derive(Serialize)]
struct TypedActionRef<'a> {
    cls: &'static str,
    inst: &'a Action,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TypedBatch {
    server_id: String,
    batch_id: u64,
    batch: Vec<TypedAction>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum TypedAction {
    Typed {
        #[allow(dead_code)]
        cls: String,
        inst: Action,
    },
    Plain(Action),
}

impl From<TypedAction> for Action {
    fn from(value: TypedAction) -> Self {
        match value {
            TypedAction::Typed { inst, .. } => inst,
            TypedAction::Plain(action) => action,
        }
    }
}

pub fn encode_batch(batch: &Batch) -> Result<Vec<u8>, StorageError> {
    let json = serde_json::to_vec(batch)
        .map_err(|e| StorageError::from_serialization_error(e, "batch encoding"))?;
    deflate(&json)
}

pub fn decode_batch(bytes: &[u8]) -> Result<Batch, StorageError> {
    let json = inflate(bytes)?;
    serde_json::from_slice(&json)
        .map_err(|e| StorageError::from_serialization_error(e, "batch decoding"))
}

/// Encode in the typed legacy layout, as older SDK versions wrote their queue files.
pub fn encode_typed_batch(batch: &Batch) -> Result<Vec<u8>, StorageError> {
    let typed = TypedBatchRef {
        server_id: &batch.server_id,
        batch_id: batch.batch_id,
        batch: batch
            .batch
            .iter()
            .map(|action| TypedActionRef {
                cls: action.kind().legacy_class_name(),
                inst: action,
            })
            .collect(),
    };
    let json = serde_json::to_vec(&typed)
        .map_err(|e| StorageError::from_serialization_error(e, "typed batch encoding"))?;
    deflate(&json)
}

/// Decode a batch whose actions may be typed envelopes, plain actions, or a mix.
pub fn decode_typed_batch(bytes: &[u8]) -> Result<Batch, StorageError> {
    let json = inflate(bytes)?;
    let typed: TypedBatch = serde_json::from_slice(&json)
        .map_err(|e| StorageError::from_serialization_error(e, "typed batch decoding"))?;
    Ok(Batch::new(
        typed.server_id,
        typed.batch_id,
        typed.batch.into_iter().map(Action::from).collect(),
    ))
}

fn deflate(data: &[u8]) -> Result<Vec<u8>, StorageError> {
    let mut encoder = DeflateEncoder::new(Vec::new(), Compression::best());
    encoder
        .write_all(data)
        .map_err(|e| StorageError::from_io_error(e, "deflate"))?;
    encoder
        .finish()
        .map_err(|e| StorageError::from_io_error(e, "deflate finish"))
}

fn inflate(data: &[u8]) -> Result<Vec<u8>, StorageError> {
    let mut decoder = DeflateDecoder::new(data);
    let mut out = Vec::new();
    decoder
        .read_to_end(&mut out)
        .map_err(|e| StorageError::from_serialization_error(e, "inflate"))?;
    Ok(out)
}
