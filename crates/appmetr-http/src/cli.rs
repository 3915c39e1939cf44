//! Command line interface for tracking, draining and maintaining batch queues.

use crate::sender::HttpBatchSender;
use appmetr::encoding::decode_batch;
use appmetr::storage::file::{REBATCH_THRESHOLD_ITEM_COUNT, rebatch};
use appmetr::storage::{FileStorage, LegacyFileStorage};
use appmetr::{Action, AppMetr, AppMetrConfig, AppMetrError, UploadError};
use clap::{Parser, Subcommand};
use log::info;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "appmetr")]
#[command(about = "AppMetr batch uploader")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Track one event and wait until it is uploaded.
    Track {
        #[arg(long)]
        config: PathBuf,
        #[arg(long)]
        event: String,
        #[arg(long)]
        user_id: Option<String>,
        /// `key=value`; values that parse as JSON keep their type.
        #[arg(long = "property", value_parser = parse_property)]
        properties: Vec<(String, Value)>,
    },
    /// Upload every batch pending in the configured storage.
    Drain {
        #[arg(long)]
        config: PathBuf,
    },
    /// List pending batches of a queue directory.
    Inspect {
        #[arg(long)]
        dir: PathBuf,
        #[arg(long)]
        legacy: bool,
    },
    /// Split oversized batches of an idle queue directory.
    Rebatch {
        #[arg(long)]
        dir: PathBuf,
        #[arg(long, default_value_t = REBATCH_THRESHOLD_ITEM_COUNT)]
        max_actions: usize,
        #[arg(long)]
        legacy: bool,
    },
}

pub fn parse_property(raw: &str) -> Result<(String, Value), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got '{raw}'"))?;
    if key.is_empty() {
        return Err(format!("empty property key in '{raw}'"));
    }
    let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((key.to_string(), value))
}

pub fn handle_cli_command(command: Commands) -> Result<(), AppMetrError> {
    match command {
        Commands::Track {
            config,
            event,
            user_id,
            properties,
        } => {
            let mut action = Action::event(event);
            if let Some(user_id) = user_id {
                action = action.with_user_id(user_id);
            }
            for (key, value) in properties {
                action = action.with_property(key, value);
            }
            track_command(&config, action)
        }
        Commands::Drain { config } => drain_command(&config),
        Commands::Inspect { dir, legacy } => {
            for line in inspect_queue(&dir, legacy)? {
                println!("{line}");
            }
            Ok(())
        }
        Commands::Rebatch {
            dir,
            max_actions,
            legacy,
        } => {
            let storage = open_queue(&dir, legacy)?;
            let report = rebatch(&storage, max_actions)?;
            println!(
                "examined {}, written {}, split {}, skipped {}",
                report.examined, report.written, report.split, report.skipped
            );
            Ok(())
        }
    }
}

fn start_from_config(path: &Path) -> Result<AppMetr, AppMetrError> {
    let config = AppMetrConfig::from_path(path)?;
    let sender = HttpBatchSender::new().map_err(UploadError::from)?;
    let appmetr = AppMetr::new(config, Arc::new(sender))?;
    appmetr.start()?;
    Ok(appmetr)
}

fn track_command(config: &Path, action: Action) -> Result<(), AppMetrError> {
    let appmetr = start_from_config(config)?;
    let name = action.name();
    appmetr.track(action)?;
    appmetr.soft_stop()?;
    info!("Tracked {name} as server {}", appmetr.server_id());
    println!("{:?}", appmetr.upload_stats());
    Ok(())
}

fn drain_command(config: &Path) -> Result<(), AppMetrError> {
    let appmetr = start_from_config(config)?;
    appmetr.soft_stop()?;
    println!("{:?}", appmetr.upload_stats());
    Ok(())
}

fn open_queue(dir: &Path, legacy: bool) -> Result<FileStorage, AppMetrError> {
    let storage = if legacy {
        LegacyFileStorage::open(dir)?
    } else {
        FileStorage::open(dir)?
    };
    Ok(storage)
}

/// One line per pending batch: id, encoded size and action count.
pub fn inspect_queue(dir: &Path, legacy: bool) -> Result<Vec<String>, AppMetrError> {
    let storage = open_queue(dir, legacy)?;
    let mut lines = Vec::new();
    for batch_id in storage.pending_batch_ids() {
        let Some(batch) = storage.read_batch(batch_id)? else {
            lines.push(format!("{batch_id:011} missing"));
            continue;
        };
        let actions = match decode_batch(batch.bytes()) {
            Ok(decoded) => format!("{} actions", decoded.len()),
            Err(_) => "undecodable".to_string(),
        };
        lines.push(format!("{batch_id:011} {} bytes {actions}", batch.len()));
    }
    lines.push(format!("next batch id {}", storage.next_batch_id()));
    Ok(lines)
}
