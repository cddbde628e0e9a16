//! Dump command implementation.

use super::{open_log, CliResult};
use crate::Format;
use ciborium::value::Value;
use mutsync_codec::MutationRecord;
use mutsync_outbox::{scan_log, Frame, LogReplay};
use serde::Serialize;
use std::path::Path;

/// One printed line: a pending entry or a raw frame.
#[derive(Debug, Serialize)]
pub struct EntryInfo {
    /// Frame type.
    pub frame: &'static str,
    /// Entry key.
    pub key: u64,
    /// Offset in the log, when dumping frames.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offset: Option<u64>,
    /// Mutation ID.
    pub mutation_id: String,
    /// Logical type name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_type: Option<String>,
    /// Object identity.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_id: Option<String>,
    /// Mutation kind.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    /// Who made the change.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,
    /// Payload size in bytes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload_size: Option<usize>,
    /// Payload as JSON, when requested.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
}

impl EntryInfo {
    fn put(key: u64, offset: Option<u64>, record: &MutationRecord, with_payload: bool) -> Self {
        Self {
            frame: "PUT",
            key,
            offset,
            mutation_id: record.mutation_id.to_string(),
            model_type: Some(record.model_type.clone()),
            model_id: Some(record.model_id.clone()),
            kind: Some(record.kind.to_string()),
            origin: Some(record.origin.to_string()),
            payload_size: Some(record.payload_size()),
            payload: with_payload.then(|| payload_json(&record.payload)),
        }
    }
}

/// Runs the dump command.
pub fn run(
    path: &Path,
    limit: Option<usize>,
    all_frames: bool,
    payloads: bool,
    format: Format,
) -> CliResult<()> {
    let entries = collect(path, limit, all_frames, payloads)?;

    match format {
        Format::Json => println!("{}", serde_json::to_string_pretty(&entries)?),
        Format::Text => print_text_output(&entries, all_frames),
    }
    Ok(())
}

pub(crate) fn collect(
    path: &Path,
    limit: Option<usize>,
    all_frames: bool,
    payloads: bool,
) -> CliResult<Vec<EntryInfo>> {
    let backend = open_log(path)?;
    let scan = scan_log(&backend)?;
    let max = limit.unwrap_or(usize::MAX);

    let entries = if all_frames {
        scan.frames
            .iter()
            .take(max)
            .map(|(offset, frame)| match frame {
                Frame::Put { key, record } => {
                    EntryInfo::put(key.as_u64(), Some(*offset), record, payloads)
                }
                Frame::Remove { key, mutation_id } => EntryInfo {
                    frame: "REMOVE",
                    key: key.as_u64(),
                    offset: Some(*offset),
                    mutation_id: mutation_id.to_string(),
                    model_type: None,
                    model_id: None,
                    kind: None,
                    origin: None,
                    payload_size: None,
                    payload: None,
                },
            })
            .collect()
    } else {
        LogReplay::from_scan(&scan)
            .live()
            .iter()
            .take(max)
            .map(|(key, record)| EntryInfo::put(key.as_u64(), None, record, payloads))
            .collect()
    };
    Ok(entries)
}

fn payload_json(payload: &[u8]) -> serde_json::Value {
    match ciborium::de::from_reader::<Value, _>(payload) {
        Ok(value) => cbor_to_json(&value),
        Err(err) => serde_json::json!({ "undecodable": err.to_string(), "hex": hex_encode(payload) }),
    }
}

fn cbor_to_json(value: &Value) -> serde_json::Value {
    use serde_json::Value as Json;

    match value {
        Value::Null => Json::Null,
        Value::Bool(b) => Json::Bool(*b),
        Value::Integer(int) => {
            let n = i128::from(*int);
            i64::try_from(n)
                .map(Json::from)
                .or_else(|_| u64::try_from(n).map(Json::from))
                .unwrap_or_else(|_| Json::String(n.to_string()))
        }
        Value::Float(f) => serde_json::Number::from_f64(*f).map_or(Json::Null, Json::Number),
        Value::Text(s) => Json::String(s.clone()),
        Value::Bytes(bytes) => Json::String(hex_encode(bytes)),
        Value::Tag(_, inner) => cbor_to_json(inner),
        Value::Array(items) => Json::Array(items.iter().map(cbor_to_json).collect()),
        Value::Map(pairs) => Json::Object(
            pairs
                .iter()
                .map(|(k, v)| {
                    let key = match k {
                        Value::Text(s) => s.clone(),
                        other => cbor_to_json(other).to_string(),
                    };
                    (key, cbor_to_json(v))
                })
                .collect(),
        ),
        _ => Json::Null,
    }
}

fn print_text_output(entries: &[EntryInfo], all_frames: bool) {
    let title = if all_frames { "Frames" } else { "Pending mutations" };
    println!("{title} ({} total)", entries.len());
    println!("================");

    for entry in entries {
        match entry.offset {
            Some(offset) => print!("[{offset:08}] {:6} #{:<6}", entry.frame, entry.key),
            None => print!("#{:<6}", entry.key),
        }
        print!(" {}", entry.mutation_id);

        if let (Some(model_type), Some(model_id)) = (&entry.model_type, &entry.model_id) {
            print!(" {model_type}/{model_id}");
        }
        if let Some(kind) = &entry.kind {
            print!(" {kind}");
        }
        if let Some(origin) = &entry.origin {
            print!(" origin={origin}");
        }
        if let Some(size) = entry.payload_size {
            print!(" payload={size} bytes");
        }
        println!();

        if let Some(payload) = &entry.payload {
            println!("    {payload}");
        }
    }
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}
