//! The payload carried by share links, and the token pipeline around it:
//! envelope → tagged JSON → compressed bytes → base64url token.

use crate::compression::Codec;
use crate::compression::CompressionLevel;
use crate::compression::Compressor;
use crate::ejson;
use crate::ejson::Value;
use crate::error::PersistenceError;
use crate::error::Result;
use crate::fragment;
use crate::snapshot::AnySnapshot;
use crate::snapshot::ObjectId;
use crate::snapshot::SnapshotV2;
use std::collections::BTreeMap;
use tracing::debug;

const VM_KEY: &str = "vm";
const ACTIVE_IC_KEY: &str = "activeIC";
const PROGRAMS_KEY: &str = "programs";

/// Every shape a share link has ever carried.
#[derive(Debug, Clone, PartialEq)]
pub enum WireEnvelope {
    /// Bare program text, from before links carried any structure
    RawSource(String),
    /// Program text per circuit id, without VM state
    LegacyPrograms { programs: Vec<(ObjectId, String)> },
    /// Full VM state plus the focused circuit
    Current { vm: SnapshotV2, active_ic: ObjectId },
}

impl WireEnvelope {
    pub fn to_value(&self) -> Result<Value> {
        match self {
            Self::RawSource(text) => Ok(Value::String(text.clone())),
            Self::LegacyPrograms { programs } => {
                let programs = programs
                    .iter()
                    .map(|(id, text)| {
                        Value::Array(vec![
                            Value::Number(f64::from(*id)),
                            Value::String(text.clone()),
                        ])
                    })
                    .collect();
                Ok(Value::Object(BTreeMap::from([(
                    PROGRAMS_KEY.to_owned(),
                    Value::Array(programs),
                )])))
            }
            Self::Current { vm, active_ic } => Ok(Value::Object(BTreeMap::from([
                (VM_KEY.to_owned(), ejson::to_value(vm)?),
                (
                    ACTIVE_IC_KEY.to_owned(),
                    Value::Number(f64::from(*active_ic)),
                ),
            ]))),
        }
    }

    /// Renders the envelope as wire text.
    ///
    /// Raw sources are written bare when they read back unchanged, and as a
    /// JSON string otherwise.
    pub fn encode(&self) -> Result<String> {
        match self {
            Self::RawSource(text) => match Self::from_text(text) {
                Ok(Self::RawSource(back)) if back == *text => Ok(text.clone()),
                _ => Ok(ejson::encode(&Value::String(text.clone()))?),
            },
            other => Ok(ejson::encode(&other.to_value()?)?),
        }
    }

    /// Classifies decompressed wire text.
    ///
    /// Text that is not JSON is taken as raw program source, unless it opens
    /// like a JSON object, in which case it is a damaged payload.
    pub fn from_text(text: &str) -> Result<Self> {
        match ejson::decode(text) {
            Ok(value) => Self::from_value(value, text),
            Err(err) if text.trim_start().starts_with('{') => Err(err.into()),
            Err(_) => Ok(Self::RawSource(text.to_owned())),
        }
    }

    /// Classifies a decoded value graph; `text` is the wire text it came from.
    pub fn from_value(value: Value, text: &str) -> Result<Self> {
        match value {
            Value::String(source) => Ok(Self::RawSource(source)),
            record @ (Value::Object(_) | Value::Map(_)) => {
                if let Some(programs) = record.get(PROGRAMS_KEY) {
                    return Ok(Self::LegacyPrograms {
                        programs: legacy_programs(programs)?,
                    });
                }
                match (record.get(VM_KEY), record.get(ACTIVE_IC_KEY)) {
                    (Some(vm), Some(active_ic)) => {
                        let active_ic: ObjectId = ejson::from_value(active_ic.clone())?;
                        let vm = AnySnapshot::from_value(vm.clone())?;
                        debug!(schema = %vm.schema_version(), "decoded VM envelope");
                        Ok(Self::Current {
                            vm: vm.into_current()?,
                            active_ic,
                        })
                    }
                    _ => Err(PersistenceError::UnrecognizedPayload(
                        "record has neither `programs` nor `vm` with `activeIC`".to_owned(),
                    )),
                }
            }
            _ => Ok(Self::RawSource(text.to_owned())),
        }
    }

    /// Program text per id, as the envelope states it.
    pub fn programs(&self) -> BTreeMap<ObjectId, String> {
        match self {
            Self::RawSource(text) => BTreeMap::from([(crate::DEFAULT_OBJECT_ID, text.clone())]),
            Self::LegacyPrograms { programs } => programs.iter().cloned().collect(),
            Self::Current { vm, .. } => vm.program_sources(),
        }
    }
}

/// Accepts `[[id, text], ...]` as well as a tagged map of id to text.
fn legacy_programs(programs: &Value) -> Result<Vec<(ObjectId, String)>> {
    let pairs: Vec<(ObjectId, String)> = match programs {
        Value::Map(entries) => entries
            .iter()
            .map(|(id, text)| {
                Ok((
                    ejson::from_value(id.clone())?,
                    ejson::from_value(text.clone())?,
                ))
            })
            .collect::<Result<_>>()?,
        other => ejson::from_value(other.clone())?,
    };
    Ok(pairs)
}

/// Envelope → share token.
pub fn encode_token(envelope: &WireEnvelope, codec: Codec, level: CompressionLevel) -> Result<String> {
    let text = envelope.encode()?;
    let compressed = Compressor::new(level).compress(text.as_bytes(), codec)?;
    Ok(fragment::to_token(&compressed))
}

/// Share token → envelope, whatever codec the token was written with.
pub fn decode_token(token: &str) -> Result<WireEnvelope> {
    let bytes = fragment::from_token(token)?;
    let raw = Compressor::default().decompress_detected(&bytes)?;
    let text = String::from_utf8(raw)
        .map_err(|e| PersistenceError::UnrecognizedPayload(format!("payload is not UTF-8: {e}")))?;
    WireEnvelope::from_text(&text)
}
