//! Reader for the `.wowsreplay` container.
//!
//! Only the plaintext envelope is handled here: a magic number, a count of
//! JSON metadata blocks, the blocks themselves, and then the battle payload.
//! The payload is passed on untouched; decoding it is the replay backend's job.

use nom::bytes::complete::take;
use nom::number::complete::le_u32;
use nom::IResult;
use serde_json::{Map, Value};
use std::fmt;
use std::path::Path;

use crate::error::{ChatError, Result};

pub const REPLAY_MAGIC: u32 = 0x1134_3212;
const VERSION_KEY: &str = "clientVersionFromXml";

/// Contents of a replay file
#[derive(Debug, Clone)]
pub struct ReplayData {
    /// First metadata block (map, vehicles, client version, ...)
    pub engine_data: Map<String, Value>,
    /// Any further metadata blocks, in file order
    pub extra_blocks: Vec<Value>,
    /// Battle payload handed to the player as-is
    pub payload: Vec<u8>,
}

pub struct ReplayReader {
    bytes: Vec<u8>,
}

impl ReplayReader {
    pub fn open(path: &Path) -> Result<Self> {
        Ok(Self::from_bytes(std::fs::read(path)?))
    }

    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    pub fn get_replay_data(&self) -> Result<ReplayData> {
        let (rest, magic) = le_u32::<_, nom::error::Error<&[u8]>>(self.bytes.as_slice())
            .map_err(|_| ChatError::invalid_header("file is shorter than the magic number"))?;
        if magic != REPLAY_MAGIC {
            return Err(ChatError::InvalidMagic {
                expected: REPLAY_MAGIC,
                found: magic,
            });
        }

        let (rest, block_count) = le_u32::<_, nom::error::Error<&[u8]>>(rest)
            .map_err(|_| ChatError::invalid_header("missing metadata block count"))?;
        if block_count == 0 {
            return Err(ChatError::invalid_header("replay has no metadata blocks"));
        }

        let mut rest = rest;
        let mut blocks = Vec::with_capacity(block_count as usize);
        for index in 0..block_count {
            let (next, raw) = json_block(rest).map_err(|_| {
                ChatError::invalid_header(format!("metadata block {} is truncated", index))
            })?;
            blocks.push(serde_json::from_slice::<Value>(raw)?);
            rest = next;
        }

        let mut blocks = blocks.into_iter();
        let engine_data = match blocks.next() {
            Some(Value::Object(map)) => map,
            _ => {
                return Err(ChatError::invalid_header(
                    "engine metadata block is not a JSON object",
                ))
            }
        };

        Ok(ReplayData {
            engine_data,
            extra_blocks: blocks.collect(),
            payload: rest.to_vec(),
        })
    }
}

/// u32 LE length followed by that many bytes
fn json_block(input: &[u8]) -> IResult<&[u8], &[u8]> {
    let (input, len) = le_u32(input)?;
    take(len)(input)
}

/// Client version, e.g. `0,11,5,7412345`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientVersion(pub Vec<String>);

impl ClientVersion {
    /// Spaces are stripped before splitting on commas.
    pub fn parse(raw: &str) -> Result<Self> {
        let cleaned = raw.replace(' ', "");
        if cleaned.is_empty() {
            return Err(ChatError::MissingVersion);
        }
        Ok(Self(cleaned.split(',').map(str::to_string).collect()))
    }

    pub fn from_engine_data(engine_data: &Map<String, Value>) -> Result<Self> {
        match engine_data.get(VERSION_KEY).and_then(Value::as_str) {
            Some(raw) => Self::parse(raw),
            None => Err(ChatError::MissingVersion),
        }
    }
}

impl fmt::Display for ClientVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.join(","))
    }
}
