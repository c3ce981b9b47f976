//! Rendering of polled registers into bus payloads.

use serde::{Deserialize, Serialize};

use crate::codec::{EncodedPair, decode};
use crate::error::{Error, Result};

/// How the bridge renders polled registers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PayloadFormat {
    /// Raw register words, comma-and-space separated (e.g. `0, 16480`).
    #[default]
    Raw,
    /// The decoded float as text (two-register reads only).
    Value,
    /// JSON object with the raw words, decoded value and timestamp.
    Json,
}

impl PayloadFormat {
    /// Whether this format needs exactly two registers to decode.
    pub fn requires_pair(&self) -> bool {
        matches!(self, PayloadFormat::Value)
    }
}

/// The registers read in one poll cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegisterSample {
    /// Modbus unit id the registers were read from.
    pub unit_id: u8,

    /// First register address.
    pub address: u16,

    /// Raw register words, in register order.
    pub words: Vec<u16>,

    /// Decoded float when the sample is exactly one register pair.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<f32>,

    /// Unix epoch milliseconds when the registers were read.
    pub timestamp: i64,
}

impl RegisterSample {
    /// Create a sample stamped with the current time.
    pub fn new(unit_id: u8, address: u16, words: Vec<u16>) -> Self {
        let value = EncodedPair::from_words(&words).map(decode);
        Self {
            unit_id,
            address,
            words,
            value,
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }

    /// Render the sample in the given format.
    pub fn render(&self, format: PayloadFormat) -> Result<Vec<u8>> {
        match format {
            PayloadFormat::Raw => Ok(render_raw_words(&self.words).into_bytes()),
            PayloadFormat::Value => {
                let value = self.value.ok_or_else(|| {
                    Error::Payload(format!(
                        "value format needs 2 registers, got {}",
                        self.words.len()
                    ))
                })?;
                Ok(value.to_string().into_bytes())
            }
            PayloadFormat::Json => serde_json::to_vec(self).map_err(Error::from),
        }
    }
}

/// A payload ready to be published, created once per successful poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeMessage {
    /// Destination topic.
    pub topic: String,
    /// Payload bytes.
    pub payload: Vec<u8>,
}

impl BridgeMessage {
    pub fn new(topic: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            topic: topic.into(),
            payload,
        }
    }
}

/// Render register words as `w0, w1, ...`.
pub fn render_raw_words(words: &[u16]) -> String {
    words
        .iter()
        .map(u16::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Parse a raw payload (`w0, w1, ...`) back into register words.
pub fn parse_raw_words(text: &str) -> Result<Vec<u16>> {
    let text = text.trim();
    if text.is_empty() {
        return Err(Error::Payload("empty payload".to_string()));
    }

    text.split(',')
        .map(|part| {
            let part = part.trim();
            part.parse::<u16>()
                .map_err(|e| Error::Payload(format!("'{}' is not a register word: {}", part, e)))
        })
        .collect()
}
