use super::DatabaseError;
use crate::codec::CAN_MAX_DLEN;
use crate::runtime::config::de_can_id;

use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endianness {
    Little,
    Big,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SignalDef {
    pub name: String,
    pub bit_offset: u32,
    pub bit_length: u32,
    pub endianness: Endianness,
    pub signed: bool,
    pub factor: Option<f64>,
    pub offset: Option<f64>,
    pub min_value: Option<f64>,
    pub max_value: Option<f64>,
    pub resolution: Option<f64>,
    pub default_value: f64,
}

impl SignalDef {
    pub fn is_little_endian(&self) -> bool {
        self.endianness == Endianness::Little
    }

    /// Physical value of a raw bus value.
    pub fn to_physical(&self, raw: i64) -> f64 {
        let mut value = raw as f64;
        if let Some(factor) = self.factor {
            value *= factor;
        }
        if let Some(offset) = self.offset {
            value += offset;
        }
        value
    }

    /// Raw bus value of a physical value, rounded to the nearest integer.
    pub fn to_raw(&self, value: f64) -> i64 {
        let mut raw = value;
        if let Some(offset) = self.offset {
            raw -= offset;
        }
        if let Some(factor) = self.factor {
            raw /= factor;
        }
        raw.round() as i64
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MessageDef {
    pub name: String,
    pub id: u32,
    pub extended: bool,
    pub triggered: bool,
    /// Payload length in bytes
    pub length: u8,
    /// Transmit interval in ms, 0 when not periodic
    pub interval: u32,
    pub signals: Vec<SignalDef>,
}

impl MessageDef {
    pub fn key(&self) -> u32 {
        message_key(self.id, self.extended)
    }
}

/// Lookup key that keeps standard and extended ids apart.
pub(crate) fn message_key(id: u32, extended: bool) -> u32 {
    id | (extended as u32) << 31
}

#[derive(Debug, Clone, PartialEq)]
pub struct BusDef {
    pub name: String,
    pub messages: Vec<MessageDef>,
}

/// Buses and messages parsed from a JSON network description.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct NetworkDescription {
    pub buses: BTreeMap<String, BusDef>,
}

impl NetworkDescription {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, DatabaseError> {
        let text = fs::read_to_string(path)?;
        text.parse()
    }

    pub fn bus(&self, name: &str) -> Result<&BusDef, DatabaseError> {
        self.buses
            .get(name)
            .ok_or_else(|| DatabaseError::UnknownBus(name.to_string()))
    }
}

impl FromStr for NetworkDescription {
    type Err = DatabaseError;

    fn from_str(json: &str) -> Result<Self, Self::Err> {
        let raw: RawNetwork = serde_json::from_str(json)?;
        let mut buses = BTreeMap::new();
        for (name, bus) in raw.buses {
            let messages = bus
                .messages
                .into_iter()
                .map(RawMessage::build)
                .collect::<Result<Vec<_>, _>>()?;
            buses.insert(name.clone(), BusDef { name, messages });
        }
        Ok(NetworkDescription { buses })
    }
}

// Nodes and other top-level sections are ignored.
#[derive(Deserialize)]
struct RawNetwork {
    #[serde(default)]
    buses: HashMap<String, RawBus>,
}

#[derive(Deserialize)]
struct RawBus {
    #[serde(default)]
    messages: Vec<RawMessage>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawMessage {
    name: String,
    #[serde(deserialize_with = "de_can_id")]
    id: u32,
    format: Option<String>,
    triggered: Option<Loose>,
    length: Option<Loose>,
    interval: Option<Loose>,
    #[serde(default)]
    signals: Vec<RawSignal>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawSignal {
    name: String,
    bit_length: Option<Loose>,
    bit_offset: Option<Loose>,
    endianess: Option<String>,
    #[serde(rename = "type")]
    kind: Option<String>,
    factor: Option<f64>,
    offset: Option<f64>,
    min_value: Option<f64>,
    max_value: Option<f64>,
    resolution: Option<f64>,
    default_value: Option<f64>,
}

/// Scalar that descriptions write either as JSON literal or as string.
#[derive(Deserialize)]
#[serde(untagged)]
enum Loose {
    Bool(bool),
    Number(f64),
    Text(String),
}

impl Loose {
    fn as_u32(&self) -> Option<u32> {
        match self {
            Loose::Number(n) if n.fract() == 0.0 && *n >= 0.0 && *n <= u32::MAX as f64 => Some(*n as u32),
            Loose::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    fn is_true(&self) -> bool {
        match self {
            Loose::Bool(b) => *b,
            Loose::Text(s) => s == "true",
            Loose::Number(_) => false,
        }
    }
}

fn field_u32(message: &str, field: &str, value: Option<&Loose>) -> Result<Option<u32>, DatabaseError> {
    match value {
        None => Ok(None),
        Some(v) => v.as_u32().map(Some).ok_or_else(|| DatabaseError::InvalidMessage {
            message: message.to_string(),
            reason: format!("'{}' is not a non-negative integer", field),
        }),
    }
}

impl RawMessage {
    fn build(self) -> Result<MessageDef, DatabaseError> {
        let invalid = |reason: String| DatabaseError::InvalidMessage {
            message: self.name.clone(),
            reason,
        };

        let mut signals = Vec::with_capacity(self.signals.len());
        let mut max_bit = 0u32;
        for raw in &self.signals {
            let bit_length = field_u32(&self.name, "bitLength", raw.bit_length.as_ref())?
                .filter(|n| *n != 0)
                .unwrap_or(1);
            let bit_offset = field_u32(&self.name, "bitOffset", raw.bit_offset.as_ref())?.unwrap_or(0);
            if bit_length > 64 {
                return Err(invalid(format!("signal '{}' is wider than 64 bits", raw.name)));
            }
            max_bit = max_bit.max(bit_offset.saturating_add(bit_length));

            signals.push(SignalDef {
                name: raw.name.clone(),
                bit_offset,
                bit_length,
                endianness: match raw.endianess.as_deref() {
                    Some("big") => Endianness::Big,
                    _ => Endianness::Little,
                },
                signed: raw.kind.as_deref() == Some("signed"),
                // A zero factor would erase every value; treat it as absent.
                factor: raw.factor.filter(|f| *f != 0.0),
                offset: raw.offset,
                min_value: raw.min_value,
                max_value: raw.max_value,
                resolution: raw.resolution,
                default_value: raw.default_value.unwrap_or(0.0),
            });
        }

        let length = match field_u32(&self.name, "length", self.length.as_ref())? {
            Some(n) if n > 0 => n,
            _ => max_bit.div_ceil(8),
        };
        if length as usize > CAN_MAX_DLEN {
            return Err(invalid(format!("length {} exceeds {} bytes", length, CAN_MAX_DLEN)));
        }
        if let Some(s) = signals.iter().find(|s| s.bit_offset.saturating_add(s.bit_length) > length * 8) {
            return Err(invalid(format!("signal '{}' does not fit in {} bytes", s.name, length)));
        }

        Ok(MessageDef {
            extended: self.format.as_deref() == Some("extended"),
            triggered: self.triggered.as_ref().is_some_and(Loose::is_true),
            interval: field_u32(&self.name, "interval", self.interval.as_ref())?.unwrap_or(0),
            length: length as u8,
            id: self.id,
            name: self.name,
            signals,
        })
    }
}
