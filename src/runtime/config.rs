use crate::codec::{CAN_INV_FILTER, CanFilter};
use crate::error::{Error, Result};

use serde::{Deserialize, Deserializer};
use std::collections::HashMap;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

/// One receive filter. `id` and `mask` accept a number or a string such as
/// `"0x7FF"`.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct FilterConfig {
    #[serde(deserialize_with = "de_can_id")]
    pub id: u32,
    #[serde(deserialize_with = "de_can_id")]
    pub mask: u32,
    #[serde(default)]
    pub inverted: bool,
}

impl FilterConfig {
    pub fn to_filter(&self) -> CanFilter {
        let id = if self.inverted { self.id | CAN_INV_FILTER } else { self.id };
        CanFilter::new(id, self.mask)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChannelConfig {
    pub interface: String,
    /// Attach kernel receive timestamps (default: false)
    #[serde(default)]
    pub timestamps: bool,
    /// Absent: accept everything. Empty: receive nothing.
    #[serde(default)]
    pub filters: Option<Vec<FilterConfig>>,
}

impl ChannelConfig {
    pub fn new(interface: &str) -> Self {
        ChannelConfig {
            interface: interface.to_string(),
            timestamps: false,
            filters: None,
        }
    }

    pub fn can_filters(&self) -> Option<Vec<CanFilter>> {
        self.filters
            .as_ref()
            .map(|filters| filters.iter().map(FilterConfig::to_filter).collect())
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct SystemConfig {
    #[serde(default)]
    pub channels: HashMap<String, ChannelConfig>,
}

impl SystemConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)
            .map_err(|e| Error::Config(format!("cannot open {}: {}", path.display(), e)))?;
        serde_json::from_reader(BufReader::new(file))
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))
    }

    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::Config(e.to_string()))
    }

    pub fn channel(&self, alias: &str) -> Result<&ChannelConfig> {
        self.channels
            .get(alias)
            .ok_or_else(|| Error::Config(format!("channel '{}' not found in config", alias)))
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum NumberOrText {
    Number(u64),
    Text(String),
}

/// Parses `"0x1A"`, `"0X1a"` or `"26"`.
pub(crate) fn parse_id_text(text: &str) -> Option<u32> {
    let text = text.trim();
    match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16).ok(),
        None => text.parse().ok(),
    }
}

pub(crate) fn de_can_id<'de, D>(deserializer: D) -> std::result::Result<u32, D::Error>
where
    D: Deserializer<'de>,
{
    match NumberOrText::deserialize(deserializer)? {
        NumberOrText::Number(n) => u32::try_from(n)
            .map_err(|_| serde::de::Error::custom(format!("identifier {} out of range", n))),
        NumberOrText::Text(s) => parse_id_text(&s)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid identifier '{}'", s))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::Frame;

    const CONFIG: &str = r#"{
        "channels": {
            "body": {
                "interface": "vcan0",
                "timestamps": true,
                "filters": [
                    { "id": "0x123", "mask": "0x7FF" },
                    { "id": 512, "mask": 1792, "inverted": true }
                ]
            },
            "diag": { "interface": "vcan1" },
            "silent": { "interface": "vcan2", "filters": [] }
        }
    }"#;

    #[test]
    fn test_parse_channels() {
        let config = SystemConfig::from_json(CONFIG).unwrap();
        let body = config.channel("body").unwrap();
        assert_eq!(body.interface, "vcan0");
        assert!(body.timestamps);

        let filters = body.can_filters().unwrap();
        assert_eq!(filters.len(), 2);
        assert!(filters[0].matches(&Frame::new(0x123, &[]).unwrap()));
        assert!(filters[1].is_inverted());
        assert!(!filters[1].matches(&Frame::new(0x201, &[]).unwrap()));

        let diag = config.channel("diag").unwrap();
        assert!(!diag.timestamps);
        assert!(diag.can_filters().is_none());

        assert_eq!(config.channel("silent").unwrap().can_filters(), Some(vec![]));
    }

    #[test]
    fn test_unknown_alias() {
        let config = SystemConfig::from_json(CONFIG).unwrap();
        assert!(matches!(config.channel("chassis"), Err(Error::Config(_))));
    }

    #[test]
    fn test_bad_identifier() {
        let json = r#"{ "channels": { "a": { "interface": "can0", "filters": [ { "id": "0xZZ", "mask": 0 } ] } } }"#;
        assert!(matches!(SystemConfig::from_json(json), Err(Error::Config(_))));
    }

    #[test]
    fn test_parse_id_text() {
        assert_eq!(parse_id_text("0x1A"), Some(0x1A));
        assert_eq!(parse_id_text("0X1a"), Some(0x1A));
        assert_eq!(parse_id_text(" 291 "), Some(291));
        assert_eq!(parse_id_text("abc"), None);
    }

    #[test]
    fn test_missing_file() {
        assert!(matches!(
            SystemConfig::load("/nonexistent/canbridge.json"),
            Err(Error::Config(_))
        ));
    }
}
