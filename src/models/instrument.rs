use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{AppError, Result};

fn default_exchange() -> String {
    "NSE".to_string()
}

fn default_true() -> bool {
    true
}

/// A tradable equity in the universe
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instrument {
    /// Exchange-qualified ticker, e.g. "RELIANCE.NS"
    pub symbol: String,

    pub name: String,

    #[serde(default = "default_exchange")]
    pub exchange: String,

    #[serde(default)]
    pub sector: Option<String>,

    #[serde(default)]
    pub industry: Option<String>,

    #[serde(default)]
    pub is_nifty_50: bool,

    #[serde(default = "default_true")]
    pub is_nifty_100: bool,

    #[serde(default = "default_true")]
    pub is_active: bool,
}

impl Instrument {
    pub fn new(symbol: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            name: name.into(),
            exchange: default_exchange(),
            sector: None,
            industry: None,
            is_nifty_50: false,
            is_nifty_100: true,
            is_active: true,
        }
    }

    /// Load an instrument list (JSON array) from disk.
    /// Symbols are trimmed and upper-cased; blank symbols are rejected.
    pub fn load_file<P: AsRef<Path>>(path: P) -> Result<Vec<Instrument>> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| AppError::Io(format!("{}: {}", path.display(), e)))?;
        Self::parse_list(&content)
    }

    pub fn parse_list(content: &str) -> Result<Vec<Instrument>> {
        let mut instruments: Vec<Instrument> = serde_json::from_str(content)?;
        for instrument in instruments.iter_mut() {
            instrument.symbol = instrument.symbol.trim().to_uppercase();
            if instrument.symbol.is_empty() {
                return Err(AppError::InvalidInput(format!(
                    "instrument '{}' has an empty symbol",
                    instrument.name
                )));
            }
        }
        Ok(instruments)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_list_applies_defaults() {
        let json = r#"[
            {"symbol": " reliance.ns ", "name": "Reliance Industries", "sector": "Energy", "is_nifty_50": true},
            {"symbol": "TVSMOTOR.NS", "name": "TVS Motor Company", "is_active": false}
        ]"#;
        let list = Instrument::parse_list(json).unwrap();
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].symbol, "RELIANCE.NS");
        assert_eq!(list[0].exchange, "NSE");
        assert_eq!(list[0].sector.as_deref(), Some("Energy"));
        assert!(list[0].is_nifty_50);
        assert!(list[0].is_active);
        assert!(list[0].is_nifty_100);
        assert!(!list[1].is_active);
        assert_eq!(list[1].industry, None);
    }

    #[test]
    fn test_parse_list_rejects_blank_symbol() {
        let json = r#"[{"symbol": "  ", "name": "Nothing"}]"#;
        assert!(matches!(Instrument::parse_list(json), Err(AppError::InvalidInput(_))));
    }

    #[test]
    fn test_bundled_instrument_file_parses() {
        let path = concat!(env!("CARGO_MANIFEST_DIR"), "/instruments.json");
        let list = Instrument::load_file(path).unwrap();
        assert!(list.len() > 50);
        assert!(list.iter().any(|i| i.symbol == "RELIANCE.NS"));
    }
}
