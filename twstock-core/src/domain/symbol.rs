//! Registry entries and the market each symbol trades on.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The two boards a Taiwan equity can trade on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Market {
    /// Main board (TWSE).
    Listed,
    /// Over-the-counter board (TPEx).
    Otc,
}

impl Market {
    /// Auto-detect order: the listed board is probed first.
    pub const ALL: [Market; 2] = [Market::Listed, Market::Otc];

    /// Registry tag for this market.
    pub fn tag(self) -> &'static str {
        match self {
            Market::Listed => "TSE",
            Market::Otc => "TPEX",
        }
    }
}

impl fmt::Display for Market {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl FromStr for Market {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "TSE" | "TWSE" => Ok(Market::Listed),
            "TPEX" | "OTC" => Ok(Market::Otc),
            other => Err(format!("unknown market tag '{other}'")),
        }
    }
}

/// One line of the symbol registry.
///
/// `market` is `None` when the tag was missing or unrecognised; routing then
/// falls back to auto-detection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymbolRecord {
    pub code: String,
    pub name: String,
    pub market: Option<Market>,
    pub is_target: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_registry_tags() {
        assert_eq!("TSE".parse::<Market>().unwrap(), Market::Listed);
        assert_eq!(" tpex ".parse::<Market>().unwrap(), Market::Otc);
        assert!("NYSE".parse::<Market>().is_err());
    }

    #[test]
    fn tag_roundtrips_through_display() {
        for market in Market::ALL {
            assert_eq!(market.to_string().parse::<Market>().unwrap(), market);
        }
    }
}
