//! Core data types shared across the simulation core

use serde::{Deserialize, Serialize};

/// Instrument symbol using Arc<str> for cheap cloning
///
/// Symbols are cloned on every order, trade, and position touch.
/// Using Arc<str> instead of String reduces heap allocations from O(n) to O(1) per clone.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Symbol(#[serde(with = "arc_str_serde")] std::sync::Arc<str>);

/// Custom serde for Arc<str>
mod arc_str_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::sync::Arc;

    pub fn serialize<S>(value: &Arc<str>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(value)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Arc<str>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Ok(Arc::from(s.as_str()))
    }
}

impl Symbol {
    pub fn new(s: impl AsRef<str>) -> Self {
        Symbol(std::sync::Arc::from(s.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Symbol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Settlement currency code (e.g. "USD"), same cheap-clone representation as Symbol
pub type Currency = Symbol;

/// Trade direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    /// +1 for buys, -1 for sells; used for signed quantity and cash-flow math
    pub fn sign(self) -> f64 {
        match self {
            Side::Buy => 1.0,
            Side::Sell => -1.0,
        }
    }

    pub fn opposite(self) -> Side {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }
}

/// Tradable instrument with its settlement currency and contract multiplier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instrument {
    pub symbol: Symbol,
    pub currency: Currency,
    pub multiplier: f64,
}

impl Instrument {
    pub fn new(symbol: impl AsRef<str>, currency: impl AsRef<str>, multiplier: f64) -> Self {
        Self {
            symbol: Symbol::new(symbol),
            currency: Symbol::new(currency),
            multiplier,
        }
    }

    /// Spot instrument: multiplier of 1 in the given currency
    pub fn spot(symbol: impl AsRef<str>, currency: impl AsRef<str>) -> Self {
        Self::new(symbol, currency, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_symbol_equality_and_clone() {
        let a = Symbol::new("ES");
        let b = a.clone();
        assert_eq!(a, b);
        assert_eq!(a.as_str(), "ES");
    }

    #[test]
    fn test_side_sign() {
        assert_eq!(Side::Buy.sign(), 1.0);
        assert_eq!(Side::Sell.sign(), -1.0);
        assert_eq!(Side::Buy.opposite(), Side::Sell);
    }

    #[test]
    fn test_symbol_serde() {
        let sym = Symbol::new("BTCUSDT");
        let json = serde_json::to_string(&sym).unwrap();
        assert_eq!(json, "\"BTCUSDT\"");
        let parsed: Symbol = serde_json::from_str(&json).unwrap();
        assert_eq!(sym, parsed);
    }
}
