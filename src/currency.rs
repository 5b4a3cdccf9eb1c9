use std::fmt;

use serde::{Deserialize, Serialize};

/// Opaque reference of a registered token, e.g. its contract address or mint.
pub type CurrencyRef = String;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stablecoin {
    pub reference: CurrencyRef,
    pub symbol: String,
    pub decimals: u8,
}

/// Destination of a deposit or an auto-investment.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Currency {
    #[default]
    Native,
    Stablecoin(CurrencyRef),
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Currency::Native => f.write_str("native"),
            Currency::Stablecoin(reference) => f.write_str(reference),
        }
    }
}

/// Supported stablecoins, kept in registration order.
#[derive(Debug, Clone, Default)]
pub struct StablecoinRegistry {
    coins: Vec<Stablecoin>,
}

impl StablecoinRegistry {
    pub fn contains(&self, reference: &str) -> bool {
        self.coins.iter().any(|coin| coin.reference == reference)
    }

    /// Returns `false` and leaves the registry untouched when the reference is already known.
    pub fn add(&mut self, coin: Stablecoin) -> bool {
        if self.contains(&coin.reference) {
            return false;
        }
        self.coins.push(coin);
        true
    }

    pub fn remove(&mut self, reference: &str) -> Option<Stablecoin> {
        let idx = self
            .coins
            .iter()
            .position(|coin| coin.reference == reference)?;
        Some(self.coins.remove(idx))
    }

    pub fn list(&self) -> Vec<Stablecoin> {
        self.coins.clone()
    }

    pub fn len(&self) -> usize {
        self.coins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.coins.is_empty()
    }
}
