//! Prices
//!
//! All amounts are integer minor units (centavos). Never use f64 for money.

use serde::{Deserialize, Serialize};

/// One-time platform access (R$ 19,99)
pub const ACCESS_PRICE_MINOR_UNITS: u64 = 1999;

/// Individual e-book (R$ 4,99)
pub const EBOOK_PRICE_MINOR_UNITS: u64 = 499;

/// Settlement currency
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Currency {
    #[default]
    Brl,
}

impl Currency {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Brl => "BRL",
        }
    }

    /// Render an amount the way the storefront shows it, e.g. `R$ 19,99`
    pub fn format(self, minor_units: u64) -> String {
        match self {
            Self::Brl => format!("R$ {},{:02}", minor_units / 100, minor_units % 100),
        }
    }
}

impl std::fmt::Display for Currency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
