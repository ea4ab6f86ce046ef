//! Country tax engine
//!
//! Resolves a country identifier to a VAT/GST-style percentage and computes
//! tax amounts. The rate table is an immutable value injected at
//! construction; unknown, blank, or absent countries fall back to the
//! default rate, so rate resolution never fails.

use std::collections::HashMap;

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

/// Round a currency amount half-up to 2 decimals
pub fn round_money(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// Immutable tax rate table: normalized country identifier (ISO code or
/// full name) to percentage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaxTable {
    /// Rate applied when the country is unknown or not provided
    pub default_rate: Decimal,
    pub rates: HashMap<String, Decimal>,
}

impl TaxTable {
    /// The built-in rate set. Keys accept both ISO codes and full country
    /// names (English and Spanish spellings) because that is what user
    /// profiles historically contain.
    pub fn builtin() -> Self {
        let mut rates = HashMap::new();
        let mut insert = |countries: &[&str], percent: &str| {
            let rate: Decimal = percent.parse().unwrap_or_default();
            for country in countries {
                rates.insert((*country).to_string(), rate);
            }
        };

        // Europe - VAT
        insert(&["ES", "ESPAÑA", "SPAIN"], "21.00");
        insert(&["DE", "GERMANY", "ALEMANIA"], "19.00");
        insert(&["FR", "FRANCE", "FRANCIA"], "20.00");
        insert(&["IT", "ITALY", "ITALIA"], "22.00");
        insert(&["PT", "PORTUGAL"], "23.00");
        insert(&["GB", "UK", "UNITED KINGDOM", "REINO UNIDO"], "20.00");
        insert(&["NL", "NETHERLANDS", "HOLANDA"], "21.00");
        insert(&["BE", "BELGIUM", "BÉLGICA"], "21.00");
        insert(&["AT", "AUSTRIA"], "20.00");
        insert(&["SE", "SWEDEN", "SUECIA"], "25.00");
        insert(&["DK", "DENMARK", "DINAMARCA"], "25.00");
        insert(&["PL", "POLAND", "POLONIA"], "23.00");
        insert(&["IE", "IRELAND", "IRLANDA"], "23.00");
        insert(&["CH", "SWITZERLAND", "SUIZA"], "7.70");

        // Americas
        insert(&["MX", "MEXICO", "MÉXICO"], "16.00");
        insert(&["AR", "ARGENTINA"], "21.00");
        insert(&["CL", "CHILE"], "19.00");
        insert(&["CO", "COLOMBIA"], "19.00");
        insert(&["PE", "PERU", "PERÚ"], "18.00");
        insert(&["BR", "BRAZIL", "BRASIL"], "17.00");
        insert(&["US", "USA", "UNITED STATES", "ESTADOS UNIDOS"], "0.00");
        insert(&["CA", "CANADA", "CANADÁ"], "5.00");

        Self {
            default_rate: Decimal::new(2100, 2),
            rates,
        }
    }
}

impl Default for TaxTable {
    fn default() -> Self {
        Self::builtin()
    }
}

/// Tax calculator over an immutable [`TaxTable`]. No interior state; safe
/// to share behind an `Arc` across any number of callers.
#[derive(Debug, Clone)]
pub struct TaxEngine {
    table: TaxTable,
}

impl TaxEngine {
    pub fn new(table: TaxTable) -> Self {
        Self { table }
    }

    fn normalize(country: &str) -> String {
        country.trim().to_uppercase()
    }

    /// Tax rate in percent for a country. Blank or unknown input resolves
    /// to the default rate; this lookup never fails.
    pub fn rate_for(&self, country: Option<&str>) -> Decimal {
        let Some(country) = country.filter(|c| !c.trim().is_empty()) else {
            tracing::debug!(
                default_rate = %self.table.default_rate,
                "No country provided, using default tax rate"
            );
            return self.table.default_rate;
        };

        self.table
            .rates
            .get(&Self::normalize(country))
            .copied()
            .unwrap_or(self.table.default_rate)
    }

    /// Tax amount for a subtotal, rounded half-up to 2 decimals
    pub fn tax_amount(&self, subtotal: Decimal, country: Option<&str>) -> Decimal {
        let rate = self.rate_for(country);
        round_money(subtotal * rate / Decimal::new(100, 0))
    }

    /// Subtotal plus tax for a country
    pub fn total(&self, subtotal: Decimal, country: Option<&str>) -> Decimal {
        subtotal + self.tax_amount(subtotal, country)
    }

    /// Whether an explicit rate is configured for this country
    pub fn has_rate(&self, country: &str) -> bool {
        !country.trim().is_empty() && self.table.rates.contains_key(&Self::normalize(country))
    }

    /// Local name of the tax for invoice display
    pub fn tax_label(country: Option<&str>) -> &'static str {
        let Some(country) = country else { return "IVA" };
        match Self::normalize(country).as_str() {
            "US" | "USA" | "UNITED STATES" | "ESTADOS UNIDOS" => "Sales Tax",
            "CA" | "CANADA" | "CANADÁ" => "GST",
            "GB" | "UK" | "UNITED KINGDOM" | "REINO UNIDO" => "VAT",
            "BR" | "BRAZIL" | "BRASIL" => "ICMS",
            _ => "IVA",
        }
    }
}

impl Default for TaxEngine {
    fn default() -> Self {
        Self::new(TaxTable::builtin())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn dec(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    #[test]
    fn test_rate_lookup_by_code_and_name() {
        let engine = TaxEngine::default();
        assert_eq!(engine.rate_for(Some("ES")), dec("21.00"));
        assert_eq!(engine.rate_for(Some("spain")), dec("21.00"));
        assert_eq!(engine.rate_for(Some("  germany ")), dec("19.00"));
        assert_eq!(engine.rate_for(Some("SUIZA")), dec("7.70"));
        assert_eq!(engine.rate_for(Some("US")), dec("0.00"));
    }

    #[test]
    fn test_unknown_and_blank_country_use_default() {
        let engine = TaxEngine::default();
        assert_eq!(engine.rate_for(None), dec("21.00"));
        assert_eq!(engine.rate_for(Some("")), dec("21.00"));
        assert_eq!(engine.rate_for(Some("   ")), dec("21.00"));
        assert_eq!(engine.rate_for(Some("ATLANTIS")), dec("21.00"));
    }

    #[test]
    fn test_tax_amount_rounds_half_up() {
        let engine = TaxEngine::default();
        // 10.00 at 21% = 2.10
        assert_eq!(engine.tax_amount(dec("10.00"), Some("ES")), dec("2.10"));
        // 9.99 at 21% = 2.0979 -> 2.10
        assert_eq!(engine.tax_amount(dec("9.99"), Some("ES")), dec("2.10"));
        // 0.10 at 5% = 0.005 -> rounds away from zero to 0.01
        assert_eq!(engine.tax_amount(dec("0.10"), Some("CA")), dec("0.01"));
        // 45.00 at 21% = 9.45
        assert_eq!(engine.tax_amount(dec("45.00"), Some("ES")), dec("9.45"));
    }

    #[test]
    fn test_total_is_subtotal_plus_tax() {
        let engine = TaxEngine::default();
        assert_eq!(engine.total(dec("10.00"), Some("ES")), dec("12.10"));
        assert_eq!(engine.total(dec("45.00"), Some("ES")), dec("54.45"));
        assert_eq!(engine.total(dec("99.99"), Some("US")), dec("99.99"));
    }

    #[test]
    fn test_has_rate() {
        let engine = TaxEngine::default();
        assert!(engine.has_rate("ES"));
        assert!(engine.has_rate("portugal"));
        assert!(!engine.has_rate("ATLANTIS"));
        assert!(!engine.has_rate(""));
    }

    #[test]
    fn test_tax_label() {
        assert_eq!(TaxEngine::tax_label(Some("US")), "Sales Tax");
        assert_eq!(TaxEngine::tax_label(Some("canada")), "GST");
        assert_eq!(TaxEngine::tax_label(Some("UK")), "VAT");
        assert_eq!(TaxEngine::tax_label(Some("BR")), "ICMS");
        assert_eq!(TaxEngine::tax_label(Some("ES")), "IVA");
        assert_eq!(TaxEngine::tax_label(None), "IVA");
    }

    #[test]
    fn test_custom_table_injection() {
        let mut rates = HashMap::new();
        rates.insert("XX".to_string(), dec("8.00"));
        let engine = TaxEngine::new(TaxTable {
            default_rate: dec("10.00"),
            rates,
        });

        assert_eq!(engine.rate_for(Some("XX")), dec("8.00"));
        assert_eq!(engine.rate_for(Some("ES")), dec("10.00"));
        assert_eq!(engine.rate_for(None), dec("10.00"));
    }
}
