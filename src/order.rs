//! Order input validation.
//!
//! Everything the search engine assumes about its inputs is checked here:
//! positive amount divisible by the bundle size, a known currency, stock keys
//! that are denominations of that currency and non-negative quantities.

use std::collections::BTreeMap;
use std::num::NonZeroUsize;

use serde::Deserialize;
#[allow(unused_imports)]
use serde_json::json;
use utoipa::ToSchema;

use crate::model::{CurrencyTable, DenominationSet, StockMap, ValidationError, normalize_code};

/// Stock quantity as it arrives from a form or the command line.
///
/// Accepts JSON numbers as well as numeric strings; an empty string counts as zero.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum StockQuantity {
    Count(i64),
    Text(String),
}

impl StockQuantity {
    fn parse(&self) -> Option<i64> {
        match self {
            StockQuantity::Count(value) => Some(*value),
            StockQuantity::Text(raw) => {
                let trimmed = raw.trim();
                if trimmed.is_empty() {
                    Some(0)
                } else {
                    trimmed.parse().ok()
                }
            }
        }
    }
}

/// How denominations missing from an explicitly supplied stock map are treated.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PartialStockPolicy {
    /// Missing denominations have no bundles available.
    Forbid,
    /// Missing denominations are unlimited.
    Unlimited,
}

impl PartialStockPolicy {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "forbid" | "forbidden" | "zero" => Some(Self::Forbid),
            "unlimited" | "infinite" => Some(Self::Unlimited),
            _ => None,
        }
    }
}

/// Limits applied while validating an order.
#[derive(Clone, Copy, Debug)]
pub struct OrderLimits {
    pub bundle_size: u64,
    pub default_variants: NonZeroUsize,
    pub max_variants: NonZeroUsize,
    pub partial_stock: PartialStockPolicy,
}

/// Unvalidated order as received by the API or the command line.
#[derive(Clone, Debug, Deserialize, ToSchema)]
#[schema(
    example = json!({
        "amount": 750000,
        "currency": "USD",
        "stock": { "100": 18, "50": 40 },
        "max_variants": 5
    })
)]
pub struct OrderInput {
    pub amount: i64,
    #[serde(default = "default_currency")]
    pub currency: String,
    #[serde(default)]
    #[schema(nullable = true, value_type = Option<Object>)]
    pub stock: Option<BTreeMap<String, StockQuantity>>,
    #[serde(default)]
    #[schema(nullable = true)]
    pub max_variants: Option<i64>,
}

fn default_currency() -> String {
    "USD".to_string()
}

/// An order that satisfies every precondition of the search engine.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ValidatedOrder {
    pub amount: u64,
    pub currency: String,
    pub denominations: DenominationSet,
    pub stock: Option<StockMap>,
    pub max_variants: NonZeroUsize,
}

impl OrderInput {
    pub fn into_validated(
        self,
        currencies: &CurrencyTable,
        limits: &OrderLimits,
    ) -> Result<ValidatedOrder, ValidationError> {
        if self.amount <= 0 {
            return Err(ValidationError::NonPositiveAmount(self.amount));
        }
        let amount = self.amount.unsigned_abs();

        let currency = normalize_code(&self.currency);
        let denominations = currencies
            .get(&currency)
            .cloned()
            .ok_or_else(|| ValidationError::UnsupportedCurrency(currency.clone()))?;

        if limits.bundle_size == 0 || amount % limits.bundle_size != 0 {
            return Err(ValidationError::AmountNotDivisible {
                amount,
                bundle_size: limits.bundle_size,
            });
        }

        let stock = match self.stock {
            Some(raw) => validate_stock(raw, &currency, &denominations, limits.partial_stock)?,
            None => None,
        };

        let max_variants = match self.max_variants {
            None => limits.default_variants,
            Some(requested) => usize::try_from(requested)
                .ok()
                .and_then(NonZeroUsize::new)
                .ok_or(ValidationError::InvalidVariantCount(requested))?
                .min(limits.max_variants),
        };

        Ok(ValidatedOrder {
            amount,
            currency,
            denominations,
            stock,
            max_variants,
        })
    }
}

/// Parses a raw stock map. Blank and zero quantities are dropped; if nothing
/// is left the order has no stock limit at all.
fn validate_stock(
    raw: BTreeMap<String, StockQuantity>,
    currency: &str,
    denominations: &DenominationSet,
    policy: PartialStockPolicy,
) -> Result<Option<StockMap>, ValidationError> {
    let mut stock = StockMap::new();
    for (key, quantity) in raw {
        let denomination: u64 = key
            .trim()
            .parse()
            .map_err(|_| ValidationError::InvalidStockEntry(key.clone()))?;
        if !denominations.contains(denomination) {
            return Err(ValidationError::UnknownDenomination {
                denomination,
                currency: currency.to_string(),
            });
        }
        let quantity = quantity
            .parse()
            .ok_or_else(|| ValidationError::InvalidStockEntry(key.clone()))?;
        if quantity < 0 {
            return Err(ValidationError::NegativeStock {
                denomination,
                quantity,
            });
        }
        if quantity > 0 {
            stock.insert(denomination, quantity.unsigned_abs());
        }
    }

    if stock.is_empty() {
        return Ok(None);
    }
    if policy == PartialStockPolicy::Forbid {
        for d in denominations.iter() {
            stock.entry(d).or_insert(0);
        }
    }
    Ok(Some(stock))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits(policy: PartialStockPolicy) -> OrderLimits {
        OrderLimits {
            bundle_size: 100,
            default_variants: NonZeroUsize::new(5).unwrap(),
            max_variants: NonZeroUsize::new(20).unwrap(),
            partial_stock: policy,
        }
    }

    fn input(amount: i64, currency: &str) -> OrderInput {
        OrderInput {
            amount,
            currency: currency.to_string(),
            stock: None,
            max_variants: None,
        }
    }

    fn stock(entries: &[(&str, StockQuantity)]) -> Option<BTreeMap<String, StockQuantity>> {
        Some(
            entries
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect(),
        )
    }

    #[test]
    fn accepts_minimal_order_with_defaults() {
        let table = CurrencyTable::default();
        let order = input(300_000, "usd")
            .into_validated(&table, &limits(PartialStockPolicy::Forbid))
            .expect("valid order");
        assert_eq!(order.amount, 300_000);
        assert_eq!(order.currency, "USD");
        assert_eq!(order.denominations.as_slice(), &[100, 50, 20, 10]);
        assert_eq!(order.stock, None);
        assert_eq!(order.max_variants.get(), 5);
    }

    #[test]
    fn rejects_non_positive_amount() {
        let table = CurrencyTable::default();
        let lim = limits(PartialStockPolicy::Forbid);
        assert_eq!(
            input(0, "USD").into_validated(&table, &lim),
            Err(ValidationError::NonPositiveAmount(0))
        );
        assert_eq!(
            input(-100, "USD").into_validated(&table, &lim),
            Err(ValidationError::NonPositiveAmount(-100))
        );
    }

    #[test]
    fn rejects_unknown_currency_and_indivisible_amount() {
        let table = CurrencyTable::default();
        let lim = limits(PartialStockPolicy::Forbid);
        assert_eq!(
            input(1_000, "gbp").into_validated(&table, &lim),
            Err(ValidationError::UnsupportedCurrency("GBP".to_string()))
        );
        assert_eq!(
            input(1_050, "USD").into_validated(&table, &lim),
            Err(ValidationError::AmountNotDivisible {
                amount: 1_050,
                bundle_size: 100
            })
        );
    }

    #[test]
    fn stock_accepts_numbers_and_numeric_strings() {
        let table = CurrencyTable::default();
        let mut order = input(750_000, "USD");
        order.stock = stock(&[
            ("100", StockQuantity::Count(18)),
            ("50", StockQuantity::Text(" 40 ".to_string())),
            ("20", StockQuantity::Text(String::new())),
        ]);
        let validated = order
            .into_validated(&table, &limits(PartialStockPolicy::Unlimited))
            .unwrap();
        assert_eq!(
            validated.stock,
            Some(StockMap::from([(100, 18), (50, 40)])),
            "empty quantities are dropped and missing entries stay absent"
        );
    }

    #[test]
    fn forbid_policy_fills_missing_denominations_with_zero() {
        let table = CurrencyTable::default();
        let mut order = input(750_000, "USD");
        order.stock = stock(&[
            ("100", StockQuantity::Count(18)),
            ("50", StockQuantity::Count(40)),
        ]);
        let validated = order
            .into_validated(&table, &limits(PartialStockPolicy::Forbid))
            .unwrap();
        assert_eq!(
            validated.stock,
            Some(StockMap::from([(100, 18), (50, 40), (20, 0), (10, 0)]))
        );
    }

    #[test]
    fn empty_stock_map_means_unlimited() {
        let table = CurrencyTable::default();
        let mut order = input(750_000, "USD");
        order.stock = Some(BTreeMap::new());
        let validated = order
            .into_validated(&table, &limits(PartialStockPolicy::Forbid))
            .unwrap();
        assert_eq!(validated.stock, None);
    }

    #[test]
    fn blank_or_zero_stock_means_unlimited() {
        let table = CurrencyTable::default();
        let lim = limits(PartialStockPolicy::Forbid);

        let blank = StockQuantity::Text(String::new());
        let mut order = input(300_000, "USD");
        order.stock = stock(&[
            ("100", blank.clone()),
            ("50", blank.clone()),
            ("20", blank.clone()),
            ("10", blank),
        ]);
        assert_eq!(order.into_validated(&table, &lim).unwrap().stock, None);

        let mut order = input(300_000, "USD");
        order.stock = stock(&[
            ("100", StockQuantity::Count(0)),
            ("50", StockQuantity::Text("0".to_string())),
        ]);
        assert_eq!(order.into_validated(&table, &lim).unwrap().stock, None);
    }

    #[test]
    fn rejects_bad_stock_entries() {
        let table = CurrencyTable::default();
        let lim = limits(PartialStockPolicy::Forbid);

        let mut order = input(1_000, "USD");
        order.stock = stock(&[("abc", StockQuantity::Count(1))]);
        assert_eq!(
            order.into_validated(&table, &lim),
            Err(ValidationError::InvalidStockEntry("abc".to_string()))
        );

        let mut order = input(1_000, "EUR");
        order.stock = stock(&[("10", StockQuantity::Count(1))]);
        assert_eq!(
            order.into_validated(&table, &lim),
            Err(ValidationError::UnknownDenomination {
                denomination: 10,
                currency: "EUR".to_string()
            })
        );

        let mut order = input(1_000, "USD");
        order.stock = stock(&[("50", StockQuantity::Count(-3))]);
        assert_eq!(
            order.into_validated(&table, &lim),
            Err(ValidationError::NegativeStock {
                denomination: 50,
                quantity: -3
            })
        );

        let mut order = input(1_000, "USD");
        order.stock = stock(&[("50", StockQuantity::Text("many".to_string()))]);
        assert_eq!(
            order.into_validated(&table, &lim),
            Err(ValidationError::InvalidStockEntry("50".to_string()))
        );
    }

    #[test]
    fn max_variants_is_validated_and_clamped() {
        let table = CurrencyTable::default();
        let lim = limits(PartialStockPolicy::Forbid);

        let mut order = input(1_000, "USD");
        order.max_variants = Some(0);
        assert_eq!(
            order.into_validated(&table, &lim),
            Err(ValidationError::InvalidVariantCount(0))
        );

        let mut order = input(1_000, "USD");
        order.max_variants = Some(500);
        assert_eq!(order.into_validated(&table, &lim).unwrap().max_variants.get(), 20);
    }

    #[test]
    fn order_input_parses_from_json() {
        let json = r#"{
            "amount": 750000,
            "currency": "usd",
            "stock": {"100": 18, "50": "40"}
        }"#;
        let parsed: OrderInput = serde_json::from_str(json).expect("Should parse valid JSON");
        assert_eq!(parsed.amount, 750_000);
        assert_eq!(parsed.max_variants, None);
        let stock = parsed.stock.expect("stock present");
        assert_eq!(stock.get("100"), Some(&StockQuantity::Count(18)));
        assert_eq!(stock.get("50"), Some(&StockQuantity::Text("40".to_string())));
    }

    #[test]
    fn partial_stock_policy_parses_known_values() {
        assert_eq!(PartialStockPolicy::parse("Forbid"), Some(PartialStockPolicy::Forbid));
        assert_eq!(
            PartialStockPolicy::parse(" unlimited "),
            Some(PartialStockPolicy::Unlimited)
        );
        assert_eq!(PartialStockPolicy::parse("sometimes"), None);
    }
}
