//! Data models for the bundle allocation engine.
//!
//! This module defines the fundamental data structures shared by the search,
//! the HTTP layer and the command line:
//! - `DenominationSet`: The validated, descending list of face values of a currency
//! - `StockLimit` / `StockLevels`: Per-denomination bundle ceilings
//! - `Allocation`: One candidate solution (bundle count per denomination)
//! - `Variant`: The presentation-facing breakdown of a solution
//! - `CurrencyTable`: The immutable currency → denomination table

use std::collections::BTreeMap;

use serde::Serialize;
#[allow(unused_imports)]
use serde_json::json;
use thiserror::Error;
use utoipa::ToSchema;

/// Sparse stock mapping as supplied by callers: denomination → available bundles.
pub type StockMap = BTreeMap<u64, u64>;

/// Validation error for order and currency data.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Amount must be positive, got: {0}")]
    NonPositiveAmount(i64),
    #[error("Amount {amount} must be divisible by {bundle_size}")]
    AmountNotDivisible { amount: u64, bundle_size: u64 },
    #[error("Currency {0} not supported")]
    UnsupportedCurrency(String),
    #[error("Invalid stock data for denomination {0}")]
    InvalidStockEntry(String),
    #[error("Denomination {denomination} not valid for {currency}")]
    UnknownDenomination { denomination: u64, currency: String },
    #[error("Stock quantities must be non-negative, got {quantity} for denomination {denomination}")]
    NegativeStock { denomination: u64, quantity: i64 },
    #[error("Number of variants must be positive, got: {0}")]
    InvalidVariantCount(i64),
    #[error("Invalid denominations: {0}")]
    InvalidDenominations(String),
}

/// The face values of one currency, sorted descending.
///
/// Every value is positive and unique. The search walks denominations in this
/// order, so constructing a set is the only way to hand denominations to it.
///
/// # Examples
/// ```ignore
/// let set = DenominationSet::new(vec![20, 100, 50, 20]).unwrap();
/// assert_eq!(set.as_slice(), &[100, 50, 20]);
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct DenominationSet {
    values: Vec<u64>,
}

impl DenominationSet {
    /// Creates a denomination set with validation.
    ///
    /// # Returns
    /// `Ok(DenominationSet)` for a non-empty list of positive values, otherwise
    /// `Err(ValidationError::InvalidDenominations)`
    pub fn new(values: impl IntoIterator<Item = u64>) -> Result<Self, ValidationError> {
        let mut values: Vec<u64> = values.into_iter().collect();
        if values.is_empty() {
            return Err(ValidationError::InvalidDenominations(
                "at least one denomination is required".to_string(),
            ));
        }
        if values.contains(&0) {
            return Err(ValidationError::InvalidDenominations(
                "denominations must be positive".to_string(),
            ));
        }
        values.sort_unstable_by(|a, b| b.cmp(a));
        values.dedup();
        Ok(Self { values })
    }

    pub fn as_slice(&self) -> &[u64] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn contains(&self, denomination: u64) -> bool {
        self.values.contains(&denomination)
    }

    /// Smallest face value (the last entry).
    pub fn smallest(&self) -> u64 {
        self.values.last().copied().unwrap_or(1)
    }

    pub fn iter(&self) -> impl Iterator<Item = u64> + '_ {
        self.values.iter().copied()
    }
}

/// Ceiling on the number of bundles available for one denomination.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StockLimit {
    Unlimited,
    Limited(u64),
}

impl StockLimit {
    /// Clamps `wanted` to what this limit allows.
    #[inline]
    pub fn cap(self, wanted: u64) -> u64 {
        match self {
            StockLimit::Unlimited => wanted,
            StockLimit::Limited(available) => wanted.min(available),
        }
    }

    #[inline]
    pub fn allows(self, count: u64) -> bool {
        match self {
            StockLimit::Unlimited => true,
            StockLimit::Limited(available) => count <= available,
        }
    }
}

/// Dense stock levels aligned with a `DenominationSet`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StockLevels {
    limits: Vec<(u64, StockLimit)>,
}

impl StockLevels {
    /// Expands a sparse stock map into a limit for every denomination.
    ///
    /// Denominations without an entry (or every denomination when `stock` is
    /// `None`) are unlimited. Keys outside the set are ignored.
    pub fn normalize(denominations: &DenominationSet, stock: Option<&StockMap>) -> Self {
        let limits = denominations
            .iter()
            .map(|d| {
                let limit = stock
                    .and_then(|map| map.get(&d))
                    .map_or(StockLimit::Unlimited, |&qty| StockLimit::Limited(qty));
                (d, limit)
            })
            .collect();
        Self { limits }
    }

    /// Limit for the denomination at position `index` of the set.
    #[inline]
    pub fn limit_at(&self, index: usize) -> StockLimit {
        self.limits
            .get(index)
            .map_or(StockLimit::Limited(0), |&(_, limit)| limit)
    }

    /// Total bundles on hand, or `None` when any denomination is unlimited.
    pub fn total_bundles(&self) -> Option<u64> {
        self.limits
            .iter()
            .try_fold(0u64, |acc, &(_, limit)| match limit {
                StockLimit::Unlimited => None,
                StockLimit::Limited(qty) => Some(acc.saturating_add(qty)),
            })
    }
}

/// Bundle counts per denomination, in `DenominationSet` order.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Allocation {
    counts: Vec<u64>,
}

impl Allocation {
    pub fn new(counts: Vec<u64>) -> Self {
        Self { counts }
    }

    pub fn counts(&self) -> &[u64] {
        &self.counts
    }

    pub fn total_bundles(&self) -> u64 {
        self.counts.iter().sum()
    }

    /// Sum of `count × denomination`, i.e. the value in bundle units.
    pub fn total_units(&self, denominations: &DenominationSet) -> u64 {
        self.counts
            .iter()
            .zip(denominations.iter())
            .map(|(&count, d)| count.saturating_mul(d))
            .fold(0u64, u64::saturating_add)
    }

    pub fn distinct_denominations(&self) -> usize {
        self.counts.iter().filter(|&&c| c > 0).count()
    }

    /// Pairs of (denomination, count) for every denomination actually used.
    pub fn used<'a>(
        &'a self,
        denominations: &'a DenominationSet,
    ) -> impl Iterator<Item = (u64, u64)> + 'a {
        denominations
            .iter()
            .zip(self.counts.iter().copied())
            .filter(|&(_, count)| count > 0)
    }
}

/// An allocation whose bundles fill `blocks` whole blocks.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct GroupedSolution {
    pub blocks: u64,
    pub allocation: Allocation,
}

/// Whether a variant fills whole blocks or is a loose bundle combination.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum VariantKind {
    Grouped,
    Loose,
}

/// One line of a variant breakdown.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, ToSchema)]
pub struct BreakdownLine {
    pub denomination: u64,
    pub bundles: u64,
    pub value: u64,
}

/// Presentation-facing description of a single solution.
///
/// # Fields
/// * `kind` - Grouped or loose
/// * `blocks` - Number of whole blocks (0 for loose variants)
/// * `total_bundles` - Bundles across all denominations
/// * `breakdown` - Used denominations with bundle count and monetary value
/// * `total_value` - Sum of all breakdown values
#[derive(Clone, Debug, PartialEq, Eq, Serialize, ToSchema)]
#[schema(
    example = json!({
        "kind": "grouped",
        "blocks": 1,
        "total_bundles": 30,
        "breakdown": [{ "denomination": 100, "bundles": 30, "value": 300000 }],
        "total_value": 300000
    })
)]
pub struct Variant {
    pub kind: VariantKind,
    pub blocks: u64,
    pub total_bundles: u64,
    pub breakdown: Vec<BreakdownLine>,
    pub total_value: u64,
}

impl Variant {
    pub fn grouped(
        solution: &GroupedSolution,
        denominations: &DenominationSet,
        bundle_size: u64,
    ) -> Self {
        Self::build(
            VariantKind::Grouped,
            solution.blocks,
            &solution.allocation,
            denominations,
            bundle_size,
        )
    }

    pub fn loose(allocation: &Allocation, denominations: &DenominationSet, bundle_size: u64) -> Self {
        Self::build(VariantKind::Loose, 0, allocation, denominations, bundle_size)
    }

    fn build(
        kind: VariantKind,
        blocks: u64,
        allocation: &Allocation,
        denominations: &DenominationSet,
        bundle_size: u64,
    ) -> Self {
        let breakdown: Vec<BreakdownLine> = allocation
            .used(denominations)
            .map(|(denomination, bundles)| BreakdownLine {
                denomination,
                bundles,
                value: denomination
                    .saturating_mul(bundles)
                    .saturating_mul(bundle_size),
            })
            .collect();
        let total_value = breakdown
            .iter()
            .map(|line| line.value)
            .fold(0u64, u64::saturating_add);

        Self {
            kind,
            blocks,
            total_bundles: allocation.total_bundles(),
            breakdown,
            total_value,
        }
    }
}

/// Immutable currency code → denomination table.
///
/// Built once at startup and shared read-only with the HTTP state and the CLI.
#[derive(Clone, Debug)]
pub struct CurrencyTable {
    currencies: BTreeMap<String, DenominationSet>,
}

impl CurrencyTable {
    pub fn empty() -> Self {
        Self {
            currencies: BTreeMap::new(),
        }
    }

    /// Adds (or replaces) a currency. Codes are stored upper-case.
    pub fn with_currency(mut self, code: &str, denominations: DenominationSet) -> Self {
        self.currencies
            .insert(normalize_code(code), denominations);
        self
    }

    /// Case-insensitive lookup.
    pub fn get(&self, code: &str) -> Option<&DenominationSet> {
        self.currencies.get(&normalize_code(code))
    }

    pub fn codes(&self) -> impl Iterator<Item = &str> {
        self.currencies.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &DenominationSet)> {
        self.currencies.iter().map(|(code, set)| (code.as_str(), set))
    }
}

impl Default for CurrencyTable {
    fn default() -> Self {
        const DEFAULTS: [(&str, &[u64]); 3] = [
            ("USD", &[100, 50, 20, 10]),
            ("EUR", &[100, 50, 20]),
            ("JPY", &[10000, 5000, 1000]),
        ];
        DEFAULTS
            .iter()
            .fold(Self::empty(), |table, (code, values)| {
                match DenominationSet::new(values.iter().copied()) {
                    Ok(set) => table.with_currency(code, set),
                    Err(_) => table,
                }
            })
    }
}

/// Canonical form of a currency code.
pub fn normalize_code(code: &str) -> String {
    code.trim().to_ascii_uppercase()
}
