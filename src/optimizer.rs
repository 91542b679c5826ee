//! Allocation search for bundle orders.
//!
//! This module implements two exhaustive depth-first searches that split an
//! amount into bundles of the available denominations:
//! - Grouped search: the bundles must fill a whole number of equally sized blocks
//! - Loose search: any exact combination of bundles within stock
//!
//! Both searches enumerate every feasible allocation up to their bounds. The
//! results are then ranked by a lexicographic score and cut to the requested
//! number of variants. The planner runs the grouped search first and only
//! falls back to loose bundles when no grouped allocation exists.

use std::cmp::Ordering;
use std::num::NonZeroUsize;

use serde::Serialize;
use thiserror::Error;
use tracing::debug;
use utoipa::ToSchema;

use crate::bounds::{compare_averages, max_block_count, target_units};
use crate::model::{
    Allocation, DenominationSet, GroupedSolution, StockLevels, StockMap, Variant, VariantKind,
};
use crate::order::ValidatedOrder;

/// Size constants of the allocation problem.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct BundleConfig {
    /// Notes per bundle; one bundle of denomination `d` is worth `d × bundle_size`
    pub bundle_size: u64,
    /// Bundles per block in grouped mode
    pub block_size: u64,
}

impl BundleConfig {
    pub const DEFAULT_BUNDLE_SIZE: u64 = 100;
    pub const DEFAULT_BLOCK_SIZE: u64 = 30;

    /// Creates a builder for a custom configuration.
    pub fn builder() -> BundleConfigBuilder {
        BundleConfigBuilder::default()
    }
}

impl Default for BundleConfig {
    fn default() -> Self {
        Self {
            bundle_size: Self::DEFAULT_BUNDLE_SIZE,
            block_size: Self::DEFAULT_BLOCK_SIZE,
        }
    }
}

/// Builder for `BundleConfig`.
#[derive(Clone, Debug, Default)]
pub struct BundleConfigBuilder {
    config: BundleConfig,
}

impl BundleConfigBuilder {
    pub fn bundle_size(mut self, size: u64) -> Self {
        self.config.bundle_size = size;
        self
    }

    pub fn block_size(mut self, size: u64) -> Self {
        self.config.block_size = size;
        self
    }

    pub fn build(self) -> BundleConfig {
        self.config
    }
}

// ---------------------------------------------------------------------------
// Grouped search
// ---------------------------------------------------------------------------

/// DFS state for one block count.
///
/// `scratch` is the in-progress allocation. Each level sets its entry, recurses
/// and resets it; emitted solutions are always copies.
struct GroupedSearch<'a> {
    denominations: &'a [u64],
    stock: &'a StockLevels,
    blocks: u64,
    scratch: &'a mut [u64],
    out: &'a mut Vec<GroupedSolution>,
}

impl GroupedSearch<'_> {
    fn descend(&mut self, index: usize, bundles_left: u64, units_left: u64) {
        let Some(&d) = self.denominations.get(index) else {
            return;
        };
        let limit = self.stock.limit_at(index);

        // Last denomination: the count is forced, not branched.
        if index + 1 == self.denominations.len() {
            if units_left % d != 0 {
                return;
            }
            let needed = units_left / d;
            if needed == bundles_left && limit.allows(needed) {
                self.scratch[index] = needed;
                self.out.push(GroupedSolution {
                    blocks: self.blocks,
                    allocation: Allocation::new(self.scratch.to_vec()),
                });
                self.scratch[index] = 0;
            }
            return;
        }

        let max_for_d = limit.cap(bundles_left.min(units_left / d));
        for b in 0..=max_for_d {
            self.scratch[index] = b;
            self.descend(index + 1, bundles_left - b, units_left - d * b);
        }
        self.scratch[index] = 0;
    }
}

/// Enumerates every grouped allocation, unranked.
///
/// Block counts run from 1 up to `max_block_count`; a block count that needs
/// more bundles than the total stock ends the loop. `on_block_count` receives
/// `(block_count, solutions_found)` after each block count has been searched.
pub fn enumerate_grouped(
    amount: u64,
    denominations: &DenominationSet,
    stock: &StockLevels,
    config: &BundleConfig,
    mut on_block_count: impl FnMut(u64, usize),
) -> Vec<GroupedSolution> {
    let Some(units) = target_units(amount, config.bundle_size) else {
        return Vec::new();
    };

    let max_blocks = max_block_count(
        amount,
        denominations,
        stock,
        config.bundle_size,
        config.block_size,
    );
    let total_stock = stock.total_bundles();
    debug!(amount, units, max_blocks, ?total_stock, "grouped search bounds");

    let mut scratch = vec![0u64; denominations.len()];
    let mut out = Vec::new();

    for blocks in 1..=max_blocks {
        let Some(bundles_total) = blocks.checked_mul(config.block_size) else {
            break;
        };
        if total_stock.is_some_and(|total| bundles_total > total) {
            break;
        }

        let before = out.len();
        GroupedSearch {
            denominations: denominations.as_slice(),
            stock,
            blocks,
            scratch: scratch.as_mut_slice(),
            out: &mut out,
        }
        .descend(0, bundles_total, units);
        on_block_count(blocks, out.len() - before);
    }

    out
}

// ---------------------------------------------------------------------------
// Loose search
// ---------------------------------------------------------------------------

struct LooseSearch<'a> {
    denominations: &'a [u64],
    stock: &'a StockLevels,
    scratch: &'a mut [u64],
    out: &'a mut Vec<Allocation>,
}

impl LooseSearch<'_> {
    fn descend(&mut self, index: usize, units_left: u64) {
        let Some(&d) = self.denominations.get(index) else {
            return;
        };
        let limit = self.stock.limit_at(index);

        if index + 1 == self.denominations.len() {
            if units_left % d != 0 {
                return;
            }
            let needed = units_left / d;
            if limit.allows(needed) {
                self.scratch[index] = needed;
                self.out.push(Allocation::new(self.scratch.to_vec()));
                self.scratch[index] = 0;
            }
            return;
        }

        let max_for_d = limit.cap(units_left / d);
        for b in 0..=max_for_d {
            self.scratch[index] = b;
            self.descend(index + 1, units_left - d * b);
        }
        self.scratch[index] = 0;
    }
}

/// Enumerates every exact allocation within stock, unranked.
pub fn enumerate_loose(
    amount: u64,
    denominations: &DenominationSet,
    stock: &StockLevels,
    config: &BundleConfig,
) -> Vec<Allocation> {
    let Some(units) = target_units(amount, config.bundle_size) else {
        return Vec::new();
    };
    debug!(amount, units, "loose search bounds");

    let mut scratch = vec![0u64; denominations.len()];
    let mut out = Vec::new();
    LooseSearch {
        denominations: denominations.as_slice(),
        stock,
        scratch: scratch.as_mut_slice(),
        out: &mut out,
    }
    .descend(0, units);
    out
}

// ---------------------------------------------------------------------------
// Scoring
// ---------------------------------------------------------------------------

/// Ranking key of a solution; smaller is better.
///
/// Ordered by `primary` (blocks for grouped, bundles for loose), then by the
/// number of distinct denominations, then by the average bundle value in
/// descending order.
#[derive(Clone, Copy, Debug)]
pub struct VariantScore {
    primary: u64,
    distinct: usize,
    units: u64,
    bundles: u64,
}

impl VariantScore {
    fn new(primary: u64, allocation: &Allocation, denominations: &DenominationSet) -> Self {
        Self {
            primary,
            distinct: allocation.distinct_denominations(),
            units: allocation.total_units(denominations),
            bundles: allocation.total_bundles(),
        }
    }
}

impl Ord for VariantScore {
    fn cmp(&self, other: &Self) -> Ordering {
        self.primary
            .cmp(&other.primary)
            .then_with(|| self.distinct.cmp(&other.distinct))
            // Higher average first.
            .then_with(|| compare_averages(other.units, other.bundles, self.units, self.bundles))
    }
}

impl PartialOrd for VariantScore {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for VariantScore {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for VariantScore {}

pub fn score_grouped(solution: &GroupedSolution, denominations: &DenominationSet) -> VariantScore {
    VariantScore::new(solution.blocks, &solution.allocation, denominations)
}

pub fn score_loose(allocation: &Allocation, denominations: &DenominationSet) -> VariantScore {
    VariantScore::new(allocation.total_bundles(), allocation, denominations)
}

/// Sorts ascending by score and keeps the first `max_results`.
///
/// The sort is stable, so equal scores keep their enumeration order.
pub fn select_top<T>(
    items: Vec<T>,
    max_results: NonZeroUsize,
    score: impl Fn(&T) -> VariantScore,
) -> Vec<T> {
    let mut keyed: Vec<(VariantScore, T)> = items
        .into_iter()
        .map(|item| (score(&item), item))
        .collect();
    keyed.sort_by(|a, b| a.0.cmp(&b.0));
    keyed.truncate(max_results.get());
    keyed.into_iter().map(|(_, item)| item).collect()
}

// ---------------------------------------------------------------------------
// Entry points
// ---------------------------------------------------------------------------

/// Best grouped allocations for `amount`.
///
/// `stock` is the sparse caller map; `None` means unlimited for every
/// denomination. Infeasible or invalid input yields an empty list.
pub fn solve_grouped(
    amount: u64,
    denominations: &DenominationSet,
    stock: Option<&StockMap>,
    max_results: NonZeroUsize,
    config: &BundleConfig,
) -> Vec<GroupedSolution> {
    solve_grouped_with_progress(amount, denominations, stock, max_results, config, |_, _| {})
}

/// Like `solve_grouped`, reporting `(block_count, solutions_found)` after each
/// block count has been searched.
pub fn solve_grouped_with_progress(
    amount: u64,
    denominations: &DenominationSet,
    stock: Option<&StockMap>,
    max_results: NonZeroUsize,
    config: &BundleConfig,
    on_block_count: impl FnMut(u64, usize),
) -> Vec<GroupedSolution> {
    let levels = StockLevels::normalize(denominations, stock);
    let raw = enumerate_grouped(amount, denominations, &levels, config, on_block_count);
    debug!(found = raw.len(), "grouped search finished");
    let ranked = select_top(raw, max_results, |s| score_grouped(s, denominations));
    if let Some(best) = ranked.first() {
        debug!(
            blocks = best.blocks,
            counts = ?best.allocation.counts(),
            "best grouped allocation"
        );
    }
    ranked
}

/// Best loose allocations for `amount`. Only meant as the fallback after
/// `solve_grouped` came back empty.
pub fn solve_loose(
    amount: u64,
    denominations: &DenominationSet,
    stock: Option<&StockMap>,
    max_results: NonZeroUsize,
    config: &BundleConfig,
) -> Vec<Allocation> {
    let levels = StockLevels::normalize(denominations, stock);
    let raw = enumerate_loose(amount, denominations, &levels, config);
    debug!(found = raw.len(), "loose search finished");
    let ranked = select_top(raw, max_results, |a| score_loose(a, denominations));
    if let Some(best) = ranked.first() {
        debug!(counts = ?best.counts(), "best loose allocation");
    }
    ranked
}

// ---------------------------------------------------------------------------
// Planner
// ---------------------------------------------------------------------------

/// Result of planning an order.
#[derive(Clone, Debug, Serialize, ToSchema)]
pub struct OrderPlan {
    pub amount: u64,
    pub currency: String,
    pub bundle_size: u64,
    pub block_size: u64,
    pub has_grouped: bool,
    pub variants: Vec<Variant>,
}

impl OrderPlan {
    pub fn mode(&self) -> VariantKind {
        if self.has_grouped {
            VariantKind::Grouped
        } else {
            VariantKind::Loose
        }
    }

    pub fn variant_count(&self) -> usize {
        self.variants.len()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlanError {
    #[error("Cannot fulfil order with given stock")]
    Infeasible,
}

/// Events emitted while planning, for live progress display.
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type")]
pub enum PlanEvent {
    /// A search pass begins.
    SearchStarted { mode: VariantKind },
    /// One block count of the grouped search is done.
    BlockCountSearched { blocks: u64, solutions: usize },
    /// No grouped allocation exists; loose bundles are tried next.
    FallbackStarted,
    /// A ranked variant made it into the result.
    VariantSelected { rank: usize, variant: Variant },
    /// Planning is over. `mode` is absent when nothing fits.
    Finished {
        mode: Option<VariantKind>,
        variants: usize,
    },
}

/// Plans an order: grouped variants if any exist, loose variants otherwise.
pub fn plan_order(order: &ValidatedOrder, config: &BundleConfig) -> Result<OrderPlan, PlanError> {
    let grouped = solve_grouped(
        order.amount,
        &order.denominations,
        order.stock.as_ref(),
        order.max_variants,
        config,
    );
    finish_plan(order, config, grouped, |_| {})
}

/// Plans an order and reports each step through `on_event`.
pub fn plan_order_with_progress(
    order: &ValidatedOrder,
    config: &BundleConfig,
    mut on_event: impl FnMut(&PlanEvent),
) -> Result<OrderPlan, PlanError> {
    on_event(&PlanEvent::SearchStarted {
        mode: VariantKind::Grouped,
    });
    let grouped = solve_grouped_with_progress(
        order.amount,
        &order.denominations,
        order.stock.as_ref(),
        order.max_variants,
        config,
        |blocks, solutions| on_event(&PlanEvent::BlockCountSearched { blocks, solutions }),
    );
    finish_plan(order, config, grouped, on_event)
}

/// Turns the ranked grouped result into a plan, running the loose fallback
/// when it is empty.
fn finish_plan(
    order: &ValidatedOrder,
    config: &BundleConfig,
    grouped: Vec<GroupedSolution>,
    mut on_event: impl FnMut(&PlanEvent),
) -> Result<OrderPlan, PlanError> {
    let denominations = &order.denominations;

    let (has_grouped, variants) = if !grouped.is_empty() {
        let variants: Vec<Variant> = grouped
            .iter()
            .map(|s| Variant::grouped(s, denominations, config.bundle_size))
            .collect();
        (true, variants)
    } else {
        on_event(&PlanEvent::FallbackStarted);
        on_event(&PlanEvent::SearchStarted {
            mode: VariantKind::Loose,
        });
        let loose = solve_loose(
            order.amount,
            denominations,
            order.stock.as_ref(),
            order.max_variants,
            config,
        );
        if loose.is_empty() {
            on_event(&PlanEvent::Finished {
                mode: None,
                variants: 0,
            });
            return Err(PlanError::Infeasible);
        }
        let variants: Vec<Variant> = loose
            .iter()
            .map(|a| Variant::loose(a, denominations, config.bundle_size))
            .collect();
        (false, variants)
    };

    for (idx, variant) in variants.iter().enumerate() {
        on_event(&PlanEvent::VariantSelected {
            rank: idx + 1,
            variant: variant.clone(),
        });
    }

    let plan = OrderPlan {
        amount: order.amount,
        currency: order.currency.clone(),
        bundle_size: config.bundle_size,
        block_size: config.block_size,
        has_grouped,
        variants,
    };
    on_event(&PlanEvent::Finished {
        mode: Some(plan.mode()),
        variants: plan.variant_count(),
    });
    Ok(plan)
}
