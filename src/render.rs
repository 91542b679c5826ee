//! Plain-text rendering of order plans for the terminal.
//!
//! Each denomination gets its own ANSI colour so variants can be scanned at a
//! glance. A disabled `Palette` produces the same text without escapes.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use crate::model::{Variant, VariantKind};
use crate::optimizer::OrderPlan;

const RESET: &str = "\x1b[0m";
const SEPARATOR_WIDTH: usize = 60;

/// Denomination → ANSI escape table, fixed after construction.
#[derive(Clone, Debug, Default)]
pub struct Palette {
    colours: BTreeMap<u64, &'static str>,
}

impl Palette {
    /// The default colours: yellow, orange, blue and green, ordered by value.
    pub fn standard() -> Self {
        let colours = BTreeMap::from([
            (100, "\x1b[93m"),
            (50, "\x1b[38;5;208m"),
            (20, "\x1b[94m"),
            (10, "\x1b[92m"),
            (10000, "\x1b[93m"),
            (5000, "\x1b[38;5;208m"),
            (1000, "\x1b[92m"),
        ]);
        Self { colours }
    }

    /// A palette that emits no escape codes.
    pub fn plain() -> Self {
        Self::default()
    }

    pub fn for_terminal(enabled: bool) -> Self {
        if enabled {
            Self::standard()
        } else {
            Self::plain()
        }
    }

    fn paint(&self, text: &str, denomination: u64) -> String {
        match self.colours.get(&denomination) {
            Some(code) => format!("{code}{text}{RESET}"),
            None => text.to_string(),
        }
    }
}

/// Formats a number with `,` as thousands separator.
pub fn thousands(value: u64) -> String {
    let digits = value.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (idx, ch) in digits.chars().enumerate() {
        if idx > 0 && (digits.len() - idx) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}

/// Renders a single variant as a multi-line block.
pub fn describe_variant(variant: &Variant, palette: &Palette) -> String {
    let mut out = match variant.kind {
        VariantKind::Grouped => format!(
            "{} block(s) = {} bundles",
            variant.blocks, variant.total_bundles
        ),
        VariantKind::Loose => format!("No full blocks - {} bundle(s)", variant.total_bundles),
    };

    for line in &variant.breakdown {
        let label = format!("{:>2} x bundles of {}", line.bundles, line.denomination);
        let _ = write!(
            out,
            "\n  • {} → {}",
            palette.paint(&label, line.denomination),
            thousands(line.value)
        );
    }
    let _ = write!(out, "\nTOTAL: {}", thousands(variant.total_value));
    out
}

/// Renders every variant of a plan, separated by horizontal rules.
pub fn describe_plan(plan: &OrderPlan, palette: &Palette) -> String {
    let separator = format!("\n{}\n", "-".repeat(SEPARATOR_WIDTH));
    let body = plan
        .variants
        .iter()
        .map(|variant| describe_variant(variant, palette))
        .collect::<Vec<_>>()
        .join(&separator);

    if plan.has_grouped {
        body
    } else {
        format!("⚠ No full block possible. Showing loose-bundle variants:\n\n{body}")
    }
}
