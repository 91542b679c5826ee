use std::collections::BTreeMap;

use clap::{Args, Parser, Subcommand};
use tracing::info;

use crate::config::AppConfig;
use crate::model::ValidationError;
use crate::optimizer::{PlanError, plan_order};
use crate::order::{OrderInput, StockQuantity};
use crate::render::{Palette, describe_plan};

#[derive(Debug, Parser)]
#[command(
    name = "bundle_planner",
    about = "Splits an order amount into bundles and full blocks",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the HTTP API and web UI (default)
    Serve,
    /// Plan a single order and print the variants
    Solve(SolveArgs),
}

#[derive(Debug, Args)]
struct SolveArgs {
    /// Order value, e.g. 300000
    #[arg(allow_negative_numbers = true)]
    amount: i64,

    /// Currency code (USD/EUR/JPY...)
    currency: String,

    /// Number of variants to show
    #[arg(short = 'n', long = "num", default_value_t = 5)]
    num: i64,

    /// Disable ANSI colours
    #[arg(long = "no-colour", alias = "no-color")]
    no_colour: bool,

    /// Bundles available per denomination, e.g. '100=25,50=8'
    #[arg(short, long, value_name = "SPEC")]
    stock: Option<String>,
}

/// What `main` should do after argument parsing.
pub enum Action {
    Serve,
    Exit(i32),
}

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("✘ {0} (even without full blocks).")]
    Plan(#[from] PlanError),
}

impl Cli {
    pub fn run(self, config: &AppConfig) -> Action {
        match self.command {
            None | Some(Command::Serve) => Action::Serve,
            Some(Command::Solve(args)) => match solve(args, config) {
                Ok(output) => {
                    println!("{output}");
                    Action::Exit(0)
                }
                Err(err) => {
                    eprintln!("{err}");
                    Action::Exit(1)
                }
            },
        }
    }
}

fn solve(args: SolveArgs, config: &AppConfig) -> Result<String, CliError> {
    let stock = args.stock.as_deref().map(parse_stock_spec).transpose()?;
    let input = OrderInput {
        amount: args.amount,
        currency: args.currency,
        stock,
        max_variants: Some(args.num),
    };
    let order = input.into_validated(
        config.optimizer.currencies(),
        &config.optimizer.order_limits(),
    )?;
    info!(
        amount = order.amount,
        currency = %order.currency,
        "planning order from command line"
    );

    let plan = plan_order(&order, &config.optimizer.bundle_config())?;
    let palette = Palette::for_terminal(config.render.colour() && !args.no_colour);
    Ok(describe_plan(&plan, &palette))
}

/// Parses `DENOM=QTY[,DENOM=QTY...]`.
///
/// Only the shape is checked here; denominations and quantities are
/// validated together with the rest of the order.
fn parse_stock_spec(spec: &str) -> Result<BTreeMap<String, StockQuantity>, ValidationError> {
    let mut out = BTreeMap::new();
    for entry in spec.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        let (denom, qty) = entry
            .split_once('=')
            .ok_or_else(|| ValidationError::InvalidStockEntry(entry.to_string()))?;
        let qty: i64 = qty
            .trim()
            .parse()
            .map_err(|_| ValidationError::InvalidStockEntry(entry.to_string()))?;
        out.insert(denom.trim().to_string(), StockQuantity::Count(qty));
    }
    Ok(out)
}
