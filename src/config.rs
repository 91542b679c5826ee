use std::env;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::num::NonZeroUsize;

use tracing::{info, warn};

use crate::model::{CurrencyTable, DenominationSet};
use crate::optimizer::BundleConfig;
use crate::order::{OrderLimits, PartialStockPolicy};

/// Complete application configuration, loaded from environment variables or default values.
#[derive(Clone, Debug)]
pub struct AppConfig {
    pub api: ApiConfig,
    pub optimizer: OptimizerConfig,
    pub render: RenderConfig,
}

impl AppConfig {
    /// Creates a configuration from the currently available environment variables.
    pub fn from_env() -> Self {
        Self {
            api: ApiConfig::from_env(),
            optimizer: OptimizerConfig::from_env(),
            render: RenderConfig::from_env(),
        }
    }
}

/// Configuration for the API server.
#[derive(Clone, Debug)]
pub struct ApiConfig {
    bind_ip: IpAddr,
    display_host: String,
    port: u16,
}

impl ApiConfig {
    const DEFAULT_HOST: &'static str = "0.0.0.0";
    const DEFAULT_PORT: u16 = 8080;
    const HOST_VAR: &'static str = "BUNDLE_PLANNER_API_HOST";
    const PORT_VAR: &'static str = "BUNDLE_PLANNER_API_PORT";

    fn from_env() -> Self {
        let host_value =
            env_string(Self::HOST_VAR).unwrap_or_else(|| Self::DEFAULT_HOST.to_string());
        let (bind_ip, effective_host) = match host_value.parse::<IpAddr>() {
            Ok(ip) => (ip, host_value),
            Err(err) => {
                warn!(
                    "Could not parse {} ('{}'): {}. Using {}.",
                    Self::HOST_VAR,
                    host_value,
                    err,
                    Self::DEFAULT_HOST
                );
                (
                    IpAddr::V4(Ipv4Addr::UNSPECIFIED),
                    Self::DEFAULT_HOST.to_string(),
                )
            }
        };

        let port = match env_string(Self::PORT_VAR) {
            Some(raw) => match raw.parse::<u16>() {
                Ok(value) if value != 0 => value,
                Ok(_) => {
                    warn!(
                        "{} must not be 0. Using {}.",
                        Self::PORT_VAR,
                        Self::DEFAULT_PORT
                    );
                    Self::DEFAULT_PORT
                }
                Err(err) => {
                    warn!(
                        "Could not parse {} ('{}'): {}. Using {}.",
                        Self::PORT_VAR,
                        raw,
                        err,
                        Self::DEFAULT_PORT
                    );
                    Self::DEFAULT_PORT
                }
            },
            None => Self::DEFAULT_PORT,
        };

        Self {
            bind_ip,
            display_host: effective_host,
            port,
        }
    }

    /// Socket address to bind the server to.
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_ip, self.port)
    }

    /// Visible hostname for logging and hints.
    pub fn display_host(&self) -> &str {
        &self.display_host
    }

    /// Configured port.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Indicates whether binding to all interfaces.
    pub fn binds_to_all_interfaces(&self) -> bool {
        match self.bind_ip {
            IpAddr::V4(addr) => addr == Ipv4Addr::UNSPECIFIED,
            IpAddr::V6(addr) => addr == Ipv6Addr::UNSPECIFIED,
        }
    }

    /// Checks whether the hostname matches the default value.
    pub fn uses_default_host(&self) -> bool {
        self.display_host == Self::DEFAULT_HOST
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind_ip: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            display_host: Self::DEFAULT_HOST.to_string(),
            port: Self::DEFAULT_PORT,
        }
    }
}

/// Configuration for the allocation search and order validation.
#[derive(Clone, Debug)]
pub struct OptimizerConfig {
    bundle: BundleConfig,
    limits: OrderLimits,
    currencies: CurrencyTable,
}

impl OptimizerConfig {
    const BUNDLE_SIZE_VAR: &'static str = "BUNDLE_PLANNER_BUNDLE_SIZE";
    const BLOCK_SIZE_VAR: &'static str = "BUNDLE_PLANNER_BLOCK_SIZE";
    const DEFAULT_VARIANTS_VAR: &'static str = "BUNDLE_PLANNER_DEFAULT_VARIANTS";
    const MAX_VARIANTS_VAR: &'static str = "BUNDLE_PLANNER_MAX_VARIANTS";
    const PARTIAL_STOCK_VAR: &'static str = "BUNDLE_PLANNER_PARTIAL_STOCK";
    const EXTRA_CURRENCIES_VAR: &'static str = "BUNDLE_PLANNER_EXTRA_CURRENCIES";

    pub const DEFAULT_VARIANTS: u64 = 5;
    pub const DEFAULT_MAX_VARIANTS: u64 = 50;

    fn from_env() -> Self {
        let bundle_size = load_u64_with_warning(
            Self::BUNDLE_SIZE_VAR,
            BundleConfig::DEFAULT_BUNDLE_SIZE,
            |value| value > 0,
            "must be greater than 0",
            "Adjusted bundle size changes which amounts are accepted",
        );

        let block_size = load_u64_with_warning(
            Self::BLOCK_SIZE_VAR,
            BundleConfig::DEFAULT_BLOCK_SIZE,
            |value| value > 0,
            "must be greater than 0",
            "Adjusted block size changes which grouped variants exist",
        );

        let default_variants = load_u64_with_warning(
            Self::DEFAULT_VARIANTS_VAR,
            Self::DEFAULT_VARIANTS,
            |value| value > 0,
            "must be greater than 0",
            "Adjusted default variant count",
        );

        let max_variants = load_u64_with_warning(
            Self::MAX_VARIANTS_VAR,
            Self::DEFAULT_MAX_VARIANTS,
            |value| value >= default_variants,
            "must not be smaller than the default variant count",
            "Adjusted variant ceiling",
        );

        let partial_stock = env_string(Self::PARTIAL_STOCK_VAR)
            .and_then(|raw| {
                let parsed = PartialStockPolicy::parse(&raw);
                if parsed.is_none() {
                    warn!(
                        "Could not interpret {} ('{}'); expected 'forbid' or 'unlimited'. Using forbid.",
                        Self::PARTIAL_STOCK_VAR,
                        raw
                    );
                }
                parsed
            })
            .unwrap_or(PartialStockPolicy::Forbid);

        let currencies = match env_string(Self::EXTRA_CURRENCIES_VAR) {
            Some(raw) => parse_currency_list(&raw, CurrencyTable::default()),
            None => CurrencyTable::default(),
        };

        Self {
            bundle: BundleConfig::builder()
                .bundle_size(bundle_size)
                .block_size(block_size)
                .build(),
            limits: OrderLimits {
                bundle_size,
                default_variants: to_non_zero(default_variants),
                max_variants: to_non_zero(max_variants),
                partial_stock,
            },
            currencies,
        }
    }

    /// Returns the configured bundle and block sizes.
    pub fn bundle_config(&self) -> BundleConfig {
        self.bundle
    }

    /// Returns the limits used to validate incoming orders.
    pub fn order_limits(&self) -> OrderLimits {
        self.limits
    }

    /// Returns the currency table.
    pub fn currencies(&self) -> &CurrencyTable {
        &self.currencies
    }
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        let bundle = BundleConfig::default();
        Self {
            bundle,
            limits: OrderLimits {
                bundle_size: bundle.bundle_size,
                default_variants: to_non_zero(Self::DEFAULT_VARIANTS),
                max_variants: to_non_zero(Self::DEFAULT_MAX_VARIANTS),
                partial_stock: PartialStockPolicy::Forbid,
            },
            currencies: CurrencyTable::default(),
        }
    }
}

/// Configuration for terminal output.
#[derive(Clone, Debug)]
pub struct RenderConfig {
    colour: bool,
}

impl RenderConfig {
    const COLOR_VAR: &'static str = "BUNDLE_PLANNER_COLOR";

    fn from_env() -> Self {
        let no_color = env::var_os("NO_COLOR").is_some_and(|v| !v.is_empty());
        let colour = env_string(Self::COLOR_VAR)
            .and_then(|raw| parse_bool(&raw, Self::COLOR_VAR))
            .unwrap_or(!no_color);
        Self { colour }
    }

    /// Whether ANSI colours are enabled.
    pub fn colour(&self) -> bool {
        self.colour
    }
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self { colour: true }
    }
}

fn to_non_zero(value: u64) -> NonZeroUsize {
    usize::try_from(value)
        .ok()
        .and_then(NonZeroUsize::new)
        .unwrap_or(NonZeroUsize::MIN)
}

/// Parses `CODE=D1,D2,...;CODE=...` and adds each currency to `table`.
///
/// Malformed entries are skipped with a warning.
fn parse_currency_list(raw: &str, table: CurrencyTable) -> CurrencyTable {
    raw.split(';')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .fold(table, |table, entry| {
            let Some((code, values)) = entry.split_once('=') else {
                warn!("Ignoring currency entry '{}': expected CODE=D1,D2,...", entry);
                return table;
            };
            let parsed: Result<Vec<u64>, _> = values
                .split(',')
                .map(|v| v.trim().parse::<u64>())
                .collect();
            match parsed
                .map_err(|err| err.to_string())
                .and_then(|values| DenominationSet::new(values).map_err(|err| err.to_string()))
            {
                Ok(set) if !code.trim().is_empty() => {
                    info!("Registered currency {} with {:?}", code.trim(), set.as_slice());
                    table.with_currency(code, set)
                }
                Ok(_) => {
                    warn!("Ignoring currency entry '{}': empty currency code", entry);
                    table
                }
                Err(err) => {
                    warn!("Ignoring currency entry '{}': {}", entry, err);
                    table
                }
            }
        })
}

fn env_string(name: &str) -> Option<String> {
    match env::var(name) {
        Ok(value) => {
            let trimmed = value.trim();
            if trimmed.is_empty() {
                None
            } else {
                Some(trimmed.to_owned())
            }
        }
        Err(env::VarError::NotPresent) => None,
        Err(err) => {
            warn!("Access to {} failed: {}. Using default value.", name, err);
            None
        }
    }
}

fn parse_bool(raw: &str, var_name: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "y" | "on" => Some(true),
        "0" | "false" | "no" | "n" | "off" => Some(false),
        other => {
            warn!(
                "Could not interpret {} ('{}') as boolean value. Using default value.",
                var_name, other
            );
            None
        }
    }
}

fn load_u64_with_warning(
    var_name: &str,
    default: u64,
    validator: impl Fn(u64) -> bool,
    invalid_hint: &str,
    warning: &str,
) -> u64 {
    match env_string(var_name) {
        Some(raw) => match raw.parse::<u64>() {
            Ok(value) => {
                if !validator(value) {
                    warn!(
                        "{} contains invalid value '{}': {}. Using {}.",
                        var_name, raw, invalid_hint, default
                    );
                    default
                } else {
                    if value != default {
                        warn!("{} ({} = {}).", warning, var_name, value);
                    }
                    value
                }
            }
            Err(err) => {
                warn!(
                    "Could not parse {} ('{}') as number: {}. Using {}.",
                    var_name, raw, err, default
                );
                default
            }
        },
        None => default,
    }
}
