//! Runtime configuration for the fulfillment services.
//!
//! Values come from environment variables; anything missing or unparsable
//! falls back to the default for that field.

use std::time::Duration;

use tracing::warn;

use storekeep_core::Deadline;
use storekeep_orders::TaxRate;

use crate::retry::RetryPolicy;

pub const ENV_TAX_RATE_BPS: &str = "STOREKEEP_TAX_RATE_BPS";
pub const ENV_LOCK_TIMEOUT_MS: &str = "STOREKEEP_LOCK_TIMEOUT_MS";
pub const ENV_RETRY_BASE_DELAY_MS: &str = "STOREKEEP_RETRY_BASE_DELAY_MS";
pub const ENV_RETRY_MAX_DELAY_MS: &str = "STOREKEEP_RETRY_MAX_DELAY_MS";
pub const ENV_ORDER_NUMBER_ATTEMPTS: &str = "STOREKEEP_ORDER_NUMBER_ATTEMPTS";
pub const ENV_DATABASE_URL: &str = "DATABASE_URL";

#[derive(Debug, Clone, PartialEq)]
pub struct FulfillmentConfig {
    pub tax_rate: TaxRate,
    /// Default deadline for per-key compare-and-set loops when the caller
    /// does not supply one.
    pub lock_timeout: Duration,
    pub retry: RetryPolicy,
    /// How many order numbers to try before giving up on a placement.
    pub order_number_attempts: u32,
    pub database_url: Option<String>,
}

impl Default for FulfillmentConfig {
    fn default() -> Self {
        Self {
            tax_rate: TaxRate::DEFAULT,
            lock_timeout: Duration::from_millis(5_000),
            retry: RetryPolicy::default(),
            order_number_attempts: 5,
            database_url: None,
        }
    }
}

impl FulfillmentConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup (tests pass a map).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();

        let tax_rate = parse_var::<u32>(&lookup, ENV_TAX_RATE_BPS)
            .and_then(|bps| match TaxRate::from_basis_points(bps) {
                Ok(rate) => Some(rate),
                Err(e) => {
                    warn!(var = ENV_TAX_RATE_BPS, error = %e, "ignoring tax rate");
                    None
                }
            })
            .unwrap_or(defaults.tax_rate);

        let lock_timeout = parse_var::<u64>(&lookup, ENV_LOCK_TIMEOUT_MS)
            .map(Duration::from_millis)
            .unwrap_or(defaults.lock_timeout);

        let base_delay = parse_var::<u64>(&lookup, ENV_RETRY_BASE_DELAY_MS)
            .map(Duration::from_millis)
            .unwrap_or(defaults.retry.base_delay);
        let max_delay = parse_var::<u64>(&lookup, ENV_RETRY_MAX_DELAY_MS)
            .map(Duration::from_millis)
            .unwrap_or(defaults.retry.max_delay)
            .max(base_delay);

        let order_number_attempts = parse_var::<u32>(&lookup, ENV_ORDER_NUMBER_ATTEMPTS)
            .filter(|n| *n > 0)
            .unwrap_or(defaults.order_number_attempts);

        let database_url = lookup(ENV_DATABASE_URL).filter(|url| !url.trim().is_empty());

        Self {
            tax_rate,
            lock_timeout,
            retry: RetryPolicy::exponential(base_delay, max_delay),
            order_number_attempts,
            database_url,
        }
    }

    /// Deadline starting now, bounded by `lock_timeout`.
    pub fn default_deadline(&self) -> Deadline {
        Deadline::within(self.lock_timeout)
    }
}

fn parse_var<T: core::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse::<T>() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(var = key, value = %raw, "unparsable configuration value, using default");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn empty_environment_yields_defaults() {
        let config = FulfillmentConfig::from_lookup(lookup(&[]));
        assert_eq!(config, FulfillmentConfig::default());
        assert_eq!(config.tax_rate.basis_points(), 1000);
    }

    #[test]
    fn values_are_read_and_bad_ones_ignored() {
        let config = FulfillmentConfig::from_lookup(lookup(&[
            (ENV_TAX_RATE_BPS, "825"),
            (ENV_LOCK_TIMEOUT_MS, "not-a-number"),
            (ENV_RETRY_BASE_DELAY_MS, "2"),
            (ENV_RETRY_MAX_DELAY_MS, "20"),
            (ENV_ORDER_NUMBER_ATTEMPTS, "0"),
            (ENV_DATABASE_URL, "postgres://localhost/storekeep"),
        ]));

        assert_eq!(config.tax_rate.basis_points(), 825);
        assert_eq!(config.lock_timeout, Duration::from_millis(5_000));
        assert_eq!(config.retry.base_delay, Duration::from_millis(2));
        assert_eq!(config.retry.max_delay, Duration::from_millis(20));
        assert_eq!(config.order_number_attempts, 5);
        assert_eq!(
            config.database_url.as_deref(),
            Some("postgres://localhost/storekeep")
        );
    }

    #[test]
    fn out_of_range_tax_rate_falls_back() {
        let config = FulfillmentConfig::from_lookup(lookup(&[(ENV_TAX_RATE_BPS, "20000")]));
        assert_eq!(config.tax_rate, TaxRate::DEFAULT);
    }
}
