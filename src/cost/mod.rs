//! Daily spend tracking and provider selection

use crate::provider::{ProviderError, TextProvider};
use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, warn};

/// Which provider a request should go to
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PreferredProvider {
    #[default]
    ProviderA,
    ProviderB,
    /// Cheapest provider still under the daily budget
    Auto,
}

impl std::fmt::Display for PreferredProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PreferredProvider::ProviderA => write!(f, "providerA"),
            PreferredProvider::ProviderB => write!(f, "providerB"),
            PreferredProvider::Auto => write!(f, "auto"),
        }
    }
}

#[derive(Debug)]
struct DailySpend {
    day: NaiveDate,
    by_provider: HashMap<String, f64>,
}

impl DailySpend {
    /// Reset counters when the UTC date changes
    fn roll_to(&mut self, today: NaiveDate) {
        if today != self.day {
            debug!("New cost day {}, resetting spend", today);
            self.day = today;
            self.by_provider.clear();
        }
    }
}

/// Per-provider spend for the current UTC day
#[derive(Debug)]
pub struct CostTracker {
    spend: Mutex<DailySpend>,
    max_daily_cost: f64,
    enabled: bool,
}

impl CostTracker {
    pub fn new(max_daily_cost: f64, enabled: bool) -> Self {
        Self {
            spend: Mutex::new(DailySpend {
                day: today(),
                by_provider: HashMap::new(),
            }),
            max_daily_cost,
            enabled,
        }
    }

    pub fn record(&self, provider: &str, cost: f64) {
        self.record_on(today(), provider, cost);
    }

    pub fn spent_today(&self, provider: &str) -> f64 {
        self.spent_on(today(), provider)
    }

    pub fn total_today(&self) -> f64 {
        let mut spend = self.lock();
        spend.roll_to(today());
        spend.by_provider.values().sum()
    }

    fn record_on(&self, day: NaiveDate, provider: &str, cost: f64) {
        let mut spend = self.lock();
        spend.roll_to(day);
        *spend.by_provider.entry(provider.to_string()).or_insert(0.0) += cost;
    }

    fn spent_on(&self, day: NaiveDate, provider: &str) -> f64 {
        let mut spend = self.lock();
        spend.roll_to(day);
        spend.by_provider.get(provider).copied().unwrap_or(0.0)
    }

    fn under_budget(&self, provider: &str) -> bool {
        !self.enabled || self.spent_today(provider) < self.max_daily_cost
    }

    /// Pick the provider for the next call
    ///
    /// A pinned provider over budget, or `Auto` with every provider over budget, is a
    /// [`ProviderError::Quota`].
    pub fn select<'a>(
        &self,
        preferred: PreferredProvider,
        primary: &'a Arc<dyn TextProvider>,
        secondary: Option<&'a Arc<dyn TextProvider>>,
    ) -> Result<&'a Arc<dyn TextProvider>, ProviderError> {
        let pinned = match preferred {
            PreferredProvider::ProviderA => Some(primary),
            PreferredProvider::ProviderB => Some(secondary.unwrap_or(primary)),
            PreferredProvider::Auto => None,
        };

        if let Some(provider) = pinned {
            if self.under_budget(provider.name()) {
                return Ok(provider);
            }
            warn!("Daily budget exhausted for {}", provider.name());
            return Err(ProviderError::Quota(format!(
                "{} has spent its daily budget of ${:.2}",
                provider.name(),
                self.max_daily_cost
            )));
        }

        let chosen = std::iter::once(primary)
            .chain(secondary)
            .filter(|p| self.under_budget(p.name()))
            .min_by(|a, b| {
                unit_price(a)
                    .partial_cmp(&unit_price(b))
                    .unwrap_or(std::cmp::Ordering::Equal)
            });

        match chosen {
            Some(provider) => {
                debug!("Auto-selected provider {}", provider.name());
                Ok(provider)
            }
            None => {
                warn!("Daily budget exhausted for every provider");
                Err(ProviderError::Quota(format!(
                    "All providers have spent their daily budget of ${:.2}",
                    self.max_daily_cost
                )))
            }
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, DailySpend> {
        self.spend.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn unit_price(provider: &Arc<dyn TextProvider>) -> f64 {
    let pricing = provider.pricing();
    pricing.input_per_1k + pricing.output_per_1k
}

fn today() -> NaiveDate {
    Utc::now().date_naive()
}
