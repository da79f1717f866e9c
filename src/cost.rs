//! Cost tracking and budget accounting.
//!
//! Tracks spend per provider, per model, and per calendar month, and
//! projects month-end spend by linear extrapolation from month-to-date.
//!
//! All amounts are tracked internally in micro-dollars (millionths of a
//! dollar) so typical per-request costs around a tenth of a cent do not
//! round to zero. Public methods accept and return dollar amounts.

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

const MICROS_PER_DOLLAR: f64 = 1_000_000.0;

fn dollars_to_micros(dollars: f64) -> u64 {
    (dollars.max(0.0) * MICROS_PER_DOLLAR).round() as u64
}

fn micros_to_dollars(micros: u64) -> f64 {
    micros as f64 / MICROS_PER_DOLLAR
}

fn month_key(now: DateTime<Utc>) -> String {
    format!("{:04}-{:02}", now.year(), now.month())
}

fn days_in_month(now: DateTime<Utc>) -> u32 {
    let (year, month) = (now.year(), now.month());
    let first_of_next = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)
    };
    first_of_next
        .and_then(|d| d.pred_opt())
        .map(|d| d.day())
        .unwrap_or(30)
}

/// Thread-safe spend tracker with per-provider, per-model, and
/// per-month breakdowns.
pub struct CostTracker {
    monthly_budget_micros: u64,
    total_micros: AtomicU64,
    by_provider: RwLock<HashMap<String, u64>>,
    by_model: RwLock<HashMap<String, u64>>,
    /// Spend keyed by "YYYY-MM". Month boundaries never reset totals;
    /// a new month simply accumulates under a new key.
    by_month: RwLock<HashMap<String, u64>>,
}

/// Point-in-time view of the spend breakdown.
#[derive(Debug, Clone, Serialize)]
pub struct CostSnapshot {
    /// Total spend in dollars since the tracker was created.
    pub total: f64,
    /// Spend per provider in dollars.
    pub per_provider: HashMap<String, f64>,
    /// Spend per model in dollars.
    pub per_model: HashMap<String, f64>,
    /// Month-end spend projected from month-to-date.
    pub projected_monthly: f64,
    /// Current-month spend as a fraction of the monthly budget.
    pub budget_utilization: f64,
}

impl CostTracker {
    /// Creates a tracker with the given monthly budget in dollars.
    pub fn new(monthly_budget: f64) -> Self {
        Self {
            monthly_budget_micros: dollars_to_micros(monthly_budget),
            total_micros: AtomicU64::new(0),
            by_provider: RwLock::new(HashMap::new()),
            by_model: RwLock::new(HashMap::new()),
            by_month: RwLock::new(HashMap::new()),
        }
    }

    /// Records spend for a completed provider call.
    pub fn record(&self, provider: &str, model: &str, cost_dollars: f64) {
        self.record_at(provider, model, cost_dollars, Utc::now());
    }

    /// Records spend at an explicit timestamp.
    pub fn record_at(&self, provider: &str, model: &str, cost_dollars: f64, now: DateTime<Utc>) {
        let micros = dollars_to_micros(cost_dollars);
        self.total_micros.fetch_add(micros, Ordering::SeqCst);

        {
            let mut by_provider = self
                .by_provider
                .write()
                .expect("by_provider lock poisoned");
            *by_provider.entry(provider.to_string()).or_insert(0) += micros;
        }
        {
            let mut by_model = self.by_model.write().expect("by_model lock poisoned");
            *by_model.entry(model.to_string()).or_insert(0) += micros;
        }
        {
            let mut by_month = self.by_month.write().expect("by_month lock poisoned");
            *by_month.entry(month_key(now)).or_insert(0) += micros;
        }

        tracing::debug!(
            provider = provider,
            model = model,
            cost_dollars = cost_dollars,
            "Recorded request cost"
        );
    }

    /// Monthly budget in dollars.
    pub fn monthly_budget(&self) -> f64 {
        micros_to_dollars(self.monthly_budget_micros)
    }

    /// Spend recorded for one provider, in dollars.
    pub fn provider_spent(&self, provider: &str) -> f64 {
        let by_provider = self.by_provider.read().expect("by_provider lock poisoned");
        micros_to_dollars(by_provider.get(provider).copied().unwrap_or(0))
    }

    /// Mean spend across all providers that have recorded spend, in
    /// dollars. Returns 0.0 when nothing has been recorded.
    pub fn average_provider_cost(&self) -> f64 {
        let by_provider = self.by_provider.read().expect("by_provider lock poisoned");
        if by_provider.is_empty() {
            return 0.0;
        }
        let total: u64 = by_provider.values().sum();
        micros_to_dollars(total) / by_provider.len() as f64
    }

    /// Takes a snapshot of the breakdown as of now.
    pub fn snapshot(&self) -> CostSnapshot {
        self.snapshot_at(Utc::now())
    }

    /// Takes a snapshot as of an explicit timestamp.
    ///
    /// Projection is linear: month spend scaled by days-in-month over
    /// day-of-month. On day one the projection is the full month at
    /// today's run rate.
    pub fn snapshot_at(&self, now: DateTime<Utc>) -> CostSnapshot {
        let per_provider = {
            let by_provider = self.by_provider.read().expect("by_provider lock poisoned");
            by_provider
                .iter()
                .map(|(k, v)| (k.clone(), micros_to_dollars(*v)))
                .collect()
        };
        let per_model = {
            let by_model = self.by_model.read().expect("by_model lock poisoned");
            by_model
                .iter()
                .map(|(k, v)| (k.clone(), micros_to_dollars(*v)))
                .collect()
        };

        let month_spend = {
            let by_month = self.by_month.read().expect("by_month lock poisoned");
            micros_to_dollars(by_month.get(&month_key(now)).copied().unwrap_or(0))
        };

        let projected_monthly = month_spend * days_in_month(now) as f64 / now.day() as f64;
        let budget = micros_to_dollars(self.monthly_budget_micros);
        let budget_utilization = if budget > 0.0 {
            month_spend / budget
        } else {
            0.0
        };

        CostSnapshot {
            total: micros_to_dollars(self.total_micros.load(Ordering::SeqCst)),
            per_provider,
            per_model,
            projected_monthly,
            budget_utilization,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(year: i32, month: u32, day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(year, month, day, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_sub_cent_costs_accumulate() {
        let tracker = CostTracker::new(100.0);
        for _ in 0..500 {
            tracker.record("openai", "gpt-4", 0.002);
        }

        let snapshot = tracker.snapshot();
        assert!((snapshot.total - 1.0).abs() < 1e-9);
        assert!((tracker.provider_spent("openai") - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_breakdowns_by_provider_and_model() {
        let tracker = CostTracker::new(100.0);
        tracker.record("openai", "gpt-4", 0.01);
        tracker.record("openai", "gpt-4o-mini", 0.001);
        tracker.record("anthropic", "claude-3", 0.008);

        let snapshot = tracker.snapshot();
        assert!((snapshot.per_provider["openai"] - 0.011).abs() < 1e-9);
        assert!((snapshot.per_provider["anthropic"] - 0.008).abs() < 1e-9);
        assert!((snapshot.per_model["gpt-4"] - 0.01).abs() < 1e-9);
        assert_eq!(snapshot.per_provider.len(), 2);
        assert_eq!(snapshot.per_model.len(), 3);
    }

    #[test]
    fn test_projection_scales_by_day_of_month() {
        let tracker = CostTracker::new(100.0);
        // $10 spent by the 10th of a 30-day month projects to $30.
        tracker.record_at("openai", "gpt-4", 10.0, at(2026, 6, 10));

        let snapshot = tracker.snapshot_at(at(2026, 6, 10));
        assert!((snapshot.projected_monthly - 30.0).abs() < 1e-6);
        assert!((snapshot.budget_utilization - 0.1).abs() < 1e-9);
    }

    #[test]
    fn test_projection_on_first_day() {
        let tracker = CostTracker::new(100.0);
        tracker.record_at("openai", "gpt-4", 2.0, at(2026, 7, 1));

        let snapshot = tracker.snapshot_at(at(2026, 7, 1));
        // 31-day month at $2/day.
        assert!((snapshot.projected_monthly - 62.0).abs() < 1e-6);
    }

    #[test]
    fn test_month_boundary_does_not_reset_totals() {
        let tracker = CostTracker::new(100.0);
        tracker.record_at("openai", "gpt-4", 5.0, at(2026, 1, 31));
        tracker.record_at("openai", "gpt-4", 1.0, at(2026, 2, 1));

        let snapshot = tracker.snapshot_at(at(2026, 2, 1));
        assert!((snapshot.total - 6.0).abs() < 1e-9);
        // Utilization only counts the current month.
        assert!((snapshot.budget_utilization - 0.01).abs() < 1e-9);
    }

    #[test]
    fn test_average_provider_cost() {
        let tracker = CostTracker::new(100.0);
        assert_eq!(tracker.average_provider_cost(), 0.0);

        tracker.record("a", "m", 3.0);
        tracker.record("b", "m", 1.0);
        assert!((tracker.average_provider_cost() - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_days_in_month() {
        assert_eq!(days_in_month(at(2026, 2, 1)), 28);
        assert_eq!(days_in_month(at(2028, 2, 1)), 29);
        assert_eq!(days_in_month(at(2026, 12, 15)), 31);
    }
}
