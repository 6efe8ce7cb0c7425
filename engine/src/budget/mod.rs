//! Model spend ceiling
//!
//! Every successful model call records its estimated cost in the
//! `model_spend` table. Before each call the router asks the limiter whether
//! the rolling 24 hour total is still under the configured ceiling. Once it
//! is not, calls are refused with a distinguishable signal so lanes can tell
//! "out of budget" apart from "provider broken".
//!
//! A ceiling of 0 disables the check. Entries older than the window are
//! pruned when new spend is recorded.

use anyhow::{Context, Result};
use sqlx::SqlitePool;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};

const WINDOW_MS: u64 = 24 * 60 * 60 * 1000;

/// Spend position inside the current window
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BudgetStatus {
    pub spent: f64,
    pub ceiling: f64,
}

impl BudgetStatus {
    pub fn allows_calls(&self) -> bool {
        self.ceiling <= 0.0 || self.spent < self.ceiling
    }
}

pub struct BudgetLimiter {
    pool: SqlitePool,
    ceiling_usd: f64,
}

impl BudgetLimiter {
    pub fn new(pool: SqlitePool, ceiling_usd: f64) -> Self {
        Self {
            pool,
            ceiling_usd: ceiling_usd.max(0.0),
        }
    }

    pub fn ceiling(&self) -> f64 {
        self.ceiling_usd
    }

    /// Current spend in the rolling window.
    pub async fn status(&self) -> Result<BudgetStatus> {
        if self.ceiling_usd <= 0.0 {
            return Ok(BudgetStatus {
                spent: 0.0,
                ceiling: 0.0,
            });
        }

        let since = now_ms()?.saturating_sub(WINDOW_MS) as i64;
        let spent: (f64,) = sqlx::query_as(
            "SELECT COALESCE(SUM(cost_usd), 0.0) FROM model_spend WHERE timestamp >= ?",
        )
        .bind(since)
        .fetch_one(&self.pool)
        .await
        .context("Failed to sum model spend")?;

        let status = BudgetStatus {
            spent: spent.0,
            ceiling: self.ceiling_usd,
        };

        debug!(
            "Budget check: ${:.4} of ${:.2} spent in window",
            status.spent, status.ceiling
        );
        if !status.allows_calls() {
            warn!(
                "Model spend ceiling reached: ${:.2} of ${:.2}",
                status.spent, status.ceiling
            );
        }

        Ok(status)
    }

    /// Record the cost of one completed call.
    pub async fn record_spend(&self, provider: &str, tokens: usize, cost_usd: f64) -> Result<()> {
        let now = now_ms()?;

        sqlx::query(
            "INSERT INTO model_spend (provider, tokens, cost_usd, timestamp) VALUES (?, ?, ?, ?)",
        )
        .bind(provider)
        .bind(tokens as i64)
        .bind(cost_usd)
        .bind(now as i64)
        .execute(&self.pool)
        .await
        .context("Failed to record model spend")?;

        self.cleanup_old_entries(now).await
    }

    async fn cleanup_old_entries(&self, now: u64) -> Result<()> {
        let cutoff = now.saturating_sub(WINDOW_MS) as i64;

        let result = sqlx::query("DELETE FROM model_spend WHERE timestamp < ?")
            .bind(cutoff)
            .execute(&self.pool)
            .await
            .context("Failed to clean up old spend entries")?;

        if result.rows_affected() > 0 {
            debug!("Pruned {} old spend entries", result.rows_affected());
        }

        Ok(())
    }
}

fn now_ms() -> Result<u64> {
    Ok(SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .context("Failed to get current time")?
        .as_millis() as u64)
}
