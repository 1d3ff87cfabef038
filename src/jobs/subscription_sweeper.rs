//! Background job that flips lapsed subscriptions to `expired`.
//!
//! Reads always derive the status from `end_date`, so this only keeps the
//! stored field in step for queries and reporting.

use crate::{config::AppConfig, database::MongoDB, services::subscription_service};
use chrono::Utc;
use tokio::time::{interval, Duration};

const WARMUP_SECS: u64 = 10;

pub async fn start_subscription_sweeper(db: MongoDB, config: &AppConfig) {
    if !config.sweep_enabled {
        log::info!("⏸️  Subscription sweeper DISABLED (SUBSCRIPTION_SWEEP_ENABLED=false)");
        return;
    }

    let interval_secs = config.sweep_interval_secs;
    log::info!("🧹 Starting subscription sweeper (interval: {}s)", interval_secs);

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(WARMUP_SECS)).await;

        let mut tick_interval = interval(Duration::from_secs(interval_secs));
        let mut cycle: u64 = 0;

        loop {
            // First tick completes immediately
            tick_interval.tick().await;
            cycle += 1;
            run_sweep_cycle(&db, cycle).await;
        }
    });

    log::info!("✅ Subscription sweeper started");
}

async fn run_sweep_cycle(db: &MongoDB, cycle: u64) {
    let start = std::time::Instant::now();

    match subscription_service::sweep_expired(db, Utc::now()).await {
        Ok(0) => {
            log::debug!("🧹 Sweep #{}: nothing expired ({}ms)", cycle, start.elapsed().as_millis());
        }
        Ok(expired) => {
            log::info!(
                "🧹 Sweep #{}: {} subscription(s) marked expired ({}ms)",
                cycle,
                expired,
                start.elapsed().as_millis()
            );
        }
        Err(e) => {
            log::error!("❌ Subscription sweep #{} failed: {}", cycle, e);
        }
    }
}
