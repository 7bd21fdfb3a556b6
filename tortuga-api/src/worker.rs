use chrono::Utc;
use std::sync::Arc;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tortuga_order::AgencyDeadlineSweeper;
use tracing::{error, info};

/// Periodically revert agency blocks whose payment deadline has passed.
pub async fn start_agency_deadline_worker(sweeper: Arc<AgencyDeadlineSweeper>, every: Duration) {
    let mut ticker = interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    info!("Agency deadline worker started, sweeping every {:?}", every);

    loop {
        ticker.tick().await;
        match sweeper.expire_agency_blocks(Utc::now()).await {
            Ok(report) if report.failed > 0 => {
                error!(
                    lapsed = report.lapsed.len(),
                    failed = report.failed,
                    "Agency deadline sweep finished with failures"
                );
            }
            Ok(_) => {}
            Err(e) => error!("Agency deadline sweep failed: {}", e),
        }
    }
}
