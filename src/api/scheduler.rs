use axum::{extract::State, Json};
use tracing::info;

use crate::api::response::ApiResult;
use crate::api::AppState;
use crate::engine::SweepReport;

/// Runs one sweep right away, alongside the periodic loop. Claims keep the
/// two from advancing the same execution twice.
pub async fn run_scheduler(State(state): State<AppState>) -> ApiResult<SweepReport> {
    let report = state.scheduler.run_once().await?;
    info!("Manual sweep claimed {} execution(s)", report.claimed);
    Ok(Json(report))
}
