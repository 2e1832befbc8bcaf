//! Structured observability hooks for the campaign lifecycle.
//!
//! This module provides:
//! - Campaign-scoped tracing spans via the `CampaignSpan` RAII guard
//! - Emission functions for key lifecycle events: campaign start/finish,
//!   run admission, skip and completion

use tracing::info;

use crate::results::CampaignRunResult;

/// RAII guard that enters a campaign-scoped span for its lifetime.
///
/// Only hold this in synchronous sections; async code should use
/// [`campaign_span`] with `Instrument` instead.
pub struct CampaignSpan {
    _span: tracing::span::EnteredSpan,
}

impl CampaignSpan {
    /// Create and enter a span tagged with the campaign id.
    pub fn enter(campaign_id: &str) -> Self {
        Self {
            _span: campaign_span(campaign_id).entered(),
        }
    }
}

/// Span tagged with the campaign id.
pub fn campaign_span(campaign_id: &str) -> tracing::Span {
    tracing::info_span!("quantbench.campaign", campaign_id = %campaign_id)
}

pub fn emit_campaign_started(campaign_id: &str, campaign_name: &str, runs: usize, resumed: bool) {
    info!(
        event = "campaign.started",
        campaign_id = %campaign_id,
        campaign_name = %campaign_name,
        runs = runs,
        resumed = resumed,
    );
}

/// Emit event: a run passed admission and its download is starting.
pub fn emit_run_admitted(key: &str, estimated_size_gb: f64) {
    info!(event = "run.admitted", run_key = %key, estimated_size_gb = estimated_size_gb);
}

/// Emit event: a run was skipped (warning level).
pub fn emit_run_skipped(key: &str, reason: &str) {
    tracing::warn!(event = "run.skipped", run_key = %key, reason = %reason);
}

/// Emit event: a run's outcome was recorded.
pub fn emit_run_finished(result: &CampaignRunResult) {
    info!(
        event = "run.finished",
        model = %result.model_name,
        engine = %result.engine_name,
        quant = %result.quant,
        status = %result.status,
        duration_s = result.duration_s,
        error = result.error.as_deref().unwrap_or(""),
    );
}

/// Emit event: campaign finished with its aggregate outcome.
pub fn emit_campaign_finished(
    campaign_id: &str,
    total: usize,
    succeeded: usize,
    failed: usize,
    skipped: usize,
    success_rate: f64,
) {
    info!(
        event = "campaign.finished",
        campaign_id = %campaign_id,
        total = total,
        succeeded = succeeded,
        failed = failed,
        skipped = skipped,
        success_rate = success_rate,
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_campaign_span_create() {
        let _span = CampaignSpan::enter("test-campaign");
        emit_run_admitted("M|vllm|bf16", 16.0);
    }
}
