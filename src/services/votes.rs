use crate::error::{Error, Result};
use crate::models::{parse_report_id, VoteType};
use crate::services::reports::report_tally;
use crate::store::{ReportStore, VoteStore};
use crate::voting::Tally;
use log::{info, warn};
use serde::Deserialize;

/// Body of a vote cast. Both fields are optional here so that a missing one
/// surfaces as a validation error instead of a decode failure.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteRequest {
    #[serde(default)]
    pub vote_type: Option<String>,
    #[serde(default)]
    pub device_hash: Option<String>,
}

// The device hash is opaque: it is stored exactly as sent, whitespace included
fn validate(request: &VoteRequest) -> Result<(VoteType, String)> {
    let device_hash = request
        .device_hash
        .as_deref()
        .filter(|h| !h.is_empty())
        .ok_or_else(|| Error::validation("deviceHash is required"))?;

    let vote_type = request
        .vote_type
        .as_deref()
        .ok_or_else(|| Error::validation("voteType is required"))?
        .parse::<VoteType>()?;

    Ok((vote_type, device_hash.to_string()))
}

/// Records the device's vote on a report, replacing any earlier vote from
/// the same device, and returns the report's fresh tally.
pub async fn cast_vote(
    reports: &dyn ReportStore,
    votes: &dyn VoteStore,
    report_id: &str,
    request: &VoteRequest,
) -> Result<Tally> {
    let report_id = parse_report_id(report_id)?;
    let (vote_type, device_hash) = validate(request)?;

    if reports.find_report_by_id(&report_id).await?.is_none() {
        return Err(Error::NotFound(format!("Report {} not found", report_id)));
    }

    votes.upsert_vote(&report_id, &device_hash, vote_type).await?;

    // A delete that landed between the lookup and the upsert has already swept
    // this report's votes, so the one just written must go too.
    if reports.find_report_by_id(&report_id).await?.is_none() {
        votes.delete_all_for_report(&report_id).await?;
        warn!("Report {} was deleted while a vote was being cast", report_id);
        return Err(Error::NotFound(format!("Report {} not found", report_id)));
    }

    let tally = report_tally(votes, &report_id).await?;

    info!(
        "Vote '{}' recorded on report {} (credibility now {}%)",
        vote_type, report_id, tally.credibility
    );
    Ok(tally)
}
