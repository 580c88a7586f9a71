use crate::duration::{elapsed_seconds, parse_local_datetime};
use crate::error::ValidationError;
use crate::models::{Actor, CreateTimeEntryRequest, TrackingType};
use chrono::SecondsFormat;

/// User-typed manual entry, before validation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ManualEntryDraft {
    pub start: String,
    pub end: String,
    pub project: String,
    pub task: String,
    pub description: String,
    pub billable: bool,
    pub tracking_type: TrackingType,
}

/// A validated draft: the payload to persist and the countdown length
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedEntry {
    pub duration: u64,
    pub payload: CreateTimeEntryRequest,
}

/// Validate a draft and build its persistence payload. Pure; nothing is saved here.
pub fn resolve_manual_entry(
    draft: &ManualEntryDraft,
    actor: &Actor,
) -> Result<ResolvedEntry, ValidationError> {
    if draft.project.trim().is_empty() {
        return Err(ValidationError::MissingProject);
    }
    if draft.task.trim().is_empty() {
        return Err(ValidationError::MissingTask);
    }
    if draft.start.trim().is_empty() {
        return Err(ValidationError::MissingStart);
    }
    if draft.end.trim().is_empty() {
        return Err(ValidationError::MissingEnd);
    }

    let start = parse_local_datetime(&draft.start)?;
    let end = parse_local_datetime(&draft.end)?;
    if end <= start {
        return Err(ValidationError::EndNotAfterStart);
    }

    // Sub-second spans floor to zero; a zero-length entry is never armed
    let duration = elapsed_seconds(start, end);
    if duration == 0 {
        return Err(ValidationError::EndNotAfterStart);
    }
    let payload = CreateTimeEntryRequest {
        user_id: actor.user_id.clone(),
        project: draft.project.clone(),
        task: draft.task.clone(),
        description: draft.description.clone(),
        start_time: start.to_rfc3339_opts(SecondsFormat::Millis, true),
        end_time: end.to_rfc3339_opts(SecondsFormat::Millis, true),
        duration,
        billable: draft.billable,
        tracking_type: draft.tracking_type,
        is_manual_entry: true,
        user_type: actor.user_type().to_string(),
    };

    Ok(ResolvedEntry { duration, payload })
}
