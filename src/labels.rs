//! Display labels and badge tones for stages.
//!
//! A presentation lookup only. The engine never reads it; it reads the
//! catalog so what a UI offers is exactly what the engine accepts.
use serde::Serialize;

use crate::stage::{Stage, StageCatalog, Workflow};

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Tone {
    Neutral,
    Info,
    Warning,
    Success,
    Danger,
}

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageLabel {
    pub stage: Stage,
    pub label: &'static str,
    pub tone: Tone,
}

pub fn label(stage: Stage) -> StageLabel {
    let (label, tone) = match stage {
        Stage::Lead => ("Lead", Tone::Neutral),
        Stage::Contacted => ("Contacted", Tone::Info),
        Stage::Proposal => ("Proposal", Tone::Info),
        Stage::Negotiation => ("Negotiation", Tone::Warning),
        Stage::Won => ("Won", Tone::Success),
        Stage::Lost => ("Lost", Tone::Danger),
        Stage::Draft => ("Draft", Tone::Neutral),
        Stage::Sent => ("Sent", Tone::Info),
        Stage::Waiting => ("Waiting on customer", Tone::Warning),
        Stage::Accepted => ("Accepted", Tone::Success),
        Stage::Declined => ("Declined", Tone::Danger),
        Stage::Expired => ("Expired", Tone::Neutral),
        Stage::Shipped => ("Shipped", Tone::Info),
        Stage::Received => ("Received", Tone::Info),
        Stage::Paid => ("Paid", Tone::Success),
        Stage::Overdue => ("Overdue", Tone::Danger),
        Stage::Cancelled => ("Cancelled", Tone::Neutral),
        Stage::Active => ("Active", Tone::Success),
        Stage::Terminated => ("Terminated", Tone::Danger),
        Stage::Pending => ("Pending review", Tone::Warning),
        Stage::Approved => ("Approved", Tone::Success),
        Stage::Rejected => ("Rejected", Tone::Danger),
        Stage::Completed => ("Completed", Tone::Neutral),
    };
    StageLabel { stage, label, tone }
}

/// Labels for every stage a document in `from` may move to.
pub fn next_stage_options(workflow: Workflow, from: Stage) -> Vec<StageLabel> {
    StageCatalog::legal_transitions(workflow, from)
        .into_iter()
        .map(label)
        .collect()
}
