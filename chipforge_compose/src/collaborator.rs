// Capability interfaces for the two external collaborators.
//
// A `Generator` proposes candidate variants for a window; a `Critic` scores
// one variant. Either may be remote, slow, or LLM-backed, so both are async
// and object-safe. The orchestrator never calls them directly: it goes
// through `propose_timed` / `score_timed`, which apply the per-call timeout
// and log failures.
//
// For collaborators that answer in free text, `parse_candidate_json` and
// `parse_score_record_json` pull the first JSON object out of a reply and
// decode it.

use std::collections::BTreeSet;
use std::time::Duration;

use async_trait::async_trait;
use chipforge_protocol::{
    CandidateRequest, CandidateResponse, CritiqueRequest, ScoreRecord, Variant,
};

use crate::error::CollaboratorError;

#[async_trait]
pub trait Generator: Send + Sync {
    fn name(&self) -> &str;

    async fn propose(&self, request: &CandidateRequest) -> Result<Vec<Variant>, CollaboratorError>;
}

#[async_trait]
pub trait Critic: Send + Sync {
    fn name(&self) -> &str;

    async fn score(&self, request: &CritiqueRequest) -> Result<ScoreRecord, CollaboratorError>;
}

/// Ask the generator for candidates, giving up after `timeout`. Duplicate
/// variant ids are dropped (first wins).
pub async fn propose_timed(
    generator: &dyn Generator,
    request: &CandidateRequest,
    timeout: Duration,
) -> Result<Vec<Variant>, CollaboratorError> {
    let result = match tokio::time::timeout(timeout, generator.propose(request)).await {
        Ok(result) => result,
        Err(_) => Err(CollaboratorError::Timeout {
            role: "generator",
            timeout_ms: timeout.as_millis() as u64,
        }),
    };
    match result {
        Ok(variants) => Ok(dedupe_variants(variants)),
        Err(e) => {
            tracing::warn!(
                generator = generator.name(),
                window = %request.window,
                attempt = request.attempt,
                "{e}"
            );
            Err(e)
        }
    }
}

/// Ask the critic for one score record, giving up after `timeout`.
pub async fn score_timed(
    critic: &dyn Critic,
    request: &CritiqueRequest,
    timeout: Duration,
) -> Result<ScoreRecord, CollaboratorError> {
    let result = match tokio::time::timeout(timeout, critic.score(request)).await {
        Ok(result) => result,
        Err(_) => Err(CollaboratorError::Timeout {
            role: "critic",
            timeout_ms: timeout.as_millis() as u64,
        }),
    };
    let result = result.and_then(|record| {
        if record.variant_id == request.variant.id {
            Ok(record)
        } else {
            Err(CollaboratorError::InvalidResponse {
                role: "critic",
                reason: format!(
                    "scored {} when asked for {}",
                    record.variant_id, request.variant.id
                ),
            })
        }
    });
    if let Err(e) = &result {
        tracing::warn!(
            critic = critic.name(),
            variant = %request.variant.id,
            "{e}"
        );
    }
    result
}

pub fn dedupe_variants(variants: Vec<Variant>) -> Vec<Variant> {
    let mut seen = BTreeSet::new();
    let mut out = Vec::with_capacity(variants.len());
    for v in variants {
        if seen.insert(v.id.clone()) {
            out.push(v);
        } else {
            tracing::warn!(variant = %v.id, "dropping duplicate variant id");
        }
    }
    out
}

/// Slice from the first `{` to the last `}`, for replies that wrap JSON in
/// prose or code fences.
fn json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

pub fn parse_candidate_json(text: &str) -> Result<Vec<Variant>, CollaboratorError> {
    let invalid = |reason: String| CollaboratorError::InvalidResponse {
        role: "generator",
        reason,
    };
    let body = json_object(text).ok_or_else(|| invalid("no JSON object in reply".into()))?;
    let response: CandidateResponse =
        serde_json::from_str(body).map_err(|e| invalid(e.to_string()))?;
    Ok(dedupe_variants(response.variants))
}

pub fn parse_score_record_json(text: &str) -> Result<ScoreRecord, CollaboratorError> {
    let invalid = |reason: String| CollaboratorError::InvalidResponse {
        role: "critic",
        reason,
    };
    let body = json_object(text).ok_or_else(|| invalid("no JSON object in reply".into()))?;
    serde_json::from_str(body).map_err(|e| invalid(e.to_string()))
}
