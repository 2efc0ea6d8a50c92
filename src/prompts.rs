//! System prompts sent to the remote narrative service.

/// System prompt for insight narration.
///
/// The expected keys mirror [`Narrative`](crate::narrative::Narrative)'s
/// serde field names.
pub const NARRATIVE_SYSTEM_PROMPT: &str = r#"You are a checkout conversion analyst. Given a statistical finding about a segment of checkout sessions, generate a concise root-cause summary, evidence, fixes, and an experiment plan.

Your response MUST be valid JSON in this exact format:
{
  "title": "one-line summary of the finding",
  "evidence": ["short factual statement", "..."],
  "recommended_fixes": ["actionable fix", "..."],
  "experiment_plan": {
    "hypothesis": "if we change X for this segment, metric Y improves",
    "targeting": {"dimension": "value"},
    "variants": [
      {"name": "control", "changes": []},
      {"name": "variant", "changes": [{"module": "checkout", "key": "banner", "value": "..."}]}
    ],
    "primary_metric": "conversion_rate",
    "secondary_metrics": ["payment_success_rate"],
    "guardrails": ["latency_p95"],
    "sample_size_heuristic": "sessions needed per variant",
    "runtime_days": 10
  }
}

Guidelines:
- Use only the numbers given in the finding; do not invent data
- Evidence should cite the segment rate, the baseline rate and the volume
- Fixes should be specific to the segment and the drivers listed
- Keep the targeting exactly as given

Always respond with valid JSON only, no other text."#;

/// Render the user message describing one finding.
pub fn narrative_user_prompt(finding_json: &str) -> String {
    format!("Finding:\n{}", finding_json)
}
