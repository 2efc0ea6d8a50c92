use async_trait::async_trait;

use super::{ExperimentPlan, Narrative, NarrativeGenerator, Variant, VariantChange};
use crate::analytics::InsightDraft;

/// Template-based narratives derived only from the draft's numbers.
#[derive(Debug, Clone, Copy, Default)]
pub struct DeterministicNarrator;

impl DeterministicNarrator {
    /// Synchronous rendering, also used as the remote fallback.
    pub fn render(&self, draft: &InsightDraft) -> Narrative {
        let m = &draft.metrics;
        let segment = &draft.segment_label;
        let metric_lower = m.metric_label.to_lowercase();

        let title = format!("{} shows {} lift of {:+.1} pts", segment, m.metric_label, m.lift);

        let evidence = vec![
            format!("{}: {} sessions in window", segment, m.segment_volume),
            format!(
                "{} rate {:.1}% vs baseline {:.1}% ({:+.1} pts)",
                m.metric_label, m.segment_rate, m.baseline_rate, m.lift
            ),
            format!("Observed window: {} → {}", draft.window.start, draft.window.end),
        ];

        let recommended_fixes = vec![
            format!("Improve {} reliability for {}.", metric_lower, segment),
            format!("Add inline reassurance or incentives for {}.", segment),
            "Run A/B test with targeted UX changes.".to_string(),
        ];

        let experiment_plan = ExperimentPlan {
            hypothesis: format!(
                "If we address {} friction for {}, conversion will improve by {:.1} pts",
                metric_lower,
                segment,
                m.lift.abs()
            ),
            targeting: draft.targeting.clone(),
            variants: vec![
                Variant {
                    name: "control".to_string(),
                    changes: Vec::new(),
                },
                Variant {
                    name: "variant".to_string(),
                    changes: vec![VariantChange {
                        module: "checkout".to_string(),
                        key: "banner".to_string(),
                        value: format!("Resolve {} issues", metric_lower),
                    }],
                },
            ],
            primary_metric: "conversion_rate".to_string(),
            secondary_metrics: vec![
                "payment_success_rate".to_string(),
                "abandonment_rate".to_string(),
            ],
            guardrails: vec!["latency_p95".to_string(), "support_tickets".to_string()],
            sample_size_heuristic: "At least 1,500 sessions per variant".to_string(),
            runtime_days: 10,
        };

        Narrative {
            title,
            evidence,
            recommended_fixes,
            experiment_plan,
        }
    }
}

#[async_trait]
impl NarrativeGenerator for DeterministicNarrator {
    async fn generate(&self, draft: &InsightDraft) -> Narrative {
        self.render(draft)
    }
}
