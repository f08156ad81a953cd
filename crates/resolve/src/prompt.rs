use serde::Deserialize;
use serde_json::{Value, json};
use store::Entity;

pub const CONFIRM_MERGE_TASK: &str = "confirm_merge";

/// Candidate group as shown to the model.
pub struct GroupView<'a> {
    pub members: Vec<&'a Entity>,
}

pub fn build_confirm_prompt(groups: &[GroupView<'_>]) -> String {
    let listing = groups
        .iter()
        .enumerate()
        .map(|(index, group)| {
            let members = group
                .members
                .iter()
                .map(|e| format!("  - {} ({}, confidence: {})", e.label, e.entity_type, e.confidence))
                .collect::<Vec<_>>()
                .join("\n");
            format!("Group {}:\n{}", index, members)
        })
        .collect::<Vec<_>>()
        .join("\n\n");

    format!(
        r#"For each group below, decide whether its entities are different references to the SAME real-world entity.

Consider:
- Abbreviations/acronyms (e.g., "Ministry of Defense" and "MoD")
- Variations in naming (e.g., "US Congress" and "United States Congress")

{listing}

For every group, return:
- group: the group number
- should_merge: true if all members are the same entity
- canonical_label: preferred name if merging
- confidence: 0-100 score for your decision

Return JSON with a "decisions" array."#,
        listing = listing,
    )
}

pub fn confirm_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "decisions": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "group": {"type": "integer"},
                        "should_merge": {"type": "boolean"},
                        "canonical_label": {"type": "string"},
                        "confidence": {"type": "number"}
                    },
                    "required": ["group", "should_merge"]
                }
            }
        },
        "required": ["decisions"]
    })
}

#[derive(Debug, Clone, Deserialize)]
pub struct MergeDecision {
    pub group: usize,
    pub should_merge: bool,
    #[serde(default)]
    pub canonical_label: Option<String>,
    #[serde(default)]
    pub confidence: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct MergeDecisionBatch {
    #[serde(default)]
    pub decisions: Vec<MergeDecision>,
}
