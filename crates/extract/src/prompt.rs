use serde_json::{Value, json};

use crate::schema::{EntityType, ExtractedEntity};

pub const EXTRACTION_SYSTEM_PROMPT: &str = r#"You are an expert political and policy analyst specializing in entity extraction.
Your task is to identify and extract entities from text according to the APOR (Actor-Policy-Outcome-Risk) ontology.

Rules:
1. Extract ONLY entities that are explicitly mentioned or strongly implied in the text
2. Provide exact quotes from the text as evidence
3. Assign confidence scores based on how clearly the entity is mentioned
4. Do not hallucinate or infer entities not supported by the text
5. Return valid JSON matching the requested schema"#;

fn category_definition(entity_type: EntityType) -> (&'static str, &'static str) {
    match entity_type {
        EntityType::Actor => (
            "ACTORS",
            "people, organizations, governments, institutions, agencies, companies, or groups that take actions or make decisions",
        ),
        EntityType::Policy => (
            "POLICIES",
            "laws, regulations, decisions, agreements, strategies, plans, treaties, orders, or formal actions taken by actors",
        ),
        EntityType::Outcome => (
            "OUTCOMES",
            "results, effects, events, measured changes, or consequences that have occurred or are expected to occur due to policies or actions",
        ),
        EntityType::Risk => (
            "RISKS",
            "threats, potential negative events, vulnerabilities, dangers, or adverse scenarios mentioned as possibilities",
        ),
    }
}

pub fn build_entity_prompt(entity_type: EntityType, chunk_text: &str) -> String {
    let (heading, definition) = category_definition(entity_type);
    format!(
        r#"{system}

Analyze the following text and extract all {heading}.

{heading} are: {definition}.

Text:
{text}

For each item found, provide:
- label: Name or short description
- confidence: 0-100 score (100 = explicitly named, 50 = referenced indirectly)
- quote: Exact text where it appears
- aliases: Other names/abbreviations used for it in the text

Return JSON with an "entities" array."#,
        system = EXTRACTION_SYSTEM_PROMPT,
        heading = heading,
        definition = definition,
        text = chunk_text,
    )
}

pub fn build_relationship_prompt(chunk_text: &str, entities: &[ExtractedEntity]) -> String {
    let listing: Vec<String> = entities
        .iter()
        .map(|e| format!("- {} ({})", e.label, e.entity_type))
        .collect();

    format!(
        r#"{system}

Analyze the following text and the entities already extracted to identify RELATIONSHIPS between them.

Entities found:
{entities}

Text:
{text}

For each relationship, provide:
- source: Label of the source entity, exactly as listed
- target: Label of the target entity, exactly as listed
- relationship: Type of relationship (e.g., "proposes", "implements", "causes", "opposes", "funds", "enables", "blocks", "may_cause")
- confidence: 0-100 score

Return JSON with a "relationships" array."#,
        system = EXTRACTION_SYSTEM_PROMPT,
        entities = listing.join("\n"),
        text = chunk_text,
    )
}

pub fn entity_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "entities": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "label": {"type": "string"},
                        "confidence": {"type": "integer"},
                        "quote": {"type": "string"},
                        "aliases": {"type": "array", "items": {"type": "string"}}
                    },
                    "required": ["label", "confidence", "quote"]
                }
            }
        },
        "required": ["entities"]
    })
}

pub fn relationship_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "relationships": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "source": {"type": "string"},
                        "target": {"type": "string"},
                        "relationship": {"type": "string"},
                        "confidence": {"type": "integer"}
                    },
                    "required": ["source", "target", "relationship"]
                }
            }
        },
        "required": ["relationships"]
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entity_prompt_names_only_its_category() {
        let prompt = build_entity_prompt(EntityType::Policy, "The tariff act passed.");
        assert!(prompt.contains("extract all POLICIES"));
        assert!(!prompt.contains("ACTORS"));
        assert!(prompt.contains("The tariff act passed."));
    }

    #[test]
    fn test_relationship_prompt_lists_entities_with_types() {
        let entities = vec![ExtractedEntity {
            temp_id: "actor_0".to_string(),
            entity_type: EntityType::Actor,
            label: "Congress".to_string(),
            confidence: 90,
            quote: String::new(),
            aliases: vec![],
        }];
        let prompt = build_relationship_prompt("text", &entities);
        assert!(prompt.contains("- Congress (actor)"));
    }
}
