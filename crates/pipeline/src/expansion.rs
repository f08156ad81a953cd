use extract::{CompletionRequest, LlmClient, LlmError, complete_json};
use serde::Deserialize;
use serde_json::{Value, json};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::sync::Arc;

pub const EXPAND_QUERY_TASK: &str = "expand_query";

#[derive(Debug, Deserialize)]
struct ExpansionBatch {
    #[serde(default)]
    expansions: Vec<String>,
}

pub fn expansion_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "expansions": {"type": "array", "items": {"type": "string"}}
        },
        "required": ["expansions"]
    })
}

pub fn build_expansion_prompt(query: &str, count: usize) -> String {
    format!(
        r#"You are a research assistant helping to search a document collection about politics and policy.

Rewrite the research question below into {count} alternative search queries that would find relevant passages.

Question: {query}

Vary the queries by:
- Synonyms and alternative terminology
- Specific aspects or sub-topics of the question
- Named actors, institutions or policies involved
- Time periods or events that matter
- Causes, effects and relationships between the subjects

Each query should be 3-10 words. Do not repeat the original question.

Return JSON with an "expansions" array of strings."#,
        count = count,
        query = query,
    )
}

/// Cache key for a query: SHA-256 of its trimmed, lowercased text.
pub fn query_hash(query: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(query.trim().to_lowercase().as_bytes());
    hex::encode(hasher.finalize())
}

/// Turns one research question into several search queries.
#[derive(Clone)]
pub struct QueryExpander {
    llm: Arc<dyn LlmClient>,
    temperature: f32,
    max_tokens: u32,
}

impl QueryExpander {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self {
            llm,
            temperature: 0.7, // Variety matters more than precision here
            max_tokens: 1000,
        }
    }

    /// Ask for up to `count` variations. The original query always comes
    /// first; blank and case-insensitively repeated variations are dropped.
    pub async fn expand(&self, query: &str, count: usize) -> Result<Vec<String>, LlmError> {
        let request = CompletionRequest::new(EXPAND_QUERY_TASK, build_expansion_prompt(query, count))
            .with_schema(expansion_schema())
            .with_temperature(self.temperature)
            .with_max_tokens(self.max_tokens);

        let batch: ExpansionBatch = complete_json(self.llm.as_ref(), &request).await?;
        Ok(merge_variations(query, batch.expansions, count))
    }
}

fn merge_variations(query: &str, expansions: Vec<String>, count: usize) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut variations = Vec::with_capacity(count + 1);

    let candidates = std::iter::once(query.trim().to_string())
        .chain(expansions.into_iter().map(|e| e.trim().to_string()));
    for candidate in candidates {
        if variations.len() > count {
            break;
        }
        if candidate.is_empty() || !seen.insert(candidate.to_lowercase()) {
            continue;
        }
        variations.push(candidate);
    }
    variations
}
