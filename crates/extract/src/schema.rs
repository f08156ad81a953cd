use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The four APOR categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityType {
    Actor,
    Policy,
    Outcome,
    Risk,
}

impl EntityType {
    pub const ALL: [EntityType; 4] = [
        EntityType::Actor,
        EntityType::Policy,
        EntityType::Outcome,
        EntityType::Risk,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Actor => "actor",
            EntityType::Policy => "policy",
            EntityType::Outcome => "outcome",
            EntityType::Risk => "risk",
        }
    }

    /// Key used for per-type counts in stats payloads.
    pub fn count_key(&self) -> &'static str {
        match self {
            EntityType::Actor => "actors",
            EntityType::Policy => "policies",
            EntityType::Outcome => "outcomes",
            EntityType::Risk => "risks",
        }
    }

    /// Task name for this category's extraction pass.
    pub fn extraction_task(&self) -> &'static str {
        match self {
            EntityType::Actor => "extract_actor",
            EntityType::Policy => "extract_policy",
            EntityType::Outcome => "extract_outcome",
            EntityType::Risk => "extract_risk",
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "actor" | "actors" => Ok(EntityType::Actor),
            "policy" | "policies" => Ok(EntityType::Policy),
            "outcome" | "outcomes" => Ok(EntityType::Outcome),
            "risk" | "risks" => Ok(EntityType::Risk),
            other => Err(format!("unknown entity type: {}", other)),
        }
    }
}

fn default_confidence() -> f64 {
    50.0
}

/// Clamp a model-reported score into [0, 100].
pub fn clamp_score(value: f64) -> u8 {
    if value.is_nan() {
        return 50;
    }
    value.round().clamp(0.0, 100.0) as u8
}

/// One item of an entity pass, as returned by the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawEntity {
    #[serde(default)]
    pub label: String,
    #[serde(default = "default_confidence")]
    pub confidence: f64,
    #[serde(default)]
    pub quote: String,
    #[serde(default)]
    pub aliases: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EntityBatch {
    #[serde(default)]
    pub entities: Vec<RawEntity>,
}

/// One relationship, as returned by the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawRelationship {
    #[serde(default, alias = "source")]
    pub source_label: String,
    #[serde(default, alias = "target")]
    pub target_label: String,
    #[serde(default, alias = "relationship")]
    pub relationship_type: String,
    #[serde(default = "default_confidence")]
    pub confidence: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RelationshipBatch {
    #[serde(default)]
    pub relationships: Vec<RawRelationship>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedEntity {
    /// Chunk-scoped id such as `actor_0`; meaningless outside one extraction
    pub temp_id: String,
    pub entity_type: EntityType,
    pub label: String,
    pub confidence: u8,
    pub quote: String,
    pub aliases: Vec<String>,
}

impl ExtractedEntity {
    /// Clean up a raw model item. Items without a label are dropped.
    pub fn from_raw(entity_type: EntityType, index: usize, raw: RawEntity) -> Option<Self> {
        let label = raw.label.trim().to_string();
        if label.is_empty() {
            return None;
        }

        let mut aliases: Vec<String> = Vec::new();
        for alias in raw.aliases {
            let alias = alias.trim();
            if !alias.is_empty() && alias != label && !aliases.iter().any(|a| a == alias) {
                aliases.push(alias.to_string());
            }
        }

        Some(Self {
            temp_id: format!("{}_{}", entity_type, index),
            entity_type,
            label,
            confidence: clamp_score(raw.confidence),
            quote: raw.quote.trim().to_string(),
            aliases,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedRelationship {
    pub source_label: String,
    pub target_label: String,
    pub relationship_type: String,
    pub confidence: u8,
}

impl ExtractedRelationship {
    pub fn from_raw(raw: RawRelationship) -> Option<Self> {
        let source_label = raw.source_label.trim().to_string();
        let target_label = raw.target_label.trim().to_string();
        let relationship_type = raw.relationship_type.trim().to_string();

        if source_label.is_empty() || target_label.is_empty() || relationship_type.is_empty() {
            return None;
        }
        if source_label == target_label {
            return None;
        }

        Some(Self {
            source_label,
            target_label,
            relationship_type,
            confidence: clamp_score(raw.confidence),
        })
    }
}

/// Everything one chunk produced.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChunkExtraction {
    pub entities: Vec<ExtractedEntity>,
    pub relationships: Vec<ExtractedRelationship>,
    /// Categories whose pass failed and contributed nothing
    pub failed_passes: Vec<EntityType>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entity_type_round_trips_through_str() {
        for t in EntityType::ALL {
            assert_eq!(t.as_str().parse::<EntityType>(), Ok(t));
            assert_eq!(t.count_key().parse::<EntityType>(), Ok(t));
        }
        assert!("person".parse::<EntityType>().is_err());
    }

    #[test]
    fn test_raw_entity_defaults_and_cleanup() {
        let raw: RawEntity = serde_json::from_str(
            r#"{"label": "  NATO ", "aliases": ["NATO", "North Atlantic Treaty Organization", " ", "North Atlantic Treaty Organization"]}"#,
        )
        .unwrap();
        let entity = ExtractedEntity::from_raw(EntityType::Actor, 3, raw).unwrap();

        assert_eq!(entity.temp_id, "actor_3");
        assert_eq!(entity.label, "NATO");
        assert_eq!(entity.confidence, 50);
        assert_eq!(entity.aliases, vec!["North Atlantic Treaty Organization".to_string()]);
    }

    #[test]
    fn test_blank_label_is_dropped() {
        let raw = RawEntity {
            label: "   ".to_string(),
            confidence: 90.0,
            quote: String::new(),
            aliases: vec![],
        };
        assert!(ExtractedEntity::from_raw(EntityType::Risk, 0, raw).is_none());
    }

    #[test]
    fn test_scores_are_clamped() {
        assert_eq!(clamp_score(140.0), 100);
        assert_eq!(clamp_score(-3.0), 0);
        assert_eq!(clamp_score(72.6), 73);
        assert_eq!(clamp_score(f64::NAN), 50);
    }

    #[test]
    fn test_relationship_accepts_short_field_names() {
        let raw: RawRelationship = serde_json::from_str(
            r#"{"source": "Congress", "target": "Tariff Act", "relationship": "passes", "confidence": 88}"#,
        )
        .unwrap();
        let rel = ExtractedRelationship::from_raw(raw).unwrap();

        assert_eq!(rel.source_label, "Congress");
        assert_eq!(rel.target_label, "Tariff Act");
        assert_eq!(rel.relationship_type, "passes");
        assert_eq!(rel.confidence, 88);
    }

    #[test]
    fn test_self_relationship_is_dropped() {
        let raw = RawRelationship {
            source_label: "EU".to_string(),
            target_label: "EU".to_string(),
            relationship_type: "funds".to_string(),
            confidence: 70.0,
        };
        assert!(ExtractedRelationship::from_raw(raw).is_none());
    }
}
