use std::collections::{HashMap, HashSet};
use store::{EntityId, Relationship, RelationshipId};

/// Changes needed to keep an analysis' relationships valid after a merge.
#[derive(Debug, Default, PartialEq)]
pub struct RemapOutcome {
    /// Relationships whose endpoints moved, with their new endpoints
    pub updates: Vec<Relationship>,
    pub deletions: Vec<RelationshipId>,
}

impl RemapOutcome {
    /// Apply the outcome to a local copy of the relationship set.
    pub fn apply_to(&self, relationships: &mut Vec<Relationship>) {
        let deleted: HashSet<RelationshipId> = self.deletions.iter().copied().collect();
        relationships.retain(|r| !deleted.contains(&r.id));
        for update in &self.updates {
            if let Some(existing) = relationships.iter_mut().find(|r| r.id == update.id) {
                *existing = update.clone();
            }
        }
    }
}

/// Repoint every relationship of the analysis through `mapping`
/// (merged id -> primary id).
///
/// Self-loops created by the rewrite are deleted. Rows that end up sharing
/// (source, target, type) collapse into the highest-confidence one; on a
/// confidence tie the earlier row survives.
pub fn remap_relationships(
    relationships: &[Relationship],
    mapping: &HashMap<EntityId, EntityId>,
) -> RemapOutcome {
    let resolve = |id: EntityId| mapping.get(&id).copied().unwrap_or(id);

    let mut outcome = RemapOutcome::default();
    // key -> index into `kept`
    let mut by_key: HashMap<(EntityId, EntityId, String), usize> = HashMap::new();
    let mut kept: Vec<(Relationship, bool)> = Vec::new();

    for rel in relationships {
        let source = resolve(rel.source_entity_id);
        let target = resolve(rel.target_entity_id);
        let moved = source != rel.source_entity_id || target != rel.target_entity_id;

        if source == target {
            outcome.deletions.push(rel.id);
            continue;
        }

        let mut remapped = rel.clone();
        remapped.source_entity_id = source;
        remapped.target_entity_id = target;
        let key = (source, target, rel.relationship_type.clone());

        match by_key.get(&key) {
            Some(&slot) => {
                let (existing, _) = &kept[slot];
                if remapped.confidence > existing.confidence {
                    outcome.deletions.push(existing.id);
                    kept[slot] = (remapped, moved);
                } else {
                    outcome.deletions.push(remapped.id);
                }
            }
            None => {
                by_key.insert(key, kept.len());
                kept.push((remapped, moved));
            }
        }
    }

    outcome.updates = kept
        .into_iter()
        .filter(|(_, moved)| *moved)
        .map(|(rel, _)| rel)
        .collect();

    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn rel(source: EntityId, target: EntityId, kind: &str, confidence: u8) -> Relationship {
        Relationship {
            id: Uuid::new_v4(),
            analysis_id: Uuid::nil(),
            source_entity_id: source,
            target_entity_id: target,
            relationship_type: kind.to_string(),
            confidence,
        }
    }

    #[test]
    fn test_duplicate_edges_collapse_to_max_confidence() {
        let (a, b, d) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let a_d = rel(a, d, "influences", 60);
        let b_d = rel(b, d, "influences", 85);
        let mut relationships = vec![a_d.clone(), b_d.clone()];

        let outcome = remap_relationships(&relationships, &HashMap::from([(b, a)]));

        assert_eq!(outcome.deletions, vec![a_d.id]);
        assert_eq!(outcome.updates.len(), 1);
        assert_eq!(outcome.updates[0].id, b_d.id);
        assert_eq!(outcome.updates[0].source_entity_id, a);

        outcome.apply_to(&mut relationships);
        assert_eq!(relationships.len(), 1);
        assert_eq!(relationships[0].source_entity_id, a);
        assert_eq!(relationships[0].confidence, 85);
    }

    #[test]
    fn test_self_loops_are_deleted() {
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let loop_rel = rel(b, a, "opposes", 70);

        let outcome = remap_relationships(&[loop_rel.clone()], &HashMap::from([(b, a)]));

        assert_eq!(outcome.deletions, vec![loop_rel.id]);
        assert!(outcome.updates.is_empty());
    }

    #[test]
    fn test_untouched_relationships_produce_no_changes() {
        let (a, b, c) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let relationships = vec![rel(a, b, "funds", 50), rel(b, a, "funds", 50)];

        let outcome = remap_relationships(&relationships, &HashMap::from([(c, a)]));

        assert_eq!(outcome, RemapOutcome::default());
    }

    #[test]
    fn test_different_types_are_not_collapsed() {
        let (a, b, d) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let relationships = vec![rel(a, d, "funds", 50), rel(b, d, "opposes", 50)];

        let outcome = remap_relationships(&relationships, &HashMap::from([(b, a)]));

        assert!(outcome.deletions.is_empty());
        assert_eq!(outcome.updates.len(), 1);
    }
}
