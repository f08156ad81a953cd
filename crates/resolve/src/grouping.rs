use petgraph::unionfind::UnionFind;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use store::{Entity, MergeMethod};

use crate::aliases;
use crate::normalizer::normalize;

pub const ALIAS_DICT_CONFIDENCE: u8 = 100;
pub const EXACT_CONFIDENCE: u8 = 90;
pub const FUZZY_CONFIDENCE: u8 = 75;

/// Shortest normalized form allowed to match by containment
const MIN_SUBSTRING_LEN: usize = 4;

/// Entities proposed to be one real-world thing.
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateGroup {
    /// Indices into the slice given to [`find_candidates`], ascending
    pub members: Vec<usize>,
    pub method: MergeMethod,
    pub confidence: u8,
    /// Label the group should carry, when the tier that formed it knows one
    pub canonical_label: Option<String>,
}

struct Normalized {
    label: String,
    aliases: BTreeSet<String>,
}

impl Normalized {
    fn of(entity: &Entity) -> Self {
        Self {
            label: normalize(&entity.label),
            aliases: entity
                .aliases
                .iter()
                .map(|a| normalize(a))
                .filter(|a| !a.is_empty())
                .collect(),
        }
    }
}

/// Tier-1 matching between two entities of the same type.
fn match_pair(a: &Normalized, b: &Normalized) -> Option<(MergeMethod, u8)> {
    if a.label.is_empty() || b.label.is_empty() {
        return None;
    }

    if a.label == b.label {
        return Some((MergeMethod::Exact, EXACT_CONFIDENCE));
    }

    let long_enough = a.label.chars().count() >= MIN_SUBSTRING_LEN
        && b.label.chars().count() >= MIN_SUBSTRING_LEN;
    if long_enough && (a.label.contains(&b.label) || b.label.contains(&a.label)) {
        return Some((MergeMethod::Fuzzy, FUZZY_CONFIDENCE));
    }

    if !a.aliases.is_disjoint(&b.aliases)
        || a.aliases.contains(&b.label)
        || b.aliases.contains(&a.label)
    {
        return Some((MergeMethod::Fuzzy, FUZZY_CONFIDENCE));
    }

    None
}

/// Propose merge groups among entities that all share one type.
///
/// The alias dictionary runs first; entities it groups are not considered
/// again. The rest are joined transitively by pairwise exact or fuzzy
/// matches. A group's confidence is its weakest link, and it counts as
/// exact only if every link was exact.
pub fn find_candidates(entities: &[&Entity]) -> Vec<CandidateGroup> {
    let mut groups = Vec::new();

    let mut by_canonical: BTreeMap<&'static str, Vec<usize>> = BTreeMap::new();
    for (index, entity) in entities.iter().enumerate() {
        if let Some(canonical) = aliases::canonical_label(&entity.label) {
            by_canonical.entry(canonical).or_default().push(index);
        }
    }

    let mut grouped = vec![false; entities.len()];
    for (canonical, members) in by_canonical {
        if members.len() < 2 {
            continue;
        }
        for &m in &members {
            grouped[m] = true;
        }
        groups.push(CandidateGroup {
            members,
            method: MergeMethod::AliasDict,
            confidence: ALIAS_DICT_CONFIDENCE,
            canonical_label: Some(canonical.to_string()),
        });
    }

    let remaining: Vec<usize> = (0..entities.len()).filter(|&i| !grouped[i]).collect();
    let normalized: Vec<Normalized> = remaining.iter().map(|&i| Normalized::of(entities[i])).collect();

    let mut union = UnionFind::new(remaining.len());
    let mut links = Vec::new();
    for i in 0..remaining.len() {
        for j in (i + 1)..remaining.len() {
            if let Some(link) = match_pair(&normalized[i], &normalized[j]) {
                union.union(i, j);
                links.push((i, link));
            }
        }
    }

    // root -> (members, all exact, weakest confidence)
    let mut components: HashMap<usize, (Vec<usize>, bool, u8)> = HashMap::new();
    for i in 0..remaining.len() {
        components
            .entry(union.find(i))
            .or_insert_with(|| (Vec::new(), true, ALIAS_DICT_CONFIDENCE))
            .0
            .push(remaining[i]);
    }
    for (i, (method, confidence)) in links {
        if let Some(component) = components.get_mut(&union.find(i)) {
            component.1 &= method == MergeMethod::Exact;
            component.2 = component.2.min(confidence);
        }
    }

    groups.extend(
        components
            .into_values()
            .filter(|(members, _, _)| members.len() >= 2)
            .map(|(members, all_exact, confidence)| CandidateGroup {
                members,
                method: if all_exact {
                    MergeMethod::Exact
                } else {
                    MergeMethod::Fuzzy
                },
                confidence,
                canonical_label: None,
            }),
    );

    groups.sort_by_key(|g| g.members[0]);
    groups
}
