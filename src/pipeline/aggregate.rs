//! Aggregation: candidates → deduplicated, validated, cross-referenced
//! records plus a confidence score.
//!
//! ## Duplicates
//!
//! Two candidates of one category are duplicates when their names match
//! after folding case and whitespace and their dates match (a missing date
//! only matches a missing date). The later section wins the content, the
//! first appearance keeps its position. When the merge replaces a different
//! payment amount the pair is reported in `conflicts`.
//!
//! ## Back-references
//!
//! Deliverables and payment terms name their milestone (and deliverable) by
//! text. A name index built once from the surviving records maps folded
//! names to the canonical spelling; unresolved references stay verbatim and
//! get a note.

use super::validate::{normalize_date, validate_deliverable, validate_milestone, validate_payment};
use crate::model::{
    CandidateItem, Category, Deliverable, ExtractionCandidate, Milestone, PaymentTerm, Section,
};
use crate::output::Conflict;
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Output of [`aggregate`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Aggregate {
    pub milestones: Vec<Milestone>,
    pub deliverables: Vec<Deliverable>,
    pub payment_terms: Vec<PaymentTerm>,
    pub conflicts: Vec<Conflict>,
    pub validation_notes: Vec<String>,
    /// Titles of the sections that contributed surviving records.
    pub category_sources: BTreeMap<Category, Vec<String>>,
}

impl Aggregate {
    fn surviving(&self, category: Category) -> usize {
        match category {
            Category::Milestones => self.milestones.len(),
            Category::Deliverables => self.deliverables.len(),
            Category::Payments => self.payment_terms.len(),
        }
    }
}

/// Case- and whitespace-folded name used for matching.
pub fn fold_name(name: &str) -> String {
    name.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Merge `candidates` (ordered by section ordinal) into final records.
pub fn aggregate(candidates: &[ExtractionCandidate]) -> Aggregate {
    let mut out = Aggregate::default();
    let mut survivors: BTreeMap<Category, Vec<ExtractionCandidate>> = BTreeMap::new();

    for category in Category::ALL {
        let group: Vec<&ExtractionCandidate> = candidates
            .iter()
            .filter(|c| c.item.category() == category)
            .collect();
        let kept = dedup(category, &group, &mut out.conflicts);
        survivors.insert(category, kept);
    }

    for (category, kept) in &survivors {
        let mut titles: Vec<String> = Vec::new();
        for c in kept {
            if !titles.contains(&c.section_title) {
                titles.push(c.section_title.clone());
            }
        }
        if !titles.is_empty() {
            out.category_sources.insert(*category, titles);
        }
        for c in kept {
            match c.item.clone() {
                CandidateItem::Milestone(mut m) => {
                    validate_milestone(&mut m, &mut out.validation_notes);
                    out.milestones.push(m);
                }
                CandidateItem::Deliverable(mut d) => {
                    validate_deliverable(&mut d, &mut out.validation_notes);
                    out.deliverables.push(d);
                }
                CandidateItem::Payment(mut p) => {
                    validate_payment(&mut p, &mut out.validation_notes);
                    out.payment_terms.push(p);
                }
            }
        }
    }

    resolve_references(&mut out);
    out
}

fn dedup_key(item: &CandidateItem) -> (String, Option<String>) {
    let (name, date) = item.dedup_fields();
    let date = date.map(|d| normalize_date(d).unwrap_or_else(|| d.trim().to_string()));
    (fold_name(name), date)
}

fn dedup(
    category: Category,
    group: &[&ExtractionCandidate],
    conflicts: &mut Vec<Conflict>,
) -> Vec<ExtractionCandidate> {
    let mut kept: Vec<ExtractionCandidate> = Vec::with_capacity(group.len());
    let mut index: HashMap<(String, Option<String>), usize> = HashMap::new();

    for candidate in group {
        let key = dedup_key(&candidate.item);
        match index.get(&key) {
            Some(&pos) => {
                let previous = &kept[pos];
                let old_amount = previous.item.amount().map(str::trim);
                let new_amount = candidate.item.amount().map(str::trim);
                if old_amount.is_some() && old_amount != new_amount {
                    conflicts.push(Conflict {
                        category,
                        name: candidate.item.dedup_fields().0.to_string(),
                        kept_section: candidate.section_title.clone(),
                        kept_amount: new_amount.map(str::to_string),
                        replaced_section: previous.section_title.clone(),
                        replaced_amount: old_amount.map(str::to_string),
                    });
                }
                kept[pos] = (*candidate).clone();
            }
            None => {
                index.insert(key, kept.len());
                kept.push((*candidate).clone());
            }
        }
    }
    kept
}

fn resolve_references(out: &mut Aggregate) {
    let milestone_index: HashMap<String, String> = out
        .milestones
        .iter()
        .map(|m| (fold_name(&m.name), m.name.clone()))
        .collect();
    let deliverable_index: HashMap<String, String> = out
        .deliverables
        .iter()
        .map(|d| (fold_name(&d.name), d.name.clone()))
        .collect();

    let notes = &mut out.validation_notes;
    for d in &mut out.deliverables {
        let owner = format!("deliverable {:?}", d.name);
        resolve(&mut d.related_milestone, &milestone_index, "milestone", &owner, notes);
    }
    for p in &mut out.payment_terms {
        let owner = format!("payment term {:?}", p.dedup_name());
        resolve(&mut p.related_milestone, &milestone_index, "milestone", &owner, notes);
        resolve(&mut p.related_deliverable, &deliverable_index, "deliverable", &owner, notes);
    }
}

fn resolve(
    reference: &mut Option<String>,
    index: &HashMap<String, String>,
    kind: &str,
    owner: &str,
    notes: &mut Vec<String>,
) {
    let Some(name) = reference.as_deref() else {
        return;
    };
    match index.get(&fold_name(name)) {
        Some(canonical) => *reference = Some(canonical.clone()),
        None => notes.push(format!("{owner}: related {kind} {name:?} not found, kept as written")),
    }
}

/// Confidence in `[0, 1]`.
///
/// Each category contributes `productive ÷ relevant` sections when at least
/// one record of that category survived, and nothing otherwise; the sum is
/// divided by three.
pub fn confidence(
    sections: &[Section],
    candidates: &[ExtractionCandidate],
    aggregate: &Aggregate,
) -> f64 {
    let total: f64 = Category::ALL
        .iter()
        .map(|&category| {
            let relevant = sections
                .iter()
                .filter(|s| s.relevance.contains(category))
                .count();
            if relevant == 0 || aggregate.surviving(category) == 0 {
                return 0.0;
            }
            let productive: BTreeSet<usize> = candidates
                .iter()
                .filter(|c| c.item.category() == category)
                .map(|c| c.section_ordinal)
                .collect();
            (productive.len().min(relevant)) as f64 / relevant as f64
        })
        .sum();
    (total / Category::ALL.len() as f64).clamp(0.0, 1.0)
}

/// Number of sections labelled relevant, per category.
pub fn relevant_counts(sections: &[Section]) -> BTreeMap<Category, usize> {
    Category::ALL
        .iter()
        .map(|&c| (c, sections.iter().filter(|s| s.relevance.contains(c)).count()))
        .collect()
}
