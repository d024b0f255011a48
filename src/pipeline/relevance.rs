//! Relevance filtering: label each section with the categories it covers.
//!
//! The filter fails open. A section whose answer cannot be read, or whose
//! oracle call keeps failing, is treated as relevant to every category and
//! the incident is recorded as an anomaly. Extraction on an irrelevant
//! section costs one extra call that returns an empty array; skipping a
//! relevant one silently loses a payment term.

use super::response::{bool_field, extract_json};
use crate::config::RelevanceStrategy;
use crate::model::{Category, Relevance, Section};
use crate::oracle::{with_retries, OracleContext};
use crate::orchestrator::Stage;
use crate::output::Anomaly;
use futures::stream::{self, StreamExt};
use std::collections::BTreeSet;
use tracing::{debug, warn};

const MILESTONE_KEYWORDS: &[&str] = &[
    "milestone",
    "phase",
    "task",
    "schedule",
    "timeline",
    "completion",
    "due",
    "deadline",
    "kickoff",
    "kick-off",
    "go-live",
];

const DELIVERABLE_KEYWORDS: &[&str] = &[
    "deliverable",
    "report",
    "artifact",
    "work product",
    "documentation",
    "acceptance",
];

const PAYMENT_KEYWORDS: &[&str] = &[
    "payment",
    "amount",
    "invoice",
    "fee",
    "price",
    "cost",
    "compensation",
    "percentage",
    "$",
    "€",
    "£",
    "%",
];

/// Label `sections` with `strategy`. Returns the sections in ordinal order
/// plus the anomalies raised along the way.
pub async fn label_sections(
    sections: Vec<Section>,
    strategy: RelevanceStrategy,
    ctx: &OracleContext,
) -> (Vec<Section>, Vec<Anomaly>) {
    match strategy {
        RelevanceStrategy::Keywords => {
            let labelled = sections
                .into_iter()
                .map(|mut s| {
                    s.relevance = classify_by_keywords(&s);
                    s
                })
                .collect();
            (labelled, Vec::new())
        }
        RelevanceStrategy::Oracle => label_with_oracle(sections, ctx).await,
    }
}

async fn label_with_oracle(
    sections: Vec<Section>,
    ctx: &OracleContext,
) -> (Vec<Section>, Vec<Anomaly>) {
    ctx.units_start("relevance", sections.len());

    let mut results: Vec<(Section, Option<Anomaly>)> = stream::iter(sections)
        .map(|mut section| async move {
            if section.is_blank() {
                section.relevance = Relevance::none();
                ctx.unit_complete("relevance", true);
                return (section, None);
            }
            let (relevance, anomaly) = classify_one(&section, ctx).await;
            ctx.unit_complete("relevance", anomaly.is_none());
            section.relevance = relevance;
            (section, anomaly)
        })
        .buffer_unordered(ctx.concurrency.max(1))
        .collect()
        .await;

    results.sort_by_key(|(s, _)| s.ordinal);
    let mut anomalies = Vec::new();
    let sections = results
        .into_iter()
        .map(|(s, a)| {
            anomalies.extend(a);
            s
        })
        .collect();
    (sections, anomalies)
}

async fn classify_one(section: &Section, ctx: &OracleContext) -> (Relevance, Option<Anomaly>) {
    let label = format!("classify '{}'", section.title);
    let answer = with_retries(&label, ctx.policy, &ctx.limiter, move || {
        ctx.oracle.classify(section, &Category::ALL)
    })
    .await;

    let message = match answer {
        Ok(raw) => match parse_relevance(&raw) {
            Some(set) => {
                debug!("Section '{}' relevant to {:?}", section.title, set);
                return (Relevance::Labeled(set), None);
            }
            None => format!("unparseable relevance answer: {}", preview(&raw)),
        },
        Err(e) => format!("relevance call failed: {e}"),
    };

    warn!(
        "Section '{}': {}; treating as relevant to all categories",
        section.title, message
    );
    let anomaly = Anomaly {
        stage: Stage::Filtered,
        section: Some(section.title.clone()),
        category: None,
        message,
    };
    (Relevance::all(), Some(anomaly))
}

/// Read `{"milestones": bool, "deliverables": bool, "payments": bool}`.
///
/// Missing keys count as "no" as long as at least one key is readable.
pub fn parse_relevance(raw: &str) -> Option<BTreeSet<Category>> {
    let value = extract_json(raw)?;
    let obj = value.as_object()?;
    let mut answered = false;
    let mut set = BTreeSet::new();
    for category in Category::ALL {
        let flag = bool_field(obj, category.as_str())
            .or_else(|| bool_field(obj, category.result_key()));
        if let Some(flag) = flag {
            answered = true;
            if flag {
                set.insert(category);
            }
        }
    }
    answered.then_some(set)
}

/// Offline classification by keyword presence in the title and body.
pub fn classify_by_keywords(section: &Section) -> Relevance {
    if section.is_blank() {
        return Relevance::none();
    }
    let haystack = format!("{}\n{}", section.title, section.body).to_lowercase();
    let hit = |words: &[&str]| words.iter().any(|w| haystack.contains(w));

    let mut set = BTreeSet::new();
    if hit(MILESTONE_KEYWORDS) {
        set.insert(Category::Milestones);
    }
    if hit(DELIVERABLE_KEYWORDS) {
        set.insert(Category::Deliverables);
    }
    if hit(PAYMENT_KEYWORDS) {
        set.insert(Category::Payments);
    }
    Relevance::Labeled(set)
}

fn preview(raw: &str) -> String {
    let mut s: String = raw.trim().chars().take(80).collect();
    if raw.trim().chars().count() > 80 {
        s.push('…');
    }
    s
}
