//! Structured extraction: one templated oracle call per relevant
//! (section, category) pair, parsed into [`ExtractionCandidate`]s.
//!
//! An answer that does not parse gets one more call with a "valid JSON
//! only" correction. If that fails too, or the oracle is unreachable after
//! retries, the pair contributes nothing and an anomaly is recorded; the
//! run itself never fails here.

use super::response::{extract_json, items_for, text_field};
use crate::model::{
    CandidateItem, Category, Deliverable, ExtractionCandidate, Milestone, PaymentTerm, Section,
};
use crate::oracle::{with_retries, OracleContext};
use crate::orchestrator::Stage;
use crate::output::Anomaly;
use crate::prompts::ExtractionTemplate;
use futures::stream::{self, StreamExt};
use serde_json::{Map, Value};
use tracing::{debug, warn};

/// Candidates and anomalies from the extraction stage.
#[derive(Debug, Default)]
pub struct StructuredOutput {
    /// Ordered by section ordinal, then category, then answer order.
    pub candidates: Vec<ExtractionCandidate>,
    pub anomalies: Vec<Anomaly>,
}

struct PairOutcome {
    ordinal: usize,
    category: Category,
    candidates: Vec<ExtractionCandidate>,
    anomaly: Option<Anomaly>,
}

/// Run extraction over every relevant (section, category) pair.
pub async fn extract_candidates(sections: &[Section], ctx: &OracleContext) -> StructuredOutput {
    // Indices rather than `&Section` keep the stream item free of borrows,
    // which the spawned batch and HTTP futures need to stay `Send`.
    let pairs: Vec<(usize, Category)> = sections
        .iter()
        .enumerate()
        .flat_map(|(i, s)| s.relevance.categories().into_iter().map(move |c| (i, c)))
        .collect();
    ctx.units_start("extract", pairs.len());

    let mut outcomes: Vec<PairOutcome> = stream::iter(pairs)
        .map(|(index, category)| async move {
            let outcome = extract_pair(&sections[index], category, ctx).await;
            ctx.unit_complete("extract", outcome.anomaly.is_none());
            outcome
        })
        .buffer_unordered(ctx.concurrency.max(1))
        .collect()
        .await;

    outcomes.sort_by_key(|o| (o.ordinal, o.category));
    let mut output = StructuredOutput::default();
    for outcome in outcomes {
        output.candidates.extend(outcome.candidates);
        output.anomalies.extend(outcome.anomaly);
    }
    output
}

async fn extract_pair(section: &Section, category: Category, ctx: &OracleContext) -> PairOutcome {
    let template = ExtractionTemplate::for_category(category);
    let mut outcome = PairOutcome {
        ordinal: section.ordinal,
        category,
        candidates: Vec::new(),
        anomaly: None,
    };

    let mut last_answer = String::new();
    for correction in [false, true] {
        let label = format!("extract {} from '{}'", category, section.title);
        let answer = with_retries(&label, ctx.policy, &ctx.limiter, move || {
            ctx.oracle.extract(section, category, template, correction)
        })
        .await;

        let raw = match answer {
            Ok(raw) => raw,
            Err(e) => {
                warn!("{}: oracle failed: {}", label, e);
                let message = format!("extraction call failed: {e}");
                outcome.anomaly = Some(anomaly(section, category, message));
                return outcome;
            }
        };

        match parse_candidates(&raw, category) {
            Some(items) => {
                debug!("{}: {} candidates", label, items.len());
                outcome.candidates = items
                    .into_iter()
                    .map(|item| ExtractionCandidate {
                        section_title: section.title.clone(),
                        section_ordinal: section.ordinal,
                        item,
                    })
                    .collect();
                return outcome;
            }
            None if !correction => {
                debug!("{}: unparseable answer, retrying with correction", label);
            }
            None => {}
        }
        last_answer = raw;
    }

    warn!(
        "Section '{}': {} answer unparseable after correction",
        section.title, category
    );
    let preview: String = last_answer.trim().chars().take(80).collect();
    outcome.anomaly = Some(anomaly(
        section,
        category,
        format!("unparseable extraction answer after correction: {preview}"),
    ));
    outcome
}

fn anomaly(section: &Section, category: Category, message: String) -> Anomaly {
    Anomaly {
        stage: Stage::Structured,
        section: Some(section.title.clone()),
        category: Some(category),
        message,
    }
}

/// Parse an extraction answer. `None` when the answer has no usable shape;
/// records without any identifying field are skipped.
pub fn parse_candidates(raw: &str, category: Category) -> Option<Vec<CandidateItem>> {
    let value = extract_json(raw)?;
    let records = items_for(value, category.result_key())?;
    Some(
        records
            .iter()
            .filter_map(|record| coerce(record, category))
            .collect(),
    )
}

fn coerce(record: &Map<String, Value>, category: Category) -> Option<CandidateItem> {
    match category {
        Category::Milestones => {
            let description = text_field(record, &["description", "details"]);
            let name = text_field(record, &["name", "title", "milestone", "phase"])
                .or_else(|| description.clone())?;
            Some(CandidateItem::Milestone(Milestone {
                name,
                description: description.unwrap_or_default(),
                due_date: text_field(record, &["due_date", "date", "deadline"]),
                payment_amount: text_field(record, &["payment_amount", "amount", "payment"]),
                payment_percentage: text_field(record, &["payment_percentage", "percentage"]),
            }))
        }
        Category::Deliverables => {
            let description = text_field(record, &["description", "details"]);
            let name = text_field(record, &["name", "title", "deliverable"])
                .or_else(|| description.clone())?;
            Some(CandidateItem::Deliverable(Deliverable {
                name,
                description: description.unwrap_or_default(),
                delivery_date: text_field(record, &["delivery_date", "due_date", "date"]),
                acceptance_criteria: text_field(record, &["acceptance_criteria", "acceptance"]),
                related_milestone: text_field(record, &["related_milestone", "milestone"]),
            }))
        }
        Category::Payments => {
            let term = PaymentTerm {
                payment_type: text_field(record, &["payment_type", "type"])
                    .unwrap_or_else(|| "other".to_string()),
                amount: text_field(record, &["amount", "payment_amount"]),
                currency: text_field(record, &["currency"]),
                percentage: text_field(record, &["percentage", "payment_percentage"]),
                trigger: text_field(record, &["trigger", "trigger_description", "condition"]),
                due_date: text_field(record, &["due_date", "date"]),
                related_milestone: text_field(record, &["related_milestone", "milestone"]),
                related_deliverable: text_field(record, &["related_deliverable", "deliverable"]),
                description: text_field(record, &["description", "name"]),
            };
            let identified = term.amount.is_some()
                || term.percentage.is_some()
                || term.trigger.is_some()
                || term.related_milestone.is_some()
                || term.description.is_some();
            identified.then_some(CandidateItem::Payment(term))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_payment_answer_with_lenient_fields() {
        let raw = r#"```json
{"payment_terms": [{"payment_type": "milestone-based", "amount": "$5,000", "due_date": "2024-01-15", "related_milestone": "Kickoff", "percentage": 25}]}
```"#;
        let items = parse_candidates(raw, Category::Payments).unwrap();
        assert_eq!(items.len(), 1);
        let CandidateItem::Payment(p) = &items[0] else {
            panic!("expected a payment term");
        };
        assert_eq!(p.amount.as_deref(), Some("$5,000"));
        assert_eq!(p.due_date.as_deref(), Some("2024-01-15"));
        assert_eq!(p.percentage.as_deref(), Some("25"));
        assert_eq!(p.currency, None);
    }

    #[test]
    fn bare_arrays_and_aliases_are_accepted() {
        let raw = r#"[{"title": "Phase 1", "date": "2024-02-15", "amount": 12000}, {"due_date": null}]"#;
        let items = parse_candidates(raw, Category::Milestones).unwrap();
        assert_eq!(items.len(), 1, "nameless record skipped");
        let CandidateItem::Milestone(m) = &items[0] else {
            panic!("expected a milestone");
        };
        assert_eq!(m.name, "Phase 1");
        assert_eq!(m.description, "");
        assert_eq!(m.due_date.as_deref(), Some("2024-02-15"));
        assert_eq!(m.payment_amount.as_deref(), Some("12000"));
    }

    #[test]
    fn empty_payment_record_is_skipped() {
        let raw = r#"{"payment_terms": [{"payment_type": "fixed"}]}"#;
        assert_eq!(parse_candidates(raw, Category::Payments), Some(vec![]));
    }

    #[test]
    fn prose_is_unparseable() {
        assert_eq!(
            parse_candidates("There are no deliverables in this section.", Category::Deliverables),
            None
        );
    }
}
