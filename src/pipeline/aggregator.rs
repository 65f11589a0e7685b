//! Analysis aggregator: folds per-email AI analyses into one ordered
//! content stream.
//!
//! Flow:
//! 1. Confidence gate (invalid or below threshold → warning, dropped)
//! 2. Re-run dedup per `(email, kind)`: highest confidence wins
//! 3. Rank by `(suggested_position ↑, confidence ↓, email_id ↑)`
//! 4. Content-bearing analyses become blocks, image instructions are
//!    forwarded in rank order, `instructions` analyses become directives on
//!    their email's block

use std::cmp::Ordering;
use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::model::{AiAnalysis, AnalysisKind, ImageInstruction, Warning};
use crate::pipeline::Outcome;

static SHORTEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(shorten|shorter|condense|trim|abridge|skró|skroc)\w*")
        .expect("static regex")
});
static OMIT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(omit|remove|skip|drop|delete|exclude|pomiń|pomin|usuń|usun)\w*")
        .expect("static regex")
});
static QUOTE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(quote|blockquote|cytat|cytuj)\w*").expect("static regex")
});

/// Edit applied by the builder to a content block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "directive", content = "text", rename_all = "snake_case")]
pub enum Directive {
    /// Keep the first half of the block.
    Shorten,
    /// Leave the block out of the article.
    Omit,
    /// Render the block as a quotation.
    Quote,
    /// Free-form instruction kept as an editor note above the block.
    Note(String),
}

impl Directive {
    /// Interpret a free-text instruction. Omission wins over other keywords.
    pub fn parse(instruction: &str) -> Self {
        if OMIT.is_match(instruction) {
            Self::Omit
        } else if SHORTEN.is_match(instruction) {
            Self::Shorten
        } else if QUOTE.is_match(instruction) {
            Self::Quote
        } else {
            Self::Note(instruction.trim().to_string())
        }
    }
}

/// A unit of article prose tagged with its source email.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentBlock {
    pub email_id: String,
    pub text: String,
    pub kind: AnalysisKind,
    pub confidence: f32,
    pub suggested_position: i64,
    pub directives: Vec<Directive>,
}

/// Image instruction with its source email and rank order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourcedInstruction {
    pub email_id: String,
    pub instruction: ImageInstruction,
    /// Index in the aggregated instruction stream; breaks priority ties.
    pub order: usize,
}

/// Output of one aggregation run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Aggregation {
    pub blocks: Vec<ContentBlock>,
    pub image_instructions: Vec<SourcedInstruction>,
    /// Union of analysis tags in rank order, case-insensitively deduplicated.
    pub tags: Vec<String>,
    /// Category of the highest-ranked analysis that has one.
    pub category: Option<String>,
}

impl Aggregation {
    /// Source email of every block, in block order.
    pub fn block_emails(&self) -> Vec<&str> {
        self.blocks.iter().map(|b| b.email_id.as_str()).collect()
    }
}

/// Deterministic merge of analyses into content blocks.
#[derive(Debug, Clone)]
pub struct AnalysisAggregator {
    min_confidence: f32,
}

impl Default for AnalysisAggregator {
    fn default() -> Self {
        Self::new(0.5)
    }
}

impl AnalysisAggregator {
    pub fn new(min_confidence: f32) -> Self {
        Self { min_confidence }
    }

    /// Aggregate a set of analyses. Input order never affects the output.
    pub fn aggregate(&self, analyses: &[AiAnalysis]) -> Outcome<Aggregation> {
        let mut warnings = Vec::new();

        let accepted = self.gate(analyses, &mut warnings);
        let mut ranked = dedup_reruns(accepted, &mut warnings);
        ranked.sort_by(|a, b| rank(a, b));

        let mut aggregation = Aggregation::default();
        let mut seen_tags = HashSet::new();
        let mut directives: Vec<&AiAnalysis> = Vec::new();

        for &analysis in &ranked {
            for tag in &analysis.tags {
                let tag = tag.trim();
                if !tag.is_empty() && seen_tags.insert(tag.to_lowercase()) {
                    aggregation.tags.push(tag.to_string());
                }
            }
            if aggregation.category.is_none() {
                aggregation.category = analysis
                    .category
                    .as_deref()
                    .map(str::trim)
                    .filter(|c| !c.is_empty())
                    .map(str::to_string);
            }

            for instruction in &analysis.image_instructions {
                let order = aggregation.image_instructions.len();
                aggregation.image_instructions.push(SourcedInstruction {
                    email_id: analysis.email_id.clone(),
                    instruction: instruction.clone(),
                    order,
                });
            }

            match analysis.kind {
                AnalysisKind::MainContent | AnalysisKind::Mixed => {
                    let text = analysis.main_content.as_deref().map(str::trim).unwrap_or("");
                    if text.is_empty() {
                        warnings.push(Warning::EmptyContent {
                            email_id: analysis.email_id.clone(),
                        });
                        continue;
                    }
                    aggregation.blocks.push(ContentBlock {
                        email_id: analysis.email_id.clone(),
                        text: text.to_string(),
                        kind: analysis.kind,
                        confidence: analysis.confidence,
                        suggested_position: analysis.suggested_position,
                        directives: Vec::new(),
                    });
                }
                AnalysisKind::Instructions => directives.push(analysis),
                AnalysisKind::ImagesOnly => {}
            }
        }

        for analysis in directives {
            let Some(text) = analysis
                .instructions
                .as_deref()
                .map(str::trim)
                .filter(|t| !t.is_empty())
            else {
                warnings.push(Warning::EmptyContent {
                    email_id: analysis.email_id.clone(),
                });
                continue;
            };

            let directive = Directive::parse(text);
            let mut applied = false;
            for block in aggregation
                .blocks
                .iter_mut()
                .filter(|b| b.email_id == analysis.email_id)
            {
                block.directives.push(directive.clone());
                applied = true;
            }

            if applied {
                debug!(email_id = %analysis.email_id, ?directive, "Attached directive to block");
            } else {
                warnings.push(Warning::UnresolvedInstruction {
                    email_id: analysis.email_id.clone(),
                    instruction: text.to_string(),
                });
            }
        }

        for warning in &warnings {
            warn!(%warning, "Aggregation warning");
        }
        info!(
            input = analyses.len(),
            blocks = aggregation.blocks.len(),
            image_instructions = aggregation.image_instructions.len(),
            warnings = warnings.len(),
            "Aggregated analyses"
        );

        Outcome::new(aggregation, warnings)
    }

    fn gate<'a>(&self, analyses: &'a [AiAnalysis], warnings: &mut Vec<Warning>) -> Vec<&'a AiAnalysis> {
        analyses
            .iter()
            .filter(|a| {
                if !a.confidence.is_finite() || !(0.0..=1.0).contains(&a.confidence) {
                    warnings.push(Warning::InvalidConfidence {
                        email_id: a.email_id.clone(),
                        analysis: a.kind,
                    });
                    return false;
                }
                if a.confidence < self.min_confidence {
                    warnings.push(Warning::LowConfidence {
                        email_id: a.email_id.clone(),
                        analysis: a.kind,
                        confidence: a.confidence,
                        threshold: self.min_confidence,
                    });
                    return false;
                }
                true
            })
            .collect()
    }
}

/// Keep the best analysis per `(email, kind)`.
fn dedup_reruns<'a>(mut accepted: Vec<&'a AiAnalysis>, warnings: &mut Vec<Warning>) -> Vec<&'a AiAnalysis> {
    accepted.sort_by(|a, b| {
        a.email_id
            .cmp(&b.email_id)
            .then_with(|| a.kind.label().cmp(b.kind.label()))
            .then_with(|| b.confidence.total_cmp(&a.confidence))
            .then_with(|| a.suggested_position.cmp(&b.suggested_position))
            .then_with(|| content_key(a).cmp(&content_key(b)))
    });

    let mut kept: Vec<&AiAnalysis> = Vec::with_capacity(accepted.len());
    for analysis in accepted {
        let duplicate = kept
            .last()
            .is_some_and(|k| k.email_id == analysis.email_id && k.kind == analysis.kind);
        if duplicate {
            warnings.push(Warning::SupersededAnalysis {
                email_id: analysis.email_id.clone(),
                analysis: analysis.kind,
            });
        } else {
            kept.push(analysis);
        }
    }
    kept
}

/// Merge order: position ascending, confidence descending, email id.
fn rank(a: &AiAnalysis, b: &AiAnalysis) -> Ordering {
    a.suggested_position
        .cmp(&b.suggested_position)
        .then_with(|| b.confidence.total_cmp(&a.confidence))
        .then_with(|| a.email_id.cmp(&b.email_id))
        .then_with(|| a.kind.label().cmp(b.kind.label()))
}

fn content_key(a: &AiAnalysis) -> (&str, &str) {
    (
        a.main_content.as_deref().unwrap_or(""),
        a.instructions.as_deref().unwrap_or(""),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ImagePosition;

    fn content(email: &str, position: i64, confidence: f32, text: &str) -> AiAnalysis {
        AiAnalysis {
            email_id: email.into(),
            kind: AnalysisKind::MainContent,
            confidence,
            main_content: Some(text.into()),
            instructions: None,
            image_instructions: vec![],
            suggested_position: position,
            tags: vec![],
            category: None,
        }
    }

    fn instruction(email: &str, text: &str) -> AiAnalysis {
        AiAnalysis {
            kind: AnalysisKind::Instructions,
            main_content: None,
            instructions: Some(text.into()),
            ..content(email, 0, 0.9, "")
        }
    }

    fn order(outcome: &Outcome<Aggregation>) -> Vec<&str> {
        outcome.value.block_emails()
    }

    #[test]
    fn orders_by_position_then_confidence_then_email() {
        let analyses = vec![
            content("c", 1, 0.7, "C"),
            content("b", 0, 0.6, "B"),
            content("a", 0, 0.9, "A"),
            content("d", 1, 0.7, "D"),
        ];
        let outcome = AnalysisAggregator::default().aggregate(&analyses);
        assert_eq!(order(&outcome), vec!["a", "b", "c", "d"]);
        assert!(outcome.warnings.is_empty());
    }

    #[test]
    fn input_order_does_not_change_output() {
        let mut analyses = vec![
            content("x", 2, 0.8, "X"),
            content("y", 1, 0.8, "Y"),
            content("z", 1, 0.95, "Z"),
        ];
        let first = AnalysisAggregator::default().aggregate(&analyses);
        analyses.reverse();
        let second = AnalysisAggregator::default().aggregate(&analyses);
        analyses.swap(0, 1);
        let third = AnalysisAggregator::default().aggregate(&analyses);
        assert_eq!(first.value, second.value);
        assert_eq!(first.value, third.value);
        assert_eq!(order(&first), vec!["z", "y", "x"]);
    }

    #[test]
    fn low_confidence_dropped_with_warning() {
        let analyses = vec![content("a", 0, 0.49, "A"), content("b", 1, 0.5, "B")];
        let outcome = AnalysisAggregator::default().aggregate(&analyses);
        assert_eq!(order(&outcome), vec!["b"]);
        assert!(matches!(
            outcome.warnings.as_slice(),
            [Warning::LowConfidence { email_id, .. }] if email_id == "a"
        ));
    }

    #[test]
    fn invalid_confidence_dropped() {
        let analyses = vec![content("a", 0, f32::NAN, "A"), content("b", 0, 1.5, "B")];
        let outcome = AnalysisAggregator::default().aggregate(&analyses);
        assert!(outcome.value.blocks.is_empty());
        assert_eq!(outcome.warnings.len(), 2);
    }

    #[test]
    fn rerun_keeps_highest_confidence() {
        let analyses = vec![content("a", 0, 0.6, "old"), content("a", 0, 0.8, "new")];
        let outcome = AnalysisAggregator::default().aggregate(&analyses);
        assert_eq!(outcome.value.blocks.len(), 1);
        assert_eq!(outcome.value.blocks[0].text, "new");
        assert!(matches!(
            outcome.warnings.as_slice(),
            [Warning::SupersededAnalysis { .. }]
        ));
    }

    #[test]
    fn instruction_attaches_to_sibling_block() {
        let analyses = vec![content("a", 0, 0.9, "Body"), instruction("a", "Please shorten this")];
        let outcome = AnalysisAggregator::default().aggregate(&analyses);
        assert_eq!(outcome.value.blocks[0].directives, vec![Directive::Shorten]);
        assert!(outcome.warnings.is_empty());
    }

    #[test]
    fn instruction_without_sibling_is_unresolved() {
        let analyses = vec![content("a", 0, 0.9, "Body"), instruction("b", "shorten")];
        let outcome = AnalysisAggregator::default().aggregate(&analyses);
        assert!(outcome.value.blocks[0].directives.is_empty());
        assert!(matches!(
            outcome.warnings.as_slice(),
            [Warning::UnresolvedInstruction { email_id, .. }] if email_id == "b"
        ));
    }

    #[test]
    fn images_only_instructions_forwarded_unchanged() {
        let image = ImageInstruction {
            image_name: "hero.jpg".into(),
            instruction: "lead".into(),
            position: ImagePosition::Top,
            priority: 5,
        };
        let analyses = vec![
            content("a", 0, 0.9, "Body"),
            AiAnalysis {
                kind: AnalysisKind::ImagesOnly,
                main_content: None,
                image_instructions: vec![image.clone()],
                ..content("a", 3, 0.8, "")
            },
        ];
        let outcome = AnalysisAggregator::default().aggregate(&analyses);
        assert_eq!(outcome.value.blocks.len(), 1);
        assert_eq!(outcome.value.image_instructions.len(), 1);
        assert_eq!(outcome.value.image_instructions[0].instruction, image);
        assert_eq!(outcome.value.image_instructions[0].email_id, "a");
    }

    #[test]
    fn empty_main_content_warns() {
        let analyses = vec![content("a", 0, 0.9, "   ")];
        let outcome = AnalysisAggregator::default().aggregate(&analyses);
        assert!(outcome.value.blocks.is_empty());
        assert!(matches!(outcome.warnings.as_slice(), [Warning::EmptyContent { .. }]));
    }

    #[test]
    fn tags_and_category_merged_in_rank_order() {
        let mut first = content("a", 0, 0.9, "A");
        first.tags = vec!["Rust".into(), "news".into()];
        let mut second = content("b", 1, 0.9, "B");
        second.tags = vec!["rust".into(), "events".into()];
        second.category = Some("Community".into());
        let outcome = AnalysisAggregator::default().aggregate(&[second, first]);
        assert_eq!(outcome.value.tags, vec!["Rust", "news", "events"]);
        assert_eq!(outcome.value.category.as_deref(), Some("Community"));
    }

    #[test]
    fn directive_parsing() {
        assert_eq!(Directive::parse("Skróć ten tekst"), Directive::Shorten);
        assert_eq!(Directive::parse("condense to one paragraph"), Directive::Shorten);
        assert_eq!(Directive::parse("Pomiń ten mail"), Directive::Omit);
        assert_eq!(Directive::parse("remove, do not shorten"), Directive::Omit);
        assert_eq!(Directive::parse("use as a quote"), Directive::Quote);
        assert_eq!(
            Directive::parse("  mention the date  "),
            Directive::Note("mention the date".into())
        );
    }
}
