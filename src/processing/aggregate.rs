//! Reassembly of per-chunk analysis results into one document-level verdict.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashSet};

/// Entity reported by the analysis collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    /// Entity category (`AMOUNT`, `DATE`, ...).
    #[serde(rename = "type")]
    pub entity_type: String,
    /// Extracted value.
    pub value: String,
    /// Page the entity was found on, when the analyzer reports one as an integer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page: Option<u64>,
    /// Any further fields, passed through untouched. A `page` that is not an integer
    /// (`"3"`, `null`) is kept here verbatim.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Entity {
    /// Build an entity without a page.
    pub fn new(entity_type: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            entity_type: entity_type.into(),
            value: value.into(),
            page: None,
            extra: Map::new(),
        }
    }

    /// Set the page.
    pub fn on_page(mut self, page: u64) -> Self {
        self.page = Some(page);
        self
    }

    /// Whether the analyzer reported a page at all, in any shape.
    pub fn has_page(&self) -> bool {
        self.page.is_some() || self.extra.contains_key("page")
    }

    /// Parse a loosely shaped entity, dropping it when `type` or `value` is missing.
    fn from_value(value: Value) -> Option<Self> {
        let Value::Object(mut map) = value else {
            return None;
        };
        let entity_type = scalar_text(map.remove("type")?)?;
        let value = scalar_text(map.remove("value")?)?;
        let page = map.get("page").and_then(Value::as_u64);
        if page.is_some() {
            map.remove("page");
        }
        map.remove("chunkIndex");
        Some(Self {
            entity_type,
            value,
            page,
            extra: map,
        })
    }
}

fn scalar_text(value: Value) -> Option<String> {
    match value {
        Value::String(text) if !text.is_empty() => Some(text),
        Value::Number(number) => Some(number.to_string()),
        Value::Bool(flag) => Some(flag.to_string()),
        _ => None,
    }
}

/// Analysis result for one chunk.
///
/// Deserialization accepts the flat shape (`classification`, `entities`) as well as the nested
/// shape (`classificationResult.documentClassification`, `processingResult.entities`). An
/// `error` may be any JSON value; null and empty strings do not count as failures.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(from = "RawChunkResult")]
pub struct ChunkResult {
    /// Index of the chunk (0 when the analyzer omitted it).
    pub chunk_index: usize,
    /// Document classification proposed for this chunk.
    pub classification: Option<String>,
    /// Valid entities in analyzer order.
    pub entities: Vec<Entity>,
    /// Failure description; set means the chunk failed.
    pub error: Option<String>,
}

impl ChunkResult {
    /// Whether the chunk failed.
    pub fn is_failed(&self) -> bool {
        self.error.is_some()
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawChunkResult {
    #[serde(default)]
    chunk_index: Option<usize>,
    #[serde(default)]
    classification: Option<String>,
    #[serde(default)]
    classification_result: Option<RawClassification>,
    #[serde(default)]
    entities: Option<Vec<Value>>,
    #[serde(default)]
    processing_result: Option<RawProcessing>,
    #[serde(default)]
    error: Option<Value>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawClassification {
    #[serde(default)]
    document_classification: Option<String>,
}

#[derive(Deserialize)]
struct RawProcessing {
    #[serde(default)]
    entities: Option<Vec<Value>>,
}

impl From<RawChunkResult> for ChunkResult {
    fn from(raw: RawChunkResult) -> Self {
        let classification = raw
            .classification
            .or_else(|| raw.classification_result.and_then(|c| c.document_classification))
            .filter(|label| !label.is_empty());
        let entities = raw
            .entities
            .or_else(|| raw.processing_result.and_then(|p| p.entities))
            .unwrap_or_default()
            .into_iter()
            .filter_map(Entity::from_value)
            .collect();
        let error = match raw.error {
            None | Some(Value::Null) | Some(Value::Bool(false)) => None,
            Some(Value::String(text)) if text.is_empty() => None,
            Some(Value::String(text)) => Some(text),
            Some(other) => Some(other.to_string()),
        };
        Self {
            chunk_index: raw.chunk_index.unwrap_or(0),
            classification,
            entities,
            error,
        }
    }
}

/// Entity in the aggregated output, tagged with the chunk it came from.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregatedEntity {
    /// The entity as reported.
    #[serde(flatten)]
    pub entity: Entity,
    /// Chunk the entity was first seen in.
    pub chunk_index: usize,
}

/// Chunk success counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunksSummary {
    /// Number of results received.
    pub total_chunks: usize,
    /// Results without an error.
    pub successful_chunks: usize,
    /// Results with an error.
    pub failed_chunks: usize,
}

/// Document-level verdict.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregatedResult {
    /// Document the result belongs to.
    pub document_id: String,
    /// Majority classification, if any chunk voted.
    pub classification: Option<String>,
    /// Share of votes won by the majority classification.
    pub classification_confidence: f64,
    /// Deduplicated entities ordered by chunk then page.
    pub entities: Vec<AggregatedEntity>,
    /// Chunk success counters.
    pub chunks_summary: ChunksSummary,
    /// Fewer than half of the chunks succeeded.
    pub partial_result: bool,
}

/// Count successful and failed chunks.
pub fn summarize_chunks(results: &[ChunkResult]) -> ChunksSummary {
    let failed_chunks = results.iter().filter(|result| result.is_failed()).count();
    ChunksSummary {
        total_chunks: results.len(),
        successful_chunks: results.len() - failed_chunks,
        failed_chunks,
    }
}

/// Most frequent classification among successful chunks, ties broken alphabetically.
///
/// Confidence is the winning count over the number of votes cast.
pub fn majority_vote(results: &[ChunkResult]) -> (Option<String>, f64) {
    let mut tally: BTreeMap<&str, usize> = BTreeMap::new();
    for result in results.iter().filter(|result| !result.is_failed()) {
        if let Some(label) = result.classification.as_deref() {
            *tally.entry(label).or_default() += 1;
        }
    }
    let votes: usize = tally.values().sum();
    let Some(max_count) = tally.values().copied().max() else {
        return (None, 0.0);
    };
    // BTreeMap iterates in ascending label order, so the first maximum wins ties.
    let winner = tally
        .into_iter()
        .find(|(_, count)| *count == max_count)
        .map(|(label, _)| label.to_string());
    (winner, max_count as f64 / votes as f64)
}

/// Merge entities across successful chunks.
///
/// Page-less entities keep only their first `(type, value)` occurrence; entities carrying a
/// `page` field of any shape are distinct observations and are always kept.
pub fn deduplicate_entities(results: &[ChunkResult]) -> Vec<AggregatedEntity> {
    let mut seen_without_page: HashSet<(&str, &str)> = HashSet::new();
    let mut entities = Vec::new();
    for result in results.iter().filter(|result| !result.is_failed()) {
        for entity in &result.entities {
            if !entity.has_page()
                && !seen_without_page.insert((entity.entity_type.as_str(), entity.value.as_str()))
            {
                continue;
            }
            entities.push(AggregatedEntity {
                entity: entity.clone(),
                chunk_index: result.chunk_index,
            });
        }
    }
    entities.sort_by_key(|aggregated| (aggregated.chunk_index, aggregated.entity.page.unwrap_or(0)));
    entities
}

/// Produce the document-level result from the complete set of chunk results.
pub fn aggregate_results(document_id: &str, results: &[ChunkResult]) -> AggregatedResult {
    let chunks_summary = summarize_chunks(results);
    // successful / total < 0.5; an empty set has no successful chunks
    let partial_result = chunks_summary.successful_chunks * 2 < chunks_summary.total_chunks
        || chunks_summary.total_chunks == 0;
    let (classification, classification_confidence) = majority_vote(results);
    let entities = deduplicate_entities(results);

    if partial_result {
        tracing::warn!(
            document_id,
            successful = chunks_summary.successful_chunks,
            total = chunks_summary.total_chunks,
            "Fewer than half of the chunks succeeded; result is partial"
        );
    }
    tracing::info!(
        document_id,
        classification = classification.as_deref().unwrap_or("none"),
        confidence = classification_confidence,
        entities = entities.len(),
        failed_chunks = chunks_summary.failed_chunks,
        "Aggregated chunk results"
    );

    AggregatedResult {
        document_id: document_id.to_string(),
        classification,
        classification_confidence,
        entities,
        chunks_summary,
        partial_result,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn classified(index: usize, label: &str) -> ChunkResult {
        ChunkResult {
            chunk_index: index,
            classification: Some(label.to_string()),
            ..Default::default()
        }
    }

    fn failed(index: usize) -> ChunkResult {
        ChunkResult {
            chunk_index: index,
            error: Some("analysis timed out".into()),
            ..Default::default()
        }
    }

    #[test]
    fn majority_wins_with_share_of_votes() {
        let results = [
            classified(0, "INVOICE"),
            classified(1, "INVOICE"),
            classified(2, "RECEIPT"),
        ];
        let (label, confidence) = majority_vote(&results);
        assert_eq!(label.as_deref(), Some("INVOICE"));
        assert!((confidence - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn ties_break_alphabetically() {
        let results = [classified(0, "RECEIPT"), classified(1, "INVOICE")];
        assert_eq!(majority_vote(&results), (Some("INVOICE".into()), 0.5));
    }

    #[test]
    fn no_votes_yield_no_classification() {
        assert_eq!(majority_vote(&[]), (None, 0.0));
        assert_eq!(majority_vote(&[failed(0), failed(1)]), (None, 0.0));
    }

    #[test]
    fn failed_chunks_do_not_vote() {
        let mut bad = classified(2, "CONTRACT");
        bad.error = Some("boom".into());
        let results = [classified(0, "INVOICE"), bad];
        assert_eq!(majority_vote(&results), (Some("INVOICE".into()), 1.0));
    }

    #[test]
    fn page_less_duplicates_collapse_but_paged_entities_stay() {
        let results = [
            ChunkResult {
                chunk_index: 0,
                entities: vec![
                    Entity::new("AMOUNT", "100"),
                    Entity::new("DATE", "2024-01-01").on_page(1),
                ],
                ..Default::default()
            },
            ChunkResult {
                chunk_index: 1,
                entities: vec![
                    Entity::new("AMOUNT", "100"),
                    Entity::new("DATE", "2024-01-01").on_page(1),
                ],
                ..Default::default()
            },
        ];
        let entities = deduplicate_entities(&results[..1]);
        assert_eq!(entities.len(), 2);

        let entities = deduplicate_entities(&results);
        assert_eq!(entities.len(), 3);
        assert_eq!(entities[0].chunk_index, 0);
        assert_eq!(entities[0].entity.entity_type, "AMOUNT");
        assert_eq!(entities[2].chunk_index, 1);
        assert_eq!(entities[2].entity.page, Some(1));
    }

    #[test]
    fn dedup_of_documented_example() {
        let results = [ChunkResult {
            chunk_index: 0,
            entities: vec![
                Entity::new("AMOUNT", "100"),
                Entity::new("AMOUNT", "100"),
                Entity::new("DATE", "2024-01-01").on_page(1),
            ],
            ..Default::default()
        }];
        assert_eq!(deduplicate_entities(&results).len(), 2);
    }

    #[test]
    fn non_integer_pages_still_count_as_paged() {
        let results: Vec<ChunkResult> = serde_json::from_value(json!([
            {
                "chunkIndex": 0,
                "entities": [
                    {"type": "DATE", "value": "x", "page": "3"},
                    {"type": "DATE", "value": "x", "page": "7"},
                    {"type": "DATE", "value": "x", "page": null},
                    {"type": "DATE", "value": "x"},
                    {"type": "DATE", "value": "x"}
                ]
            }
        ]))
        .expect("chunk results");

        let entities = deduplicate_entities(&results);
        assert_eq!(entities.len(), 4);
        assert!(entities[..3].iter().all(|e| e.entity.has_page()));
        assert!(!entities[3].entity.has_page());

        let body = serde_json::to_value(&entities).expect("serialize");
        assert_eq!(body[0]["page"], "3");
        assert_eq!(body[1]["page"], "7");
        assert!(body[2]["page"].is_null());
        assert!(body[2].as_object().is_some_and(|e| e.contains_key("page")));
    }

    #[test]
    fn entities_sort_by_chunk_then_page() {
        let results = [
            ChunkResult {
                chunk_index: 1,
                entities: vec![Entity::new("NAME", "b").on_page(9), Entity::new("NAME", "a")],
                ..Default::default()
            },
            ChunkResult {
                chunk_index: 0,
                entities: vec![Entity::new("NAME", "c").on_page(3)],
                ..Default::default()
            },
        ];
        let order: Vec<_> = deduplicate_entities(&results)
            .into_iter()
            .map(|e| e.entity.value)
            .collect();
        assert_eq!(order, vec!["c", "a", "b"]);
    }

    #[test]
    fn partial_flag_uses_strict_half() {
        let half = [classified(0, "A"), failed(1)];
        assert!(!aggregate_results("doc", &half).partial_result);

        let mut under: Vec<ChunkResult> = (0..49).map(|i| classified(i, "A")).collect();
        under.extend((49..100).map(failed));
        let result = aggregate_results("doc", &under);
        assert!(result.partial_result);
        assert_eq!(result.chunks_summary.successful_chunks, 49);
        assert_eq!(result.chunks_summary.failed_chunks, 51);
    }

    #[test]
    fn empty_input_is_partial_without_classification() {
        let result = aggregate_results("doc", &[]);
        assert_eq!(result.classification, None);
        assert_eq!(result.classification_confidence, 0.0);
        assert!(result.partial_result);
    }

    #[test]
    fn deserializes_flat_and_nested_shapes() {
        let results: Vec<ChunkResult> = serde_json::from_value(json!([
            {
                "chunkIndex": 0,
                "classification": "INVOICE",
                "entities": [
                    {"type": "AMOUNT", "value": "100", "confidence": 0.9},
                    {"type": "AMOUNT"},
                    {"value": "orphan"}
                ]
            },
            {
                "chunkIndex": 1,
                "classificationResult": {"documentClassification": "INVOICE"},
                "processingResult": {"entities": [{"type": "DATE", "value": "2024-01-01", "page": 2}]}
            },
            {"chunkIndex": 2, "error": {"Error": "States.Timeout"}},
            {"chunkIndex": 3, "classification": "RECEIPT", "error": ""}
        ]))
        .expect("chunk results");

        assert_eq!(results[0].entities.len(), 1);
        assert_eq!(results[0].entities[0].extra["confidence"], 0.9);
        assert_eq!(results[1].classification.as_deref(), Some("INVOICE"));
        assert_eq!(results[1].entities[0].page, Some(2));
        assert!(results[2].is_failed());
        assert!(!results[3].is_failed());

        let aggregated = aggregate_results("doc-9", &results);
        let body = serde_json::to_value(&aggregated).expect("serialize");
        assert_eq!(body["classification"], "INVOICE");
        assert_eq!(body["chunksSummary"]["failedChunks"], 1);
        assert_eq!(body["entities"][0]["confidence"], 0.9);
        assert_eq!(body["entities"][1]["chunkIndex"], 1);
    }
}
