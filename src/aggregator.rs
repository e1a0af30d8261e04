use crate::record::Record;
use crate::schema::{BreakdownMode, QueryIntent, StatusFilter};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BreakdownEntry {
    pub collection: String,
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateResult {
    pub total: f64,
    /// Empty unless the intent asked for a per-collection breakdown.
    pub breakdown: Vec<BreakdownEntry>,
    /// Records handed in, before the status filter.
    pub docs_read: usize,
    pub filtered_count: usize,
    pub status_applied: StatusFilter,
}

/// Reduces `records` to a total of `intent.metric`, with per-collection
/// subtotals when `intent.breakdown` is `collection`.
///
/// Breakdown groups follow `intent.collections` (zero when nothing matched),
/// then any other collection present in the filtered records in first-seen
/// order, so the subtotals always cover every filtered record.
pub fn aggregate(records: &[Record], intent: &QueryIntent) -> AggregateResult {
    let filtered: Vec<&Record> = records
        .iter()
        .filter(|record| intent.status.matches(record.status()))
        .collect();

    let mut total = 0.0;
    let mut groups: Vec<BreakdownEntry> = match intent.breakdown {
        BreakdownMode::Collection => intent
            .target_collections()
            .into_iter()
            .map(|collection| BreakdownEntry {
                collection,
                value: 0.0,
            })
            .collect(),
        BreakdownMode::None => Vec::new(),
    };

    for record in &filtered {
        let value = record.metric_value(intent.metric);
        total += value;

        if intent.breakdown == BreakdownMode::Collection {
            let collection = record.collection();
            match groups.iter_mut().find(|g| g.collection == collection) {
                Some(group) => group.value += value,
                None => groups.push(BreakdownEntry {
                    collection: collection.to_string(),
                    value,
                }),
            }
        }
    }

    AggregateResult {
        total,
        breakdown: groups,
        docs_read: records.len(),
        filtered_count: filtered.len(),
        status_applied: intent.status,
    }
}
