use crate::error::Result;
use crate::reader::{CollectionReader, DatasetQuery};
use crate::record::{EducationRecord, FinanceRecord, MergedLocationRecord, SportsRecord};
use crate::schema::{Dataset, Metric, StatusFilter};
use crate::store::DocumentStore;
use crate::utils::{active_filter, contains_ignore_case, eq_ignore_case};
use log::debug;
use std::collections::HashMap;

/// Filters applied to whole merged rows, after the join.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MergeFilters {
    pub location: Option<String>,
    pub status: StatusFilter,
    pub institution_type: Option<String>,
}

impl MergeFilters {
    pub fn matches(&self, row: &MergedLocationRecord) -> bool {
        if let Some(location) = active_filter(&self.location) {
            if !contains_ignore_case(Some(&row.location), location) {
                return false;
            }
        }
        if !self.status.matches(row.status) {
            return false;
        }
        if let Some(kind) = active_filter(&self.institution_type) {
            if !eq_ignore_case(row.institution_type.as_deref(), kind) {
                return false;
            }
        }
        true
    }
}

/// Rows of a location join plus how many documents were read to build them.
#[derive(Debug, Clone, PartialEq)]
pub struct MergeOutcome {
    pub rows: Vec<MergedLocationRecord>,
    pub docs_read: usize,
}

/// Joins dataset records on `location`.
///
/// Finance records accumulate, since many institutions can share a
/// location. A second sports or education record for the same location
/// replaces the first. Records without a location all share the `""` row.
/// Rows come out in the order their location was first seen.
pub fn merge_by_location(
    finance: &[FinanceRecord],
    sports: &[SportsRecord],
    education: &[EducationRecord],
) -> Vec<MergedLocationRecord> {
    let mut rows: Vec<MergedLocationRecord> = Vec::new();
    let mut positions: HashMap<String, usize> = HashMap::new();

    for record in finance {
        let row = row_for(&mut rows, &mut positions, record.header.location.as_deref());
        row.claim_descriptors(&record.header);
        row.finance.push(record.clone());
    }
    for record in sports {
        let row = row_for(&mut rows, &mut positions, record.header.location.as_deref());
        row.claim_descriptors(&record.header);
        if row.sports.is_some() {
            debug!("Location '{}' has more than one sports record", row.location);
        }
        row.sports = Some(record.clone());
    }
    for record in education {
        let row = row_for(&mut rows, &mut positions, record.header.location.as_deref());
        row.claim_descriptors(&record.header);
        if row.education.is_some() {
            debug!("Location '{}' has more than one education record", row.location);
        }
        row.education = Some(record.clone());
    }

    rows
}

fn row_for<'a>(
    rows: &'a mut Vec<MergedLocationRecord>,
    positions: &mut HashMap<String, usize>,
    location: Option<&str>,
) -> &'a mut MergedLocationRecord {
    let key = location.unwrap_or_default();
    let index = match positions.get(key) {
        Some(index) => *index,
        None => {
            rows.push(MergedLocationRecord::new(key));
            positions.insert(key.to_string(), rows.len() - 1);
            rows.len() - 1
        }
    };
    &mut rows[index]
}

/// Fetches each dataset the metrics touch (once, concurrently), joins them
/// on location and filters the joined rows.
pub async fn merge_by_location_metrics<S: DocumentStore>(
    reader: &CollectionReader<S>,
    metrics: &[Metric],
    filters: &MergeFilters,
) -> Result<MergeOutcome> {
    let wants = |dataset: Dataset| metrics.iter().any(|m| m.dataset() == dataset);
    let finance_collections = reader.config().finance_collections.clone();
    let unfiltered = DatasetQuery::default();

    let finance = async {
        if wants(Dataset::Finance) {
            reader.fetch_all(&finance_collections).await
        } else {
            Ok(Vec::new())
        }
    };
    let sports = async {
        if wants(Dataset::Sports) {
            reader.fetch_sports(&unfiltered).await.map(Some)
        } else {
            Ok(None)
        }
    };
    let education = async {
        if wants(Dataset::Education) {
            reader.fetch_education(&unfiltered).await.map(Some)
        } else {
            Ok(None)
        }
    };

    let (finance, sports, education) = futures::try_join!(finance, sports, education)?;

    let mut docs_read = finance.len();
    let sports = sports
        .map(|fetch| {
            docs_read += fetch.docs_read;
            fetch.records
        })
        .unwrap_or_default();
    let education = education
        .map(|fetch| {
            docs_read += fetch.docs_read;
            fetch.records
        })
        .unwrap_or_default();

    let mut rows = merge_by_location(&finance, &sports, &education);
    let joined = rows.len();
    rows.retain(|row| filters.matches(row));
    debug!(
        "Location merge read {} documents into {} rows, {} kept after filters",
        docs_read,
        joined,
        rows.len()
    );

    Ok(MergeOutcome { rows, docs_read })
}
