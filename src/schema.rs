use crate::config::EngineConfig;
use crate::error::{QueryError, Result};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
#[schemars(description = "Record family an institution document belongs to")]
pub enum Dataset {
    Finance,
    Sports,
    Education,
}

impl Dataset {
    pub const ALL: [Dataset; 3] = [Dataset::Finance, Dataset::Sports, Dataset::Education];

    pub fn as_str(&self) -> &'static str {
        match self {
            Dataset::Finance => "finance",
            Dataset::Sports => "sports",
            Dataset::Education => "education",
        }
    }
}

impl fmt::Display for Dataset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
#[schemars(
    description = "Numeric quantity to report. Finance: income, rent, salary, electricity, misc, staff, expenditure (rent+salary+electricity+misc), profit (income-expenditure). Sports: teams, coaches, playgrounds, events, medals, budget. Education: students, teachers, pass_rate (fraction 0-1), avg_grade (0-10), dropout_rate (fraction 0-1), labs, library_books, programs."
)]
pub enum Metric {
    Income,
    Rent,
    Salary,
    Electricity,
    Misc,
    Staff,
    Expenditure,
    Profit,
    Teams,
    Coaches,
    Playgrounds,
    Events,
    Medals,
    Budget,
    Students,
    Teachers,
    PassRate,
    AvgGrade,
    DropoutRate,
    Labs,
    LibraryBooks,
    Programs,
}

/// Finance fields the store keeps a composite index for. Computed fields
/// (`expenditure`, `profit`) and `staff` are never indexed.
pub const INDEXED_FINANCE_METRICS: [Metric; 5] = [
    Metric::Income,
    Metric::Rent,
    Metric::Salary,
    Metric::Electricity,
    Metric::Misc,
];

impl Metric {
    pub const ALL: [Metric; 22] = [
        Metric::Income,
        Metric::Rent,
        Metric::Salary,
        Metric::Electricity,
        Metric::Misc,
        Metric::Staff,
        Metric::Expenditure,
        Metric::Profit,
        Metric::Teams,
        Metric::Coaches,
        Metric::Playgrounds,
        Metric::Events,
        Metric::Medals,
        Metric::Budget,
        Metric::Students,
        Metric::Teachers,
        Metric::PassRate,
        Metric::AvgGrade,
        Metric::DropoutRate,
        Metric::Labs,
        Metric::LibraryBooks,
        Metric::Programs,
    ];

    pub fn dataset(&self) -> Dataset {
        match self {
            Metric::Income
            | Metric::Rent
            | Metric::Salary
            | Metric::Electricity
            | Metric::Misc
            | Metric::Staff
            | Metric::Expenditure
            | Metric::Profit => Dataset::Finance,
            Metric::Teams
            | Metric::Coaches
            | Metric::Playgrounds
            | Metric::Events
            | Metric::Medals
            | Metric::Budget => Dataset::Sports,
            Metric::Students
            | Metric::Teachers
            | Metric::PassRate
            | Metric::AvgGrade
            | Metric::DropoutRate
            | Metric::Labs
            | Metric::LibraryBooks
            | Metric::Programs => Dataset::Education,
        }
    }

    /// Whether a server-side ordered query may sort by this metric.
    ///
    /// Sports and education fields are stored verbatim, so every one of them
    /// can be ordered by the store.
    pub fn is_indexable(&self) -> bool {
        match self.dataset() {
            Dataset::Finance => INDEXED_FINANCE_METRICS.contains(self),
            Dataset::Sports | Dataset::Education => true,
        }
    }

    pub fn is_derived(&self) -> bool {
        matches!(self, Metric::Expenditure | Metric::Profit)
    }

    /// Document field name backing this metric.
    pub fn field_name(&self) -> &'static str {
        match self {
            Metric::Income => "income",
            Metric::Rent => "rent",
            Metric::Salary => "salary",
            Metric::Electricity => "electricity",
            Metric::Misc => "misc",
            Metric::Staff => "staff",
            Metric::Expenditure => "expenditure",
            Metric::Profit => "profit",
            Metric::Teams => "teams",
            Metric::Coaches => "coaches",
            Metric::Playgrounds => "playgrounds",
            Metric::Events => "events",
            Metric::Medals => "medals",
            Metric::Budget => "budget",
            Metric::Students => "students",
            Metric::Teachers => "teachers",
            Metric::PassRate => "pass_rate",
            Metric::AvgGrade => "avg_grade",
            Metric::DropoutRate => "dropout_rate",
            Metric::Labs => "labs",
            Metric::LibraryBooks => "library_books",
            Metric::Programs => "programs",
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.field_name())
    }
}

impl FromStr for Metric {
    type Err = QueryError;

    fn from_str(s: &str) -> Result<Self> {
        let needle = s.trim().to_lowercase();
        Metric::ALL
            .iter()
            .find(|m| m.field_name() == needle)
            .copied()
            .ok_or_else(|| QueryError::ParseFailure(format!("Unknown metric '{}'", s)))
    }
}

/// Canonical institution status derived from the free-text status field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Active,
    Inactive,
    Unknown,
}

impl Status {
    /// Case-insensitive substring match. `inactive` contains `active`, so it is
    /// checked first.
    pub fn from_raw(raw: Option<&str>) -> Self {
        let Some(raw) = raw else {
            return Status::Unknown;
        };
        let lowered = raw.to_lowercase();
        if lowered.contains("inactive") {
            Status::Inactive
        } else if lowered.contains("active") {
            Status::Active
        } else {
            Status::Unknown
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Active => "active",
            Status::Inactive => "inactive",
            Status::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
#[schemars(description = "Institution status to keep: active, inactive, or any (no filter)")]
pub enum StatusFilter {
    Active,
    Inactive,
    #[default]
    Any,
}

impl StatusFilter {
    pub fn matches(&self, status: Status) -> bool {
        match self {
            StatusFilter::Active => status == Status::Active,
            StatusFilter::Inactive => status == Status::Inactive,
            StatusFilter::Any => true,
        }
    }

    /// Value used for a store-side equality term, `None` for `any`.
    pub fn equality_value(&self) -> Option<&'static str> {
        match self {
            StatusFilter::Active => Some(Status::Active.as_str()),
            StatusFilter::Inactive => Some(Status::Inactive.as_str()),
            StatusFilter::Any => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StatusFilter::Active => "active",
            StatusFilter::Inactive => "inactive",
            StatusFilter::Any => "any",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
#[schemars(description = "Sort direction: asc (smallest first) or desc (largest first)")]
pub enum SortOrder {
    Asc,
    Desc,
}

impl SortOrder {
    pub fn as_str(&self) -> &'static str {
        match self {
            SortOrder::Asc => "asc",
            SortOrder::Desc => "desc",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
#[schemars(description = "Aggregation mode: none, or collection for per-collection subtotals")]
pub enum BreakdownMode {
    #[default]
    None,
    Collection,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct QueryIntent {
    pub metric: Metric,

    #[serde(default)]
    #[schemars(
        description = "Finance collections to query, e.g. [\"schools\"]. Ignored for sports and education metrics, which live in a single collection each."
    )]
    pub collections: Vec<String>,

    #[serde(default)]
    pub status: StatusFilter,

    #[serde(default)]
    pub breakdown: BreakdownMode,

    #[serde(default, alias = "typeFilter", skip_serializing_if = "Option::is_none")]
    #[schemars(
        description = "Institution category to match exactly (case-insensitive), e.g. \"school\". Omit when the user does not restrict by type."
    )]
    pub type_filter: Option<String>,

    #[serde(default, alias = "locationFilter", skip_serializing_if = "Option::is_none")]
    #[schemars(
        description = "Case-insensitive substring of the institution location, e.g. \"pune\". Omit when the user does not restrict by place."
    )]
    pub location_filter: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sort: Option<SortOrder>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(description = "Maximum number of records to return (1-100). Omit for all records.")]
    pub limit: Option<u32>,
}

impl QueryIntent {
    pub fn new(metric: Metric) -> Self {
        Self {
            metric,
            collections: Vec::new(),
            status: StatusFilter::Any,
            breakdown: BreakdownMode::None,
            type_filter: None,
            location_filter: None,
            sort: None,
            limit: None,
        }
    }

    pub fn with_collections<I, S>(mut self, collections: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.collections = collections.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_status(mut self, status: StatusFilter) -> Self {
        self.status = status;
        self
    }

    pub fn with_breakdown(mut self, breakdown: BreakdownMode) -> Self {
        self.breakdown = breakdown;
        self
    }

    pub fn with_type(mut self, type_filter: impl Into<String>) -> Self {
        self.type_filter = Some(type_filter.into());
        self
    }

    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location_filter = Some(location.into());
        self
    }

    pub fn with_sort(mut self, sort: SortOrder) -> Self {
        self.sort = Some(sort);
        self
    }

    pub fn with_limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Target collections with duplicates removed, first occurrence kept.
    pub fn target_collections(&self) -> Vec<String> {
        let mut seen: Vec<String> = Vec::with_capacity(self.collections.len());
        for name in &self.collections {
            if !seen.contains(name) {
                seen.push(name.clone());
            }
        }
        seen
    }

    /// Rejects intents that cannot be satisfied before any document is read.
    pub fn validate(&self, config: &EngineConfig) -> Result<()> {
        validate_limit(self.limit, config.max_limit)?;

        if self.metric.dataset() == Dataset::Finance {
            if self.collections.is_empty() {
                return Err(QueryError::ValidationFailure(format!(
                    "Metric '{}' needs at least one finance collection",
                    self.metric
                )));
            }
            for name in &self.collections {
                if !config.finance_collections.contains(name) {
                    return Err(QueryError::ValidationFailure(format!(
                        "Unknown finance collection '{}' (known: {})",
                        name,
                        config.finance_collections.join(", ")
                    )));
                }
            }
        }

        Ok(())
    }

    /// Generates a Gemini-compatible JSON schema (no $ref, $schema, or definitions)
    pub fn gemini_response_schema() -> serde_json::Result<Value> {
        clean_schema(schemars::schema_for!(QueryIntent))
    }
}

/// A question spanning several datasets, answered by joining rows on location.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct CrossCollectionIntent {
    #[schemars(description = "Metrics to report side by side; may mix finance, sports and education metrics")]
    pub metrics: Vec<Metric>,

    #[serde(default)]
    pub status: StatusFilter,

    #[serde(default, alias = "typeFilter", skip_serializing_if = "Option::is_none")]
    pub type_filter: Option<String>,

    #[serde(default, alias = "locationFilter", skip_serializing_if = "Option::is_none")]
    pub location_filter: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(description = "Metric to order rows by; must be one of `metrics`")]
    pub sort_metric: Option<Metric>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sort: Option<SortOrder>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(description = "Maximum number of location rows to return (1-100)")]
    pub limit: Option<u32>,
}

impl CrossCollectionIntent {
    pub fn new<I>(metrics: I) -> Self
    where
        I: IntoIterator<Item = Metric>,
    {
        Self {
            metrics: metrics.into_iter().collect(),
            status: StatusFilter::Any,
            type_filter: None,
            location_filter: None,
            sort_metric: None,
            sort: None,
            limit: None,
        }
    }

    /// Datasets touched by the requested metrics, each listed once in
    /// finance, sports, education order.
    pub fn datasets(&self) -> Vec<Dataset> {
        Dataset::ALL
            .into_iter()
            .filter(|dataset| self.metrics.iter().any(|m| m.dataset() == *dataset))
            .collect()
    }

    pub fn validate(&self, config: &EngineConfig) -> Result<()> {
        if self.metrics.is_empty() {
            return Err(QueryError::ValidationFailure(
                "Cross-collection query needs at least one metric".to_string(),
            ));
        }
        validate_limit(self.limit, config.max_limit)?;
        if let Some(metric) = self.sort_metric {
            if !self.metrics.contains(&metric) {
                return Err(QueryError::ValidationFailure(format!(
                    "Sort metric '{}' is not among the requested metrics",
                    metric
                )));
            }
        }
        Ok(())
    }

    pub fn gemini_response_schema() -> serde_json::Result<Value> {
        clean_schema(schemars::schema_for!(CrossCollectionIntent))
    }
}

fn validate_limit(limit: Option<u32>, max_limit: u32) -> Result<()> {
    match limit {
        Some(limit) if limit == 0 || limit > max_limit => Err(QueryError::ValidationFailure(
            format!("Limit {} is outside 1..={}", limit, max_limit),
        )),
        _ => Ok(()),
    }
}

/// Rewrites a schemars root schema into the OpenAPI subset Gemini accepts:
/// references are inlined, `Option<T>` becomes `nullable`, and keywords the
/// API rejects are dropped.
pub fn clean_schema(root: schemars::schema::RootSchema) -> serde_json::Result<Value> {
    let mut value = serde_json::to_value(&root)?;
    let definitions = value
        .get("definitions")
        .cloned()
        .unwrap_or(Value::Object(Default::default()));
    clean_node(&mut value, &definitions);
    Ok(value)
}

const DROPPED_KEYWORDS: [&str; 7] = [
    "$schema",
    "definitions",
    "title",
    "additionalProperties",
    "default",
    "format",
    "minimum",
];

fn clean_node(node: &mut Value, definitions: &Value) {
    let reference = node
        .get("$ref")
        .and_then(Value::as_str)
        .map(|r| r.trim_start_matches("#/definitions/").to_string());
    if let Some(name) = reference {
        let description = node.get("description").cloned();
        let mut target = definitions.get(&name).cloned().unwrap_or(Value::Null);
        if let (Some(description), Value::Object(map)) = (description, &mut target) {
            map.insert("description".to_string(), description);
        }
        *node = target;
    }

    if let Value::Array(items) = &mut *node {
        for item in items.iter_mut() {
            clean_node(item, definitions);
        }
        return;
    }
    let Value::Object(map) = &mut *node else {
        return;
    };

    for key in DROPPED_KEYWORDS {
        map.remove(key);
    }

    // `allOf: [X]` is how schemars attaches a description to a reference.
    if let Some(Value::Array(mut parts)) = map.remove("allOf") {
        if parts.len() == 1 {
            clean_node(&mut parts[0], definitions);
            if let Value::Object(inner) = parts.remove(0) {
                for (k, v) in inner {
                    map.entry(k).or_insert(v);
                }
            }
        } else {
            map.insert("allOf".to_string(), Value::Array(parts));
        }
    }

    if let Some(Value::Array(variants)) = map.remove("anyOf") {
        let non_null: Vec<Value> = variants
            .iter()
            .filter(|v| v.get("type").and_then(Value::as_str) != Some("null"))
            .cloned()
            .collect();
        if non_null.len() == 1 && non_null.len() < variants.len() {
            let mut inner = non_null[0].clone();
            clean_node(&mut inner, definitions);
            if let Value::Object(inner) = inner {
                for (k, v) in inner {
                    map.entry(k).or_insert(v);
                }
            }
            map.insert("nullable".to_string(), Value::Bool(true));
        } else {
            map.insert("anyOf".to_string(), Value::Array(variants));
        }
    }

    if let Some(Value::Array(types)) = map.get("type").cloned() {
        let concrete: Vec<&Value> = types.iter().filter(|t| t.as_str() != Some("null")).collect();
        if let Some(first) = concrete.first() {
            map.insert("type".to_string(), (*first).clone());
        }
        if concrete.len() < types.len() {
            map.insert("nullable".to_string(), Value::Bool(true));
        }
    }

    if let Some(Value::Array(values)) = map.get_mut("enum") {
        values.retain(|v| !v.is_null());
    }

    for (_, child) in map.iter_mut() {
        clean_node(child, definitions);
    }
}
