use crate::schema::{Dataset, Metric, Status};
use crate::store::Document;
use crate::utils::{coerce_number, coerce_optional_number, coerce_string};
use serde::{Deserialize, Serialize, Serializer};

/// Collection tag carried by rows built by the location merge.
pub const MERGED_COLLECTION: &str = "cross-collection";

/// Fields every dataset shares.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordHeader {
    pub id: String,
    /// Business key; the store id when the document has none.
    pub code: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(rename = "type", default)]
    pub institution_type: Option<String>,
    #[serde(default)]
    pub status_raw: Option<String>,
    pub status: Status,
    /// Collection the record was read from.
    #[serde(rename = "__collection")]
    pub collection: String,
}

impl RecordHeader {
    pub fn from_document(doc: &Document, collection: &str) -> Self {
        let status_raw = coerce_string(doc.get("status"));
        let code = coerce_string(doc.get("code"))
            .filter(|c| !c.trim().is_empty())
            .unwrap_or_else(|| doc.id.clone());

        Self {
            id: doc.id.clone(),
            code,
            name: coerce_string(doc.get("name")),
            location: coerce_string(doc.get("location")),
            institution_type: coerce_string(doc.get("type")),
            status: Status::from_raw(status_raw.as_deref()),
            status_raw,
            collection: collection.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct FinanceRecord {
    #[serde(flatten)]
    pub header: RecordHeader,
    pub rent: f64,
    pub salary: f64,
    pub electricity: f64,
    pub misc: f64,
    pub income: f64,
    pub staff: f64,
}

impl FinanceRecord {
    pub fn from_document(doc: &Document, collection: &str) -> Self {
        Self {
            header: RecordHeader::from_document(doc, collection),
            rent: coerce_number(doc.get("rent")),
            salary: coerce_number(doc.get("salary")),
            electricity: coerce_number(doc.get("electricity")),
            misc: coerce_number(doc.get("misc")),
            income: coerce_number(doc.get("income")),
            staff: coerce_number(doc.get("staff")),
        }
    }

    /// Always recomputed from the four cost fields, never stored.
    pub fn expenditure(&self) -> f64 {
        self.rent + self.salary + self.electricity + self.misc
    }

    pub fn profit(&self) -> f64 {
        self.income - self.expenditure()
    }

    /// `None` for metrics of other datasets.
    pub fn metric(&self, metric: Metric) -> Option<f64> {
        match metric {
            Metric::Income => Some(self.income),
            Metric::Rent => Some(self.rent),
            Metric::Salary => Some(self.salary),
            Metric::Electricity => Some(self.electricity),
            Metric::Misc => Some(self.misc),
            Metric::Staff => Some(self.staff),
            Metric::Expenditure => Some(self.expenditure()),
            Metric::Profit => Some(self.profit()),
            _ => None,
        }
    }
}

#[derive(Serialize)]
struct FinanceRecordWire<'a> {
    #[serde(flatten)]
    header: &'a RecordHeader,
    rent: f64,
    salary: f64,
    electricity: f64,
    misc: f64,
    income: f64,
    staff: f64,
    expenditure: f64,
    profit: f64,
}

impl Serialize for FinanceRecord {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        FinanceRecordWire {
            header: &self.header,
            rent: self.rent,
            salary: self.salary,
            electricity: self.electricity,
            misc: self.misc,
            income: self.income,
            staff: self.staff,
            expenditure: self.expenditure(),
            profit: self.profit(),
        }
        .serialize(serializer)
    }
}

/// Sports counters are optional: absence means the institution does not
/// track the figure, which is different from a tracked zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SportsRecord {
    #[serde(flatten)]
    pub header: RecordHeader,
    #[serde(default)]
    pub teams: Option<f64>,
    #[serde(default)]
    pub coaches: Option<f64>,
    #[serde(default)]
    pub playgrounds: Option<f64>,
    #[serde(default)]
    pub events: Option<f64>,
    #[serde(default)]
    pub medals: Option<f64>,
    #[serde(default)]
    pub budget: Option<f64>,
}

impl SportsRecord {
    pub fn from_document(doc: &Document, collection: &str) -> Self {
        Self {
            header: RecordHeader::from_document(doc, collection),
            teams: coerce_optional_number(doc.get("teams")),
            coaches: coerce_optional_number(doc.get("coaches")),
            playgrounds: coerce_optional_number(doc.get("playgrounds")),
            events: coerce_optional_number(doc.get("events")),
            medals: coerce_optional_number(doc.get("medals")),
            budget: coerce_optional_number(doc.get("budget")),
        }
    }

    pub fn metric(&self, metric: Metric) -> Option<f64> {
        match metric {
            Metric::Teams => self.teams,
            Metric::Coaches => self.coaches,
            Metric::Playgrounds => self.playgrounds,
            Metric::Events => self.events,
            Metric::Medals => self.medals,
            Metric::Budget => self.budget,
            _ => None,
        }
    }
}

/// `pass_rate` and `dropout_rate` are fractions in [0, 1]; `avg_grade` is on
/// a 0-10 scale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EducationRecord {
    #[serde(flatten)]
    pub header: RecordHeader,
    #[serde(default)]
    pub students: Option<f64>,
    #[serde(default)]
    pub teachers: Option<f64>,
    #[serde(default)]
    pub pass_rate: Option<f64>,
    #[serde(default)]
    pub avg_grade: Option<f64>,
    #[serde(default)]
    pub dropout_rate: Option<f64>,
    #[serde(default)]
    pub labs: Option<f64>,
    #[serde(default)]
    pub library_books: Option<f64>,
    #[serde(default)]
    pub programs: Option<f64>,
}

impl EducationRecord {
    pub fn from_document(doc: &Document, collection: &str) -> Self {
        Self {
            header: RecordHeader::from_document(doc, collection),
            students: coerce_optional_number(doc.get("students")),
            teachers: coerce_optional_number(doc.get("teachers")),
            pass_rate: coerce_optional_number(doc.get("pass_rate")),
            avg_grade: coerce_optional_number(doc.get("avg_grade")),
            dropout_rate: coerce_optional_number(doc.get("dropout_rate")),
            labs: coerce_optional_number(doc.get("labs")),
            library_books: coerce_optional_number(doc.get("library_books")),
            programs: coerce_optional_number(doc.get("programs")),
        }
    }

    pub fn metric(&self, metric: Metric) -> Option<f64> {
        match metric {
            Metric::Students => self.students,
            Metric::Teachers => self.teachers,
            Metric::PassRate => self.pass_rate,
            Metric::AvgGrade => self.avg_grade,
            Metric::DropoutRate => self.dropout_rate,
            Metric::Labs => self.labs,
            Metric::LibraryBooks => self.library_books,
            Metric::Programs => self.programs,
            _ => None,
        }
    }
}

/// One row of the location join. Several finance documents may share a
/// location; sports and education keep the last document seen.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergedLocationRecord {
    /// Empty when the source documents had no location.
    pub location: String,
    #[serde(default)]
    pub finance: Vec<FinanceRecord>,
    #[serde(default)]
    pub sports: Option<SportsRecord>,
    #[serde(default)]
    pub education: Option<EducationRecord>,
    /// Descriptive fields come from whichever record reached the row first.
    #[serde(default)]
    pub name: Option<String>,
    #[serde(rename = "type", default)]
    pub institution_type: Option<String>,
    pub status: Status,
}

impl MergedLocationRecord {
    pub fn new(location: impl Into<String>) -> Self {
        Self {
            location: location.into(),
            finance: Vec::new(),
            sports: None,
            education: None,
            name: None,
            institution_type: None,
            status: Status::Unknown,
        }
    }

    /// Finance metrics sum across the row's finance records; sports and
    /// education metrics read the single record, defaulting to zero.
    pub fn metric(&self, metric: Metric) -> f64 {
        match metric.dataset() {
            Dataset::Finance => self
                .finance
                .iter()
                .filter_map(|record| record.metric(metric))
                .sum(),
            Dataset::Sports => self
                .sports
                .as_ref()
                .and_then(|record| record.metric(metric))
                .unwrap_or(0.0),
            Dataset::Education => self
                .education
                .as_ref()
                .and_then(|record| record.metric(metric))
                .unwrap_or(0.0),
        }
    }

    fn is_unclaimed(&self) -> bool {
        self.finance.is_empty() && self.sports.is_none() && self.education.is_none()
    }

    /// Copies descriptive fields from `header` if the row has none yet.
    pub(crate) fn claim_descriptors(&mut self, header: &RecordHeader) {
        if self.is_unclaimed() {
            self.name = header.name.clone();
            self.institution_type = header.institution_type.clone();
            self.status = header.status;
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "dataset", rename_all = "snake_case")]
pub enum Record {
    Finance(FinanceRecord),
    Sports(SportsRecord),
    Education(EducationRecord),
    Merged(MergedLocationRecord),
}

impl Record {
    /// Normalizes a raw document into the record shape of `dataset`.
    pub fn from_document(dataset: Dataset, doc: &Document, collection: &str) -> Self {
        match dataset {
            Dataset::Finance => Record::Finance(FinanceRecord::from_document(doc, collection)),
            Dataset::Sports => Record::Sports(SportsRecord::from_document(doc, collection)),
            Dataset::Education => {
                Record::Education(EducationRecord::from_document(doc, collection))
            }
        }
    }

    /// `None` for merged rows, which aggregate several documents.
    pub fn header(&self) -> Option<&RecordHeader> {
        match self {
            Record::Finance(r) => Some(&r.header),
            Record::Sports(r) => Some(&r.header),
            Record::Education(r) => Some(&r.header),
            Record::Merged(_) => None,
        }
    }

    pub fn dataset(&self) -> Option<Dataset> {
        match self {
            Record::Finance(_) => Some(Dataset::Finance),
            Record::Sports(_) => Some(Dataset::Sports),
            Record::Education(_) => Some(Dataset::Education),
            Record::Merged(_) => None,
        }
    }

    pub fn id(&self) -> &str {
        match self {
            Record::Merged(r) => &r.location,
            _ => self.header().map_or("", |h| h.id.as_str()),
        }
    }

    pub fn code(&self) -> &str {
        match self {
            Record::Merged(r) => &r.location,
            _ => self.header().map_or("", |h| h.code.as_str()),
        }
    }

    pub fn name(&self) -> Option<&str> {
        match self {
            Record::Merged(r) => r.name.as_deref(),
            _ => self.header().and_then(|h| h.name.as_deref()),
        }
    }

    pub fn location(&self) -> Option<&str> {
        match self {
            Record::Merged(r) => Some(r.location.as_str()),
            _ => self.header().and_then(|h| h.location.as_deref()),
        }
    }

    pub fn institution_type(&self) -> Option<&str> {
        match self {
            Record::Merged(r) => r.institution_type.as_deref(),
            _ => self.header().and_then(|h| h.institution_type.as_deref()),
        }
    }

    pub fn status(&self) -> Status {
        match self {
            Record::Merged(r) => r.status,
            _ => self.header().map_or(Status::Unknown, |h| h.status),
        }
    }

    pub fn collection(&self) -> &str {
        match self {
            Record::Merged(_) => MERGED_COLLECTION,
            _ => self.header().map_or("", |h| h.collection.as_str()),
        }
    }

    /// Value of `metric` for this record; zero when the record does not carry it.
    pub fn metric_value(&self, metric: Metric) -> f64 {
        let value = match self {
            Record::Finance(r) => r.metric(metric),
            Record::Sports(r) => r.metric(metric),
            Record::Education(r) => r.metric(metric),
            Record::Merged(r) => Some(r.metric(metric)),
        };
        value.unwrap_or(0.0)
    }
}
