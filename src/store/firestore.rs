use crate::error::{QueryError, Result};
use crate::store::{Direction, Document, DocumentStore, StoreQuery};
use async_trait::async_trait;
use log::debug;
use reqwest::{Client, RequestBuilder, Response};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::future::Future;

const FIRESTORE_BASE_URL: &str = "https://firestore.googleapis.com/v1";
const PAGE_SIZE: u32 = 300;

#[derive(Debug, Clone)]
enum Auth {
    None,
    ApiKey(String),
    Bearer(String),
}

/// Firestore REST backing for [`DocumentStore`].
#[derive(Clone)]
pub struct FirestoreStore {
    client: Client,
    base_url: String,
    project_id: String,
    database: String,
    auth: Auth,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListResponse {
    #[serde(default)]
    documents: Vec<RawDocument>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawDocument {
    name: String,
    #[serde(default)]
    fields: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
struct RunQueryItem {
    document: Option<RawDocument>,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
    #[serde(default)]
    status: String,
}

impl FirestoreStore {
    pub fn new(project_id: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: FIRESTORE_BASE_URL.to_string(),
            project_id: project_id.into(),
            database: "(default)".to_string(),
            auth: Auth::None,
        }
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.auth = Auth::ApiKey(api_key.into());
        self
    }

    pub fn with_bearer_token(mut self, token: impl Into<String>) -> Self {
        self.auth = Auth::Bearer(token.into());
        self
    }

    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = database.into();
        self
    }

    /// Points the client at an emulator or proxy instead of the public endpoint.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn documents_root(&self) -> String {
        format!(
            "{}/projects/{}/databases/{}/documents",
            self.base_url, self.project_id, self.database
        )
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.auth {
            Auth::None => request,
            Auth::ApiKey(key) => request.query(&[("key", key)]),
            Auth::Bearer(token) => request.bearer_auth(token),
        }
    }

    async fn check(&self, collection: &str, res: Response) -> Result<Response> {
        let status = res.status();
        if status.is_success() {
            return Ok(res);
        }
        let text = res.text().await?;
        Err(classify_error(collection, status.as_u16(), &text))
    }
}

#[async_trait]
impl DocumentStore for FirestoreStore {
    async fn get_all(&self, collection: &str) -> Result<Vec<Document>> {
        let url = format!("{}/{}", self.documents_root(), collection);
        let url = &url;

        let documents = collect_pages(|page_token| async move {
            let mut request = self
                .client
                .get(url)
                .query(&[("pageSize", PAGE_SIZE.to_string())]);
            if let Some(token) = &page_token {
                request = request.query(&[("pageToken", token)]);
            }

            let res = self.authorize(request).send().await?;
            let page: ListResponse = self.check(collection, res).await?.json().await?;
            Ok::<_, QueryError>(page)
        })
        .await?;

        debug!("Listed {} documents from '{}'", documents.len(), collection);
        Ok(documents)
    }

    async fn get_by_query(&self, collection: &str, query: &StoreQuery) -> Result<Vec<Document>> {
        let url = format!("{}:runQuery", self.documents_root());
        let body = json!({ "structuredQuery": structured_query(collection, query) });

        let res = self.authorize(self.client.post(&url).json(&body)).send().await?;
        let items: Vec<RunQueryItem> = self.check(collection, res).await?.json().await?;

        let documents: Vec<Document> = items
            .into_iter()
            .filter_map(|item| item.document)
            .map(decode_document)
            .collect();
        debug!(
            "runQuery on '{}' returned {} documents",
            collection,
            documents.len()
        );
        Ok(documents)
    }
}

/// Requests pages until one comes back without a next-page token. The first
/// request carries no token; each later one carries the token of the page
/// before it.
async fn collect_pages<F, Fut>(mut fetch_page: F) -> Result<Vec<Document>>
where
    F: FnMut(Option<String>) -> Fut,
    Fut: Future<Output = Result<ListResponse>>,
{
    let mut documents = Vec::new();
    let mut page_token: Option<String> = None;

    loop {
        let page = fetch_page(page_token.take()).await?;
        documents.extend(page.documents.into_iter().map(decode_document));

        match page.next_page_token {
            Some(token) if !token.is_empty() => page_token = Some(token),
            _ => break,
        }
    }

    Ok(documents)
}

/// Builds the `structuredQuery` body for an equality + order + limit query.
pub fn structured_query(collection: &str, query: &StoreQuery) -> Value {
    let mut structured = Map::new();
    structured.insert("from".to_string(), json!([{ "collectionId": collection }]));

    let filters: Vec<Value> = query
        .equality
        .iter()
        .map(|term| {
            json!({
                "fieldFilter": {
                    "field": { "fieldPath": term.field },
                    "op": "EQUAL",
                    "value": encode_value(&term.value),
                }
            })
        })
        .collect();

    match filters.len() {
        0 => {}
        1 => {
            if let Some(filter) = filters.into_iter().next() {
                structured.insert("where".to_string(), filter);
            }
        }
        _ => {
            structured.insert(
                "where".to_string(),
                json!({ "compositeFilter": { "op": "AND", "filters": filters } }),
            );
        }
    }

    if let Some(order) = &query.order {
        let direction = match order.direction {
            Direction::Ascending => "ASCENDING",
            Direction::Descending => "DESCENDING",
        };
        structured.insert(
            "orderBy".to_string(),
            json!([{ "field": { "fieldPath": order.field }, "direction": direction }]),
        );
    }

    if let Some(limit) = query.limit {
        structured.insert("limit".to_string(), json!(limit));
    }

    Value::Object(structured)
}

/// Plain JSON to a Firestore typed value.
pub fn encode_value(value: &Value) -> Value {
    match value {
        Value::Null => json!({ "nullValue": null }),
        Value::Bool(b) => json!({ "booleanValue": b }),
        Value::Number(n) if n.is_i64() || n.is_u64() => json!({ "integerValue": n.to_string() }),
        Value::Number(n) => json!({ "doubleValue": n.as_f64() }),
        Value::String(s) => json!({ "stringValue": s }),
        Value::Array(items) => {
            json!({ "arrayValue": { "values": items.iter().map(encode_value).collect::<Vec<_>>() } })
        }
        Value::Object(map) => {
            let fields: Map<String, Value> = map
                .iter()
                .map(|(k, v)| (k.clone(), encode_value(v)))
                .collect();
            json!({ "mapValue": { "fields": fields } })
        }
    }
}

/// Firestore typed value to plain JSON. Integers arrive as strings and are
/// turned back into numbers; unknown kinds decode to null.
pub fn decode_value(value: &Value) -> Value {
    let Value::Object(typed) = value else {
        return Value::Null;
    };

    if let Some(s) = typed.get("stringValue") {
        return s.clone();
    }
    if let Some(i) = typed.get("integerValue") {
        return match i {
            Value::String(s) => s.parse::<i64>().map(Value::from).unwrap_or(Value::Null),
            other => other.clone(),
        };
    }
    if let Some(d) = typed.get("doubleValue") {
        return d.clone();
    }
    if let Some(b) = typed.get("booleanValue") {
        return b.clone();
    }
    if typed.contains_key("nullValue") {
        return Value::Null;
    }
    if let Some(t) = typed.get("timestampValue") {
        return t.clone();
    }
    if let Some(r) = typed.get("referenceValue") {
        return r.clone();
    }
    if let Some(array) = typed.get("arrayValue") {
        let values = array
            .get("values")
            .and_then(Value::as_array)
            .map(|items| items.iter().map(decode_value).collect())
            .unwrap_or_default();
        return Value::Array(values);
    }
    if let Some(map) = typed.get("mapValue") {
        return Value::Object(decode_fields(map.get("fields")));
    }
    Value::Null
}

fn decode_fields(fields: Option<&Value>) -> Map<String, Value> {
    fields
        .and_then(Value::as_object)
        .map(|fields| {
            fields
                .iter()
                .map(|(k, v)| (k.clone(), decode_value(v)))
                .collect()
        })
        .unwrap_or_default()
}

fn decode_document(raw: RawDocument) -> Document {
    // The id is the last segment of the resource name.
    let id = raw.name.rsplit('/').next().unwrap_or_default().to_string();
    let fields = raw
        .fields
        .iter()
        .map(|(k, v)| (k.clone(), decode_value(v)))
        .collect();
    Document::new(id, fields)
}

fn classify_error(collection: &str, status: u16, body: &str) -> QueryError {
    let parsed = serde_json::from_str::<ErrorEnvelope>(body).ok();
    let (code, message) = match &parsed {
        Some(envelope) => (envelope.error.status.as_str(), envelope.error.message.as_str()),
        None => ("", body),
    };

    if code == "FAILED_PRECONDITION" && message.to_lowercase().contains("index") {
        return QueryError::IndexUnavailable {
            collection: collection.to_string(),
            details: message.to_string(),
        };
    }

    QueryError::NetworkFailure(format!(
        "Firestore request on '{}' failed (status {}): {}",
        collection, status, message
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_typed_values() {
        let raw = RawDocument {
            name: "projects/p/databases/(default)/documents/schools/abc123".to_string(),
            fields: serde_json::from_value(json!({
                "name": { "stringValue": "Hill School" },
                "income": { "integerValue": "1500" },
                "rent": { "doubleValue": 12.5 },
                "open": { "booleanValue": true },
                "notes": { "nullValue": null },
                "tags": { "arrayValue": { "values": [{ "stringValue": "a" }] } },
                "address": { "mapValue": { "fields": { "city": { "stringValue": "Pune" } } } },
                "empty": { "arrayValue": {} }
            }))
            .unwrap(),
        };
        let doc = decode_document(raw);

        assert_eq!(doc.id, "abc123");
        assert_eq!(doc.get("name"), Some(&json!("Hill School")));
        assert_eq!(doc.get("income"), Some(&json!(1500)));
        assert_eq!(doc.get("rent"), Some(&json!(12.5)));
        assert_eq!(doc.get("open"), Some(&json!(true)));
        assert_eq!(doc.get("notes"), Some(&Value::Null));
        assert_eq!(doc.get("tags"), Some(&json!(["a"])));
        assert_eq!(doc.get("address"), Some(&json!({"city": "Pune"})));
        assert_eq!(doc.get("empty"), Some(&json!([])));
    }

    fn page(value: Value) -> ListResponse {
        serde_json::from_value(value).unwrap()
    }

    #[tokio::test]
    async fn test_collect_pages_follows_tokens() {
        let mut pages = vec![
            page(json!({
                "documents": [
                    { "name": "projects/p/databases/(default)/documents/schools/a", "fields": { "income": { "integerValue": "1" } } },
                    { "name": "projects/p/databases/(default)/documents/schools/b" }
                ],
                "nextPageToken": "t1"
            })),
            page(json!({
                "documents": [
                    { "name": "projects/p/databases/(default)/documents/schools/c", "fields": {} }
                ],
                "nextPageToken": "t2"
            })),
            page(json!({ "nextPageToken": "" })),
        ]
        .into_iter();
        let mut tokens_seen = Vec::new();

        let documents = collect_pages(|token| {
            tokens_seen.push(token);
            let next = pages.next();
            async move {
                next.ok_or_else(|| QueryError::NetworkFailure("ran past the last page".to_string()))
            }
        })
        .await
        .unwrap();

        let ids: Vec<&str> = documents.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
        assert_eq!(documents[0].get("income"), Some(&json!(1)));
        assert_eq!(
            tokens_seen,
            vec![None, Some("t1".to_string()), Some("t2".to_string())]
        );
    }

    #[tokio::test]
    async fn test_collect_pages_stops_on_error() {
        let mut calls = 0;
        let result = collect_pages(|_| {
            calls += 1;
            async { Err(QueryError::NetworkFailure("unreachable".to_string())) }
        })
        .await;

        assert!(matches!(result, Err(QueryError::NetworkFailure(_))));
        assert_eq!(calls, 1);
    }

    #[test]
    fn test_structured_query_shape() {
        let query = StoreQuery::new()
            .filter("status", "active")
            .filter("type", "school")
            .order_by("income", Direction::Descending)
            .limit(Some(3));
        let body = structured_query("schools", &query);

        assert_eq!(body["from"][0]["collectionId"], "schools");
        assert_eq!(body["where"]["compositeFilter"]["op"], "AND");
        let filters = body["where"]["compositeFilter"]["filters"].as_array().unwrap();
        assert_eq!(filters.len(), 2);
        assert_eq!(filters[0]["fieldFilter"]["op"], "EQUAL");
        assert_eq!(filters[0]["fieldFilter"]["value"]["stringValue"], "active");
        assert_eq!(body["orderBy"][0]["field"]["fieldPath"], "income");
        assert_eq!(body["orderBy"][0]["direction"], "DESCENDING");
        assert_eq!(body["limit"], 3);
    }

    #[test]
    fn test_single_filter_is_not_wrapped() {
        let query = StoreQuery::new().filter("status", "inactive");
        let body = structured_query("colleges", &query);
        assert!(body["where"]["fieldFilter"].is_object());
        assert!(body.get("orderBy").is_none());
        assert!(body.get("limit").is_none());
    }

    #[test]
    fn test_encode_numbers() {
        assert_eq!(encode_value(&json!(42)), json!({"integerValue": "42"}));
        assert_eq!(encode_value(&json!(4.5)), json!({"doubleValue": 4.5}));
    }

    #[test]
    fn test_missing_index_error_is_classified() {
        let body = r#"{"error":{"code":400,"message":"The query requires an index. You can create it here: https://console.firebase.google.com/...","status":"FAILED_PRECONDITION"}}"#;
        let err = classify_error("schools", 400, body);
        assert!(matches!(err, QueryError::IndexUnavailable { ref collection, .. } if collection == "schools"));

        let err = classify_error("schools", 503, "upstream unavailable");
        assert!(matches!(err, QueryError::NetworkFailure(_)));
    }
}
