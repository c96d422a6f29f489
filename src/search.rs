use std::time::Duration;

use chrono::{Days, NaiveDate};
use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderValue, USER_AGENT};
use serde_json::{Value, json};

use crate::config::Connection;
use crate::error::SummaryError;

/// Largest page the output index hands back for a single date.
pub const MAX_DATE_DOCUMENTS: usize = 10_000;

/// The handful of search-index primitives the pipeline needs.
pub trait SearchClient: Send + Sync {
    fn search(&self, index: &str, query: &Value) -> Result<Value, SummaryError>;
    fn count(&self, index: &str, query: &Value) -> Result<u64, SummaryError>;
    fn bulk_index(&self, index: &str, documents: &[Value]) -> Result<(), SummaryError>;
    fn delete_by_query(&self, index: &str, query: &Value) -> Result<u64, SummaryError>;
    fn field_mapping(&self, index: &str) -> Result<Value, SummaryError>;
}

#[derive(Clone)]
pub struct SearchHttpClient {
    client: Client,
    host: String,
    username: Option<String>,
    password: Option<String>,
}

impl SearchHttpClient {
    pub fn new(connection: &Connection) -> Result<Self, SummaryError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("ospool-summary/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| SummaryError::SearchHttp(err.to_string()))?,
        );
        // Aggregations over a month of accounting records are slow.
        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(300))
            .build()
            .map_err(|err| SummaryError::SearchHttp(err.to_string()))?;
        Ok(Self {
            client,
            host: connection.host.trim_end_matches('/').to_string(),
            username: connection.username.clone(),
            password: connection.password.clone(),
        })
    }

    fn url(&self, index: &str, endpoint: &str) -> String {
        format!("{}/{}/{}", self.host, index, endpoint)
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.username {
            Some(username) => request.basic_auth(username, self.password.as_deref()),
            None => request,
        }
    }

    fn send(&self, request: RequestBuilder) -> Result<Value, SummaryError> {
        let response = self
            .authorized(request)
            .send()
            .map_err(|err| SummaryError::SearchHttp(err.to_string()))?;
        let response = Self::handle_status(response)?;
        response
            .json()
            .map_err(|err| SummaryError::MalformedResponse(err.to_string()))
    }

    fn handle_status(response: Response) -> Result<Response, SummaryError> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status().as_u16();
        let message = response
            .text()
            .unwrap_or_else(|_| "search request failed".to_string());
        Err(SummaryError::SearchStatus { status, message })
    }
}

impl SearchClient for SearchHttpClient {
    fn search(&self, index: &str, query: &Value) -> Result<Value, SummaryError> {
        let url = self.url(index, "_search");
        tracing::debug!(%url, "search");
        self.send(self.client.post(&url).json(query))
    }

    fn count(&self, index: &str, query: &Value) -> Result<u64, SummaryError> {
        let mut counted = query.clone();
        if let Some(body) = counted.as_object_mut() {
            body.insert("track_total_hits".to_string(), Value::Bool(true));
            body.insert("size".to_string(), json!(0));
        }
        let response = self.search(index, &counted)?;
        total_hits(&response)
    }

    fn bulk_index(&self, index: &str, documents: &[Value]) -> Result<(), SummaryError> {
        let action = json!({ "index": { "_index": index } }).to_string();
        let mut body = String::new();
        for document in documents {
            body.push_str(&action);
            body.push('\n');
            body.push_str(&document.to_string());
            body.push('\n');
        }

        let url = self.url(index, "_bulk");
        let response = self.send(
            self.client
                .post(&url)
                .header(CONTENT_TYPE, "application/x-ndjson")
                .body(body),
        )?;
        bulk_errors(&response)?;
        tracing::debug!(count = documents.len(), index, "indexed documents");
        Ok(())
    }

    fn delete_by_query(&self, index: &str, query: &Value) -> Result<u64, SummaryError> {
        let url = self.url(index, "_delete_by_query");
        let response = self.send(self.client.post(&url).json(query))?;
        let failures = response
            .get("failures")
            .and_then(Value::as_array)
            .map(|failures| failures.len())
            .unwrap_or(0);
        if failures > 0 {
            return Err(SummaryError::DeleteByQuery(response["failures"].to_string()));
        }
        Ok(response.get("deleted").and_then(Value::as_u64).unwrap_or(0))
    }

    fn field_mapping(&self, index: &str) -> Result<Value, SummaryError> {
        let url = self.url(index, "_mapping");
        self.send(self.client.get(&url))
    }
}

/// `hits.total.value`, accepting the pre-7.x bare number as well.
pub fn total_hits(response: &Value) -> Result<u64, SummaryError> {
    let total = &response["hits"]["total"];
    total
        .get("value")
        .and_then(Value::as_u64)
        .or_else(|| total.as_u64())
        .ok_or_else(|| SummaryError::MalformedResponse("missing hits.total".to_string()))
}

/// The `_source` of every hit.
pub fn hit_sources(response: &Value) -> Result<Vec<Value>, SummaryError> {
    let hits = response["hits"]["hits"]
        .as_array()
        .ok_or_else(|| SummaryError::MalformedResponse("missing hits.hits".to_string()))?;
    Ok(hits
        .iter()
        .filter_map(|hit| hit.get("_source").cloned())
        .collect())
}

fn bulk_errors(response: &Value) -> Result<(), SummaryError> {
    if !response.get("errors").and_then(Value::as_bool).unwrap_or(false) {
        return Ok(());
    }
    let items = response
        .get("items")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    let failed = items
        .iter()
        .filter_map(|item| item.get("index").and_then(|action| action.get("error")))
        .collect::<Vec<_>>();
    let sample = failed
        .iter()
        .take(3)
        .map(|error| error.to_string())
        .collect::<Vec<_>>()
        .join("; ");
    Err(SummaryError::BulkIndex(format!(
        "{} of {} documents rejected: {sample}",
        failed.len(),
        items.len()
    )))
}

/// Summary documents carry a bare `Date`; this matches exactly one day of them.
pub fn date_query(date: NaiveDate) -> Value {
    let next = date.checked_add_days(Days::new(1)).unwrap_or(date);
    json!({
        "query": {
            "range": {
                "Date": {
                    "gte": format!("{date}T00:00:00"),
                    "lt": format!("{next}T00:00:00"),
                }
            }
        }
    })
}

pub fn date_documents_query(date: NaiveDate) -> Value {
    let mut query = date_query(date);
    query["size"] = json!(MAX_DATE_DOCUMENTS);
    query
}
