use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex};

use serde_json::{Map, Value, json};

use crate::domain::{RawAggregateRecord, TimeWindow, UNKNOWN};
use crate::error::SummaryError;
use crate::pool::{POOL_COLLECTOR_HOSTS, SKIPPED_JOB_UNIVERSES};
use crate::search::{SearchClient, total_hits};

/// Buckets requested per aggregation level.
pub const BUCKET_SIZE: usize = 1024;

const INSTITUTION_AGG: &str = "institution_id";
const RESOURCE_AGG: &str = "resources";
const ACCOUNT_GROUP_AGG: &str = "acct_group";
const CPU_HOURS_AGG: &str = "cpu_hours";
const GPU_HOURS_AGG: &str = "gpu_hours";

const TRANSFER_PARENTS: &[&str] = &["TransferInputStats", "TransferOutputStats"];
const FILE_COUNT_MARKER: &str = "filescounttotal";
const BYTE_SIZE_MARKER: &str = "sizebytestotal";
const OSDF_MARKERS: &[&str] = &["osdf", "stash"];

/// Resolved resource: glidein attribute, then the matched job attribute, then UNKNOWN.
const RESOURCE_NAME_SCRIPT: &str = r#"
String res;
if (doc.containsKey("MachineAttrGLIDEIN_ResourceName0") && doc["MachineAttrGLIDEIN_ResourceName0.keyword"].size() > 0) {
    res = doc["MachineAttrGLIDEIN_ResourceName0.keyword"].value;
} else if (doc.containsKey("MATCH_EXP_JOBGLIDEIN_ResourceName") && doc["MATCH_EXP_JOBGLIDEIN_ResourceName.keyword"].size() > 0) {
    res = doc["MATCH_EXP_JOBGLIDEIN_ResourceName.keyword"].value;
} else {
    res = "UNKNOWN";
}
emit(res);
"#;

/// Transfer metric fields found in the raw index mapping.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransferFields {
    fields: BTreeSet<String>,
}

impl TransferFields {
    pub fn new<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let fields = fields
            .into_iter()
            .map(Into::into)
            .filter(|field: &String| is_file_field(field) || is_byte_field(field))
            .collect();
        Self { fields }
    }

    /// Collects `TransferInputStats.*` and `TransferOutputStats.*` properties
    /// across every index in a `_mapping` response.
    pub fn from_mapping(mapping: &Value) -> Self {
        let mut fields = Vec::new();
        let Some(indices) = mapping.as_object() else {
            return Self::default();
        };
        for index in indices.values() {
            let Some(properties) = index["mappings"]["properties"].as_object() else {
                continue;
            };
            for parent in TRANSFER_PARENTS {
                if let Some(stats) = properties
                    .get(*parent)
                    .and_then(|stats| stats["properties"].as_object())
                {
                    fields.extend(stats.keys().map(|key| format!("{parent}.{key}")));
                }
            }
        }
        Self::new(fields)
    }

    pub fn all(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn file_fields(&self) -> impl Iterator<Item = &str> {
        self.all().filter(|field| is_file_field(field))
    }

    pub fn byte_fields(&self) -> impl Iterator<Item = &str> {
        self.all().filter(|field| is_byte_field(field))
    }
}

fn is_file_field(field: &str) -> bool {
    field.to_lowercase().contains(FILE_COUNT_MARKER)
}

fn is_byte_field(field: &str) -> bool {
    field.to_lowercase().contains(BYTE_SIZE_MARKER)
}

fn is_osdf_field(field: &str) -> bool {
    let lowered = field.to_lowercase();
    OSDF_MARKERS.iter().any(|marker| lowered.contains(marker))
}

/// Builds the nested institution → resource → account-group query.
pub fn build_query(
    window: TimeWindow,
    access_points: &BTreeSet<String>,
    fields: &TransferFields,
) -> Value {
    let mut metrics = Map::new();
    metrics.insert(GPU_HOURS_AGG.to_string(), json!({ "sum": { "field": "GpuCoreHr" } }));
    metrics.insert(CPU_HOURS_AGG.to_string(), json!({ "sum": { "field": "CoreHr" } }));
    for field in fields.all() {
        metrics.insert(field.to_string(), json!({ "sum": { "field": field } }));
    }

    json!({
        "track_total_hits": true,
        "size": 0,
        "aggs": {
            INSTITUTION_AGG: {
                "terms": {
                    "field": "MachineAttrOSG_INSTITUTION_ID0.keyword",
                    "missing": UNKNOWN,
                    "size": BUCKET_SIZE,
                },
                "aggs": {
                    RESOURCE_AGG: {
                        "terms": { "field": "ResourceName", "missing": UNKNOWN, "size": BUCKET_SIZE },
                        "aggs": {
                            ACCOUNT_GROUP_AGG: {
                                "terms": {
                                    "field": "ProjectName.keyword",
                                    "missing": UNKNOWN,
                                    "size": BUCKET_SIZE,
                                },
                                "aggs": metrics,
                            }
                        }
                    }
                }
            }
        },
        "runtime_mappings": {
            "ResourceName": {
                "type": "keyword",
                "script": { "language": "painless", "source": RESOURCE_NAME_SCRIPT },
            }
        },
        "query": {
            "bool": {
                "filter": [
                    { "range": { "RecordTime": { "gte": window.start, "lt": window.end } } }
                ],
                "minimum_should_match": 1,
                "should": [
                    {
                        "bool": {
                            "filter": [ { "terms": { "ScheddName.keyword": access_points } } ],
                            "must_not": [ { "exists": { "field": "LastRemotePool" } } ],
                        }
                    },
                    { "terms": { "LastRemotePool.keyword": POOL_COLLECTOR_HOSTS } }
                ],
                "must_not": [
                    { "terms": { "JobUniverse": SKIPPED_JOB_UNIVERSES } }
                ],
            }
        }
    })
}

/// Any failed shard means the aggregates are partial.
pub fn check_shards(response: &Value) -> Result<(), SummaryError> {
    let failed = response["_shards"]["failed"]
        .as_u64()
        .ok_or_else(|| SummaryError::MalformedResponse("missing `_shards.failed`".to_string()))?;
    if failed > 0 {
        return Err(SummaryError::ShardFailure(
            response["_shards"]["failures"].to_string(),
        ));
    }
    Ok(())
}

fn buckets<'a>(parent: &'a Value, name: &str) -> Result<&'a Vec<Value>, SummaryError> {
    let aggregation = &parent[name];
    let other_docs = aggregation["sum_other_doc_count"].as_u64().unwrap_or(0);
    if other_docs > 0 {
        return Err(SummaryError::TruncatedAggregation {
            level: name.to_string(),
            other_docs,
        });
    }
    aggregation["buckets"]
        .as_array()
        .ok_or_else(|| SummaryError::MalformedResponse(format!("missing `{name}` buckets")))
}

fn bucket_key(bucket: &Value) -> String {
    match &bucket["key"] {
        Value::String(key) => key.clone(),
        Value::Null => UNKNOWN.to_string(),
        other => other.to_string(),
    }
}

fn metric(bucket: &Value, name: &str) -> f64 {
    bucket[name]["value"].as_f64().unwrap_or(0.0)
}

fn sum_fields<'a>(
    metrics: &BTreeMap<String, f64>,
    fields: impl Iterator<Item = &'a str>,
    osdf_only: bool,
) -> f64 {
    fields
        .filter(|field| !osdf_only || is_osdf_field(field))
        .map(|field| metrics.get(field).copied().unwrap_or(0.0))
        .sum()
}

/// Walks the three bucket levels and emits one record per account-group leaf.
pub fn flatten(
    response: &Value,
    fields: &TransferFields,
) -> Result<Vec<RawAggregateRecord>, SummaryError> {
    let aggregations = &response["aggregations"];
    let mut records = Vec::new();

    for institution in buckets(aggregations, INSTITUTION_AGG)? {
        let institution_id = bucket_key(institution);
        for resource in buckets(institution, RESOURCE_AGG)? {
            let resource_name = bucket_key(resource);
            for account_group in buckets(resource, ACCOUNT_GROUP_AGG)? {
                let transfer_metrics = fields
                    .all()
                    .map(|field| (field.to_string(), metric(account_group, field)))
                    .collect::<BTreeMap<_, _>>();
                records.push(RawAggregateRecord {
                    is_nrp: institution_id != UNKNOWN,
                    institution_id: institution_id.clone(),
                    resource_name: resource_name.clone(),
                    account_group: bucket_key(account_group),
                    num_jobs: account_group["doc_count"].as_u64().unwrap_or(0),
                    cpu_hours: metric(account_group, CPU_HOURS_AGG),
                    gpu_hours: metric(account_group, GPU_HOURS_AGG),
                    file_transfer_count: sum_fields(&transfer_metrics, fields.file_fields(), false),
                    byte_transfer_count: sum_fields(&transfer_metrics, fields.byte_fields(), false),
                    osdf_file_transfer_count: sum_fields(
                        &transfer_metrics,
                        fields.file_fields(),
                        true,
                    ),
                    osdf_byte_transfer_count: sum_fields(
                        &transfer_metrics,
                        fields.byte_fields(),
                        true,
                    ),
                    transfer_metrics,
                });
            }
        }
    }

    Ok(records)
}

/// Runs the raw aggregation against the accounting index. Transfer fields are
/// discovered from the index mapping on first use and reused for the run.
pub struct Aggregator<S: SearchClient> {
    client: S,
    index: String,
    access_points: BTreeSet<String>,
    fields: Mutex<Option<Arc<TransferFields>>>,
}

impl<S: SearchClient> Aggregator<S> {
    pub fn new(client: S, index: impl Into<String>, access_points: BTreeSet<String>) -> Self {
        Self {
            client,
            index: index.into(),
            access_points,
            fields: Mutex::new(None),
        }
    }

    pub fn transfer_fields(&self) -> Result<Arc<TransferFields>, SummaryError> {
        let mut guard = self
            .fields
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(fields) = guard.as_ref() {
            return Ok(fields.clone());
        }
        let mapping = self.client.field_mapping(&self.index)?;
        let fields = Arc::new(TransferFields::from_mapping(&mapping));
        tracing::debug!(count = fields.len(), "discovered transfer fields");
        *guard = Some(fields.clone());
        Ok(fields)
    }

    pub fn aggregate(&self, window: TimeWindow) -> Result<Vec<RawAggregateRecord>, SummaryError> {
        tracing::debug!(start = window.start, end = window.end, "querying raw accounting");
        let fields = self.transfer_fields()?;
        let query = build_query(window, &self.access_points, &fields);
        tracing::debug!(
            query = %serde_json::to_string_pretty(&query).unwrap_or_default(),
            "aggregation query"
        );

        let response = self.client.search(&self.index, &query)?;
        check_shards(&response)?;
        if let Ok(hits) = total_hits(&response) {
            tracing::debug!(hits, "raw records matched");
        }

        let records = flatten(&response, &fields)?;
        tracing::debug!(records = records.len(), "flattened aggregation");
        if tracing::enabled!(tracing::Level::DEBUG) {
            log_totals(&records);
        }
        Ok(records)
    }
}

fn log_totals(records: &[RawAggregateRecord]) {
    let jobs: u64 = records.iter().map(|record| record.num_jobs).sum();
    let cpu: f64 = records.iter().map(|record| record.cpu_hours).sum();
    let gpu: f64 = records.iter().map(|record| record.gpu_hours).sum();
    let files: f64 = records.iter().map(|record| record.file_transfer_count).sum();
    let osdf: f64 = records
        .iter()
        .map(|record| record.osdf_file_transfer_count)
        .sum();
    tracing::debug!(jobs, cpu, gpu, files, osdf, "flattened totals");
}
