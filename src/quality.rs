use std::fmt;

use serde::Serialize;
use serde_json::{Map, Value, json};

use crate::error::SummaryError;
use crate::search::{MAX_DATE_DOCUMENTS, total_hits};

/// Summed document fields, in report order.
pub const QUALITY_METRICS: &[&str] = &[
    "NumJobs",
    "CpuHours",
    "GpuHours",
    "FileTransferCount",
    "ByteTransferCount",
    "OSDFFileTransferCount",
    "OSDFByteTransferCount",
];

const PROJECT_NAMES_AGG: &str = "ProjectNames";
const RESOURCE_NAMES_AGG: &str = "ResourceNames";

/// Which side of a summary document lost its institution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum MappingKind {
    Project,
    Resource,
}

impl MappingKind {
    pub fn label(self) -> &'static str {
        match self {
            MappingKind::Project => "Projects",
            MappingKind::Resource => "Resources",
        }
    }

    fn institution_field(self) -> &'static str {
        match self {
            MappingKind::Project => "ProjectInstitution.id",
            MappingKind::Resource => "ResourceInstitution.id",
        }
    }

    fn names_aggregation(self) -> &'static str {
        match self {
            MappingKind::Project => PROJECT_NAMES_AGG,
            MappingKind::Resource => RESOURCE_NAMES_AGG,
        }
    }
}

/// Sums over the whole index, or only over documents missing `kind`'s institution.
pub fn quality_query(kind: Option<MappingKind>) -> Value {
    let mut aggs = Map::new();
    for metric in QUALITY_METRICS {
        aggs.insert(metric.to_string(), json!({ "sum": { "field": metric } }));
    }
    aggs.insert(
        PROJECT_NAMES_AGG.to_string(),
        json!({ "terms": { "field": "ProjectName.keyword", "size": MAX_DATE_DOCUMENTS } }),
    );
    aggs.insert(
        RESOURCE_NAMES_AGG.to_string(),
        json!({ "terms": { "field": "ResourceName.keyword", "size": MAX_DATE_DOCUMENTS } }),
    );

    let mut query = json!({
        "track_total_hits": true,
        "size": 0,
        "aggs": aggs,
    });
    if let Some(kind) = kind {
        query["query"] = json!({
            "bool": {
                "must_not": [ { "exists": { "field": kind.institution_field() } } ]
            }
        });
    }
    query
}

/// Share of `total`, `0` when there is no total.
pub fn percent_of_total(value: f64, total: f64) -> f64 {
    if total == 0.0 {
        return 0.0;
    }
    value / total * 100.0
}

fn metric_value(response: &Value, metric: &str) -> f64 {
    response["aggregations"][metric]["value"]
        .as_f64()
        .unwrap_or(0.0)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UnmappedMetric {
    pub metric: String,
    pub value: f64,
    pub percent_of_total: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UnmappedSummary {
    pub kind: MappingKind,
    pub documents: u64,
    pub names: Vec<String>,
    pub metrics: Vec<UnmappedMetric>,
}

impl UnmappedSummary {
    pub fn from_responses(
        kind: MappingKind,
        unmapped: &Value,
        total: &Value,
    ) -> Result<Self, SummaryError> {
        let documents = total_hits(unmapped)?;
        let names: Vec<String> = unmapped["aggregations"][kind.names_aggregation()]["buckets"]
            .as_array()
            .map(|buckets| {
                buckets
                    .iter()
                    .filter_map(|bucket| bucket["key"].as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default();
        let metrics = QUALITY_METRICS
            .iter()
            .map(|metric| {
                let value = metric_value(unmapped, metric);
                UnmappedMetric {
                    metric: metric.to_string(),
                    value,
                    percent_of_total: percent_of_total(value, metric_value(total, metric)),
                }
            })
            .collect();
        Ok(Self {
            kind,
            documents,
            names,
            metrics,
        })
    }

    pub fn all_mapped(&self) -> bool {
        self.documents == 0
    }
}

impl fmt::Display for UnmappedSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.all_mapped() {
            return writeln!(f, "All {} Mapped", self.kind.label());
        }
        writeln!(f, "Unmapped {}: {}", self.kind.label(), self.names.join(", "))?;
        let width = QUALITY_METRICS.iter().map(|m| m.len()).max().unwrap_or(0) + 1;
        for metric in &self.metrics {
            writeln!(
                f,
                "{:<width$} {:.2}/{:.2}% of Total",
                format!("{}:", metric.metric),
                metric.value,
                metric.percent_of_total
            )?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QualityReport {
    pub projects: UnmappedSummary,
    pub resources: UnmappedSummary,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unmapped_query_excludes_mapped_institutions() {
        let query = quality_query(Some(MappingKind::Resource));
        assert_eq!(
            query["query"]["bool"]["must_not"][0]["exists"]["field"],
            "ResourceInstitution.id"
        );
        assert!(quality_query(None).get("query").is_none());
    }

    #[test]
    fn zero_total_reports_zero_share() {
        assert_eq!(percent_of_total(5.0, 0.0), 0.0);
        assert_eq!(percent_of_total(5.0, 20.0), 25.0);
    }

    #[test]
    fn summary_reads_names_and_shares() {
        let total = json!({
            "hits": { "total": { "value": 10 } },
            "aggregations": { "NumJobs": { "value": 200.0 }, "CpuHours": { "value": 0.0 } }
        });
        let unmapped = json!({
            "hits": { "total": { "value": 2 } },
            "aggregations": {
                "NumJobs": { "value": 50.0 },
                "CpuHours": { "value": 3.0 },
                "ProjectNames": { "buckets": [ { "key": "Orphan", "doc_count": 2 } ] }
            }
        });
        let summary =
            UnmappedSummary::from_responses(MappingKind::Project, &unmapped, &total).unwrap();
        assert_eq!(summary.names, vec!["Orphan".to_string()]);
        assert_eq!(summary.metrics[0].percent_of_total, 25.0);
        assert_eq!(summary.metrics[1].percent_of_total, 0.0);
        assert!(!summary.all_mapped());
    }
}
