use std::collections::BTreeMap;
use std::fmt;

use chrono::{Days, NaiveDate, NaiveTime, TimeZone};
use chrono_tz::America::Chicago;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Placeholder the raw aggregation emits for a missing bucket key.
pub const UNKNOWN: &str = "UNKNOWN";

/// One leaf bucket of the raw accounting aggregation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RawAggregateRecord {
    pub institution_id: String,
    pub resource_name: String,
    pub account_group: String,
    pub num_jobs: u64,
    pub cpu_hours: f64,
    pub gpu_hours: f64,
    pub file_transfer_count: f64,
    pub byte_transfer_count: f64,
    pub osdf_file_transfer_count: f64,
    pub osdf_byte_transfer_count: f64,
    /// Every discovered transfer metric by field name; absent buckets are 0.
    pub transfer_metrics: BTreeMap<String, f64>,
    pub is_nrp: bool,
}

impl RawAggregateRecord {
    pub fn has_institution_id(&self) -> bool {
        !self.institution_id.is_empty() && self.institution_id != UNKNOWN
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstitutionMetadata {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(flatten)]
    pub attributes: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ProjectMetadata {
    #[serde(rename = "Name", default)]
    pub name: Option<String>,
    #[serde(rename = "PIName", default)]
    pub pi_name: Option<String>,
    #[serde(rename = "Organization", default)]
    pub organization: Option<String>,
    #[serde(rename = "Department", default)]
    pub department: Option<String>,
    #[serde(rename = "FieldOfScience", default)]
    pub field_of_science: Option<String>,
    #[serde(
        rename = "FieldOfScienceID",
        default,
        deserialize_with = "deserialize_code"
    )]
    pub field_of_science_id: Option<String>,
    #[serde(rename = "InstitutionID", default)]
    pub institution_id: Option<String>,
}

/// Field of science codes arrive both as strings and as bare JSON numbers.
fn deserialize_code<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::String(code)) if !code.trim().is_empty() => Some(code.trim().to_string()),
        Some(Value::Number(code)) => Some(code.to_string()),
        _ => None,
    })
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FieldsOfScience {
    pub broad: Option<String>,
    pub major: Option<String>,
    pub detailed: Option<String>,
}

/// The enriched unit written to the output index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryRecord {
    #[serde(rename = "ProjectInstitution", default)]
    pub project_institution: Option<InstitutionMetadata>,
    #[serde(rename = "ResourceInstitution", default)]
    pub resource_institution: Option<InstitutionMetadata>,
    #[serde(rename = "ResourceInstitutionID", default)]
    pub resource_institution_id: Option<String>,
    #[serde(rename = "ResourceName")]
    pub resource_name: String,
    #[serde(rename = "ProjectName")]
    pub project_name: String,
    #[serde(rename = "BroadFieldOfScience", default)]
    pub broad_field_of_science: Option<String>,
    #[serde(rename = "MajorFieldOfScience", default)]
    pub major_field_of_science: Option<String>,
    #[serde(rename = "DetailedFieldOfScience", default)]
    pub detailed_field_of_science: Option<String>,
    #[serde(rename = "NumJobs", default)]
    pub num_jobs: u64,
    #[serde(rename = "CpuHours", default)]
    pub cpu_hours: f64,
    #[serde(rename = "GpuHours", default)]
    pub gpu_hours: f64,
    #[serde(rename = "OSDFFileTransferCount", default)]
    pub osdf_file_transfer_count: f64,
    #[serde(rename = "OSDFByteTransferCount", default)]
    pub osdf_byte_transfer_count: f64,
    #[serde(rename = "FileTransferCount", default)]
    pub file_transfer_count: f64,
    #[serde(rename = "ByteTransferCount", default)]
    pub byte_transfer_count: f64,
    #[serde(rename = "isNRP", default)]
    pub is_nrp: bool,
    #[serde(rename = "Date")]
    pub date: NaiveDate,
}

/// Ground truth published by the daily reports.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DailyBaselineRecord {
    #[serde(rename = "num_uniq_job_ids")]
    pub num_jobs: f64,
    #[serde(rename = "all_cpu_hours")]
    pub cpu_hours: f64,
    #[serde(rename = "total_files_xferd")]
    pub file_transfer_count: f64,
    #[serde(rename = "osdf_files_xferd")]
    pub osdf_file_transfer_count: f64,
}

/// Inclusive range of calendar dates, always ascending.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    start: NaiveDate,
    end: NaiveDate,
}

impl DateRange {
    pub fn new(date: NaiveDate, end: Option<NaiveDate>) -> Self {
        let end = end.unwrap_or(date);
        Self {
            start: date.min(end),
            end: date.max(end),
        }
    }

    pub fn single(date: NaiveDate) -> Self {
        Self::new(date, None)
    }

    pub fn start(&self) -> NaiveDate {
        self.start
    }

    pub fn end(&self) -> NaiveDate {
        self.end
    }

    pub fn dates(&self) -> Vec<NaiveDate> {
        self.start
            .iter_days()
            .take_while(|date| *date <= self.end)
            .collect()
    }
}

impl fmt::Display for DateRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.start == self.end {
            write!(f, "{}", self.start)
        } else {
            write!(f, "{}..={}", self.start, self.end)
        }
    }
}

/// Half-open `[start, end)` window in unix seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TimeWindow {
    pub start: i64,
    pub end: i64,
}

impl TimeWindow {
    /// The pool's reporting day: midnight to midnight in America/Chicago, so
    /// windows line up with the daily reports.
    pub fn pool_day(date: NaiveDate) -> Self {
        let next = date.checked_add_days(Days::new(1)).unwrap_or(date);
        Self {
            start: chicago_midnight(date),
            end: chicago_midnight(next),
        }
    }
}

fn chicago_midnight(date: NaiveDate) -> i64 {
    let naive = date.and_time(NaiveTime::MIN);
    Chicago
        .from_local_datetime(&naive)
        .earliest()
        .map(|local| local.timestamp())
        .unwrap_or_else(|| naive.and_utc().timestamp())
}
