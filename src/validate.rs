use std::fmt;

use chrono::NaiveDate;
use serde::Serialize;
use serde_json::{Value, json};

use crate::domain::{DailyBaselineRecord, SummaryRecord};
use crate::error::SummaryError;
use crate::search::{SearchClient, hit_sources};

/// Largest daily/summary percent difference pushed without confirmation.
pub const TOLERANCE_PERCENT: f64 = 5.0;

/// Reported for every metric when no daily report exists.
pub const MISSING_BASELINE_DIFFERENCE: f64 = 100.0;

/// Symmetric percent difference, `0` when both sides are `0`.
pub fn percent_difference(a: f64, b: f64) -> f64 {
    if a == 0.0 && b == 0.0 {
        return 0.0;
    }
    (a - b).abs() / ((a + b) / 2.0) * 100.0
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Metric {
    Jobs,
    CpuHours,
    FileTransferCount,
    OsdfFileTransferCount,
}

impl Metric {
    pub const ALL: [Metric; 4] = [
        Metric::Jobs,
        Metric::CpuHours,
        Metric::FileTransferCount,
        Metric::OsdfFileTransferCount,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Metric::Jobs => "Jobs",
            Metric::CpuHours => "CPU Hours",
            Metric::FileTransferCount => "File Transfer Count",
            Metric::OsdfFileTransferCount => "OSDF File Transfer Count",
        }
    }

    fn baseline(self, baseline: &DailyBaselineRecord) -> f64 {
        match self {
            Metric::Jobs => baseline.num_jobs,
            Metric::CpuHours => baseline.cpu_hours,
            Metric::FileTransferCount => baseline.file_transfer_count,
            Metric::OsdfFileTransferCount => baseline.osdf_file_transfer_count,
        }
    }

    fn summary(self, totals: &SummaryTotals) -> f64 {
        match self {
            Metric::Jobs => totals.num_jobs,
            Metric::CpuHours => totals.cpu_hours,
            Metric::FileTransferCount => totals.file_transfer_count,
            Metric::OsdfFileTransferCount => totals.osdf_file_transfer_count,
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Summary-side totals of the metrics the daily report publishes.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct SummaryTotals {
    pub num_jobs: f64,
    pub cpu_hours: f64,
    pub file_transfer_count: f64,
    pub osdf_file_transfer_count: f64,
}

impl SummaryTotals {
    pub fn from_records(records: &[SummaryRecord]) -> Self {
        records.iter().fold(Self::default(), |totals, record| Self {
            num_jobs: totals.num_jobs + record.num_jobs as f64,
            cpu_hours: totals.cpu_hours + record.cpu_hours,
            file_transfer_count: totals.file_transfer_count + record.file_transfer_count,
            osdf_file_transfer_count: totals.osdf_file_transfer_count
                + record.osdf_file_transfer_count,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MetricComparison {
    pub metric: Metric,
    /// `None` when the daily report is unknown, never `0`.
    pub daily: Option<f64>,
    pub summary: f64,
    pub percent_difference: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComparisonResult {
    pub dates: Vec<NaiveDate>,
    pub metrics: Vec<MetricComparison>,
}

impl ComparisonResult {
    pub fn compare(
        date: NaiveDate,
        baseline: Option<&DailyBaselineRecord>,
        totals: &SummaryTotals,
    ) -> Self {
        let metrics = Metric::ALL
            .iter()
            .map(|metric| {
                let summary = metric.summary(totals);
                match baseline {
                    Some(baseline) => {
                        let daily = metric.baseline(baseline);
                        MetricComparison {
                            metric: *metric,
                            daily: Some(daily),
                            summary,
                            percent_difference: percent_difference(daily, summary),
                        }
                    }
                    None => MetricComparison {
                        metric: *metric,
                        daily: None,
                        summary,
                        percent_difference: MISSING_BASELINE_DIFFERENCE,
                    },
                }
            })
            .collect();
        Self {
            dates: vec![date],
            metrics,
        }
    }

    pub fn has_baseline(&self) -> bool {
        self.metrics.iter().all(|metric| metric.daily.is_some())
    }

    pub fn max_difference(&self) -> f64 {
        self.metrics
            .iter()
            .map(|metric| metric.percent_difference)
            .fold(0.0, f64::max)
    }

    pub fn within_tolerance(&self) -> bool {
        self.max_difference() <= TOLERANCE_PERCENT
    }

    /// Folds per-date results by summing both sides first and recomputing the
    /// differences on the sums. Dates without a baseline are skipped; `None`
    /// if none remain.
    pub fn rollup(results: &[ComparisonResult]) -> Option<ComparisonResult> {
        let known = results
            .iter()
            .filter(|result| result.has_baseline())
            .collect::<Vec<_>>();
        if known.is_empty() {
            return None;
        }

        let metrics = Metric::ALL
            .iter()
            .map(|metric| {
                let (daily, summary) = known
                    .iter()
                    .flat_map(|result| result.metrics.iter())
                    .filter(|comparison| comparison.metric == *metric)
                    .fold((0.0, 0.0), |(daily, summary), comparison| {
                        (
                            daily + comparison.daily.unwrap_or(0.0),
                            summary + comparison.summary,
                        )
                    });
                MetricComparison {
                    metric: *metric,
                    daily: Some(daily),
                    summary,
                    percent_difference: percent_difference(daily, summary),
                }
            })
            .collect();

        Some(ComparisonResult {
            dates: known
                .iter()
                .flat_map(|result| result.dates.iter().copied())
                .collect(),
            metrics,
        })
    }
}

impl fmt::Display for ComparisonResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.dates.first(), self.dates.last()) {
            (Some(first), Some(last)) if first != last => writeln!(f, "Dates: {first}..={last}")?,
            (Some(first), _) => writeln!(f, "Date: {first}")?,
            _ => {}
        }
        for metric in &self.metrics {
            writeln!(
                f,
                "Daily Vs Summary {} % Diff: {:.2}",
                metric.metric, metric.percent_difference
            )?;
        }
        for metric in &self.metrics {
            let daily = metric
                .daily
                .map(|value| format!("{value:.2}"))
                .unwrap_or_else(|| "?".to_string());
            writeln!(f, "Daily {}: {daily}", metric.metric)?;
            writeln!(f, "Summary {}: {:.2}", metric.metric, metric.summary)?;
        }
        Ok(())
    }
}

/// Where the independently produced daily reports come from.
pub trait BaselineSource {
    fn daily_baseline(&self, date: NaiveDate) -> Result<Option<DailyBaselineRecord>, SummaryError>;
}

/// Daily reports stored as `<prefix>_daily_<date>` documents.
pub struct SearchBaselineSource<S: SearchClient> {
    client: S,
    index: String,
    id_prefix: String,
}

impl<S: SearchClient> SearchBaselineSource<S> {
    pub fn new(client: S, index: impl Into<String>, id_prefix: impl Into<String>) -> Self {
        Self {
            client,
            index: index.into(),
            id_prefix: id_prefix.into(),
        }
    }

    pub fn document_id(&self, date: NaiveDate) -> String {
        format!("{}_daily_{date}", self.id_prefix)
    }

    pub fn query(&self, date: NaiveDate) -> Value {
        json!({ "query": { "terms": { "_id": [self.document_id(date)] } } })
    }
}

impl<S: SearchClient> BaselineSource for SearchBaselineSource<S> {
    fn daily_baseline(&self, date: NaiveDate) -> Result<Option<DailyBaselineRecord>, SummaryError> {
        let response = self.client.search(&self.index, &self.query(date))?;
        let Some(source) = hit_sources(&response)?.into_iter().next() else {
            return Ok(None);
        };
        serde_json::from_value(source)
            .map(Some)
            .map_err(|err| SummaryError::MalformedResponse(format!("daily report {date}: {err}")))
    }
}
