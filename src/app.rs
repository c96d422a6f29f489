use std::time::{Duration, Instant};

use chrono::NaiveDate;
use serde::Serialize;
use serde_json::Value;

use crate::aggregate::Aggregator;
use crate::domain::{DateRange, SummaryRecord, TimeWindow};
use crate::enrich::SummaryBuilder;
use crate::error::SummaryError;
use crate::fos::FieldOfScienceTable;
use crate::quality::{MappingKind, QualityReport, UnmappedSummary, quality_query};
use crate::registry::{RegistryCache, RegistryClient};
use crate::search::{SearchClient, date_documents_query, date_query, hit_sources};
use crate::validate::{BaselineSource, ComparisonResult, SummaryTotals};

#[derive(Debug, Clone, Copy, Default)]
pub struct SummarizeOptions {
    /// Index even when the daily report disagrees by more than the tolerance.
    pub force: bool,
    /// Compute and compare, never write.
    pub dry_run: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SummarizeAction {
    Indexed,
    ForceIndexed,
    DryRun,
    NothingToIndex,
}

#[derive(Debug, Clone, Serialize)]
pub struct DateSummaryResult {
    pub date: NaiveDate,
    pub records: usize,
    pub max_difference: f64,
    pub comparison: ComparisonResult,
    pub action: SummarizeAction,
}

#[derive(Debug, Clone, Serialize)]
pub struct SummarizeResult {
    pub dates: Vec<DateSummaryResult>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ValidateResult {
    pub comparisons: Vec<ComparisonResult>,
    /// Present when more than one date had a daily report.
    pub rollup: Option<ComparisonResult>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DateDeleteResult {
    pub date: NaiveDate,
    pub documents: u64,
    pub deleted: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeleteResult {
    pub dates: Vec<DateDeleteResult>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressLevel {
    Info,
    Success,
    Warning,
}

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
    pub level: ProgressLevel,
    pub elapsed: Option<Duration>,
}

impl ProgressEvent {
    pub fn info(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            level: ProgressLevel::Info,
            elapsed: None,
        }
    }

    pub fn success(message: impl Into<String>, elapsed: Duration) -> Self {
        Self {
            message: message.into(),
            level: ProgressLevel::Success,
            elapsed: Some(elapsed),
        }
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            level: ProgressLevel::Warning,
            elapsed: None,
        }
    }
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

/// Asks the operator before destructive or out-of-tolerance actions.
pub trait Confirm {
    fn confirm(&self, prompt: &str) -> Result<bool, SummaryError>;
}

/// Non-interactive runs never prompt; every question is answered "no".
pub struct Decline;

impl Confirm for Decline {
    fn confirm(&self, prompt: &str) -> Result<bool, SummaryError> {
        tracing::debug!(prompt, "declined without prompting");
        Ok(false)
    }
}

pub struct App<S: SearchClient, R: RegistryClient, B: BaselineSource> {
    output: S,
    output_index: String,
    aggregator: Aggregator<S>,
    registry: RegistryCache<R>,
    fos: FieldOfScienceTable,
    baseline: B,
}

impl<S: SearchClient, R: RegistryClient, B: BaselineSource> App<S, R, B> {
    pub fn new(
        output: S,
        output_index: impl Into<String>,
        aggregator: Aggregator<S>,
        registry: RegistryCache<R>,
        fos: FieldOfScienceTable,
        baseline: B,
    ) -> Self {
        Self {
            output,
            output_index: output_index.into(),
            aggregator,
            registry,
            fos,
            baseline,
        }
    }

    /// Enriched summary records for one pool day.
    pub fn summary_records(&self, date: NaiveDate) -> Result<Vec<SummaryRecord>, SummaryError> {
        let raw = self.aggregator.aggregate(TimeWindow::pool_day(date))?;
        SummaryBuilder::new(&self.registry, &self.fos).build_all(&raw, date)
    }

    pub fn existing_documents(&self, date: NaiveDate) -> Result<u64, SummaryError> {
        self.output.count(&self.output_index, &date_query(date))
    }

    pub fn compare(
        &self,
        date: NaiveDate,
        records: &[SummaryRecord],
    ) -> Result<ComparisonResult, SummaryError> {
        let baseline = self.baseline.daily_baseline(date)?;
        if baseline.is_none() {
            tracing::warn!(%date, "no daily report, treating every metric as 100% off");
        }
        Ok(ComparisonResult::compare(
            date,
            baseline.as_ref(),
            &SummaryTotals::from_records(records),
        ))
    }

    /// Dates run one at a time in ascending order; the first failure stops the batch.
    pub fn summarize(
        &self,
        range: &DateRange,
        options: SummarizeOptions,
        confirm: &dyn Confirm,
        sink: &dyn ProgressSink,
    ) -> Result<SummarizeResult, SummaryError> {
        let mut dates = Vec::new();
        for date in range.dates() {
            dates.push(self.summarize_date(date, options, confirm, sink)?);
        }
        Ok(SummarizeResult { dates })
    }

    fn summarize_date(
        &self,
        date: NaiveDate,
        options: SummarizeOptions,
        confirm: &dyn Confirm,
        sink: &dyn ProgressSink,
    ) -> Result<DateSummaryResult, SummaryError> {
        let started = Instant::now();
        tracing::info!(%date, dry_run = options.dry_run, "summarizing");
        sink.event(ProgressEvent::info(format!("{date}: checking existing documents")));

        let count = self.existing_documents(date)?;
        if count > 0 && !options.dry_run {
            return Err(SummaryError::DocumentsExist { date, count });
        }

        sink.event(ProgressEvent::info(format!("{date}: aggregating raw accounting")));
        let records = self.summary_records(date)?;
        let comparison = self.compare(date, &records)?;
        let max_difference = comparison.max_difference();

        let mut forced = false;
        if !comparison.within_tolerance() {
            tracing::warn!(%date, max_difference, "summary disagrees with the daily report");
            sink.event(ProgressEvent::warning(format!(
                "Data for {date} is off daily reports by {max_difference:.2}%\n{comparison}"
            )));
            if !options.force && !options.dry_run {
                let prompt = format!(
                    "Index {} documents for {date} despite a {max_difference:.2}% difference?",
                    records.len()
                );
                if !confirm.confirm(&prompt)? {
                    return Err(SummaryError::ToleranceExceeded {
                        date,
                        max_difference,
                    });
                }
            }
            forced = !options.dry_run;
            if forced {
                tracing::warn!(%date, documents = records.len(), "force indexing");
            }
        } else {
            sink.event(ProgressEvent::info(comparison.to_string()));
        }

        let action = if options.dry_run {
            SummarizeAction::DryRun
        } else if records.is_empty() {
            SummarizeAction::NothingToIndex
        } else {
            let documents = records
                .iter()
                .map(serde_json::to_value)
                .collect::<Result<Vec<Value>, _>>()
                .map_err(|err| SummaryError::Serialization(err.to_string()))?;
            self.output.bulk_index(&self.output_index, &documents)?;
            if forced {
                SummarizeAction::ForceIndexed
            } else {
                SummarizeAction::Indexed
            }
        };

        let message = match action {
            SummarizeAction::DryRun => format!("{date}: dry run, {} documents", records.len()),
            SummarizeAction::NothingToIndex => format!("{date}: nothing to index"),
            _ => format!("Indexed {} documents for {date}", records.len()),
        };
        sink.event(ProgressEvent::success(message, started.elapsed()));

        Ok(DateSummaryResult {
            date,
            records: records.len(),
            max_difference,
            comparison,
            action,
        })
    }

    /// Re-reads what is already indexed and compares it to the daily reports.
    pub fn validate(
        &self,
        range: &DateRange,
        sink: &dyn ProgressSink,
    ) -> Result<ValidateResult, SummaryError> {
        let mut comparisons = Vec::new();
        for date in range.dates() {
            sink.event(ProgressEvent::info(format!("{date}: reading indexed summaries")));
            let records = self.indexed_records(date)?;
            let comparison = self.compare(date, &records)?;
            if comparison.within_tolerance() {
                sink.event(ProgressEvent::info(comparison.to_string()));
            } else {
                sink.event(ProgressEvent::warning(format!(
                    "Data for {date} is off daily reports by {:.2}%\n{comparison}",
                    comparison.max_difference()
                )));
            }
            comparisons.push(comparison);
        }

        let known = comparisons.iter().filter(|c| c.has_baseline()).count();
        let rollup = if known > 1 {
            ComparisonResult::rollup(&comparisons)
        } else {
            None
        };
        if let Some(rollup) = &rollup {
            sink.event(ProgressEvent::info(format!("Roll-up\n{rollup}")));
        }

        Ok(ValidateResult {
            comparisons,
            rollup,
        })
    }

    pub fn indexed_records(&self, date: NaiveDate) -> Result<Vec<SummaryRecord>, SummaryError> {
        let response = self
            .output
            .search(&self.output_index, &date_documents_query(date))?;
        hit_sources(&response)?
            .into_iter()
            .map(|source| {
                serde_json::from_value(source).map_err(|err| {
                    SummaryError::MalformedResponse(format!("summary document for {date}: {err}"))
                })
            })
            .collect()
    }

    pub fn delete(
        &self,
        range: &DateRange,
        force: bool,
        confirm: &dyn Confirm,
        sink: &dyn ProgressSink,
    ) -> Result<DeleteResult, SummaryError> {
        let mut dates = Vec::new();
        for date in range.dates() {
            let started = Instant::now();
            let documents = self.existing_documents(date)?;
            let prompt = format!(
                "Delete {documents} documents from {} on {date}?",
                self.output_index
            );
            if !force && !confirm.confirm(&prompt)? {
                return Err(SummaryError::Declined(format!("deletion of {date} declined")));
            }

            let deleted = self
                .output
                .delete_by_query(&self.output_index, &date_query(date))?;
            tracing::info!(%date, deleted, "deleted summaries");
            sink.event(ProgressEvent::success(
                format!("Deleted {deleted} documents from {date}"),
                started.elapsed(),
            ));
            dates.push(DateDeleteResult {
                date,
                documents,
                deleted,
            });
        }
        Ok(DeleteResult { dates })
    }

    pub fn report_quality(&self, sink: &dyn ProgressSink) -> Result<QualityReport, SummaryError> {
        sink.event(ProgressEvent::info("summing the whole index"));
        let total = self.output.search(&self.output_index, &quality_query(None))?;
        Ok(QualityReport {
            projects: self.unmapped(MappingKind::Project, &total, sink)?,
            resources: self.unmapped(MappingKind::Resource, &total, sink)?,
        })
    }

    fn unmapped(
        &self,
        kind: MappingKind,
        total: &Value,
        sink: &dyn ProgressSink,
    ) -> Result<UnmappedSummary, SummaryError> {
        let unmapped = self
            .output
            .search(&self.output_index, &quality_query(Some(kind)))?;
        let summary = UnmappedSummary::from_responses(kind, &unmapped, total)?;
        if summary.all_mapped() {
            sink.event(ProgressEvent::info(summary.to_string()));
        } else {
            sink.event(ProgressEvent::warning(summary.to_string()));
        }
        Ok(summary)
    }
}
