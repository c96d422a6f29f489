use std::io::{self, Write};

use serde::Serialize;

use crate::app::{
    DeleteResult, ProgressEvent, ProgressLevel, ProgressSink, SummarizeAction, SummarizeResult,
    ValidateResult,
};
use crate::quality::QualityReport;

const GREEN: &str = "\x1b[32m";
const YELLOW: &str = "\x1b[33m";
const CYAN: &str = "\x1b[36m";
const RED: &str = "\x1b[31m";
const RESET: &str = "\x1b[0m";

#[derive(Debug, Clone, Copy)]
pub enum OutputMode {
    Interactive,
    NonInteractive,
}

/// Machine-readable results on stdout; progress only goes to the log.
pub struct JsonOutput;

impl JsonOutput {
    pub fn print_summarize(result: &SummarizeResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_validate(result: &ValidateResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_delete(result: &DeleteResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_quality(result: &QualityReport) -> io::Result<()> {
        Self::print_json(result)
    }

    fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

impl ProgressSink for JsonOutput {
    fn event(&self, event: ProgressEvent) {
        let elapsed_ms = event.elapsed.map(|elapsed| elapsed.as_millis() as u64);
        match event.level {
            ProgressLevel::Warning => tracing::warn!(elapsed_ms, "{}", event.message),
            ProgressLevel::Info | ProgressLevel::Success => {
                tracing::info!(elapsed_ms, "{}", event.message)
            }
        }
    }
}

/// Coloured progress lines for a terminal.
pub struct ConsoleOutput;

impl ConsoleOutput {
    pub fn print_summarize(result: &SummarizeResult) {
        println!("{CYAN}OSPool summary{RESET}");
        for date in &result.dates {
            let color = match date.action {
                SummarizeAction::Indexed => GREEN,
                SummarizeAction::ForceIndexed => YELLOW,
                SummarizeAction::DryRun | SummarizeAction::NothingToIndex => CYAN,
            };
            println!(
                "{color}{} {} documents ({:?}, max difference {:.2}%){RESET}",
                date.date, date.records, date.action, date.max_difference
            );
        }
    }

    pub fn print_validate(result: &ValidateResult) {
        let unknown = result
            .comparisons
            .iter()
            .filter(|comparison| !comparison.has_baseline())
            .count();
        println!(
            "{CYAN}Validated {} dates{RESET}",
            result.comparisons.len()
        );
        if unknown > 0 {
            println!("{YELLOW}{unknown} dates have no daily report{RESET}");
        }
    }

    pub fn print_delete(result: &DeleteResult) {
        let deleted: u64 = result.dates.iter().map(|date| date.deleted).sum();
        println!(
            "{GREEN}Deleted {deleted} documents across {} dates{RESET}",
            result.dates.len()
        );
    }

    pub fn print_quality(result: &QualityReport) {
        for summary in [&result.projects, &result.resources] {
            let color = if summary.all_mapped() { GREEN } else { RED };
            print!("{color}{summary}{RESET}");
        }
    }
}

impl ProgressSink for ConsoleOutput {
    fn event(&self, event: ProgressEvent) {
        let color = match event.level {
            ProgressLevel::Info => RESET,
            ProgressLevel::Success => GREEN,
            ProgressLevel::Warning => RED,
        };
        match event.elapsed {
            Some(elapsed) => println!(
                "{color}{} ({:.1}s){RESET}",
                event.message,
                elapsed.as_secs_f64()
            ),
            None => println!("{color}{}{RESET}", event.message),
        }
    }
}
