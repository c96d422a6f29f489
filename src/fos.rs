//! Field of science lookup over the NCSES SED-CIP crosswalk.
//!
//! Project registries store a SED-CIP code (`26.1103`) that has often been
//! through a float round-trip (`1.0101` for `01.0101`, `10.232` for
//! `10.2320`). Codes are repaired, matched exactly when possible, and otherwise
//! resolved to the most common label at each granularity.

use std::fs;

use camino::Utf8Path;

use crate::domain::FieldsOfScience;
use crate::error::SummaryError;

const HEADER_PREFIX: &str = "SED-CIP code";

/// Two-digit broad, major and detailed ids taken from a code.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CodeSegments {
    pub broad: Option<String>,
    pub major: Option<String>,
    pub detailed: Option<String>,
}

impl CodeSegments {
    pub fn parse(code: &str) -> Option<Self> {
        let code = code.trim();
        let mut digits = code
            .chars()
            .filter(char::is_ascii_digit)
            .collect::<String>();
        if digits.is_empty() {
            return None;
        }
        if code.split('.').next().map(str::len) == Some(1) {
            digits.insert(0, '0');
        }
        if digits.len() % 2 == 1 {
            digits.push('0');
        }

        Some(Self {
            broad: digits.get(..2).map(str::to_string),
            major: digits.get(2..4).map(str::to_string),
            detailed: digits.get(4..).filter(|rest| !rest.is_empty()).map(str::to_string),
        })
    }
}

#[derive(Debug, Clone)]
struct Row {
    code: String,
    ids: CodeSegments,
    fields: FieldsOfScience,
}

/// Granularities tried from finest to coarsest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MatchLevel {
    Detailed,
    Major,
    Broad,
}

impl MatchLevel {
    const ORDER: [MatchLevel; 3] = [MatchLevel::Detailed, MatchLevel::Major, MatchLevel::Broad];

    /// Absent segments never match, not even rows that lack them too.
    fn matches(self, row: &CodeSegments, wanted: &CodeSegments) -> bool {
        let same = |row: &Option<String>, wanted: &Option<String>| wanted.is_some() && row == wanted;
        match self {
            MatchLevel::Broad => same(&row.broad, &wanted.broad),
            MatchLevel::Major => {
                same(&row.broad, &wanted.broad) && same(&row.major, &wanted.major)
            }
            MatchLevel::Detailed => {
                same(&row.broad, &wanted.broad)
                    && same(&row.major, &wanted.major)
                    && same(&row.detailed, &wanted.detailed)
            }
        }
    }

    fn label(self, fields: &FieldsOfScience) -> Option<&str> {
        match self {
            MatchLevel::Broad => fields.broad.as_deref(),
            MatchLevel::Major => fields.major.as_deref(),
            MatchLevel::Detailed => fields.detailed.as_deref(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FieldOfScienceTable {
    rows: Vec<Row>,
}

impl FieldOfScienceTable {
    /// Reads the full crosswalk, converted to TSV, from `path`.
    pub fn load(path: &Utf8Path) -> Result<Self, SummaryError> {
        let content = fs::read_to_string(path)
            .map_err(|err| SummaryError::FieldOfScienceTable(format!("{path}: {err}")))?;
        let table = Self::parse(&content)?;
        tracing::debug!(%path, rows = table.len(), "field of science table loaded");
        Ok(table)
    }

    /// A table with no rows, for commands that never resolve codes.
    pub fn empty() -> Self {
        Self { rows: Vec::new() }
    }

    /// Tab separated `code, broad, major, detailed`, optional header line.
    pub fn parse(content: &str) -> Result<Self, SummaryError> {
        let mut rows = Vec::new();
        for (number, line) in content.lines().enumerate() {
            let line = line.trim_end_matches('\r');
            if line.trim().is_empty() || line.starts_with(HEADER_PREFIX) {
                continue;
            }
            let columns = line.split('\t').map(str::trim).collect::<Vec<_>>();
            if columns.len() < 4 {
                return Err(SummaryError::FieldOfScienceTable(format!(
                    "line {}: expected 4 columns, found {}",
                    number + 1,
                    columns.len()
                )));
            }
            let label = |value: &str| (!value.is_empty()).then(|| value.to_string());
            rows.push(Row {
                code: columns[0].to_string(),
                ids: CodeSegments::parse(columns[0]).unwrap_or_default(),
                fields: FieldsOfScience {
                    broad: label(columns[1]),
                    major: label(columns[2]),
                    detailed: label(columns[3]),
                },
            });
        }
        if rows.is_empty() {
            return Err(SummaryError::FieldOfScienceTable("no rows".to_string()));
        }
        Ok(Self { rows })
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Never fails: unmapped or missing codes resolve to all `None`.
    pub fn resolve(&self, code: Option<&str>) -> FieldsOfScience {
        let Some(code) = code.map(str::trim).filter(|code| !code.is_empty()) else {
            return FieldsOfScience::default();
        };

        if let Some(row) = self.rows.iter().find(|row| row.code == code) {
            return row.fields.clone();
        }

        let Some(wanted) = CodeSegments::parse(code) else {
            return FieldsOfScience::default();
        };
        let Some(subset) = MatchLevel::ORDER
            .iter()
            .map(|level| self.matching(*level, &wanted))
            .find(|rows| !rows.is_empty())
        else {
            return FieldsOfScience::default();
        };

        FieldsOfScience {
            broad: self.most_frequent(&subset, MatchLevel::Broad, &wanted),
            major: self.most_frequent(&subset, MatchLevel::Major, &wanted),
            detailed: self.most_frequent(&subset, MatchLevel::Detailed, &wanted),
        }
    }

    fn matching(&self, level: MatchLevel, wanted: &CodeSegments) -> Vec<&Row> {
        self.rows
            .iter()
            .filter(|row| level.matches(&row.ids, wanted))
            .collect()
    }

    /// Picks among the subset's labels at `level` by how often each occurs in
    /// the whole table for the ids resolved at that level. Ties keep the label
    /// seen first in the subset.
    fn most_frequent(
        &self,
        subset: &[&Row],
        level: MatchLevel,
        wanted: &CodeSegments,
    ) -> Option<String> {
        let mut candidates: Vec<&str> = Vec::new();
        for row in subset {
            if let Some(label) = level.label(&row.fields) {
                if !candidates.contains(&label) {
                    candidates.push(label);
                }
            }
        }

        let mut best: Option<(&str, usize)> = None;
        for candidate in candidates {
            let count = self
                .rows
                .iter()
                .filter(|row| level.matches(&row.ids, wanted))
                .filter(|row| level.label(&row.fields) == Some(candidate))
                .count();
            if count > best.map(|(_, max)| max).unwrap_or(0) {
                best = Some((candidate, count));
            }
        }
        best.map(|(label, _)| label.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repairs_float_mangled_codes() {
        let segments = CodeSegments::parse("1.0101").unwrap();
        assert_eq!(segments.broad.as_deref(), Some("01"));
        assert_eq!(segments.major.as_deref(), Some("01"));
        assert_eq!(segments.detailed.as_deref(), Some("01"));

        let segments = CodeSegments::parse("10.232").unwrap();
        assert_eq!(segments.detailed.as_deref(), Some("20"));
    }

    #[test]
    fn short_codes_only_carry_present_segments() {
        let segments = CodeSegments::parse("16").unwrap();
        assert_eq!(segments.broad.as_deref(), Some("16"));
        assert_eq!(segments.major, None);
        assert_eq!(segments.detailed, None);
        assert_eq!(CodeSegments::parse("n/a"), None);
    }

    #[test]
    fn empty_table_resolves_nothing() {
        let table = FieldOfScienceTable::empty();
        assert!(table.is_empty());
        assert_eq!(table.resolve(Some("26.1103")), FieldsOfScience::default());
    }
}
