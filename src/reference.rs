//! Uploaded reference files: a CSV used as factual grounding and an SVG used
//! as a layout/style example.
//!
//! Loading never fails a chat request. A file that cannot be decoded leaves its
//! slot empty and is reported to the operator log; the caller decides whether
//! to tell the user.

use std::collections::HashMap;

use encoding_rs::{EUC_JP, ISO_2022_JP, SHIFT_JIS};
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{info, warn};

use crate::constants;
use crate::diagram::extract_svg;
use crate::error::ReferenceError;

/// Decode uploaded bytes as text.
///
/// UTF-8 (with or without BOM) is tried first, then the legacy Japanese
/// encodings that spreadsheet exports commonly use.
pub fn decode_text(bytes: &[u8]) -> Result<String, ReferenceError> {
    let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Err(ReferenceError::Empty);
    }

    if let Ok(text) = std::str::from_utf8(bytes) {
        return Ok(text.to_owned());
    }

    for encoding in [SHIFT_JIS, EUC_JP, ISO_2022_JP] {
        if let Some(text) = encoding.decode_without_bom_handling_and_without_replacement(bytes) {
            info!(encoding = encoding.name(), "Decoded upload with legacy encoding");
            return Ok(text.into_owned());
        }
    }

    Err(ReferenceError::Encoding)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValueCount {
    pub value: String,
    pub count: usize,
    pub percentage: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ColumnSummary {
    Numeric {
        min: f64,
        max: f64,
        mean: f64,
        median: f64,
        /// Sample standard deviation; zero for a single value.
        std: f64,
    },
    Categorical { top: Vec<ValueCount> },
    Empty,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ColumnProfile {
    pub name: String,
    #[serde(flatten)]
    pub summary: ColumnSummary,
}

/// Bounded view of an uploaded CSV: header, first rows and per-column profile.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CsvExcerpt {
    pub headers: Vec<String>,
    pub sample_rows: Vec<Vec<String>>,
    pub total_rows: usize,
    pub columns: Vec<ColumnProfile>,
    /// Per-row choice shares for tally-shaped surveys; empty otherwise.
    pub group_trends: Vec<GroupTrend>,
}

/// One choice column's share of a row's respondents.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChoiceShare {
    pub choice: String,
    pub count: f64,
    pub percentage: f64,
}

/// Choice preferences of one respondent group, e.g. a job type.
///
/// Built from surveys laid out as: group label, respondent count, then one
/// count column per choice.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupTrend {
    pub label: String,
    pub respondents: f64,
    /// Two highest shares, highest first.
    pub top: Vec<ChoiceShare>,
    /// Two lowest shares when there are more than two choices.
    pub bottom: Vec<ChoiceShare>,
}

impl CsvExcerpt {
    /// Parse CSV text with a header row, keeping at most `sample_rows` rows.
    pub fn parse(text: &str, sample_rows: usize) -> Result<Self, ReferenceError> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(text.as_bytes());

        let headers: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();
        if headers.iter().all(String::is_empty) {
            return Err(ReferenceError::NoRows);
        }

        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record?;
            if record.iter().all(str::is_empty) {
                continue;
            }
            rows.push(record.iter().map(str::to_string).collect::<Vec<_>>());
        }
        if rows.is_empty() {
            return Err(ReferenceError::NoRows);
        }

        let columns = headers
            .iter()
            .enumerate()
            .map(|(idx, name)| ColumnProfile {
                name: name.clone(),
                summary: summarize_column(&rows, idx),
            })
            .collect();
        let group_trends = group_trends(&headers, &rows);

        Ok(Self {
            total_rows: rows.len(),
            group_trends,
            sample_rows: rows.into_iter().take(sample_rows.max(1)).collect(),
            headers,
            columns,
        })
    }

    pub fn num_columns(&self) -> usize {
        self.headers.len()
    }

    /// Sample rows as header-keyed records, for embedding as JSON.
    pub fn sample_records(&self) -> Vec<Map<String, Value>> {
        self.sample_rows
            .iter()
            .map(|row| {
                self.headers
                    .iter()
                    .enumerate()
                    .map(|(idx, header)| {
                        let cell = row.get(idx).cloned().unwrap_or_default();
                        (header.clone(), Value::String(cell))
                    })
                    .collect()
            })
            .collect()
    }
}

fn summarize_column(rows: &[Vec<String>], idx: usize) -> ColumnSummary {
    let cells: Vec<&str> = rows
        .iter()
        .filter_map(|row| row.get(idx).map(String::as_str))
        .filter(|cell| !cell.is_empty())
        .collect();
    if cells.is_empty() {
        return ColumnSummary::Empty;
    }

    let numbers: Option<Vec<f64>> = cells.iter().map(|c| c.parse::<f64>().ok()).collect();
    if let Some(numbers) = numbers.filter(|n| n.iter().all(|v| v.is_finite())) {
        let min = numbers.iter().copied().fold(f64::INFINITY, f64::min);
        let max = numbers.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let mean = numbers.iter().sum::<f64>() / numbers.len() as f64;
        return ColumnSummary::Numeric {
            min,
            max,
            mean,
            median: median(&numbers),
            std: sample_std(&numbers, mean),
        };
    }

    // Counts in first-appearance order so ties stay stable after sorting.
    let mut counts: Vec<(&str, usize)> = Vec::new();
    let mut index: HashMap<&str, usize> = HashMap::new();
    for &cell in &cells {
        match index.get(cell) {
            Some(&pos) => counts[pos].1 += 1,
            None => {
                index.insert(cell, counts.len());
                counts.push((cell, 1));
            }
        }
    }
    counts.sort_by(|a, b| b.1.cmp(&a.1));

    let total = rows.len() as f64;
    let top = counts
        .into_iter()
        .take(constants::CSV_TOP_VALUES)
        .map(|(value, count)| ValueCount {
            value: value.to_string(),
            count,
            percentage: (count as f64 / total * 1000.0).round() / 10.0,
        })
        .collect();
    ColumnSummary::Categorical { top }
}

fn median(numbers: &[f64]) -> f64 {
    let mut sorted = numbers.to_vec();
    sorted.sort_by(f64::total_cmp);
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

fn sample_std(numbers: &[f64], mean: f64) -> f64 {
    if numbers.len() < 2 {
        return 0.0;
    }
    let variance = numbers.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (numbers.len() - 1) as f64;
    variance.sqrt()
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

/// Choice shares per row. Rows without a label, a positive respondent count
/// or any numeric choice cell are skipped.
fn group_trends(headers: &[String], rows: &[Vec<String>]) -> Vec<GroupTrend> {
    if headers.len() < 3 {
        return Vec::new();
    }

    let mut trends = Vec::new();
    for row in rows {
        let Some(label) = row.first().filter(|label| !label.is_empty()) else {
            continue;
        };
        let Some(respondents) = row
            .get(1)
            .and_then(|cell| cell.parse::<f64>().ok())
            .filter(|n| n.is_finite() && *n > 0.0)
        else {
            continue;
        };

        let mut shares: Vec<ChoiceShare> = headers
            .iter()
            .enumerate()
            .skip(2)
            .filter_map(|(idx, choice)| {
                let count = row.get(idx)?.parse::<f64>().ok().filter(|n| n.is_finite())?;
                Some(ChoiceShare {
                    choice: choice.clone(),
                    count,
                    percentage: round1(count / respondents * 100.0),
                })
            })
            .collect();
        if shares.is_empty() {
            continue;
        }
        // Stable sort keeps column order among equal shares.
        shares.sort_by(|a, b| b.percentage.total_cmp(&a.percentage));

        let bottom = if shares.len() > 2 {
            shares[shares.len() - 2..].to_vec()
        } else {
            Vec::new()
        };
        shares.truncate(2);
        trends.push(GroupTrend {
            label: label.clone(),
            respondents,
            top: shares,
            bottom,
        });
    }
    trends
}

/// Raw markup of an uploaded SVG.
#[derive(Debug, Clone, PartialEq)]
pub struct SvgReference {
    pub markup: String,
}

impl SvgReference {
    pub fn parse(text: &str) -> Result<Self, ReferenceError> {
        if extract_svg(text).is_none() {
            return Err(ReferenceError::MalformedSvg);
        }
        Ok(Self {
            markup: text.trim().to_string(),
        })
    }
}

/// The reference files currently held by a session. Each slot is replaced,
/// never merged, by a new upload.
#[derive(Debug, Clone, Default)]
pub struct UploadedReferences {
    pub csv: Option<CsvExcerpt>,
    pub svg: Option<SvgReference>,
}

impl UploadedReferences {
    /// Replace the CSV slot. On failure the slot is left empty.
    pub fn replace_csv(
        &mut self,
        bytes: &[u8],
        sample_rows: usize,
    ) -> Result<&CsvExcerpt, ReferenceError> {
        self.csv = None;
        let parsed = decode_text(bytes).and_then(|text| CsvExcerpt::parse(&text, sample_rows));
        match parsed {
            Ok(excerpt) => {
                info!(
                    rows = excerpt.total_rows,
                    columns = excerpt.num_columns(),
                    "Loaded CSV reference"
                );
                Ok(&*self.csv.insert(excerpt))
            }
            Err(e) => {
                warn!(error = %e, "Ignoring CSV upload");
                Err(e)
            }
        }
    }

    /// Replace the SVG slot. On failure the slot is left empty.
    pub fn replace_svg(&mut self, bytes: &[u8]) -> Result<&SvgReference, ReferenceError> {
        self.svg = None;
        match decode_text(bytes).and_then(|text| SvgReference::parse(&text)) {
            Ok(svg) => {
                info!(len = svg.markup.len(), "Loaded SVG reference");
                Ok(&*self.svg.insert(svg))
            }
            Err(e) => {
                warn!(error = %e, "Ignoring SVG upload");
                Err(e)
            }
        }
    }

    pub fn clear(&mut self) {
        self.csv = None;
        self.svg = None;
    }

    pub fn is_empty(&self) -> bool {
        self.csv.is_none() && self.svg.is_none()
    }
}
