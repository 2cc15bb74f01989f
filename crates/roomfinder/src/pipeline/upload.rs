//! Spreadsheet import.
//!
//! Each uploaded sheet is a CSV export. A JSON sidecar names, per sheet, the
//! zero-based columns holding the free-text schedule notation and the room.
//! Rows go through the schedule parser and are written with the same bulk
//! upsert the reindexer uses.

use csv::StringRecord;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use thiserror::Error;
use tracing::{debug, error, info};

use crate::db::{FailedDoc, IndexError, OccupancyIndex};
use crate::occupancy::{from_time_slot, OccupancyRecord};
use crate::schedule;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SheetColumns {
    pub notation: usize,
    pub room: usize,
    #[serde(default = "default_header_rows")]
    pub header_rows: usize,
}

fn default_header_rows() -> usize {
    1
}

#[derive(Debug, Clone)]
pub struct UploadedSheet {
    pub name: String,
    pub data: Vec<u8>,
}

impl UploadedSheet {
    /// Names the sheet after the uploaded file, without its extension.
    pub fn from_file(file_name: &str, data: Vec<u8>) -> Self {
        let name = Path::new(file_name)
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| file_name.to_string());
        Self { name, data }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ImportReport {
    pub sheets: usize,
    pub rows_read: usize,
    pub rows_skipped: usize,
    pub records_written: usize,
}

#[derive(Debug, Error)]
pub enum ImportError {
    #[error("Invalid column sidecar: {0}")]
    Sidecar(#[from] serde_json::Error),

    #[error("No sheets uploaded")]
    NoSheets,

    #[error("No column mapping for sheet {sheet:?}")]
    UnmappedSheet { sheet: String },

    #[error("Sheet {sheet:?} is unreadable: {source}")]
    Csv { sheet: String, source: csv::Error },

    #[error("Index write failed: {0}")]
    Index(#[from] IndexError),

    #[error("{} of the imported records failed to write", failed.len())]
    PartialWrite {
        report: ImportReport,
        failed: Vec<FailedDoc>,
    },
}

pub fn parse_sidecar(json: &str) -> Result<HashMap<String, SheetColumns>, ImportError> {
    Ok(serde_json::from_str(json)?)
}

/// Parses every sheet, then writes the union of their records in one bulk
/// upsert. Rows without a room or without a parseable clause are skipped.
pub async fn import_sheets(
    index: &dyn OccupancyIndex,
    year: &str,
    semester: &str,
    sheets: &[UploadedSheet],
    columns: &HashMap<String, SheetColumns>,
) -> Result<ImportReport, ImportError> {
    if sheets.is_empty() {
        return Err(ImportError::NoSheets);
    }

    let mut report = ImportReport::default();
    let mut docs = BTreeMap::new();
    for sheet in sheets {
        let mapping = columns
            .get(&sheet.name)
            .ok_or_else(|| ImportError::UnmappedSheet {
                sheet: sheet.name.clone(),
            })?;
        read_sheet(year, semester, sheet, mapping, &mut report, &mut docs)?;
        report.sheets += 1;
    }

    let docs: Vec<OccupancyRecord> = docs.into_values().collect();
    let bulk = index.bulk_upsert(&docs).await?;
    report.records_written = bulk.written;

    if !bulk.is_clean() {
        for failed in &bulk.failed {
            error!(doc_id = %failed.doc_id, reason = %failed.reason, "Imported record failed to write");
        }
        return Err(ImportError::PartialWrite {
            report,
            failed: bulk.failed,
        });
    }

    info!(
        year = %year,
        semester = %semester,
        sheets = report.sheets,
        rows = report.rows_read,
        skipped = report.rows_skipped,
        written = report.records_written,
        "Spreadsheet import finished"
    );
    Ok(report)
}

fn read_sheet(
    year: &str,
    semester: &str,
    sheet: &UploadedSheet,
    mapping: &SheetColumns,
    report: &mut ImportReport,
    docs: &mut BTreeMap<String, OccupancyRecord>,
) -> Result<(), ImportError> {
    let data = sheet
        .data
        .strip_prefix(b"\xEF\xBB\xBF".as_slice())
        .unwrap_or(&sheet.data[..]);

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(data);

    let mut record = StringRecord::new();
    let mut line = 0usize;
    while reader
        .read_record(&mut record)
        .map_err(|source| ImportError::Csv {
            sheet: sheet.name.clone(),
            source,
        })?
    {
        line += 1;
        if line <= mapping.header_rows {
            continue;
        }
        report.rows_read += 1;

        let room = record.get(mapping.room).map(str::trim).unwrap_or_default();
        let notation = record.get(mapping.notation).unwrap_or_default();
        let slots = schedule::parse(notation);
        if room.is_empty() || slots.is_empty() {
            debug!(sheet = %sheet.name, line, "Skipping row without room or schedule");
            report.rows_skipped += 1;
            continue;
        }

        for slot in &slots {
            let doc = from_time_slot(year, semester, room, slot);
            docs.insert(doc.doc_id(), doc);
        }
    }
    Ok(())
}
