//! CSV import of lookup requests and export of lookup results
//!
//! Import turns each data row into a [`LookupRequest`]: the identifier column
//! becomes the raw identifier and every cell (identifier included) becomes
//! metadata keyed by its header. Export writes one row per result followed by
//! the metadata columns.

use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

use serde_json::Value;

use crate::coordinator::{LookupRequest, LookupResult, Metadata};
use crate::error::ExportError;

/// Identifier column of the Spanish intra-EU operations listing.
pub const DEFAULT_ID_COLUMN: &str = "NIF Contraparte";

/// Metadata key holding the 1-based source line a row starts on (the header
/// is line 1).
pub const ROW_NUMBER_KEY: &str = "_row_number";

/// Leading export columns; metadata columns follow.
pub const EXPORT_COLUMNS: [&str; 9] = [
    "VAT Number",
    "Country Code",
    "Status",
    "Valid",
    "Name",
    "Address",
    "Request Date",
    "Error",
    "Attempts",
];

#[derive(Debug, Clone)]
pub struct ImportOptions {
    /// Column holding the VAT numbers.
    pub id_column: String,
    /// Further columns that must be present in the header.
    pub required_columns: Vec<String>,
}

impl Default for ImportOptions {
    fn default() -> Self {
        Self {
            id_column: DEFAULT_ID_COLUMN.to_string(),
            required_columns: Vec::new(),
        }
    }
}

impl ImportOptions {
    pub fn with_id_column(mut self, column: impl Into<String>) -> Self {
        self.id_column = column.into();
        self
    }

    pub fn require(mut self, column: impl Into<String>) -> Self {
        self.required_columns.push(column.into());
        self
    }
}

/// Read requests from CSV. Rows with a blank identifier are skipped.
pub fn read_requests<R: Read>(
    reader: R,
    options: &ImportOptions,
) -> Result<Vec<LookupRequest>, ExportError> {
    let mut csv_reader = csv::ReaderBuilder::new().flexible(true).from_reader(reader);
    let headers: Vec<String> = csv_reader
        .headers()?
        .iter()
        .map(|h| h.trim().to_string())
        .collect();

    let missing: Vec<String> = std::iter::once(&options.id_column)
        .chain(options.required_columns.iter())
        .filter(|column| !headers.contains(column))
        .cloned()
        .collect();
    if !missing.is_empty() {
        return Err(ExportError::MissingColumns(missing));
    }
    let id_index = headers
        .iter()
        .position(|h| h == &options.id_column)
        .ok_or_else(|| ExportError::MissingColumns(vec![options.id_column.clone()]))?;

    let mut requests = Vec::new();
    for (index, record) in csv_reader.records().enumerate() {
        let record = record?;
        let identifier = record.get(id_index).map(str::trim).unwrap_or_default();
        if identifier.is_empty() {
            continue;
        }

        let mut metadata: Metadata = headers
            .iter()
            .zip(record.iter())
            .map(|(header, cell)| (header.clone(), Value::String(cell.to_string())))
            .collect();
        let line = record
            .position()
            .map(|p| p.line())
            .unwrap_or(index as u64 + 2);
        metadata.insert(ROW_NUMBER_KEY.to_string(), Value::from(line));

        requests.push(LookupRequest::new(identifier).with_metadata(metadata));
    }

    if requests.is_empty() {
        return Err(ExportError::NoIdentifiers(options.id_column.clone()));
    }

    tracing::info!(count = requests.len(), column = %options.id_column, "Imported VAT numbers");
    Ok(requests)
}

pub fn read_requests_from_path(
    path: impl AsRef<Path>,
    options: &ImportOptions,
) -> Result<Vec<LookupRequest>, ExportError> {
    read_requests(File::open(path)?, options)
}

/// Write results as CSV.
///
/// Metadata columns appear in first-seen order across all results; keys
/// starting with `_` are internal and omitted.
pub fn write_results<W: Write>(writer: W, results: &[LookupResult]) -> Result<(), ExportError> {
    let metadata_columns = metadata_columns(results);
    let mut csv_writer = csv::Writer::from_writer(writer);

    csv_writer.write_record(
        EXPORT_COLUMNS
            .iter()
            .copied()
            .chain(metadata_columns.iter().map(String::as_str)),
    )?;

    for result in results {
        let payload = result.payload();
        let text = |field: Option<&String>| field.cloned().unwrap_or_default();
        let mut row = vec![
            result.full_identifier.clone(),
            result.jurisdiction_code.clone(),
            if result.is_success() { "Success" } else { "Failure" }.to_string(),
            payload
                .and_then(|p| p.is_valid)
                .map(|valid| if valid { "True" } else { "False" }.to_string())
                .unwrap_or_default(),
            text(payload.and_then(|p| p.name.as_ref())),
            text(payload.and_then(|p| p.address.as_ref())),
            text(payload.and_then(|p| p.request_date.as_ref())),
            result.failure_reason().unwrap_or_default().to_string(),
            result.attempts.to_string(),
        ];
        row.extend(
            metadata_columns
                .iter()
                .map(|column| cell_text(result.metadata.get(column))),
        );
        csv_writer.write_record(&row)?;
    }

    csv_writer.flush()?;
    Ok(())
}

pub fn write_results_to_path(
    path: impl AsRef<Path>,
    results: &[LookupResult],
) -> Result<(), ExportError> {
    write_results(File::create(path)?, results)
}

fn metadata_columns(results: &[LookupResult]) -> Vec<String> {
    let mut columns: Vec<String> = Vec::new();
    for key in results.iter().flat_map(|r| r.metadata.keys()) {
        if !key.starts_with('_') && !columns.contains(key) {
            columns.push(key.clone());
        }
    }
    columns
}

fn cell_text(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinator::{FailureKind, LookupOutcome};
    use crate::lookup::LookupPayload;
    use serde_json::json;

    const SAMPLE: &str = "\
NIF Contraparte,Importe,Tipo
IT00743110157,1200.50,E
,15,E
  DE123456789 ,80,S
";

    #[test]
    fn test_read_requests() {
        let requests = read_requests(SAMPLE.as_bytes(), &ImportOptions::default()).unwrap();
        assert_eq!(requests.len(), 2);

        assert_eq!(requests[0].raw_identifier(), "IT00743110157");
        assert_eq!(requests[0].metadata().get("Importe"), Some(&json!("1200.50")));
        assert_eq!(requests[0].metadata().get(ROW_NUMBER_KEY), Some(&json!(2)));

        assert_eq!(requests[1].raw_identifier(), "DE123456789");
        assert_eq!(requests[1].metadata().get(ROW_NUMBER_KEY), Some(&json!(4)));
    }

    #[test]
    fn test_missing_columns() {
        let options = ImportOptions::default().require("Importe").require("Fecha");
        let err = read_requests(SAMPLE.as_bytes(), &options).unwrap_err();
        assert!(matches!(err, ExportError::MissingColumns(cols) if cols == vec!["Fecha".to_string()]));

        let options = ImportOptions::default().with_id_column("VAT");
        let err = read_requests(SAMPLE.as_bytes(), &options).unwrap_err();
        assert!(matches!(err, ExportError::MissingColumns(cols) if cols == vec!["VAT".to_string()]));
    }

    #[test]
    fn test_row_number_follows_multiline_cells() {
        let csv = "NIF Contraparte,Nota\nIT00743110157,\"two\nlines\"\nDE123456789,x\n";
        let requests = read_requests(csv.as_bytes(), &ImportOptions::default()).unwrap();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].metadata().get("Nota"), Some(&json!("two\nlines")));
        assert_eq!(requests[0].metadata().get(ROW_NUMBER_KEY), Some(&json!(2)));
        assert_eq!(requests[1].metadata().get(ROW_NUMBER_KEY), Some(&json!(4)));
    }

    #[test]
    fn test_no_identifiers() {
        let csv = "NIF Contraparte,Importe\n,10\n  ,20\n";
        let err = read_requests(csv.as_bytes(), &ImportOptions::default()).unwrap_err();
        assert!(matches!(err, ExportError::NoIdentifiers(_)));
    }

    #[test]
    fn test_short_rows_are_accepted() {
        let csv = "NIF Contraparte,Importe,Tipo\nFR40303265045\n";
        let requests = read_requests(csv.as_bytes(), &ImportOptions::default()).unwrap();
        assert_eq!(requests.len(), 1);
        assert!(requests[0].metadata().get("Tipo").is_none());
    }

    #[test]
    fn test_write_results() {
        let mut metadata = Metadata::new();
        metadata.insert("Importe".into(), json!("1200.50"));
        metadata.insert(ROW_NUMBER_KEY.into(), json!(2));

        let results = vec![
            LookupResult {
                full_identifier: "IT00743110157".into(),
                jurisdiction_code: "IT".into(),
                outcome: LookupOutcome::Success {
                    payload: LookupPayload::valid("2025-06-02")
                        .with_name("ACME, SPA")
                        .with_address("VIA ROMA 1"),
                },
                attempts: 2,
                metadata,
            },
            LookupResult {
                full_identifier: "US1".into(),
                jurisdiction_code: "UNKNOWN".into(),
                outcome: LookupOutcome::failure(
                    FailureKind::UnresolvedJurisdiction,
                    "no resolvable jurisdiction code",
                ),
                attempts: 0,
                metadata: Metadata::new(),
            },
        ];

        let mut out = Vec::new();
        write_results(&mut out, &results).unwrap();
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();

        assert_eq!(
            lines[0],
            "VAT Number,Country Code,Status,Valid,Name,Address,Request Date,Error,Attempts,Importe"
        );
        assert_eq!(
            lines[1],
            "IT00743110157,IT,Success,True,\"ACME, SPA\",VIA ROMA 1,2025-06-02,,2,1200.50"
        );
        assert_eq!(
            lines[2],
            "US1,UNKNOWN,Failure,,,,,no resolvable jurisdiction code,0,"
        );
    }

    #[test]
    fn test_cell_text() {
        assert_eq!(cell_text(None), "");
        assert_eq!(cell_text(Some(&json!(null))), "");
        assert_eq!(cell_text(Some(&json!("x"))), "x");
        assert_eq!(cell_text(Some(&json!(12.5))), "12.5");
        assert_eq!(cell_text(Some(&json!(true))), "true");
    }
}
