//! Bulk product ingestion from an uploaded CSV file.
//!
//! Every row is validated and written on its own: a bad row ends up in the
//! report and never stops the rows after it. Rows are processed in file order,
//! and each write is visible to the next row, so a name repeated inside the
//! same file is created once and skipped afterwards.
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use pantry_common::product::{NewProduct, Product};
use pantry_common::store::{ProductStore, StoreError};

/// Upload size limit used when none is configured.
pub const MAX_CSV_BYTES: usize = 5 * 1024 * 1024;

const MISSING_FIELDS: &str = "missing required fields";
const INVALID_DATE: &str = "invalid date format";
const ALREADY_EXISTS: &str = "already exists";

/// Reasons an upload is refused before any row is looked at.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum UploadError {
    #[error("only CSV files are allowed")]
    NotCsv,
    #[error("file exceeds the {limit} byte limit")]
    TooLarge { limit: usize },
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum IngestError {
    #[error("CSV file is empty or invalid")]
    Empty,
}

/// Accept files declared as `text/csv` or named `*.csv`.
pub fn check_file_type(file_name: Option<&str>, content_type: Option<&str>) -> Result<(), UploadError> {
    let csv_mime = content_type
        .map(|mime| mime.split(';').next().unwrap_or_default().trim())
        .is_some_and(|mime| mime.eq_ignore_ascii_case("text/csv"));
    let csv_extension = file_name
        .is_some_and(|name| name.to_ascii_lowercase().ends_with(".csv"));

    if csv_mime || csv_extension {
        Ok(())
    } else {
        Err(UploadError::NotCsv)
    }
}

pub fn check_size(size: usize, limit: usize) -> Result<(), UploadError> {
    if size > limit {
        Err(UploadError::TooLarge { limit })
    } else {
        Ok(())
    }
}

/// One data row of the uploaded file.
#[derive(Debug, Clone, PartialEq)]
pub struct CsvRow {
    /// 1-based line in the file; the header is line 1.
    pub line: usize,
    /// Raw cells in file order keyed by column, or why the record could not
    /// be decoded. Cells past the last header are keyed by position.
    pub fields: Result<Vec<(String, String)>, String>,
}

impl CsvRow {
    fn data(&self) -> Value {
        match &self.fields {
            Ok(fields) => Value::Object(
                fields
                    .iter()
                    .map(|(column, value)| (column.clone(), Value::String(value.clone())))
                    .collect(),
            ),
            Err(_) => Value::Null,
        }
    }
}

/// Key for a cell with no header above it, by 1-based position.
fn overflow_column(position: usize) -> String {
    format!("column{}", position + 1)
}

/// Split a CSV buffer into rows keyed by the header. Rows shorter than the
/// header simply lack the trailing columns.
pub fn parse_rows(bytes: &[u8]) -> Vec<CsvRow> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::Headers)
        .from_reader(bytes);

    let headers = match reader.headers() {
        Ok(headers) => headers.clone(),
        Err(error) => {
            debug!("failed to read CSV header: {}", error);
            return Vec::new();
        }
    };

    reader
        .records()
        .enumerate()
        .map(|(index, record)| CsvRow {
            line: index + 2,
            fields: record
                .map(|record| {
                    record
                        .iter()
                        .enumerate()
                        .map(|(position, value)| {
                            let column = headers
                                .get(position)
                                .map_or_else(|| overflow_column(position), str::to_owned);
                            (column, value.to_owned())
                        })
                        .collect()
                })
                .map_err(|error| format!("malformed row: {error}")),
        })
        .collect()
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct RowError {
    pub line: usize,
    pub data: Value,
    pub error: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SkippedRow {
    pub line: usize,
    pub name: String,
    pub reason: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SuccessfulRows {
    pub count: usize,
    pub records: Vec<Product>,
}

/// Full accounting of an ingestion batch: every parsed row is in exactly one
/// of `successful`, `errors` or `skipped`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct IngestReport {
    pub message: String,
    pub total: usize,
    pub successful: SuccessfulRows,
    pub errors: Vec<RowError>,
    pub skipped: Vec<SkippedRow>,
}

fn cell<'a>(fields: &'a [(String, String)], column: &str) -> Option<&'a str> {
    fields
        .iter()
        .find(|(name, _)| name == column)
        .map(|(_, value)| value.as_str())
}

/// Non-empty trimmed value of a column.
fn required<'a>(fields: &'a [(String, String)], column: &str) -> Option<&'a str> {
    cell(fields, column)
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

fn parse_number(value: &str, column: &str) -> Result<f64, String> {
    value
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|number| number.is_finite())
        .ok_or_else(|| format!("invalid number for {column}"))
}

/// Parse an expiry date. Bare dates are taken as midnight UTC.
pub fn parse_expiry_date(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();

    if let Ok(date) = DateTime::parse_from_rfc3339(value) {
        return Some(date.with_timezone(&Utc));
    }
    if let Ok(date) = NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S") {
        return Some(date.and_utc());
    }

    ["%Y-%m-%d", "%m/%d/%Y"]
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(value, format).ok())
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|date| date.and_utc())
}

/// Turn a row into a product, or explain why it cannot be one.
pub fn validate_row(fields: &[(String, String)]) -> Result<NewProduct, String> {
    let (Some(name), Some(quantity), Some(price), Some(expiry_date), Some(notify_before_days)) = (
        required(fields, "name"),
        required(fields, "quantity"),
        required(fields, "price"),
        required(fields, "expiryDate"),
        required(fields, "notifyBeforeDays"),
    ) else {
        return Err(MISSING_FIELDS.to_owned());
    };

    let quantity = parse_number(quantity, "quantity")?;
    let price = parse_number(price, "price")?;
    let notify_before_days = notify_before_days
        .parse::<i32>()
        .map_err(|_| "invalid number for notifyBeforeDays".to_owned())?;
    let weight = required(fields, "weight")
        .map(|weight| parse_number(weight, "weight"))
        .transpose()?;

    let expiry_date = parse_expiry_date(expiry_date).ok_or_else(|| INVALID_DATE.to_owned())?;

    Ok(NewProduct {
        name: name.to_owned(),
        category: cell(fields, "category").unwrap_or_default().to_owned(),
        subcategory: cell(fields, "subcategory").unwrap_or_default().to_owned(),
        quantity,
        weight,
        price,
        expiry_date,
        notify_before_days,
    }
    .normalized())
}

enum RowOutcome {
    Created(Product),
    Skipped(SkippedRow),
    Failed(RowError),
}

impl RowOutcome {
    fn label(&self) -> &'static str {
        match self {
            RowOutcome::Created(_) => "created",
            RowOutcome::Skipped(_) => "skipped",
            RowOutcome::Failed(_) => "error",
        }
    }
}

async fn ingest_row<S: ProductStore + ?Sized>(store: &S, row: &CsvRow) -> RowOutcome {
    let failed = |error: String| {
        RowOutcome::Failed(RowError {
            line: row.line,
            data: row.data(),
            error,
        })
    };

    let fields = match &row.fields {
        Ok(fields) => fields,
        Err(error) => return failed(error.clone()),
    };

    let product = match validate_row(fields) {
        Ok(product) => product,
        Err(error) => return failed(error),
    };

    match store.insert_product(product).await {
        Ok(created) => RowOutcome::Created(created),
        Err(StoreError::Duplicate { name }) => RowOutcome::Skipped(SkippedRow {
            line: row.line,
            name,
            reason: ALREADY_EXISTS.to_owned(),
        }),
        Err(error) => failed(error.to_string()),
    }
}

/// Validate and write every row in order, collecting a report.
pub async fn ingest<S: ProductStore + ?Sized>(
    store: &S,
    rows: Vec<CsvRow>,
) -> Result<IngestReport, IngestError> {
    if rows.is_empty() {
        return Err(IngestError::Empty);
    }

    let mut report = IngestReport {
        message: "CSV processing completed".to_owned(),
        total: rows.len(),
        successful: SuccessfulRows {
            count: 0,
            records: Vec::new(),
        },
        errors: Vec::new(),
        skipped: Vec::new(),
    };

    for row in &rows {
        let outcome = ingest_row(store, row).await;
        debug!("CSV line {}: {}", row.line, outcome.label());
        metrics::counter!("csv_rows_total", &[("outcome", outcome.label())]).increment(1);

        match outcome {
            RowOutcome::Created(product) => report.successful.records.push(product),
            RowOutcome::Skipped(skipped) => report.skipped.push(skipped),
            RowOutcome::Failed(error) => report.errors.push(error),
        }
    }
    report.successful.count = report.successful.records.len();

    Ok(report)
}
