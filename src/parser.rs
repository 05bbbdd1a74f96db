// 🏗️ Record Loader - CSV exports → TransactionRecord
// Header matching is alias-based so raw Refinitiv exports load unchanged

use crate::error::{ParseError, PipelineError, PipelineResult};
use crate::record::{InstrumentType, TransactionRecord};
use chrono::NaiveDate;
use csv::{ReaderBuilder, StringRecord};
use rust_decimal::Decimal;
use std::collections::HashSet;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, info, warn};

// ============================================================================
// COLUMN SCHEMA
// ============================================================================

// Header aliases, compared after lower-casing and dropping non-alphanumerics
const ISSUER_HEADERS: &[&str] = &["issuer", "issuername", "issuercommonname", "borrower", "borrowername"];
const AMOUNT_HEADERS: &[&str] = &["amount", "faceissuedtotal", "amountissued", "trancheamount", "dealvalue"];
const CURRENCY_HEADERS: &[&str] = &["currency", "ccy", "issuecurrency"];
const DATE_HEADERS: &[&str] = &["date", "issuedate", "signingdate", "dealdate"];
const INSTRUMENT_HEADERS: &[&str] = &["instrumenttype", "instrument", "type", "assettype"];
const PROCEEDS_HEADERS: &[&str] = &["useofproceeds", "proceeds", "greenuseofproceeds"];
const COUNTRY_HEADERS: &[&str] = &["issuercountry", "country", "borrowercountry"];
const ISIN_HEADERS: &[&str] = &["isin"];

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%m/%d/%Y", "%d.%m.%Y", "%Y/%m/%d"];

fn normalize_header(header: &str) -> String {
    header
        .chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect()
}

/// Resolved column positions for one file
#[derive(Debug, Clone)]
struct ColumnMap {
    issuer: usize,
    amount: usize,
    date: usize,
    currency: Option<usize>,
    instrument: Option<usize>,
    proceeds: Option<usize>,
    country: Option<usize>,
    isin: Option<usize>,
}

impl ColumnMap {
    fn from_headers(
        headers: &StringRecord,
        options: &LoadOptions,
        source: &str,
    ) -> PipelineResult<Self> {
        let normalized: Vec<String> = headers.iter().map(normalize_header).collect();
        let find = |aliases: &[&str]| {
            aliases
                .iter()
                .find_map(|alias| normalized.iter().position(|h| h == alias))
        };
        let require = |aliases: &[&str], column: &str| {
            find(aliases).ok_or_else(|| PipelineError::MissingColumn {
                path: source.into(),
                column: column.to_string(),
            })
        };

        let currency = find(CURRENCY_HEADERS);
        if currency.is_none() && options.default_currency.is_none() {
            return Err(PipelineError::MissingColumn {
                path: source.into(),
                column: "currency".to_string(),
            });
        }

        let instrument = find(INSTRUMENT_HEADERS);
        if instrument.is_none() && options.default_instrument.is_none() {
            return Err(PipelineError::MissingColumn {
                path: source.into(),
                column: "instrument_type".to_string(),
            });
        }

        Ok(ColumnMap {
            issuer: require(ISSUER_HEADERS, "issuer")?,
            amount: require(AMOUNT_HEADERS, "amount")?,
            date: require(DATE_HEADERS, "date")?,
            currency,
            instrument,
            proceeds: find(PROCEEDS_HEADERS),
            country: find(COUNTRY_HEADERS),
            isin: find(ISIN_HEADERS),
        })
    }
}

// ============================================================================
// OPTIONS & REPORT
// ============================================================================

/// Per-file fallbacks for single-instrument or single-currency exports
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadOptions {
    /// Used when the export has no instrument column (e.g. a bonds-only export)
    pub default_instrument: Option<InstrumentType>,

    /// Used when the export has no currency column
    pub default_currency: Option<String>,
}

impl LoadOptions {
    pub fn with_default_instrument(mut self, instrument: InstrumentType) -> Self {
        self.default_instrument = Some(instrument);
        self
    }

    pub fn with_default_currency(mut self, currency: &str) -> Self {
        self.default_currency = Some(currency.trim().to_uppercase());
        self
    }
}

#[derive(Debug, Clone)]
pub struct LoadReport {
    pub source_file: String,

    /// Loaded records, in file order
    pub records: Vec<TransactionRecord>,

    /// Data rows seen (header excluded)
    pub total_rows: usize,

    /// Rows that were skipped, with the reason
    pub skipped: Vec<ParseError>,

    /// Rows whose fingerprint was already seen in this file (kept, only counted)
    pub duplicate_count: usize,
}

impl LoadReport {
    pub fn loaded_count(&self) -> usize {
        self.records.len()
    }

    pub fn skipped_count(&self) -> usize {
        self.skipped.len()
    }

    pub fn summary(&self) -> String {
        format!(
            "{}: {} rows, {} loaded, {} skipped, {} duplicates",
            self.source_file,
            self.total_rows,
            self.loaded_count(),
            self.skipped_count(),
            self.duplicate_count
        )
    }
}

// ============================================================================
// LOADING
// ============================================================================

/// Load a CSV export from disk.
///
/// Missing file or missing required column is fatal; bad rows are skipped.
pub fn load_records(path: &Path, options: &LoadOptions) -> PipelineResult<LoadReport> {
    let file = File::open(path).map_err(|e| PipelineError::io(path, e))?;
    let source = path.display().to_string();
    load_records_from_reader(file, &source, options)
}

/// Load records from any reader; `source` names the input in reports and errors.
pub fn load_records_from_reader<R: Read>(
    reader: R,
    source: &str,
    options: &LoadOptions,
) -> PipelineResult<LoadReport> {
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let headers = reader
        .headers()
        .map_err(|e| PipelineError::csv(source, e))?
        .clone();
    let columns = ColumnMap::from_headers(&headers, options, source)?;

    let mut report = LoadReport {
        source_file: source.to_string(),
        records: Vec::new(),
        total_rows: 0,
        skipped: Vec::new(),
        duplicate_count: 0,
    };
    let mut seen = HashSet::new();

    for (idx, result) in reader.records().enumerate() {
        report.total_rows += 1;
        let fallback_line = idx + 2; // 1-indexed + header row

        let row = match result {
            Ok(row) => row,
            Err(e) => {
                let line = e
                    .position()
                    .map(|p| p.line() as usize)
                    .unwrap_or(fallback_line);
                let err = ParseError::MalformedRow {
                    line,
                    reason: e.to_string(),
                };
                debug!("{}: skipping row: {}", source, err);
                report.skipped.push(err);
                continue;
            }
        };

        let line = row
            .position()
            .map(|p| p.line() as usize)
            .unwrap_or(fallback_line);

        match parse_row(&row, &columns, options, source, line) {
            Ok(record) => {
                if !seen.insert(record.fingerprint()) {
                    report.duplicate_count += 1;
                }
                report.records.push(record);
            }
            Err(err) => {
                debug!("{}: skipping row: {}", source, err);
                report.skipped.push(err);
            }
        }
    }

    if report.skipped_count() > 0 {
        warn!("{}: skipped {} unparseable rows", source, report.skipped_count());
    }
    info!("{}", report.summary());

    Ok(report)
}

fn parse_row(
    row: &StringRecord,
    columns: &ColumnMap,
    options: &LoadOptions,
    source: &str,
    line: usize,
) -> Result<TransactionRecord, ParseError> {
    let issuer_name = required(row, columns.issuer, "issuer", line)?.to_string();

    let raw_amount = required(row, columns.amount, "amount", line)?;
    let amount = parse_amount(raw_amount).ok_or_else(|| ParseError::UnparseableAmount {
        line,
        value: raw_amount.to_string(),
    })?;
    if amount.is_sign_negative() && !amount.is_zero() {
        return Err(ParseError::NegativeAmount {
            line,
            value: raw_amount.to_string(),
        });
    }

    let raw_date = required(row, columns.date, "date", line)?;
    let issue_date = parse_date(raw_date).ok_or_else(|| ParseError::UnparseableDate {
        line,
        value: raw_date.to_string(),
    })?;

    let currency = match (columns.currency, &options.default_currency) {
        (Some(idx), default) => match row.get(idx).filter(|v| !v.is_empty()) {
            Some(v) => v.to_uppercase(),
            None => default.clone().ok_or_else(|| ParseError::MissingField {
                line,
                field: "currency".to_string(),
            })?,
        },
        (None, Some(default)) => default.clone(),
        (None, None) => {
            return Err(ParseError::MissingField {
                line,
                field: "currency".to_string(),
            })
        }
    };

    let instrument = match columns.instrument {
        Some(idx) => match row.get(idx).filter(|v| !v.is_empty()) {
            Some(raw) => InstrumentType::parse(raw).ok_or_else(|| {
                ParseError::UnknownInstrument {
                    line,
                    value: raw.to_string(),
                }
            })?,
            None => options.default_instrument.ok_or_else(|| ParseError::MissingField {
                line,
                field: "instrument_type".to_string(),
            })?,
        },
        None => options.default_instrument.ok_or_else(|| ParseError::MissingField {
            line,
            field: "instrument_type".to_string(),
        })?,
    };

    Ok(TransactionRecord {
        issuer_name,
        amount,
        currency,
        issue_date,
        instrument,
        use_of_proceeds: optional(row, columns.proceeds),
        issuer_country: optional(row, columns.country).map(|c| c.to_uppercase()),
        isin: optional(row, columns.isin),
        source_file: source.to_string(),
        line_number: line,
    })
}

fn required<'a>(
    row: &'a StringRecord,
    idx: usize,
    name: &str,
    line: usize,
) -> Result<&'a str, ParseError> {
    match row.get(idx) {
        Some(value) if !value.is_empty() => Ok(value),
        _ => Err(ParseError::MissingField {
            line,
            field: name.to_string(),
        }),
    }
}

fn optional(row: &StringRecord, idx: Option<usize>) -> Option<String> {
    idx.and_then(|i| row.get(i))
        .filter(|v| !v.is_empty())
        .map(|v| v.to_string())
}

// ============================================================================
// FIELD PARSERS
// ============================================================================

/// Parse an export amount: "1,500,000", "$250.5", "1.5E9", "€ 100"
pub fn parse_amount(raw: &str) -> Option<Decimal> {
    let cleaned: String = raw
        .trim()
        .trim_start_matches(&['$', '€', '£', '¥'][..])
        .chars()
        .filter(|c| !matches!(c, ',' | ' ' | '_'))
        .collect();

    if cleaned.is_empty() {
        return None;
    }

    Decimal::from_str(&cleaned)
        .or_else(|_| Decimal::from_scientific(&cleaned))
        .ok()
}

/// Parse an issue date in any of the accepted export formats
pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();

    for format in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(raw, format) {
            return Some(date);
        }
    }

    // Timestamps such as "2020-01-01 00:00:00" or "2020-01-01T00:00:00Z"
    raw.get(..10)
        .and_then(|prefix| NaiveDate::parse_from_str(prefix, "%Y-%m-%d").ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use std::io::Write;

    fn load(csv: &str) -> LoadReport {
        load_records_from_reader(csv.as_bytes(), "test.csv", &LoadOptions::default()).unwrap()
    }

    #[test]
    fn test_parse_amount_variants() {
        assert_eq!(parse_amount("100"), Some(dec!(100)));
        assert_eq!(parse_amount("1,500,000"), Some(dec!(1500000)));
        assert_eq!(parse_amount("$250.50"), Some(dec!(250.50)));
        assert_eq!(parse_amount("1.5E9"), Some(dec!(1500000000)));
        assert_eq!(parse_amount("€ 100"), Some(dec!(100)));
        assert_eq!(parse_amount("abc"), None);
        assert_eq!(parse_amount(""), None);
    }

    #[test]
    fn test_parse_date_variants() {
        let expected = NaiveDate::from_ymd_opt(2020, 1, 15).unwrap();
        assert_eq!(parse_date("2020-01-15"), Some(expected));
        assert_eq!(parse_date("01/15/2020"), Some(expected));
        assert_eq!(parse_date("15.01.2020"), Some(expected));
        assert_eq!(parse_date("2020-01-15 00:00:00"), Some(expected));
        assert_eq!(parse_date("2020-01-15T08:30:00Z"), Some(expected));
        assert_eq!(parse_date("not a date"), None);
        assert_eq!(parse_date("2020-13-45"), None);
    }

    #[test]
    fn test_load_basic_rows() {
        let report = load(
            "issuer,amount,currency,date,instrument_type,use_of_proceeds\n\
             Bank of China Ltd.,100,USD,2020-01-01,bond,Renewable Energy\n\
             BOC,50,usd,2020-01-01,loan,\n",
        );

        assert_eq!(report.total_rows, 2);
        assert_eq!(report.loaded_count(), 2);
        assert_eq!(report.skipped_count(), 0);

        let first = &report.records[0];
        assert_eq!(first.issuer_name, "Bank of China Ltd.");
        assert_eq!(first.amount, dec!(100));
        assert_eq!(first.instrument, InstrumentType::Bond);
        assert_eq!(first.use_of_proceeds.as_deref(), Some("Renewable Energy"));
        assert_eq!(first.line_number, 2);

        let second = &report.records[1];
        assert_eq!(second.currency, "USD");
        assert_eq!(second.instrument, InstrumentType::Loan);
        assert_eq!(second.use_of_proceeds, None);
        assert_eq!(second.line_number, 3);
    }

    #[test]
    fn test_unparseable_amount_is_skipped_and_counted() {
        let report = load(
            "issuer,amount,currency,date,instrument_type\n\
             HSBC,100,USD,2021-05-01,bond\n\
             HSBC,n/a,USD,2021-05-01,bond\n\
             HSBC,200,USD,2021-06-01,bond\n",
        );

        assert_eq!(report.loaded_count(), 2);
        assert_eq!(report.skipped_count(), 1);
        assert_eq!(
            report.skipped[0],
            ParseError::UnparseableAmount {
                line: 3,
                value: "n/a".to_string()
            }
        );
        assert!(report.records.iter().all(|r| r.amount != Decimal::ZERO));
    }

    #[test]
    fn test_row_errors_do_not_stop_the_load() {
        let report = load(
            "issuer,amount,currency,date,instrument_type\n\
             Citi,-5,USD,2021-01-01,bond\n\
             Citi,10,USD,yesterday,bond\n\
             Citi,10,USD,2021-01-01,equity\n\
             ,10,USD,2021-01-01,bond\n\
             Citi,10\n\
             Citi,10,USD,2021-01-01,bond\n",
        );

        assert_eq!(report.total_rows, 6);
        assert_eq!(report.loaded_count(), 1);
        assert_eq!(report.skipped_count(), 5);
        assert!(matches!(report.skipped[0], ParseError::NegativeAmount { line: 2, .. }));
        assert!(matches!(report.skipped[1], ParseError::UnparseableDate { line: 3, .. }));
        assert!(matches!(report.skipped[2], ParseError::UnknownInstrument { line: 4, .. }));
        assert!(matches!(report.skipped[3], ParseError::MissingField { line: 5, .. }));
        assert!(matches!(report.skipped[4], ParseError::MissingField { line: 6, .. }));
    }

    #[test]
    fn test_missing_required_column_is_fatal() {
        let result = load_records_from_reader(
            "issuer,currency,date,instrument_type\nHSBC,USD,2021-01-01,bond\n".as_bytes(),
            "no_amount.csv",
            &LoadOptions::default(),
        );

        match result {
            Err(PipelineError::MissingColumn { column, .. }) => assert_eq!(column, "amount"),
            other => panic!("expected MissingColumn, got {:?}", other),
        }
    }

    #[test]
    fn test_refinitiv_headers_with_defaults() {
        let options = LoadOptions::default()
            .with_default_instrument(InstrumentType::Bond)
            .with_default_currency("usd");
        let csv = "ISIN,IssuerCommonName,IssuerCountry,IssueDate,FaceIssuedTotal\n\
                   XS0001,Industrial and Commercial Bank of China Ltd,cn,2019-04-01 00:00:00,1.5E9\n";

        let report = load_records_from_reader(csv.as_bytes(), "GREEN_BONDS_RAW_DATA.csv", &options)
            .unwrap();

        assert_eq!(report.loaded_count(), 1);
        let record = &report.records[0];
        assert_eq!(record.instrument, InstrumentType::Bond);
        assert_eq!(record.currency, "USD");
        assert_eq!(record.amount, dec!(1500000000));
        assert_eq!(record.issuer_country.as_deref(), Some("CN"));
        assert_eq!(record.isin.as_deref(), Some("XS0001"));
    }

    #[test]
    fn test_missing_instrument_column_without_default_is_fatal() {
        let result = load_records_from_reader(
            "issuer,amount,currency,date\nHSBC,1,USD,2021-01-01\n".as_bytes(),
            "x.csv",
            &LoadOptions::default(),
        );
        assert!(matches!(result, Err(PipelineError::MissingColumn { .. })));
    }

    #[test]
    fn test_duplicates_are_counted_not_dropped() {
        let report = load(
            "issuer,amount,currency,date,instrument_type\n\
             HSBC,100,USD,2021-05-01,bond\n\
             HSBC,100.00,USD,2021-05-01,bond\n",
        );
        assert_eq!(report.loaded_count(), 2);
        assert_eq!(report.duplicate_count, 1);
    }

    #[test]
    fn test_load_records_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "issuer,amount,currency,date,instrument_type").unwrap();
        writeln!(file, "\"JPMorgan Chase & Co.\",\"1,000\",USD,2022-02-02,bond").unwrap();

        let report = load_records(file.path(), &LoadOptions::default()).unwrap();
        assert_eq!(report.loaded_count(), 1);
        assert_eq!(report.records[0].issuer_name, "JPMorgan Chase & Co.");
        assert_eq!(report.records[0].amount, dec!(1000));
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let result = load_records(Path::new("/definitely/not/here.csv"), &LoadOptions::default());
        assert!(matches!(result, Err(PipelineError::Io { .. })));
    }
}
