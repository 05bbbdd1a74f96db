// ⚠️ Error Taxonomy
// Row-level errors are recovered (skip + count + log), structural errors abort the run

use std::path::PathBuf;
use thiserror::Error;

// ============================================================================
// RECOVERABLE: ROW LEVEL
// ============================================================================

/// A single export row that could not become a `TransactionRecord`.
///
/// The loader skips the row, keeps the error in its report and continues.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("line {line}: required field '{field}' is empty")]
    MissingField { line: usize, field: String },

    #[error("line {line}: unparseable amount '{value}'")]
    UnparseableAmount { line: usize, value: String },

    #[error("line {line}: negative amount '{value}'")]
    NegativeAmount { line: usize, value: String },

    #[error("line {line}: unparseable date '{value}'")]
    UnparseableDate { line: usize, value: String },

    #[error("line {line}: unknown instrument type '{value}'")]
    UnknownInstrument { line: usize, value: String },

    #[error("line {line}: malformed row: {reason}")]
    MalformedRow { line: usize, reason: String },
}

impl ParseError {
    /// Line in the source file (1-indexed, header is line 1)
    pub fn line(&self) -> usize {
        match self {
            ParseError::MissingField { line, .. }
            | ParseError::UnparseableAmount { line, .. }
            | ParseError::NegativeAmount { line, .. }
            | ParseError::UnparseableDate { line, .. }
            | ParseError::UnknownInstrument { line, .. }
            | ParseError::MalformedRow { line, .. } => *line,
        }
    }
}

/// No FX rate available to bring a record into the base currency.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConversionError {
    #[error("no {currency}->{base} rate for period {period}")]
    MissingRate {
        currency: String,
        base: String,
        period: String,
    },

    #[error("{amount} {currency} overflows the base-currency total for period {period}")]
    Overflow {
        amount: String,
        currency: String,
        period: String,
    },
}

/// Score input rejected; aborts that one score computation only.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("{bank} ({period}): {component} = {value} is outside [{min}, {max}]")]
    OutOfRange {
        bank: String,
        period: String,
        component: String,
        value: f64,
        min: f64,
        max: f64,
    },

    #[error("{bank} ({period}): missing input '{field}'")]
    MissingInput {
        bank: String,
        period: String,
        field: String,
    },
}

// ============================================================================
// FATAL: STRUCTURAL
// ============================================================================

/// Errors that stop the run and are reported to the invoker.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{path}: required column '{column}' not found in header")]
    MissingColumn { path: PathBuf, column: String },

    #[error("{path}: CSV error: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("{path}: invalid JSON: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid reference data: {reason}")]
    Reference { reason: String },
}

impl PipelineError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        PipelineError::Io {
            path: path.into(),
            source,
        }
    }

    pub fn csv(path: impl Into<PathBuf>, source: csv::Error) -> Self {
        PipelineError::Csv {
            path: path.into(),
            source,
        }
    }

    pub fn reference(reason: impl Into<String>) -> Self {
        PipelineError::Reference {
            reason: reason.into(),
        }
    }
}

pub type PipelineResult<T> = Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_error_line() {
        let err = ParseError::UnparseableAmount {
            line: 7,
            value: "abc".to_string(),
        };
        assert_eq!(err.line(), 7);
        assert_eq!(err.to_string(), "line 7: unparseable amount 'abc'");
    }

    #[test]
    fn test_validation_error_names_bank_and_period() {
        let err = ValidationError::OutOfRange {
            bank: "HSBC".to_string(),
            period: "2021".to_string(),
            component: "kpi_achievement".to_string(),
            value: 1.4,
            min: 0.0,
            max: 1.0,
        };
        let msg = err.to_string();
        assert!(msg.contains("HSBC"));
        assert!(msg.contains("2021"));
        assert!(msg.contains("kpi_achievement"));
    }

    #[test]
    fn test_missing_column_message() {
        let err = PipelineError::MissingColumn {
            path: PathBuf::from("bonds.csv"),
            column: "amount".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "bonds.csv: required column 'amount' not found in header"
        );
    }
}
