// Green Finance Panel - Core Library
// Exposes the whole pipeline for the CLI and tests

pub mod error;
pub mod record;
pub mod parser;
pub mod period;
pub mod fx;
pub mod entities;       // Bank identities + alias resolution
pub mod reference;      // Adoption flags, fundamentals, mechanisms
pub mod aggregation;    // Bank × period portfolios + temporal series
pub mod scores;         // Adoption, effectiveness, authenticity, SFI
pub mod statistics;     // Correlation, t-test, fixed effects, variance split
pub mod data_quality;
pub mod charts;
pub mod output;
pub mod config;
pub mod pipeline;

// Re-export commonly used types
pub use error::{ConversionError, ParseError, PipelineError, PipelineResult, ValidationError};
pub use record::{InstrumentType, ProceedsClass, TransactionRecord};
pub use parser::{load_records, load_records_from_reader, LoadOptions, LoadReport};
pub use period::{Granularity, Period};
pub use fx::FxRateTable;
pub use entities::{AdoptionFlags, BankIdentity, BankRegistry, Resolution};
pub use reference::{BankEntry, BankFundamentals, ReferenceData};
pub use aggregation::{
    aggregate, bank_summaries, temporal_evolution,
    BankPortfolio, BankSummary, PortfolioPanel, TemporalEvolution, TemporalWindow,
};
pub use scores::{
    adoption_score, effectiveness_score, implementation_authenticity, score_panel,
    summarize_mechanisms, BankScore, MechanismKind, MechanismSummary,
    RegulatoryMechanismScore, ScoreReport,
};
pub use statistics::{
    fixed_effects_regression, pearson, spearman, two_sample_t_test, variance_decomposition,
    Correlation, Estimate, FixedEffectsFit, TTest, VarianceDecomposition,
};
pub use data_quality::{BatchSummary, DataQualityEngine, QualityReport, Severity};
pub use config::{PipelineConfig, SourceConfig};
pub use pipeline::{analyze, check, run, Analysis, CheckReport, RunReport};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
