// 🌱 greenpanel - green finance panel CLI
//
//   greenpanel run --bonds bonds.csv --loans loans.csv --fx fx.csv --out results
//   greenpanel run --config panel.json
//   greenpanel check --config panel.json
//   greenpanel resolve "Bank of China Ltd."

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use green_finance_panel::config::{PipelineConfig, SourceConfig};
use green_finance_panel::{
    check, run, BankRegistry, Granularity, InstrumentType, ReferenceData,
};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "greenpanel")]
#[command(about = "Green finance ETL: bank portfolios, scores and panel statistics", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load, aggregate, score and export results
    Run(SourceArgs),

    /// Load and resolve only; report data quality and unresolved issuers
    Check(SourceArgs),

    /// Show which bank an issuer name resolves to
    Resolve {
        /// Issuer name as it appears in an export
        name: String,

        /// Reference JSON (built-in tables when omitted)
        #[arg(long)]
        reference: Option<PathBuf>,
    },
}

#[derive(Args)]
struct SourceArgs {
    /// JSON config file; flags below override it
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Export with an instrument column
    #[arg(short, long)]
    source: Vec<PathBuf>,

    /// Bond export without an instrument column
    #[arg(long)]
    bonds: Vec<PathBuf>,

    /// Loan export without an instrument column
    #[arg(long)]
    loans: Vec<PathBuf>,

    /// FX rates CSV (currency,date,rate)
    #[arg(long)]
    fx: Option<PathBuf>,

    /// Reference JSON (banks, fundamentals, mechanisms)
    #[arg(long)]
    reference: Option<PathBuf>,

    /// Output directory
    #[arg(short, long)]
    out: Option<PathBuf>,

    /// Aggregation period: year | quarter
    #[arg(short, long)]
    granularity: Option<Granularity>,

    /// Skip SVG figures
    #[arg(long, default_value = "false")]
    no_charts: bool,
}

impl SourceArgs {
    fn into_config(self) -> Result<PipelineConfig> {
        let mut config = match &self.config {
            Some(path) => PipelineConfig::from_file(path)
                .with_context(|| format!("loading config {}", path.display()))?,
            None => PipelineConfig::default(),
        };

        config
            .sources
            .extend(self.source.into_iter().map(SourceConfig::new));
        config.sources.extend(
            self.bonds
                .into_iter()
                .map(|p| SourceConfig::new(p).with_default_instrument(InstrumentType::Bond)),
        );
        config.sources.extend(
            self.loans
                .into_iter()
                .map(|p| SourceConfig::new(p).with_default_instrument(InstrumentType::Loan)),
        );

        if let Some(fx) = self.fx {
            config.fx_rates = Some(fx);
        }
        if let Some(reference) = self.reference {
            config.reference = Some(reference);
        }
        if let Some(out) = self.out {
            config.output_dir = out;
        }
        if let Some(granularity) = self.granularity {
            config.granularity = granularity;
        }
        if self.no_charts {
            config.render_charts = false;
        }

        config.validate().context("invalid configuration")?;
        Ok(config)
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run(args) => run_pipeline(args.into_config()?),
        Commands::Check(args) => run_check(args.into_config()?),
        Commands::Resolve { name, reference } => run_resolve(&name, reference),
    }
}

fn run_pipeline(config: PipelineConfig) -> Result<()> {
    println!("🌱 Green finance panel");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let report = run(&config).context("pipeline run failed")?;

    println!("\n📂 Sources");
    for source in &report.sources {
        println!("  {}", source);
    }
    println!("\n📊 {}", report.summary());
    println!("🔍 {}", report.quality.summary());
    println!("🔐 Panel digest: {}", report.panel_digest);

    println!("\n💾 Wrote {} files", report.files_written.len());
    for path in &report.files_written {
        println!("  {}", path.display());
    }
    Ok(())
}

fn run_check(config: PipelineConfig) -> Result<()> {
    let report = check(&config).context("check failed")?;

    println!("📂 Loaded");
    for line in &report.loads {
        println!("  {}", line);
    }
    println!("\n🔍 {}", report.quality.summary());
    for (rule, count) in &report.quality.rule_failures {
        println!("  {:<20} {}", rule, count);
    }

    if report.unresolved.is_empty() {
        println!("\n✅ Every issuer resolved to a bank");
    } else {
        println!("\n⚠️  {} unresolved issuers", report.unresolved.len());
        for (issuer, count) in &report.unresolved {
            println!("  {:<40} {}", issuer, count);
        }
    }
    Ok(())
}

fn run_resolve(name: &str, reference: Option<PathBuf>) -> Result<()> {
    let registry: BankRegistry = match reference {
        Some(path) => ReferenceData::from_file(&path)
            .with_context(|| format!("loading reference {}", path.display()))?
            .registry(),
        None => ReferenceData::thesis_defaults().registry(),
    };

    match registry.resolve_match(name) {
        Some(m) => println!(
            "✓ '{}' → {} ({}) via alias '{}'",
            name, m.bank.canonical_name, m.bank.country, m.alias
        ),
        None => println!("✗ '{}' matches no bank", name),
    }
    Ok(())
}
