// 💱 FX Rate Table - period-end conversion into the base currency
//
// Rates are "units of base per one unit of currency": EUR,2020-12-31,1.10 means
// 1 EUR = 1.10 USD. Multiplication only, so conversions stay exact in Decimal.

use crate::error::{ConversionError, PipelineError, PipelineResult};
use crate::parser::parse_date;
use crate::period::Period;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::io::Read;
use std::path::Path;
use std::str::FromStr;
use tracing::info;

pub const DEFAULT_BASE_CURRENCY: &str = "USD";

#[derive(Debug, Deserialize)]
struct FxRow {
    currency: String,
    date: String,
    rate: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FxRateTable {
    base: String,
    /// currency → rates ordered by date
    rates: BTreeMap<String, BTreeMap<NaiveDate, Decimal>>,
}

impl FxRateTable {
    /// Empty table; only the base currency converts
    pub fn new(base: &str) -> Self {
        FxRateTable {
            base: base.trim().to_uppercase(),
            rates: BTreeMap::new(),
        }
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    /// Add (or overwrite) one rate. Rates must be strictly positive.
    pub fn insert(&mut self, currency: &str, date: NaiveDate, rate: Decimal) -> PipelineResult<()> {
        if rate <= Decimal::ZERO {
            return Err(PipelineError::reference(format!(
                "FX rate for {} on {} must be positive, got {}",
                currency, date, rate
            )));
        }
        self.rates
            .entry(currency.trim().to_uppercase())
            .or_default()
            .insert(date, rate);
        Ok(())
    }

    /// Builder pattern: add a rate, for tests and programmatic tables
    pub fn with_rate(mut self, currency: &str, date: NaiveDate, rate: Decimal) -> PipelineResult<Self> {
        self.insert(currency, date, rate)?;
        Ok(self)
    }

    /// Load `currency,date,rate` rows from a CSV file
    pub fn from_file(path: &Path, base: &str) -> PipelineResult<Self> {
        let file = std::fs::File::open(path).map_err(|e| PipelineError::io(path, e))?;
        let table = Self::from_reader(file, &path.display().to_string(), base)?;
        info!(
            "Loaded {} FX rates for {} currencies from {}",
            table.rate_count(),
            table.currencies().len(),
            path.display()
        );
        Ok(table)
    }

    /// Load `currency,date,rate` rows from any reader.
    ///
    /// The table is reference data, so a bad row is fatal rather than skipped.
    pub fn from_reader<R: Read>(reader: R, source: &str, base: &str) -> PipelineResult<Self> {
        let mut table = FxRateTable::new(base);
        let mut reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_reader(reader);

        for (idx, row) in reader.deserialize::<FxRow>().enumerate() {
            let line = idx + 2;
            let row = row.map_err(|e| PipelineError::csv(source, e))?;
            let date = parse_date(&row.date).ok_or_else(|| {
                PipelineError::reference(format!("{}:{}: bad date '{}'", source, line, row.date))
            })?;
            let rate = Decimal::from_str(&row.rate).map_err(|_| {
                PipelineError::reference(format!("{}:{}: bad rate '{}'", source, line, row.rate))
            })?;
            table.insert(&row.currency, date, rate)?;
        }

        Ok(table)
    }

    pub fn currencies(&self) -> Vec<&str> {
        self.rates.keys().map(String::as_str).collect()
    }

    pub fn rate_count(&self) -> usize {
        self.rates.values().map(BTreeMap::len).sum()
    }

    /// Rate applicable to `period`: the latest rate dated inside the period,
    /// which is the period-end rate whenever one is present.
    pub fn rate_for(&self, currency: &str, period: &Period) -> Result<Decimal, ConversionError> {
        if currency.eq_ignore_ascii_case(&self.base) {
            return Ok(Decimal::ONE);
        }

        self.rates
            .get(&currency.to_uppercase())
            .and_then(|by_date| {
                by_date
                    .range(period.start()..=period.end())
                    .next_back()
                    .map(|(_, rate)| *rate)
            })
            .ok_or_else(|| ConversionError::MissingRate {
                currency: currency.to_string(),
                base: self.base.clone(),
                period: period.to_string(),
            })
    }

    /// Convert `amount` of `currency` into the base currency for `period`
    pub fn convert(
        &self,
        amount: Decimal,
        currency: &str,
        period: &Period,
    ) -> Result<Decimal, ConversionError> {
        let rate = self.rate_for(currency, period)?;
        amount
            .checked_mul(rate)
            .ok_or_else(|| ConversionError::Overflow {
                amount: amount.to_string(),
                currency: currency.to_string(),
                period: period.to_string(),
            })
    }
}

impl Default for FxRateTable {
    fn default() -> Self {
        FxRateTable::new(DEFAULT_BASE_CURRENCY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn test_eur_at_period_end_rate_is_exact() {
        let fx = FxRateTable::default()
            .with_rate("EUR", date("2020-12-31"), dec!(1.10))
            .unwrap();

        let usd = fx.convert(dec!(100), "EUR", &Period::year(2020)).unwrap();
        assert_eq!(usd, dec!(110));
        assert_eq!(usd.to_string(), "110.00");
    }

    #[test]
    fn test_base_currency_converts_at_one() {
        let fx = FxRateTable::default();
        assert_eq!(
            fx.convert(dec!(42.5), "usd", &Period::year(2019)).unwrap(),
            dec!(42.5)
        );
    }

    #[test]
    fn test_latest_rate_within_period_wins() {
        let fx = FxRateTable::default()
            .with_rate("EUR", date("2020-06-30"), dec!(1.12))
            .unwrap()
            .with_rate("EUR", date("2020-12-31"), dec!(1.22))
            .unwrap()
            .with_rate("EUR", date("2021-12-31"), dec!(1.13))
            .unwrap();

        assert_eq!(fx.rate_for("EUR", &Period::year(2020)).unwrap(), dec!(1.22));
        assert_eq!(
            fx.rate_for("EUR", &Period::quarter(2020, 2).unwrap()).unwrap(),
            dec!(1.12)
        );
    }

    #[test]
    fn test_missing_rate_is_conversion_error() {
        let fx = FxRateTable::default()
            .with_rate("EUR", date("2020-12-31"), dec!(1.10))
            .unwrap();

        // Rate outside the period does not leak in
        let err = fx.rate_for("EUR", &Period::year(2021)).unwrap_err();
        assert_eq!(
            err,
            ConversionError::MissingRate {
                currency: "EUR".to_string(),
                base: "USD".to_string(),
                period: "2021".to_string(),
            }
        );
        assert!(fx.rate_for("CNY", &Period::year(2020)).is_err());
    }

    #[test]
    fn test_overflowing_conversion_is_error() {
        let fx = FxRateTable::default()
            .with_rate("IDR", NaiveDate::from_ymd_opt(2020, 6, 30).unwrap(), dec!(1000))
            .unwrap();
        let huge = Decimal::from_str_exact("50000000000000000000000000000").unwrap();
        let result = fx.convert(huge, "IDR", &Period::year(2020));
        assert!(matches!(result, Err(ConversionError::Overflow { .. })));
    }

    #[test]
    fn test_non_positive_rate_rejected() {
        let result = FxRateTable::default().with_rate("EUR", date("2020-12-31"), dec!(0));
        assert!(matches!(result, Err(PipelineError::Reference { .. })));
    }

    #[test]
    fn test_from_reader() {
        let csv = "currency,date,rate\nEUR,2020-12-31,1.22\ncny,12/31/2020,0.153\n";
        let fx = FxRateTable::from_reader(csv.as_bytes(), "fx.csv", "USD").unwrap();

        assert_eq!(fx.rate_count(), 2);
        assert_eq!(fx.currencies(), vec!["CNY", "EUR"]);
        assert_eq!(
            fx.convert(dec!(1000), "CNY", &Period::year(2020)).unwrap(),
            dec!(153)
        );
    }

    #[test]
    fn test_from_reader_rejects_bad_rate() {
        let csv = "currency,date,rate\nEUR,2020-12-31,lots\n";
        let result = FxRateTable::from_reader(csv.as_bytes(), "fx.csv", "USD");
        assert!(matches!(result, Err(PipelineError::Reference { .. })));
    }
}
