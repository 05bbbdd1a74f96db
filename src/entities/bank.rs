// 🏦 Bank Entity - Stable identity + alias resolution
//
// "Industrial and Commercial Bank of China Ltd", "ICBC" → one bank identity.
// The registry is built once per run and only read afterwards; it is passed
// explicitly to every stage that needs it.

use crate::record::TransactionRecord;
use crate::reference::ReferenceData;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ============================================================================
// ADOPTION FLAGS
// ============================================================================

/// Voluntary climate frameworks a bank has signed up to
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdoptionFlags {
    #[serde(default)]
    pub sbti: bool,
    #[serde(default)]
    pub nzba: bool,
    #[serde(default)]
    pub tcfd: bool,
    #[serde(default)]
    pub prb: bool,
}

impl AdoptionFlags {
    pub fn new(sbti: bool, nzba: bool, tcfd: bool, prb: bool) -> Self {
        AdoptionFlags {
            sbti,
            nzba,
            tcfd,
            prb,
        }
    }

    pub fn all() -> Self {
        AdoptionFlags::new(true, true, true, true)
    }

    /// Number of frameworks adopted (0-4)
    pub fn count(&self) -> usize {
        [self.sbti, self.nzba, self.tcfd, self.prb]
            .iter()
            .filter(|f| **f)
            .count()
    }
}

// ============================================================================
// BANK IDENTITY
// ============================================================================

/// Canonical bank entity.
///
/// Identity: UUID v5 of the canonical name, so the same name always maps to
/// the same id across runs.
/// Values: canonical name, country, aliases, adoption flags.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BankIdentity {
    pub id: Uuid,

    /// The "official" name used in every output table
    pub canonical_name: String,

    /// ISO 3166-1 alpha-2
    pub country: String,

    /// Alternative names that map to this bank
    /// Example: ["ICBC", "Industrial and Commercial Bank"]
    pub aliases: Vec<String>,

    pub adoption: AdoptionFlags,
}

impl BankIdentity {
    pub fn new(canonical_name: &str, country: &str, adoption: AdoptionFlags) -> Self {
        BankIdentity {
            id: Uuid::new_v5(&Uuid::NAMESPACE_OID, canonical_name.as_bytes()),
            canonical_name: canonical_name.to_string(),
            country: country.trim().to_uppercase(),
            aliases: Vec::new(),
            adoption,
        }
    }

    /// Builder pattern: add an alias
    pub fn with_alias(mut self, alias: &str) -> Self {
        self.add_alias(alias);
        self
    }

    /// Add an alias unless it is already known (compared after normalization)
    pub fn add_alias(&mut self, alias: &str) {
        let normalized = NormalizedName::new(alias);
        if normalized.is_empty() {
            return;
        }
        let known = self
            .all_names()
            .iter()
            .any(|name| NormalizedName::new(name) == normalized);
        if !known {
            self.aliases.push(alias.to_string());
        }
    }

    /// Canonical name + aliases
    pub fn all_names(&self) -> Vec<&str> {
        let mut names = vec![self.canonical_name.as_str()];
        names.extend(self.aliases.iter().map(String::as_str));
        names
    }

    /// Longest alias (or canonical name) matching `name`, with its match length
    pub fn best_match(&self, name: &NormalizedName) -> Option<(&str, usize)> {
        self.all_names()
            .into_iter()
            .filter_map(|alias| {
                let alias_norm = NormalizedName::new(alias);
                if name.contains(&alias_norm) {
                    Some((alias, alias_norm.compact_len()))
                } else {
                    None
                }
            })
            // max_by_key keeps the last max; fold keeps the first on ties
            .fold(None, |best: Option<(&str, usize)>, candidate| match best {
                Some(b) if b.1 >= candidate.1 => Some(b),
                _ => Some(candidate),
            })
    }

    /// Check if a free-text name resolves to this bank
    pub fn matches(&self, name: &str) -> bool {
        self.best_match(&NormalizedName::new(name)).is_some()
    }
}

// ============================================================================
// NAME NORMALIZATION
// ============================================================================

const LEGAL_SUFFIXES: &[&str] = &[
    "co",
    "company",
    "ltd",
    "limited",
    "plc",
    "inc",
    "incorporated",
    "corp",
    "corporation",
    "llc",
    "lp",
    "sa",
    "ag",
    "nv",
    "spa",
    "se",
    "na",
];

/// Issuer name reduced to comparable tokens.
///
/// Case-folded, "." and "'" deleted (so "N.A." → "na", "J.P." → "jp"), every
/// other punctuation mark becomes a separator, trailing legal suffixes dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedName {
    tokens: Vec<String>,
}

impl NormalizedName {
    pub fn new(raw: &str) -> Self {
        let cleaned: String = raw
            .chars()
            .filter(|c| *c != '.' && *c != '\'')
            .map(|c| if c.is_alphanumeric() { c } else { ' ' })
            .flat_map(char::to_lowercase)
            .collect();

        let mut tokens: Vec<String> = cleaned.split_whitespace().map(String::from).collect();

        while tokens.len() > 1 {
            match tokens.last() {
                Some(last) if LEGAL_SUFFIXES.contains(&last.as_str()) => {
                    tokens.pop();
                }
                _ => break,
            }
        }

        NormalizedName { tokens }
    }

    pub fn tokens(&self) -> &[String] {
        &self.tokens
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// Tokens joined without separators ("jp morgan" → "jpmorgan")
    pub fn compact(&self) -> String {
        self.tokens.concat()
    }

    pub fn compact_len(&self) -> usize {
        self.tokens.iter().map(|t| t.chars().count()).sum()
    }

    /// Substring containment on token boundaries.
    ///
    /// True when `alias` occurs as a contiguous run of tokens, or when some
    /// contiguous run of tokens concatenates to the alias's compact form.
    /// "citi" therefore never matches inside "citizens".
    pub fn contains(&self, alias: &NormalizedName) -> bool {
        if alias.is_empty() || self.is_empty() {
            return false;
        }

        if self
            .tokens
            .windows(alias.tokens.len())
            .any(|window| window == alias.tokens.as_slice())
        {
            return true;
        }

        let target = alias.compact();
        for start in 0..self.tokens.len() {
            let mut joined = String::new();
            for token in &self.tokens[start..] {
                joined.push_str(token);
                if joined.len() >= target.len() {
                    break;
                }
            }
            if joined == target {
                return true;
            }
        }

        false
    }
}

// ============================================================================
// BANK REGISTRY
// ============================================================================

/// Outcome of resolving one issuer name
#[derive(Debug, Clone, PartialEq)]
pub struct AliasMatch<'a> {
    pub bank: &'a BankIdentity,
    pub alias: &'a str,
    /// Compact length of the matched alias; longest wins
    pub score: usize,
}

/// Records split by resolution outcome
#[derive(Debug, Default)]
pub struct Resolution<'a> {
    pub resolved: Vec<(&'a TransactionRecord, &'a BankIdentity)>,
    pub unresolved: Vec<&'a TransactionRecord>,
}

impl<'a> Resolution<'a> {
    /// Distinct unresolved issuer names, most frequent first
    pub fn unresolved_issuers(&self) -> Vec<(String, usize)> {
        let mut counts: std::collections::BTreeMap<&str, usize> = std::collections::BTreeMap::new();
        for record in &self.unresolved {
            *counts.entry(record.issuer_name.as_str()).or_default() += 1;
        }
        let mut issuers: Vec<(String, usize)> = counts
            .into_iter()
            .map(|(name, count)| (name.to_string(), count))
            .collect();
        issuers.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        issuers
    }
}

/// Ordered set of known banks. Registration order breaks exact ties.
#[derive(Debug, Clone, Default)]
pub struct BankRegistry {
    banks: Vec<BankIdentity>,
}

impl BankRegistry {
    /// Empty registry
    pub fn new() -> Self {
        BankRegistry { banks: Vec::new() }
    }

    /// Registry with the ten banks of the built-in reference tables
    pub fn with_default_banks() -> Self {
        ReferenceData::thesis_defaults().registry()
    }

    /// Register a bank; a bank with the same id replaces the earlier entry in place
    pub fn register(&mut self, bank: BankIdentity) {
        match self.banks.iter_mut().find(|b| b.id == bank.id) {
            Some(existing) => *existing = bank,
            None => self.banks.push(bank),
        }
    }

    /// Resolve a free-text issuer name, reporting which alias matched
    ///
    /// Longest matching alias wins; on an exact tie the first-registered bank wins.
    pub fn resolve_match(&self, issuer_name: &str) -> Option<AliasMatch<'_>> {
        let name = NormalizedName::new(issuer_name);
        if name.is_empty() {
            return None;
        }

        let mut best: Option<AliasMatch<'_>> = None;
        for bank in &self.banks {
            if let Some((alias, score)) = bank.best_match(&name) {
                let better = match &best {
                    Some(current) => score > current.score,
                    None => true,
                };
                if better {
                    best = Some(AliasMatch { bank, alias, score });
                }
            }
        }
        best
    }

    /// Resolve a free-text issuer name to its bank
    pub fn resolve(&self, issuer_name: &str) -> Option<&BankIdentity> {
        self.resolve_match(issuer_name).map(|m| m.bank)
    }

    /// Split records into resolved pairs and unresolved records, keeping order
    pub fn resolve_all<'a>(&'a self, records: &'a [TransactionRecord]) -> Resolution<'a> {
        let mut resolution = Resolution::default();
        for record in records {
            match self.resolve(&record.issuer_name) {
                Some(bank) => resolution.resolved.push((record, bank)),
                None => resolution.unresolved.push(record),
            }
        }
        resolution
    }

    /// Chinese issuer: exported country is CN, or the issuer resolves to a CN bank
    pub fn is_chinese_issuer(&self, record: &TransactionRecord) -> bool {
        if record.issuer_country.as_deref() == Some("CN") {
            return true;
        }
        self.resolve(&record.issuer_name)
            .map(|bank| bank.country == "CN")
            .unwrap_or(false)
    }

    pub fn find_by_name(&self, canonical_name: &str) -> Option<&BankIdentity> {
        self.banks.iter().find(|b| b.canonical_name == canonical_name)
    }

    pub fn find_by_id(&self, id: &Uuid) -> Option<&BankIdentity> {
        self.banks.iter().find(|b| &b.id == id)
    }

    /// All banks in registration order
    pub fn all_banks(&self) -> &[BankIdentity] {
        &self.banks
    }

    pub fn count(&self) -> usize {
        self.banks.len()
    }

    pub fn by_country(&self, country: &str) -> Vec<&BankIdentity> {
        self.banks.iter().filter(|b| b.country == country).collect()
    }
}

// ============================================================================
// TESTS
// ============================================================================
