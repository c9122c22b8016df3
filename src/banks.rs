//! Static bank identity table.
//!
//! Loaded once at pipeline construction and read-only thereafter. Detection
//! is a case-insensitive substring match over the full extracted text; an
//! unmatched document yields `None`, never an error.

/// Built-in bank name variants. Keywords are matched lowercase.
const BUILTIN_BANKS: &[(&str, &[&str])] = &[
    ("Chase", &["jpmorgan chase", "chase bank", "chase.com"]),
    (
        "Bank of America",
        &["bank of america", "bankofamerica.com", "bofa"],
    ),
    ("Wells Fargo", &["wells fargo", "wellsfargo.com"]),
    ("Citibank", &["citibank", "citi.com", "citigroup"]),
    ("Capital One", &["capital one", "capitalone.com"]),
    ("U.S. Bank", &["u.s. bank", "us bank", "usbank.com"]),
    ("PNC Bank", &["pnc bank", "pnc.com"]),
    ("TD Bank", &["td bank", "tdbank.com", "toronto-dominion"]),
    ("Truist", &["truist", "bb&t", "suntrust"]),
    ("Ally Bank", &["ally bank", "ally.com"]),
    ("HSBC", &["hsbc"]),
    ("Barclays", &["barclays"]),
    ("Lloyds", &["lloyds bank", "lloyds tsb"]),
    ("NatWest", &["natwest", "national westminster"]),
    ("Santander", &["santander"]),
    ("Monzo", &["monzo"]),
    ("Starling", &["starling bank"]),
    ("Revolut", &["revolut"]),
];

/// A bank name plus the keyword variants that identify it.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct BankEntry {
    pub name: String,
    pub keywords: Vec<String>,
}

/// Lookup table mapping keyword variants to canonical bank names.
#[derive(Debug, Clone)]
pub struct BankTable {
    entries: Vec<BankEntry>,
}

impl BankTable {
    /// Build the table from the built-in list plus caller-supplied extras.
    pub fn with_extras(extras: &[BankEntry]) -> Self {
        let mut entries: Vec<BankEntry> = BUILTIN_BANKS
            .iter()
            .map(|(name, keywords)| BankEntry {
                name: (*name).to_string(),
                keywords: keywords.iter().map(|k| (*k).to_string()).collect(),
            })
            .collect();
        entries.extend(extras.iter().cloned());
        Self { entries }
    }

    /// Detect the issuing bank from statement text.
    pub fn detect(&self, text: &str) -> Option<String> {
        let haystack = text.to_lowercase();
        for entry in &self.entries {
            for keyword in &entry.keywords {
                if haystack.contains(&keyword.to_lowercase()) {
                    return Some(entry.name.clone());
                }
            }
        }
        None
    }
}

impl Default for BankTable {
    fn default() -> Self {
        Self::with_extras(&[])
    }
}
