//! Log-source classification by ordered signature matching.

use regex::Regex;

use crate::model::Category;

/// Signatures in priority order. The first category with a matching pattern wins.
const SIGNATURES: &[(Category, &[&str])] = &[
    (
        Category::Hdfs,
        &[
            r"\bblk_-?\d+",
            r"\b(NameNode|DataNode|FSNamesystem|PacketResponder)\b",
            r"org\.apache\.hadoop\.hdfs",
            r"(?i)\bhdfs://",
        ],
    ),
    (
        Category::Security,
        &[
            r"\bsshd\[\d+\]",
            r"(?i)\bfailed password for\b",
            r"(?i)\bauthentication failure\b",
            r"(?i)\binvalid user\b",
            r"\bpam_unix\(",
            r"\bsudo:\s",
            r"(?i)\bunauthorized access\b",
        ],
    ),
    (
        Category::Application,
        &[
            r"\b(ERROR|FATAL|CRITICAL)\b",
            r"\b[A-Z][A-Za-z0-9]*(Exception|Error):",
            r"Traceback \(most recent call last\)",
            r"panicked at",
            r"^\s+at [\w.$]+\(",
        ],
    ),
];

struct Signature {
    category: Category,
    patterns: Vec<Regex>,
}

/// Compiled signature table.
pub struct Categorizer {
    signatures: Vec<Signature>,
}

impl Categorizer {
    pub fn new() -> Result<Self, regex::Error> {
        let signatures = SIGNATURES
            .iter()
            .map(|(category, patterns)| {
                let patterns = patterns
                    .iter()
                    .map(|p| Regex::new(&format!("(?m){}", p)))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Signature {
                    category: *category,
                    patterns,
                })
            })
            .collect::<Result<Vec<_>, regex::Error>>()?;

        Ok(Self { signatures })
    }

    /// Classifies a text sample. Blank input is `Unknown`; input matching no
    /// signature is `Generic`.
    pub fn categorize(&self, sample: &str) -> Category {
        if sample.trim().is_empty() {
            return Category::Unknown;
        }

        self.signatures
            .iter()
            .find(|signature| signature.patterns.iter().any(|p| p.is_match(sample)))
            .map(|signature| signature.category)
            .unwrap_or(Category::Generic)
    }
}
