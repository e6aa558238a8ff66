use std::collections::HashMap;
use std::path::Path;

use regex::{Regex, RegexBuilder};
use thiserror::Error;

/// Nutritional field kinds, in extraction order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldKind {
    Calories,
    Protein,
    Carbs,
    Fat,
    ServingSize,
}

impl FieldKind {
    pub const ALL: [FieldKind; 5] = [
        FieldKind::Calories,
        FieldKind::Protein,
        FieldKind::Carbs,
        FieldKind::Fat,
        FieldKind::ServingSize,
    ];

    pub fn key(self) -> &'static str {
        match self {
            FieldKind::Calories => "calories",
            FieldKind::Protein => "protein",
            FieldKind::Carbs => "carbs",
            FieldKind::Fat => "fat",
            FieldKind::ServingSize => "serving_size",
        }
    }

    pub fn from_key(key: &str) -> Option<FieldKind> {
        FieldKind::ALL.into_iter().find(|k| k.key() == key)
    }

    pub fn is_numeric(self) -> bool {
        !matches!(self, FieldKind::ServingSize)
    }
}

const CALORIES: &[&str] = &[
    r"\d+\s*(?:calories|cals?|kcals?|cal\b)",
    r"(?:calories|cals?|kcals?|cal\b)[\s:]+\d+",
    r"energy[\s:]+\d+\s*(?:kcal|cal)",
    r"energy\s*\(kcal\)[\s:]+\d+",
];

const PROTEIN: &[&str] = &[
    r"\d+(?:\.\d+)?\s*(?:g\s+protein|g\s+prot|protein|prot)(?:\s*g)?",
    r"(?:protein|prot)[\s:]+\d+(?:\.\d+)?\s*g?",
    r"protein\s*content[\s:]+\d+(?:\.\d+)?\s*g?",
];

const CARBS: &[&str] = &[
    r"\d+(?:\.\d+)?\s*(?:g\s+carbs?|carbs?|carbohydrates?|total\s+carbs?)(?:\s*g)?",
    r"(?:carbs?|carbohydrates?|total\s+carbs?)[\s:]+\d+(?:\.\d+)?\s*g?",
    r"total\s+carbohydrate[\s:]+\d+(?:\.\d+)?\s*g?",
];

const FAT: &[&str] = &[
    r"\d+(?:\.\d+)?\s*(?:g\s+fat|fats?|total\s+fat)(?:\s*g)?",
    r"(?:fats?|total\s+fat)[\s:]+\d+(?:\.\d+)?\s*g?",
    r"total\s+fat\s+content[\s:]+\d+(?:\.\d+)?\s*g?",
];

const SERVING_SIZE: &[&str] = &[
    r"serving\s+size[\s:]+[^,\n]+",
    r"per\s+serving[\s:]+[^,\n]+",
    r"portion\s+size[\s:]+[^,\n]+",
];

#[derive(Debug, Error)]
pub enum PatternError {
    #[error("unknown field kind '{0}' in pattern file")]
    UnknownField(String),
    #[error("invalid pattern for {field}: {source}")]
    Invalid {
        field: &'static str,
        #[source]
        source: regex::Error,
    },
    #[error("failed to read pattern file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed pattern file: {0}")]
    Json(#[from] serde_json::Error),
}

/// Ordered, case-insensitive matchers per field kind. The first pattern
/// that matches a line decides the field for that line.
#[derive(Debug, Clone)]
pub struct NutritionPatternSet {
    patterns: HashMap<FieldKind, Vec<Regex>>,
}

impl NutritionPatternSet {
    /// Built-in pattern table.
    pub fn builtin() -> Result<Self, PatternError> {
        let mut patterns = HashMap::new();
        for kind in FieldKind::ALL {
            patterns.insert(kind, compile(kind, builtin_sources(kind).iter().copied())?);
        }
        Ok(Self { patterns })
    }

    /// Parse a JSON object of `field key -> [pattern, ...]`. Fields not
    /// listed keep their built-in patterns.
    pub fn from_json(json: &str) -> Result<Self, PatternError> {
        let raw: HashMap<String, Vec<String>> = serde_json::from_str(json)?;
        let mut set = Self::builtin()?;
        for (key, sources) in raw {
            let kind = FieldKind::from_key(&key).ok_or(PatternError::UnknownField(key))?;
            let compiled = compile(kind, sources.iter().map(String::as_str))?;
            set.patterns.insert(kind, compiled);
        }
        Ok(set)
    }

    pub fn from_file(path: &Path) -> Result<Self, PatternError> {
        let json = std::fs::read_to_string(path).map_err(|source| PatternError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&json)
    }

    pub fn get(&self, kind: FieldKind) -> &[Regex] {
        self.patterns.get(&kind).map(Vec::as_slice).unwrap_or(&[])
    }
}

fn builtin_sources(kind: FieldKind) -> &'static [&'static str] {
    match kind {
        FieldKind::Calories => CALORIES,
        FieldKind::Protein => PROTEIN,
        FieldKind::Carbs => CARBS,
        FieldKind::Fat => FAT,
        FieldKind::ServingSize => SERVING_SIZE,
    }
}

fn compile<'a>(
    kind: FieldKind,
    sources: impl Iterator<Item = &'a str>,
) -> Result<Vec<Regex>, PatternError> {
    sources
        .map(|src| {
            RegexBuilder::new(src)
                .case_insensitive(true)
                .build()
                .map_err(|source| PatternError::Invalid {
                    field: kind.key(),
                    source,
                })
        })
        .collect()
}
