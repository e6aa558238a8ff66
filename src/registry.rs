use std::collections::btree_map::{self, BTreeMap};
use std::fmt;

use tracing::debug;

use crate::parser::fields::ExtractedValues;

/// Stored in place of any fact that was not found.
pub const NOT_AVAILABLE: &str = "not available";

/// Timestamp layout for `last_updated`.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProductRecord {
    pub name: String,
    pub calories: String,
    pub protein: String,
    pub carbs: String,
    pub fat: String,
    pub serving_size: String,
    pub last_updated: String,
    pub source_url: String,
}

impl ProductRecord {
    pub fn new(name: &str, values: &ExtractedValues, source_url: &str, stamped_at: &str) -> Self {
        let or_na = |v: &Option<String>| v.clone().unwrap_or_else(|| NOT_AVAILABLE.to_string());
        ProductRecord {
            name: name.to_string(),
            calories: or_na(&values.calories),
            protein: or_na(&values.protein),
            carbs: or_na(&values.carbs),
            fat: or_na(&values.fat),
            serving_size: or_na(&values.serving_size),
            last_updated: stamped_at.to_string(),
            source_url: source_url.to_string(),
        }
    }

    pub fn signature(&self) -> Signature {
        Signature::from_parts(
            stored_value(&self.calories),
            stored_value(&self.protein),
            stored_value(&self.carbs),
            stored_value(&self.fat),
        )
    }

    /// Number of the four numeric facts that are known.
    pub fn known_facts(&self) -> usize {
        [&self.calories, &self.protein, &self.carbs, &self.fat]
            .into_iter()
            .filter(|v| stored_value(v).is_some())
            .count()
    }

    pub fn is_variant(&self) -> bool {
        split_variant(&self.name).is_some()
    }
}

/// Older files wrote "N/A"; empty cells come from hand edits.
fn stored_value(v: &str) -> Option<&str> {
    match v.trim() {
        "" | NOT_AVAILABLE | "N/A" | "NA" => None,
        other => Some(other),
    }
}

/// Equality key over the four numeric facts.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Signature(String);

impl Signature {
    fn from_parts(cal: Option<&str>, p: Option<&str>, c: Option<&str>, f: Option<&str>) -> Self {
        let na = |v: Option<&str>| v.unwrap_or("NA").to_string();
        Signature(format!("cal{}_p{}_c{}_f{}", na(cal), na(p), na(c), na(f)))
    }

    pub fn of(values: &ExtractedValues) -> Self {
        Signature::from_parts(
            values.calories.as_deref(),
            values.protein.as_deref(),
            values.carbs.as_deref(),
            values.fat.as_deref(),
        )
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

pub fn variant_name(base: &str, n: usize) -> String {
    format!("{} (Variant {})", base, n)
}

/// `"Bar (Variant 2)"` -> `("Bar", 2)`.
pub fn split_variant(name: &str) -> Option<(&str, usize)> {
    let rest = name.strip_suffix(')')?;
    let open = rest.rfind(" (Variant ")?;
    let n = rest[open + " (Variant ".len()..].parse().ok()?;
    Some((&rest[..open], n))
}

pub fn now_stamp() -> String {
    chrono::Local::now().format(TIMESTAMP_FORMAT).to_string()
}

/// Product name -> record. Owned by the caller and passed into each page run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Registry {
    products: BTreeMap<String, ProductRecord>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.products.len()
    }

    pub fn is_empty(&self) -> bool {
        self.products.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&ProductRecord> {
        self.products.get(name)
    }

    /// Insert a record under its own name, replacing any previous entry.
    pub fn insert(&mut self, record: ProductRecord) {
        self.products.insert(record.name.clone(), record);
    }

    pub fn iter(&self) -> btree_map::Values<'_, String, ProductRecord> {
        self.products.values()
    }

    /// Upsert `values` under `base_name` or one of its variant slots and
    /// return the name that was written.
    pub fn reconcile(&mut self, base_name: &str, values: &ExtractedValues, source_url: &str) -> String {
        self.reconcile_at(base_name, values, source_url, &now_stamp())
    }

    pub fn reconcile_at(
        &mut self,
        base_name: &str,
        values: &ExtractedValues,
        source_url: &str,
        stamped_at: &str,
    ) -> String {
        let effective = self.resolve_slot(base_name, &Signature::of(values));
        self.insert(ProductRecord::new(&effective, values, source_url, stamped_at));
        effective
    }

    fn resolve_slot(&self, base_name: &str, sig: &Signature) -> String {
        let existing = match self.products.get(base_name) {
            None => return base_name.to_string(),
            Some(r) => r,
        };
        if existing.signature() == *sig {
            return base_name.to_string();
        }

        // First matching slot wins, even if later slots share the signature.
        let mut n = 1;
        loop {
            let candidate = variant_name(base_name, n);
            match self.products.get(&candidate) {
                Some(r) if r.signature() == *sig => {
                    debug!(product = %candidate, "matched existing variant");
                    return candidate;
                }
                Some(_) => n += 1,
                None => {
                    debug!(product = %candidate, signature = %sig, "allocating variant");
                    return candidate;
                }
            }
        }
    }
}

impl<'a> IntoIterator for &'a Registry {
    type Item = &'a ProductRecord;
    type IntoIter = btree_map::Values<'a, String, ProductRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl FromIterator<ProductRecord> for Registry {
    fn from_iter<I: IntoIterator<Item = ProductRecord>>(iter: I) -> Self {
        let mut registry = Registry::new();
        for record in iter {
            registry.insert(record);
        }
        registry
    }
}
