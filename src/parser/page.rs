use thiserror::Error;
use tracing::{debug, info};

use super::fields::{extract_line, ExtractedValues};
use super::names::infer_name;
use super::patterns::NutritionPatternSet;
use crate::registry::Registry;
use crate::store::{RegistryStore, StoreError};

#[derive(Debug, Error)]
pub enum PageError {
    #[error("failed to persist registry: {0}")]
    Store(#[from] StoreError),
}

/// Outcome of one page run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageReport {
    /// Data-bearing lines attributed to a product.
    pub touched: usize,
    /// Effective names written, in page order.
    pub products: Vec<String>,
    pub saved: bool,
}

#[derive(Debug)]
enum Attribution {
    NoActiveProduct,
    ActiveProduct { base_name: String, values: ExtractedValues },
}

/// Walk one page's lines and reconcile every carry-over run into `registry`.
pub fn process_lines<S: AsRef<str>>(
    registry: &mut Registry,
    lines: &[S],
    source_url: &str,
    patterns: &NutritionPatternSet,
    window: usize,
) -> PageReport {
    let mut report = PageReport::default();
    let mut state = Attribution::NoActiveProduct;

    for (i, raw) in lines.iter().enumerate() {
        let line = raw.as_ref().trim();
        let found = extract_line(line, patterns);

        if found.is_empty() {
            close(&mut state, registry, source_url, &mut report);
            continue;
        }

        if let Attribution::ActiveProduct { values, .. } = &mut state {
            values.merge(found);
        } else if let Some(base_name) = infer_name(lines, i, window) {
            state = Attribution::ActiveProduct { base_name, values: found };
        } else {
            debug!(line = i, "nutrition data without a plausible product name");
            continue;
        }
        report.touched += 1;
    }
    close(&mut state, registry, source_url, &mut report);

    report
}

fn close(state: &mut Attribution, registry: &mut Registry, source_url: &str, report: &mut PageReport) {
    let Attribution::ActiveProduct { base_name, values } =
        std::mem::replace(state, Attribution::NoActiveProduct)
    else {
        return;
    };
    let name = registry.reconcile(&base_name, &values, source_url);
    info!(
        product = %name,
        calories = ?values.calories,
        protein = ?values.protein,
        carbs = ?values.carbs,
        fat = ?values.fat,
        serving_size = ?values.serving_size,
        "Found/Updated product"
    );
    report.products.push(name);
}

/// Page-level driver: extraction plus persistence of the whole registry.
pub struct PageProcessor<S> {
    patterns: NutritionPatternSet,
    window: usize,
    store: S,
}

impl<S: RegistryStore> PageProcessor<S> {
    pub fn new(patterns: NutritionPatternSet, window: usize, store: S) -> Self {
        Self {
            patterns,
            window,
            store,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Process one page's visible text. The registry is saved only when at
    /// least one line was attributed.
    pub fn run(&self, registry: &mut Registry, text: &str, source_url: &str) -> Result<PageReport, PageError> {
        let lines: Vec<&str> = text.lines().collect();
        let mut report = process_lines(registry, &lines, source_url, &self.patterns, self.window);

        if report.touched == 0 {
            info!(url = source_url, "No nutritional information found on this page");
            return Ok(report);
        }

        info!(url = source_url, touched = report.touched, "Found products on this page");
        self.store.save(registry)?;
        report.saved = true;
        info!(total = registry.len(), "Data saved, total unique products");
        Ok(report)
    }
}
