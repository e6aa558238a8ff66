use std::sync::LazyLock;

use regex::Regex;

use super::patterns::{FieldKind, NutritionPatternSet};

static NUMBER_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\d+(?:\.\d+)?").unwrap());
static SERVING_LABEL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(?:serving\s+size|per\s+serving|portion\s+size)[\s:]+").unwrap()
});

/// Nutritional fields found on one line.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractedValues {
    pub calories: Option<String>,
    pub protein: Option<String>,
    pub carbs: Option<String>,
    pub fat: Option<String>,
    pub serving_size: Option<String>,
}

impl ExtractedValues {
    pub fn is_empty(&self) -> bool {
        self.calories.is_none()
            && self.protein.is_none()
            && self.carbs.is_none()
            && self.fat.is_none()
            && self.serving_size.is_none()
    }

    fn slot(&mut self, kind: FieldKind) -> &mut Option<String> {
        match kind {
            FieldKind::Calories => &mut self.calories,
            FieldKind::Protein => &mut self.protein,
            FieldKind::Carbs => &mut self.carbs,
            FieldKind::Fat => &mut self.fat,
            FieldKind::ServingSize => &mut self.serving_size,
        }
    }

    /// Overlay the fields present in `newer`; absent fields keep their value.
    pub fn merge(&mut self, newer: ExtractedValues) {
        let ExtractedValues {
            calories,
            protein,
            carbs,
            fat,
            serving_size,
        } = newer;
        for (kind, value) in [
            (FieldKind::Calories, calories),
            (FieldKind::Protein, protein),
            (FieldKind::Carbs, carbs),
            (FieldKind::Fat, fat),
            (FieldKind::ServingSize, serving_size),
        ] {
            if value.is_some() {
                *self.slot(kind) = value;
            }
        }
    }
}

/// First number inside the span of the first matching pattern.
pub fn extract_number(line: &str, patterns: &[Regex]) -> Option<String> {
    if line.is_empty() {
        return None;
    }
    let text = line.to_lowercase();
    let span = patterns.iter().find_map(|re| re.find(&text))?;
    NUMBER_RE.find(span.as_str()).map(|m| m.as_str().to_string())
}

/// Matched span of the first matching pattern, label phrase removed.
pub fn extract_serving(line: &str, patterns: &[Regex]) -> Option<String> {
    if line.is_empty() {
        return None;
    }
    let text = line.to_lowercase();
    let span = patterns.iter().find_map(|re| re.find(&text))?;
    let value = SERVING_LABEL_RE.replace(span.as_str(), "");
    let value = value.trim();
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

/// Run every field kind over a single line.
pub fn extract_line(line: &str, set: &NutritionPatternSet) -> ExtractedValues {
    let mut values = ExtractedValues::default();
    for kind in FieldKind::ALL {
        let patterns = set.get(kind);
        *values.slot(kind) = if kind.is_numeric() {
            extract_number(line, patterns)
        } else {
            extract_serving(line, patterns)
        };
    }
    values
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set() -> NutritionPatternSet {
        NutritionPatternSet::builtin().unwrap()
    }

    fn calories(line: &str) -> Option<String> {
        extract_number(line, set().get(FieldKind::Calories))
    }

    #[test]
    fn calorie_forms() {
        for line in [
            "220 calories",
            "Calories: 220",
            "Energy (kcal): 220",
            "CALORIES 220",
            "220kcal per bar",
            "Energy: 220 kcal",
        ] {
            assert_eq!(calories(line).as_deref(), Some("220"), "line: {line}");
        }
    }

    #[test]
    fn macros_with_decimals() {
        let v = extract_line("Protein 12.5g, Total Fat 3.2 g, Carbohydrates: 41g", &set());
        assert_eq!(v.protein.as_deref(), Some("12.5"));
        assert_eq!(v.fat.as_deref(), Some("3.2"));
        assert_eq!(v.carbs.as_deref(), Some("41"));
        assert_eq!(v.calories, None);
    }

    #[test]
    fn combined_line() {
        let v = extract_line("220 calories, 5g protein", &set());
        assert_eq!(v.calories.as_deref(), Some("220"));
        assert_eq!(v.protein.as_deref(), Some("5"));
        assert_eq!(v.carbs, None);
        assert_eq!(v.fat, None);
    }

    #[test]
    fn serving_size_label_stripped() {
        let v = extract_line("Serving Size: 1 bar (40g)", &set());
        assert_eq!(v.serving_size.as_deref(), Some("1 bar (40g)"));

        let v = extract_line("Per serving: 2 cookies, 180 calories", &set());
        assert_eq!(v.serving_size.as_deref(), Some("2 cookies"));
        assert_eq!(v.calories.as_deref(), Some("180"));
    }

    #[test]
    fn serving_size_is_case_folded() {
        let v = extract_line("Portion Size  3 Pieces", &set());
        assert_eq!(v.serving_size.as_deref(), Some("3 pieces"));
    }

    #[test]
    fn no_signal_lines() {
        for line in ["Crunchy Granola", "Add to cart", "", "Free shipping on orders"] {
            assert!(extract_line(line, &set()).is_empty(), "line: {line}");
        }
    }

    #[test]
    fn first_pattern_wins() {
        // Pattern 1 ("<n> calories") is tried before pattern 2 ("calories <n>").
        assert_eq!(calories("90 calories, calories 300").as_deref(), Some("90"));
    }

    #[test]
    fn matching_span_without_number_is_absent() {
        let only_label = vec![Regex::new("(?i)calories").unwrap()];
        assert_eq!(extract_number("Calories: 220", &only_label), None);
    }

    #[test]
    fn merge_keeps_absent_fields() {
        let mut acc = extract_line("Calories: 200", &set());
        acc.merge(extract_line("Protein: 10g", &set()));
        acc.merge(extract_line("Calories: 210", &set()));
        assert_eq!(acc.calories.as_deref(), Some("210"));
        assert_eq!(acc.protein.as_deref(), Some("10"));
        assert_eq!(acc.fat, None);
    }
}
