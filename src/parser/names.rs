pub const DEFAULT_WINDOW: usize = 5;

/// Guess a product name for the data line at `idx` from nearby text-only
/// lines. Lines before the data line are preferred; the closest one wins.
pub fn infer_name<S: AsRef<str>>(lines: &[S], idx: usize, window: usize) -> Option<String> {
    let idx = idx.min(lines.len());
    let start = idx.saturating_sub(window);

    let before: Vec<&str> = lines[start..idx]
        .iter()
        .map(|l| l.as_ref().trim())
        .filter(|l| is_name_candidate(l))
        .collect();
    if let Some(name) = before.last() {
        return Some(name.to_string());
    }

    let after_start = (idx + 1).min(lines.len());
    let after_end = (idx + 1 + window).min(lines.len());
    lines[after_start..after_end]
        .iter()
        .map(|l| l.as_ref().trim())
        .filter(|l| is_name_candidate(l))
        .last()
        .map(str::to_string)
}

fn is_name_candidate(line: &str) -> bool {
    line.chars().count() > 3 && !line.chars().any(|c| c.is_numeric())
}
