use std::fs;
use std::io::{self, BufWriter, Write};
use std::mem::take;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::registry::{ProductRecord, Registry, NOT_AVAILABLE};

pub const COLUMNS: [&str; 8] = [
    "name",
    "calories",
    "protein",
    "carbs",
    "fat",
    "serving_size",
    "last_updated",
    "source_url",
];

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("i/o error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("{path}: missing 'name' column in header")]
    MissingNameColumn { path: String },
}

/// Where the registry lives between runs.
pub trait RegistryStore {
    fn load(&self) -> Result<Registry, StoreError>;
    fn save(&self, registry: &Registry) -> Result<(), StoreError>;
}

/// Registry persisted as a CSV file, rewritten in full on every save.
#[derive(Debug, Clone)]
pub struct CsvStore {
    path: PathBuf,
}

impl CsvStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_err(&self, source: io::Error) -> StoreError {
        StoreError::Io {
            path: self.path.display().to_string(),
            source,
        }
    }
}

impl RegistryStore for CsvStore {
    fn load(&self) -> Result<Registry, StoreError> {
        let text = match fs::read_to_string(&self.path) {
            Ok(t) => t,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "no store file yet");
                return Ok(Registry::new());
            }
            Err(e) => return Err(self.io_err(e)),
        };
        let registry = registry_from_csv(&text).ok_or_else(|| StoreError::MissingNameColumn {
            path: self.path.display().to_string(),
        })?;
        info!(path = %self.path.display(), products = registry.len(), "loaded registry");
        Ok(registry)
    }

    fn save(&self, registry: &Registry) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| self.io_err(e))?;
            }
        }

        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        let write = || -> io::Result<()> {
            let mut w = BufWriter::new(fs::File::create(&tmp)?);
            write_registry(&mut w, registry)?;
            w.flush()?;
            drop(w);
            fs::rename(&tmp, &self.path)
        };
        if let Err(e) = write() {
            let _ = fs::remove_file(&tmp);
            return Err(self.io_err(e));
        }

        info!(path = %self.path.display(), products = registry.len(), "saved registry");
        Ok(())
    }
}

/// Startup load: an unreadable store is reported and replaced by an empty
/// registry.
pub fn load_or_empty<S: RegistryStore + ?Sized>(store: &S) -> Registry {
    match store.load() {
        Ok(r) => r,
        Err(e) => {
            warn!("Error loading existing data: {}", e);
            Registry::new()
        }
    }
}

/// Build a registry from CSV text. `None` when the header has no name column.
pub fn registry_from_csv(text: &str) -> Option<Registry> {
    let mut rows = parse_rows(text).into_iter();
    let header = match rows.next() {
        Some(h) => h,
        None => return Some(Registry::new()),
    };
    let index: Vec<Option<usize>> = COLUMNS
        .iter()
        .map(|col| header.iter().position(|h| h.trim().eq_ignore_ascii_case(col)))
        .collect();
    index[0]?;

    let cell = |row: &[String], col: usize| -> String {
        index[col]
            .and_then(|i| row.get(i))
            .cloned()
            .unwrap_or_else(|| NOT_AVAILABLE.to_string())
    };

    Some(
        rows.filter(|row| index[0].and_then(|i| row.get(i)).is_some_and(|n| !n.is_empty()))
            .map(|row| ProductRecord {
                name: cell(&row, 0),
                calories: cell(&row, 1),
                protein: cell(&row, 2),
                carbs: cell(&row, 3),
                fat: cell(&row, 4),
                serving_size: cell(&row, 5),
                last_updated: cell(&row, 6),
                source_url: cell(&row, 7),
            })
            .collect(),
    )
}

pub fn write_registry<W: Write>(mut w: W, registry: &Registry) -> io::Result<()> {
    write_row(&mut w, &COLUMNS)?;
    for r in registry {
        write_row(
            &mut w,
            &[
                &r.name,
                &r.calories,
                &r.protein,
                &r.carbs,
                &r.fat,
                &r.serving_size,
                &r.last_updated,
                &r.source_url,
            ],
        )?;
    }
    Ok(())
}

/* ---------------- CSV codec ---------------- */

/// Quote- and CRLF-tolerant CSV reader. Blank lines are skipped.
pub fn parse_rows(text: &str) -> Vec<Vec<String>> {
    let mut rows = Vec::new();
    let mut field = String::new();
    let mut row = Vec::new();
    let mut in_quotes = false;
    let mut chars = text.trim_start_matches('\u{feff}').chars().peekable();

    while let Some(ch) = chars.next() {
        match ch {
            '"' if in_quotes => {
                if chars.peek() == Some(&'"') {
                    chars.next();
                    field.push('"');
                } else {
                    in_quotes = false;
                }
            }
            '"' => in_quotes = true,
            ',' if !in_quotes => row.push(take(&mut field)),
            '\n' | '\r' if !in_quotes => {
                if ch == '\r' && chars.peek() == Some(&'\n') {
                    chars.next();
                }
                row.push(take(&mut field));
                if row.len() == 1 && row[0].is_empty() {
                    row.clear();
                } else {
                    rows.push(take(&mut row));
                }
            }
            _ => field.push(ch),
        }
    }

    if !field.is_empty() || !row.is_empty() {
        row.push(field);
        rows.push(row);
    }
    rows
}

fn needs_quotes(field: &str) -> bool {
    field.contains([',', '"', '\n', '\r']) || field.starts_with(' ') || field.ends_with(' ')
}

pub fn write_row<W: Write, S: AsRef<str>>(mut w: W, row: &[S]) -> io::Result<()> {
    for (i, cell) in row.iter().enumerate() {
        if i > 0 {
            w.write_all(b",")?;
        }
        let cell = cell.as_ref();
        if needs_quotes(cell) {
            write!(w, "\"{}\"", cell.replace('"', "\"\""))?;
        } else {
            w.write_all(cell.as_bytes())?;
        }
    }
    w.write_all(b"\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::fields::ExtractedValues;

    fn record(name: &str, cal: Option<&str>, serving: Option<&str>) -> ProductRecord {
        let values = ExtractedValues {
            calories: cal.map(str::to_string),
            protein: Some("10".into()),
            serving_size: serving.map(str::to_string),
            ..Default::default()
        };
        ProductRecord::new(name, &values, "https://shop.example/p?id=1&x=2", "2026-03-01 09:30:00")
    }

    #[test]
    fn missing_file_is_empty_registry() {
        let dir = tempfile::tempdir().unwrap();
        let store = CsvStore::new(dir.path().join("nope.csv"));
        assert!(store.load().unwrap().is_empty());
    }

    #[test]
    fn save_then_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = CsvStore::new(dir.path().join("data").join("nutritional_info.csv"));
        let registry: Registry = [
            record("Protein Bar", Some("200"), None),
            record("Bar, \"Chocolate\"", None, Some("1 bar (40g)")),
            record("Bar (Variant 1)", Some("210"), Some("2 pieces")),
        ]
        .into_iter()
        .collect();

        store.save(&registry).unwrap();
        let loaded = store.load().unwrap();
        assert_eq!(loaded, registry);
        assert_eq!(loaded.get("Bar, \"Chocolate\"").unwrap().calories, NOT_AVAILABLE);
    }

    #[test]
    fn save_overwrites_previous_content() {
        let dir = tempfile::tempdir().unwrap();
        let store = CsvStore::new(dir.path().join("n.csv"));
        let mut registry: Registry = [record("A", Some("1"), None), record("B", Some("2"), None)]
            .into_iter()
            .collect();
        store.save(&registry).unwrap();

        registry = [record("C", Some("3"), None)].into_iter().collect();
        store.save(&registry).unwrap();
        let loaded = store.load().unwrap();
        assert_eq!(loaded.len(), 1);
        assert!(loaded.get("C").is_some());
        assert!(!dir.path().join("n.csv.tmp").exists());
    }

    #[test]
    fn load_keeps_values_verbatim() {
        let text = "name,calories,protein,carbs,fat,serving_size,last_updated,source_url\r\n\
                    Granola,220,5,N/A,N/A,N/A,2024-05-01 12:00:00,https://a\r\n";
        let reg = registry_from_csv(text).unwrap();
        let r = reg.get("Granola").unwrap();
        assert_eq!(r.carbs, "N/A");
        assert_eq!(r.last_updated, "2024-05-01 12:00:00");
    }

    #[test]
    fn load_by_header_name_with_missing_columns() {
        let text = "source_url,name,calories\nhttps://a,Granola,220\n\n";
        let reg = registry_from_csv(text).unwrap();
        let r = reg.get("Granola").unwrap();
        assert_eq!(r.calories, "220");
        assert_eq!(r.source_url, "https://a");
        assert_eq!(r.fat, NOT_AVAILABLE);
    }

    #[test]
    fn header_without_name_is_rejected() {
        assert!(registry_from_csv("calories,fat\n1,2\n").is_none());
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.csv");
        fs::write(&path, "calories,fat\n1,2\n").unwrap();
        let err = CsvStore::new(&path).load().unwrap_err();
        assert!(matches!(err, StoreError::MissingNameColumn { .. }));
    }

    #[test]
    fn unreadable_store_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.csv");
        fs::write(&path, "calories,fat\n1,2\n").unwrap();
        assert!(load_or_empty(&CsvStore::new(&path)).is_empty());

        let good = CsvStore::new(dir.path().join("good.csv"));
        good.save(&[record("Granola", Some("220"), None)].into_iter().collect()).unwrap();
        assert_eq!(load_or_empty(&good).len(), 1);
    }

    #[test]
    fn failed_save_removes_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("taken");
        fs::create_dir(&target).unwrap();
        let store = CsvStore::new(&target);
        let registry: Registry = [record("A", Some("1"), None)].into_iter().collect();

        assert!(matches!(store.save(&registry), Err(StoreError::Io { .. })));
        assert!(!dir.path().join("taken.tmp").exists());
    }

    #[test]
    fn quoted_fields_with_newlines() {
        let rows = parse_rows("a,\"b\nc\",\"d\"\"e\"\nx,y,z");
        assert_eq!(rows, vec![vec!["a", "b\nc", "d\"e"], vec!["x", "y", "z"]]);
    }

    #[test]
    fn write_row_quotes_when_needed() {
        let mut buf = Vec::new();
        write_row(&mut buf, &["plain", "a,b", "say \"hi\"", " pad"]).unwrap();
        assert_eq!(String::from_utf8(buf).unwrap(), "plain,\"a,b\",\"say \"\"hi\"\"\",\" pad\"\n");
    }
}
