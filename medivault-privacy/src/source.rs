use std::{
    fs,
    path::{Path, PathBuf},
    sync::Arc,
};

use thiserror::Error;

use crate::types::Record;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("unable to read dataset {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("dataset {path} is malformed: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Supplies the record snapshot a single query runs over. The snapshot is
/// treated as immutable for the duration of that query.
pub trait RecordSource: Send + Sync {
    fn snapshot(&self) -> Result<Arc<[Record]>, SourceError>;
}

#[derive(Clone, Debug)]
pub struct InMemoryRecords {
    records: Arc<[Record]>,
}

impl InMemoryRecords {
    pub fn new(records: Vec<Record>) -> Self {
        Self {
            records: records.into(),
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl RecordSource for InMemoryRecords {
    fn snapshot(&self) -> Result<Arc<[Record]>, SourceError> {
        Ok(Arc::clone(&self.records))
    }
}

/// Re-reads a JSON array of records on every snapshot.
#[derive(Clone, Debug)]
pub struct JsonFileRecords {
    path: PathBuf,
}

impl JsonFileRecords {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl RecordSource for JsonFileRecords {
    fn snapshot(&self) -> Result<Arc<[Record]>, SourceError> {
        let contents = fs::read_to_string(&self.path).map_err(|source| SourceError::Io {
            path: self.path.clone(),
            source,
        })?;
        let records: Vec<Record> =
            serde_json::from_str(&contents).map_err(|source| SourceError::Parse {
                path: self.path.clone(),
                source,
            })?;
        Ok(records.into())
    }
}

#[cfg(test)]
mod tests {
    use std::time::{SystemTime, UNIX_EPOCH};

    use super::*;
    use crate::types::{EncodedValue, RecordId};

    fn scratch_file(name: &str, contents: &str) -> PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        let path = std::env::temp_dir().join(format!("medivault-{name}-{nanos}.json"));
        fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn in_memory_snapshots_share_storage() {
        let source = InMemoryRecords::new(vec![Record {
            id: RecordId::Text("p-1".into()),
            encoded_age: EncodedValue::new("a.b"),
            encoded_condition: EncodedValue::new("c.d"),
            encoded_treatment: EncodedValue::new("e.f"),
        }]);
        let first = source.snapshot().unwrap();
        let second = source.snapshot().unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(source.len(), 1);
    }

    #[test]
    fn reads_records_from_json_file() {
        let path = scratch_file(
            "records",
            r#"[{"id": 1, "encoded_age": "a.b", "encoded_condition": "c.d", "encoded_treatment": "e.f"}]"#,
        );
        let records = JsonFileRecords::new(&path).snapshot().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id, RecordId::Numeric(1));
        fs::remove_file(path).unwrap();
    }

    #[test]
    fn reports_missing_and_malformed_files() {
        let missing = JsonFileRecords::new("/nonexistent/medivault/records.json");
        assert!(matches!(missing.snapshot(), Err(SourceError::Io { .. })));

        let path = scratch_file("broken", "{not json");
        let broken = JsonFileRecords::new(&path);
        assert!(matches!(broken.snapshot(), Err(SourceError::Parse { .. })));
        fs::remove_file(path).unwrap();
    }
}
