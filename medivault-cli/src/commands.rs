//! Command implementations behind the `medivault` binary.
//!
//! # Example
//! ```
//! use std::sync::Arc;
//!
//! use medivault_cli::commands::run_queries;
//! use medivault_cli::config::Config;
//! use medivault_privacy::{InMemoryRecords, QueryEngine, QueryRequest};
//!
//! let cfg = Config::sample();
//! let engine = QueryEngine::new(&cfg.engine, Arc::new(InMemoryRecords::new(vec![]))).unwrap();
//! let summary = run_queries(&engine, &QueryRequest::for_requester("doc"), 3);
//! assert_eq!(summary.replies.len(), 3);
//! assert_eq!(summary.report.remaining, 7.0);
//! ```

use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
};

use medivault_privacy::{
    encode_dataset, precompute_ages, BudgetReport, CodecError, DatasetError, EncodeCache,
    EncodedValue, PatientRecord, PlainValue, QueryEngine, QueryReply, QueryRequest, Record,
    ValueCodec,
};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("unable to access {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid JSON in {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error(transparent)]
    Dataset(#[from] DatasetError),
    #[error(transparent)]
    Codec(#[from] CodecError),
}

/// Replies from one `query` invocation plus the requester's final budget.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuerySummary {
    pub replies: Vec<QueryReply>,
    pub report: BudgetReport,
}

pub fn run_queries(engine: &QueryEngine, request: &QueryRequest, repeat: u16) -> QuerySummary {
    let replies = (0..repeat.max(1))
        .map(|attempt| {
            let reply = engine.respond(request);
            debug!(attempt, success = reply.is_success(), "query attempt");
            reply
        })
        .collect();
    QuerySummary {
        replies,
        report: engine.budget_report(&request.requester_identity),
    }
}

/// Reads plaintext patients from `input` and writes encoded records to `output`.
pub fn encode_patients(
    cache: &EncodeCache,
    input: &Path,
    output: &Path,
) -> Result<usize, CommandError> {
    let contents = fs::read_to_string(input).map_err(|source| CommandError::Io {
        path: input.to_path_buf(),
        source,
    })?;
    let patients: Vec<PatientRecord> =
        serde_json::from_str(&contents).map_err(|source| CommandError::Json {
            path: input.to_path_buf(),
            source,
        })?;
    let records = encode_dataset(&patients, cache, |percent| {
        info!(percent, "encoding dataset");
    })?;
    write_records(output, &records)?;
    Ok(records.len())
}

fn write_records(path: &Path, records: &[Record]) -> Result<(), CommandError> {
    let json = serde_json::to_string_pretty(records).map_err(|source| CommandError::Json {
        path: path.to_path_buf(),
        source,
    })?;
    fs::write(path, json).map_err(|source| CommandError::Io {
        path: path.to_path_buf(),
        source,
    })
}

pub fn age_table(
    cache: &EncodeCache,
    min: i64,
    max: i64,
) -> Result<BTreeMap<i64, EncodedValue>, CommandError> {
    Ok(precompute_ages(cache, min, max)?)
}

#[derive(Debug, PartialEq, Serialize)]
pub struct Roundtrip {
    pub input: PlainValue,
    pub encoded: EncodedValue,
    pub decoded: PlainValue,
}

/// Integers are encoded as numbers, anything else as text.
pub fn roundtrip(codec: &ValueCodec, raw: &str) -> Result<Roundtrip, CommandError> {
    let input = raw
        .parse::<i64>()
        .map(PlainValue::Number)
        .unwrap_or_else(|_| PlainValue::Text(raw.to_owned()));
    let encoded = codec.encode(&input)?;
    let decoded = codec.decode(&encoded)?;
    Ok(Roundtrip {
        input,
        encoded,
        decoded,
    })
}

#[cfg(test)]
mod tests {
    use std::{
        sync::Arc,
        time::{SystemTime, UNIX_EPOCH},
    };

    use medivault_privacy::{InMemoryRecords, JsonFileRecords, RecordId, RecordSource};
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::config::Config;

    fn scratch(name: &str) -> PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        std::env::temp_dir().join(format!("medivault-cli-{name}-{nanos}.json"))
    }

    fn cache() -> EncodeCache {
        EncodeCache::new(ValueCodec::from_config(&Config::sample().engine.codec).unwrap())
    }

    #[test]
    fn repeat_exhausts_budget_and_reports_it() {
        let config = Config::sample();
        let engine =
            QueryEngine::new(&config.engine, Arc::new(InMemoryRecords::new(vec![]))).unwrap();
        let request = QueryRequest::for_requester("cli").with_epsilon(4.0);
        let summary = run_queries(&engine, &request, 3);
        let successes: Vec<_> = summary.replies.iter().map(QueryReply::is_success).collect();
        assert_eq!(successes, vec![true, true, false]);
        assert_eq!(summary.report.remaining, 2.0);
    }

    #[test]
    fn encodes_patient_file_into_readable_records() {
        let input = scratch("patients");
        let output = scratch("records");
        fs::write(
            &input,
            r#"[{"id": 1, "age": 34, "condition": "diabetes", "treatment": "metformin"},
                {"id": "p-2", "age": 51, "condition": "asthma", "treatment": "albuterol"}]"#,
        )
        .unwrap();

        let cache = cache();
        assert_eq!(encode_patients(&cache, &input, &output).unwrap(), 2);
        let records = JsonFileRecords::new(&output).snapshot().unwrap();
        assert_eq!(records[1].id, RecordId::Text("p-2".into()));
        assert_eq!(
            cache.decode(&records[0].encoded_age).unwrap(),
            PlainValue::Number(34)
        );

        fs::remove_file(input).unwrap();
        fs::remove_file(output).unwrap();
    }

    #[test]
    fn missing_patient_file_is_an_io_error() {
        let err = encode_patients(&cache(), Path::new("/nonexistent/p.json"), &scratch("out"))
            .unwrap_err();
        assert!(matches!(err, CommandError::Io { .. }));
    }

    #[test]
    fn roundtrip_keeps_numbers_and_text_apart() {
        let codec = ValueCodec::new("cli-key").unwrap();
        let number = roundtrip(&codec, "42").unwrap();
        assert_eq!(number.decoded, PlainValue::Number(42));
        let text = roundtrip(&codec, "asthma").unwrap();
        assert_eq!(text.decoded, PlainValue::Text("asthma".into()));
        assert_ne!(number.encoded, roundtrip(&codec, "\"42\"").unwrap().encoded);
    }

    #[test]
    fn age_table_covers_the_inclusive_range() {
        let table = age_table(&cache(), 18, 20).unwrap();
        assert_eq!(table.keys().copied().collect::<Vec<_>>(), vec![18, 19, 20]);
        assert!(age_table(&cache(), 20, 18).is_err());
    }
}
