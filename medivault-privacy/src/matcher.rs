use std::{fmt, sync::Arc};

use medivault_telemetry::TelemetryHandle;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::{
    cache::EncodeCache,
    codec::CodecError,
    types::{EncodedValue, PlainValue, Predicate, Record, RecordId},
};

pub const COUNTER_SCANNED: &str = "matcher.records.scanned";
pub const COUNTER_EXCLUDED: &str = "matcher.records.excluded";

/// How a record that fails to decode is handled.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum IntegrityMode {
    /// Drop the record from the count and keep going.
    #[default]
    Lenient,
    /// Abort the whole query on the first failure.
    Strict,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub struct MatcherConfig {
    #[serde(default)]
    pub integrity_mode: IntegrityMode,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordField {
    Age,
    Condition,
}

impl fmt::Display for RecordField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordField::Age => f.write_str("age"),
            RecordField::Condition => f.write_str("condition"),
        }
    }
}

#[derive(Debug, Error)]
pub enum MatchError {
    #[error("record {record_id} failed {field} verification: {source}")]
    Integrity {
        record_id: RecordId,
        field: RecordField,
        #[source]
        source: CodecError,
    },
}

/// A record left out of the count, with the field that failed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Exclusion {
    pub record_id: RecordId,
    pub field: RecordField,
}

/// Result of one scan. Carries the exact count, so it stays inside the crate
/// boundary of the query engine and is never serialized.
#[derive(Debug, PartialEq, Eq)]
pub struct MatchOutcome {
    pub true_count: u64,
    pub scanned: usize,
    pub excluded: Vec<Exclusion>,
}

pub struct QueryMatcher {
    cache: Arc<EncodeCache>,
    mode: IntegrityMode,
    telemetry: TelemetryHandle,
}

impl QueryMatcher {
    pub fn new(cache: Arc<EncodeCache>, config: &MatcherConfig, telemetry: TelemetryHandle) -> Self {
        Self {
            cache,
            mode: config.integrity_mode,
            telemetry,
        }
    }

    pub fn mode(&self) -> IntegrityMode {
        self.mode
    }

    /// Counts records matching `predicate`. The predicate's condition is
    /// already a member of [`crate::types::Condition`], so unknown names never
    /// reach this point.
    pub fn count_matching(
        &self,
        records: &[Record],
        predicate: &Predicate,
    ) -> Result<MatchOutcome, MatchError> {
        let mut outcome = MatchOutcome {
            true_count: 0,
            scanned: 0,
            excluded: Vec::new(),
        };
        if predicate.is_empty_range() {
            return Ok(outcome);
        }
        for record in records {
            outcome.scanned += 1;
            self.telemetry.incr(COUNTER_SCANNED);
            let fields = self
                .decode_number(record, RecordField::Age, &record.encoded_age)
                .and_then(|age| {
                    self.decode_number(record, RecordField::Condition, &record.encoded_condition)
                        .map(|condition| (age, condition))
                });
            match fields {
                Ok((age, condition)) => {
                    if predicate.matches(age, condition) {
                        outcome.true_count += 1;
                    }
                }
                Err(MatchError::Integrity {
                    record_id,
                    field,
                    source,
                }) => {
                    warn!(record_id = %record_id, %field, error = %source, "record failed integrity verification");
                    self.telemetry.incr(COUNTER_EXCLUDED);
                    if self.mode == IntegrityMode::Strict {
                        return Err(MatchError::Integrity {
                            record_id,
                            field,
                            source,
                        });
                    }
                    outcome.excluded.push(Exclusion { record_id, field });
                }
            }
        }
        Ok(outcome)
    }

    fn decode_number(
        &self,
        record: &Record,
        field: RecordField,
        encoded: &EncodedValue,
    ) -> Result<i64, MatchError> {
        let integrity = |source| MatchError::Integrity {
            record_id: record.id.clone(),
            field,
            source,
        };
        match self.cache.decode(encoded).map_err(integrity)? {
            PlainValue::Number(value) => Ok(value),
            PlainValue::Text(_) => Err(integrity(CodecError::Malformed(
                "expected a numeric field",
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use medivault_telemetry::TelemetryConfig;
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{codec::ValueCodec, types::Condition};

    fn cache() -> Arc<EncodeCache> {
        Arc::new(EncodeCache::new(ValueCodec::new("matcher-key").unwrap()))
    }

    fn record(cache: &EncodeCache, id: u64, age: i64, condition: Condition) -> Record {
        Record {
            id: RecordId::Numeric(id),
            encoded_age: cache.encode_cached(&PlainValue::Number(age)).unwrap(),
            encoded_condition: cache
                .encode_cached(&PlainValue::Number(condition.code()))
                .unwrap(),
            encoded_treatment: cache.encode_cached(&PlainValue::Number(1)).unwrap(),
        }
    }

    fn dataset(cache: &EncodeCache) -> Vec<Record> {
        vec![
            record(cache, 1, 30, Condition::Diabetes),
            record(cache, 2, 35, Condition::Diabetes),
            record(cache, 3, 40, Condition::Diabetes),
            record(cache, 4, 41, Condition::Diabetes),
            record(cache, 5, 35, Condition::Asthma),
            record(cache, 6, 29, Condition::Diabetes),
        ]
    }

    fn corrupt(value: &EncodedValue) -> EncodedValue {
        let (body, tag) = value.as_str().split_once('.').unwrap();
        let mut bytes = STANDARD.decode(body).unwrap();
        bytes[0] ^= 0x20;
        EncodedValue::new(format!("{}.{}", STANDARD.encode(bytes), tag))
    }

    fn matcher(cache: Arc<EncodeCache>, mode: IntegrityMode) -> QueryMatcher {
        QueryMatcher::new(
            cache,
            &MatcherConfig {
                integrity_mode: mode,
            },
            TelemetryHandle::from_config(TelemetryConfig::sample("matcher-test")),
        )
    }

    #[test]
    fn counts_inclusive_age_range_and_condition() {
        let cache = cache();
        let records = dataset(&cache);
        let matcher = matcher(cache, IntegrityMode::Lenient);
        let outcome = matcher
            .count_matching(&records, &Predicate::new(30, 40, Condition::Diabetes))
            .unwrap();
        assert_eq!(outcome.true_count, 3);
        assert_eq!(outcome.scanned, 6);
        assert!(outcome.excluded.is_empty());
    }

    #[test]
    fn inverted_range_matches_nothing() {
        let cache = cache();
        let records = dataset(&cache);
        let matcher = matcher(cache, IntegrityMode::Lenient);
        let outcome = matcher
            .count_matching(&records, &Predicate::new(40, 30, Condition::Diabetes))
            .unwrap();
        assert_eq!(outcome.true_count, 0);
    }

    #[test]
    fn lenient_mode_excludes_corrupted_record() {
        let cache = cache();
        let mut records = dataset(&cache);
        records[1].encoded_age = corrupt(&records[1].encoded_age);
        let matcher = matcher(cache, IntegrityMode::Lenient);
        let outcome = matcher
            .count_matching(&records, &Predicate::new(30, 40, Condition::Diabetes))
            .unwrap();
        assert_eq!(outcome.true_count, 2);
        assert_eq!(
            outcome.excluded,
            vec![Exclusion {
                record_id: RecordId::Numeric(2),
                field: RecordField::Age,
            }]
        );
        assert_eq!(matcher.telemetry.snapshot().counter(COUNTER_EXCLUDED), 1);
    }

    #[test]
    fn strict_mode_aborts_on_first_failure() {
        let cache = cache();
        let mut records = dataset(&cache);
        records[4].encoded_condition = corrupt(&records[4].encoded_condition);
        let matcher = matcher(cache, IntegrityMode::Strict);
        let err = matcher
            .count_matching(&records, &Predicate::new(30, 40, Condition::Diabetes))
            .unwrap_err();
        assert!(matches!(
            err,
            MatchError::Integrity {
                record_id: RecordId::Numeric(5),
                field: RecordField::Condition,
                source: CodecError::Integrity,
            }
        ));
    }

    #[test]
    fn text_valued_age_is_treated_as_unreadable() {
        let cache = cache();
        let mut records = dataset(&cache);
        records[0].encoded_age = cache.encode_cached(&PlainValue::Text("30".into())).unwrap();
        let matcher = matcher(cache, IntegrityMode::Lenient);
        let outcome = matcher
            .count_matching(&records, &Predicate::new(30, 40, Condition::Diabetes))
            .unwrap();
        assert_eq!(outcome.true_count, 2);
        assert_eq!(outcome.excluded.len(), 1);
    }
}
