//! Turns plaintext patient rows into encoded [`Record`]s and builds the
//! precomputed age table. Both go through the shared [`EncodeCache`], so
//! repeated ages and codes are encoded once.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::{
    cache::EncodeCache,
    codec::CodecError,
    types::{Condition, EncodedValue, PlainValue, Record, RecordId, Treatment, ValidationError},
};

pub const DEFAULT_MIN_AGE: i64 = 18;
pub const DEFAULT_MAX_AGE: i64 = 80;

#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("patient {id}: {source}")]
    Validation {
        id: RecordId,
        #[source]
        source: ValidationError,
    },
    #[error(transparent)]
    Range(#[from] ValidationError),
    #[error(transparent)]
    Codec(#[from] CodecError),
}

/// Plaintext input row, as produced by the record owners' export.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatientRecord {
    pub id: RecordId,
    pub age: i64,
    pub condition: String,
    pub treatment: String,
}

/// Encodes every patient. `on_progress` receives whole percentages every 5%
/// of rows and always once for the last row.
pub fn encode_dataset<F>(
    patients: &[PatientRecord],
    cache: &EncodeCache,
    mut on_progress: F,
) -> Result<Vec<Record>, DatasetError>
where
    F: FnMut(u8),
{
    let total = patients.len();
    let step = (total / 20).max(1);
    let mut encoded = Vec::with_capacity(total);
    for (index, patient) in patients.iter().enumerate() {
        encoded.push(encode_patient(patient, cache)?);
        let done = index + 1;
        if done == total || done % step == 0 {
            let percent = ((done * 100) as f64 / total as f64).round() as u8;
            on_progress(percent);
        }
    }
    debug!(records = total, cached = cache.len(), "dataset encoded");
    Ok(encoded)
}

pub fn encode_patient(patient: &PatientRecord, cache: &EncodeCache) -> Result<Record, DatasetError> {
    let invalid = |source| DatasetError::Validation {
        id: patient.id.clone(),
        source,
    };
    let condition: Condition = patient.condition.parse().map_err(invalid)?;
    let treatment: Treatment = patient.treatment.parse().map_err(invalid)?;
    Ok(Record {
        id: patient.id.clone(),
        encoded_age: cache.encode_cached(&PlainValue::Number(patient.age))?,
        encoded_condition: cache.encode_cached(&PlainValue::Number(condition.code()))?,
        encoded_treatment: cache.encode_cached(&PlainValue::Number(treatment.code()))?,
    })
}

/// Encoded form of every age in `min..=max`.
pub fn precompute_ages(
    cache: &EncodeCache,
    min: i64,
    max: i64,
) -> Result<BTreeMap<i64, EncodedValue>, DatasetError> {
    if min > max {
        return Err(ValidationError::InvalidRange { min, max }.into());
    }
    (min..=max)
        .map(|age| -> Result<_, DatasetError> {
            Ok((age, cache.encode_cached(&PlainValue::Number(age))?))
        })
        .collect()
}
