use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ValidationError {
    #[error("unknown condition: {0}")]
    UnknownCondition(String),
    #[error("unknown treatment: {0}")]
    UnknownTreatment(String),
    #[error("epsilon must be a finite value > 0, got {0}")]
    InvalidEpsilon(f64),
    #[error("requester identity must not be empty")]
    EmptyRequester,
    #[error("invalid range: min {min} > max {max}")]
    InvalidRange { min: i64, max: i64 },
}

/// Scalar carried inside a single encoded field.
///
/// The canonical byte form is JSON, so `Number(1)` and `Text("1")` never share
/// an encoding.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PlainValue {
    Number(i64),
    Text(String),
}

impl PlainValue {
    pub fn as_number(&self) -> Option<i64> {
        match self {
            PlainValue::Number(n) => Some(*n),
            PlainValue::Text(_) => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            PlainValue::Number(_) => None,
            PlainValue::Text(text) => Some(text),
        }
    }
}

impl From<i64> for PlainValue {
    fn from(value: i64) -> Self {
        PlainValue::Number(value)
    }
}

impl From<u32> for PlainValue {
    fn from(value: u32) -> Self {
        PlainValue::Number(i64::from(value))
    }
}

impl From<&str> for PlainValue {
    fn from(value: &str) -> Self {
        PlainValue::Text(value.to_owned())
    }
}

impl From<String> for PlainValue {
    fn from(value: String) -> Self {
        PlainValue::Text(value)
    }
}

impl fmt::Display for PlainValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlainValue::Number(n) => write!(f, "{n}"),
            PlainValue::Text(text) => f.write_str(text),
        }
    }
}

/// Opaque `base64(transformed).hex(tag)` string produced by the value codec.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EncodedValue(String);

impl EncodedValue {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for EncodedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Condition {
    Diabetes,
    Hypertension,
    Asthma,
}

impl Condition {
    pub const ALL: [Condition; 3] = [
        Condition::Diabetes,
        Condition::Hypertension,
        Condition::Asthma,
    ];

    pub fn code(self) -> i64 {
        match self {
            Condition::Diabetes => 1,
            Condition::Hypertension => 2,
            Condition::Asthma => 3,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.code() == code)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Condition::Diabetes => "diabetes",
            Condition::Hypertension => "hypertension",
            Condition::Asthma => "asthma",
        }
    }
}

impl FromStr for Condition {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let needle = s.trim();
        Self::ALL
            .into_iter()
            .find(|c| c.as_str().eq_ignore_ascii_case(needle))
            .ok_or_else(|| ValidationError::UnknownCondition(s.to_owned()))
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Treatment {
    Metformin,
    Lisinopril,
    Albuterol,
}

impl Treatment {
    pub const ALL: [Treatment; 3] = [
        Treatment::Metformin,
        Treatment::Lisinopril,
        Treatment::Albuterol,
    ];

    pub fn code(self) -> i64 {
        match self {
            Treatment::Metformin => 1,
            Treatment::Lisinopril => 2,
            Treatment::Albuterol => 3,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Treatment::Metformin => "metformin",
            Treatment::Lisinopril => "lisinopril",
            Treatment::Albuterol => "albuterol",
        }
    }
}

impl FromStr for Treatment {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let needle = s.trim();
        Self::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(needle))
            .ok_or_else(|| ValidationError::UnknownTreatment(s.to_owned()))
    }
}

/// Record ids arrive either as JSON numbers or strings.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RecordId {
    Numeric(u64),
    Text(String),
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordId::Numeric(id) => write!(f, "{id}"),
            RecordId::Text(id) => f.write_str(id),
        }
    }
}

impl From<u64> for RecordId {
    fn from(value: u64) -> Self {
        RecordId::Numeric(value)
    }
}

impl From<&str> for RecordId {
    fn from(value: &str) -> Self {
        RecordId::Text(value.to_owned())
    }
}

/// One row of the externally supplied dataset snapshot.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub id: RecordId,
    #[serde(alias = "encrypted_age")]
    pub encoded_age: EncodedValue,
    #[serde(alias = "encrypted_condition")]
    pub encoded_condition: EncodedValue,
    #[serde(alias = "encrypted_treatment")]
    pub encoded_treatment: EncodedValue,
}

/// Validated count predicate. `age_min > age_max` is allowed and matches nothing.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Predicate {
    pub age_min: i64,
    pub age_max: i64,
    pub condition: Condition,
}

impl Predicate {
    pub fn new(age_min: i64, age_max: i64, condition: Condition) -> Self {
        Self {
            age_min,
            age_max,
            condition,
        }
    }

    /// Parses the condition name; runs before any decoding work.
    pub fn parse(age_min: i64, age_max: i64, condition: &str) -> Result<Self, ValidationError> {
        Ok(Self::new(age_min, age_max, condition.parse()?))
    }

    pub fn is_empty_range(&self) -> bool {
        self.age_min > self.age_max
    }

    pub fn matches(&self, age: i64, condition_code: i64) -> bool {
        self.age_min <= age && age <= self.age_max && condition_code == self.condition.code()
    }
}
