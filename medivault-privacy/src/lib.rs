//! MediVault privacy engine: answers count queries over encoded patient
//! records, releasing only Laplace-noised counts and charging every answer
//! against a per-requester epsilon budget. Record values never leave the
//! codec in plaintext; the engine decodes them only long enough to test the
//! predicate.

pub mod api;
pub mod budget;
pub mod cache;
pub mod codec;
pub mod config;
pub mod dataset;
pub mod dp;
pub mod errors;
pub mod matcher;
pub mod pipeline;
pub mod source;
pub mod types;

pub use api::{ErrorResponse, QueryEcho, QueryReply, QueryRequest, QueryResponse, DP_MESSAGE};
pub use budget::{
    BudgetConfig, BudgetEntry, BudgetError, BudgetReport, BudgetStore, HistoryEntry,
    PrivacyBudgetLedger, DEFAULT_TOTAL_BUDGET,
};
pub use cache::EncodeCache;
pub use codec::{CodecConfig, CodecError, ValueCodec};
pub use config::EngineConfig;
pub use dataset::{encode_dataset, precompute_ages, DatasetError, PatientRecord};
pub use dp::{DpError, LaplaceMechanism, NoiseConfig};
pub use errors::{ErrorKind, QueryError, QueryResult};
pub use matcher::{IntegrityMode, MatchError, MatchOutcome, MatcherConfig, QueryMatcher};
pub use pipeline::{QueryEngine, QueryPhase};
pub use source::{InMemoryRecords, JsonFileRecords, RecordSource, SourceError};
pub use types::{
    Condition, EncodedValue, PlainValue, Predicate, Record, RecordId, Treatment, ValidationError,
};
