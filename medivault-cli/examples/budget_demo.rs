use std::sync::Arc;

use medivault_cli::{commands::run_queries, config::Config};
use medivault_privacy::{
    encode_dataset, EncodeCache, InMemoryRecords, PatientRecord, QueryEngine, QueryRequest,
    RecordId, ValueCodec,
};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::sample();
    let cache = EncodeCache::new(ValueCodec::from_config(&config.engine.codec)?);
    let patients: Vec<PatientRecord> = (1..=12u64)
        .map(|id| PatientRecord {
            id: RecordId::Numeric(id),
            age: 28 + id as i64,
            condition: if id % 2 == 0 { "diabetes" } else { "asthma" }.into(),
            treatment: if id % 2 == 0 { "metformin" } else { "albuterol" }.into(),
        })
        .collect();
    let records = encode_dataset(&patients, &cache, |_| {})?;
    let engine = QueryEngine::new(&config.engine, Arc::new(InMemoryRecords::new(records)))?;

    let request = QueryRequest::for_requester("budget-demo").with_epsilon(3.0);
    let summary = run_queries(&engine, &request, 4);
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}
