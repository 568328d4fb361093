use std::sync::Arc;

use medivault_privacy::{
    encode_dataset, EncodeCache, EngineConfig, InMemoryRecords, PatientRecord, QueryEngine,
    QueryRequest, RecordId, ValueCodec,
};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = EngineConfig::sample();
    let cache = EncodeCache::new(ValueCodec::from_config(&config.codec)?);

    let patients: Vec<PatientRecord> = (0..200u64)
        .map(|id| PatientRecord {
            id: RecordId::Numeric(id),
            age: 18 + (id as i64 * 7) % 63,
            condition: ["diabetes", "hypertension", "asthma"][id as usize % 3].into(),
            treatment: ["metformin", "lisinopril", "albuterol"][id as usize % 3].into(),
        })
        .collect();
    let records = encode_dataset(&patients, &cache, |percent| {
        if percent % 25 == 0 {
            println!("encoded {percent}%");
        }
    })?;

    let engine = QueryEngine::new(&config, Arc::new(InMemoryRecords::new(records)))?;
    for epsilon in [1.0, 4.0, 6.0] {
        let request = QueryRequest::for_requester("walkthrough").with_epsilon(epsilon);
        println!("{}", serde_json::to_string_pretty(&engine.respond(&request))?);
    }

    let report = engine.budget_report("walkthrough");
    println!(
        "remaining budget {:.1} after {} answered queries",
        report.remaining,
        report.history.len()
    );

    let snapshot = engine.telemetry().flush();
    println!(
        "executed={} rejected.budget={} scanned={}",
        snapshot.counter("query.executed"),
        snapshot.counter("query.rejected.budget"),
        snapshot.counter("matcher.records.scanned")
    );
    println!("{}", snapshot.to_json()?);
    Ok(())
}
