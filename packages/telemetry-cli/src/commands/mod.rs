pub mod decimate;
pub mod ingest;
pub mod inspect;

use telemetry_core::SourceId;

/// Integer ids stay integers so they match `"sensor_id": 1` in the stream
pub fn parse_source_id(raw: &str) -> SourceId {
    match raw.trim().parse::<i64>() {
        Ok(id) => SourceId::Int(id),
        Err(_) => SourceId::Text(raw.trim().to_string()),
    }
}
