// Adapters layer: concrete implementations for external systems (csv stores, http services).

pub mod csv_sink;
pub mod csv_source;
pub mod embedding;
pub mod llm;
