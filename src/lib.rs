pub mod adapters;
pub mod app;
pub mod config;
pub mod core;
pub mod domain;
pub mod utils;

pub use app::build_transformer;
pub use config::{TaskKind, TomlConfig};
pub use core::etl::{EngineConfig, EtlEngine, RunSummary};
pub use domain::model::{Record, TransformResult};
pub use domain::ports::Transformer;
pub use utils::error::{EtlError, Result};
