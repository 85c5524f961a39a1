pub mod batcher;
pub mod dispatcher;
pub mod etl;
pub mod metrics;
pub mod sanitizer;

pub use crate::domain::model::{Batch, OutputRow, Record, TransformResult};
pub use crate::domain::ports::{ProgressObserver, Transformer};
pub use crate::utils::error::Result;
