pub mod classification;
pub mod embedding;
pub mod sentiment;
pub mod similarity;

pub use classification::NeedClassificationTransform;
pub use embedding::EmbeddingTransform;
pub use sentiment::{SentimentTupleTransform, TupleParser};
pub use similarity::{SimilarityNotator, SimilaritySettings};
