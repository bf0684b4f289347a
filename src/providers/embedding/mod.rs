pub mod model;
pub mod provider;

pub use model::{ApiSyntax, EmbedMode};
pub use provider::{ClouderaEmbeddingProvider, extract_embeddings};
