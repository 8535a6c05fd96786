//! # scrapegen-retrieval
//!
//! Retrieval-augmented context for the repair loop.
//!
//! A fixed documentation corpus is embedded once into a named collection. During
//! repair, a stage's failure is rewritten into a short query, embedded, and the
//! nearest snippets are rendered into the next synthesis prompt. Retrieval only
//! enriches prompts: every failure here degrades to "no snippets".

mod corpus;
mod index;
mod memory;
mod qdrant;
mod retriever;
mod rewriter;

pub use corpus::{chunk_text, load_documents, Document, DocumentationCorpus};
pub use index::{cosine_similarity, RetrievalHit, VectorIndex, VectorPoint};
pub use memory::InMemoryVectorIndex;
pub use qdrant::QdrantIndex;
pub use retriever::{render_snippets, Retriever};
pub use rewriter::QueryRewriter;
