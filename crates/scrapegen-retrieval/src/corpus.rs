//! Documentation corpus: load, chunk, embed, swap into the index

use crate::index::{VectorIndex, VectorPoint};
use scrapegen_core::{Result, ScrapegenError};
use scrapegen_llm::Embedder;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// One snippet of documentation text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    pub id: u64,
    pub source: PathBuf,
    pub text: String,
}

fn is_hidden(entry: &walkdir::DirEntry) -> bool {
    entry.depth() > 0
        && entry
            .file_name()
            .to_str()
            .map(|s| s.starts_with('.'))
            .unwrap_or(false)
}

/// Split text into chunks of at most `max_chars`, preferring blank-line boundaries
///
/// A single paragraph longer than the limit is cut on char boundaries.
pub fn chunk_text(text: &str, max_chars: usize) -> Vec<String> {
    let max_chars = max_chars.max(1);
    let mut chunks = Vec::new();
    let mut current = String::new();

    for paragraph in text.split("\n\n").map(str::trim).filter(|p| !p.is_empty()) {
        let needed = if current.is_empty() {
            paragraph.chars().count()
        } else {
            current.chars().count() + 2 + paragraph.chars().count()
        };
        if needed <= max_chars {
            if !current.is_empty() {
                current.push_str("\n\n");
            }
            current.push_str(paragraph);
            continue;
        }

        if !current.is_empty() {
            chunks.push(std::mem::take(&mut current));
        }
        if paragraph.chars().count() <= max_chars {
            current.push_str(paragraph);
        } else {
            let chars: Vec<char> = paragraph.chars().collect();
            chunks.extend(chars.chunks(max_chars).map(|c| c.iter().collect::<String>()));
        }
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

/// Load documentation files under `root` with one of `extensions`
///
/// Files are visited in path order so ids are stable across runs. Hidden entries
/// are skipped. With `max_chars`, long files are split into several documents.
pub fn load_documents(
    root: &Path,
    extensions: &[&str],
    max_chars: Option<usize>,
) -> Result<Vec<Document>> {
    if !root.exists() {
        return Err(ScrapegenError::Retrieval(format!(
            "Documentation directory not found: {}",
            root.display()
        )));
    }

    let mut paths: Vec<PathBuf> = WalkDir::new(root)
        .into_iter()
        .filter_entry(|e| !is_hidden(e))
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .filter(|p| {
            p.extension()
                .and_then(|ext| ext.to_str())
                .map(|ext| extensions.iter().any(|want| want.eq_ignore_ascii_case(ext)))
                .unwrap_or(false)
        })
        .collect();
    paths.sort();

    let mut documents = Vec::new();
    for path in paths {
        let content = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::InvalidData => {
                tracing::warn!("Skipping {}: not UTF-8 text", path.display());
                continue;
            }
            Err(e) => return Err(e.into()),
        };
        let pieces = match max_chars {
            Some(limit) => chunk_text(&content, limit),
            None if content.trim().is_empty() => Vec::new(),
            None => vec![content.trim().to_string()],
        };
        for text in pieces {
            documents.push(Document {
                id: documents.len() as u64 + 1,
                source: path.clone(),
                text,
            });
        }
    }

    tracing::info!("Loaded {} documents from {}", documents.len(), root.display());
    Ok(documents)
}

/// A set of documents destined for one collection
#[derive(Debug, Clone)]
pub struct DocumentationCorpus {
    collection: String,
    documents: Vec<Document>,
}

impl DocumentationCorpus {
    pub fn new(collection: impl Into<String>, documents: Vec<Document>) -> Self {
        Self {
            collection: collection.into(),
            documents,
        }
    }

    /// Corpus of raw texts, ids assigned from 1
    pub fn from_texts<I, S>(collection: impl Into<String>, texts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let documents = texts
            .into_iter()
            .enumerate()
            .map(|(i, text)| Document {
                id: i as u64 + 1,
                source: PathBuf::new(),
                text: text.into(),
            })
            .collect();
        Self::new(collection, documents)
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn documents(&self) -> &[Document] {
        &self.documents
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    /// Embed every document and replace the collection's contents in one swap
    ///
    /// Returns the number of points written.
    pub async fn build(&self, embedder: &dyn Embedder, index: &dyn VectorIndex) -> Result<usize> {
        let texts: Vec<String> = self.documents.iter().map(|d| d.text.clone()).collect();
        let vectors = embedder.embed_many(&texts).await?;
        if vectors.len() != texts.len() {
            return Err(ScrapegenError::Embedding(format!(
                "Embedder returned {} vectors for {} documents",
                vectors.len(),
                texts.len()
            )));
        }

        let points: Vec<VectorPoint> = self
            .documents
            .iter()
            .zip(vectors)
            .map(|(doc, vector)| VectorPoint {
                id: doc.id,
                vector,
                text: doc.text.clone(),
            })
            .collect();
        let count = points.len();

        index.replace_collection(&self.collection, points).await?;
        tracing::info!("Indexed {} documents into {}", count, self.collection);
        Ok(count)
    }
}
