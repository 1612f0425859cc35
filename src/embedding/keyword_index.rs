/// Tantivy keyword index for BM25 lexical search
use std::path::PathBuf;
use tantivy::collector::TopDocs;
use tantivy::query::QueryParser;
use tantivy::schema::*;
use tantivy::{doc, Index, IndexReader, IndexWriter, ReloadPolicy, TantivyError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum KeywordIndexError {
    #[error("Index initialization failed: {0}")]
    InitializationError(String),

    #[error("Insert failed: {0}")]
    InsertError(String),

    #[error("Search failed: {0}")]
    SearchError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Tantivy error: {0}")]
    TantivyError(#[from] TantivyError),

    #[error("Query parsing error: {0}")]
    QueryParseError(String),
}

/// Lexical search hit with chunk ID and raw BM25 score
#[derive(Debug, Clone)]
pub struct LexicalHit {
    /// Chunk ID in the document store
    pub id: u64,
    /// Raw BM25 relevance score (unbounded above); normalised to [0, 1]
    /// within a candidate batch by the hybrid retriever
    pub score: f32,
}

/// Tantivy index wrapper providing BM25-ranked full-text search
///
/// Created in (or loaded from) a directory so the index survives restarts;
/// writes happen only during corpus load.
pub struct KeywordIndex {
    index: Index,
    reader: IndexReader,
    writer: IndexWriter,
    id_field: Field,
    text_field: Field,
}

impl KeywordIndex {
    /// Open the index in a directory, creating it when absent
    pub fn open(index_path: PathBuf) -> Result<Self, KeywordIndexError> {
        if index_path.exists() && index_path.join("meta.json").exists() {
            Self::load(index_path)
        } else {
            Self::create(index_path)
        }
    }

    fn create(index_path: PathBuf) -> Result<Self, KeywordIndexError> {
        std::fs::create_dir_all(&index_path)?;

        let mut schema_builder = Schema::builder();
        let id_field = schema_builder.add_u64_field("id", INDEXED | STORED);
        let text_field = schema_builder.add_text_field("text", TEXT);
        let schema = schema_builder.build();

        let index = Index::create_in_dir(&index_path, schema)
            .map_err(|e| KeywordIndexError::InitializationError(e.to_string()))?;

        Self::with_index(index)
    }

    fn load(index_path: PathBuf) -> Result<Self, KeywordIndexError> {
        let index = Index::open_in_dir(&index_path)
            .map_err(|e| KeywordIndexError::InitializationError(e.to_string()))?;

        Self::with_index(index)
    }

    fn with_index(index: Index) -> Result<Self, KeywordIndexError> {
        let schema = index.schema();

        let id_field = schema.get_field("id").map_err(|_| {
            KeywordIndexError::InitializationError("Missing 'id' field in schema".to_string())
        })?;

        let text_field = schema.get_field("text").map_err(|_| {
            KeywordIndexError::InitializationError("Missing 'text' field in schema".to_string())
        })?;

        let writer = index
            .writer(50_000_000) // 50MB buffer
            .map_err(|e| KeywordIndexError::InitializationError(e.to_string()))?;

        let reader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::OnCommitWithDelay)
            .try_into()
            .map_err(|e: TantivyError| KeywordIndexError::InitializationError(e.to_string()))?;

        Ok(Self {
            index,
            reader,
            writer,
            id_field,
            text_field,
        })
    }

    /// Index a passage's text keyed by its chunk ID
    pub fn insert(&mut self, id: u64, text: &str) -> Result<(), KeywordIndexError> {
        let doc = doc!(
            self.id_field => id,
            self.text_field => text,
        );

        self.writer
            .add_document(doc)
            .map_err(|e| KeywordIndexError::InsertError(e.to_string()))?;

        Ok(())
    }

    /// Index multiple passages in batch
    pub fn insert_batch(&mut self, items: &[(u64, String)]) -> Result<(), KeywordIndexError> {
        for (id, text) in items {
            self.insert(*id, text)?;
        }
        Ok(())
    }

    /// Commit pending writes and refresh the reader
    pub fn commit(&mut self) -> Result<(), KeywordIndexError> {
        self.writer
            .commit()
            .map_err(|e| KeywordIndexError::InsertError(e.to_string()))?;

        self.reader
            .reload()
            .map_err(|e| KeywordIndexError::SearchError(e.to_string()))?;

        Ok(())
    }

    /// BM25 search, top `limit` hits sorted by relevance
    ///
    /// Query syntax errors (stray punctuation from user text) degrade to an
    /// empty result rather than failing the whole retrieval.
    pub fn search(&self, query: &str, limit: usize) -> Result<Vec<LexicalHit>, KeywordIndexError> {
        let searcher = self.reader.searcher();

        let query_parser = QueryParser::for_index(&self.index, vec![self.text_field]);
        let parsed = match query_parser.parse_query(query) {
            Ok(q) => q,
            Err(e) => {
                tracing::debug!("Lexical query parse failed, returning no hits: {}", e);
                return Ok(Vec::new());
            }
        };

        let top_docs = searcher
            .search(&parsed, &TopDocs::with_limit(limit))
            .map_err(|e| KeywordIndexError::SearchError(e.to_string()))?;

        let mut results = Vec::with_capacity(top_docs.len());
        for (score, doc_address) in top_docs {
            let retrieved_doc: tantivy::TantivyDocument = searcher
                .doc(doc_address)
                .map_err(|e| KeywordIndexError::SearchError(e.to_string()))?;

            let id = retrieved_doc
                .get_first(self.id_field)
                .and_then(|v| v.as_u64())
                .ok_or_else(|| {
                    KeywordIndexError::SearchError("Missing or invalid ID field".to_string())
                })?;

            results.push(LexicalHit { id, score });
        }

        Ok(results)
    }

    /// Remove every document (used when reloading a corpus)
    pub fn clear(&mut self) -> Result<(), KeywordIndexError> {
        self.writer
            .delete_all_documents()
            .map_err(|e| KeywordIndexError::InsertError(e.to_string()))?;
        self.commit()?;
        Ok(())
    }

    /// Number of indexed documents
    pub fn len(&self) -> u64 {
        let searcher = self.reader.searcher();
        searcher.num_docs()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_index_creation() {
        let temp = TempDir::new().unwrap();
        let index = KeywordIndex::open(temp.path().join("kw")).unwrap();
        assert_eq!(index.len(), 0);
        assert!(index.is_empty());
    }

    #[test]
    fn test_insert_and_search() {
        let temp = TempDir::new().unwrap();
        let mut index = KeywordIndex::open(temp.path().join("kw")).unwrap();

        index
            .insert(1, "Carbon intensity measures emissions per million dollars of revenue")
            .unwrap();
        index
            .insert(2, "Financed emissions attribute a company's footprint to investors")
            .unwrap();
        index
            .insert(3, "The Sharpe ratio is a risk-adjusted return measure")
            .unwrap();

        index.commit().unwrap();
        assert_eq!(index.len(), 3);

        let results = index.search("emissions", 10).unwrap();
        assert_eq!(results.len(), 2);
        assert!(results[0].score > 0.0);

        let results = index.search("sharpe", 10).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, 3);
    }

    #[test]
    fn test_malformed_query_degrades_to_empty() {
        let temp = TempDir::new().unwrap();
        let mut index = KeywordIndex::open(temp.path().join("kw")).unwrap();
        index.insert(1, "some text").unwrap();
        index.commit().unwrap();

        let results = index.search("AND OR (((", 10).unwrap();
        assert!(results.is_empty());
    }

    #[test]
    fn test_reload_from_directory() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("kw");

        {
            let mut index = KeywordIndex::open(path.clone()).unwrap();
            index.insert(1, "portfolio volatility").unwrap();
            index.commit().unwrap();
        }

        {
            let index = KeywordIndex::open(path).unwrap();
            assert_eq!(index.len(), 1);
            let results = index.search("volatility", 10).unwrap();
            assert_eq!(results.len(), 1);
        }
    }

    #[test]
    fn test_clear() {
        let temp = TempDir::new().unwrap();
        let mut index = KeywordIndex::open(temp.path().join("kw")).unwrap();

        index.insert(1, "one").unwrap();
        index.insert(2, "two").unwrap();
        index.commit().unwrap();
        assert_eq!(index.len(), 2);

        index.clear().unwrap();
        assert_eq!(index.len(), 0);
    }
}
