//! A term→postings inverted index over an in-memory document store, with
//! on-disk persistence gated by a dirty flag: `save` is a no-op unless the
//! store has changed since the last save, the same convention a
//! repo's filter-segment store uses for its `sync` call.
use std::collections::HashMap;
use std::fs;
use std::io::{Read, Write};
use std::path::Path;

use crate::error::IndexError;

/// Default cap on a single document's content length.
pub const DEFAULT_MAX_CONTENT_LEN: usize = 1 << 20; // 1 MiB.

const MAGIC: u32 = 0x4F4D_4553; // "OMES"
const VERSION: u32 = 1;

/// A single search hit: a document id and its score against the query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Posting {
    /// The document id.
    pub doc_id: u64,
    /// Term-frequency-derived score (plain term-frequency sum,
    /// not otherwise specified by spec.md).
    pub score: u32,
}

/// The local inverted index and document store.
#[derive(Debug, Default)]
pub struct Index {
    documents: HashMap<u64, String>,
    postings: HashMap<String, Vec<(u64, u32)>>,
    dirty: bool,
    max_content_len: usize,
}

impl Index {
    /// A fresh, empty index.
    pub fn new() -> Self {
        Self {
            documents: HashMap::new(),
            postings: HashMap::new(),
            dirty: false,
            max_content_len: DEFAULT_MAX_CONTENT_LEN,
        }
    }

    /// Number of documents currently indexed.
    pub fn len(&self) -> usize {
        self.documents.len()
    }

    /// Whether the index holds no documents.
    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    /// Whether the index has unsaved changes.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Index (or re-index) a document's content under `doc_id`.
    pub fn index_local(&mut self, doc_id: u64, content: &str) -> Result<(), IndexError> {
        if content.len() > self.max_content_len {
            return Err(IndexError::ContentTooLarge {
                len: content.len(),
                limit: self.max_content_len,
            });
        }
        if self.documents.contains_key(&doc_id) {
            self.remove_from_postings(doc_id);
        }
        self.documents.insert(doc_id, content.to_string());
        for (term, freq) in term_frequencies(content) {
            self.postings.entry(term).or_default().push((doc_id, freq));
        }
        self.dirty = true;
        Ok(())
    }

    /// Remove a document (mesh INDEX message with `operation = DELETE`).
    pub fn delete_local(&mut self, doc_id: u64) -> Result<(), IndexError> {
        if self.documents.remove(&doc_id).is_none() {
            return Err(IndexError::NotFound(doc_id));
        }
        self.remove_from_postings(doc_id);
        self.dirty = true;
        Ok(())
    }

    fn remove_from_postings(&mut self, doc_id: u64) {
        self.postings.retain(|_, postings| {
            postings.retain(|(id, _)| *id != doc_id);
            !postings.is_empty()
        });
    }

    /// Execute a term-matching query, returning at most `max_results` hits
    /// ordered by descending score (ties broken by ascending doc id for a
    /// stable order).
    pub fn query(&self, query: &str, max_results: usize) -> Vec<Posting> {
        let mut scores: HashMap<u64, u32> = HashMap::new();
        for term in tokenize(query) {
            if let Some(postings) = self.postings.get(&term) {
                for &(doc_id, freq) in postings {
                    *scores.entry(doc_id).or_insert(0) += freq;
                }
            }
        }
        let mut hits: Vec<Posting> = scores
            .into_iter()
            .map(|(doc_id, score)| Posting { doc_id, score })
            .collect();
        hits.sort_by(|a, b| b.score.cmp(&a.score).then(a.doc_id.cmp(&b.doc_id)));
        hits.truncate(max_results);
        hits
    }

    /// Write the store to `path` if (and only if) it has unsaved changes.
    pub fn save(&mut self, path: &Path) -> Result<(), IndexError> {
        if !self.dirty {
            return Ok(());
        }
        let mut out = Vec::new();
        out.extend_from_slice(&MAGIC.to_le_bytes());
        out.extend_from_slice(&VERSION.to_le_bytes());
        out.extend_from_slice(&(self.documents.len() as u32).to_le_bytes());

        let mut docs: Vec<_> = self.documents.iter().collect();
        docs.sort_by_key(|(id, _)| **id);
        for (doc_id, content) in docs {
            out.extend_from_slice(&doc_id.to_le_bytes());
            out.extend_from_slice(&(content.len() as u32).to_le_bytes());
            out.extend_from_slice(content.as_bytes());
        }

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = fs::File::create(path)?;
        file.write_all(&out)?;
        self.dirty = false;
        log::debug!(target: "index", "saved {} document(s) to {}", self.documents.len(), path.display());
        Ok(())
    }

    /// Load a store previously written by [`Index::save`]. Unlike the peer
    /// list, a magic/version mismatch here is surfaced as an
    /// error rather than silently yielding an empty index, since losing an
    /// entire document corpus silently would be a much larger surprise than
    /// losing a peer cache.
    pub fn load(path: &Path) -> Result<Self, IndexError> {
        let mut file = fs::File::open(path)?;
        let mut bytes = Vec::new();
        file.read_to_end(&mut bytes)?;

        let mut pos = 0;
        let magic = read_u32(&bytes, &mut pos)?;
        let version = read_u32(&bytes, &mut pos)?;
        if magic != MAGIC {
            return Err(IndexError::Corrupt(format!("bad magic {magic:#x}")));
        }
        if version != VERSION {
            return Err(IndexError::Corrupt(format!("unsupported version {version}")));
        }
        let count = read_u32(&bytes, &mut pos)?;

        let mut index = Self::new();
        for _ in 0..count {
            let doc_id = read_u64(&bytes, &mut pos)?;
            let len = read_u32(&bytes, &mut pos)? as usize;
            let content = bytes
                .get(pos..pos + len)
                .ok_or_else(|| IndexError::Corrupt("truncated document content".to_string()))?;
            let content = std::str::from_utf8(content)
                .map_err(|_| IndexError::Corrupt("document content is not utf-8".to_string()))?
                .to_string();
            pos += len;
            index.index_local(doc_id, &content).map_err(|_| {
                IndexError::Corrupt("document exceeds content length limit on reload".to_string())
            })?;
        }
        index.dirty = false;
        log::info!(target: "index", "loaded {} document(s) from {}", index.documents.len(), path.display());
        Ok(index)
    }
}

fn read_u32(bytes: &[u8], pos: &mut usize) -> Result<u32, IndexError> {
    let slice = bytes
        .get(*pos..*pos + 4)
        .ok_or_else(|| IndexError::Corrupt("truncated u32 field".to_string()))?;
    *pos += 4;
    Ok(u32::from_le_bytes(slice.try_into().unwrap()))
}

fn read_u64(bytes: &[u8], pos: &mut usize) -> Result<u64, IndexError> {
    let slice = bytes
        .get(*pos..*pos + 8)
        .ok_or_else(|| IndexError::Corrupt("truncated u64 field".to_string()))?;
    *pos += 8;
    Ok(u64::from_le_bytes(slice.try_into().unwrap()))
}

fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_lowercase())
        .collect()
}

fn term_frequencies(content: &str) -> HashMap<String, u32> {
    let mut freqs = HashMap::new();
    for term in tokenize(content) {
        *freqs.entry(term).or_insert(0) += 1;
    }
    freqs
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn indexing_then_querying_finds_the_document() {
        let mut index = Index::new();
        index.index_local(1, "hello world").unwrap();

        let hits = index.query("hello", 10);
        assert_eq!(hits, vec![Posting { doc_id: 1, score: 1 }]);
    }

    #[test]
    fn query_is_case_insensitive_and_ignores_punctuation() {
        let mut index = Index::new();
        index.index_local(1, "Hello, World!").unwrap();

        assert_eq!(index.query("hello", 10).len(), 1);
        assert_eq!(index.query("WORLD", 10).len(), 1);
    }

    #[test]
    fn results_are_ordered_by_descending_score() {
        let mut index = Index::new();
        index.index_local(1, "rust rust rust").unwrap();
        index.index_local(2, "rust").unwrap();

        let hits = index.query("rust", 10);
        assert_eq!(hits[0].doc_id, 1);
        assert_eq!(hits[1].doc_id, 2);
        assert!(hits[0].score > hits[1].score);
    }

    #[test]
    fn max_results_truncates_the_hit_list() {
        let mut index = Index::new();
        for id in 1..=5u64 {
            index.index_local(id, "match").unwrap();
        }
        assert_eq!(index.query("match", 2).len(), 2);
    }

    #[test]
    fn delete_removes_document_from_results() {
        let mut index = Index::new();
        index.index_local(1, "alpha").unwrap();
        index.delete_local(1).unwrap();

        assert!(index.query("alpha", 10).is_empty());
        assert!(index.delete_local(1).is_err());
    }

    #[test]
    fn reindexing_a_doc_id_replaces_its_old_postings() {
        let mut index = Index::new();
        index.index_local(1, "alpha").unwrap();
        index.index_local(1, "beta").unwrap();

        assert!(index.query("alpha", 10).is_empty());
        assert_eq!(index.query("beta", 10).len(), 1);
    }

    #[test]
    fn oversized_content_is_rejected() {
        let mut index = Index::new();
        index.max_content_len = 4;
        let err = index.index_local(1, "way too long").unwrap_err();
        assert!(matches!(err, IndexError::ContentTooLarge { .. }));
    }

    #[test]
    fn save_is_a_no_op_when_not_dirty() {
        let dir = std::env::temp_dir().join(format!("omesh-index-test-{}", fastrand_u64()));
        let path = dir.join("index.db");
        let mut index = Index::new();
        // Never indexed anything: not dirty.
        index.save(&path).unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn save_and_load_round_trip_documents_and_postings() {
        let dir = std::env::temp_dir().join(format!("omesh-index-test-{}", fastrand_u64()));
        let path = dir.join("index.db");

        let mut index = Index::new();
        index.index_local(1, "hello world").unwrap();
        index.index_local(2, "goodbye world").unwrap();
        index.save(&path).unwrap();
        assert!(!index.is_dirty());

        let loaded = Index::load(&path).unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded.query("world", 10).len(), 2);
        assert_eq!(loaded.query("hello", 10), vec![Posting { doc_id: 1, score: 1 }]);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn load_rejects_bad_magic() {
        let dir = std::env::temp_dir().join(format!("omesh-index-test-{}", fastrand_u64()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("garbage.db");
        std::fs::write(&path, b"not an index file").unwrap();

        assert!(Index::load(&path).is_err());
        let _ = std::fs::remove_dir_all(&dir);
    }

    fn fastrand_u64() -> u64 {
        // Avoid a test-only dependency; a coarse time-based salt is enough
        // to keep parallel test temp-dirs from colliding.
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos() as u64
    }
}
