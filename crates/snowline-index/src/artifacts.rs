//! Persistent artifact index.

use crate::documents::DocumentDir;
use crate::error::IndexError;
use snowline_core::{EntityType, IndexedArtifact};
use std::path::{Path, PathBuf};

/// Previously resolved artifacts, one document per record id.
///
/// Documents never expire; a re-index of the same id overwrites the previous
/// document in full.
#[derive(Debug, Clone)]
pub struct ArtifactIndex {
    docs: DocumentDir,
}

impl ArtifactIndex {
    pub fn open(root: impl AsRef<Path>) -> Result<Self, IndexError> {
        Ok(Self {
            docs: DocumentDir::open(root)?,
        })
    }

    pub fn root(&self) -> &Path {
        self.docs.root()
    }

    /// Store an artifact under its id.
    pub fn put(&self, artifact: &IndexedArtifact) -> Result<PathBuf, IndexError> {
        let path = self.docs.write(&artifact.id, artifact)?;
        tracing::debug!(
            id = %artifact.id,
            entity_type = %artifact.entity_type,
            name = %artifact.name,
            "Indexed artifact"
        );
        Ok(path)
    }

    /// The artifact with this id, if indexed.
    pub fn get(&self, id: &str) -> Result<Option<IndexedArtifact>, IndexError> {
        self.docs.read(id)
    }

    /// Every indexed artifact satisfying `predicate`, unordered.
    ///
    /// Corrupt documents are skipped with a warning.
    pub fn find_all<P>(&self, predicate: P) -> Result<Vec<IndexedArtifact>, IndexError>
    where
        P: Fn(&IndexedArtifact) -> bool,
    {
        Ok(self
            .docs
            .scan::<IndexedArtifact>()?
            .into_iter()
            .filter(|a| predicate(a))
            .collect())
    }

    /// Artifacts whose name, title or summary contains `term`, optionally of one type.
    ///
    /// `any` (or `None`) places no restriction on type.
    pub fn search(
        &self,
        term: &str,
        entity_type: Option<&EntityType>,
    ) -> Result<Vec<IndexedArtifact>, IndexError> {
        let entity_type = entity_type.filter(|t| !t.is_any());
        self.find_all(|artifact| {
            entity_type.is_none_or(|t| &artifact.entity_type == t) && artifact.matches_term(term)
        })
    }

    /// Drop an artifact from the index. Returns whether it was present.
    pub fn remove(&self, id: &str) -> Result<bool, IndexError> {
        self.docs.remove(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::fs;
    use tempfile::TempDir;

    fn artifact(id: &str, name: &str, entity_type: &str) -> IndexedArtifact {
        IndexedArtifact {
            id: id.to_string(),
            name: name.to_string(),
            title: None,
            entity_type: EntityType::new(entity_type),
            collection: "sp_widget".to_string(),
            last_updated: None,
            structure: serde_json::Value::Null,
            context_notes: Vec::new(),
            relationships: Vec::new(),
            summary: format!("{} summary", name),
            modification_points: Vec::new(),
            indexed_at: Utc::now(),
        }
    }

    #[test]
    fn test_put_twice_leaves_one_document() {
        let dir = TempDir::new().unwrap();
        let index = ArtifactIndex::open(dir.path()).unwrap();

        let mut first = artifact("a1", "Cart", "widget");
        index.put(&first).unwrap();
        first.summary = "Second pass".to_string();
        index.put(&first).unwrap();

        let all = index.find_all(|_| true).unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].summary, "Second pass");
        assert_eq!(index.get("a1").unwrap(), Some(first));
    }

    #[test]
    fn test_search_by_term_and_type() {
        let dir = TempDir::new().unwrap();
        let index = ArtifactIndex::open(dir.path()).unwrap();
        index.put(&artifact("a1", "Cart Summary", "widget")).unwrap();
        index.put(&artifact("a2", "Cart Helper", "script_include")).unwrap();
        index.put(&artifact("a3", "Header", "widget")).unwrap();

        assert_eq!(index.search("cart", None).unwrap().len(), 2);
        assert_eq!(index.search("cart", Some(&EntityType::any())).unwrap().len(), 2);

        let widgets = index.search("CART", Some(&EntityType::new("widget"))).unwrap();
        assert_eq!(widgets.len(), 1);
        assert_eq!(widgets[0].id, "a1");
    }

    #[test]
    fn test_find_all_tolerates_corrupt_documents() {
        let dir = TempDir::new().unwrap();
        let index = ArtifactIndex::open(dir.path()).unwrap();
        index.put(&artifact("a1", "Cart", "widget")).unwrap();
        index.put(&artifact("a2", "Header", "widget")).unwrap();
        fs::write(dir.path().join("broken.json"), "{\"id\": 3").unwrap();

        let all = index.find_all(|_| true).unwrap();
        assert_eq!(all.len(), 2);
    }
}
