//! Cache-first discovery: classify, look in the index, resolve remotely on a
//! miss, and index whatever was found.

use crate::cascade::{CascadingResolver, MatchStrategy};
use crate::classifier::{IntentClassifier, is_id_token};
use crate::error::ResolveError;
use crate::indexer::ArtifactIndexer;
use serde::{Deserialize, Serialize};
use snowline_core::{EntityType, IndexedArtifact, Intent, OperationContext, Record};
use snowline_index::ArtifactIndex;

/// Where a discovery answer came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscoverySource {
    /// Answered from the local index without remote calls.
    Index,
    /// Resolved against the record store.
    Remote,
}

/// Whether the local index may answer a request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LookupMode {
    #[default]
    CacheFirst,
    /// Always go to the record store, then re-index.
    Refresh,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Discovery {
    pub intent: Intent,
    pub source: DiscoverySource,
    pub artifacts: Vec<IndexedArtifact>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strategy: Option<MatchStrategy>,
    pub queries_issued: usize,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub skipped_types: Vec<String>,
}

impl Discovery {
    pub fn is_empty(&self) -> bool {
        self.artifacts.is_empty()
    }
}

pub struct DiscoveryService {
    classifier: IntentClassifier,
    resolver: CascadingResolver,
    indexer: ArtifactIndexer,
    index: ArtifactIndex,
}

impl DiscoveryService {
    pub fn new(resolver: CascadingResolver, index: ArtifactIndex) -> Self {
        Self {
            classifier: IntentClassifier::new(),
            indexer: ArtifactIndexer::new(resolver.entity_map().clone()),
            resolver,
            index,
        }
    }

    pub fn classify(&self, query: &str) -> Intent {
        self.classifier.classify(query)
    }

    pub fn resolver(&self) -> &CascadingResolver {
        &self.resolver
    }

    pub fn index(&self) -> &ArtifactIndex {
        &self.index
    }

    /// Classify a free-text request and resolve it cache-first.
    pub async fn discover(
        &self,
        ctx: &OperationContext,
        query: &str,
    ) -> Result<Discovery, ResolveError> {
        let intent = self.classify(query);
        tracing::info!(
            request_id = %ctx.request_id,
            entity_type = %intent.entity_type,
            identifier = %intent.identifier,
            action = %intent.action,
            confidence = intent.confidence,
            "Classified request"
        );
        self.resolve(ctx, intent, LookupMode::CacheFirst).await
    }

    /// Resolve an already classified intent.
    pub async fn resolve(
        &self,
        ctx: &OperationContext,
        intent: Intent,
        mode: LookupMode,
    ) -> Result<Discovery, ResolveError> {
        if !intent.entity_type.is_any() && !self.resolver.entity_map().contains(&intent.entity_type) {
            return Err(ResolveError::UnknownEntityType(intent.entity_type.to_string()));
        }

        if mode == LookupMode::CacheFirst && !intent.wants_listing() {
            let cached = self.lookup_index(&intent)?;
            if !cached.is_empty() {
                tracing::info!(
                    request_id = %ctx.request_id,
                    hits = cached.len(),
                    "Answered from index"
                );
                return Ok(Discovery {
                    intent,
                    source: DiscoverySource::Index,
                    artifacts: cached,
                    strategy: None,
                    queries_issued: 0,
                    skipped_types: Vec::new(),
                });
            }
        }

        let resolution = self.resolver.resolve(ctx, &intent).await?;
        let artifacts: Vec<IndexedArtifact> = resolution
            .records
            .iter()
            .map(|resolved| self.indexer.index_resolved(resolved))
            .collect();
        for artifact in &artifacts {
            if let Err(e) = self.index.put(artifact) {
                tracing::warn!(id = %artifact.id, error = %e, "Failed to write index document");
            }
        }

        tracing::info!(
            request_id = %ctx.request_id,
            matches = artifacts.len(),
            strategy = ?resolution.strategy,
            queries = resolution.queries_issued,
            "Resolved against record store"
        );
        Ok(Discovery {
            intent,
            source: DiscoverySource::Remote,
            artifacts,
            strategy: resolution.strategy,
            queries_issued: resolution.queries_issued,
            skipped_types: resolution.skipped_types,
        })
    }

    /// Fetch one record by id and (re-)index it.
    pub async fn analyze(
        &self,
        ctx: &OperationContext,
        entity_type: &EntityType,
        id: &str,
    ) -> Result<IndexedArtifact, ResolveError> {
        let collection = self.collection_for(entity_type)?;
        let record = self
            .resolver
            .store()
            .get(&collection, id)
            .await?
            .ok_or_else(|| ResolveError::RecordNotFound {
                collection: collection.clone(),
                id: id.to_string(),
            })?;

        let artifact = self.analyze_record(entity_type, Some(&collection), &record)?;
        tracing::info!(request_id = %ctx.request_id, id = %artifact.id, "Analyzed artifact");
        Ok(artifact)
    }

    /// Index a record supplied by the caller.
    pub fn analyze_record(
        &self,
        entity_type: &EntityType,
        collection: Option<&str>,
        record: &Record,
    ) -> Result<IndexedArtifact, ResolveError> {
        let collection = match collection {
            Some(collection) => collection.to_string(),
            None => self.collection_for(entity_type)?,
        };
        let artifact = self.indexer.index(entity_type, &collection, record);
        self.index.put(&artifact)?;
        Ok(artifact)
    }

    /// Substring search over the local index only.
    pub fn search_index(
        &self,
        term: &str,
        entity_type: Option<&EntityType>,
    ) -> Result<Vec<IndexedArtifact>, ResolveError> {
        Ok(self.index.search(term, entity_type)?)
    }

    fn lookup_index(&self, intent: &Intent) -> Result<Vec<IndexedArtifact>, ResolveError> {
        let identifier = intent.identifier.trim();
        if is_id_token(identifier) {
            let hit = self.index.get(identifier)?.filter(|a| {
                intent.entity_type.is_any() || a.entity_type == intent.entity_type
            });
            return Ok(hit.into_iter().collect());
        }
        Ok(self.index.search(identifier, Some(&intent.entity_type))?)
    }

    fn collection_for(&self, entity_type: &EntityType) -> Result<String, ResolveError> {
        if entity_type.is_any() {
            return Err(ResolveError::InvalidRequest(
                "an entity type is required to address a record".to_string(),
            ));
        }
        self.resolver
            .entity_map()
            .collection(entity_type)
            .map(str::to_string)
            .ok_or_else(|| ResolveError::UnknownEntityType(entity_type.to_string()))
    }
}
