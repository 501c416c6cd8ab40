//! Cascading multi-strategy resolution.
//!
//! A specific entity type is searched with a fixed sequence of strategies,
//! stopping at the first that returns anything. A request without a type
//! fans out over a short priority list of types and accumulates whatever
//! matches. Nothing found means an empty result: the resolver never
//! substitutes recent or sample records.

use crate::classifier::is_id_token;
use crate::error::ResolveError;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use snowline_core::{
    Condition, EntityType, EntityTypeMap, Intent, OperationContext, QueryFilter, Record,
    ResolverConfig,
};
use snowline_store::{RecordStore, StoreError};
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Which strategy produced a match. Ordered from most to least precise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchStrategy {
    RecordId,
    ExactName,
    NameContains,
    Description,
    Composite,
    FirstTerm,
    Listing,
}

/// A matched record tagged with where it came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedRecord {
    pub entity_type: EntityType,
    pub collection: String,
    pub strategy: MatchStrategy,
    pub record: Record,
}

/// Outcome of one resolution.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Resolution {
    pub records: Vec<ResolvedRecord>,
    /// Most precise strategy that matched, if any.
    pub strategy: Option<MatchStrategy>,
    /// Remote calls issued.
    pub queries_issued: usize,
    /// Types skipped on the `any` path because their queries failed.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub skipped_types: Vec<String>,
}

impl Resolution {
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// A resolvable entity type with its collection and name field.
#[derive(Debug, Clone)]
struct Target {
    entity_type: EntityType,
    collection: String,
    name_field: String,
}

/// Ordered search strategies for one identifier against one name field.
pub fn cascade_plan(name_field: &str, identifier: &str) -> Vec<(MatchStrategy, QueryFilter)> {
    let identifier = identifier.trim();
    let terms: Vec<&str> = identifier.split_whitespace().collect();
    let (Some(first), Some(last)) = (terms.first().copied(), terms.last().copied()) else {
        return Vec::new();
    };

    let mut plan = vec![
        (
            MatchStrategy::ExactName,
            QueryFilter::condition(Condition::equals(name_field, identifier)),
        ),
        (
            MatchStrategy::NameContains,
            QueryFilter::condition(Condition::contains(name_field, identifier)),
        ),
        (
            MatchStrategy::Description,
            QueryFilter::any_of([
                Condition::contains("short_description", identifier),
                Condition::contains("description", identifier),
            ]),
        ),
    ];

    if terms.len() > 1 {
        plan.push((
            MatchStrategy::Composite,
            QueryFilter::any_of([
                Condition::equals(name_field, identifier),
                Condition::contains(name_field, identifier),
                Condition::starts_with(name_field, first),
                Condition::ends_with(name_field, last),
            ]),
        ));
    }

    plan.push((MatchStrategy::FirstTerm, first_term_filter(name_field, first)));
    plan
}

/// The first term anywhere in the name, title or description fields.
fn first_term_filter(name_field: &str, first: &str) -> QueryFilter {
    QueryFilter::any_of([
        Condition::contains(name_field, first),
        Condition::contains("title", first),
        Condition::contains("short_description", first),
        Condition::contains("description", first),
    ])
}

/// Resolves intents to remote records.
#[derive(Clone)]
pub struct CascadingResolver {
    store: Arc<dyn RecordStore>,
    entity_map: EntityTypeMap,
    config: ResolverConfig,
}

impl CascadingResolver {
    pub fn new(store: Arc<dyn RecordStore>, entity_map: EntityTypeMap, config: ResolverConfig) -> Self {
        Self {
            store,
            entity_map,
            config,
        }
    }

    pub fn entity_map(&self) -> &EntityTypeMap {
        &self.entity_map
    }

    pub fn store(&self) -> &Arc<dyn RecordStore> {
        &self.store
    }

    /// Resolve an intent.
    ///
    /// Fails only for an unregistered, non-`any` entity type, a remote
    /// failure on a single-type search, or the deadline passing.
    pub async fn resolve(
        &self,
        ctx: &OperationContext,
        intent: &Intent,
    ) -> Result<Resolution, ResolveError> {
        let mut timeout = Duration::from_millis(self.config.timeout_ms);
        if let Some(remaining) = ctx.remaining() {
            timeout = timeout.min(remaining);
        }

        let queries = AtomicUsize::new(0);
        let mut resolution = tokio::time::timeout(timeout, self.resolve_inner(intent, &queries))
            .await
            .map_err(|_| ResolveError::Timeout(timeout))??;
        resolution.queries_issued = queries.load(Ordering::SeqCst);

        tracing::debug!(
            request_id = %ctx.request_id,
            entity_type = %intent.entity_type,
            identifier = %intent.identifier,
            matches = resolution.records.len(),
            strategy = ?resolution.strategy,
            queries = resolution.queries_issued,
            "Resolved intent"
        );
        Ok(resolution)
    }

    /// Records of a collection whose name field equals `name` exactly.
    pub async fn find_exact(
        &self,
        collection: &str,
        name_field: &str,
        name: &str,
    ) -> Result<Vec<Record>, StoreError> {
        let filter = QueryFilter::condition(Condition::equals(name_field, name));
        self.store
            .query(collection, &filter, self.config.per_type_limit)
            .await
    }

    async fn resolve_inner(
        &self,
        intent: &Intent,
        queries: &AtomicUsize,
    ) -> Result<Resolution, ResolveError> {
        if intent.entity_type.is_any() {
            let targets = self.fanout_targets();
            return if intent.wants_listing() {
                self.fan_out(&targets, |t| self.list(t, queries)).await
            } else if is_id_token(intent.identifier.trim()) {
                let id = intent.identifier.trim();
                self.fan_out(&targets, |t| self.by_id(t, id, queries)).await
            } else {
                self.resolve_any(&targets, intent, queries).await
            };
        }

        let target = self.target(&intent.entity_type)?;
        let records = if intent.wants_listing() {
            self.list(&target, queries).await?
        } else if is_id_token(intent.identifier.trim()) {
            self.by_id(&target, intent.identifier.trim(), queries).await?
        } else {
            self.cascade(&target, &intent.identifier, queries).await?
        };
        Ok(resolution_of(records, Vec::new()))
    }

    /// Specific-type cascade: first non-empty strategy wins.
    async fn cascade(
        &self,
        target: &Target,
        identifier: &str,
        queries: &AtomicUsize,
    ) -> Result<Vec<ResolvedRecord>, StoreError> {
        for (strategy, filter) in cascade_plan(&target.name_field, identifier) {
            let records = self
                .query(target, &filter, self.config.result_limit, queries)
                .await?;
            if !records.is_empty() {
                return Ok(tag(target, strategy, records));
            }
        }
        Ok(Vec::new())
    }

    /// Untyped search: exact then contains per type, then one broad pass.
    async fn resolve_any(
        &self,
        targets: &[Target],
        intent: &Intent,
        queries: &AtomicUsize,
    ) -> Result<Resolution, ResolveError> {
        let identifier = intent.identifier.trim();
        let resolution = self
            .fan_out(targets, |t| self.exact_then_contains(t, identifier, queries))
            .await?;
        if !resolution.is_empty() {
            return Ok(resolution);
        }

        let Some(first) = intent.first_term() else {
            return Ok(resolution);
        };
        self.fan_out(targets, |t| async move {
            let filter = first_term_filter(&t.name_field, first);
            let records = self
                .query(t, &filter, self.config.per_type_limit, queries)
                .await?;
            Ok(tag(t, MatchStrategy::FirstTerm, records))
        })
        .await
    }

    async fn exact_then_contains(
        &self,
        target: &Target,
        identifier: &str,
        queries: &AtomicUsize,
    ) -> Result<Vec<ResolvedRecord>, StoreError> {
        let limit = self.config.per_type_limit;
        let exact = QueryFilter::condition(Condition::equals(&target.name_field, identifier));
        let records = self.query(target, &exact, limit, queries).await?;
        if !records.is_empty() {
            return Ok(tag(target, MatchStrategy::ExactName, records));
        }

        let contains = QueryFilter::condition(Condition::contains(&target.name_field, identifier));
        let records = self.query(target, &contains, limit, queries).await?;
        Ok(tag(target, MatchStrategy::NameContains, records))
    }

    /// One ordered page of a collection.
    async fn list(
        &self,
        target: &Target,
        queries: &AtomicUsize,
    ) -> Result<Vec<ResolvedRecord>, StoreError> {
        let filter = QueryFilter::all().order_by(&target.name_field);
        let records = self
            .query(target, &filter, self.config.list_page_size, queries)
            .await?;
        Ok(tag(target, MatchStrategy::Listing, records))
    }

    async fn by_id(
        &self,
        target: &Target,
        id: &str,
        queries: &AtomicUsize,
    ) -> Result<Vec<ResolvedRecord>, StoreError> {
        queries.fetch_add(1, Ordering::SeqCst);
        let record = self.store.get(&target.collection, id).await?;
        Ok(tag(target, MatchStrategy::RecordId, record.into_iter().collect()))
    }

    /// Run `search` for every target concurrently and merge the hits.
    ///
    /// A failing type is skipped and reported; the fan-out only fails when
    /// every type failed.
    async fn fan_out<'a, F, Fut>(
        &'a self,
        targets: &'a [Target],
        search: F,
    ) -> Result<Resolution, ResolveError>
    where
        F: Fn(&'a Target) -> Fut,
        Fut: Future<Output = Result<Vec<ResolvedRecord>, StoreError>>,
    {
        let outcomes = join_all(targets.iter().map(&search)).await;

        let mut records = Vec::new();
        let mut skipped = Vec::new();
        let mut first_error = None;
        for (target, outcome) in targets.iter().zip(outcomes) {
            match outcome {
                Ok(found) => records.extend(found),
                Err(e) => {
                    tracing::warn!(
                        entity_type = %target.entity_type,
                        collection = %target.collection,
                        error = %e,
                        "Skipping entity type after remote failure"
                    );
                    skipped.push(target.entity_type.to_string());
                    first_error.get_or_insert(e);
                }
            }
        }

        if skipped.len() == targets.len() {
            if let Some(error) = first_error {
                return Err(error.into());
            }
        }
        Ok(resolution_of(dedupe(records), skipped))
    }

    async fn query(
        &self,
        target: &Target,
        filter: &QueryFilter,
        limit: usize,
        queries: &AtomicUsize,
    ) -> Result<Vec<Record>, StoreError> {
        queries.fetch_add(1, Ordering::SeqCst);
        tracing::debug!(
            collection = %target.collection,
            filter = %filter,
            limit,
            "Querying record store"
        );
        self.store.query(&target.collection, filter, limit).await
    }

    fn target(&self, entity_type: &EntityType) -> Result<Target, ResolveError> {
        let mapping = self
            .entity_map
            .get(entity_type)
            .ok_or_else(|| ResolveError::UnknownEntityType(entity_type.to_string()))?;
        Ok(Target {
            entity_type: entity_type.clone(),
            collection: mapping.collection.clone(),
            name_field: mapping.name_field.clone(),
        })
    }

    fn fanout_targets(&self) -> Vec<Target> {
        self.config
            .any_type_fanout
            .iter()
            .filter_map(|tag| {
                let target = self.target(&EntityType::new(tag));
                if target.is_err() {
                    tracing::warn!(entity_type = %tag, "Fan-out type has no collection mapping");
                }
                target.ok()
            })
            .collect()
    }
}

fn tag(target: &Target, strategy: MatchStrategy, records: Vec<Record>) -> Vec<ResolvedRecord> {
    records
        .into_iter()
        .map(|record| ResolvedRecord {
            entity_type: target.entity_type.clone(),
            collection: target.collection.clone(),
            strategy,
            record,
        })
        .collect()
}

/// Drop repeated (collection, id) pairs, keeping the first.
fn dedupe(records: Vec<ResolvedRecord>) -> Vec<ResolvedRecord> {
    let mut seen = HashSet::new();
    records
        .into_iter()
        .filter(|r| match r.record.id() {
            Some(id) => seen.insert((r.collection.clone(), id.to_string())),
            None => true,
        })
        .collect()
}

fn resolution_of(records: Vec<ResolvedRecord>, skipped_types: Vec<String>) -> Resolution {
    Resolution {
        strategy: records.iter().map(|r| r.strategy).min(),
        records,
        queries_issued: 0,
        skipped_types,
    }
}
