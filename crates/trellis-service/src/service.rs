use std::sync::{Arc, PoisonError, RwLock};

use tokio_util::sync::CancellationToken;
use trellis_core::engine::{CheckEngine, CheckRequest, CheckResult, EngineConfig};
use trellis_core::schema::{
    BreakingChange, SchemaLimits, SchemaRegistry, detect_breaking_changes, parse_schema,
    validate_schema_limits,
};
use trellis_core::tuple::{ObjectRef, SnapshotToken, SubjectRef, Tuple, TupleFilter, TupleWrite};
use trellis_storage::RelationshipStore;

use crate::adapter::StoreTupleReader;
use crate::config::AppConfig;
use crate::error::ApiError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Consistency {
    /// Pin the store's latest revision for the whole check.
    FullConsistency,
    /// Use whatever revision is current. A check still pins it once so that
    /// every read inside the evaluation agrees; plain reads are not pinned.
    MinimizeLatency,
    /// Read at a token previously returned by a write.
    AtSnapshot(SnapshotToken),
}

#[derive(Debug)]
pub struct CheckPermissionInput {
    pub subject: SubjectRef,
    pub permission: String,
    pub object_type: String,
    pub object_id: String,
    pub consistency: Consistency,
}

#[derive(Debug)]
pub struct CheckPermissionOutput {
    pub allowed: bool,
    /// Revision every read of the check was served at.
    pub snapshot: SnapshotToken,
}

#[derive(Debug)]
pub struct ReloadSchemaOutput {
    pub type_count: usize,
    /// Breaking changes applied because the reload was forced.
    pub breaking_changes_overridden: Vec<BreakingChange>,
}

/// The check API over one relationship store and one live schema.
pub struct AuthzService<S: RelationshipStore> {
    store: Arc<S>,
    registry: RwLock<Arc<SchemaRegistry>>,
    engine_config: EngineConfig,
    schema_limits: SchemaLimits,
}

impl<S: RelationshipStore> AuthzService<S> {
    pub fn new(
        store: Arc<S>,
        registry: SchemaRegistry,
        engine_config: EngineConfig,
        schema_limits: SchemaLimits,
    ) -> Self {
        Self {
            store,
            registry: RwLock::new(Arc::new(registry)),
            engine_config,
            schema_limits,
        }
    }

    /// Builds the service from configuration, compiling the schema file it
    /// names. Without one the service starts with an empty schema.
    pub fn from_config(store: Arc<S>, config: &AppConfig) -> Result<Self, ApiError> {
        let schema_limits = config.to_schema_limits();
        let registry = match config.schema.path {
            Some(ref path) => {
                let text = std::fs::read_to_string(path).map_err(|e| ApiError::SchemaFile {
                    path: path.display().to_string(),
                    reason: e.to_string(),
                })?;
                let registry = compile_schema(&text, &schema_limits)?;
                tracing::info!(path = %path.display(), "loaded schema");
                registry
            }
            None => SchemaRegistry::default(),
        };

        Ok(Self::new(
            store,
            registry,
            config.to_engine_config(),
            schema_limits,
        ))
    }

    /// The registry checks started now will use.
    pub fn registry(&self) -> Arc<SchemaRegistry> {
        let current = self.registry.read().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(&current)
    }

    pub async fn check_permission(
        &self,
        input: CheckPermissionInput,
    ) -> Result<CheckPermissionOutput, ApiError> {
        self.check_permission_with_cancel(input, CancellationToken::new())
            .await
    }

    pub async fn check_permission_with_cancel(
        &self,
        input: CheckPermissionInput,
        cancel: CancellationToken,
    ) -> Result<CheckPermissionOutput, ApiError> {
        let snapshot = match self.resolve_snapshot(input.consistency).await? {
            Some(token) => token,
            None => self.store.snapshot().await?,
        };

        let reader = StoreTupleReader::new(Arc::clone(&self.store));
        let engine = CheckEngine::new(
            Arc::new(reader),
            self.registry(),
            self.engine_config.clone(),
        );

        let request = CheckRequest::new(
            input.subject,
            input.permission,
            ObjectRef::new(input.object_type, input.object_id),
        )
        .at_snapshot(snapshot.clone());

        let result: CheckResult = engine.check_with_cancel(&request, cancel).await?;
        Ok(CheckPermissionOutput {
            allowed: result.allowed,
            snapshot,
        })
    }

    /// Replaces the live schema with `definition`.
    ///
    /// Changes that would strand stored tuples or callers are refused unless
    /// `force` is set. Checks already running keep the schema they started
    /// with.
    pub async fn reload_schema(
        &self,
        definition: &str,
        force: bool,
    ) -> Result<ReloadSchemaOutput, ApiError> {
        let new_registry = compile_schema(definition, &self.schema_limits)?;

        let current = self.registry();
        let breaking = match (current.schema(), new_registry.schema()) {
            (Some(old), Some(new)) => detect_breaking_changes(old, new),
            _ => Vec::new(),
        };

        if !breaking.is_empty() && !force {
            tracing::warn!(
                breaking_changes = breaking.len(),
                "refusing schema reload with breaking changes"
            );
            return Err(ApiError::BreakingChanges(breaking));
        }

        let type_count = new_registry.schema().map_or(0, |s| s.types.len());
        *self.registry.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(new_registry);
        tracing::info!(
            type_count,
            breaking_changes_overridden = breaking.len(),
            "schema reloaded"
        );

        Ok(ReloadSchemaOutput {
            type_count,
            breaking_changes_overridden: breaking,
        })
    }

    /// Validates every write against the live schema, then commits the batch.
    pub async fn write_relationships(
        &self,
        writes: &[TupleWrite],
        deletes: &[TupleFilter],
    ) -> Result<SnapshotToken, ApiError> {
        let registry = self.registry();
        for write in writes {
            registry.validate_tuple(write)?;
        }

        Ok(self.store.write(writes, deletes).await?)
    }

    pub async fn read_relationships(
        &self,
        filter: &TupleFilter,
        consistency: Consistency,
        limit: Option<usize>,
    ) -> Result<Vec<Tuple>, ApiError> {
        let snapshot = self.resolve_snapshot(consistency).await?;
        Ok(self.store.read(filter, snapshot.as_ref(), limit).await?)
    }

    async fn resolve_snapshot(
        &self,
        consistency: Consistency,
    ) -> Result<Option<SnapshotToken>, ApiError> {
        match consistency {
            Consistency::FullConsistency => Ok(Some(self.store.snapshot().await?)),
            Consistency::MinimizeLatency => Ok(None),
            Consistency::AtSnapshot(token) => Ok(Some(token)),
        }
    }
}

fn compile_schema(text: &str, limits: &SchemaLimits) -> Result<SchemaRegistry, ApiError> {
    let schema = parse_schema(text)?;
    validate_schema_limits(&schema, limits).map_err(ApiError::Validation)?;
    Ok(SchemaRegistry::compile(&schema)?)
}
