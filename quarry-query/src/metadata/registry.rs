//! Model registry.

use std::any::TypeId;
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::RwLock;
use tracing::debug;

use super::{Model, ModelMeta, model_name};
use crate::error::{QueryError, QueryResult};

/// Maps model types to their metadata.
///
/// One registry belongs to one ORM session; independent sessions (for
/// example in tests) never see each other's models.
#[derive(Debug, Default)]
pub struct Registry {
    models: RwLock<IndexMap<TypeId, Arc<ModelMeta>>>,
}

impl Registry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a model type.
    ///
    /// Registering the same type twice fails with `DuplicateModel` instead of
    /// replacing the existing metadata.
    pub fn register<T: Model>(&self) -> QueryResult<Arc<ModelMeta>> {
        let type_id = TypeId::of::<T>();
        if self.models.read().contains_key(&type_id) {
            return Err(QueryError::duplicate_model(model_name::<T>()));
        }

        let meta = Arc::new(T::schema().into_meta()?);

        let mut models = self.models.write();
        if models.contains_key(&type_id) {
            return Err(QueryError::duplicate_model(meta.name()));
        }
        if let Some(existing) = models.values().find(|m| m.table() == meta.table()) {
            return Err(QueryError::configuration(format!(
                "Table '{}' is already mapped by model {}",
                meta.table(),
                existing.name()
            ))
            .with_model(meta.name()));
        }
        models.insert(type_id, meta.clone());
        debug!(model = %meta.name(), table = %meta.table(), columns = meta.columns().len(), "Model registered");
        Ok(meta)
    }

    /// Look up a model's metadata.
    pub fn lookup<T: Model>(&self) -> QueryResult<Arc<ModelMeta>> {
        self.lookup_id(TypeId::of::<T>())
            .ok_or_else(|| QueryError::model_not_registered(model_name::<T>()))
    }

    /// Look up metadata by type id.
    pub fn lookup_id(&self, type_id: TypeId) -> Option<Arc<ModelMeta>> {
        self.models.read().get(&type_id).cloned()
    }

    /// Whether `T` is registered.
    pub fn contains<T: Model>(&self) -> bool {
        self.models.read().contains_key(&TypeId::of::<T>())
    }

    /// All registered models in registration order.
    pub fn models(&self) -> Vec<Arc<ModelMeta>> {
        self.models.read().values().cloned().collect()
    }

    /// Number of registered models.
    pub fn len(&self) -> usize {
        self.models.read().len()
    }

    /// Whether no model is registered.
    pub fn is_empty(&self) -> bool {
        self.models.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use crate::metadata::{Column, LogicalType, ModelSchema};
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Serialize, Deserialize)]
    struct Tag {
        id: i64,
        label: String,
    }

    impl Model for Tag {
        fn schema() -> ModelSchema<Self> {
            ModelSchema::<Self>::new()
                .column(Column::new("id", LogicalType::BigInt).primary_key().auto_increment())
                .column(Column::new("label", LogicalType::String).unique())
        }
    }

    #[derive(Debug, Serialize, Deserialize)]
    struct Label {
        id: i64,
    }

    impl Model for Label {
        fn schema() -> ModelSchema<Self> {
            ModelSchema::<Self>::new()
                .table("tags")
                .column(Column::new("id", LogicalType::BigInt).primary_key())
        }
    }

    #[test]
    fn test_register_and_lookup() {
        let registry = Registry::new();
        assert!(registry.is_empty());

        let meta = registry.register::<Tag>().unwrap();
        assert_eq!(meta.table(), "tags");
        assert!(registry.contains::<Tag>());
        assert_eq!(registry.lookup::<Tag>().unwrap().name(), "Tag");
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_duplicate_registration_fails() {
        let registry = Registry::new();
        registry.register::<Tag>().unwrap();
        let err = registry.register::<Tag>().unwrap_err();
        assert_eq!(err.code, ErrorCode::DuplicateModel);
    }

    #[test]
    fn test_lookup_unregistered_fails() {
        let registry = Registry::new();
        let err = registry.lookup::<Tag>().unwrap_err();
        assert_eq!(err.code, ErrorCode::ModelNotRegistered);
        assert!(err.message.contains("Tag"));
    }

    #[test]
    fn test_table_clash_fails() {
        let registry = Registry::new();
        registry.register::<Tag>().unwrap();
        let err = registry.register::<Label>().unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidConfiguration);
    }

    #[test]
    fn test_registries_are_isolated() {
        let first = Registry::new();
        let second = Registry::new();
        first.register::<Tag>().unwrap();
        assert!(second.lookup::<Tag>().is_err());
    }
}
