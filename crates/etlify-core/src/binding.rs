//! Model Binding: immutable per-(model, CRM) configuration (spec.md §4.4,
//! §9's "builders replace metaprogramming" redesign note).
//!
//! A per-model, per-CRM configuration becomes a statically built,
//! immutable struct produced by [`ModelBindingBuilder`] and stored in
//! [`crate::context::EngineContext`] keyed by `(model_name, crm_name)`,
//! rather than methods installed dynamically on each model class.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use crate::adapter::Payload;

/// A single record the engine operates on. Hosts wrap their own ORM rows
/// (or plain structs loaded by hand-written SQL) in an implementation of
/// this trait; the engine never touches a database row directly except
/// through the SyncState/PendingDependency tables it owns.
pub trait Record: Send + Sync {
    /// Matches `resource_type` in `crm_synchronisations` (spec.md §3).
    fn resource_type(&self) -> &str;
    /// Matches `resource_id`.
    fn resource_id(&self) -> i64;

    /// Structural fallback for serializers that don't want to hand-write
    /// a payload builder (spec.md §9: "Serializer duck-typing... provide
    /// a helper that adapts generic structural conversion"). Default
    /// implementation yields an empty payload; hosts that want this path
    /// override it to expose their record's fields as JSON values.
    fn fields(&self) -> Payload {
        HashMap::new()
    }

    /// Legacy dependency check (spec.md §4.4): a `<crm_name>_id` column
    /// or equivalent accessor on the record itself, checked when no
    /// SyncState row exists yet for the parent.
    fn crm_id_column(&self, _crm_name: &str) -> Option<Value> {
        None
    }
}

/// `record -> payload map` (spec.md §4.1, §9). The single interface the
/// engine consumes; `StructuralSerializer` is the generic fallback, a
/// closure is the hand-written path.
pub trait Serializer: Send + Sync {
    fn build_payload(&self, record: &dyn Record) -> Payload;
}

/// Falls back to [`Record::fields`] verbatim.
pub struct StructuralSerializer;

impl Serializer for StructuralSerializer {
    fn build_payload(&self, record: &dyn Record) -> Payload {
        record.fields()
    }
}

impl<F> Serializer for F
where
    F: Fn(&dyn Record) -> Payload + Send + Sync,
{
    fn build_payload(&self, record: &dyn Record) -> Payload {
        self(record)
    }
}

/// A parent this record points at, as seen by a [`DependencyEdge`].
/// `legacy_crm_id` is the parent's own `<crm_name>_id` column/accessor
/// value, if the host wants to opt into the legacy dependency check
/// (spec.md §4.4 part ii) without the engine having to load the parent
/// record itself.
#[derive(Debug, Clone)]
pub struct ParentRef {
    pub resource_id: i64,
    pub legacy_crm_id: Option<Value>,
}

impl ParentRef {
    pub fn new(resource_id: i64) -> Self {
        Self {
            resource_id,
            legacy_crm_id: None,
        }
    }

    pub fn with_legacy_crm_id(resource_id: i64, legacy_crm_id: Option<Value>) -> Self {
        Self {
            resource_id,
            legacy_crm_id,
        }
    }
}

/// One declared dependency edge, used by the Dependency Resolver
/// (`crm_dependencies`, `sync_dependencies` — spec.md §4.4, §4.5).
/// `resolve` returns the parent records this record currently points
/// at, so the resolver can look up their SyncState rows without needing
/// a full ORM layer.
#[derive(Clone)]
pub struct DependencyEdge {
    pub name: String,
    pub parent_type: String,
    pub resolve: Arc<dyn Fn(&dyn Record) -> Vec<ParentRef> + Send + Sync>,
}

impl DependencyEdge {
    pub fn new(
        name: impl Into<String>,
        parent_type: impl Into<String>,
        resolve: impl Fn(&dyn Record) -> Vec<ParentRef> + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            parent_type: parent_type.into(),
            resolve: Arc::new(resolve),
        }
    }
}

/// Immutable per-(model, CRM) configuration. Built once at startup via
/// [`ModelBindingBuilder`] and never mutated afterwards.
pub struct ModelBinding {
    pub model_name: String,
    pub crm_name: String,
    pub serializer: Arc<dyn Serializer>,
    pub crm_object_type: String,
    pub id_property: Option<String>,
    /// Associations the Stale Finder walks to compute a record's
    /// staleness threshold (spec.md §4.6). Table/column-level metadata,
    /// not record-level — the Stale Finder never materializes records.
    pub stale_associations: Vec<crate::stale::StaleAssociation>,
    /// `crm_dependencies` (spec.md §4.4/§4.5): parents that must already
    /// have a remote id before this record's *first* sync attempt is
    /// even considered — unsatisfied dependencies defer the whole
    /// attempt before any lock is taken.
    pub crm_dependencies: Vec<DependencyEdge>,
    /// `sync_dependencies` (spec.md §4.4): parents checked *after* the
    /// per-record lock is acquired; unsatisfied ones buffer the attempt
    /// and trigger cycle detection.
    pub sync_dependencies: Vec<DependencyEdge>,
    /// `sync_if` guard; `None` means "always sync".
    pub guard: Option<Arc<dyn Fn(&dyn Record) -> bool + Send + Sync>>,
    /// SQL fragment (a boolean predicate over the model's own table,
    /// e.g. `email LIKE '%market%'`) restricting the Stale Finder's
    /// candidate set. Spec.md §4.6's `stale_scope`.
    pub stale_scope_sql: Option<String>,
    /// Table backing this model, for Stale Finder SQL generation.
    pub table_name: String,
    /// Per-binding override of the global `max_sync_errors`; `None`
    /// inherits (spec.md §9's open question: nil means inherit).
    pub max_sync_errors: Option<u32>,
}

/// Builds a [`ModelBinding`]. Every `with_*` call is chainable; `build()`
/// is the only way to get an (immutable) `ModelBinding` out.
pub struct ModelBindingBuilder {
    model_name: String,
    crm_name: String,
    table_name: String,
    serializer: Option<Arc<dyn Serializer>>,
    crm_object_type: Option<String>,
    id_property: Option<String>,
    stale_associations: Vec<crate::stale::StaleAssociation>,
    crm_dependencies: Vec<DependencyEdge>,
    sync_dependencies: Vec<DependencyEdge>,
    guard: Option<Arc<dyn Fn(&dyn Record) -> bool + Send + Sync>>,
    stale_scope_sql: Option<String>,
    max_sync_errors: Option<u32>,
}

impl ModelBindingBuilder {
    pub fn new(model_name: impl Into<String>, crm_name: impl Into<String>, table_name: impl Into<String>) -> Self {
        Self {
            model_name: model_name.into(),
            crm_name: crm_name.into(),
            table_name: table_name.into(),
            serializer: None,
            crm_object_type: None,
            id_property: None,
            stale_associations: Vec::new(),
            crm_dependencies: Vec::new(),
            sync_dependencies: Vec::new(),
            guard: None,
            stale_scope_sql: None,
            max_sync_errors: None,
        }
    }

    pub fn serializer(mut self, serializer: impl Serializer + 'static) -> Self {
        self.serializer = Some(Arc::new(serializer));
        self
    }

    pub fn crm_object_type(mut self, object_type: impl Into<String>) -> Self {
        self.crm_object_type = Some(object_type.into());
        self
    }

    pub fn id_property(mut self, id_property: impl Into<String>) -> Self {
        self.id_property = Some(id_property.into());
        self
    }

    pub fn stale_association(mut self, assoc: crate::stale::StaleAssociation) -> Self {
        self.stale_associations.push(assoc);
        self
    }

    pub fn crm_dependency(mut self, edge: DependencyEdge) -> Self {
        self.crm_dependencies.push(edge);
        self
    }

    pub fn sync_dependency(mut self, edge: DependencyEdge) -> Self {
        self.sync_dependencies.push(edge);
        self
    }

    pub fn guard(mut self, guard: impl Fn(&dyn Record) -> bool + Send + Sync + 'static) -> Self {
        self.guard = Some(Arc::new(guard));
        self
    }

    pub fn stale_scope_sql(mut self, predicate: impl Into<String>) -> Self {
        self.stale_scope_sql = Some(predicate.into());
        self
    }

    pub fn max_sync_errors(mut self, limit: u32) -> Self {
        self.max_sync_errors = Some(limit);
        self
    }

    pub fn build(self) -> ModelBinding {
        ModelBinding {
            model_name: self.model_name,
            crm_name: self.crm_name,
            serializer: self.serializer.unwrap_or_else(|| Arc::new(StructuralSerializer)),
            crm_object_type: self.crm_object_type.expect("crm_object_type is required"),
            id_property: self.id_property,
            stale_associations: self.stale_associations,
            crm_dependencies: self.crm_dependencies,
            sync_dependencies: self.sync_dependencies,
            guard: self.guard,
            stale_scope_sql: self.stale_scope_sql,
            table_name: self.table_name,
            max_sync_errors: self.max_sync_errors,
        }
    }
}

/// `{(model_name, crm_name) -> ModelBinding}`. Immutable after all
/// bindings are registered at startup (spec.md §3).
#[derive(Default)]
pub struct BindingRegistry {
    bindings: HashMap<(String, String), Arc<ModelBinding>>,
}

impl BindingRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, binding: ModelBinding) {
        let key = (binding.model_name.clone(), binding.crm_name.clone());
        self.bindings.insert(key, Arc::new(binding));
    }

    pub fn get(&self, model_name: &str, crm_name: &str) -> Option<Arc<ModelBinding>> {
        self.bindings
            .get(&(model_name.to_string(), crm_name.to_string()))
            .cloned()
    }

    /// All `(model_name, crm_name)` pairs with an independently declared
    /// binding — the Stale Finder iterates this set. STI subclasses only
    /// appear here if they declared their own binding (spec.md §4.6).
    pub fn pairs(&self) -> Vec<(String, String)> {
        self.bindings.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Thing {
        id: i64,
    }
    impl Record for Thing {
        fn resource_type(&self) -> &str {
            "Thing"
        }
        fn resource_id(&self) -> i64 {
            self.id
        }
    }

    #[test]
    fn structural_serializer_falls_back_to_record_fields() {
        struct WithFields;
        impl Record for WithFields {
            fn resource_type(&self) -> &str {
                "WithFields"
            }
            fn resource_id(&self) -> i64 {
                1
            }
            fn fields(&self) -> Payload {
                [("name".to_string(), serde_json::json!("a"))].into_iter().collect()
            }
        }
        let record = WithFields;
        let payload = StructuralSerializer.build_payload(&record);
        assert_eq!(payload.get("name"), Some(&serde_json::json!("a")));
    }

    #[test]
    fn closure_serializer_is_used_directly() {
        let serializer = |_r: &dyn Record| -> Payload {
            [("x".to_string(), serde_json::json!(1))].into_iter().collect()
        };
        let payload = serializer.build_payload(&Thing { id: 1 });
        assert_eq!(payload.get("x"), Some(&serde_json::json!(1)));
    }

    #[test]
    fn record_default_fields_and_crm_id_column_are_empty() {
        let thing = Thing { id: 5 };
        assert!(thing.fields().is_empty());
        assert_eq!(thing.crm_id_column("hubspot"), None);
    }

    #[test]
    #[should_panic(expected = "crm_object_type is required")]
    fn build_panics_without_crm_object_type() {
        ModelBindingBuilder::new("Thing", "hubspot", "things").build();
    }

    #[test]
    fn builder_populates_every_field() {
        let binding = ModelBindingBuilder::new("Thing", "hubspot", "things")
            .crm_object_type("contact")
            .id_property("legacy_id")
            .guard(|_r| true)
            .stale_scope_sql("email LIKE '%market%'")
            .max_sync_errors(5)
            .crm_dependency(DependencyEdge::new("parent", "Parent", |_r| vec![ParentRef::new(1)]))
            .sync_dependency(DependencyEdge::new("owner", "Owner", |_r| vec![ParentRef::new(2)]))
            .build();

        assert_eq!(binding.model_name, "Thing");
        assert_eq!(binding.crm_name, "hubspot");
        assert_eq!(binding.table_name, "things");
        assert_eq!(binding.crm_object_type, "contact");
        assert_eq!(binding.id_property.as_deref(), Some("legacy_id"));
        assert_eq!(binding.stale_scope_sql.as_deref(), Some("email LIKE '%market%'"));
        assert_eq!(binding.max_sync_errors, Some(5));
        assert_eq!(binding.crm_dependencies.len(), 1);
        assert_eq!(binding.sync_dependencies.len(), 1);
        assert!((binding.guard.as_ref().unwrap())(&Thing { id: 1 }));
    }

    #[test]
    fn binding_registry_get_insert_and_pairs() {
        let mut registry = BindingRegistry::new();
        assert!(registry.get("Thing", "hubspot").is_none());

        registry.insert(
            ModelBindingBuilder::new("Thing", "hubspot", "things")
                .crm_object_type("contact")
                .build(),
        );
        registry.insert(
            ModelBindingBuilder::new("Thing", "airtable", "things")
                .crm_object_type("Things")
                .build(),
        );

        assert!(registry.get("Thing", "hubspot").is_some());
        assert!(registry.get("Thing", "salesforce").is_none());
        let mut pairs = registry.pairs();
        pairs.sort();
        assert_eq!(
            pairs,
            vec![
                ("Thing".to_string(), "airtable".to_string()),
                ("Thing".to_string(), "hubspot".to_string()),
            ]
        );
    }

    #[test]
    fn parent_ref_constructors() {
        let bare = ParentRef::new(3);
        assert_eq!(bare.resource_id, 3);
        assert_eq!(bare.legacy_crm_id, None);

        let with_legacy = ParentRef::with_legacy_crm_id(4, Some(serde_json::json!("crm-4")));
        assert_eq!(with_legacy.resource_id, 4);
        assert_eq!(with_legacy.legacy_crm_id, Some(serde_json::json!("crm-4")));
    }
}
