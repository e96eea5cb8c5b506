//! Layered builtin registry.
//!
//! Three layers are consulted in priority order — `User` overrides `Stock`
//! overrides `System` — so an embedder can shadow a stock builtin without
//! touching it. Within one layer, registering a descriptor that shares a
//! name or alias with an existing entry evicts the old entry first
//! (replace, never merge). A single lock guards all three layers.

use std::sync::{Arc, RwLock};

use crate::descriptor::BuiltinDescriptor;
use crate::error::RegistryError;

/// Registry layer, highest priority first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Layer {
    /// Embedder/user overrides.
    User,
    /// The stock builtin set shipped with the engine.
    Stock,
    /// Engine-internal fallbacks.
    System,
}

impl Layer {
    /// All layers in lookup priority order.
    pub const PRIORITY: [Layer; 3] = [Layer::User, Layer::Stock, Layer::System];

    fn index(self) -> usize {
        match self {
            Layer::User => 0,
            Layer::Stock => 1,
            Layer::System => 2,
        }
    }
}

/// Shared, mutable store of builtin descriptors.
#[derive(Default)]
pub struct BuiltinRegistry {
    layers: RwLock<[Vec<Arc<BuiltinDescriptor>>; 3]>,
}

impl BuiltinRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `descriptor` in `layer`, atomically evicting any same-layer
    /// entry that shares its name or an alias. Returns the shared handle.
    pub fn register(&self, layer: Layer, descriptor: BuiltinDescriptor) -> Arc<BuiltinDescriptor> {
        let descriptor = Arc::new(descriptor);
        let mut layers = self.layers.write().unwrap_or_else(|e| e.into_inner());
        let bucket = &mut layers[layer.index()];
        bucket.retain(|existing| !existing.conflicts_with(&descriptor));
        bucket.push(descriptor.clone());
        tracing::debug!(name = %descriptor.name, ?layer, "registered builtin");
        descriptor
    }

    /// Find a descriptor by name or alias, scanning layers in priority
    /// order.
    pub fn lookup(&self, name: &str) -> Result<Arc<BuiltinDescriptor>, RegistryError> {
        let layers = self.layers.read().unwrap_or_else(|e| e.into_inner());
        for layer in Layer::PRIORITY {
            if let Some(found) = layers[layer.index()].iter().find(|d| d.matches(name)) {
                return Ok(found.clone());
            }
        }
        Err(RegistryError::NotFound(name.to_string()))
    }

    /// Snapshot of all descriptors, highest-priority layer first.
    ///
    /// Entries shadowed by a higher layer are still yielded; callers wanting
    /// a unique-name view must apply the same priority scan as [`lookup`].
    ///
    /// [`lookup`]: BuiltinRegistry::lookup
    pub fn iterate(&self) -> Vec<Arc<BuiltinDescriptor>> {
        let layers = self.layers.read().unwrap_or_else(|e| e.into_inner());
        Layer::PRIORITY
            .iter()
            .flat_map(|layer| layers[layer.index()].iter().cloned())
            .collect()
    }

    /// Total descriptor count across all layers.
    pub fn len(&self) -> usize {
        let layers = self.layers.read().unwrap_or_else(|e| e.into_inner());
        layers.iter().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for BuiltinRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BuiltinRegistry")
            .field("len", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::DescriptorBuilder;

    fn named(name: &str) -> BuiltinDescriptor {
        DescriptorBuilder::new(name).build()
    }

    #[test]
    fn lookup_scans_layers_in_priority_order() {
        let registry = BuiltinRegistry::new();
        registry.register(Layer::System, DescriptorBuilder::new("x").alias("sys-x").build());
        registry.register(Layer::User, DescriptorBuilder::new("x").alias("user-x").build());

        // Both layered entries are kept; the user one wins lookup.
        assert_eq!(registry.len(), 2);
        let hit = registry.lookup("x").unwrap();
        assert!(hit.matches("user-x"));
    }

    #[test]
    fn lookup_matches_aliases() {
        let registry = BuiltinRegistry::new();
        registry.register(Layer::Stock, DescriptorBuilder::new("remove").alias("rm").build());
        assert_eq!(registry.lookup("rm").unwrap().name, "remove");
        assert!(matches!(
            registry.lookup("mv"),
            Err(RegistryError::NotFound(name)) if name == "mv"
        ));
    }

    #[test]
    fn register_replaces_on_name_conflict_within_layer() {
        let registry = BuiltinRegistry::new();
        registry.register(Layer::Stock, DescriptorBuilder::new("x").alias("old").build());
        registry.register(Layer::Stock, named("x"));

        assert_eq!(registry.len(), 1);
        assert!(registry.lookup("old").is_err());
    }

    #[test]
    fn register_replaces_on_alias_conflict() {
        let registry = BuiltinRegistry::new();
        registry.register(Layer::Stock, DescriptorBuilder::new("a").alias("shared").build());
        registry.register(Layer::Stock, DescriptorBuilder::new("b").alias("shared").build());

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.lookup("shared").unwrap().name, "b");
        assert!(registry.lookup("a").is_err());
    }

    #[test]
    fn conflicts_do_not_cross_layers() {
        let registry = BuiltinRegistry::new();
        registry.register(Layer::System, named("x"));
        registry.register(Layer::User, named("x"));
        registry.register(Layer::Stock, named("x"));
        assert_eq!(registry.len(), 3);
    }

    #[test]
    fn iterate_yields_priority_order_without_dedup() {
        let registry = BuiltinRegistry::new();
        registry.register(Layer::System, named("x"));
        registry.register(Layer::Stock, named("y"));
        registry.register(Layer::User, named("x"));

        let names: Vec<String> = registry.iterate().iter().map(|d| d.name.clone()).collect();
        assert_eq!(names, vec!["x", "y", "x"]);
    }
}
