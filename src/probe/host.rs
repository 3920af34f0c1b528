//! Handler abstraction and the host facilities a probe relies on.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use crate::probe::rule::Rule;
use crate::probe::types::{HandlerDescriptor, RequestData};

/// A server-side component grouping related actions.
pub trait Handler: Send + Sync {
    /// Name of the handler type; descriptors are cached under it.
    fn handler_type(&self) -> &str;

    /// Derive the static description of this handler type.
    fn describe(&self) -> HandlerDescriptor;

    /// Whether every instance of this handler type describes itself the same
    /// way. Handlers returning `false` bypass the descriptor cache.
    fn cacheable(&self) -> bool {
        true
    }
}

/// Facilities the probe borrows from the hosting application.
pub trait HandlerHost: Send + Sync {
    /// Used in error messages.
    fn name(&self) -> &str {
        "handler host"
    }

    /// Construct a handler by name, or `None` if the host knows no such handler.
    fn create_handler(&self, name: &str, request: &RequestData) -> Option<Arc<dyn Handler>>;

    fn describe_handler(&self, handler: &dyn Handler) -> Arc<HandlerDescriptor>;

    /// Rules applied to every action of every handler.
    fn global_rules(&self) -> &[Rule];
}

/// Compute-once store of handler descriptors keyed by handler type.
#[derive(Debug, Default)]
pub struct DescriptorCache {
    entries: RwLock<HashMap<String, Arc<HandlerDescriptor>>>,
}

impl DescriptorCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_derive(&self, handler: &dyn Handler) -> Arc<HandlerDescriptor> {
        if !handler.cacheable() {
            return Arc::new(handler.describe());
        }
        let key = handler.handler_type();
        if let Some(found) = self
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
        {
            return Arc::clone(found);
        }

        // Derivation is deterministic, so racing first writers produce equal
        // values and whichever lands first is kept.
        let derived = Arc::new(handler.describe());
        tracing::debug!(handler = key, actions = derived.actions().len(), "Derived handler descriptor");
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(entries.entry(key.to_string()).or_insert(derived))
    }

    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Handler whose description was declared up front (e.g. in a policy file).
/// The description belongs to the instance, so it is never cached by type.
#[derive(Debug)]
pub struct DeclaredHandler {
    descriptor: HandlerDescriptor,
}

impl DeclaredHandler {
    pub fn new(descriptor: HandlerDescriptor) -> Self {
        Self { descriptor }
    }
}

impl Handler for DeclaredHandler {
    fn handler_type(&self) -> &str {
        self.descriptor.name()
    }

    fn describe(&self) -> HandlerDescriptor {
        self.descriptor.clone()
    }

    fn cacheable(&self) -> bool {
        false
    }
}

type HandlerFactory = Arc<dyn Fn(&RequestData) -> Arc<dyn Handler> + Send + Sync>;

/// Default [`HandlerHost`]: named factories, global rules and a descriptor cache.
pub struct HandlerRegistry {
    /// lowercase handler name -> factory
    factories: HashMap<String, HandlerFactory>,
    global_rules: Vec<Rule>,
    descriptors: DescriptorCache,
    cache_descriptors: bool,
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self {
            factories: HashMap::new(),
            global_rules: Vec::new(),
            descriptors: DescriptorCache::new(),
            cache_descriptors: true,
        }
    }
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_descriptor_cache(mut self, enabled: bool) -> Self {
        self.cache_descriptors = enabled;
        self
    }

    /// Register a factory under `name` (matched case-insensitively).
    /// A later registration under the same name replaces the earlier one.
    pub fn register<F>(&mut self, name: &str, factory: F)
    where
        F: Fn(&RequestData) -> Arc<dyn Handler> + Send + Sync + 'static,
    {
        self.factories
            .insert(name.to_ascii_lowercase(), Arc::new(factory));
    }

    /// Register a shared instance under its handler type name.
    pub fn register_instance(&mut self, handler: Arc<dyn Handler>) {
        let name = handler.handler_type().to_string();
        self.register(&name, move |_| Arc::clone(&handler));
    }

    pub fn add_global_rule(&mut self, rule: Rule) {
        self.global_rules.push(rule);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(&name.to_ascii_lowercase())
    }

    /// Registered handler names (lowercased), sorted.
    pub fn handler_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }

    pub fn global_rule_count(&self) -> usize {
        self.global_rules.len()
    }

    pub fn cached_descriptors(&self) -> usize {
        self.descriptors.len()
    }
}

impl HandlerHost for HandlerRegistry {
    fn name(&self) -> &str {
        "HandlerRegistry"
    }

    fn create_handler(&self, name: &str, request: &RequestData) -> Option<Arc<dyn Handler>> {
        let factory = self.factories.get(&name.to_ascii_lowercase())?;
        Some(factory(request))
    }

    fn describe_handler(&self, handler: &dyn Handler) -> Arc<HandlerDescriptor> {
        if self.cache_descriptors {
            self.descriptors.get_or_derive(handler)
        } else {
            Arc::new(handler.describe())
        }
    }

    fn global_rules(&self) -> &[Rule] {
        &self.global_rules
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("handlers", &self.handler_names())
            .field("global_rules", &self.global_rules)
            .field("cache_descriptors", &self.cache_descriptors)
            .finish()
    }
}
