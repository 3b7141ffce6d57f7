// Component registry - type tags to component factories

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use super::component::Component;
use super::component_type::ComponentType;
use crate::models::ComponentId;
use crate::{ConcertoError, Result};

/// Builds a component from its instance name and constructor arguments
pub type ComponentFactory = Arc<dyn Fn(&ComponentId, &Value) -> Result<Component> + Send + Sync>;

/// Table of instantiable component types
///
/// `Add` instructions and checkpoint restore both go through
/// [`ComponentRegistry::instantiate`], so a restored component is rebuilt
/// from the same tag and arguments it was first created with.
#[derive(Default, Clone)]
pub struct ComponentRegistry {
    factories: HashMap<String, ComponentFactory>,
}

impl ComponentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a fixed type under its own name
    pub fn register_type(&mut self, component_type: ComponentType) {
        let tag = component_type.name.clone();
        let component_type = Arc::new(component_type);
        self.register_factory(tag, move |id, args| {
            Component::new(id.clone(), component_type.clone(), args.clone())
        });
    }

    /// Registers a factory, for types whose net depends on the arguments
    pub fn register_factory<T, F>(&mut self, tag: T, factory: F)
    where
        T: Into<String>,
        F: Fn(&ComponentId, &Value) -> Result<Component> + Send + Sync + 'static,
    {
        self.factories.insert(tag.into(), Arc::new(factory));
    }

    pub fn contains(&self, tag: &str) -> bool {
        self.factories.contains_key(tag)
    }

    pub fn tags(&self) -> Vec<&str> {
        let mut tags: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        tags.sort();
        tags
    }

    pub fn instantiate(&self, tag: &str, id: &ComponentId, args: &Value) -> Result<Component> {
        let factory = self
            .factories
            .get(tag)
            .ok_or_else(|| ConcertoError::UnknownComponentType(tag.to_string()))?;
        let mut component = factory(id, args)?;
        component.set_type_tag(tag);
        Ok(component)
    }
}
