//! Variables reference registry.
//!
//! A central arena maps every `variablesReference` handed to the client onto
//! a provider closure that materializes the children on demand. Composites
//! hold only child reference ids, so tearing a frame down is nothing more
//! than unregistering its ids. A request for a reference that is no longer
//! registered yields an empty list; the client saw a stale handle, which is
//! not an error.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicI64, Ordering};

use crate::protocol::{Variable, VariablePresentationHint};

pub type VariableProvider = Box<dyn Fn() -> Vec<Variable> + Send>;

static NEXT_REFERENCE: AtomicI64 = AtomicI64::new(1);

/// Allocate a fresh, never-reused variables reference.
pub fn next_reference() -> i64 {
    NEXT_REFERENCE.fetch_add(1, Ordering::SeqCst)
}

#[derive(Default)]
pub struct VariablesRegistry {
    providers: Mutex<HashMap<i64, VariableProvider>>,
}

impl VariablesRegistry {
    pub fn register(&self, reference: i64, provider: VariableProvider) {
        self.providers.lock().unwrap().insert(reference, provider);
    }

    pub fn unregister(&self, reference: i64) {
        self.providers.lock().unwrap().remove(&reference);
    }

    /// Materialize the children of `reference`; empty when unknown.
    pub fn resolve(&self, reference: i64) -> Vec<Variable> {
        let providers = self.providers.lock().unwrap();
        match providers.get(&reference) {
            Some(provider) => provider(),
            None => Vec::new(),
        }
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.providers.lock().unwrap().len()
    }
}

/// One child produced by a leaf collection.
#[derive(Debug, Clone)]
pub struct VariableEntry {
    pub name: String,
    pub value: String,
    pub r#type: &'static str,
}

impl VariableEntry {
    pub fn string(name: impl Into<String>, value: impl Into<String>) -> VariableEntry {
        VariableEntry {
            name: name.into(),
            value: value.into(),
            r#type: "string",
        }
    }

    pub fn int(name: impl Into<String>, value: i64) -> VariableEntry {
        VariableEntry {
            name: name.into(),
            value: value.to_string(),
            r#type: "int",
        }
    }
}

/// Named link from a composite to another registered node.
#[derive(Debug, Clone)]
pub struct CollectionLink {
    pub name: String,
    pub reference: i64,
}

fn data_hint() -> VariablePresentationHint {
    VariablePresentationHint {
        kind: Some("data".to_string()),
        visibility: Some("private".to_string()),
    }
}

fn property_hint() -> VariablePresentationHint {
    VariablePresentationHint {
        kind: Some("property".to_string()),
        visibility: Some("private".to_string()),
    }
}

/// Register a leaf collection node: children rebuilt on every request from
/// the captured producer.
pub fn leaf_collection<F>(
    registry: &VariablesRegistry,
    producer: F,
    supports_variable_type: bool,
    ignore_empty_strings: bool,
    sort_by_name: bool,
) -> i64
where
    F: Fn() -> Vec<VariableEntry> + Send + 'static,
{
    let reference = next_reference();
    registry.register(
        reference,
        Box::new(move || {
            let mut variables: Vec<Variable> = producer()
                .into_iter()
                .filter(|entry| {
                    !(ignore_empty_strings && entry.r#type == "string" && entry.value.is_empty())
                })
                .map(|entry| render_entry(entry, supports_variable_type))
                .collect();
            if sort_by_name {
                variables.sort_by(|a, b| a.name.cmp(&b.name));
            }
            variables
        }),
    );
    reference
}

/// Register a composite node: linked child collections first, then the leaf
/// entries from the captured producer.
pub fn composite<F>(
    registry: &VariablesRegistry,
    links: Vec<CollectionLink>,
    producer: F,
    supports_variable_type: bool,
    sort_by_name: bool,
) -> i64
where
    F: Fn() -> Vec<VariableEntry> + Send + 'static,
{
    let reference = next_reference();
    registry.register(
        reference,
        Box::new(move || {
            let mut variables: Vec<Variable> = links
                .iter()
                .map(|link| Variable {
                    name: link.name.clone(),
                    value: String::new(),
                    r#type: supports_variable_type.then(|| "collection".to_string()),
                    variables_reference: link.reference,
                    presentation_hint: Some(property_hint()),
                    ..Default::default()
                })
                .collect();
            variables.extend(
                producer()
                    .into_iter()
                    .map(|entry| render_entry(entry, supports_variable_type)),
            );
            if sort_by_name {
                variables.sort_by(|a, b| a.name.cmp(&b.name));
            }
            variables
        }),
    );
    reference
}

fn render_entry(entry: VariableEntry, supports_variable_type: bool) -> Variable {
    Variable {
        name: entry.name,
        value: entry.value,
        r#type: supports_variable_type.then(|| entry.r#type.to_string()),
        variables_reference: 0,
        presentation_hint: Some(data_hint()),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stale_reference_resolves_to_empty() {
        let registry = VariablesRegistry::default();
        assert!(registry.resolve(42).is_empty());
    }

    #[test]
    fn references_are_unique_and_monotonic() {
        let a = next_reference();
        let b = next_reference();
        let c = next_reference();
        assert!(a < b && b < c);
    }

    #[test]
    fn leaf_collection_filters_and_sorts() {
        let registry = VariablesRegistry::default();
        let reference = leaf_collection(
            &registry,
            || {
                vec![
                    VariableEntry::string("zeta", "1"),
                    VariableEntry::string("empty", ""),
                    VariableEntry::string("alpha", "2"),
                ]
            },
            true,
            true,
            true,
        );

        let variables = registry.resolve(reference);
        assert_eq!(variables.len(), 2);
        assert_eq!(variables[0].name, "alpha");
        assert_eq!(variables[1].name, "zeta");
        assert_eq!(variables[0].r#type.as_deref(), Some("string"));
        assert!(variables.iter().all(|v| v.variables_reference == 0));
    }

    #[test]
    fn leaf_collection_keeps_empty_strings_when_asked() {
        let registry = VariablesRegistry::default();
        let reference = leaf_collection(
            &registry,
            || vec![VariableEntry::string("empty", "")],
            false,
            false,
            false,
        );
        let variables = registry.resolve(reference);
        assert_eq!(variables.len(), 1);
        assert_eq!(variables[0].r#type, None);
    }

    #[test]
    fn composite_lists_links_before_leaves() {
        let registry = VariablesRegistry::default();
        let child = leaf_collection(&registry, Vec::new, true, false, false);
        let parent = composite(
            &registry,
            vec![CollectionLink {
                name: "Cache Variables".to_string(),
                reference: child,
            }],
            || vec![VariableEntry::int("CurrentLine", 7)],
            true,
            false,
        );

        let variables = registry.resolve(parent);
        assert_eq!(variables.len(), 2);
        assert_eq!(variables[0].name, "Cache Variables");
        assert_eq!(variables[0].variables_reference, child);
        assert_eq!(variables[0].r#type.as_deref(), Some("collection"));
        assert_eq!(variables[1].name, "CurrentLine");
        assert_eq!(variables[1].value, "7");
        assert_eq!(variables[1].variables_reference, 0);
    }

    #[test]
    fn unregister_removes_the_node() {
        let registry = VariablesRegistry::default();
        let reference = leaf_collection(
            &registry,
            || vec![VariableEntry::string("a", "b")],
            false,
            false,
            false,
        );
        assert_eq!(registry.resolve(reference).len(), 1);
        registry.unregister(reference);
        assert!(registry.resolve(reference).is_empty());
        assert_eq!(registry.len(), 0);
    }
}
