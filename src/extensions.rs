use std::collections::BTreeMap;
use std::fmt::{self, Debug};
use std::rc::Rc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Canonical source name for path parameters.
pub const SOURCE_PARAMS: &str = "params";

/// Canonical source name for search parameters (ordered key/value pairs).
pub const SOURCE_SEARCH_PARAMS: &str = "searchParams";

/// Ambient context materialized for a single derivation pass.
///
/// A bag is plain data: a named map of JSON values. It is recomputed on
/// every resolution and never cached across passes, so deferred variable
/// parts always observe current ambient values (the current URL, say).
///
/// The two canonical sources have typed accessors with empty defaults:
/// [`params`](ExtensionBag::params) yields `{}` and
/// [`search_params`](ExtensionBag::search_params) yields `[]` when the
/// source is absent, so downstream code never null-checks.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtensionBag {
    entries: BTreeMap<String, Value>,
}

impl ExtensionBag {
    /// An empty bag.
    pub fn new() -> Self {
        Self::default()
    }

    /// True when no sources resolved into this bag.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Insert a named value, replacing any previous entry.
    pub fn insert(&mut self, name: impl Into<String>, value: Value) {
        self.entries.insert(name.into(), value);
    }

    /// Builder form of [`insert`](ExtensionBag::insert).
    pub fn with(mut self, name: impl Into<String>, value: Value) -> Self {
        self.insert(name, value);
        self
    }

    /// Look up a named entry.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.entries.get(name)
    }

    /// Names present in this bag, in sorted order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Path parameters, or an empty map when the source is absent.
    pub fn params(&self) -> BTreeMap<String, String> {
        match self.entries.get(SOURCE_PARAMS) {
            Some(Value::Object(map)) => map
                .iter()
                .filter_map(|(k, v)| Some((k.clone(), v.as_str()?.to_string())))
                .collect(),
            _ => BTreeMap::new(),
        }
    }

    /// Search parameters as ordered pairs, or an empty list when absent.
    pub fn search_params(&self) -> Vec<(String, String)> {
        match self.entries.get(SOURCE_SEARCH_PARAMS) {
            Some(Value::Array(pairs)) => pairs
                .iter()
                .filter_map(|pair| {
                    let pair = pair.as_array()?;
                    let key = pair.first()?.as_str()?;
                    let value = pair.get(1)?.as_str()?;
                    Some((key.to_string(), value.to_string()))
                })
                .collect(),
            _ => Vec::new(),
        }
    }

    /// First search parameter value for `key`, if any.
    pub fn search_param(&self, key: &str) -> Option<String> {
        self.search_params()
            .into_iter()
            .find_map(|(k, v)| (k == key).then_some(v))
    }

    /// Replace the search parameters, preserving pair order.
    pub fn set_search_params<K, V>(&mut self, pairs: impl IntoIterator<Item = (K, V)>)
    where
        K: Into<String>,
        V: Into<String>,
    {
        let pairs: Vec<Value> = pairs
            .into_iter()
            .map(|(k, v)| Value::Array(vec![Value::String(k.into()), Value::String(v.into())]))
            .collect();
        self.insert(SOURCE_SEARCH_PARAMS, Value::Array(pairs));
    }

    /// Builder form of [`set_search_params`](ExtensionBag::set_search_params).
    pub fn with_search_params<K, V>(mut self, pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.set_search_params(pairs);
        self
    }

    /// Replace the path parameters.
    pub fn set_params<K, V>(&mut self, params: impl IntoIterator<Item = (K, V)>)
    where
        K: Into<String>,
        V: Into<String>,
    {
        let map: serde_json::Map<String, Value> = params
            .into_iter()
            .map(|(k, v)| (k.into(), Value::String(v.into())))
            .collect();
        self.insert(SOURCE_PARAMS, Value::Object(map));
    }

    /// Builder form of [`set_params`](ExtensionBag::set_params).
    pub fn with_params<K, V>(mut self, params: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.set_params(params);
        self
    }

    /// The whole bag as one JSON object.
    pub fn into_value(self) -> Value {
        Value::Object(self.entries.into_iter().collect())
    }
}

/// One provider-side source entry: a plain value or a zero-argument accessor.
#[derive(Clone)]
pub enum ExtensionEntry {
    /// A static value.
    Value(Value),
    /// A live accessor, invoked once per resolution. Never memoized.
    Accessor(Rc<dyn Fn() -> Value>),
}

impl ExtensionEntry {
    fn resolve(&self) -> Value {
        match self {
            ExtensionEntry::Value(value) => value.clone(),
            ExtensionEntry::Accessor(accessor) => accessor(),
        }
    }
}

impl Debug for ExtensionEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExtensionEntry::Value(value) => f.debug_tuple("Value").field(value).finish(),
            ExtensionEntry::Accessor(_) => f.debug_tuple("Accessor").field(&"..").finish(),
        }
    }
}

/// Named extension sources held by a [`QueryClient`](crate::QueryClient).
#[derive(Debug, Clone, Default)]
pub struct ExtensionRegistry {
    entries: BTreeMap<String, ExtensionEntry>,
}

impl ExtensionRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a static value under `name`.
    pub fn insert_value(&mut self, name: impl Into<String>, value: Value) {
        self.entries.insert(name.into(), ExtensionEntry::Value(value));
    }

    /// Register a live accessor under `name`.
    pub fn insert_accessor(&mut self, name: impl Into<String>, accessor: impl Fn() -> Value + 'static) {
        self.entries
            .insert(name.into(), ExtensionEntry::Accessor(Rc::new(accessor)));
    }

    /// Builder form of [`insert_value`](ExtensionRegistry::insert_value).
    pub fn with_value(mut self, name: impl Into<String>, value: Value) -> Self {
        self.insert_value(name, value);
        self
    }

    /// Builder form of [`insert_accessor`](ExtensionRegistry::insert_accessor).
    pub fn with_accessor(mut self, name: impl Into<String>, accessor: impl Fn() -> Value + 'static) -> Self {
        self.insert_accessor(name, accessor);
        self
    }

    fn resolve_entry(&self, name: &str) -> Option<Value> {
        self.entries.get(name).map(ExtensionEntry::resolve)
    }

    /// Materialize every registered source, invoking accessor entries.
    pub fn materialize(&self) -> ExtensionBag {
        let mut bag = ExtensionBag::new();
        for (name, entry) in &self.entries {
            bag.insert(name.clone(), entry.resolve());
        }
        bag
    }
}

/// Accessor producing a whole extension bag.
pub type BagAccessor = Rc<dyn Fn() -> ExtensionBag>;

/// Where ambient extensions come from, provider-side.
#[derive(Clone, Default)]
pub enum ExtensionSource {
    /// No ambient extensions are configured.
    #[default]
    None,
    /// A fixed registry of named sources. Entries may still be live
    /// accessors, re-invoked per resolution.
    Static(ExtensionRegistry),
    /// A whole-bag accessor, invoked unconditionally on every resolution so
    /// ambient values are always read fresh.
    Live(BagAccessor),
}

impl ExtensionSource {
    /// Wrap a whole-bag accessor.
    pub fn live(accessor: impl Fn() -> ExtensionBag + 'static) -> Self {
        ExtensionSource::Live(Rc::new(accessor))
    }

    /// Materialize every available source into a bag.
    pub fn materialize(&self) -> ExtensionBag {
        match self {
            ExtensionSource::None => ExtensionBag::new(),
            ExtensionSource::Static(registry) => registry.materialize(),
            ExtensionSource::Live(accessor) => accessor(),
        }
    }
}

impl Debug for ExtensionSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExtensionSource::None => f.write_str("None"),
            ExtensionSource::Static(registry) => f.debug_tuple("Static").field(registry).finish(),
            ExtensionSource::Live(_) => f.debug_tuple("Live").field(&"..").finish(),
        }
    }
}

/// Transform applied to the materialized provider bag.
pub type ExtensionTransform = Rc<dyn Fn(ExtensionBag) -> ExtensionBag>;

/// Which ambient sources a query reads.
///
/// Declared on a definition via
/// [`QueryDef::set_extensions`](crate::QueryDef::set_extensions), or per
/// invocation through [`RenderProps`](crate::RenderProps). Passed as plain
/// data; there is no global extension mode.
#[derive(Clone, Default)]
pub enum ExtensionSpec {
    /// The query reads no ambient context; resolution yields an empty bag
    /// without touching provider sources.
    #[default]
    None,
    /// Pick the named sources from the provider, invoking live entries.
    Sources(Vec<String>),
    /// Materialize the full provider bag, then transform it.
    Transform(ExtensionTransform),
}

impl ExtensionSpec {
    /// Declare a list of named sources.
    pub fn sources<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        ExtensionSpec::Sources(names.into_iter().map(Into::into).collect())
    }

    /// Declare a transform over the full provider bag.
    pub fn transform(f: impl Fn(ExtensionBag) -> ExtensionBag + 'static) -> Self {
        ExtensionSpec::Transform(Rc::new(f))
    }
}

impl Debug for ExtensionSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExtensionSpec::None => f.write_str("None"),
            ExtensionSpec::Sources(names) => f.debug_tuple("Sources").field(names).finish(),
            ExtensionSpec::Transform(_) => f.debug_tuple("Transform").field(&"..").finish(),
        }
    }
}

/// Resolve a declaration against the provider sources.
///
/// Live sources and accessor entries are invoked here, once per call. A name
/// with no matching source is skipped with a debug note rather than erroring;
/// the bag accessors fill in empty defaults downstream.
pub fn resolve_extensions(spec: &ExtensionSpec, source: &ExtensionSource) -> ExtensionBag {
    match spec {
        ExtensionSpec::None => ExtensionBag::new(),
        ExtensionSpec::Sources(names) => {
            let mut bag = ExtensionBag::new();
            match source {
                ExtensionSource::None => {
                    for name in names {
                        log::debug!("extension `{name}` declared but no sources are configured");
                    }
                }
                ExtensionSource::Static(registry) => {
                    for name in names {
                        match registry.resolve_entry(name) {
                            Some(value) => bag.insert(name.clone(), value),
                            None => log::debug!("extension `{name}` has no registered source"),
                        }
                    }
                }
                ExtensionSource::Live(accessor) => {
                    let full = accessor();
                    for name in names {
                        match full.get(name) {
                            Some(value) => bag.insert(name.clone(), value.clone()),
                            None => log::debug!("extension `{name}` missing from live sources"),
                        }
                    }
                }
            }
            bag
        }
        ExtensionSpec::Transform(transform) => transform(source.materialize()),
    }
}

/// Transform keeping only the named search parameters.
///
/// An empty key list keeps the bag unchanged. Selection follows key-list
/// order and keeps repeated parameters, so `search_only(["q"])` applied to
/// `[["q","1"],["r","2"]]` yields `[["q","1"]]`. Other bag entries pass
/// through untouched.
pub fn search_only<I, S>(keys: I) -> ExtensionTransform
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let keys: Vec<String> = keys.into_iter().map(Into::into).collect();
    Rc::new(move |mut bag: ExtensionBag| {
        if keys.is_empty() {
            return bag;
        }
        let pairs = bag.search_params();
        let selected: Vec<(String, String)> = keys
            .iter()
            .flat_map(|key| pairs.iter().filter(move |(k, _)| k == key).cloned())
            .collect();
        bag.set_search_params(selected);
        bag
    })
}

/// Transform appending literal search parameters after the resolved ones.
pub fn append_search<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> ExtensionTransform
where
    K: Into<String>,
    V: Into<String>,
{
    let pairs: Vec<(String, String)> = pairs
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .collect();
    Rc::new(move |mut bag: ExtensionBag| {
        let mut all = bag.search_params();
        all.extend(pairs.iter().cloned());
        bag.set_search_params(all);
        bag
    })
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use serde_json::json;

    use super::*;

    fn live_counter() -> (Rc<Cell<u32>>, ExtensionSource) {
        let calls = Rc::new(Cell::new(0));
        let source = ExtensionSource::live({
            let calls = calls.clone();
            move || {
                calls.set(calls.get() + 1);
                ExtensionBag::new().with_search_params([("x", calls.get().to_string())])
            }
        });
        (calls, source)
    }

    #[test]
    fn empty_bag_has_empty_defaults() {
        let bag = ExtensionBag::new();
        assert!(bag.params().is_empty(), "Absent params should default to {{}}");
        assert!(
            bag.search_params().is_empty(),
            "Absent searchParams should default to []"
        );
        assert!(bag.is_empty());
    }

    #[test]
    fn spec_none_never_touches_sources() {
        let (calls, source) = live_counter();
        let bag = resolve_extensions(&ExtensionSpec::None, &source);
        assert!(bag.is_empty(), "No declaration should resolve to an empty bag");
        assert_eq!(calls.get(), 0, "Live source should not run for ExtensionSpec::None");
    }

    #[test]
    fn live_source_runs_every_resolution() {
        let (calls, source) = live_counter();
        let spec = ExtensionSpec::sources([SOURCE_SEARCH_PARAMS]);

        let first = resolve_extensions(&spec, &source);
        assert_eq!(first.search_params(), vec![("x".to_string(), "1".to_string())]);

        let second = resolve_extensions(&spec, &source);
        assert_eq!(
            second.search_params(),
            vec![("x".to_string(), "2".to_string())],
            "Second resolution should observe the current value, not a memoized one"
        );
        assert_eq!(calls.get(), 2);
    }

    #[test]
    fn registry_accessor_entries_rerun_per_resolution() {
        let calls = Rc::new(Cell::new(0));
        let registry = ExtensionRegistry::new().with_accessor(SOURCE_PARAMS, {
            let calls = calls.clone();
            move || {
                calls.set(calls.get() + 1);
                json!({ "tick": calls.get().to_string() })
            }
        });
        let source = ExtensionSource::Static(registry);
        let spec = ExtensionSpec::sources([SOURCE_PARAMS]);

        let first = resolve_extensions(&spec, &source);
        let second = resolve_extensions(&spec, &source);
        assert_eq!(first.params().get("tick"), Some(&"1".to_string()));
        assert_eq!(second.params().get("tick"), Some(&"2".to_string()));
    }

    #[test]
    fn sources_picks_only_named_entries() {
        let registry = ExtensionRegistry::new()
            .with_value(SOURCE_PARAMS, json!({ "id": "7" }))
            .with_value(SOURCE_SEARCH_PARAMS, json!([["q", "1"]]))
            .with_value("theme", json!("dark"));
        let source = ExtensionSource::Static(registry);

        let bag = resolve_extensions(&ExtensionSpec::sources([SOURCE_PARAMS]), &source);
        assert_eq!(bag.params().get("id"), Some(&"7".to_string()));
        assert!(bag.get("theme").is_none(), "Undeclared sources should not leak in");
        assert!(bag.search_params().is_empty());
    }

    #[test]
    fn unknown_names_are_skipped() {
        let registry = ExtensionRegistry::new().with_value(SOURCE_PARAMS, json!({ "id": "7" }));
        let source = ExtensionSource::Static(registry);

        let bag = resolve_extensions(&ExtensionSpec::sources(["nope", SOURCE_PARAMS]), &source);
        assert!(bag.get("nope").is_none(), "Unknown names pass through unresolved");
        assert_eq!(bag.params().get("id"), Some(&"7".to_string()));
    }

    #[test]
    fn transform_sees_the_full_bag() {
        let registry = ExtensionRegistry::new()
            .with_value(SOURCE_PARAMS, json!({ "id": "7" }))
            .with_value(SOURCE_SEARCH_PARAMS, json!([["q", "1"]]));
        let source = ExtensionSource::Static(registry);

        let spec = ExtensionSpec::transform(|bag| {
            let names: Vec<String> = bag.names().map(str::to_string).collect();
            ExtensionBag::new().with("seen", json!(names))
        });
        let bag = resolve_extensions(&spec, &source);
        assert_eq!(bag.get("seen"), Some(&json!(["params", "searchParams"])));
    }

    #[test]
    fn search_only_filters_to_named_keys() {
        let bag = ExtensionBag::new()
            .with_search_params([("q", "1"), ("r", "2")])
            .with_params([("id", "7")]);
        let filtered = search_only(["q"])(bag);
        assert_eq!(
            filtered.search_params(),
            vec![("q".to_string(), "1".to_string())],
            "Only the declared keys should survive"
        );
        assert_eq!(
            filtered.params().get("id"),
            Some(&"7".to_string()),
            "Params are not the transform's business"
        );
    }

    #[test]
    fn search_only_with_no_keys_keeps_everything() {
        let bag = ExtensionBag::new().with_search_params([("q", "1"), ("r", "2")]);
        let out = search_only(Vec::<String>::new())(bag.clone());
        assert_eq!(out, bag);
    }

    #[test]
    fn search_only_keeps_multiplicity_in_key_order() {
        let bag = ExtensionBag::new().with_search_params([("r", "3"), ("q", "1"), ("q", "2")]);
        let out = search_only(["q", "r"])(bag);
        assert_eq!(
            out.search_params(),
            vec![
                ("q".to_string(), "1".to_string()),
                ("q".to_string(), "2".to_string()),
                ("r".to_string(), "3".to_string()),
            ]
        );
    }

    #[test]
    fn append_search_adds_literal_pairs() {
        let bag = ExtensionBag::new().with_search_params([("q", "1")]);
        let out = append_search([("page", "2")])(bag);
        assert_eq!(
            out.search_params(),
            vec![
                ("q".to_string(), "1".to_string()),
                ("page".to_string(), "2".to_string()),
            ]
        );
    }

    #[test]
    fn bag_converts_to_a_json_object() {
        let bag = ExtensionBag::new().with_params([("id", "7")]);
        let value = bag.into_value();
        assert_eq!(value, json!({ "params": { "id": "7" } }));
    }

    #[test]
    fn materialize_none_is_empty() {
        assert!(ExtensionSource::None.materialize().is_empty());
    }
}
