use std::collections::BTreeMap;
use std::fmt::{self, Debug, Display};
use std::rc::Rc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::extensions::ExtensionBag;

/// The resolved identity of a query: an ordered list of plain JSON values.
///
/// Order is positional identity; `["todos", 1]` and `[1, "todos"]` are
/// different queries. Two derivations from equal [`Variables`] and an equal
/// [`ExtensionBag`] produce structurally equal keys, and the
/// [`canonical`](QueryKey::canonical) text form sorts object keys so equal
/// keys always render the same cache-slot string.
#[derive(Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QueryKey(Vec<Value>);

impl QueryKey {
    /// A key from its ordered parts.
    pub fn new(parts: Vec<Value>) -> Self {
        QueryKey(parts)
    }

    /// Wrap a single plain value as a one-element key.
    pub fn of(value: impl Into<Value>) -> Self {
        QueryKey(vec![value.into()])
    }

    /// The ordered parts.
    pub fn parts(&self) -> &[Value] {
        &self.0
    }

    /// Number of parts.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True for a key with no parts.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Append a part.
    pub fn push(&mut self, part: impl Into<Value>) {
        self.0.push(part.into());
    }

    /// Canonical text form: compact JSON with object keys sorted.
    ///
    /// Engines can use this directly as a cache-slot identifier.
    pub fn canonical(&self) -> String {
        let mut out = String::new();
        out.push('[');
        for (i, part) in self.0.iter().enumerate() {
            if i > 0 {
                out.push(',');
            }
            write_canonical(part, &mut out);
        }
        out.push(']');
        out
    }
}

impl Debug for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical())
    }
}

impl Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical())
    }
}

impl From<Vec<Value>> for QueryKey {
    fn from(parts: Vec<Value>) -> Self {
        QueryKey(parts)
    }
}

impl FromIterator<Value> for QueryKey {
    fn from_iter<I: IntoIterator<Item = Value>>(iter: I) -> Self {
        QueryKey(iter.into_iter().collect())
    }
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(true) => out.push_str("true"),
        Value::Bool(false) => out.push_str("false"),
        Value::Number(number) => out.push_str(&number.to_string()),
        Value::String(text) => write_escaped(text, out),
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        Value::Object(map) => {
            // Sort keys so the text does not depend on map insertion order.
            let sorted: BTreeMap<&String, &Value> = map.iter().collect();
            out.push('{');
            for (i, (key, item)) in sorted.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_escaped(key, out);
                out.push(':');
                write_canonical(item, out);
            }
            out.push('}');
        }
    }
}

fn write_escaped(text: &str, out: &mut String) {
    out.push('"');
    for c in text.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if (c as u32) < 0x20 => out.push_str(&format!("\\u{:04x}", c as u32)),
            c => out.push(c),
        }
    }
    out.push('"');
}

/// Deferred key part: reads the resolved extension bag, returns a plain value.
pub type PartFn = Rc<dyn Fn(&ExtensionBag) -> Value>;

/// Whole-key derivation: reads the resolved extension bag, returns the key.
pub type KeyDeriveFn = Rc<dyn Fn(&ExtensionBag) -> QueryKey>;

/// Custom key derivation supplied per definition in place of
/// [`default_key_fn`]. Receives the raw variables and the resolved bag, and
/// must be deterministic for fixed inputs.
pub type KeyFn = Rc<dyn Fn(&Variables, &ExtensionBag) -> QueryKey>;

/// One positional element of [`Variables::Parts`].
#[derive(Clone)]
pub enum VariablePart {
    /// A plain value, kept as-is.
    Value(Value),
    /// A deferred part, invoked with the resolved extension bag.
    Deferred(PartFn),
}

impl VariablePart {
    /// A plain part.
    pub fn value(value: impl Into<Value>) -> Self {
        VariablePart::Value(value.into())
    }

    /// A deferred part.
    pub fn deferred(f: impl Fn(&ExtensionBag) -> Value + 'static) -> Self {
        VariablePart::Deferred(Rc::new(f))
    }

    /// Resolve this part against a bag. Deferred parts run exactly once per
    /// call.
    pub fn resolve(&self, extensions: &ExtensionBag) -> Value {
        match self {
            VariablePart::Value(value) => value.clone(),
            VariablePart::Deferred(f) => f(extensions),
        }
    }
}

impl Debug for VariablePart {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VariablePart::Value(value) => f.debug_tuple("Value").field(value).finish(),
            VariablePart::Deferred(_) => f.debug_tuple("Deferred").field(&"..").finish(),
        }
    }
}

/// User-declared identity input to a query.
#[derive(Clone)]
pub enum Variables {
    /// A plain structured value; wraps as the single-element key `[value]`.
    Value(Value),
    /// An ordered list of parts, each plain or deferred.
    Parts(Vec<VariablePart>),
    /// A single callable producing the whole key from the extension bag.
    Derive(KeyDeriveFn),
}

impl Variables {
    /// Plain-value variables.
    pub fn value(value: impl Into<Value>) -> Self {
        Variables::Value(value.into())
    }

    /// Part-list variables.
    pub fn parts(parts: impl IntoIterator<Item = VariablePart>) -> Self {
        Variables::Parts(parts.into_iter().collect())
    }

    /// Whole-key derivation variables.
    pub fn derive(f: impl Fn(&ExtensionBag) -> QueryKey + 'static) -> Self {
        Variables::Derive(Rc::new(f))
    }
}

impl Default for Variables {
    fn default() -> Self {
        Variables::Parts(Vec::new())
    }
}

impl Debug for Variables {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Variables::Value(value) => f.debug_tuple("Value").field(value).finish(),
            Variables::Parts(parts) => f.debug_tuple("Parts").field(parts).finish(),
            Variables::Derive(_) => f.debug_tuple("Derive").field(&"..").finish(),
        }
    }
}

/// Default key derivation.
///
/// A whole-key callable is invoked with the bag and its result is the key.
/// Part lists resolve positionally: plain parts pass through, deferred parts
/// are invoked with the bag, order preserved. A plain value wraps as
/// `[value]`. Deterministic for fixed inputs by construction; custom
/// [`KeyFn`]s must uphold the same contract.
pub fn default_key_fn(variables: &Variables, extensions: &ExtensionBag) -> QueryKey {
    match variables {
        Variables::Derive(derive) => derive(extensions),
        Variables::Parts(parts) => parts.iter().map(|part| part.resolve(extensions)).collect(),
        Variables::Value(value) => QueryKey::of(value.clone()),
    }
}
