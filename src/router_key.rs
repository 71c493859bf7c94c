use std::rc::Rc;

use serde_json::Value;

use crate::extensions::{ExtensionBag, SOURCE_PARAMS, SOURCE_SEARCH_PARAMS};
use crate::query_key::{default_key_fn, KeyFn, QueryKey, VariablePart, Variables};

/// A path pattern with `{token}` placeholders resolved from router
/// extensions.
///
/// Tokens read search parameters first, then path parameters. A token may
/// carry a fallback after `!`: `{page!1}` renders `"1"` when neither source
/// has `page`. A token with no value and no fallback stays as written, and an
/// unterminated `{` is kept literally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathTemplate {
    pattern: String,
}

impl PathTemplate {
    /// A template from its pattern text.
    pub fn new(pattern: impl Into<String>) -> Self {
        PathTemplate {
            pattern: pattern.into(),
        }
    }

    /// The raw pattern.
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// True when the pattern contains at least one complete `{token}`.
    pub fn has_tokens(&self) -> bool {
        match self.pattern.find('{') {
            Some(open) => self.pattern[open + 1..].contains('}'),
            None => false,
        }
    }

    /// Substitute tokens from the bag.
    pub fn apply(&self, extensions: &ExtensionBag) -> String {
        let params = extensions.params();
        let mut out = String::with_capacity(self.pattern.len());
        let mut rest = self.pattern.as_str();

        while let Some(open) = rest.find('{') {
            out.push_str(&rest[..open]);
            let after = &rest[open + 1..];
            match after.find('}') {
                Some(close) => {
                    let token = &after[..close];
                    let (name, fallback) = match token.split_once('!') {
                        Some((name, fallback)) => (name, Some(fallback)),
                        None => (token, None),
                    };
                    let value = extensions
                        .search_param(name)
                        .or_else(|| params.get(name).cloned())
                        .or_else(|| fallback.map(str::to_string));
                    match value {
                        Some(value) => out.push_str(&value),
                        None => {
                            out.push('{');
                            out.push_str(token);
                            out.push('}');
                        }
                    }
                    rest = &after[close + 1..];
                }
                None => {
                    // Unterminated brace; keep the tail as written.
                    out.push_str(&rest[open..]);
                    rest = "";
                }
            }
        }
        out.push_str(rest);
        out
    }
}

/// A deferred variable part rendering a template against the current bag.
pub fn template_part(pattern: impl Into<String>) -> VariablePart {
    let template = PathTemplate::new(pattern);
    VariablePart::deferred(move |extensions| Value::String(template.apply(extensions)))
}

/// Stock key derivation for route-shaped queries.
///
/// Expects part-list variables of the form `[path, body?]` with router
/// extensions in scope. Every string part is treated as a path template and
/// substituted; non-string parts pass through resolution untouched. Other
/// variables shapes fall back to [`default_key_fn`] with a debug note.
///
/// # Panics
///
/// Panics when the resolved bag carries neither `params` nor `searchParams`.
/// Wiring router extensions into the definition is the caller's setup
/// responsibility.
pub fn router_key_fn() -> KeyFn {
    Rc::new(|variables: &Variables, extensions: &ExtensionBag| {
        if extensions.get(SOURCE_PARAMS).is_none() && extensions.get(SOURCE_SEARCH_PARAMS).is_none()
        {
            panic!("router key derivation needs `params` or `searchParams` extensions in scope");
        }
        match variables {
            Variables::Parts(parts) => parts
                .iter()
                .map(|part| match part.resolve(extensions) {
                    Value::String(text) => Value::String(PathTemplate::new(text).apply(extensions)),
                    other => other,
                })
                .collect(),
            other => {
                log::debug!("router key derivation expects part-list variables, using the default");
                default_key_fn(other, extensions)
            }
        }
    })
}

/// Derive a route-shaped key directly, without building a [`KeyFn`].
pub fn router_key(variables: &Variables, extensions: &ExtensionBag) -> QueryKey {
    router_key_fn()(variables, extensions)
}
