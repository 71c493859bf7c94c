use std::fmt::{self, Debug};
use std::rc::Rc;

use serde_json::Value;

use crate::error::QueryError;
use crate::extensions::ExtensionSpec;
use crate::query_client::QueryClient;
use crate::query_key::{VariablePart, Variables};
use crate::query_options::QueryOptions;
use crate::query_result::QueryResult;

/// Renders query data. Receives the (possibly selected) data and the full
/// result so callers can branch on fetch status or errors they chose not to
/// surface.
pub type RenderFn<N> = Rc<dyn Fn(Option<&Value>, &QueryResult) -> N>;

/// How an invocation supplied its variables.
///
/// The `path`/`body` pair is sugar for a two-part [`Variables::Parts`] list;
/// it collapses into one before anything downstream sees it.
#[derive(Clone, Default)]
pub enum VariablesProp {
    /// Nothing supplied.
    #[default]
    None,
    /// Variables given directly.
    Variables(Variables),
    /// Variables given as separate path and body parts.
    PathBody {
        /// Request path part. First in the assembled list.
        path: Option<VariablePart>,
        /// Request body part. Second in the assembled list.
        body: Option<VariablePart>,
    },
}

impl VariablesProp {
    /// Collapse into plain [`Variables`].
    pub fn canonicalize(self) -> Variables {
        match self {
            VariablesProp::None => Variables::default(),
            VariablesProp::Variables(variables) => variables,
            VariablesProp::PathBody { path, body } => {
                Variables::Parts(path.into_iter().chain(body).collect())
            }
        }
    }
}

impl Debug for VariablesProp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VariablesProp::None => f.write_str("None"),
            VariablesProp::Variables(variables) => {
                f.debug_tuple("Variables").field(variables).finish()
            }
            VariablesProp::PathBody { path, body } => f
                .debug_struct("PathBody")
                .field("path", &path.is_some())
                .field("body", &body.is_some())
                .finish(),
        }
    }
}

/// Per-invocation props for [`QueryDef::render`](crate::QueryDef::render).
pub struct RenderProps<N> {
    /// Variables for this invocation.
    pub variables: VariablesProp,
    /// Extension override. `None` uses the definition's spec.
    pub extensions: Option<ExtensionSpec>,
    /// Option overrides merged over the definition's options.
    pub options: QueryOptions,
    /// Whether the loading gate applies. Defaults to true.
    pub has_loading: Option<bool>,
    /// Loading node override for this invocation.
    pub loading: Option<N>,
    /// Render function for settled (or unsurfaced-error) results.
    pub render: Option<RenderFn<N>>,
}

impl<N> RenderProps<N> {
    /// Empty props.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the variables directly.
    pub fn set_variables(self, variables: Variables) -> Self {
        RenderProps {
            variables: VariablesProp::Variables(variables),
            ..self
        }
    }

    /// Set the path part. Merges with an already set body part.
    pub fn set_path(self, path: VariablePart) -> Self {
        let body = match self.variables {
            VariablesProp::PathBody { body, .. } => body,
            _ => None,
        };
        RenderProps {
            variables: VariablesProp::PathBody {
                path: Some(path),
                body,
            },
            ..self
        }
    }

    /// Set the body part. Merges with an already set path part.
    pub fn set_body(self, body: VariablePart) -> Self {
        let path = match self.variables {
            VariablesProp::PathBody { path, .. } => path,
            _ => None,
        };
        RenderProps {
            variables: VariablesProp::PathBody {
                path,
                body: Some(body),
            },
            ..self
        }
    }

    /// Override the definition's extension spec for this invocation.
    pub fn set_extensions(self, extensions: Option<ExtensionSpec>) -> Self {
        RenderProps { extensions, ..self }
    }

    /// Set per-invocation option overrides.
    pub fn set_options(self, options: QueryOptions) -> Self {
        RenderProps { options, ..self }
    }

    /// Set whether the loading gate applies.
    pub fn set_has_loading(self, has_loading: Option<bool>) -> Self {
        RenderProps {
            has_loading,
            ..self
        }
    }

    /// Set the loading node for this invocation.
    pub fn set_loading(self, loading: impl Into<N>) -> Self {
        RenderProps {
            loading: Some(loading.into()),
            ..self
        }
    }

    /// Set the render function.
    pub fn set_render(self, render: impl Fn(Option<&Value>, &QueryResult) -> N + 'static) -> Self {
        RenderProps {
            render: Some(Rc::new(render)),
            ..self
        }
    }
}

impl<N> Default for RenderProps<N> {
    fn default() -> Self {
        RenderProps {
            variables: VariablesProp::default(),
            extensions: None,
            options: QueryOptions::new(),
            has_loading: None,
            loading: None,
            render: None,
        }
    }
}

impl<N> Debug for RenderProps<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RenderProps")
            .field("variables", &self.variables)
            .field("extensions", &self.extensions)
            .field("options", &self.options)
            .field("has_loading", &self.has_loading)
            .field("loading", &self.loading.as_ref().map(|_| ".."))
            .field("render", &self.render.as_ref().map(|_| ".."))
            .finish()
    }
}

/// The loading/error gate applied to every observed result.
///
/// Order matters: the loading gate runs first, then error surfacing, then
/// the render function. A pending result with `has_loading` false falls
/// through to the render function with no data.
pub(crate) fn render_gate<N>(
    client: &QueryClient<N>,
    result: &QueryResult,
    surface_errors: bool,
    has_loading: bool,
    loading: Option<N>,
    render: Option<&RenderFn<N>>,
) -> Result<N, QueryError>
where
    N: crate::RenderNode,
{
    if result.status.is_pending() && has_loading {
        return Ok(client.loading_node(loading));
    }
    if result.status.is_error() && surface_errors {
        return Err(result
            .error
            .clone()
            .unwrap_or_else(|| QueryError::new("query failed")));
    }
    Ok(render
        .map(|render| render(result.data.as_ref(), result))
        .unwrap_or_else(|| N::from(String::new())))
}
