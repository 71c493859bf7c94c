use std::cell::RefCell;
use std::fmt::{self, Debug};
use std::rc::Rc;

use slotmap::SlotMap;

use crate::error::QueryError;
use crate::query_client::{ErrorFallback, QueryClient};

slotmap::new_key_type! {
    /// Key for a registered reset listener.
    pub struct ResetKey;
}

type ResetListeners = Rc<RefCell<SlotMap<ResetKey, Box<dyn Fn()>>>>;

/// Handle passed into error fallbacks for retrying out of the error state.
///
/// Calling [`reset`](Self::reset) notifies every listener registered on the
/// owning [`Catch`]; hosts typically re-run the failed subtree from one.
#[derive(Clone)]
pub struct ResetHandle {
    listeners: ResetListeners,
}

impl ResetHandle {
    /// Notify all reset listeners.
    pub fn reset(&self) {
        let listeners = self.listeners.try_borrow().expect("reset notify borrow");
        for listener in listeners.values() {
            listener();
        }
    }
}

impl Debug for ResetHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResetHandle").finish_non_exhaustive()
    }
}

/// Error boundary over a rendered subtree.
///
/// [`run`](Self::run) renders `children` and swaps in a fallback when they
/// surface a [`QueryError`]. Fallback precedence is boundary, then client,
/// then a built-in message node.
pub struct Catch<N> {
    fallback: Option<ErrorFallback<N>>,
    listeners: ResetListeners,
}

impl<N> Catch<N> {
    /// A boundary with no fallback of its own.
    pub fn new() -> Self {
        Catch {
            fallback: None,
            listeners: Rc::new(RefCell::new(SlotMap::with_key())),
        }
    }

    /// Set this boundary's fallback.
    pub fn set_fallback(self, fallback: ErrorFallback<N>) -> Self {
        Catch {
            fallback: Some(fallback),
            ..self
        }
    }

    /// Register a listener invoked on every [`ResetHandle::reset`].
    pub fn on_reset(&self, listener: impl Fn() + 'static) -> ResetKey {
        let mut listeners = self
            .listeners
            .try_borrow_mut()
            .expect("on_reset borrow_mut");
        listeners.insert(Box::new(listener))
    }

    /// Remove a reset listener. Returns whether it was registered.
    pub fn remove_reset_listener(&self, key: ResetKey) -> bool {
        let mut listeners = self
            .listeners
            .try_borrow_mut()
            .expect("remove_listener borrow_mut");
        let removed = listeners.remove(key).is_some();
        if !removed {
            log::debug!("reset listener was already removed");
        }
        removed
    }

    /// A reset handle bound to this boundary's listeners.
    pub fn reset_handle(&self) -> ResetHandle {
        ResetHandle {
            listeners: self.listeners.clone(),
        }
    }
}

impl<N> Catch<N>
where
    N: crate::RenderNode,
{
    /// Render `children`, swapping in a fallback if they surface an error.
    pub fn run(
        &self,
        client: &QueryClient<N>,
        children: impl FnOnce() -> Result<N, QueryError>,
    ) -> N {
        match children() {
            Ok(node) => node,
            Err(error) => client
                .error_fallback(self.fallback.as_ref())
                .resolve(&error, self.reset_handle()),
        }
    }
}

impl<N> Default for Catch<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<N> Debug for Catch<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Catch")
            .field("fallback", &self.fallback)
            .finish_non_exhaustive()
    }
}
