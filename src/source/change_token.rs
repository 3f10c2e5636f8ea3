//! One-shot change notification tokens
//!
//! A token is handed out by a file source for a watched path and fires at most
//! once, when that path changes. Callers that want to keep watching must ask the
//! source for a fresh token.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError, Weak};

type Callback = Box<dyn FnOnce() + Send + 'static>;

#[derive(Default)]
struct TokenState {
    changed: bool,
    next_id: u64,
    /// Pending callbacks keyed by registration id
    callbacks: Vec<(u64, Callback)>,
}

/// Handle to a one-shot change notification
///
/// Clones share the same underlying state, so signalling any clone fires
/// every callback registered through any other clone.
#[derive(Clone)]
pub struct ChangeToken {
    /// `None` for tokens that can never fire
    state: Option<Arc<Mutex<TokenState>>>,
}

impl ChangeToken {
    /// Create a new, unfired token
    pub fn new() -> Self {
        Self {
            state: Some(Arc::new(Mutex::new(TokenState::default()))),
        }
    }

    /// A token that never fires. Used by sources that cannot watch.
    pub fn never() -> Self {
        Self { state: None }
    }

    /// Whether the watched path has changed since the token was issued
    pub fn has_changed(&self) -> bool {
        match &self.state {
            Some(state) => state.lock().unwrap_or_else(PoisonError::into_inner).changed,
            None => false,
        }
    }

    /// Register a callback to run when the token fires
    ///
    /// Runs the callback immediately on the calling thread if the token has
    /// already fired.
    pub fn register_callback<F>(&self, callback: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let Some(state) = &self.state else {
            return;
        };

        let mut state = state.lock().unwrap_or_else(PoisonError::into_inner);
        if state.changed {
            drop(state);
            callback();
            return;
        }
        let id = state.next_id;
        state.next_id += 1;
        state.callbacks.push((id, Box::new(callback)));
    }

    /// Register a callback that is removed again when the returned
    /// registration is dropped
    ///
    /// Holders that live shorter than the token use this so their callbacks
    /// do not pile up on a long-lived token.
    pub fn register_scoped<F>(&self, callback: F) -> CallbackRegistration
    where
        F: FnOnce() + Send + 'static,
    {
        let Some(shared) = &self.state else {
            return CallbackRegistration::empty(self.clone());
        };

        let mut state = shared.lock().unwrap_or_else(PoisonError::into_inner);
        if state.changed {
            drop(state);
            callback();
            return CallbackRegistration::empty(self.clone());
        }
        let id = state.next_id;
        state.next_id += 1;
        state.callbacks.push((id, Box::new(callback)));

        CallbackRegistration {
            token: self.clone(),
            id: Some(id),
        }
    }

    /// Fire the token
    ///
    /// Only the first call has an effect. Callbacks run outside the lock so
    /// they may register further callbacks or query the token.
    pub fn signal(&self) {
        let Some(state) = &self.state else {
            return;
        };

        let callbacks = {
            let mut state = state.lock().unwrap_or_else(PoisonError::into_inner);
            if state.changed {
                return;
            }
            state.changed = true;
            std::mem::take(&mut state.callbacks)
        };

        for (_, callback) in callbacks {
            callback();
        }
    }

    /// Handle that does not keep the token alive
    pub(crate) fn downgrade(&self) -> WeakChangeToken {
        WeakChangeToken {
            state: self.state.as_ref().map(Arc::downgrade),
        }
    }

    #[cfg(test)]
    pub(crate) fn pending_callbacks(&self) -> usize {
        match &self.state {
            Some(state) => state
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .callbacks
                .len(),
            None => 0,
        }
    }
}

/// Non-owning handle to a [`ChangeToken`]
#[derive(Clone)]
pub(crate) struct WeakChangeToken {
    state: Option<Weak<Mutex<TokenState>>>,
}

impl WeakChangeToken {
    /// The token, if anyone still holds it
    pub(crate) fn upgrade(&self) -> Option<ChangeToken> {
        match &self.state {
            Some(state) => state.upgrade().map(|state| ChangeToken { state: Some(state) }),
            None => Some(ChangeToken::never()),
        }
    }

    pub(crate) fn is_alive(&self) -> bool {
        self.state.as_ref().map_or(true, |state| state.strong_count() > 0)
    }
}

/// A callback registered with [`ChangeToken::register_scoped`]
///
/// Keeps the token alive and unregisters the callback on drop.
pub struct CallbackRegistration {
    token: ChangeToken,
    /// `None` when the callback already ran or was never stored
    id: Option<u64>,
}

impl CallbackRegistration {
    fn empty(token: ChangeToken) -> Self {
        Self { token, id: None }
    }

    pub fn token(&self) -> &ChangeToken {
        &self.token
    }
}

impl Drop for CallbackRegistration {
    fn drop(&mut self) {
        let (Some(id), Some(state)) = (self.id, &self.token.state) else {
            return;
        };
        let mut state = state.lock().unwrap_or_else(PoisonError::into_inner);
        state.callbacks.retain(|(pending, _)| *pending != id);
    }
}

impl fmt::Debug for CallbackRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackRegistration")
            .field("id", &self.id)
            .finish()
    }
}

impl Default for ChangeToken {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ChangeToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChangeToken")
            .field("active", &self.state.is_some())
            .field("has_changed", &self.has_changed())
            .finish()
    }
}
