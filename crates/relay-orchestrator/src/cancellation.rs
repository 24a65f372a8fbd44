//! Cancellation signals for in-flight executions.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use tokio_util::sync::CancellationToken;

/// Tokens for the executions running in this process, keyed by execution id.
///
/// A run checks its token between files; `cancel` trips it.
#[derive(Debug, Default)]
pub struct CancellationRegistry {
    tokens: Mutex<HashMap<String, CancellationToken>>,
}

impl CancellationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a run and return its token.
    pub fn register(&self, execution_id: &str) -> CancellationToken {
        let token = CancellationToken::new();
        self.tokens
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(execution_id.to_string(), token.clone());
        token
    }

    /// Trip the token of a running execution. Returns false if it is not running here.
    pub fn cancel(&self, execution_id: &str) -> bool {
        match self
            .tokens
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(execution_id)
        {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn remove(&self, execution_id: &str) {
        self.tokens
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(execution_id);
    }

    /// Number of registered runs.
    pub fn len(&self) -> usize {
        self.tokens.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
