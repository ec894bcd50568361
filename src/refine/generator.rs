//! Generator abstraction for LLM collaborators.
//!
//! The [`Generator`] trait decouples goal refinement from the actual model
//! transport. The engine is indifferent to the provider; tests and the demo
//! use scripted generators that return predetermined responses without any
//! network traffic.

use std::collections::VecDeque;
use std::sync::Mutex;

use anyhow::{anyhow, Result};

use crate::core::cancel::CancelToken;

/// Produces a textual response for a textual prompt.
///
/// Implementations are responsible for honoring the cancellation token
/// inside their own I/O.
pub trait Generator {
    fn generate(&self, cancel: &CancelToken, prompt: &str) -> Result<String>;
}

/// Generator that replays a fixed queue of responses, in order.
pub struct ScriptedGenerator {
    responses: Mutex<VecDeque<String>>,
}

impl ScriptedGenerator {
    pub fn new(responses: impl IntoIterator<Item = String>) -> Self {
        Self {
            responses: Mutex::new(responses.into_iter().collect()),
        }
    }

    pub fn push(&self, response: impl Into<String>) {
        self.responses
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push_back(response.into());
    }
}

impl Generator for ScriptedGenerator {
    fn generate(&self, cancel: &CancelToken, _prompt: &str) -> Result<String> {
        cancel.check()?;
        self.responses
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .pop_front()
            .ok_or_else(|| anyhow!("scripted generator exhausted"))
    }
}
