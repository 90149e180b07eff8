//! Scripted [`CompletionBackend`] for tests.

use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;

use super::backend::{CompletionBackend, CompletionRequest};
use crate::errors::GenerationError;

/// Replies are consumed in order; every request is recorded.
#[derive(Default)]
pub struct MockCompletionBackend {
    responses: Mutex<VecDeque<Result<String, GenerationError>>>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl MockCompletionBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_text(&self, text: impl Into<String>) -> &Self {
        self.responses
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(Ok(text.into()));
        self
    }

    pub fn push_error(&self, error: GenerationError) -> &Self {
        self.responses
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(Err(error));
        self
    }

    pub fn remaining(&self) -> usize {
        self.responses
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// User prompts of every request, in order.
    pub fn prompts(&self) -> Vec<String> {
        self.requests().into_iter().map(|r| r.prompt).collect()
    }
}

/// A well-formed generation reply for a minimal project whose manifest is
/// named `name`.
pub fn sample_reply(name: &str) -> String {
    let manifest = serde_json::json!({
        "name": name,
        "version": "1.0.0",
        "dependencies": { "react": "18.2.0", "react-native": "0.72.0" }
    });
    serde_json::json!({
        "files": {
            "App.js": "import React from 'react';\nexport default function App() { return null; }\n",
            "package.json": serde_json::to_string_pretty(&manifest).unwrap_or_default(),
        },
        "appName": name,
        "requirements": ["react", "react-native"],
    })
    .to_string()
}

impl std::fmt::Debug for MockCompletionBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockCompletionBackend")
            .field("remaining", &self.remaining())
            .finish()
    }
}

#[async_trait]
impl CompletionBackend for MockCompletionBackend {
    async fn complete(&self, request: CompletionRequest) -> Result<String, GenerationError> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(request);
        self.responses
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
            .unwrap_or_else(|| {
                Err(GenerationError::Service(
                    "MockCompletionBackend: no more responses in queue".to_string(),
                ))
            })
    }

    fn name(&self) -> &str {
        "mock"
    }
}
