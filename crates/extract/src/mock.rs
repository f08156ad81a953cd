//! Deterministic LLM double for tests.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::llm::{CompletionRequest, LlmClient, LlmError};

type Reply = Result<String, LlmError>;

#[derive(Default)]
struct Script {
    queued: HashMap<String, VecDeque<Reply>>,
    standing: HashMap<String, Reply>,
    calls: Vec<CompletionRequest>,
}

/// Replies by task name. Queued replies are consumed first, then the
/// standing reply for the task; a task with neither gets an
/// `InvalidResponse` error.
///
/// Clones share the same script and call log.
#[derive(Clone, Default)]
pub struct ScriptedLlm {
    script: Arc<Mutex<Script>>,
}

impl ScriptedLlm {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue a one-shot reply
    pub fn respond(&self, task: &str, body: impl Into<String>) -> &Self {
        self.lock()
            .queued
            .entry(task.to_string())
            .or_default()
            .push_back(Ok(body.into()));
        self
    }

    /// Queue a one-shot failure
    pub fn fail(&self, task: &str, error: LlmError) -> &Self {
        self.lock()
            .queued
            .entry(task.to_string())
            .or_default()
            .push_back(Err(error));
        self
    }

    /// Reply used whenever nothing is queued for `task`
    pub fn respond_always(&self, task: &str, body: impl Into<String>) -> &Self {
        self.lock().standing.insert(task.to_string(), Ok(body.into()));
        self
    }

    pub fn fail_always(&self, task: &str, error: LlmError) -> &Self {
        self.lock().standing.insert(task.to_string(), Err(error));
        self
    }

    pub fn calls(&self) -> Vec<CompletionRequest> {
        self.lock().calls.clone()
    }

    pub fn call_count(&self, task: &str) -> usize {
        self.lock().calls.iter().filter(|c| c.task == task).count()
    }
}

#[async_trait]
impl LlmClient for ScriptedLlm {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, LlmError> {
        let mut script = self.lock();
        script.calls.push(request.clone());

        if let Some(reply) = script
            .queued
            .get_mut(&request.task)
            .and_then(|queue| queue.pop_front())
        {
            return reply;
        }

        match script.standing.get(&request.task) {
            Some(reply) => reply.clone(),
            None => Err(LlmError::InvalidResponse(format!(
                "no scripted reply for task '{}'",
                request.task
            ))),
        }
    }
}
