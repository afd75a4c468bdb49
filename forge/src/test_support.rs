//! Scripted collaborators for driving the orchestrator without a network or
//! toolchains.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use futures::stream::{self, BoxStream, StreamExt};

use crate::core::types::{ExecutionResult, Message, Track};
use crate::io::gateway::{Completion, EMPTY_STRUCTURED, StreamEvent, error_sentinel};
use crate::io::harness::Sandbox;

/// A recorded one-shot completion call.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionCall {
    pub system_prompt: String,
    pub content: String,
    pub structured: bool,
    pub temperature: f32,
}

/// A recorded streaming call.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamCall {
    pub system_prompt: String,
    pub history: Vec<Message>,
    pub temperature: f32,
}

/// A queued streamed generation.
#[derive(Debug)]
enum Generation {
    Text(String),
    /// Opens a stream that never yields.
    Stalled,
}

#[derive(Debug, Default)]
struct Script {
    /// `(needle, queued replies)`; a call is routed to the first route whose
    /// needle occurs in its system prompt and still has replies.
    routes: Vec<(String, VecDeque<String>)>,
    generations: VecDeque<Generation>,
    calls: Vec<CompletionCall>,
    streams: Vec<StreamCall>,
}

/// Gateway returning canned completions.
///
/// Unscripted one-shot calls get the same sentinels a failing backend would
/// return; an unscripted stream fails.
#[derive(Debug, Default)]
pub struct ScriptedGateway {
    script: Mutex<Script>,
}

impl ScriptedGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `reply` for the next call whose system prompt contains `needle`.
    pub fn with_completion(self, needle: &str, reply: &str) -> Self {
        {
            let mut script = self.script.lock().expect("script lock");
            match script.routes.iter_mut().find(|(n, _)| n == needle) {
                Some((_, replies)) => replies.push_back(reply.to_string()),
                None => script
                    .routes
                    .push((needle.to_string(), VecDeque::from([reply.to_string()]))),
            }
        }
        self
    }

    /// Queue `text` as the next streamed generation.
    pub fn with_generation(self, text: &str) -> Self {
        self.script
            .lock()
            .expect("script lock")
            .generations
            .push_back(Generation::Text(text.to_string()));
        self
    }

    /// Queue a generation that opens but never produces a token.
    pub fn with_stalled_generation(self) -> Self {
        self.script
            .lock()
            .expect("script lock")
            .generations
            .push_back(Generation::Stalled);
        self
    }

    pub fn calls(&self) -> Vec<CompletionCall> {
        self.script.lock().expect("script lock").calls.clone()
    }

    /// One-shot calls whose system prompt contains `needle`.
    pub fn calls_matching(&self, needle: &str) -> Vec<CompletionCall> {
        self.calls()
            .into_iter()
            .filter(|call| call.system_prompt.contains(needle))
            .collect()
    }

    pub fn streams(&self) -> Vec<StreamCall> {
        self.script.lock().expect("script lock").streams.clone()
    }

    /// Panic if any scripted reply or generation was never consumed.
    pub fn assert_drained(&self) {
        let script = self.script.lock().expect("script lock");
        let pending: Vec<String> = script
            .routes
            .iter()
            .filter(|(_, replies)| !replies.is_empty())
            .map(|(needle, replies)| {
                let head: String = needle.lines().next().unwrap_or_default().to_string();
                format!("{head:?} x{}", replies.len())
            })
            .collect();
        assert!(pending.is_empty(), "unconsumed completions: {pending:?}");
        assert!(
            script.generations.is_empty(),
            "unconsumed generations: {}",
            script.generations.len()
        );
    }
}

impl Completion for ScriptedGateway {
    async fn complete(
        &self,
        system_prompt: &str,
        content: &str,
        structured: bool,
        temperature: f32,
    ) -> String {
        let mut script = self.script.lock().expect("script lock");
        script.calls.push(CompletionCall {
            system_prompt: system_prompt.to_string(),
            content: content.to_string(),
            structured,
            temperature,
        });
        let reply = script
            .routes
            .iter_mut()
            .find(|(needle, replies)| system_prompt.contains(needle.as_str()) && !replies.is_empty())
            .and_then(|(_, replies)| replies.pop_front());
        match reply {
            Some(reply) => reply,
            None if structured => EMPTY_STRUCTURED.to_string(),
            None => error_sentinel("unscripted completion"),
        }
    }

    fn complete_stream(
        &self,
        system_prompt: &str,
        history: &[Message],
        temperature: f32,
    ) -> BoxStream<'static, StreamEvent> {
        let mut script = self.script.lock().expect("script lock");
        script.streams.push(StreamCall {
            system_prompt: system_prompt.to_string(),
            history: history.to_vec(),
            temperature,
        });
        let text = match script.generations.pop_front() {
            Some(Generation::Text(text)) => text,
            Some(Generation::Stalled) => return stream::pending().boxed(),
            None => {
                return stream::iter([StreamEvent::Failed {
                    reason: "unscripted generation".to_string(),
                }])
                .boxed();
            }
        };

        let mut events = Vec::new();
        let mut accumulated = String::new();
        for token in text.split_inclusive(['\n', ' ']) {
            accumulated.push_str(token);
            events.push(StreamEvent::Delta {
                token: token.to_string(),
                accumulated: accumulated.clone(),
            });
        }
        events.push(StreamEvent::Finished { text });
        stream::iter(events).boxed()
    }
}

/// Sandbox returning canned results keyed by stdin.
///
/// Each input maps to a queue; the last queued result repeats once the queue
/// is down to one entry, so a single script covers every round.
#[derive(Debug, Default)]
pub struct ScriptedSandbox {
    results: Mutex<HashMap<String, VecDeque<ExecutionResult>>>,
    runs: Mutex<Vec<(String, Track, String)>>,
}

impl ScriptedSandbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_result(self, input: &str, result: ExecutionResult) -> Self {
        self.results
            .lock()
            .expect("results lock")
            .entry(input.to_string())
            .or_default()
            .push_back(result);
        self
    }

    /// Shorthand for a clean run printing `stdout`.
    pub fn with_stdout(self, input: &str, stdout: &str) -> Self {
        self.with_result(
            input,
            ExecutionResult {
                stdout: stdout.to_string(),
                ..ExecutionResult::default()
            },
        )
    }

    /// Every `(code, track, input)` the sandbox was asked to run.
    pub fn runs(&self) -> Vec<(String, Track, String)> {
        self.runs.lock().expect("runs lock").clone()
    }
}

impl Sandbox for ScriptedSandbox {
    async fn run(&self, code: &str, track: Track, input: &str) -> ExecutionResult {
        self.runs
            .lock()
            .expect("runs lock")
            .push((code.to_string(), track, input.to_string()));
        let mut results = self.results.lock().expect("results lock");
        let Some(queue) = results.get_mut(input) else {
            return ExecutionResult::diagnostic(format!("no scripted result for input {input:?}"));
        };
        if queue.len() > 1 {
            queue.pop_front().unwrap_or_default()
        } else {
            queue.front().cloned().unwrap_or_default()
        }
    }
}
