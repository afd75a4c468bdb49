//! Refinement orchestrator: the state machine driving one task end to end.
//!
//! Stages run strictly in order: classify, resolve test cases, plan, generate,
//! then bounded rounds of execute, audit and refine. The orchestrator is the
//! only writer of the session (transcript, track, blueprint, test cases);
//! per-round bookkeeping lives in an explicit [`RoundState`].

use std::sync::Arc;

use futures::{Stream, StreamExt};
use tokio::sync::mpsc;
use tracing::{info, instrument, warn};

use crate::audit::{self, AuditPolicy};
use crate::cases::{resolve_test_cases, run_test_cases};
use crate::classify::classify;
use crate::core::extract::detect_track;
use crate::core::lock::{LockViolation, declaration_surface, enforce_architecture_lock, violation_critique};
use crate::core::normalize::truncate_chars;
use crate::core::types::{Blueprint, Candidate, Category, TestCase, Track, Transcript, Verdict};
use crate::core::verdict::PASS_SCORE;
use crate::events::{
    CodePayload, Event, EventSink, FailureReport, IterationReport, ReviewPayload,
};
use crate::io::config::OrchestratorConfig;
use crate::io::gateway::{Completion, DEFAULT_TEMPERATURE, StreamEvent};
use crate::io::harness::Sandbox;
use crate::io::prompt::{self, RefineInputs};
use crate::planner;
use crate::report;

/// Temperature for a refinement after the candidate failed execution.
const EXPLORE_TEMPERATURE: f32 = 0.7;
/// Temperature for a refinement of a candidate that already runs correctly.
const STEADY_TEMPERATURE: f32 = 0.0;

const TESTS_FAILURE: &str = "Sorry, the code still fails its tests after repeated fixes.";
const LOCK_FAILURE: &str = "Sorry, the code keeps breaking its locked architecture after repeated fixes.";

/// State fixed before the round loop starts, plus the transcript and the
/// current candidate.
#[derive(Debug, Clone)]
struct Session {
    task: String,
    category: Category,
    /// Target track named in every generation prompt.
    track: Track,
    blueprint: Option<Blueprint>,
    cases: Vec<TestCase>,
    transcript: Transcript,
    candidate: Candidate,
}

/// Last candidate that held the architecture lock; later rounds are compared
/// against it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockAnchor {
    pub code: String,
    pub track: Track,
}

/// Latest candidate that passed execution while holding the lock, with the
/// verdict it earned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PassingRevision {
    pub candidate: Candidate,
    pub verdict: Verdict,
}

/// Bookkeeping threaded through the round loop.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoundState {
    /// 1-based number of the round in progress.
    pub round: u32,
    /// Raw score of the previous audited round, for anti-stagnation.
    pub previous_score: Option<u32>,
    pub run_passed: bool,
    pub run_report: String,
    /// Whether the latest round's candidate held the architecture lock.
    pub lock_held: bool,
    pub verdict: Option<Verdict>,
    pub lock_anchor: Option<LockAnchor>,
    pub last_passing: Option<PassingRevision>,
}

/// How the round loop ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// A candidate was accepted (or survived the bound with passing
    /// execution) and the terminal report was produced.
    Completed(Verdict),
    /// The bound was exhausted without a passing, lock-compliant candidate.
    Failed(FailureReport),
}

/// What one round decided.
enum RoundDecision {
    Accept,
    Refine { temperature: f32, instruction: String },
}

/// Coordinates one task against a gateway and a sandbox.
pub struct Orchestrator<'a, C, S> {
    gateway: &'a C,
    sandbox: &'a S,
    config: &'a OrchestratorConfig,
    sink: EventSink,
}

impl<'a, C: Completion, S: Sandbox> Orchestrator<'a, C, S> {
    pub fn new(gateway: &'a C, sandbox: &'a S, config: &'a OrchestratorConfig, sink: EventSink) -> Self {
        Self {
            gateway,
            sandbox,
            config,
            sink,
        }
    }

    /// Run `task` to completion, emitting events along the way. The stream
    /// always ends with [`Event::Done`].
    #[instrument(skip_all, fields(task_chars = task.len()))]
    pub async fn run(&self, task: &str) -> Outcome {
        self.sink.log("Initializing...");
        let classification = classify(self.gateway, task, &self.sink).await;
        let cases =
            resolve_test_cases(self.gateway, task, classification.category, &self.sink).await;
        let plan = planner::plan(
            self.gateway,
            task,
            classification.user_code,
            self.config.max_design_attempts,
            &self.sink,
        )
        .await;

        let mut session = Session {
            task: task.to_string(),
            category: classification.category,
            track: classification.track,
            blueprint: plan.blueprint,
            cases,
            transcript: Transcript::new(),
            candidate: Candidate::default(),
        };

        match plan.user_code {
            Some(code) => self.load_user_code(&mut session, &code),
            None => {
                self.sink.log("Generating code...");
                session.transcript.push_user(prompt::generation_request(
                    task,
                    false,
                    session.blueprint.as_ref(),
                ));
                let raw = self.generate(&mut session, DEFAULT_TEMPERATURE).await;
                session.candidate = Candidate::new(raw);
            }
        }

        let state = self.refine_loop(&mut session).await;
        let outcome = self.finish(&session, state).await;
        self.sink.emit(Event::done());
        outcome
    }

    fn load_user_code(&self, session: &mut Session, code: &str) {
        session.track = detect_track(code);
        session
            .transcript
            .push_user(prompt::generation_request(&session.task, true, None));
        let wrapped = format!("```{}\n{}\n```", session.track.as_str(), code);
        session.transcript.push_assistant(wrapped.clone());
        self.sink.emit(Event::FinalCode {
            content: CodePayload {
                code: wrapped.clone(),
            },
        });
        self.sink.log("User code loaded; starting review...");
        session.candidate = Candidate::new(wrapped);
    }

    /// Rounds `1..=max_retries + 1`. Returns after acceptance or after the
    /// last round, whichever comes first.
    async fn refine_loop(&self, session: &mut Session) -> RoundState {
        let total_rounds = self.config.max_retries + 1;
        let mut state = RoundState::default();

        for round in 1..=total_rounds {
            state.round = round;
            let last_round = round == total_rounds;

            if !session.candidate.has_code() {
                warn!(round, "no code in candidate");
                state.run_passed = false;
                state.lock_held = true;
                state.run_report = "No code block could be extracted.".to_string();
                if last_round {
                    break;
                }
                self.sink.log("Code extraction failed; retrying...");
                session
                    .transcript
                    .push_user(prompt::MISSING_CODE_CORRECTION);
                self.sink.emit(Event::clear_code());
                let raw = self.generate(session, DEFAULT_TEMPERATURE).await;
                session.candidate = Candidate::new(raw);
                continue;
            }

            let decision = self.play_round(session, &mut state).await;
            match decision {
                RoundDecision::Accept => {
                    self.sink.log("Code passed every check.");
                    break;
                }
                RoundDecision::Refine { .. } if last_round => {
                    self.sink.log("Reached the maximum number of retries.");
                }
                RoundDecision::Refine {
                    temperature,
                    instruction,
                } => {
                    session.transcript.push_user(instruction);
                    self.sink.emit(Event::clear_code());
                    let raw = self.generate(session, temperature).await;
                    session.candidate = Candidate::new(raw);
                }
            }
        }
        state
    }

    /// Execute, lock-check and audit one candidate.
    #[instrument(skip_all, fields(round = state.round))]
    async fn play_round(&self, session: &Session, state: &mut RoundState) -> RoundDecision {
        let code = session.candidate.code.as_str();
        let track = detect_track(&session.candidate.raw);
        self.sink.log(format!(
            "Running round {} tests ({})...",
            state.round,
            track.as_str()
        ));
        let run = run_test_cases(
            self.sandbox,
            code,
            track,
            &session.cases,
            session.category,
            &self.sink,
        )
        .await;
        state.run_passed = run.passed;
        state.run_report = run.report;

        let lock = check_lock(state.lock_anchor.as_ref(), code, track);
        state.lock_held = lock.is_ok();

        self.sink.log("Reviewing...");
        let verdict = match &lock {
            Err(violation) => {
                warn!(%violation, "architecture lock violated");
                state.previous_score = None;
                Verdict::failing(0, violation_critique(violation, session.blueprint.as_ref()))
            }
            Ok(()) => {
                advance_anchor(state, code, track);
                if state.run_passed {
                    let outcome = audit::audit(
                        self.gateway,
                        AuditPolicy::for_category(session.category),
                        &session.task,
                        session.blueprint.as_ref(),
                        code,
                        state.previous_score,
                    )
                    .await;
                    state.previous_score = Some(outcome.raw_score);
                    outcome.verdict
                } else {
                    audit::diagnose(self.gateway, code, &state.run_report, &session.task).await
                }
            }
        };

        self.sink.emit(Event::Iteration {
            data: IterationReport {
                round: state.round,
                code: session.candidate.raw.clone(),
                review: verdict.clone(),
            },
        });
        info!(score = verdict.score, run_passed = state.run_passed, "round reviewed");
        if state.run_passed && lock.is_ok() {
            state.last_passing = Some(PassingRevision {
                candidate: session.candidate.clone(),
                verdict: verdict.clone(),
            });
        }

        let polish = session.category == Category::Code && state.round == 1 && state.run_passed;
        let accepted = verdict.score >= PASS_SCORE && state.run_passed && !polish;
        state.verdict = Some(verdict.clone());
        if accepted {
            return RoundDecision::Accept;
        }

        if polish {
            self.sink.log("Tests pass; requesting a style polish...");
        } else {
            self.sink.log(format!("Score {}; requesting a fix...", verdict.score));
        }
        let lock_warning = lock.as_ref().err().map(LockViolation::to_string);
        let instruction = prompt::refine_instruction(&RefineInputs {
            polish,
            critique: &verdict.critique,
            report: &state.run_report,
            track: session.track,
            blueprint: session.blueprint.as_ref(),
            lock_warning: lock_warning.as_deref(),
        });
        let temperature = if state.run_passed {
            STEADY_TEMPERATURE
        } else {
            EXPLORE_TEMPERATURE
        };
        RoundDecision::Refine {
            temperature,
            instruction,
        }
    }

    /// Stream one generation over the transcript, forwarding tokens as
    /// `code_chunk` events. The full text is appended to the transcript.
    ///
    /// A broken stream or one exceeding the generation timeout yields an
    /// empty string and appends nothing.
    async fn generate(&self, session: &mut Session, temperature: f32) -> String {
        let system_prompt =
            prompt::coder_system(session.category, session.track, session.blueprint.as_ref());
        let mut stream =
            self.gateway
                .complete_stream(&system_prompt, session.transcript.messages(), temperature);

        let collect = async {
            while let Some(event) = stream.next().await {
                match event {
                    StreamEvent::Delta { token, .. } => {
                        self.sink.emit(Event::CodeChunk { content: token });
                    }
                    StreamEvent::Finished { text } => return Some(text),
                    StreamEvent::Failed { reason } => {
                        self.sink.log(format!(
                            "Generation interrupted: {}...",
                            truncate_chars(&reason, 50)
                        ));
                        return None;
                    }
                }
            }
            None
        };

        match tokio::time::timeout(self.config.generation_timeout(), collect).await {
            Ok(Some(text)) => {
                session.transcript.push_assistant(text.clone());
                text
            }
            Ok(None) => String::new(),
            Err(_) => {
                warn!("generation timed out");
                self.sink.log("Generation timed out.");
                String::new()
            }
        }
    }

    /// Terminal phase: the report on success, the failure report otherwise.
    ///
    /// A final candidate that runs correctly but broke the architecture lock
    /// is replaced by the last passing, lock-compliant revision when there is
    /// one.
    async fn finish(&self, session: &Session, state: RoundState) -> Outcome {
        let verdict = state
            .verdict
            .unwrap_or_else(|| Verdict::failing(0, "No candidate could be reviewed."));

        if !state.run_passed {
            return self.fail(verdict, &state.run_report, TESTS_FAILURE);
        }
        let (candidate, verdict) = if state.lock_held {
            (session.candidate.clone(), verdict)
        } else {
            match state.last_passing {
                Some(revision) => {
                    warn!(round = state.round, "final round broke the lock; restoring last compliant revision");
                    self.sink.log(
                        "Final revision broke the architecture lock; keeping the last compliant one.",
                    );
                    self.sink.emit(Event::FinalCode {
                        content: CodePayload {
                            code: revision.candidate.raw.clone(),
                        },
                    });
                    (revision.candidate, revision.verdict)
                }
                None => return self.fail(verdict, &state.run_report, LOCK_FAILURE),
            }
        };

        self.sink.log("Generating improvement suggestions...");
        let verdict = report::improve(self.gateway, &candidate.code, verdict).await;
        self.sink.emit(Event::FinalCodeUpdate {
            content: ReviewPayload {
                review: verdict.clone(),
            },
        });

        self.sink.log("Generating the analysis report...");
        let report = report::final_report(
            self.gateway,
            session.category,
            &session.task,
            &candidate.raw,
            &candidate.code,
        )
        .await;
        self.sink.emit(Event::Diagram {
            content: report.diagram,
        });
        self.sink.emit(Event::Explanation {
            content: report.explanation,
        });
        self.sink.log("Task complete.");
        Outcome::Completed(verdict)
    }

    fn fail(&self, verdict: Verdict, run_report: &str, message: &str) -> Outcome {
        self.sink.log("Circuit breaker: the code still fails its checks.");
        self.sink.emit(Event::FinalCodeUpdate {
            content: ReviewPayload {
                review: verdict.clone(),
            },
        });
        let failure = FailureReport {
            message: message.to_string(),
            issues: format!("{}\n{}", run_report.trim_end(), verdict.critique),
        };
        self.sink.emit(Event::FailureReport {
            content: failure.clone(),
        });
        Outcome::Failed(failure)
    }
}

/// Compare `code` against the anchor. No anchor means nothing to hold yet.
fn check_lock(anchor: Option<&LockAnchor>, code: &str, track: Track) -> Result<(), LockViolation> {
    match anchor {
        None => Ok(()),
        Some(anchor) if anchor.track != track => Err(LockViolation::TrackChanged {
            from: anchor.track,
            to: track,
        }),
        Some(anchor) => enforce_architecture_lock(&anchor.code, code, track),
    }
}

/// Make a lock-compliant candidate the new anchor. The first anchor is only
/// taken from code that parses, so an early syntax error cannot poison every
/// later comparison.
fn advance_anchor(state: &mut RoundState, code: &str, track: Track) {
    if state.lock_anchor.is_none() && declaration_surface(code, track).is_err() {
        return;
    }
    state.lock_anchor = Some(LockAnchor {
        code: code.to_string(),
        track,
    });
}

/// Run `task` on a background task and return its event stream.
///
/// Dropping the stream does not cancel the task; remaining events are
/// discarded.
pub fn submit<C, S>(
    gateway: Arc<C>,
    sandbox: Arc<S>,
    config: OrchestratorConfig,
    task: String,
) -> impl Stream<Item = Event> + Send + 'static
where
    C: Completion + 'static,
    S: Sandbox + 'static,
{
    let (tx, mut rx) = mpsc::unbounded_channel();
    let sink = EventSink::new(tx);
    tokio::spawn(async move {
        let orchestrator = Orchestrator::new(gateway.as_ref(), sandbox.as_ref(), &config, sink);
        orchestrator.run(&task).await;
    });
    async_stream::stream! {
        while let Some(event) = rx.recv().await {
            yield event;
        }
    }
}
