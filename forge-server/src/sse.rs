//! Server-Sent Events stream of orchestrator events.

use std::convert::Infallible;
use std::pin::pin;
use std::time::Duration;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::Json;
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::stream::{Stream, StreamExt};
use serde::Deserialize;
use tracing::{info, warn};

use forge::events::Event as ForgeEvent;
use forge::io::gateway::Completion;
use forge::io::harness::Sandbox;
use forge::orchestrator::submit;

use crate::state::AppState;

/// Body of `POST /generate`.
#[derive(Debug, Deserialize)]
pub struct TaskRequest {
    pub task: String,
}

/// One SSE frame per orchestrator event: `data: <json>`, where the JSON
/// carries the `phase` tag.
fn frame(event: &ForgeEvent) -> Option<Event> {
    match serde_json::to_string(event) {
        Ok(json) => Some(Event::default().data(json)),
        Err(err) => {
            warn!(error = %err, phase = event.phase(), "event serialization failed");
            None
        }
    }
}

/// POST /generate - run one task and stream its events.
///
/// The orchestrator runs on its own task; a client that disconnects stops
/// receiving events but does not cancel the run.
pub async fn generate_handler<C, S>(
    State(state): State<AppState<C, S>>,
    Json(request): Json<TaskRequest>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, StatusCode>
where
    C: Completion + 'static,
    S: Sandbox + 'static,
{
    if request.task.trim().is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }
    info!(task_chars = request.task.len(), "task submitted");

    let events = submit(
        state.gateway,
        state.sandbox,
        state.config.orchestrator.clone(),
        request.task,
    );
    let stream = async_stream::stream! {
        let mut events = pin!(events);
        while let Some(event) = events.next().await {
            if let Some(frame) = frame(&event) {
                yield Ok(frame);
            }
        }
    };

    Ok(Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("ping"),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use forge::core::types::Verdict;
    use forge::events::IterationReport;

    #[test]
    fn frames_carry_phase_in_payload() {
        let event = ForgeEvent::Iteration {
            data: IterationReport {
                round: 2,
                code: "int main() {}".to_string(),
                review: Verdict::failing(40, "prints a label"),
            },
        };
        let json = serde_json::to_string(&event).expect("serialize");
        assert!(json.starts_with(r#"{"phase":"iteration","data":{"round":2"#));
        assert!(frame(&event).is_some());
    }
}
