// ABOUTME: Round-robin team scheduler driving participants through turns until a stop.
// ABOUTME: Owns the shared message log, delivery cursors, termination polling, and team snapshots.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::task::{Context, Poll};

use futures::Stream;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use roundtable_core::error::{ConfigError, StateError};
use roundtable_core::event::RunEvent;
use roundtable_core::message::ChatMessage;
use roundtable_core::task::{StopReason, TaskResult};
use roundtable_core::termination::TerminationCondition;

use crate::participant::{AgentError, Participant};

const STATE_KIND: &str = "round_robin_team";

/// Errors that end a run without a normal stop reason. Both variants carry
/// the messages that had already been committed during the run, so callers
/// keep the partial history.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("turn for '{participant}' failed: {source}")]
    TurnFailed {
        participant: String,
        #[source]
        source: AgentError,
        messages: Vec<ChatMessage>,
    },

    #[error("run cancelled during '{participant}' turn")]
    Cancelled {
        participant: String,
        messages: Vec<ChatMessage>,
    },
}

impl RunError {
    /// The messages committed before the run ended.
    pub fn messages(&self) -> &[ChatMessage] {
        match self {
            RunError::TurnFailed { messages, .. } => messages,
            RunError::Cancelled { messages, .. } => messages,
        }
    }
}

/// Cloneable handle for requesting a graceful stop. The scheduler checks it
/// between turns, never mid-turn, so no turn is interrupted by it.
#[derive(Debug, Clone)]
pub struct StopHandle {
    flag: Arc<AtomicBool>,
}

impl StopHandle {
    pub fn stop(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_set(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Serialized form of a team's resumable state.
#[derive(Serialize, Deserialize)]
struct TeamState {
    kind: String,
    message_log: Vec<ChatMessage>,
    next_speaker: usize,
    cursors: Vec<usize>,
    termination: Option<serde_json::Value>,
    participants: HashMap<String, serde_json::Value>,
}

/// A team that rotates through a fixed participant order, forwarding each
/// participant the messages it has not yet seen and appending each reply to
/// the shared log. The log is owned exclusively by the team; a run ends when
/// the termination condition fires, the turn budget runs out, or a stop is
/// requested.
///
/// `run`/`run_stream` take `&mut self`, so a single team can never be driven
/// by two overlapping runs.
pub struct RoundRobinTeam {
    participants: Vec<Box<dyn Participant>>,
    termination: Option<Box<dyn TerminationCondition>>,
    max_turns: Option<usize>,
    message_log: Vec<ChatMessage>,
    next_speaker: usize,
    /// Per-participant index into `message_log`: everything before it has
    /// already been shown to that participant. Advances only on a
    /// successful turn.
    cursors: Vec<usize>,
    stop_flag: Arc<AtomicBool>,
}

impl RoundRobinTeam {
    /// Create a team over the given participants, in rotation order.
    /// The list must be non-empty and names must be unique.
    pub fn new(participants: Vec<Box<dyn Participant>>) -> Result<Self, ConfigError> {
        if participants.is_empty() {
            return Err(ConfigError::NoParticipants);
        }
        let mut names = HashSet::new();
        for participant in &participants {
            if !names.insert(participant.name().to_string()) {
                return Err(ConfigError::DuplicateParticipant(
                    participant.name().to_string(),
                ));
            }
        }

        let cursors = vec![0; participants.len()];
        Ok(Self {
            participants,
            termination: None,
            max_turns: None,
            message_log: Vec::new(),
            next_speaker: 0,
            cursors,
            stop_flag: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Stop the run when this condition fires. The condition observes every
    /// appended message, in order, exactly once each.
    pub fn with_termination(mut self, condition: Box<dyn TerminationCondition>) -> Self {
        self.termination = Some(condition);
        self
    }

    /// Stop after this many completed turns per run, even if no condition
    /// fires. Zero means a run stops immediately after seeding.
    pub fn with_max_turns(mut self, max_turns: usize) -> Self {
        self.max_turns = Some(max_turns);
        self
    }

    /// Handle for requesting a graceful stop from outside the run loop.
    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            flag: Arc::clone(&self.stop_flag),
        }
    }

    /// The full shared message log accumulated across runs.
    pub fn messages(&self) -> &[ChatMessage] {
        &self.message_log
    }

    /// Run to completion, returning the result. With a task, the run is
    /// seeded with a user message; without one it continues from the current
    /// position.
    pub async fn run(
        &mut self,
        task: Option<&str>,
        cancel: CancellationToken,
    ) -> Result<TaskResult, RunError> {
        self.run_inner(task.map(String::from), None, cancel).await
    }

    /// Run while lazily yielding every observed event: messages as they are
    /// appended, streaming chunks as they arrive, and a final `Completed`
    /// item carrying the task result.
    pub fn run_stream(
        &mut self,
        task: Option<&str>,
        cancel: CancellationToken,
    ) -> TeamStream<'_> {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let task = task.map(String::from);
        let future = Box::pin(self.run_inner(task, Some(events_tx), cancel));
        TeamStream {
            future: Some(future),
            events: events_rx,
            outcome: None,
        }
    }

    /// Re-arm the team for a fresh conversation: clears the log, cursors,
    /// and turn pointer, and resets the termination condition and every
    /// participant.
    pub fn reset(&mut self) {
        self.message_log.clear();
        self.cursors.iter_mut().for_each(|cursor| *cursor = 0);
        self.next_speaker = 0;
        self.stop_flag.store(false, Ordering::SeqCst);
        if let Some(condition) = self.termination.as_mut() {
            condition.reset();
        }
        for participant in &mut self.participants {
            participant.reset();
        }
        tracing::debug!("team reset");
    }

    /// Export the team's full resumable state: the shared log, turn pointer,
    /// delivery cursors, termination internals, and every participant's
    /// state keyed by name.
    pub fn save_state(&self) -> serde_json::Value {
        let participants: HashMap<String, serde_json::Value> = self
            .participants
            .iter()
            .map(|participant| (participant.name().to_string(), participant.save_state()))
            .collect();

        serde_json::to_value(TeamState {
            kind: STATE_KIND.to_string(),
            message_log: self.message_log.clone(),
            next_speaker: self.next_speaker,
            cursors: self.cursors.clone(),
            termination: self.termination.as_ref().map(|c| c.save_state()),
            participants,
        })
        .unwrap_or(serde_json::Value::Null)
    }

    /// Restore state exported by `save_state` into this team, discarding any
    /// existing state entirely. Participant names must match the saved
    /// state; subsequent runs behave as the saved team would have.
    pub fn load_state(&mut self, state: &serde_json::Value) -> Result<(), StateError> {
        let state: TeamState = serde_json::from_value(state.clone())?;
        if state.kind != STATE_KIND {
            return Err(StateError::Mismatch(format!(
                "expected state kind '{STATE_KIND}', got '{}'",
                state.kind
            )));
        }
        if state.cursors.len() != self.participants.len() {
            return Err(StateError::Mismatch(format!(
                "saved state has {} participants, this team has {}",
                state.cursors.len(),
                self.participants.len()
            )));
        }
        if state.next_speaker >= self.participants.len() {
            return Err(StateError::Malformed(format!(
                "next speaker index {} out of range",
                state.next_speaker
            )));
        }

        for participant in &mut self.participants {
            let saved = state.participants.get(participant.name()).ok_or_else(|| {
                StateError::Mismatch(format!(
                    "no saved state for participant '{}'",
                    participant.name()
                ))
            })?;
            participant.load_state(saved)?;
        }

        match (self.termination.as_mut(), &state.termination) {
            (Some(condition), Some(saved)) => condition.load_state(saved)?,
            (Some(condition), None) => condition.reset(),
            _ => {}
        }

        self.message_log = state.message_log;
        self.next_speaker = state.next_speaker;
        self.cursors = state.cursors;
        self.stop_flag.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn run_inner(
        &mut self,
        task: Option<String>,
        events: Option<mpsc::UnboundedSender<RunEvent>>,
        cancel: CancellationToken,
    ) -> Result<TaskResult, RunError> {
        let run_start = self.message_log.len();
        let mut completed_turns = 0usize;
        // A stop request targets the run it was issued during; a fresh run
        // starts unstopped.
        self.stop_flag.store(false, Ordering::SeqCst);

        tracing::info!(
            participants = self.participants.len(),
            continuation = task.is_none(),
            "run starting"
        );

        if let Some(task_text) = task {
            let seed = ChatMessage::text("user", task_text);
            self.message_log.push(seed.clone());
            emit(&events, RunEvent::Message {
                message: seed.clone(),
            });
            if let Some(reason) = self.observe(&seed) {
                return Ok(self.finish(run_start, reason));
            }
        }

        loop {
            // Yield so stream consumers observe queued events and can issue
            // stop requests between turns.
            tokio::task::yield_now().await;

            if self.stop_flag.load(Ordering::SeqCst) {
                return Ok(self.finish(run_start, StopReason::StopRequested));
            }
            if let Some(limit) = self.max_turns
                && completed_turns >= limit
            {
                return Ok(self.finish(run_start, StopReason::MaxTurnsReached { limit }));
            }

            let index = self.next_speaker;
            let new_messages: Vec<ChatMessage> = self.message_log[self.cursors[index]..].to_vec();
            let speaker = &mut self.participants[index];

            tracing::debug!(
                participant = speaker.name(),
                pending = new_messages.len(),
                "turn starting"
            );

            let reply = match speaker.take_turn(&new_messages, events.as_ref(), &cancel).await {
                Ok(reply) => reply,
                Err(AgentError::Cancelled) => {
                    let participant = speaker.name().to_string();
                    tracing::warn!(participant = %participant, "turn cancelled");
                    return Err(RunError::Cancelled {
                        participant,
                        messages: self.message_log[run_start..].to_vec(),
                    });
                }
                Err(source) => {
                    let participant = speaker.name().to_string();
                    tracing::error!(participant = %participant, error = %source, "turn failed");
                    return Err(RunError::TurnFailed {
                        participant,
                        source,
                        messages: self.message_log[run_start..].to_vec(),
                    });
                }
            };

            // Commit the turn: append the reply, mark everything up to and
            // including it as seen by the speaker, rotate the pointer.
            self.message_log.push(reply.clone());
            self.cursors[index] = self.message_log.len();
            self.next_speaker = (index + 1) % self.participants.len();
            completed_turns += 1;

            emit(&events, RunEvent::Message {
                message: reply.clone(),
            });
            if let Some(reason) = self.observe(&reply) {
                return Ok(self.finish(run_start, reason));
            }
        }
    }

    /// Feed one appended message to the termination condition.
    fn observe(&mut self, message: &ChatMessage) -> Option<StopReason> {
        let condition = self.termination.as_mut()?;
        if condition.evaluate(message) {
            Some(StopReason::ConditionFired {
                description: condition.description(),
            })
        } else {
            None
        }
    }

    /// Close out a run: re-arm the termination condition so a follow-up run
    /// can proceed, and slice out the messages this run produced.
    fn finish(&mut self, run_start: usize, stop_reason: StopReason) -> TaskResult {
        if let Some(condition) = self.termination.as_mut() {
            condition.reset();
        }
        tracing::info!(
            stop_reason = %stop_reason,
            messages = self.message_log.len() - run_start,
            "run stopped"
        );
        TaskResult {
            messages: self.message_log[run_start..].to_vec(),
            stop_reason,
        }
    }
}

type RunFuture<'a> = Pin<Box<dyn Future<Output = Result<TaskResult, RunError>> + Send + 'a>>;

/// The lazy event sequence of one run: every appended message, streaming
/// chunks as they arrive, then exactly one `Completed` item (or the run
/// error). Driving this stream drives the run itself.
pub struct TeamStream<'a> {
    future: Option<RunFuture<'a>>,
    events: mpsc::UnboundedReceiver<RunEvent>,
    outcome: Option<Result<TaskResult, RunError>>,
}

impl Stream for TeamStream<'_> {
    type Item = Result<RunEvent, RunError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        // Drive the run; when it completes, dropping the future closes the
        // event channel so the remaining events drain below.
        if let Some(future) = this.future.as_mut()
            && let Poll::Ready(outcome) = future.as_mut().poll(cx)
        {
            this.outcome = Some(outcome);
            this.future = None;
        }

        match this.events.poll_recv(cx) {
            Poll::Ready(Some(event)) => Poll::Ready(Some(Ok(event))),
            Poll::Ready(None) => match this.outcome.take() {
                Some(Ok(result)) => Poll::Ready(Some(Ok(RunEvent::Completed { result }))),
                Some(Err(err)) => Poll::Ready(Some(Err(err))),
                None => Poll::Ready(None),
            },
            Poll::Pending => Poll::Pending,
        }
    }
}

fn emit(events: &Option<mpsc::UnboundedSender<RunEvent>>, event: RunEvent) {
    if let Some(tx) = events {
        // Observers must not feed back into orchestration; a dropped
        // receiver is not an error.
        let _ = tx.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use futures::StreamExt;

    use roundtable_core::termination::{ExternalTermination, MessageCount, TextMention, or};

    use crate::assistant::AssistantAgent;
    use crate::testing::{FailingChatClient, PendingChatClient, QueuedInput, ScriptedChatClient};
    use crate::user_proxy::UserProxyAgent;

    fn assistant(name: &str, replies: &[&str]) -> Box<dyn Participant> {
        let client = Arc::new(ScriptedChatClient::new(replies.iter().copied()));
        Box::new(AssistantAgent::new(name, client))
    }

    fn sources(messages: &[ChatMessage]) -> Vec<&str> {
        messages.iter().map(|m| m.source.as_str()).collect()
    }

    fn texts(messages: &[ChatMessage]) -> Vec<String> {
        messages
            .iter()
            .map(|m| m.content.as_text().into_owned())
            .collect()
    }

    /// Extract the error from a team construction result. A match instead of
    /// unwrap_err() because Box<dyn Participant> does not implement Debug.
    fn expect_config_err(result: Result<RoundRobinTeam, ConfigError>) -> ConfigError {
        match result {
            Err(err) => err,
            Ok(_) => panic!("expected a configuration error"),
        }
    }

    #[tokio::test]
    async fn empty_participant_list_is_rejected() {
        let err = expect_config_err(RoundRobinTeam::new(Vec::new()));
        assert_eq!(err, ConfigError::NoParticipants);
    }

    #[tokio::test]
    async fn duplicate_names_are_rejected() {
        let err = expect_config_err(RoundRobinTeam::new(vec![
            assistant("poet", &["a"]),
            assistant("poet", &["b"]),
        ]));
        assert_eq!(err, ConfigError::DuplicateParticipant("poet".to_string()));
    }

    #[tokio::test]
    async fn each_participant_takes_one_turn_under_budget() {
        let mut team = RoundRobinTeam::new(vec![
            assistant("a", &["reply from a"]),
            assistant("b", &["reply from b"]),
            assistant("c", &["reply from c"]),
        ])
        .unwrap()
        .with_max_turns(3);

        let result = team
            .run(Some("go"), CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(sources(&result.messages), vec!["user", "a", "b", "c"]);
        assert_eq!(result.stop_reason, StopReason::MaxTurnsReached { limit: 3 });
    }

    #[tokio::test]
    async fn marker_stops_run_after_critic_approves() {
        // Two participants: A always "continue", B always "APPROVE".
        let mut team = RoundRobinTeam::new(vec![
            assistant("A", &["continue"]),
            assistant("B", &["APPROVE"]),
        ])
        .unwrap()
        .with_termination(Box::new(TextMention::new("APPROVE").unwrap()));

        let result = team
            .run(Some("start"), CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(sources(&result.messages), vec!["user", "A", "B"]);
        assert_eq!(
            texts(&result.messages),
            vec!["start", "continue", "APPROVE"]
        );
        match &result.stop_reason {
            StopReason::ConditionFired { description } => {
                assert!(description.contains("APPROVE"))
            }
            other => panic!("expected ConditionFired, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn marker_in_seed_stops_before_any_turn() {
        let mut team = RoundRobinTeam::new(vec![assistant("a", &["never used"])])
            .unwrap()
            .with_termination(Box::new(TextMention::new("DONE").unwrap()));

        let result = team
            .run(Some("already DONE"), CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(sources(&result.messages), vec!["user"]);
        assert!(matches!(
            result.stop_reason,
            StopReason::ConditionFired { .. }
        ));
    }

    #[tokio::test]
    async fn budget_exhausted_even_when_marker_never_appears() {
        let mut team = RoundRobinTeam::new(vec![
            assistant("a", &["no marker here"]),
            assistant("b", &["unused"]),
        ])
        .unwrap()
        .with_termination(Box::new(TextMention::new("APPROVE").unwrap()))
        .with_max_turns(1);

        let result = team
            .run(Some("start"), CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(sources(&result.messages), vec!["user", "a"]);
        assert_eq!(result.stop_reason, StopReason::MaxTurnsReached { limit: 1 });
    }

    #[tokio::test]
    async fn zero_budget_stops_immediately_after_seed() {
        let mut team = RoundRobinTeam::new(vec![assistant("a", &["never used"])])
            .unwrap()
            .with_max_turns(0);

        let result = team
            .run(Some("start"), CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(sources(&result.messages), vec!["user"]);
        assert_eq!(result.stop_reason, StopReason::MaxTurnsReached { limit: 0 });
    }

    #[tokio::test]
    async fn continuation_run_resumes_rotation_without_reseeding() {
        let mut team = RoundRobinTeam::new(vec![
            assistant("poet", &["the poem"]),
            assistant("critic", &["needs work"]),
        ])
        .unwrap()
        .with_max_turns(1);

        let first = team
            .run(Some("write a poem"), CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(sources(&first.messages), vec!["user", "poet"]);

        // Continue: no new seed, the critic speaks next and sees everything
        // it has not yet been shown.
        let second = team.run(None, CancellationToken::new()).await.unwrap();
        assert_eq!(sources(&second.messages), vec!["critic"]);

        assert_eq!(
            sources(team.messages()),
            vec!["user", "poet", "critic"],
            "shared log spans both runs"
        );
    }

    #[tokio::test]
    async fn termination_condition_rearms_between_runs() {
        // Consecutive runs with no manual reset: the second run must not
        // stop instantly on the previous run's fired condition.
        let mut team = RoundRobinTeam::new(vec![
            assistant("poet", &["a poem", "a haiku"]),
            assistant("critic", &["APPROVE", "APPROVE"]),
        ])
        .unwrap()
        .with_termination(Box::new(TextMention::new("APPROVE").unwrap()));

        let first = team
            .run(Some("write a poem"), CancellationToken::new())
            .await
            .unwrap();
        assert!(matches!(
            first.stop_reason,
            StopReason::ConditionFired { .. }
        ));

        let second = team
            .run(Some("make it a haiku"), CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(
            sources(&second.messages),
            vec!["user", "poet", "critic"],
            "second run proceeds through fresh turns"
        );
        assert!(matches!(
            second.stop_reason,
            StopReason::ConditionFired { .. }
        ));
    }

    #[tokio::test]
    async fn external_trigger_stops_the_run() {
        let condition = ExternalTermination::new();
        let trigger = condition.trigger();
        trigger.set();

        let mut team = RoundRobinTeam::new(vec![assistant("a", &["reply", "reply"])])
            .unwrap()
            .with_termination(Box::new(condition));

        let result = team
            .run(Some("start"), CancellationToken::new())
            .await
            .unwrap();

        // Fired on the very first observed message, the seed.
        assert_eq!(sources(&result.messages), vec!["user"]);
        assert_eq!(
            result.stop_reason,
            StopReason::ConditionFired {
                description: "external termination requested".to_string()
            }
        );
    }

    #[tokio::test]
    async fn or_combinator_stops_on_either_side() {
        let mut team = RoundRobinTeam::new(vec![
            assistant("a", &["continue"]),
            assistant("b", &["APPROVE"]),
        ])
        .unwrap()
        .with_termination(or(
            Box::new(TextMention::new("APPROVE").unwrap()),
            Box::new(MessageCount::new(50).unwrap()),
        ));

        let result = team
            .run(Some("start"), CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(sources(&result.messages), vec!["user", "a", "b"]);
        match &result.stop_reason {
            StopReason::ConditionFired { description } => {
                assert!(description.contains("APPROVE"));
            }
            other => panic!("expected ConditionFired, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn stop_handle_halts_between_turns() {
        let mut team = RoundRobinTeam::new(vec![
            assistant("a", &["r1", "r3", "r5", "r7"]),
            assistant("b", &["r2", "r4", "r6", "r8"]),
        ])
        .unwrap()
        .with_max_turns(50);

        let handle = team.stop_handle();
        let mut stream = team.run_stream(Some("start"), CancellationToken::new());

        let mut seen_messages = 0;
        let mut final_result = None;
        while let Some(event) = stream.next().await {
            match event.unwrap() {
                RunEvent::Message { .. } => {
                    seen_messages += 1;
                    if seen_messages == 2 {
                        handle.stop();
                    }
                }
                RunEvent::Completed { result } => final_result = Some(result),
                RunEvent::StreamChunk { .. } => {}
            }
        }

        let result = final_result.expect("run should complete");
        assert_eq!(result.stop_reason, StopReason::StopRequested);
        assert!(
            result.messages.len() < 20,
            "stop should cut the run well short of the budget"
        );
    }

    #[tokio::test]
    async fn run_stream_yields_messages_then_completed() {
        let mut team = RoundRobinTeam::new(vec![
            assistant("A", &["continue"]),
            assistant("B", &["APPROVE"]),
        ])
        .unwrap()
        .with_termination(Box::new(TextMention::new("APPROVE").unwrap()));

        let events: Vec<_> = team
            .run_stream(Some("start"), CancellationToken::new())
            .collect::<Vec<_>>()
            .await;

        let mut message_sources = Vec::new();
        let mut completed = 0;
        for event in events {
            match event.unwrap() {
                RunEvent::Message { message } => message_sources.push(message.source),
                RunEvent::Completed { result } => {
                    completed += 1;
                    assert_eq!(result.messages.len(), 3);
                }
                RunEvent::StreamChunk { .. } => panic!("no streaming agents in this team"),
            }
        }

        assert_eq!(message_sources, vec!["user", "A", "B"]);
        assert_eq!(completed, 1, "exactly one terminal event, last");
    }

    #[tokio::test]
    async fn run_stream_forwards_chunks_for_streaming_agents() {
        let client = Arc::new(ScriptedChatClient::new(["waves on the shore"]));
        let poet = Box::new(AssistantAgent::new("poet", client).with_streaming(true));

        let mut team = RoundRobinTeam::new(vec![poet]).unwrap().with_max_turns(1);

        let events: Vec<_> = team
            .run_stream(Some("write"), CancellationToken::new())
            .collect::<Vec<_>>()
            .await;

        let mut chunk_text = String::new();
        for event in events {
            if let RunEvent::StreamChunk { source, text } = event.unwrap() {
                assert_eq!(source, "poet");
                chunk_text.push_str(&text);
            }
        }
        assert_eq!(chunk_text, "waves on the shore");
        // Chunks are cosmetic: the log holds only seed + reply.
        assert_eq!(team.messages().len(), 2);
    }

    #[tokio::test]
    async fn failed_turn_preserves_committed_history() {
        let failing = Box::new(AssistantAgent::new(
            "broken",
            Arc::new(FailingChatClient::new("quota exceeded")),
        ));
        let mut team = RoundRobinTeam::new(vec![failing]).unwrap();

        let err = team
            .run(Some("start"), CancellationToken::new())
            .await
            .unwrap_err();

        match &err {
            RunError::TurnFailed {
                participant,
                source,
                messages,
            } => {
                assert_eq!(participant, "broken");
                assert!(matches!(source, AgentError::Backend(_)));
                assert_eq!(sources(messages), vec!["user"]);
            }
            other => panic!("expected TurnFailed, got {other:?}"),
        }
        // The shared log keeps exactly what was committed before the failure.
        assert_eq!(team.messages().len(), 1);
    }

    #[tokio::test]
    async fn cancellation_is_a_distinct_outcome_and_mutates_nothing() {
        let pending = Box::new(AssistantAgent::new("slow", Arc::new(PendingChatClient)));
        let mut team = RoundRobinTeam::new(vec![pending]).unwrap();

        let cancel = CancellationToken::new();
        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            canceller.cancel();
        });

        let log_before = team.messages().len();
        let err = team.run(Some("start"), cancel).await.unwrap_err();

        match &err {
            RunError::Cancelled {
                participant,
                messages,
            } => {
                assert_eq!(participant, "slow");
                assert_eq!(sources(messages), vec!["user"]);
            }
            other => panic!("expected Cancelled, got {other:?}"),
        }
        // Only the seed was committed; the in-flight turn left no trace.
        assert_eq!(team.messages().len(), log_before + 1);
    }

    #[tokio::test]
    async fn user_proxy_participates_in_rotation() {
        let poet = assistant("poet", &["a poem about the sea"]);
        let proxy = Box::new(UserProxyAgent::new(
            "user_proxy",
            Arc::new(QueuedInput::new(["APPROVE"])),
        ));

        let mut team = RoundRobinTeam::new(vec![poet, proxy])
            .unwrap()
            .with_termination(Box::new(TextMention::new("APPROVE").unwrap()));

        let result = team
            .run(Some("write a poem"), CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(sources(&result.messages), vec!["user", "poet", "user_proxy"]);
        assert!(matches!(
            result.stop_reason,
            StopReason::ConditionFired { .. }
        ));
    }

    #[tokio::test]
    async fn save_and_load_state_round_trip_continues_identically() {
        // Original team: poet speaks under a one-turn budget, then we save.
        let mut original = RoundRobinTeam::new(vec![
            assistant("poet", &["first draft", "second draft"]),
            assistant("critic", &["needs imagery"]),
        ])
        .unwrap()
        .with_max_turns(1);

        original
            .run(Some("write a poem"), CancellationToken::new())
            .await
            .unwrap();
        let state = original.save_state();

        // Fresh team, same names, backends scripted with what the original's
        // backends would say next.
        let mut restored = RoundRobinTeam::new(vec![
            assistant("poet", &["second draft"]),
            assistant("critic", &["needs imagery"]),
        ])
        .unwrap()
        .with_max_turns(1);
        restored.load_state(&state).expect("load state");

        let original_next = original.run(None, CancellationToken::new()).await.unwrap();
        let restored_next = restored.run(None, CancellationToken::new()).await.unwrap();

        assert_eq!(
            sources(&original_next.messages),
            sources(&restored_next.messages)
        );
        assert_eq!(
            texts(&original_next.messages),
            texts(&restored_next.messages)
        );
        assert_eq!(original_next.stop_reason, restored_next.stop_reason);
    }

    #[tokio::test]
    async fn load_state_rejects_mismatched_participants() {
        let mut source_team = RoundRobinTeam::new(vec![assistant("poet", &["x"])]).unwrap();
        let state = source_team.save_state();

        let mut other = RoundRobinTeam::new(vec![assistant("critic", &["y"])]).unwrap();
        let err = other.load_state(&state).unwrap_err();
        assert!(matches!(err, StateError::Mismatch(_)));
    }

    #[tokio::test]
    async fn load_state_overwrites_existing_history() {
        let mut donor = RoundRobinTeam::new(vec![assistant("poet", &["fresh"])]).unwrap();
        let empty_state = donor.save_state();

        let mut team = RoundRobinTeam::new(vec![assistant("poet", &["old reply", "unused"])])
            .unwrap()
            .with_max_turns(1);
        team.run(Some("old task"), CancellationToken::new())
            .await
            .unwrap();
        assert!(!team.messages().is_empty());

        team.load_state(&empty_state).expect("load state");
        assert!(team.messages().is_empty(), "full overwrite, not a merge");
    }

    #[tokio::test]
    async fn reset_rearms_everything() {
        let mut team = RoundRobinTeam::new(vec![
            assistant("poet", &["one", "two"]),
            assistant("critic", &["APPROVE", "APPROVE"]),
        ])
        .unwrap()
        .with_termination(Box::new(TextMention::new("APPROVE").unwrap()));

        team.run(Some("write"), CancellationToken::new())
            .await
            .unwrap();
        assert!(!team.messages().is_empty());

        team.reset();
        assert!(team.messages().is_empty());

        // A full fresh run works after reset.
        let result = team
            .run(Some("write again"), CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(sources(&result.messages), vec!["user", "poet", "critic"]);
    }
}
