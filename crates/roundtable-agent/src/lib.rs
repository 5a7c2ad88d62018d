// ABOUTME: Agent system for roundtable: participants, inference clients, and the team scheduler.
// ABOUTME: Defines the turn-taking capability and the round-robin orchestration built on it.

pub mod assistant;
pub mod client;
pub mod context;
pub mod participant;
pub mod providers;
pub mod team;
pub mod testing;
pub mod user_proxy;

pub use assistant::AssistantAgent;
pub use client::{
    BackendError, ChatClient, CompletionEvent, CompletionRequest, CompletionStream, CreateResult,
    ResponseSchema, create_chat_client,
};
pub use context::{AgentContext, ContextMessage, ContextRole};
pub use participant::{AgentError, Participant};
pub use team::{RoundRobinTeam, RunError, StopHandle, TeamStream};
pub use user_proxy::{UserInputSource, UserProxyAgent};
