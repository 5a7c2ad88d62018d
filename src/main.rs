// ABOUTME: Entry point for the roundtable binary.
// ABOUTME: Parses CLI arguments, initializes tracing, and runs a poet/critic team on the console.

mod console;

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio_util::sync::CancellationToken;

use roundtable_agent::{
    AgentError, AssistantAgent, Participant, RoundRobinTeam, UserInputSource, UserProxyAgent,
    create_chat_client,
};
use roundtable_core::termination::TextMention;
use roundtable_store::{SnapshotData, load_latest_snapshot, save_snapshot};

#[derive(Parser)]
#[command(
    name = "roundtable",
    about = "Run a round-robin team of agents against a task"
)]
struct Args {
    /// Task to seed the conversation with
    #[arg(long, default_value = "Write a short poem about the sea.")]
    task: String,

    /// Inference provider: openai, gemini, or anthropic
    #[arg(long, default_value = "openai")]
    provider: String,

    /// Model override (defaults to the provider's standard model)
    #[arg(long)]
    model: Option<String>,

    /// Marker text that ends the run when any participant mentions it
    #[arg(long, default_value = "APPROVE")]
    marker: String,

    /// Maximum turns per run
    #[arg(long)]
    max_turns: Option<usize>,

    /// Stream partial completion chunks to the console
    #[arg(long)]
    stream: bool,

    /// Replace the critic with an interactive console participant
    #[arg(long)]
    interactive: bool,

    /// Directory for persisting team state across invocations
    #[arg(long)]
    state_dir: Option<PathBuf>,
}

/// Console stdin implementation of the operator input boundary.
struct ConsoleInput;

#[async_trait::async_trait]
impl UserInputSource for ConsoleInput {
    async fn read_input(
        &self,
        prompt: &str,
        _cancel: &CancellationToken,
    ) -> Result<String, AgentError> {
        let prompt = prompt.to_string();
        tokio::task::spawn_blocking(move || {
            print!("{prompt}");
            let _ = std::io::Write::flush(&mut std::io::stdout());
            let mut line = String::new();
            std::io::stdin()
                .read_line(&mut line)
                .map(|_| line.trim_end().to_string())
        })
        .await
        .map_err(|e| AgentError::Input(e.to_string()))?
        .map_err(|e| AgentError::Input(e.to_string()))
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "roundtable=info".parse().unwrap()),
        )
        .init();

    let args = Args::parse();

    let (client, model) = create_chat_client(&args.provider, args.model.as_deref())?;
    tracing::info!(provider = %args.provider, model = %model, "backend ready");

    let primary = Box::new(
        AssistantAgent::new("primary", Arc::clone(&client))
            .with_description("Drafts responses to the task.")
            .with_system_message("You are a helpful assistant. Please assist the user.")
            .with_streaming(args.stream),
    );

    let critic: Box<dyn Participant> = if args.interactive {
        Box::new(UserProxyAgent::new("user_proxy", Arc::new(ConsoleInput)))
    } else {
        Box::new(
            AssistantAgent::new("critic", client)
                .with_description("Reviews drafts and approves finished work.")
                .with_system_message(format!(
                    "Provide constructive feedback to improve. Respond with '{}' only when your \
                     feedback is addressed.",
                    args.marker
                ))
                .with_streaming(args.stream),
        )
    };

    let mut team = RoundRobinTeam::new(vec![primary, critic])?
        .with_termination(Box::new(TextMention::new(args.marker.clone())?));
    if let Some(max_turns) = args.max_turns {
        team = team.with_max_turns(max_turns);
    }

    // Resume from the latest persisted state, if any.
    let mut next_seq = 1;
    if let Some(dir) = &args.state_dir
        && let Some(snapshot) = load_latest_snapshot(dir)?
    {
        team.load_state(&snapshot.state)?;
        next_seq = snapshot.seq + 1;
        tracing::info!(
            seq = snapshot.seq,
            messages = team.messages().len(),
            "resumed team from saved state"
        );
    }

    let outcome = {
        let stream = team.run_stream(Some(&args.task), CancellationToken::new());
        console::render_stream(stream, true).await
    };
    match outcome {
        Ok(result) => {
            tracing::info!(stop_reason = %result.stop_reason, "run finished");
            if let Some(dir) = &args.state_dir {
                save_snapshot(dir, &SnapshotData::new(team.save_state(), next_seq))?;
                tracing::info!(seq = next_seq, "team state saved");
            }
            Ok(())
        }
        Err(err) => {
            let committed = err.messages().len();
            anyhow::bail!("run failed after {committed} committed messages: {err}")
        }
    }
}
