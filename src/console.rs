// ABOUTME: Console observer rendering a team run's event stream with usage statistics.
// ABOUTME: Purely an observation sink; nothing here feeds back into orchestration state.

use std::io::{self, Write};

use futures::{Stream, StreamExt};

use roundtable_agent::RunError;
use roundtable_core::event::RunEvent;
use roundtable_core::task::TaskResult;

/// Render every event from a run stream to stdout and return the final
/// result. Messages print under a source banner; streaming chunks print
/// inline as they arrive and are superseded by the final message.
pub async fn render_stream<S>(mut stream: S, output_stats: bool) -> Result<TaskResult, RunError>
where
    S: Stream<Item = Result<RunEvent, RunError>> + Unpin,
{
    let mut streaming_source: Option<String> = None;

    while let Some(event) = stream.next().await {
        match event? {
            RunEvent::StreamChunk { source, text } => {
                if streaming_source.as_deref() != Some(source.as_str()) {
                    println!("---------- {source} (streaming) ----------");
                    streaming_source = Some(source);
                }
                print!("{text}");
                let _ = io::stdout().flush();
            }
            RunEvent::Message { message } => {
                if streaming_source.take().is_some() {
                    println!();
                }
                println!("---------- {} ----------", message.source);
                println!("{}", message.content.as_text());
                if output_stats && let Some(usage) = &message.usage {
                    println!(
                        "[prompt tokens: {}, completion tokens: {}]",
                        usage.prompt_tokens, usage.completion_tokens
                    );
                }
            }
            RunEvent::Completed { result } => {
                if streaming_source.take().is_some() {
                    println!();
                }
                println!("---------- run finished ----------");
                println!("stop reason: {}", result.stop_reason);
                if output_stats {
                    let total = result.total_usage();
                    println!(
                        "messages: {}, prompt tokens: {}, completion tokens: {}",
                        result.messages.len(),
                        total.prompt_tokens,
                        total.completion_tokens
                    );
                }
                return Ok(result);
            }
        }
    }

    // The stream contract ends every successful run with a Completed event;
    // reaching here means the run was dropped mid-flight.
    Err(RunError::Cancelled {
        participant: "<none>".to_string(),
        messages: Vec::new(),
    })
}
