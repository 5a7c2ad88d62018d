// ABOUTME: Provider module aggregating the inference backend adapters.
// ABOUTME: Each sub-module implements ChatClient for a specific LLM API.

pub mod anthropic;
pub mod openai;

/// Incremental line buffer for server-sent-event response bodies. Push raw
/// byte chunks as they arrive; pop complete `data:` payloads. Chunks may
/// split lines at arbitrary byte positions.
pub(crate) struct SseLineBuffer {
    buffer: String,
}

impl SseLineBuffer {
    pub(crate) fn new() -> Self {
        Self {
            buffer: String::new(),
        }
    }

    pub(crate) fn push(&mut self, chunk: &[u8]) {
        self.buffer.push_str(&String::from_utf8_lossy(chunk));
    }

    /// Next complete `data:` payload, if a full line is buffered. Event-name
    /// lines, comments, and blank separators are skipped.
    pub(crate) fn next_data(&mut self) -> Option<String> {
        while let Some(pos) = self.buffer.find('\n') {
            let line: String = self.buffer.drain(..=pos).collect();
            let line = line.trim();
            if let Some(data) = line.strip_prefix("data:") {
                return Some(data.trim().to_string());
            }
        }
        None
    }
}
