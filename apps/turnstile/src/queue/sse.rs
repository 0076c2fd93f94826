//! Incremental server-sent-events decoder.
//!
//! The queue stream arrives as `text/event-stream` frames: `event:` and
//! `data:` lines terminated by a blank line. Chunk boundaries fall anywhere,
//! so the decoder buffers partial lines across `push` calls and only yields
//! complete frames.

/// One complete frame from the stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseFrame {
    /// Event name; empty when the server omitted the `event:` field.
    pub event: String,
    /// Data payload; multi-line data is joined with `\n` per the format.
    pub data: String,
}

#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: String,
    event: String,
    data_lines: Vec<String>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds a chunk of bytes and returns every frame completed by it.
    ///
    /// Non-UTF-8 chunks are decoded lossily; the stream format is text and
    /// the payloads are JSON, so replacement characters surface as payload
    /// parse errors downstream rather than killing the stream here.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseFrame> {
        self.buffer.push_str(&String::from_utf8_lossy(chunk));
        let mut frames = Vec::new();

        while let Some(newline) = self.buffer.find('\n') {
            let mut line: String = self.buffer.drain(..=newline).collect();
            if line.ends_with('\n') {
                line.pop();
            }
            if line.ends_with('\r') {
                line.pop();
            }

            if line.is_empty() {
                if let Some(frame) = self.take_frame() {
                    frames.push(frame);
                }
                continue;
            }
            // Comment lines keep the connection warm; nothing to record.
            if line.starts_with(':') {
                continue;
            }

            let (field, value) = match line.split_once(':') {
                Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
                None => (line.as_str(), ""),
            };
            match field {
                "event" => self.event = value.to_string(),
                "data" => self.data_lines.push(value.to_string()),
                // `id` and `retry` are legal fields the queue service never
                // uses; skip them like any unknown field.
                _ => {}
            }
        }

        frames
    }

    fn take_frame(&mut self) -> Option<SseFrame> {
        if self.event.is_empty() && self.data_lines.is_empty() {
            return None;
        }
        let frame = SseFrame {
            event: std::mem::take(&mut self.event),
            data: self.data_lines.join("\n"),
        };
        self.data_lines.clear();
        Some(frame)
    }
}
