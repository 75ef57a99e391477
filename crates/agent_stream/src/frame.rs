/// Incremental splitter turning a byte stream into newline-delimited frames.
///
/// Bytes are buffered until a full line is available, so multi-byte UTF-8
/// sequences split across network chunks survive intact. Server-sent-events
/// framing is accepted: `data:` prefixes are stripped while `event:`, `id:`,
/// `retry:` and comment lines are dropped.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
}

impl FrameDecoder {
    /// Feed arbitrary bytes into the decoder and drain complete frames.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(bytes);
        let mut frames = Vec::new();

        while let Some(split) = self.buffer.iter().position(|byte| *byte == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=split).collect();
            let line = String::from_utf8_lossy(&line[..line.len() - 1]);
            if let Some(frame) = frame_payload(&line) {
                frames.push(frame);
            }
        }

        frames
    }

    /// Flush a trailing unterminated line once the body has ended normally.
    pub fn finish(&mut self) -> Option<String> {
        if self.buffer.is_empty() {
            return None;
        }
        let line = std::mem::take(&mut self.buffer);
        frame_payload(&String::from_utf8_lossy(&line))
    }

    /// Split a complete body in one shot, including a trailing unterminated line.
    pub fn split_frames(input: &str) -> Vec<String> {
        let mut decoder = Self::default();
        let mut frames = decoder.feed(input.as_bytes());
        frames.extend(decoder.finish());
        frames
    }

    pub fn is_empty_buffer(&self) -> bool {
        self.buffer.iter().all(u8::is_ascii_whitespace)
    }
}

fn frame_payload(line: &str) -> Option<String> {
    let line = line.strip_suffix('\r').unwrap_or(line);
    if line.trim().is_empty() || line.starts_with(':') {
        return None;
    }

    if let Some(data) = line.strip_prefix("data:") {
        let data = data.strip_prefix(' ').unwrap_or(data);
        return if data.trim().is_empty() {
            None
        } else {
            Some(data.to_owned())
        };
    }

    if ["event:", "id:", "retry:"]
        .iter()
        .any(|field| line.starts_with(field))
    {
        return None;
    }

    Some(line.to_owned())
}
