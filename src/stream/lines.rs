/// Reassembles `\n`-terminated lines from arbitrarily split byte chunks.
///
/// Bytes are buffered until a newline arrives, so a line (or a multi-byte
/// UTF-8 character) cut across two reads is only decoded once it is complete.
#[derive(Debug, Default)]
pub struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `chunk` and returns every line it completed, without terminators.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(chunk);
        let mut lines = Vec::new();
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let mut line: Vec<u8> = self.pending.drain(..=pos).collect();
            line.pop();
            lines.push(decode(line));
        }
        lines
    }

    /// Flushes an unterminated trailing line, if any.
    pub fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        Some(decode(std::mem::take(&mut self.pending)))
    }
}

fn decode(mut line: Vec<u8>) -> String {
    if line.last() == Some(&b'\r') {
        line.pop();
    }
    String::from_utf8_lossy(&line).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn holds_partial_line_until_newline() {
        let mut buffer = LineBuffer::new();
        assert!(buffer.push(b"data: {\"con").is_empty());
        assert_eq!(buffer.push(b"tent\":\"x\"}\n\n"), vec!["data: {\"content\":\"x\"}", ""]);
    }

    #[test]
    fn splits_multibyte_characters_safely() {
        let bytes = "data: 视角\n".as_bytes();
        let (head, tail) = bytes.split_at(8);
        let mut buffer = LineBuffer::new();
        assert!(buffer.push(head).is_empty());
        assert_eq!(buffer.push(tail), vec!["data: 视角"]);
    }

    #[test]
    fn strips_carriage_returns() {
        let mut buffer = LineBuffer::new();
        assert_eq!(buffer.push(b"a\r\nb\r\n"), vec!["a", "b"]);
    }

    #[test]
    fn finish_returns_unterminated_tail_once() {
        let mut buffer = LineBuffer::new();
        buffer.push(b"{\"done\":true}");
        assert_eq!(buffer.finish().as_deref(), Some("{\"done\":true}"));
        assert_eq!(buffer.finish(), None);
    }
}
