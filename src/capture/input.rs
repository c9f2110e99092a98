//! Decoding of host traffic into keystrokes and control requests

use crate::transport::{Control, CONTROL_PREFIX};

/// One decoded unit of host input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputAction {
    /// Characters to type into the console
    Text(String),
    /// A lifecycle request
    Control(Control),
}

/// Stateful decoder for the host-to-capture byte stream.
///
/// Reads may split a control sequence or a multi-byte character; the
/// incomplete part is held back until the next [`feed`](Self::feed).
/// `"\r\n"` is typed as a single Enter, and a lone `'\n'` also becomes
/// Enter.
#[derive(Debug, Default)]
pub struct InputDecoder {
    pending: Vec<u8>,
    after_cr: bool,
}

impl InputDecoder {
    /// Create a decoder with no pending input
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode `data`, returning complete actions in order.
    pub fn feed(&mut self, data: &[u8]) -> Vec<InputAction> {
        let mut bytes = std::mem::take(&mut self.pending);
        bytes.extend_from_slice(data);

        let mut actions = Vec::new();
        let mut text = Vec::new();
        let mut i = 0;

        while i < bytes.len() {
            let b = bytes[i];
            if b == CONTROL_PREFIX {
                let Some(&code) = bytes.get(i + 1) else {
                    break;
                };
                if let Some(control) = Control::from_code(code) {
                    flush_text(&mut text, &mut actions);
                    actions.push(InputAction::Control(control));
                    self.after_cr = false;
                    i += 2;
                    continue;
                }
            }
            match b {
                b'\n' if self.after_cr => {}
                b'\n' => text.push(b'\r'),
                _ => text.push(b),
            }
            self.after_cr = b == b'\r';
            i += 1;
        }

        let mut rest = bytes.split_off(i);
        if rest.is_empty() {
            let cut = incomplete_utf8_start(&text);
            rest = text.split_off(cut);
        }
        flush_text(&mut text, &mut actions);
        self.pending = rest;
        actions
    }
}

fn flush_text(text: &mut Vec<u8>, actions: &mut Vec<InputAction>) {
    if !text.is_empty() {
        actions.push(InputAction::Text(String::from_utf8_lossy(text).into_owned()));
        text.clear();
    }
}

/// Offset where a trailing, still incomplete UTF-8 sequence starts, or the
/// length of `bytes` if it ends on a character boundary.
fn incomplete_utf8_start(bytes: &[u8]) -> usize {
    let len = bytes.len();
    for back in 1..=len.min(3) {
        let b = bytes[len - back];
        if b & 0xC0 != 0x80 {
            let needed = match b {
                0xC0..=0xDF => 2,
                0xE0..=0xEF => 3,
                0xF0..=0xF7 => 4,
                _ => 1,
            };
            return if needed > back { len - back } else { len };
        }
    }
    len
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(s: &str) -> InputAction {
        InputAction::Text(s.to_string())
    }

    #[test]
    fn test_plain_text() {
        let mut decoder = InputDecoder::new();
        assert_eq!(decoder.feed(b"dir"), vec![text("dir")]);
    }

    #[test]
    fn test_crlf_is_one_enter() {
        let mut decoder = InputDecoder::new();
        assert_eq!(decoder.feed(b"dir\r\n"), vec![text("dir\r")]);
        assert_eq!(decoder.feed(b"a\nb"), vec![text("a\rb")]);
    }

    #[test]
    fn test_crlf_split_across_reads() {
        let mut decoder = InputDecoder::new();
        assert_eq!(decoder.feed(b"dir\r"), vec![text("dir\r")]);
        assert_eq!(decoder.feed(b"\nver"), vec![text("ver")]);
    }

    #[test]
    fn test_control_sequences() {
        let mut decoder = InputDecoder::new();
        assert_eq!(
            decoder.feed(b"ab\x012cd\x011"),
            vec![
                text("ab"),
                InputAction::Control(Control::Interrupt),
                text("cd"),
                InputAction::Control(Control::Terminate),
            ]
        );
    }

    #[test]
    fn test_control_sequence_split_across_reads() {
        let mut decoder = InputDecoder::new();
        assert_eq!(decoder.feed(b"x\x01"), vec![text("x")]);
        assert_eq!(
            decoder.feed(b"3"),
            vec![InputAction::Control(Control::Show)]
        );
    }

    #[test]
    fn test_unknown_control_code_is_typed() {
        let mut decoder = InputDecoder::new();
        assert_eq!(decoder.feed(b"\x01z"), vec![text("\u{1}z")]);
    }

    #[test]
    fn test_multibyte_char_split_across_reads() {
        let mut decoder = InputDecoder::new();
        let bytes = "é世".as_bytes();
        assert_eq!(decoder.feed(&bytes[..1]), vec![]);
        assert_eq!(decoder.feed(&bytes[1..3]), vec![text("é")]);
        assert_eq!(decoder.feed(&bytes[3..]), vec![text("世")]);
    }

    #[test]
    fn test_incomplete_utf8_start() {
        assert_eq!(incomplete_utf8_start(b"abc"), 3);
        assert_eq!(incomplete_utf8_start(&"é".as_bytes()[..1]), 0);
        assert_eq!(incomplete_utf8_start("aé".as_bytes()), 3);
        assert_eq!(incomplete_utf8_start(&"a世".as_bytes()[..3]), 1);
        assert_eq!(incomplete_utf8_start(b""), 0);
    }
}
