//! Line-oriented terminal emulation for channels without a pty, plus the
//! newline translation applied to everything written back to a terminal.

/// Convert bare `\n` into `\r\n`; existing `\r\n` pairs are left alone.
pub fn to_crlf(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len() + data.len() / 8);
    let mut prev = 0u8;
    for &b in data {
        if b == b'\n' && prev != b'\r' {
            out.push(b'\r');
        }
        out.push(b);
        prev = b;
    }
    out
}

/// Bytes to write back to the client and the lines completed by one chunk of input.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct LineOutput {
    pub echo: Vec<u8>,
    pub lines: Vec<String>,
}

/// Minimal echoing line editor: printable input is echoed, backspace erases,
/// Enter completes the line and redraws the prompt.
#[derive(Debug)]
pub struct LineTerminal {
    prompt: String,
    buffer: String,
    last_was_cr: bool,
}

impl LineTerminal {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            buffer: String::new(),
            last_was_cr: false,
        }
    }

    pub fn feed(&mut self, data: &[u8]) -> LineOutput {
        let mut out = LineOutput::default();
        for &byte in data {
            match byte {
                b'\r' => {
                    self.complete_line(&mut out);
                    self.last_was_cr = true;
                }
                b'\n' => {
                    if self.last_was_cr {
                        self.last_was_cr = false;
                        continue;
                    }
                    self.complete_line(&mut out);
                }
                0x7f | 0x08 => {
                    self.last_was_cr = false;
                    if self.buffer.pop().is_some() {
                        out.echo.extend_from_slice(b"\x08 \x08");
                    }
                }
                // ctrl-c drops the pending line
                0x03 => {
                    self.last_was_cr = false;
                    self.buffer.clear();
                    out.echo.extend_from_slice(b"^C\r\n");
                    out.echo.extend_from_slice(self.prompt.as_bytes());
                }
                b'\t' => {
                    self.last_was_cr = false;
                    self.buffer.push(' ');
                    out.echo.push(b' ');
                }
                byte if byte.is_ascii() && !(byte as char).is_control() => {
                    self.last_was_cr = false;
                    self.buffer.push(byte as char);
                    out.echo.push(byte);
                }
                _ => {
                    self.last_was_cr = false;
                }
            }
        }
        out
    }

    fn complete_line(&mut self, out: &mut LineOutput) {
        out.echo.extend_from_slice(b"\r\n");
        out.echo.extend_from_slice(self.prompt.as_bytes());
        let line = std::mem::take(&mut self.buffer);
        if !line.trim().is_empty() {
            out.lines.push(line);
        }
    }
}

/// Accumulates raw keystrokes headed for a pty so completed lines can be logged.
#[derive(Debug, Default)]
pub struct KeystrokeLog {
    buffer: Vec<u8>,
}

impl KeystrokeLog {
    pub fn push(&mut self, data: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();
        for &byte in data {
            match byte {
                b'\r' | b'\n' => {
                    if !self.buffer.is_empty() {
                        let line = String::from_utf8_lossy(&self.buffer).into_owned();
                        self.buffer.clear();
                        lines.push(line);
                    }
                }
                0x7f | 0x08 => {
                    self.buffer.pop();
                }
                _ => self.buffer.push(byte),
            }
        }
        lines
    }
}
