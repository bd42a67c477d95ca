//! The blocking `expect` primitive.

use std::fmt;
use std::time::{Duration, Instant};

use log::{debug, trace};
use regex::Regex;

use super::{ConsoleTransport, Received};
use crate::error::{Error, Result};

const LINE_TERMINATOR: &str = "\n";

/// Something to wait for on a console.
#[derive(Debug, Clone)]
pub enum Pattern {
    /// Exact text.
    Literal(String),
    Regex(Regex),
    /// The console stream was closed.
    Eof,
}
impl Pattern {
    /// Compile `re` into a pattern, reporting a bad expression as a
    /// configuration error.
    pub fn regex(re: &str) -> Result<Pattern> {
        Regex::new(re)
            .map(Pattern::Regex)
            .map_err(|e| Error::Configuration(format!("invalid pattern `{}`: {}", re, e)))
    }

    /// Position and capture groups of the first occurrence in `haystack`.
    fn find(&self, haystack: &str) -> Option<(usize, usize, Vec<Option<String>>)> {
        match self {
            Pattern::Literal(text) => haystack
                .find(text.as_str())
                .map(|start| (start, start + text.len(), Vec::new())),
            Pattern::Regex(re) => re.captures(haystack).and_then(|caps| {
                let whole = caps.get(0)?;
                let groups = caps
                    .iter()
                    .skip(1)
                    .map(|g| g.map(|m| m.as_str().to_owned()))
                    .collect();
                Some((whole.start(), whole.end(), groups))
            }),
            Pattern::Eof => None,
        }
    }
}
impl From<&str> for Pattern {
    fn from(text: &str) -> Self {
        Pattern::Literal(text.to_owned())
    }
}
impl From<Regex> for Pattern {
    fn from(re: Regex) -> Self {
        Pattern::Regex(re)
    }
}
impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Pattern::Literal(text) => write!(f, "{:?}", text),
            Pattern::Regex(re) => write!(f, "/{}/", re.as_str()),
            Pattern::Eof => f.write_str("<EOF>"),
        }
    }
}

/// Which pattern matched and the text around it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Match {
    /// Index of the matching pattern in the list given to `expect`.
    pub index: usize,
    /// Console output consumed before the match.
    pub before: String,
    /// The matched text, empty for [`Pattern::Eof`].
    pub matched: String,
    /// Capture groups of a regex pattern, group 1 first.
    pub groups: Vec<Option<String>>,
}

/// A console transport with a receive buffer, offering `send` and `expect`.
pub struct Session {
    transport: Box<dyn ConsoleTransport>,
    buffer: String,
    /// Trailing bytes of an incomplete UTF-8 sequence.
    pending: Vec<u8>,
    eof: bool,
}
impl Session {
    pub fn new(transport: Box<dyn ConsoleTransport>) -> Self {
        Session {
            transport,
            buffer: String::new(),
            pending: Vec::new(),
            eof: false,
        }
    }

    /// Write `text` as is.
    pub fn send(&mut self, text: &str) -> Result<()> {
        debug!("console <- {:?}", text);
        self.transport.write(text.as_bytes())
    }

    /// Write `line` followed by the line terminator.
    pub fn sendline(&mut self, line: &str) -> Result<()> {
        self.send(&format!("{}{}", line, LINE_TERMINATOR))
    }

    /// Block until one of `patterns` shows up on the console, or `timeout`
    /// elapses.
    ///
    /// The earliest match in the received text wins; on a tie the pattern
    /// listed first wins. Everything up to the end of the match is consumed.
    /// [`Pattern::Eof`] matches once the stream is closed and nothing else
    /// matched; a closed stream without it in the list is an execution error.
    pub fn expect(&mut self, patterns: &[Pattern], timeout: Duration) -> Result<Match> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(found) = self.search(patterns) {
                debug!("console matched {}", patterns[found.index]);
                return Ok(found);
            }
            if self.eof {
                return Err(Error::Execution(format!(
                    "console closed while waiting for {}",
                    describe(patterns)
                )));
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(self.timeout(patterns, timeout));
            }
            match self.transport.read(deadline - now)? {
                Received::Data(bytes) => {
                    self.pending.extend_from_slice(&bytes);
                    let text = decode(&mut self.pending);
                    trace!("console -> {:?}", text);
                    self.buffer.push_str(&text);
                }
                Received::Eof => {
                    debug!("console reached end of stream");
                    if !self.pending.is_empty() {
                        let tail = std::mem::take(&mut self.pending);
                        self.buffer.push_str(&String::from_utf8_lossy(&tail));
                    }
                    self.eof = true;
                }
                Received::Idle => return Err(self.timeout(patterns, timeout)),
            }
        }
    }

    fn search(&mut self, patterns: &[Pattern]) -> Option<Match> {
        let mut best: Option<(usize, usize, usize, Vec<Option<String>>)> = None;
        for (index, pattern) in patterns.iter().enumerate() {
            if let Some((start, end, groups)) = pattern.find(&self.buffer) {
                let better = match &best {
                    Some((_, best_start, _, _)) => start < *best_start,
                    None => true,
                };
                if better {
                    best = Some((index, start, end, groups));
                }
            }
        }

        if let Some((index, start, end, groups)) = best {
            let matched = self.buffer[start..end].to_owned();
            let before = self.buffer[..start].to_owned();
            self.buffer.replace_range(..end, "");
            return Some(Match {
                index,
                before,
                matched,
                groups,
            });
        }

        if self.eof {
            if let Some(index) = patterns.iter().position(|p| matches!(p, Pattern::Eof)) {
                return Some(Match {
                    index,
                    before: std::mem::take(&mut self.buffer),
                    matched: String::new(),
                    groups: Vec::new(),
                });
            }
        }
        None
    }

    fn timeout(&self, patterns: &[Pattern], timeout: Duration) -> Error {
        debug!("console timed out, unmatched output: {:?}", self.buffer);
        Error::Timeout {
            what: describe(patterns),
            timeout,
        }
    }
}

/// Decode as much of `bytes` as possible, leaving an incomplete trailing
/// sequence in place for the next read. Invalid sequences become U+FFFD.
fn decode(bytes: &mut Vec<u8>) -> String {
    let mut text = String::new();
    let mut start = 0;
    loop {
        match std::str::from_utf8(&bytes[start..]) {
            Ok(valid) => {
                text.push_str(valid);
                start = bytes.len();
                break;
            }
            Err(e) => {
                let valid_up_to = start + e.valid_up_to();
                text.push_str(&String::from_utf8_lossy(&bytes[start..valid_up_to]));
                match e.error_len() {
                    Some(len) => {
                        text.push(char::REPLACEMENT_CHARACTER);
                        start = valid_up_to + len;
                    }
                    None => {
                        start = valid_up_to;
                        break;
                    }
                }
            }
        }
    }
    bytes.drain(..start);
    text
}

fn describe(patterns: &[Pattern]) -> String {
    patterns
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(" or ")
}

// =============================================================================
// Unit Tests
// =============================================================================
