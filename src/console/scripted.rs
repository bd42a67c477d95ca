//! A deterministic, in-memory console for exercising drivers and strategies
//! without a board.
//!
//! The script reacts to complete lines written to it: each rule whose trigger
//! matches a written line queues its reply as console output. Nothing ever
//! waits on the wall clock, so an expectation that the script never satisfies
//! fails immediately with a timeout.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;
use std::time::Duration;

use log::trace;
use regex::{Captures, Regex};

use super::{ConsoleTransport, Received, TransportOpener};
use crate::error::Result;
use crate::settings::SerialSettings;

type Responder = Box<dyn Fn(&Captures<'_>) -> String>;

enum Trigger {
    Line(String),
    Regex(Regex),
    /// A command line framed by markers, see [`framed_marker`].
    Command(String),
}

enum Reply {
    Text(String),
    Computed(Responder),
    Framed { reply: String, prompt: String },
    Close,
}

/// The marker framing `command` in `line`, for lines of the form
/// `echo 'abcd''efghij'; command; echo "$?"; echo 'abcd''efghij';`.
fn framed_marker(line: &str, command: &str) -> Option<String> {
    let rest = line.strip_prefix("echo '")?;
    let split = rest.find("''")?;
    let head = &rest[..split];
    let rest = &rest[split + 2..];
    let split = rest.find("'; ")?;
    let tail = &rest[..split];
    let rest = &rest[split + 3..];
    let expected = format!("{}; echo \"$?\"; echo '{}''{}';", command, head, tail);
    if rest == expected {
        Some(format!("{}{}", head, tail))
    } else {
        None
    }
}

struct Rule {
    trigger: Trigger,
    reply: Reply,
    /// `None` for rules that fire on every matching line.
    remaining: Option<usize>,
}

#[derive(Default)]
struct Script {
    rules: Vec<Rule>,
    output: VecDeque<u8>,
    partial: String,
    writes: Vec<String>,
    closed: bool,
    opened: usize,
}
impl Script {
    fn on_line(&mut self, line: String) {
        trace!("scripted console got {:?}", line);
        let mut reply = None;
        for rule in self.rules.iter_mut() {
            if rule.remaining == Some(0) {
                continue;
            }
            let produced = match (&rule.trigger, &rule.reply) {
                (Trigger::Line(expected), Reply::Text(text)) if *expected == line => {
                    Some(Some(text.clone()))
                }
                (Trigger::Line(expected), Reply::Close) if *expected == line => Some(None),
                (Trigger::Regex(re), Reply::Computed(respond)) => {
                    re.captures(&line).map(|caps| Some(respond(&caps)))
                }
                (Trigger::Regex(re), Reply::Text(text)) if re.is_match(&line) => {
                    Some(Some(text.clone()))
                }
                (Trigger::Command(command), Reply::Framed { reply, prompt }) => {
                    framed_marker(&line, command).map(|marker| {
                        Some(format!("{m}\r\n{r}{m}\r\n{p}", m = marker, r = reply, p = prompt))
                    })
                }
                _ => None,
            };
            if let Some(produced) = produced {
                if let Some(remaining) = rule.remaining.as_mut() {
                    *remaining -= 1;
                }
                reply = Some(produced);
                break;
            }
        }
        match reply {
            Some(Some(text)) => self.output.extend(text.into_bytes()),
            Some(None) => self.closed = true,
            None => {}
        }
        self.writes.push(line);
    }
}

/// Scripted console transport. Clones share the same script, so a test can
/// keep one clone to inspect what the drivers wrote.
#[derive(Clone, Default)]
pub struct ScriptedTransport {
    script: Rc<RefCell<Script>>,
}
impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `text` as console output right away.
    pub fn emit(&self, text: &str) {
        self.script.borrow_mut().output.extend(text.bytes());
    }

    /// Answer `reply` every time exactly `line` is written.
    pub fn on(self, line: &str, reply: &str) -> Self {
        self.rule(Trigger::Line(line.into()), Reply::Text(reply.into()), None)
    }

    /// Answer `reply` the first time exactly `line` is written.
    pub fn once(self, line: &str, reply: &str) -> Self {
        self.rule(Trigger::Line(line.into()), Reply::Text(reply.into()), Some(1))
    }

    /// Answer with the output of `respond` for every written line matching
    /// `trigger`.
    pub fn on_match<F>(self, trigger: Regex, respond: F) -> Self
    where
        F: Fn(&Captures<'_>) -> String + 'static,
    {
        self.rule(
            Trigger::Regex(trigger),
            Reply::Computed(Box::new(respond)),
            None,
        )
    }

    /// Answer `command` as run through a shell or bootloader command runner:
    /// `output` lines, exit status `code`, then `prompt`.
    pub fn on_command(self, command: &str, output: &[&str], code: i32, prompt: &str) -> Self {
        let mut reply: String = output.iter().map(|line| format!("{}\r\n", line)).collect();
        reply.push_str(&format!("{}\r\n", code));
        self.rule(
            Trigger::Command(command.into()),
            Reply::Framed {
                reply,
                prompt: prompt.into(),
            },
            None,
        )
    }

    /// Close the stream once exactly `line` is written.
    pub fn close_on(self, line: &str) -> Self {
        self.rule(Trigger::Line(line.into()), Reply::Close, Some(1))
    }

    fn rule(self, trigger: Trigger, reply: Reply, remaining: Option<usize>) -> Self {
        self.script.borrow_mut().rules.push(Rule {
            trigger,
            reply,
            remaining,
        });
        self
    }

    /// Every complete line written so far, without the terminator.
    pub fn writes(&self) -> Vec<String> {
        self.script.borrow().writes.clone()
    }

    /// How many times a driver opened this console.
    pub fn open_count(&self) -> usize {
        self.script.borrow().opened
    }
}
impl ConsoleTransport for ScriptedTransport {
    fn write(&mut self, data: &[u8]) -> Result<()> {
        let mut script = self.script.borrow_mut();
        script.partial.push_str(&String::from_utf8_lossy(data));
        while let Some(end) = script.partial.find('\n') {
            let line: String = script.partial[..end].trim_end_matches('\r').to_owned();
            script.partial.replace_range(..=end, "");
            script.on_line(line);
        }
        Ok(())
    }

    fn read(&mut self, _timeout: Duration) -> Result<Received> {
        let mut script = self.script.borrow_mut();
        if !script.output.is_empty() {
            return Ok(Received::Data(script.output.drain(..).collect()));
        }
        if script.closed {
            return Ok(Received::Eof);
        }
        Ok(Received::Idle)
    }
}
impl TransportOpener for ScriptedTransport {
    fn open(&self, _settings: &SerialSettings) -> Result<Box<dyn ConsoleTransport>> {
        let mut script = self.script.borrow_mut();
        script.opened += 1;
        // a reopened console is live again
        script.closed = false;
        drop(script);
        Ok(Box::new(self.clone()))
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn read_all(transport: &mut ScriptedTransport) -> String {
        match transport.read(Duration::from_secs(1)).unwrap() {
            Received::Data(bytes) => String::from_utf8(bytes).unwrap(),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn replies_to_complete_lines_only() {
        let mut transport = ScriptedTransport::new().on("powerinfo", "power state 0 = G3\n");
        transport.write(b"power").unwrap();
        assert_eq!(transport.read(Duration::from_secs(1)).unwrap(), Received::Idle);
        transport.write(b"info\r\n").unwrap();
        assert_eq!(read_all(&mut transport), "power state 0 = G3\n");
        assert_eq!(transport.writes(), vec!["powerinfo".to_string()]);
    }

    #[test]
    fn once_rules_expire() {
        let mut transport = ScriptedTransport::new()
            .once("status", "first\n")
            .on("status", "again\n");
        transport.write(b"status\nstatus\n").unwrap();
        assert_eq!(read_all(&mut transport), "first\nagain\n");
    }

    #[test]
    fn computed_reply() {
        let mut transport = ScriptedTransport::new().on_match(
            Regex::new(r"^echo (\w+)$").unwrap(),
            |caps| format!("{}\n", &caps[1]),
        );
        transport.write(b"echo hello\n").unwrap();
        assert_eq!(read_all(&mut transport), "hello\n");
    }

    #[test]
    fn framed_commands_echo_their_marker() {
        let mut transport = ScriptedTransport::new()
            .on_command("uname", &["Linux"], 0, "# ")
            .on_command("false", &[], 1, "# ");
        transport
            .write(b"echo 'abcd''efghij'; false; echo \"$?\"; echo 'abcd''efghij';\n")
            .unwrap();
        assert_eq!(read_all(&mut transport), "abcdefghij\r\n1\r\nabcdefghij\r\n# ");
        transport.write(b"uname\n").unwrap();
        assert_eq!(transport.read(Duration::from_secs(1)).unwrap(), Received::Idle);
    }

    #[test]
    fn clones_share_the_script() {
        let observer = ScriptedTransport::new().close_on("reboot");
        let mut transport = observer.clone();
        transport.write(b"reboot\n").unwrap();
        assert_eq!(observer.writes(), vec!["reboot".to_string()]);
        assert_eq!(transport.read(Duration::from_secs(1)).unwrap(), Received::Eof);
    }
}
