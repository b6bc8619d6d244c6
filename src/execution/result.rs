//! Execution result: a lazily-drained view over a command's event queue.

use std::cell::RefCell;
use std::fmt;

use super::event::{Channel, EventQueue, StreamEvent};
use crate::error::{FailureReason, ShellError};
use crate::logging::{log_stderr, log_stdout};
use crate::shell::Policy;
use crate::Result;

/// One line of output, tagged with its channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputLine {
    pub channel: Channel,
    pub text: String,
}

impl OutputLine {
    pub fn stdout(text: impl Into<String>) -> Self {
        Self {
            channel: Channel::Stdout,
            text: text.into(),
        }
    }

    pub fn stderr(text: impl Into<String>) -> Self {
        Self {
            channel: Channel::Stderr,
            text: text.into(),
        }
    }
}

#[derive(Debug, Clone)]
enum Fault {
    Transport(String),
    Protocol(String),
}

impl From<&Fault> for ShellError {
    fn from(fault: &Fault) -> Self {
        match fault {
            Fault::Transport(msg) => ShellError::Transport(msg.clone()),
            Fault::Protocol(msg) => ShellError::Protocol(msg.clone()),
        }
    }
}

/// Consumer-side bookkeeping. Every event popped from the queue is
/// recorded in `combined` so accessors can replay it.
#[derive(Debug)]
struct Drain {
    queue: EventQueue,
    combined: Vec<OutputLine>,
    exit_code: Option<i32>,
    stdout_closed: bool,
    stderr_closed: bool,
    finished: bool,
    fault: Option<Fault>,
}

impl Drain {
    fn new(queue: EventQueue) -> Self {
        Self {
            queue,
            combined: Vec::new(),
            exit_code: None,
            stdout_closed: false,
            stderr_closed: false,
            finished: false,
            fault: None,
        }
    }

    /// Pull one event. Returns `false` once the result is finished.
    fn step(&mut self) -> bool {
        if self.finished {
            return false;
        }
        match self.queue.pop() {
            Some(event) => self.apply(event),
            None => {
                self.finish();
                return false;
            }
        }
        if self.stdout_closed
            && self.stderr_closed
            && (self.exit_code.is_some() || self.fault.is_some())
        {
            self.finish();
        }
        true
    }

    fn apply(&mut self, event: StreamEvent) {
        match event {
            StreamEvent::Stdout(line) => {
                log_stdout(&line);
                self.combined.push(OutputLine::stdout(line));
            }
            StreamEvent::Stderr(line) => {
                log_stderr(&line);
                self.combined.push(OutputLine::stderr(line));
            }
            StreamEvent::ExitCode(code) => {
                if self.exit_code.is_none() {
                    self.exit_code = Some(code);
                }
            }
            StreamEvent::Closed(Channel::Stdout) => self.stdout_closed = true,
            StreamEvent::Closed(Channel::Stderr) => self.stderr_closed = true,
            StreamEvent::TransportError(msg) => {
                self.fault.get_or_insert(Fault::Transport(msg));
            }
            StreamEvent::ProtocolError(msg) => {
                self.fault.get_or_insert(Fault::Protocol(msg));
            }
        }
    }

    fn finish(&mut self) {
        self.finished = true;
        if self.exit_code.is_none() && self.fault.is_none() {
            self.fault = Some(Fault::Protocol("exit code was never reported".into()));
        }
    }

    fn drain(&mut self) {
        while self.step() {}
    }

    fn lines(&self, channel: Channel) -> Vec<String> {
        self.combined
            .iter()
            .filter(|l| l.channel == channel)
            .map(|l| l.text.clone())
            .collect()
    }

    fn has_stderr(&self) -> bool {
        self.combined.iter().any(|l| l.channel == Channel::Stderr)
    }
}

/// Outcome of one command.
///
/// In blocking mode all output has been drained by the time the result
/// is returned. In streaming mode output is pulled on demand: iterating
/// yields stdout lines as they arrive, and any accessor blocks until the
/// command has finished. Everything consumed is kept, so accessors can be
/// called repeatedly and after iteration. Checking failures are raised
/// once, at construction or by the iterator; accessors still return the
/// collected output afterwards.
pub struct ShellResult {
    command: String,
    check_err: bool,
    check_xc: bool,
    wait: bool,
    state: RefCell<Drain>,
    cursor: usize,
    halted: bool,
}

impl ShellResult {
    /// Build a result over `queue`. In blocking mode this drains the queue
    /// and applies the checking policy before returning.
    pub(crate) fn new(command: impl Into<String>, queue: EventQueue, policy: Policy) -> Result<Self> {
        let result = Self {
            command: command.into(),
            check_err: policy.check_err,
            check_xc: policy.check_xc,
            wait: policy.wait,
            state: RefCell::new(Drain::new(queue)),
            cursor: 0,
            halted: false,
        };
        if result.wait {
            result.state.borrow_mut().drain();
            result.verdict(&result.state.borrow())?;
        }
        Ok(result)
    }

    /// The command text as submitted.
    pub fn command(&self) -> &str {
        &self.command
    }

    /// Whether the command has been fully drained.
    pub fn is_finished(&self) -> bool {
        self.state.borrow().finished
    }

    /// All stdout lines.
    pub fn stdout(&self) -> Result<Vec<String>> {
        self.with_drained(|d| d.lines(Channel::Stdout))
    }

    /// All stderr lines.
    pub fn stderr(&self) -> Result<Vec<String>> {
        self.with_drained(|d| d.lines(Channel::Stderr))
    }

    /// Stdout and stderr lines in arrival order.
    pub fn combined(&self) -> Result<Vec<OutputLine>> {
        self.with_drained(|d| d.combined.clone())
    }

    /// The command's exit code.
    pub fn exit_code(&self) -> Result<i32> {
        self.with_drained(|d| d.exit_code)?
            .ok_or_else(|| ShellError::Protocol("exit code was never reported".into()))
    }

    /// Whether the command exited with code 0.
    pub fn success(&self) -> bool {
        matches!(self.exit_code(), Ok(0))
    }

    /// Drain and read the collected output. Only transport and protocol
    /// faults surface here; the checking policy is applied by `new` and
    /// by iteration.
    fn with_drained<T>(&self, f: impl FnOnce(&Drain) -> T) -> Result<T> {
        let mut state = self.state.borrow_mut();
        state.drain();
        if let Some(fault) = &state.fault {
            return Err(fault.into());
        }
        Ok(f(&state))
    }

    fn snapshot(&self) -> Result<(Vec<String>, Vec<String>, i32)> {
        Ok((self.stdout()?, self.stderr()?, self.exit_code()?))
    }

    /// Surface faults first, then policy failures.
    fn verdict(&self, state: &Drain) -> Result<()> {
        if let Some(fault) = &state.fault {
            return Err(fault.into());
        }
        if self.check_err && state.has_stderr() {
            return Err(ShellError::command_failed(&self.command, FailureReason::Stderr));
        }
        match state.exit_code {
            Some(code) if self.check_xc && code != 0 => Err(ShellError::command_failed(
                &self.command,
                FailureReason::ExitCode(code),
            )),
            _ => Ok(()),
        }
    }
}

impl Iterator for ShellResult {
    type Item = Result<String>;

    /// Next stdout line. Stderr lines are skipped unless stderr checking is
    /// on, in which case the first one ends iteration with an error.
    fn next(&mut self) -> Option<Self::Item> {
        if self.halted {
            return None;
        }
        let state = self.state.get_mut();
        loop {
            while let Some(line) = state.combined.get(self.cursor) {
                self.cursor += 1;
                match line.channel {
                    Channel::Stdout => return Some(Ok(line.text.clone())),
                    Channel::Stderr if self.check_err => {
                        self.halted = true;
                        return Some(Err(ShellError::command_failed(
                            &self.command,
                            FailureReason::Stderr,
                        )));
                    }
                    Channel::Stderr => {}
                }
            }
            if !state.step() {
                self.halted = true;
                if let Some(fault) = &state.fault {
                    return Some(Err(fault.into()));
                }
                return match state.exit_code {
                    Some(code) if self.check_xc && code != 0 => Some(Err(
                        ShellError::command_failed(&self.command, FailureReason::ExitCode(code)),
                    )),
                    _ => None,
                };
            }
        }
    }
}

impl PartialEq<str> for ShellResult {
    /// Compares stdout against `other` split on `\n`.
    fn eq(&self, other: &str) -> bool {
        match self.stdout() {
            Ok(lines) => other.split('\n').eq(lines.iter().map(String::as_str)),
            Err(_) => false,
        }
    }
}

impl PartialEq<&str> for ShellResult {
    fn eq(&self, other: &&str) -> bool {
        self == *other
    }
}

impl PartialEq<String> for ShellResult {
    fn eq(&self, other: &String) -> bool {
        self == other.as_str()
    }
}

impl PartialEq for ShellResult {
    fn eq(&self, other: &Self) -> bool {
        if self.command != other.command {
            return false;
        }
        match (self.snapshot(), other.snapshot()) {
            (Ok(left), Ok(right)) => left == right,
            _ => false,
        }
    }
}

impl fmt::Display for ShellResult {
    /// Stdout joined with newlines.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut state = self.state.borrow_mut();
        state.drain();
        write!(f, "{}", state.lines(Channel::Stdout).join("\n"))
    }
}

impl fmt::Debug for ShellResult {
    /// Shows what has been consumed so far without blocking.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.state.try_borrow() {
            Ok(state) => {
                let xc = match state.exit_code {
                    Some(code) => code.to_string(),
                    None => "?".into(),
                };
                write!(
                    f,
                    "ShellResult({:?}, {:?}, {:?}, {})",
                    self.command,
                    state.lines(Channel::Stdout),
                    state.lines(Channel::Stderr),
                    xc
                )
            }
            Err(_) => write!(f, "ShellResult({:?}, <busy>)", self.command),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::event::event_queue;

    fn policy(check_xc: bool, check_err: bool, wait: bool) -> Policy {
        Policy {
            check_xc,
            check_err,
            wait,
        }
    }

    /// Queue pre-filled with `events` followed by both sentinels.
    fn finished_queue(events: Vec<StreamEvent>) -> EventQueue {
        let (tx, queue) = event_queue();
        for ev in events {
            tx.push(ev);
        }
        tx.push(StreamEvent::Closed(Channel::Stdout));
        tx.push(StreamEvent::Closed(Channel::Stderr));
        queue
    }

    fn output(xc: i32, lines: &[(Channel, &str)]) -> EventQueue {
        let mut events: Vec<_> = lines
            .iter()
            .map(|(ch, text)| ch.line(text.to_string()))
            .collect();
        events.push(StreamEvent::ExitCode(xc));
        finished_queue(events)
    }

    #[test]
    fn test_blocking_result_accessors() {
        let queue = output(0, &[(Channel::Stdout, "Foo"), (Channel::Stderr, "Bar")]);
        let result = ShellResult::new("echo Foo; >&2 echo Bar", queue, policy(false, false, true))
            .unwrap();
        assert!(result.is_finished());
        assert_eq!(result.stdout().unwrap(), vec!["Foo"]);
        assert_eq!(result.stderr().unwrap(), vec!["Bar"]);
        assert_eq!(result.exit_code().unwrap(), 0);
        assert!(result.success());
        assert_eq!(
            result.combined().unwrap(),
            vec![OutputLine::stdout("Foo"), OutputLine::stderr("Bar")]
        );
    }

    #[test]
    fn test_blocking_check_xc() {
        let queue = output(13, &[]);
        let err = ShellResult::new("exit 13", queue, policy(true, false, true)).unwrap_err();
        assert_eq!(err.exit_code(), Some(13));
    }

    #[test]
    fn test_blocking_check_err() {
        let queue = output(0, &[(Channel::Stderr, "error")]);
        let err = ShellResult::new(">&2 echo error", queue, policy(false, true, true)).unwrap_err();
        assert!(matches!(
            err,
            ShellError::CommandFailed {
                reason: FailureReason::Stderr,
                ..
            }
        ));
    }

    #[test]
    fn test_streaming_iteration_skips_stderr() {
        let queue = output(
            0,
            &[
                (Channel::Stdout, "1"),
                (Channel::Stderr, "e"),
                (Channel::Stdout, "2"),
            ],
        );
        let result = ShellResult::new("seq", queue, policy(false, false, false)).unwrap();
        let lines: Vec<String> = result.map(|l| l.unwrap()).collect();
        assert_eq!(lines, vec!["1", "2"]);
    }

    #[test]
    fn test_streaming_check_err_stops_iteration() {
        let queue = output(
            0,
            &[
                (Channel::Stdout, "1"),
                (Channel::Stderr, "e"),
                (Channel::Stdout, "2"),
            ],
        );
        let mut result = ShellResult::new("seq", queue, policy(false, true, false)).unwrap();
        assert_eq!(result.next().unwrap().unwrap(), "1");
        assert!(result.next().unwrap().is_err());
        assert!(result.next().is_none());
    }

    #[test]
    fn test_streaming_check_xc_raised_after_last_line() {
        let queue = output(3, &[(Channel::Stdout, "a")]);
        let mut result = ShellResult::new("false", queue, policy(true, false, false)).unwrap();
        assert_eq!(result.next().unwrap().unwrap(), "a");
        let err = result.next().unwrap().unwrap_err();
        assert_eq!(err.exit_code(), Some(3));
        assert!(result.next().is_none());
    }

    #[test]
    fn test_accessors_after_check_err_failure() {
        let queue = output(
            0,
            &[(Channel::Stdout, "out"), (Channel::Stderr, "oops")],
        );
        let mut result = ShellResult::new("x", queue, policy(false, true, false)).unwrap();
        assert_eq!(result.next().unwrap().unwrap(), "out");
        assert!(result.next().unwrap().is_err());
        assert_eq!(result.stderr().unwrap(), vec!["oops"]);
        assert_eq!(result.exit_code().unwrap(), 0);
        assert!(result.success());
    }

    #[test]
    fn test_accessors_after_check_xc_failure() {
        let queue = output(2, &[(Channel::Stdout, "a")]);
        let mut result = ShellResult::new("x", queue, policy(true, false, false)).unwrap();
        let items: Vec<_> = result.by_ref().collect();
        assert!(items[1].is_err());
        assert_eq!(result.stdout().unwrap(), vec!["a"]);
        assert_eq!(result.exit_code().unwrap(), 2);
    }

    #[test]
    fn test_accessors_after_partial_iteration() {
        let queue = output(0, &[(Channel::Stdout, "a"), (Channel::Stdout, "b")]);
        let mut result = ShellResult::new("x", queue, policy(false, false, false)).unwrap();
        assert_eq!(result.next().unwrap().unwrap(), "a");
        assert_eq!(result.stdout().unwrap(), vec!["a", "b"]);
        assert_eq!(result.next().unwrap().unwrap(), "b");
        assert!(result.next().is_none());
    }

    #[test]
    fn test_blocking_result_iterates_from_buffer() {
        let queue = output(0, &[(Channel::Stdout, "a"), (Channel::Stdout, "b")]);
        let result = ShellResult::new("x", queue, policy(false, false, true)).unwrap();
        let lines: Vec<String> = result.map(|l| l.unwrap()).collect();
        assert_eq!(lines, vec!["a", "b"]);
    }

    #[test]
    fn test_missing_exit_code_is_protocol_error() {
        let queue = finished_queue(vec![StreamEvent::Stdout("a".into())]);
        let result = ShellResult::new("x", queue, policy(false, false, false)).unwrap();
        assert!(matches!(result.exit_code(), Err(ShellError::Protocol(_))));
    }

    #[test]
    fn test_transport_error_reraised() {
        let queue = finished_queue(vec![
            StreamEvent::Stdout("a".into()),
            StreamEvent::TransportError("connection reset".into()),
        ]);
        let mut result = ShellResult::new("x", queue, policy(false, false, false)).unwrap();
        assert_eq!(result.next().unwrap().unwrap(), "a");
        assert!(matches!(
            result.next(),
            Some(Err(ShellError::Transport(_)))
        ));
        assert!(result.next().is_none());
        assert!(matches!(result.stdout(), Err(ShellError::Transport(_))));
    }

    #[test]
    fn test_dropped_queue_finishes() {
        let (tx, queue) = event_queue();
        tx.push(StreamEvent::Stdout("a".into()));
        tx.push(StreamEvent::ExitCode(0));
        drop(tx);
        let result = ShellResult::new("x", queue, policy(false, false, true)).unwrap();
        assert_eq!(result.exit_code().unwrap(), 0);
    }

    #[test]
    fn test_exit_code_before_sentinels_keeps_draining() {
        let (tx, queue) = event_queue();
        let producer = std::thread::spawn(move || {
            tx.push(StreamEvent::ExitCode(0));
            std::thread::sleep(std::time::Duration::from_millis(20));
            tx.push(StreamEvent::Stdout("late".into()));
            tx.push(StreamEvent::Closed(Channel::Stdout));
            tx.push(StreamEvent::Closed(Channel::Stderr));
        });
        let result = ShellResult::new("x", queue, policy(false, false, true)).unwrap();
        producer.join().unwrap();
        assert_eq!(result.stdout().unwrap(), vec!["late"]);
    }

    #[test]
    fn test_compare_with_str() {
        let queue = output(0, &[(Channel::Stdout, "Foo"), (Channel::Stdout, "Bar")]);
        let result = ShellResult::new("x", queue, policy(false, false, true)).unwrap();
        assert!(result == "Foo\nBar");
        assert!(result != "Foo");
        assert_eq!(result.to_string(), "Foo\nBar");
    }

    #[test]
    fn test_empty_stdout_equals_empty_string_only_with_one_line() {
        let queue = output(0, &[(Channel::Stdout, "")]);
        let result = ShellResult::new("echo", queue, policy(false, false, true)).unwrap();
        assert!(result == "");

        let queue = output(0, &[]);
        let result = ShellResult::new("true", queue, policy(false, false, true)).unwrap();
        assert!(result != "");
        assert!(result.stdout().unwrap().is_empty());
    }

    #[test]
    fn test_result_equality() {
        let a = ShellResult::new("x", output(1, &[(Channel::Stdout, "o")]), policy(false, false, true))
            .unwrap();
        let b = ShellResult::new("x", output(1, &[(Channel::Stdout, "o")]), policy(false, false, true))
            .unwrap();
        let c = ShellResult::new("x", output(0, &[(Channel::Stdout, "o")]), policy(false, false, true))
            .unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_failed_results_are_never_equal() {
        let broken = || {
            finished_queue(vec![StreamEvent::TransportError("connection reset".into())])
        };
        let a = ShellResult::new("x", broken(), policy(false, false, false)).unwrap();
        let b = ShellResult::new("x", broken(), policy(false, false, false)).unwrap();
        assert!(a != b);
    }

    #[test]
    fn test_debug_format() {
        let result = ShellResult::new(
            "echo Foo",
            output(0, &[(Channel::Stdout, "Foo")]),
            policy(false, false, true),
        )
        .unwrap();
        assert_eq!(
            format!("{:?}", result),
            "ShellResult(\"echo Foo\", [\"Foo\"], [], 0)"
        );
    }
}
