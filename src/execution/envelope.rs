//! Command envelope: the shell text actually sent over a transport.
//!
//! Dual-channel transports receive the command with its environment and
//! working directory prefixed. Single-channel transports additionally get
//! every stdout line tagged `OUT-`, every stderr line tagged `ERR-` and a
//! trailing `XC--<code>` line, all merged onto one stream.

use std::borrow::Cow;
use std::path::{Path, PathBuf};

use indexmap::IndexMap;

use crate::error::ShellError;
use crate::Result;

/// Tag prefixed to stdout lines on a framed stream.
pub const OUT_TAG: &str = "OUT-";
/// Tag prefixed to stderr lines on a framed stream.
pub const ERR_TAG: &str = "ERR-";
/// Tag prefixed to the exit code line on a framed stream.
pub const XC_TAG: &str = "XC--";

/// Immutable wire-text builder for one invocation.
#[derive(Debug, Clone)]
pub struct Envelope {
    command: String,
    env: IndexMap<String, String>,
    working_dir: Option<PathBuf>,
}

impl Envelope {
    /// Create an envelope from the command text and the effective
    /// (already merged) environment.
    pub fn new(
        command: impl Into<String>,
        env: IndexMap<String, String>,
        working_dir: Option<PathBuf>,
    ) -> Self {
        Self {
            command: command.into(),
            env,
            working_dir,
        }
    }

    /// The raw command text.
    pub fn command(&self) -> &str {
        &self.command
    }

    /// The effective environment.
    pub fn env(&self) -> &IndexMap<String, String> {
        &self.env
    }

    /// Command text with `cd "DIR"; ` and `VAR=VALUE; ` prefixes.
    pub fn prefixed(&self) -> Result<String> {
        let mut text = String::new();
        if let Some(dir) = &self.working_dir {
            text.push_str(&format!("cd \"{}\"; ", quote_dir(dir)?));
        }
        for (name, value) in &self.env {
            validate_name(name)?;
            text.push_str(&format!("{}={}; ", name, quote_value(name, value)?));
        }
        text.push_str(&self.command);
        Ok(text)
    }

    /// Command text wrapped so that stdout, stderr and the exit code are
    /// tagged and interleaved on a single stream.
    pub fn framed(&self) -> Result<String> {
        let inner = self.prefixed()?;
        Ok(format!(
            "{{ {{ {{ ({}) 2>&3; echo {}$? >&4; }} | {} >&2; }} 3>&1 4>&2 1>&2 | {}; }} 2>&1",
            inner.trim(),
            XC_TAG,
            tag_filter(OUT_TAG),
            tag_filter(ERR_TAG),
        ))
    }
}

/// Read-loop filter re-tagging every line, including a final line that
/// lacks a trailing newline.
fn tag_filter(tag: &str) -> String {
    format!(
        "while IFS= read -r line || [ -n \"$line\" ]; do echo {}\"$line\"; done",
        tag
    )
}

fn validate_name(name: &str) -> Result<()> {
    let mut chars = name.chars();
    let valid = match chars.next() {
        Some(first) => {
            (first.is_ascii_alphabetic() || first == '_')
                && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        None => false,
    };
    if valid {
        Ok(())
    } else {
        Err(ShellError::InvalidEnvironment(format!(
            "'{}' is not a valid variable name",
            name
        )))
    }
}

fn quote_value<'a>(name: &str, value: &'a str) -> Result<Cow<'a, str>> {
    if value.contains('\0') {
        return Err(ShellError::InvalidEnvironment(format!(
            "value of '{}' contains a NUL byte",
            name
        )));
    }
    Ok(shell_escape::unix::escape(Cow::Borrowed(value)))
}

fn quote_dir(dir: &Path) -> Result<String> {
    let text = dir.to_str().ok_or_else(|| {
        ShellError::InvalidEnvironment(format!("working directory {:?} is not UTF-8", dir))
    })?;
    if text.contains('\0') {
        return Err(ShellError::InvalidEnvironment(
            "working directory contains a NUL byte".into(),
        ));
    }
    let mut quoted = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '"' | '\\' | '$' | '`') {
            quoted.push('\\');
        }
        quoted.push(c);
    }
    Ok(quoted)
}
