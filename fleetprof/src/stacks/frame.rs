//! Frame labels and the error marker frame.

use std::fmt;

/// Longest diagnostic message kept on an error marker.
const MAX_MESSAGE_LEN: usize = 160;

const ERROR_PREFIX: &str = "[error:";

/// Structured reason a runtime profiler failed for a process.
///
/// Rendered as `[error:kind]` or `[error:kind: message]`. Both parts are
/// sanitised on construction so the rendering never contains the collapsed
/// format's separators (`;` and newlines) and always parses back.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ErrorMarker {
    kind: String,
    message: Option<String>,
}

impl ErrorMarker {
    pub fn new(kind: impl Into<String>) -> Self {
        let kind = sanitize(&kind.into()).replace(':', "_");
        Self { kind: if kind.is_empty() { "unknown".to_string() } else { kind }, message: None }
    }

    #[must_use]
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        let mut message = sanitize(&message.into());
        if message.len() > MAX_MESSAGE_LEN {
            let mut cut = MAX_MESSAGE_LEN;
            while !message.is_char_boundary(cut) {
                cut -= 1;
            }
            message.truncate(cut);
        }
        self.message = if message.is_empty() { None } else { Some(message) };
        self
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    /// Recognise a rendered marker label.
    pub fn parse(label: &str) -> Option<Self> {
        let body = label.strip_prefix(ERROR_PREFIX)?.strip_suffix(']')?;
        let marker = match body.split_once(": ") {
            Some((kind, message)) => ErrorMarker::new(kind).with_message(message),
            None => ErrorMarker::new(body),
        };
        Some(marker)
    }
}

impl fmt::Display for ErrorMarker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.message {
            Some(message) => write!(f, "{ERROR_PREFIX}{}: {message}]", self.kind),
            None => write!(f, "{ERROR_PREFIX}{}]", self.kind),
        }
    }
}

fn sanitize(raw: &str) -> String {
    raw.trim()
        .chars()
        .map(|c| match c {
            ';' => ',',
            ']' => ')',
            c if c.is_control() => ' ',
            c => c,
        })
        .collect()
}

/// One level of a call stack.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Frame {
    /// A resolved (or already-unresolvable) symbol label.
    Symbol(String),
    /// Synthetic marker standing in for frames a runtime profiler failed to produce.
    Error(ErrorMarker),
}

impl Frame {
    pub fn symbol(label: impl Into<String>) -> Self {
        Frame::Symbol(label.into())
    }

    /// Interpret a collapsed-format label, recognising error markers.
    pub fn parse(label: &str) -> Self {
        ErrorMarker::parse(label).map_or_else(|| Frame::Symbol(label.to_string()), Frame::Error)
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Frame::Error(_))
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Frame::Symbol(label) => f.write_str(label),
            Frame::Error(marker) => marker.fmt(f),
        }
    }
}

impl From<ErrorMarker> for Frame {
    fn from(marker: ErrorMarker) -> Self {
        Frame::Error(marker)
    }
}
