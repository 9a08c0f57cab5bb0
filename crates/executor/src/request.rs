use std::{path::PathBuf, time::Duration};

use encoding_rs::{Encoding, UTF_8};
use tracing::warn;
use uuid::Uuid;

/// Default wall-clock window for scanner commands.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(1800);

/// Commands containing this marker are known long runners and get a wider
/// window. Matched as a plain substring of the lowercased command text.
const LONG_RUNNING_MARKER: &str = "nuclei";
const LONG_RUNNING_TIMEOUT: Duration = Duration::from_secs(3600);

/// Token that switches the executor into JSON-extraction mode. A string
/// convention over the raw command text, kept for compatibility with existing
/// tool invocations.
const JSON_FLAG_MARKER: &str = "-json";

/// Opaque foreign-key context forwarded to the persistence collaborator.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExecutionContext {
    pub scan_id: Option<Uuid>,
    pub activity_id: Option<Uuid>,
}

/// One command to execute.
///
/// Built with [`ExecutionRequest::new`], which derives the JSON-mode flag and
/// the timeout from the command text; both can be overridden afterwards.
#[derive(Debug, Clone)]
pub struct ExecutionRequest {
    /// Raw command text. Split into an argv with `shlex` unless `shell` is
    /// set, in which case it is passed to the platform shell verbatim.
    pub command: String,
    pub cwd: Option<PathBuf>,
    pub shell: bool,
    /// Output decoding; always replacement-on-error, never fallible.
    pub encoding: &'static Encoding,
    /// Per-line truncation cap applied during streaming normalization.
    pub trunc_chars: Option<usize>,
    pub json_mode: bool,
    pub timeout: Duration,
    pub context: ExecutionContext,
    /// Optional per-scan history file appended to after buffered runs.
    pub history_file: Option<PathBuf>,
    /// Per-call override of the configured dry-run toggle.
    pub dry_run: Option<bool>,
}

impl ExecutionRequest {
    pub fn new(command: impl Into<String>) -> Self {
        let command = command.into();
        let json_mode = command.contains(JSON_FLAG_MARKER);
        let timeout = timeout_for(&command);
        Self {
            command,
            cwd: None,
            shell: false,
            encoding: UTF_8,
            trunc_chars: None,
            json_mode,
            timeout,
            context: ExecutionContext::default(),
            history_file: None,
            dry_run: None,
        }
    }

    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn with_shell(mut self, shell: bool) -> Self {
        self.shell = shell;
        self
    }

    /// Select the output encoding by WHATWG label ("utf-8", "latin1", ...).
    /// Unknown labels are ignored with a warning.
    pub fn with_encoding_label(mut self, label: &str) -> Self {
        match Encoding::for_label(label.as_bytes()) {
            Some(encoding) => self.encoding = encoding,
            None => warn!(label, "unknown encoding label, keeping utf-8"),
        }
        self
    }

    pub fn with_trunc_chars(mut self, cap: usize) -> Self {
        self.trunc_chars = Some(cap);
        self
    }

    pub fn with_json_mode(mut self, json_mode: bool) -> Self {
        self.json_mode = json_mode;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_context(mut self, context: ExecutionContext) -> Self {
        self.context = context;
        self
    }

    pub fn with_history_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.history_file = Some(path.into());
        self
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = Some(dry_run);
        self
    }
}

fn timeout_for(command: &str) -> Duration {
    if command.to_lowercase().contains(LONG_RUNNING_MARKER) {
        LONG_RUNNING_TIMEOUT
    } else {
        DEFAULT_TIMEOUT
    }
}
