use std::fmt;

use crate::agents::AgentType;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    Agent,
    Task,
    Discussion,
    Group,
    Subtask,
}

impl EntityKind {
    pub fn label(self) -> &'static str {
        match self {
            EntityKind::Agent => "agent",
            EntityKind::Task => "task",
            EntityKind::Discussion => "discussion",
            EntityKind::Group => "group",
            EntityKind::Subtask => "subtask",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Failures surfaced by the hub's library operations.
///
/// Lookups and routing report `NotFound`/`Unavailable` as values so batch
/// callers (broadcast, the orchestrator fan-out) can keep partial results.
/// `Storage` is always propagated to the caller and never retried.
#[derive(Debug, thiserror::Error)]
pub enum HubError {
    #[error("{kind} '{id}' not found")]
    NotFound { kind: EntityKind, id: String },

    #[error("{} agent not available", .0.title())]
    Unavailable(AgentType),

    #[error("{} agent timed out after {secs}s", .agent_type.title())]
    Timeout { agent_type: AgentType, secs: u64 },

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("sqlite storage error: {0}")]
    Storage(#[from] sqlx::Error),

    #[error("failed to encode record: {0}")]
    Encoding(#[from] serde_json::Error),
}

impl HubError {
    pub fn not_found(kind: EntityKind, id: impl Into<String>) -> Self {
        HubError::NotFound {
            kind,
            id: id.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, HubError::NotFound { .. })
    }

    pub fn is_storage(&self) -> bool {
        matches!(self, HubError::Storage(_) | HubError::Encoding(_))
    }
}

pub type HubResult<T> = std::result::Result<T, HubError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Storage,
    Routing,
    Input,
    Internal,
}

impl ErrorCategory {
    pub fn code(self) -> &'static str {
        match self {
            ErrorCategory::Storage => "STORAGE",
            ErrorCategory::Routing => "ROUTING",
            ErrorCategory::Input => "INPUT",
            ErrorCategory::Internal => "INTERNAL",
        }
    }

    pub fn hint(self) -> &'static str {
        match self {
            ErrorCategory::Storage => {
                "Check --db-url and run `agent-hub migrate` to create the sqlite tables."
            }
            ErrorCategory::Routing => {
                "Run `agent-hub agents` to list routable agent ids and types."
            }
            ErrorCategory::Input => "Run agent-hub --help and correct command arguments.",
            ErrorCategory::Internal => {
                "Retry with RUST_LOG=debug. If it persists, capture logs and open an issue."
            }
        }
    }
}

pub fn categorize_error(err: &anyhow::Error) -> ErrorCategory {
    if let Some(hub) = err.chain().find_map(|cause| cause.downcast_ref::<HubError>()) {
        return match hub {
            HubError::NotFound { .. } | HubError::Unavailable(_) | HubError::Timeout { .. } => {
                ErrorCategory::Routing
            }
            HubError::InvalidInput(_) => ErrorCategory::Input,
            HubError::Storage(_) | HubError::Encoding(_) => ErrorCategory::Storage,
        };
    }

    let msg = format!("{err:#}").to_ascii_lowercase();

    if msg.contains("--force")
        || msg.contains("destructive")
        || msg.contains("invalid value")
        || msg.contains("unknown argument")
        || msg.contains("failed to read input")
        || msg.contains("profile")
        || msg.contains("must be between")
    {
        return ErrorCategory::Input;
    }

    if msg.contains("sqlite") || msg.contains("database") || msg.contains("migrate") {
        return ErrorCategory::Storage;
    }

    if msg.contains("agent") || msg.contains("route") {
        return ErrorCategory::Routing;
    }

    ErrorCategory::Internal
}

pub fn format_cli_error(err: &anyhow::Error, show_sensitive_config: bool) -> String {
    let category = categorize_error(err);
    let rendered_error = render_error_message(err, show_sensitive_config);
    format!(
        "[{}] {}\nHint: {}",
        category.code(),
        rendered_error,
        category.hint()
    )
}

pub fn render_error_message(err: &anyhow::Error, show_sensitive_config: bool) -> String {
    let text = format!("{err:#}");
    if show_sensitive_config {
        text
    } else {
        redact_sqlite_urls(&text)
    }
}

pub fn redact_sqlite_urls(text: &str) -> String {
    const SQLITE_PREFIX: &str = "sqlite:";
    let mut out = String::with_capacity(text.len());
    let mut cursor = 0usize;

    while let Some(offset) = text[cursor..].find(SQLITE_PREFIX) {
        let start = cursor + offset;
        out.push_str(&text[cursor..start]);

        let remainder = &text[start..];
        let end = remainder
            .find(|ch: char| {
                ch.is_whitespace() || matches!(ch, '"' | '\'' | '(' | ')' | '[' | ']' | ',' | ';')
            })
            .unwrap_or(remainder.len());
        out.push_str(&redact_sqlite_url_value(&remainder[..end]));
        cursor = start + end;
    }

    out.push_str(&text[cursor..]);
    out
}

pub fn redact_sqlite_url_value(value: &str) -> String {
    if value.starts_with("sqlite::memory:") {
        value.to_string()
    } else if value.starts_with("sqlite://") {
        "sqlite://[REDACTED]".to_string()
    } else if value.starts_with("sqlite:") {
        "sqlite:[REDACTED]".to_string()
    } else {
        value.to_string()
    }
}
