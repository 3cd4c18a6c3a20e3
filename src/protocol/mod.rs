//! Chat payloads carried inside ciphertext blocks
//!
//! Every decrypted block is one line of UTF-8 text. Two shapes exist:
//! - control messages, recognised by a reserved prefix (`USERCOUNT:`,
//!   `AUTHSUCCESS:`, `AUTHFAILED:`), which never reach message history
//! - chat envelopes, `<sender>: <body>`, split on the first `": "`; a line
//!   without the separator is a bare system notice

use std::fmt;

/// Sender label for messages the server itself authors
pub const SERVER_LABEL: &str = "SERVER";

/// Sender label for locally generated notices and separator-less lines
pub const SYSTEM_LABEL: &str = "system";

/// Separator between sender label and body
pub const ENVELOPE_SEPARATOR: &str = ": ";

/// Prefix of the online-user count control message
pub const USER_COUNT_PREFIX: &str = "USERCOUNT:";

/// Prefix of a successful authentication response
pub const AUTH_SUCCESS_PREFIX: &str = "AUTHSUCCESS:";

/// Prefix of a failed authentication response
pub const AUTH_FAILED_PREFIX: &str = "AUTHFAILED:";

/// Display name used when a client registers with a blank one
pub const DEFAULT_DISPLAY_NAME: &str = "Anonymous";

/// Out-of-band signalling sharing the encrypted channel with chat
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ControlMessage {
    /// Number of registered sessions
    UserCount(usize),
    /// Credential accepted
    AuthSuccess(String),
    /// Credential rejected; the server closes right after sending this
    AuthFailed(String),
}

impl ControlMessage {
    /// Render for the wire
    pub fn to_wire(&self) -> String {
        match self {
            ControlMessage::UserCount(n) => format!("{}{}", USER_COUNT_PREFIX, n),
            ControlMessage::AuthSuccess(info) => format!("{}{}", AUTH_SUCCESS_PREFIX, info),
            ControlMessage::AuthFailed(reason) => format!("{}{}", AUTH_FAILED_PREFIX, reason),
        }
    }

    /// Recognise a control message
    ///
    /// A `USERCOUNT:` line whose remainder is not a plain integer is not a
    /// control message and falls through to chat handling.
    pub fn parse(text: &str) -> Option<Self> {
        if let Some(count) = text.strip_prefix(USER_COUNT_PREFIX) {
            return count.parse().ok().map(ControlMessage::UserCount);
        }
        if let Some(info) = text.strip_prefix(AUTH_SUCCESS_PREFIX) {
            return Some(ControlMessage::AuthSuccess(info.to_string()));
        }
        if let Some(reason) = text.strip_prefix(AUTH_FAILED_PREFIX) {
            return Some(ControlMessage::AuthFailed(reason.to_string()));
        }
        None
    }
}

impl fmt::Display for ControlMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_wire())
    }
}

/// A `(sender, body)` chat unit; the sender label is never empty
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChatEnvelope {
    sender_label: String,
    body: String,
}

impl ChatEnvelope {
    /// Build an envelope, falling back to the system label for a blank sender
    pub fn new(sender_label: impl Into<String>, body: impl Into<String>) -> Self {
        let sender_label = sender_label.into();
        let sender_label = if sender_label.is_empty() {
            SYSTEM_LABEL.to_string()
        } else {
            sender_label
        };

        ChatEnvelope {
            sender_label,
            body: body.into(),
        }
    }

    /// An envelope authored by the server
    pub fn server(body: impl Into<String>) -> Self {
        Self::new(SERVER_LABEL, body)
    }

    /// A bare system notice
    pub fn system(body: impl Into<String>) -> Self {
        Self::new(SYSTEM_LABEL, body)
    }

    /// Split a received line on the first `": "`
    pub fn parse(line: &str) -> Self {
        match line.split_once(ENVELOPE_SEPARATOR) {
            Some((sender, body)) if !sender.is_empty() => Self::new(sender, body),
            _ => Self::system(line),
        }
    }

    /// Who sent it
    pub fn sender_label(&self) -> &str {
        &self.sender_label
    }

    /// What they said
    pub fn body(&self) -> &str {
        &self.body
    }

    /// Whether the server authored this envelope
    pub fn is_server(&self) -> bool {
        self.sender_label == SERVER_LABEL
    }

    /// Whether this is a bare system notice
    pub fn is_system(&self) -> bool {
        self.sender_label == SYSTEM_LABEL
    }

    /// Render as `<sender>: <body>`
    pub fn to_wire(&self) -> String {
        format!("{}{}{}", self.sender_label, ENVELOPE_SEPARATOR, self.body)
    }
}

impl fmt::Display for ChatEnvelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.sender_label, ENVELOPE_SEPARATOR, self.body)
    }
}

/// Anything a client can receive after registration
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Payload {
    /// Auxiliary state update
    Control(ControlMessage),
    /// User-visible chat line
    Chat(ChatEnvelope),
}

impl Payload {
    /// Classify a decrypted line
    pub fn parse(text: &str) -> Self {
        match ControlMessage::parse(text) {
            Some(control) => Payload::Control(control),
            None => Payload::Chat(ChatEnvelope::parse(text)),
        }
    }
}

const RESERVED_PREFIXES: [&str; 3] = [USER_COUNT_PREFIX, AUTH_SUCCESS_PREFIX, AUTH_FAILED_PREFIX];

/// Whether `<name>: <body>` would be read back as a control message
fn collides_with_control(name: &str) -> bool {
    let label = format!("{}{}", name, ENVELOPE_SEPARATOR);
    RESERVED_PREFIXES.iter().any(|prefix| label.starts_with(prefix))
}

/// Server-side display name cleanup
///
/// Trims the name and replaces it with [`DEFAULT_DISPLAY_NAME`] if it is
/// blank or if lines sent under it would start with a control prefix.
pub fn normalize_display_name(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.is_empty() || collides_with_control(trimmed) {
        DEFAULT_DISPLAY_NAME.to_string()
    } else {
        trimmed.to_string()
    }
}

/// `<name> has joined the chat`
pub fn join_notice(name: &str) -> ChatEnvelope {
    ChatEnvelope::server(format!("{} has joined the chat", name))
}

/// `<name> has left the chat`
pub fn departure_notice(name: &str) -> ChatEnvelope {
    ChatEnvelope::server(format!("{} has left the chat", name))
}

/// `Welcome to the chat, <name>!`
pub fn welcome_notice(name: &str) -> ChatEnvelope {
    ChatEnvelope::server(format!("Welcome to the chat, {}!", name))
}
