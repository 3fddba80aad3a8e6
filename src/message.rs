//! Message protocol definitions
//!
//! Plaintext, newline-delimited UTF-8 protocol. Every logical message is
//! exactly one line; `LinesCodec` does the framing on both ends.

use std::fmt;
use std::net::SocketAddr;

use tokio_util::codec::LinesCodec;

/// Command a client uses to pick its display name
pub const NAME_COMMAND: &str = "/name";

/// Command a client uses to leave the chat
pub const EXIT_COMMAND: &str = "/exit";

/// Token the server answers an exit command with
pub const EXIT_ACK: &str = "/exit_ack";

/// Longest line a client may send, excluding the newline
pub const MAX_LINE_LENGTH: usize = 8 * 1024;

/// Longest display name in bytes; longer names are cut
pub const MAX_NAME_LENGTH: usize = 64;

/// Longest line the server can emit: a relayed chat line or a notice
/// carrying a full-length name, with room for the fixed wording
pub const MAX_RELAY_LINE_LENGTH: usize = MAX_LINE_LENGTH + MAX_NAME_LENGTH + 64;

/// Codec for lines sent by clients (server reads, client writes)
pub fn lines_codec() -> LinesCodec {
    LinesCodec::new_with_max_length(MAX_LINE_LENGTH)
}

/// Codec for lines emitted by the server (client reads)
pub fn relay_codec() -> LinesCodec {
    LinesCodec::new_with_max_length(MAX_RELAY_LINE_LENGTH)
}

/// Whether `text` goes out as exactly one line the server will accept
pub fn fits_one_line(text: &str) -> bool {
    text.len() <= MAX_LINE_LENGTH && !text.contains(['\n', '\r'])
}

/// Cut `name` to at most `MAX_NAME_LENGTH` bytes on a char boundary
pub fn clamp_name(name: &str) -> &str {
    if name.len() <= MAX_NAME_LENGTH {
        return name;
    }
    let mut end = MAX_NAME_LENGTH;
    while !name.is_char_boundary(end) {
        end -= 1;
    }
    name[..end].trim_end()
}

/// Name assigned when the handshake does not provide one
pub fn default_name(addr: SocketAddr) -> String {
    format!("User{}", addr.port())
}

/// Client → Server message
///
/// Parsed from one trimmed inbound line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientMessage {
    /// `/name <name>`; `None` when the name part is empty
    SetName(Option<String>),
    /// `/exit`
    Exit,
    /// Anything else
    Text(String),
}

impl ClientMessage {
    /// Parse one line. Returns `None` for blank lines.
    pub fn parse(line: &str) -> Option<Self> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }
        if line == EXIT_COMMAND {
            return Some(Self::Exit);
        }
        if let Some(rest) = line.strip_prefix(NAME_COMMAND) {
            if rest.is_empty() || rest.starts_with(char::is_whitespace) {
                let name = rest.trim();
                let name = (!name.is_empty()).then(|| name.to_string());
                return Some(Self::SetName(name));
            }
        }
        Some(Self::Text(line.to_string()))
    }

    /// Render the line a client puts on the wire for this message
    pub fn to_line(&self) -> String {
        match self {
            Self::SetName(Some(name)) => format!("{} {}", NAME_COMMAND, name),
            Self::SetName(None) => NAME_COMMAND.to_string(),
            Self::Exit => EXIT_COMMAND.to_string(),
            Self::Text(text) => text.clone(),
        }
    }
}

/// Server → Client message
///
/// Rendered to its wire line through `Display`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerMessage {
    /// Handshake prompt
    Prompt,
    /// Personalized post-handshake greeting
    Welcome { name: String },
    /// Someone else joined
    Joined { name: String },
    /// Someone left
    Left { name: String },
    /// Relayed chat line
    Chat { from: String, text: String },
    /// Answer to an exit command
    ExitAck,
    /// Connection refused because the server is at capacity
    ServerFull,
}

impl fmt::Display for ServerMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Prompt => write!(f, "SERVER: Send your name using {} YourName", NAME_COMMAND),
            Self::Welcome { name } => {
                write!(f, "SERVER: Welcome {}! Type {} to leave.", name, EXIT_COMMAND)
            }
            Self::Joined { name } => write!(f, "SERVER: {} has joined the chat.", name),
            Self::Left { name } => write!(f, "SERVER: {} has left the chat.", name),
            Self::Chat { from, text } => write!(f, "{}: {}", from, text),
            Self::ExitAck => f.write_str(EXIT_ACK),
            Self::ServerFull => f.write_str("SERVER: Server is full. Try again later."),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_name_command() {
        assert_eq!(
            ClientMessage::parse("/name Alice\n"),
            Some(ClientMessage::SetName(Some("Alice".to_string())))
        );
        assert_eq!(
            ClientMessage::parse("/name   Bob Smith  "),
            Some(ClientMessage::SetName(Some("Bob Smith".to_string())))
        );
    }

    #[test]
    fn test_parse_empty_name() {
        assert_eq!(ClientMessage::parse("/name"), Some(ClientMessage::SetName(None)));
        assert_eq!(ClientMessage::parse("/name    "), Some(ClientMessage::SetName(None)));
    }

    #[test]
    fn test_parse_prefix_without_separator_is_text() {
        assert_eq!(
            ClientMessage::parse("/namesake"),
            Some(ClientMessage::Text("/namesake".to_string()))
        );
    }

    #[test]
    fn test_parse_exit_and_blank() {
        assert_eq!(ClientMessage::parse(" /exit "), Some(ClientMessage::Exit));
        assert_eq!(ClientMessage::parse("   "), None);
        assert_eq!(
            ClientMessage::parse("/exit now"),
            Some(ClientMessage::Text("/exit now".to_string()))
        );
    }

    #[test]
    fn test_server_message_lines() {
        assert_eq!(
            ServerMessage::Prompt.to_string(),
            "SERVER: Send your name using /name YourName"
        );
        assert_eq!(
            ServerMessage::Welcome { name: "Alice".into() }.to_string(),
            "SERVER: Welcome Alice! Type /exit to leave."
        );
        assert_eq!(
            ServerMessage::Left { name: "Bob".into() }.to_string(),
            "SERVER: Bob has left the chat."
        );
        assert_eq!(
            ServerMessage::Chat { from: "A".into(), text: "hi".into() }.to_string(),
            "A: hi"
        );
        assert_eq!(ServerMessage::ExitAck.to_string(), EXIT_ACK);
    }

    #[test]
    fn test_fits_one_line() {
        assert!(fits_one_line("hello"));
        assert!(fits_one_line(&"x".repeat(MAX_LINE_LENGTH)));
        assert!(!fits_one_line(&"x".repeat(MAX_LINE_LENGTH + 1)));
        assert!(!fits_one_line("hi\n/exit"));
        assert!(!fits_one_line("carriage\rreturn"));
    }

    #[test]
    fn test_clamp_name() {
        assert_eq!(clamp_name("Alice"), "Alice");
        assert_eq!(clamp_name(&"a".repeat(200)).len(), MAX_NAME_LENGTH);

        // Multi-byte chars are never split
        let long = "é".repeat(MAX_NAME_LENGTH);
        let clamped = clamp_name(&long);
        assert!(clamped.len() <= MAX_NAME_LENGTH);
        assert!(clamped.chars().all(|c| c == 'é'));
    }

    #[test]
    fn test_longest_server_lines_fit_relay_limit() {
        let name = "n".repeat(MAX_NAME_LENGTH);
        let text = "x".repeat(MAX_LINE_LENGTH);
        let lines = [
            ServerMessage::Chat { from: name.clone(), text },
            ServerMessage::Welcome { name: name.clone() },
            ServerMessage::Joined { name: name.clone() },
            ServerMessage::Left { name },
        ];
        for line in lines {
            assert!(line.to_string().len() <= MAX_RELAY_LINE_LENGTH);
        }
    }

    #[test]
    fn test_default_name_uses_port() {
        let addr: SocketAddr = "10.0.0.7:53122".parse().unwrap();
        assert_eq!(default_name(addr), "User53122");
    }
}
