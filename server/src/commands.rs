//! Chat-borne admin commands
//!
//! Clients prefix chat text with `": "`, so a message whose third character
//! is `/` is a command. Commands are answered to the sender only and never
//! relayed.

/// Lines sent back for `/help`
pub const HELP_DOCUMENT: [&str; 5] = [
    "HELP DOCUMENT:",
    "/help    - Shows the help",
    "/kill    - Kills the player",
    "/list    - Lists connected players",
    "/version - Displays the server version",
];

pub const COMMAND_MARKER: char = '/';

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Kill,
    List,
    Help,
    Version,
    EasterEgg,
    Unknown(String),
}

impl Command {
    /// Parses a chat payload; `None` means ordinary chat
    pub fn parse(message: &str) -> Option<Command> {
        let mut chars = message.char_indices().skip(2);
        let (index, marker) = chars.next()?;
        if marker != COMMAND_MARKER {
            return None;
        }

        let word = &message[index + marker.len_utf8()..];
        let command = match word.to_ascii_lowercase().as_str() {
            "kill" => Command::Kill,
            "list" => Command::List,
            "help" => Command::Help,
            "version" => Command::Version,
            "easteregg" => Command::EasterEgg,
            _ => Command::Unknown(word.to_string()),
        };
        Some(command)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_known_commands() {
        assert_eq!(Command::parse(": /kill"), Some(Command::Kill));
        assert_eq!(Command::parse(": /LIST"), Some(Command::List));
        assert_eq!(Command::parse(": /Help"), Some(Command::Help));
        assert_eq!(Command::parse(": /version"), Some(Command::Version));
        assert_eq!(Command::parse(": /easteregg"), Some(Command::EasterEgg));
    }

    #[test]
    fn test_parse_unknown_command() {
        assert_eq!(
            Command::parse(": /dance now"),
            Some(Command::Unknown("dance now".to_string()))
        );
        assert_eq!(Command::parse(": /"), Some(Command::Unknown(String::new())));
    }

    #[test]
    fn test_plain_chat_is_not_a_command() {
        assert_eq!(Command::parse(": hello"), None);
        assert_eq!(Command::parse("/kill"), None);
        assert_eq!(Command::parse(": "), None);
        assert_eq!(Command::parse(""), None);
        assert_eq!(Command::parse(" joined the game."), None);
    }
}
