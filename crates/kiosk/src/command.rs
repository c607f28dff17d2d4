//! Display control commands.

use serde::{Deserialize, Serialize};

use crate::error::{KioskError, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum Command {
    Next,
    Previous,
    Pause,
    Resume,
    Reload,
    Jump { item: String },
    /// Show one item outside the rotation without touching selection state.
    Overlay { item: String },
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::Next => "next",
            Command::Previous => "previous",
            Command::Pause => "pause",
            Command::Resume => "resume",
            Command::Reload => "reload",
            Command::Jump { .. } => "jump",
            Command::Overlay { .. } => "overlay",
        }
    }

    /// Item the command refers to, if any.
    pub fn target(&self) -> Option<&str> {
        match self {
            Command::Jump { item } | Command::Overlay { item } => Some(item.as_str()),
            _ => None,
        }
    }

    /// Parse a command name plus optional item. Accepts the short aliases
    /// `prev` and `play` used by older remotes.
    pub fn parse(name: &str, item: Option<&str>) -> Result<Self> {
        let item = item.map(str::trim).filter(|i| !i.is_empty());
        let needs_item = |kind: &str| {
            item.map(str::to_string)
                .ok_or_else(|| KioskError::validation(format!("command \"{}\" needs an item", kind)))
        };

        match name.trim().to_ascii_lowercase().as_str() {
            "next" => Ok(Command::Next),
            "previous" | "prev" => Ok(Command::Previous),
            "pause" => Ok(Command::Pause),
            "resume" | "play" => Ok(Command::Resume),
            "reload" => Ok(Command::Reload),
            "jump" => Ok(Command::Jump {
                item: needs_item("jump")?,
            }),
            "overlay" => Ok(Command::Overlay {
                item: needs_item("overlay")?,
            }),
            other => Err(KioskError::validation(format!("unknown command \"{}\"", other))),
        }
    }
}

/// Loose request shape accepted from clients.
#[derive(Debug, Clone, Deserialize)]
pub struct CommandRequest {
    pub command: String,
    #[serde(default, alias = "image_name", alias = "id")]
    pub item: Option<String>,
}

impl TryFrom<CommandRequest> for Command {
    type Error = KioskError;

    fn try_from(request: CommandRequest) -> Result<Self> {
        Command::parse(&request.command, request.item.as_deref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_names_and_aliases() {
        assert_eq!(Command::parse("next", None).unwrap(), Command::Next);
        assert_eq!(Command::parse("prev", None).unwrap(), Command::Previous);
        assert_eq!(Command::parse("PLAY", None).unwrap(), Command::Resume);
        assert_eq!(
            Command::parse("jump", Some("beach.jpg")).unwrap(),
            Command::Jump {
                item: "beach.jpg".into()
            }
        );
    }

    #[test]
    fn rejects_unknown_and_incomplete_commands() {
        assert!(matches!(
            Command::parse("explode", None),
            Err(KioskError::Validation(_))
        ));
        assert!(matches!(
            Command::parse("jump", Some("  ")),
            Err(KioskError::Validation(_))
        ));
        assert!(matches!(
            Command::parse("overlay", None),
            Err(KioskError::Validation(_))
        ));
    }

    #[test]
    fn request_accepts_legacy_field_name() {
        let request: CommandRequest =
            serde_json::from_str(r#"{"command": "jump", "image_name": "a.png"}"#).unwrap();
        let command = Command::try_from(request).unwrap();
        assert_eq!(command.target(), Some("a.png"));
        assert_eq!(command.name(), "jump");
    }

    #[test]
    fn wire_format_is_tagged() {
        let json = serde_json::to_value(Command::Overlay { item: "x".into() }).unwrap();
        assert_eq!(json, serde_json::json!({"command": "overlay", "item": "x"}));
        let json = serde_json::to_value(Command::Pause).unwrap();
        assert_eq!(json, serde_json::json!({"command": "pause"}));
    }
}
