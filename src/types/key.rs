use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;

/// Named keys the gateway understands in a `key` message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NamedKey {
    Up,
    Down,
    Left,
    Right,
    Enter,
    Escape,
    Tab,
    ShiftTab,
    Backspace,
    CtrlC,
    CtrlD,
}

impl NamedKey {
    pub const ALL: [NamedKey; 11] = [
        NamedKey::Up,
        NamedKey::Down,
        NamedKey::Left,
        NamedKey::Right,
        NamedKey::Enter,
        NamedKey::Escape,
        NamedKey::Tab,
        NamedKey::ShiftTab,
        NamedKey::Backspace,
        NamedKey::CtrlC,
        NamedKey::CtrlD,
    ];

    /// Wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            NamedKey::Up => "up",
            NamedKey::Down => "down",
            NamedKey::Left => "left",
            NamedKey::Right => "right",
            NamedKey::Enter => "enter",
            NamedKey::Escape => "escape",
            NamedKey::Tab => "tab",
            NamedKey::ShiftTab => "shift_tab",
            NamedKey::Backspace => "backspace",
            NamedKey::CtrlC => "ctrl_c",
            NamedKey::CtrlD => "ctrl_d",
        }
    }
}

impl FromStr for NamedKey {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        NamedKey::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| ProtocolError::BadPayload {
                kind: "key".into(),
                reason: format!("unknown key name {s:?}"),
            })
    }
}

impl fmt::Display for NamedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
