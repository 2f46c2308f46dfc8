use serde::{Deserialize, Serialize};

use super::settings::{SettingsMenu, SettingsView};

/// Represents the current state of the user dialogue
#[derive(Clone, Debug, Serialize, Deserialize, Default, PartialEq)]
pub enum State {
    /// Normal chat
    #[default]
    Start,
    /// Settings menu is open
    Settings {
        /// Visited menus, current one last
        history: Vec<SettingsMenu>,
        /// Settings message and what it currently shows
        shown: Option<(i32, SettingsView)>,
    },
    /// Next text message becomes the custom instruction
    AwaitingInstruction {
        /// Menus to return to afterwards
        history: Vec<SettingsMenu>,
    },
}
