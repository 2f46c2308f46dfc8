//! Settings menu tree
//!
//! Menus form a small tree navigated with a history stack. Everything here is
//! pure: handlers feed callback data in, apply the returned effect to the
//! profile and display the rendered [`SettingsView`].

use oxide_relay_core::storage::{Language, UserProfile};
use serde::{Deserialize, Serialize};
use teloxide::types::{InlineKeyboardButton, InlineKeyboardMarkup};

/// Prefix of every settings callback payload
pub const SETTINGS_CALLBACK_PREFIX: &str = "settings:";

const BACK_LABEL: &str = "< Back";
const SELECTED_MARK: &str = "✅ ";
const INSTRUCTION_NOT_ASSIGNED: &str = "not assigned";

/// A node of the settings tree
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SettingsMenu {
    /// Root menu
    Main,
    /// Custom instruction and instruction mode
    Instruction,
    /// Context maintenance
    Context,
    /// Interface language
    Language,
}

/// What a settings button does
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettingsAction {
    /// Descend into a submenu
    Open(SettingsMenu),
    /// Return to the previous menu
    Back,
    /// Wait for the next text message and store it as the instruction
    EditInstruction,
    /// Flip instruction mode
    ToggleInstructionMode,
    /// Turn context replay on or off
    SetContext(bool),
    /// Record the interface language
    SetLanguage(Language),
}

const ACTION_TABLE: [(&str, SettingsAction); 11] = [
    ("main", SettingsAction::Open(SettingsMenu::Main)),
    ("instruction", SettingsAction::Open(SettingsMenu::Instruction)),
    ("context", SettingsAction::Open(SettingsMenu::Context)),
    ("language", SettingsAction::Open(SettingsMenu::Language)),
    ("back", SettingsAction::Back),
    ("edit_instruction", SettingsAction::EditInstruction),
    ("toggle_instruction", SettingsAction::ToggleInstructionMode),
    ("context_on", SettingsAction::SetContext(true)),
    ("context_off", SettingsAction::SetContext(false)),
    ("lang_en", SettingsAction::SetLanguage(Language::English)),
    ("lang_ru", SettingsAction::SetLanguage(Language::Russian)),
];

impl SettingsAction {
    fn entries() -> impl Iterator<Item = &'static (&'static str, Self)> {
        ACTION_TABLE.iter()
    }

    /// Callback payload for this action.
    #[must_use]
    pub fn callback_data(self) -> String {
        let key = Self::entries()
            .find(|(_, action)| *action == self)
            .map_or("main", |(key, _)| key);
        format!("{SETTINGS_CALLBACK_PREFIX}{key}")
    }

    /// Parse a callback payload produced by [`SettingsAction::callback_data`].
    #[must_use]
    pub fn parse(data: &str) -> Option<Self> {
        let key = data.strip_prefix(SETTINGS_CALLBACK_PREFIX)?;
        Self::entries()
            .find(|(candidate, _)| *candidate == key)
            .map(|(_, action)| *action)
    }
}

/// Text and keyboard of one rendered menu
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettingsView {
    /// HTML message text
    pub text: String,
    /// Inline keyboard
    pub keyboard: InlineKeyboardMarkup,
}

/// Where a button press leads
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Show this menu
    Show(SettingsMenu),
    /// Ask for the instruction text
    AwaitInstruction,
}

/// Initial history when the settings menu is opened.
#[must_use]
pub fn initial_history() -> Vec<SettingsMenu> {
    vec![SettingsMenu::Main]
}

fn current(history: &[SettingsMenu]) -> SettingsMenu {
    history.last().copied().unwrap_or(SettingsMenu::Main)
}

/// Apply `action` to the navigation stack and the profile.
///
/// Back never pops the root. Opening the menu already on top does not push
/// it twice. Leaf actions keep the current menu.
pub fn navigate(
    history: &mut Vec<SettingsMenu>,
    profile: &mut UserProfile,
    action: SettingsAction,
) -> Step {
    if history.is_empty() {
        history.push(SettingsMenu::Main);
    }

    match action {
        SettingsAction::Back => {
            if history.len() > 1 {
                history.pop();
            }
        }
        SettingsAction::Open(menu) => {
            if current(history) != menu {
                history.push(menu);
            }
        }
        SettingsAction::EditInstruction => return Step::AwaitInstruction,
        SettingsAction::ToggleInstructionMode => {
            profile.instruction_mode_on = !profile.instruction_mode_on;
        }
        SettingsAction::SetContext(on) => profile.context_mode_on = on,
        SettingsAction::SetLanguage(language) => profile.language = language,
    }

    Step::Show(current(history))
}

fn button(label: impl Into<String>, action: SettingsAction) -> Vec<InlineKeyboardButton> {
    vec![InlineKeyboardButton::callback(label, action.callback_data())]
}

fn marked(label: &str, selected: bool) -> String {
    if selected {
        format!("{SELECTED_MARK}{label}")
    } else {
        label.to_string()
    }
}

/// Render `menu` for `profile`.
#[must_use]
pub fn render(menu: SettingsMenu, profile: &UserProfile) -> SettingsView {
    let back = || button(BACK_LABEL, SettingsAction::Back);

    let (text, rows) = match menu {
        SettingsMenu::Main => (
            "<b>Settings</b>\n\n\
             In this section, you can:\n\
             1. Assign any role or custom instruction the bot will consider when preparing responses.\n\
             2. Turn context maintenance on or off. When the context is on, the bot considers the previous dialogue.\n\
             3. Select the interface language."
                .to_string(),
            vec![
                button("Set custom instruction", SettingsAction::Open(SettingsMenu::Instruction)),
                button("Context maintenance", SettingsAction::Open(SettingsMenu::Context)),
                button("Language", SettingsAction::Open(SettingsMenu::Language)),
            ],
        ),
        SettingsMenu::Instruction => {
            let instruction = profile
                .instruction
                .as_deref()
                .filter(|s| !s.trim().is_empty())
                .map_or_else(
                    || INSTRUCTION_NOT_ASSIGNED.to_string(),
                    |s| html_escape::encode_text(s).into_owned(),
                );
            let mode_label = if profile.instruction_mode_on {
                "✅ Instruction Mode ON/off"
            } else {
                "❌ Instruction Mode on/OFF"
            };
            (
                format!(
                    "<b>Instruction Settings</b>\n\n\
                     In this section, you can assign any role or instruction, which the bot will follow when preparing responses.\n\n\
                     Custom instruction: {instruction}"
                ),
                vec![
                    button("Edit Custom Instruction", SettingsAction::EditInstruction),
                    button(mode_label, SettingsAction::ToggleInstructionMode),
                    back(),
                ],
            )
        }
        SettingsMenu::Context => (
            "<b>Context Settings</b>\n\nThis affects the model's ability to see the dialogue history."
                .to_string(),
            vec![
                button(
                    marked("Enable Context", profile.context_mode_on),
                    SettingsAction::SetContext(true),
                ),
                button(
                    marked("Disable Context", !profile.context_mode_on),
                    SettingsAction::SetContext(false),
                ),
                back(),
            ],
        ),
        SettingsMenu::Language => (
            format!(
                "<b>Language Settings</b>\n\nSelect the interface language.\n\nCurrent: {}",
                profile.language.label()
            ),
            vec![
                button(
                    marked("Set English", profile.language == Language::English),
                    SettingsAction::SetLanguage(Language::English),
                ),
                button(
                    marked("Set Russian", profile.language == Language::Russian),
                    SettingsAction::SetLanguage(Language::Russian),
                ),
                back(),
            ],
        ),
    };

    SettingsView {
        text,
        keyboard: InlineKeyboardMarkup::new(rows),
    }
}

/// Prompt shown while waiting for the instruction text
pub const SET_INSTRUCTION_PROMPT: &str =
    "Write and send your instruction.\n\nFor example: translate all requests into Spanish";

/// Confirmation after the instruction was stored.
#[must_use]
pub fn instruction_updated(instruction: &str) -> String {
    format!(
        "✅ <b>Instruction successfully updated</b>\n\nCurrent role:\n<blockquote>{}</blockquote>",
        html_escape::encode_text(instruction)
    )
}
