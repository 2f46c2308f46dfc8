//! Reply keyboard menu
//!
//! Button labels are parsed into [`MenuAction`] once; handlers dispatch on
//! the enum and never compare raw text.

use teloxide::types::{KeyboardButton, KeyboardMarkup};

/// Action behind a reply keyboard button
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MenuAction {
    /// Show the profile card
    Profile,
    /// Pick a model
    Model,
    /// Support information
    Help,
    /// Referral link
    Referral,
    /// Open the settings menu
    Settings,
}

const MENU_TABLE: [(MenuAction, &str); 5] = [
    (MenuAction::Profile, "👤 Профиль"),
    (MenuAction::Model, "🧰 Выбрать ИИ модель"),
    (MenuAction::Help, "🆘 Поддержка"),
    (MenuAction::Referral, "🔗 Привести друга"),
    (MenuAction::Settings, "📜 Настройки"),
];

impl MenuAction {
    /// Every action, in table order.
    pub fn all() -> impl Iterator<Item = Self> {
        MENU_TABLE.iter().map(|(action, _)| *action)
    }

    /// Button label.
    #[must_use]
    pub fn label(self) -> &'static str {
        MENU_TABLE
            .iter()
            .find(|(action, _)| *action == self)
            .map_or("", |(_, label)| label)
    }

    /// Action for a message text, if it is exactly a button label.
    ///
    /// ```
    /// use oxide_relay_transport_telegram::bot::menu::MenuAction;
    ///
    /// assert_eq!(MenuAction::parse("📜 Настройки"), Some(MenuAction::Settings));
    /// assert_eq!(MenuAction::parse("settings"), None);
    /// ```
    #[must_use]
    pub fn parse(text: &str) -> Option<Self> {
        let text = text.trim();
        MENU_TABLE
            .iter()
            .find(|(_, label)| *label == text)
            .map(|(action, _)| *action)
    }
}

/// Main reply keyboard
#[must_use]
pub fn main_menu_keyboard() -> KeyboardMarkup {
    let button = |action: MenuAction| KeyboardButton::new(action.label());
    KeyboardMarkup::new(vec![
        vec![button(MenuAction::Profile), button(MenuAction::Referral)],
        vec![button(MenuAction::Model)],
        vec![button(MenuAction::Settings), button(MenuAction::Help)],
    ])
    .resize_keyboard()
}
