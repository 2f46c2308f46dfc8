//! View layer for bot UI components
//!
//! Texts and inline keyboards outside the settings tree.

use oxide_relay_core::llm::{ModelListing, RouteError};
use oxide_relay_core::storage::UserProfile;
use teloxide::types::{InlineKeyboardButton, InlineKeyboardMarkup};

use super::UnauthorizedCache;

/// Prefix of model selection callbacks
pub const MODEL_CALLBACK_PREFIX: &str = "model:";

/// Greeting sent on /start
pub const GREETING: &str = "👋 <b>Hi, I'm an AI bot.</b>\n\n\
    Send me a message and I will answer with the model of your choice.\n\
    Use the menu below to pick a model or tune the settings.";

/// Support text
pub const HELP: &str = "🆘 <b>Support</b>\n\n\
    • Just write a message to talk to the model.\n\
    • /stop interrupts the answer being generated.\n\
    • /clear forgets the conversation.\n\
    • Photo albums are answered once, using the caption as the prompt.";

/// Referral text
pub const REFERRAL: &str = "🔗 <b>Bring a friend</b>\n\nShare this bot with a friend so they can chat too.";

/// Reply to /stop without a running generation
pub const NOTHING_TO_STOP: &str = "⚠️ Nothing is being generated right now.";

/// Reply to /stop with a running generation
pub const STOPPED: &str = "⏹ Generation stopped.";

/// Sent when no model can be resolved at all
pub const NO_MODELS: &str = "⚠️ No models are available right now.";

/// Photo without caption
pub const PHOTO_NEEDS_CAPTION: &str = "🖼 Add a caption to the photo to ask something about it.";

/// Callback payload selecting `model`.
#[must_use]
pub fn model_callback(model: &str) -> String {
    format!("{MODEL_CALLBACK_PREFIX}{model}")
}

/// One button per logical model, the selected one marked.
#[must_use]
pub fn model_keyboard(models: &[ModelListing], selected: Option<&str>) -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(models.iter().map(|model| {
        let shown = model.display_name.as_deref().unwrap_or(&model.name);
        let label = if selected == Some(model.name.as_str()) {
            format!("✅ {shown}")
        } else {
            shown.to_string()
        };
        vec![InlineKeyboardButton::callback(
            label,
            model_callback(&model.name),
        )]
    }))
}

/// Title above the model keyboard.
#[must_use]
pub fn model_prompt(current: Option<&str>) -> String {
    match current {
        Some(model) => format!(
            "🧰 <b>Choose a model</b>\n\nCurrent: <code>{}</code>",
            html_escape::encode_text(model)
        ),
        None => "🧰 <b>Choose a model</b>".to_string(),
    }
}

/// Confirmation after a model was picked.
#[must_use]
pub fn model_changed(display_name: &str) -> String {
    format!(
        "Model changed to <b>{}</b>",
        html_escape::encode_text(display_name)
    )
}

/// Profile card.
#[must_use]
pub fn profile_card(user_id: i64, profile: &UserProfile, model: Option<&str>) -> String {
    let on_off = |on: bool| if on { "on" } else { "off" };
    format!(
        "👤 <b>Profile</b>\n\n\
         • ID: <code>{user_id}</code>\n\
         • Model: {}\n\
         • Context: {}\n\
         • Instruction mode: {}\n\
         • Language: {}",
        model.map_or_else(
            || "not selected".to_string(),
            |m| html_escape::encode_text(m).into_owned()
        ),
        on_off(profile.context_mode_on),
        on_off(profile.instruction_mode_on),
        profile.language.label(),
    )
}

/// Statistics including unauthorized cache metrics.
#[must_use]
pub fn stats(cache: &UnauthorizedCache, active_generations: usize) -> String {
    let cooldown_mins = cache.cooldown().as_secs() / 60;
    format!(
        "<b>📊 Bot Statistics</b>\n\n\
        • Active generations: {active_generations}\n\n\
        <b>Anti-spam protection (Access Denied):</b>\n\
        • Cooldown period: {cooldown_mins} min.\n\
        • Cache entries: {}\n\
        • Blocked notifications: {}\n\n\
        <i>Bot responds with \"Access Denied\" no more than once every {cooldown_mins} minutes per user to avoid being banned by Telegram.</i>",
        cache.entry_count(),
        cache.silenced_count(),
    )
}

/// Notice for a request that could not be started.
#[must_use]
pub fn route_error_notice(err: &RouteError) -> String {
    match err {
        RouteError::UnknownModel(model) => {
            format!("⚠️ Model {model} is not available. Please choose another one.")
        }
        RouteError::AllProvidersExhausted { attempts, .. } => format!(
            "⚠️ All providers failed to answer ({attempts} attempt(s)). Please try again later."
        ),
        RouteError::Validation(reason) => format!("⚠️ Request rejected: {reason}"),
        RouteError::StreamInterrupted(_) | RouteError::Relay(_) => {
            "⚠️ The model is unavailable right now. Please try again later.".to_string()
        }
    }
}
