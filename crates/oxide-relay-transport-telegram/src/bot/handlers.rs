use crate::bot::chat::{resolve_model, run_turn, ChatTurn, TurnResult};
use crate::bot::generations::{Generation, GenerationRegistry};
use crate::bot::menu::{main_menu_keyboard, MenuAction};
use crate::bot::settings::{
    initial_history, instruction_updated, navigate, render, SettingsAction, SettingsMenu,
    SettingsView, Step, SET_INSTRUCTION_PROMPT,
};
use crate::bot::sink::TelegramSink;
use crate::bot::state::State;
use crate::bot::views;
use crate::bot::UnauthorizedCache;
use crate::config::BotSettings;
use anyhow::{anyhow, Result};
use oxide_relay_core::dedup::MediaGroupDedup;
use oxide_relay_core::llm::{ChatBackend, RouteError};
use oxide_relay_core::storage::StorageProvider;
use oxide_relay_core::stream::{Presenter, PresenterConfig, StreamEnd};
use oxide_relay_core::utils::truncate_str;
use std::sync::Arc;
use teloxide::{
    dispatching::dialogue::InMemStorage,
    prelude::*,
    types::{ChatAction, MessageId, ParseMode},
    utils::command::BotCommands,
    ApiError, RequestError,
};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Dialogue handle used by every handler
pub type BotDialogue = Dialogue<State, InMemStorage<State>>;

/// Services shared by all handlers
pub struct BotContext {
    /// Profiles and history
    pub storage: Arc<dyn StorageProvider>,
    /// Router or remote relay
    pub backend: Arc<dyn ChatBackend>,
    /// Running generations
    pub generations: GenerationRegistry,
    /// Photo album deduplication
    pub media_groups: Arc<MediaGroupDedup>,
    /// Bot settings
    pub settings: Arc<BotSettings>,
    /// Streaming thresholds
    pub presenter_config: PresenterConfig,
}

// Helper function to get user name from Message
fn get_user_name(msg: &Message) -> String {
    if let Some(ref user) = msg.from {
        if let Some(ref username) = user.username {
            return username.clone();
        }
        if !user.first_name.is_empty() {
            return user.first_name.clone();
        }
    }
    "Unknown".to_string()
}

/// Safe extraction of user ID from a message.
/// Returns 0 if the user information is missing.
pub fn get_user_id_safe(msg: &Message) -> i64 {
    msg.from.as_ref().map_or(0, |u| u.id.0.cast_signed())
}

/// Supported commands for the bot
#[derive(BotCommands, Clone)]
#[command(rename_rule = "lowercase", description = "Supported commands:")]
pub enum Command {
    /// Start the bot and show welcome message
    #[command(description = "Start the bot.")]
    Start,
    /// Clear chat history
    #[command(description = "Clear chat history.")]
    Clear,
    /// Stop the answer being generated
    #[command(description = "Stop the current answer.")]
    Stop,
    /// Check bot health
    #[command(description = "Check bot health.")]
    Healthcheck,
    /// Show bot statistics
    #[command(description = "Show bot statistics.")]
    Stats,
}

async fn send_html(bot: &Bot, chat_id: ChatId, text: impl Into<String>) -> Result<Message> {
    Ok(bot
        .send_message(chat_id, text)
        .parse_mode(ParseMode::Html)
        .await?)
}

/// Start handler
///
/// # Errors
///
/// Returns an error if the welcome message cannot be sent.
pub async fn start(bot: Bot, msg: Message, dialogue: BotDialogue) -> Result<()> {
    let user_id = get_user_id_safe(&msg);
    info!("User {user_id} ({}) initiated /start command.", get_user_name(&msg));

    dialogue
        .update(State::Start)
        .await
        .map_err(|e| anyhow!(e.to_string()))?;

    bot.send_message(msg.chat.id, views::GREETING)
        .parse_mode(ParseMode::Html)
        .reply_markup(main_menu_keyboard())
        .await?;
    Ok(())
}

/// Clear context handler
///
/// # Errors
///
/// Returns an error if the reply cannot be sent.
pub async fn clear(bot: Bot, msg: Message, ctx: Arc<BotContext>) -> Result<()> {
    let user_id = get_user_id_safe(&msg);
    info!("User {user_id} initiated context clear.");

    match ctx.storage.delete_messages(user_id).await {
        Ok(()) => {
            info!("Chat history successfully cleared for user {user_id}.");
            send_html(&bot, msg.chat.id, "<b>Chat history cleared.</b>").await?;
        }
        Err(e) => {
            error!("Error clearing chat history for user {user_id}: {e}");
            bot.send_message(msg.chat.id, "An error occurred while clearing chat history.")
                .await?;
        }
    }
    Ok(())
}

/// Stop handler: cancels the user's running generation
///
/// # Errors
///
/// Returns an error if the reply cannot be sent.
pub async fn stop(bot: Bot, msg: Message, ctx: Arc<BotContext>) -> Result<()> {
    let user_id = get_user_id_safe(&msg);
    let text = if ctx.generations.cancel(user_id) {
        info!("User {user_id} stopped the running generation.");
        views::STOPPED
    } else {
        views::NOTHING_TO_STOP
    };
    bot.send_message(msg.chat.id, text).await?;
    Ok(())
}

/// Healthcheck handler
///
/// # Errors
///
/// Returns an error if the healthcheck response cannot be sent.
pub async fn healthcheck(bot: Bot, msg: Message, ctx: Arc<BotContext>) -> Result<()> {
    let user_id = get_user_id_safe(&msg);
    info!("Healthcheck command received from user {user_id}.");
    let reply = match ctx.storage.check_connection().await {
        Ok(()) => "OK".to_string(),
        Err(e) => {
            warn!("Storage healthcheck failed: {e}");
            format!("Storage unavailable: {e}")
        }
    };
    bot.send_message(msg.chat.id, reply).await?;
    Ok(())
}

/// Stats handler - shows bot statistics including unauthorized cache metrics
///
/// # Errors
///
/// Returns an error if the stats response cannot be sent.
pub async fn stats(
    bot: Bot,
    msg: Message,
    cache: Arc<UnauthorizedCache>,
    ctx: Arc<BotContext>,
) -> Result<()> {
    info!("Stats command received from user {}.", get_user_id_safe(&msg));
    send_html(
        &bot,
        msg.chat.id,
        views::stats(&cache, ctx.generations.active_count()),
    )
    .await?;
    Ok(())
}

/// Text message handler: menu buttons or a new prompt
///
/// # Errors
///
/// Returns an error if the message cannot be processed.
pub async fn handle_text(
    bot: Bot,
    msg: Message,
    ctx: Arc<BotContext>,
    dialogue: BotDialogue,
) -> Result<()> {
    let text = msg.text().unwrap_or("").to_string();
    if let Some(action) = MenuAction::parse(&text) {
        return dispatch_menu(action, &bot, &msg, &ctx, &dialogue).await;
    }
    if text.trim().is_empty() {
        return Ok(());
    }

    info!(
        "Handling message from user {} ({}). Text: '{}'",
        get_user_id_safe(&msg),
        get_user_name(&msg),
        truncate_str(&text, 100)
    );
    spawn_generation(bot, msg.chat.id, get_user_id_safe(&msg), ctx, text);
    Ok(())
}

/// Photo handler: each album is answered once, with its caption as the prompt
///
/// # Errors
///
/// Returns an error if the reply cannot be sent.
pub async fn handle_photo(bot: Bot, msg: Message, ctx: Arc<BotContext>) -> Result<()> {
    let user_id = get_user_id_safe(&msg);

    if let Some(group_id) = msg.media_group_id() {
        let group_id = group_id.to_string();
        if !ctx.media_groups.first_sighting(user_id, &group_id).await {
            info!(user_id, group_id = %group_id, "Skipping repeated media group item");
            return Ok(());
        }
    }

    match msg.caption().map(str::trim).filter(|c| !c.is_empty()) {
        Some(caption) => {
            spawn_generation(bot, msg.chat.id, user_id, ctx, caption.to_string());
        }
        None => {
            bot.send_message(msg.chat.id, views::PHOTO_NEEDS_CAPTION)
                .await?;
        }
    }
    Ok(())
}

/// Run a generation in its own task so that /stop and newer messages are
/// processed while it streams.
fn spawn_generation(bot: Bot, chat_id: ChatId, user_id: i64, ctx: Arc<BotContext>, text: String) {
    // Registered before spawning so generations queue in arrival order
    let generation = ctx.generations.begin(user_id);
    tokio::spawn(async move {
        if let Err(e) = generate(bot, chat_id, user_id, &ctx, &text, generation).await {
            error!(user_id, "Generation failed: {e:#}");
        }
    });
}

async fn generate(
    bot: Bot,
    chat_id: ChatId,
    user_id: i64,
    ctx: &BotContext,
    text: &str,
    mut generation: Generation,
) -> Result<()> {
    // The superseded turn may still be storing its answer
    generation.wait_for_previous().await;
    let result = answer(bot, chat_id, user_id, ctx, text, &generation.cancel).await;
    ctx.generations.finish(user_id, generation.ticket);
    result
}

async fn answer(
    bot: Bot,
    chat_id: ChatId,
    user_id: i64,
    ctx: &BotContext,
    text: &str,
    cancel: &CancellationToken,
) -> Result<()> {
    let profile = ctx.storage.get_profile(user_id).await?;
    let default_model = ctx.settings.telegram.default_model.as_deref();
    let model = match resolve_model(ctx.backend.as_ref(), &profile, default_model).await {
        Ok(Some(model)) => model,
        Ok(None) => {
            bot.send_message(chat_id, views::NO_MODELS).await?;
            return Ok(());
        }
        Err(e) => {
            warn!(user_id, "Model list unavailable: {e}");
            bot.send_message(chat_id, views::route_error_notice(&e))
                .await?;
            return Ok(());
        }
    };

    if !cancel.is_cancelled() {
        if let Err(e) = bot.send_chat_action(chat_id, ChatAction::Typing).await {
            warn!(user_id, "Failed to send typing action: {e}");
        }
    }

    let presenter = Presenter::new(TelegramSink::new(bot, chat_id), ctx.presenter_config);
    let turn = ChatTurn {
        user_id,
        model: &model,
        text,
        system_message: ctx.settings.telegram.system_message(),
    };
    let result = run_turn(
        ctx.storage.as_ref(),
        ctx.backend.as_ref(),
        &presenter,
        turn,
        cancel,
    )
    .await?;

    match result {
        TurnResult::Streamed(outcome) if outcome.end == StreamEnd::PresentationFailed => {
            error!(user_id, model = %model, error = ?outcome.error, "Reply could not be delivered");
        }
        TurnResult::Streamed(_) | TurnResult::Unavailable(_) | TurnResult::Skipped => {}
    }
    Ok(())
}

async fn dispatch_menu(
    action: MenuAction,
    bot: &Bot,
    msg: &Message,
    ctx: &BotContext,
    dialogue: &BotDialogue,
) -> Result<()> {
    let chat_id = msg.chat.id;
    match action {
        MenuAction::Profile => show_profile(bot, msg, ctx).await,
        MenuAction::Model => show_models(bot, msg, ctx).await,
        MenuAction::Help => send_html(bot, chat_id, views::HELP).await.map(drop),
        MenuAction::Referral => send_html(bot, chat_id, views::REFERRAL).await.map(drop),
        MenuAction::Settings => open_settings(bot, msg, ctx, dialogue).await,
    }
}

async fn show_profile(bot: &Bot, msg: &Message, ctx: &BotContext) -> Result<()> {
    let user_id = get_user_id_safe(msg);
    let profile = ctx.storage.get_profile(user_id).await?;
    let default_model = ctx.settings.telegram.default_model.as_deref();
    let model = resolve_model(ctx.backend.as_ref(), &profile, default_model)
        .await
        .unwrap_or_default();
    send_html(
        bot,
        msg.chat.id,
        views::profile_card(user_id, &profile, model.as_deref()),
    )
    .await?;
    Ok(())
}

async fn show_models(bot: &Bot, msg: &Message, ctx: &BotContext) -> Result<()> {
    let profile = ctx.storage.get_profile(get_user_id_safe(msg)).await?;
    let models = match ctx.backend.list_models().await {
        Ok(models) if !models.is_empty() => models,
        Ok(_) => {
            bot.send_message(msg.chat.id, views::NO_MODELS).await?;
            return Ok(());
        }
        Err(e) => {
            warn!("Model list unavailable: {e}");
            bot.send_message(msg.chat.id, views::route_error_notice(&e))
                .await?;
            return Ok(());
        }
    };

    let selected = profile.selected_model.as_deref();
    bot.send_message(msg.chat.id, views::model_prompt(selected))
        .parse_mode(ParseMode::Html)
        .reply_markup(views::model_keyboard(&models, selected))
        .await?;
    Ok(())
}

async fn open_settings(
    bot: &Bot,
    msg: &Message,
    ctx: &BotContext,
    dialogue: &BotDialogue,
) -> Result<()> {
    let profile = ctx.storage.get_profile(get_user_id_safe(msg)).await?;
    let view = render(SettingsMenu::Main, &profile);
    let sent = bot
        .send_message(msg.chat.id, view.text.clone())
        .parse_mode(ParseMode::Html)
        .reply_markup(view.keyboard.clone())
        .await?;

    dialogue
        .update(State::Settings {
            history: initial_history(),
            shown: Some((sent.id.0, view)),
        })
        .await
        .map_err(|e| anyhow!(e.to_string()))?;
    Ok(())
}

/// Model selection callback
///
/// # Errors
///
/// Returns an error if the profile cannot be updated or the reply cannot be sent.
pub async fn handle_model_callback(
    bot: Bot,
    q: CallbackQuery,
    ctx: Arc<BotContext>,
) -> Result<()> {
    bot.answer_callback_query(q.id.clone()).await?;
    let user_id = q.from.id.0.cast_signed();
    let Some(model) = q
        .data
        .as_deref()
        .and_then(|d| d.strip_prefix(views::MODEL_CALLBACK_PREFIX))
    else {
        return Ok(());
    };
    let Some(message) = q.message.as_ref() else {
        return Ok(());
    };

    let models = ctx.backend.list_models().await.unwrap_or_default();
    let Some(listing) = models.iter().find(|m| m.name == model) else {
        bot.send_message(
            message.chat().id,
            views::route_error_notice(&RouteError::UnknownModel(model.to_string())),
        )
        .await?;
        return Ok(());
    };

    let mut profile = ctx.storage.get_profile(user_id).await?;
    profile.selected_model = Some(listing.name.clone());
    ctx.storage.update_profile(user_id, profile).await?;
    info!(user_id, model = %model, "Model selected");

    let display = listing.display_name.as_deref().unwrap_or(&listing.name);
    edit_html(
        &bot,
        message.chat().id,
        message.id(),
        views::model_changed(display),
        None,
    )
    .await
}

async fn edit_html(
    bot: &Bot,
    chat_id: ChatId,
    message_id: MessageId,
    text: String,
    keyboard: Option<teloxide::types::InlineKeyboardMarkup>,
) -> Result<()> {
    let mut request = bot
        .edit_message_text(chat_id, message_id, text)
        .parse_mode(ParseMode::Html);
    if let Some(keyboard) = keyboard {
        request = request.reply_markup(keyboard);
    }
    match request.await {
        Ok(_) | Err(RequestError::Api(ApiError::MessageNotModified)) => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Settings menu callback
///
/// # Errors
///
/// Returns an error if storage, dialogue or Telegram calls fail.
pub async fn handle_settings_callback(
    bot: Bot,
    q: CallbackQuery,
    ctx: Arc<BotContext>,
    dialogue: BotDialogue,
) -> Result<()> {
    bot.answer_callback_query(q.id.clone()).await?;
    let Some(action) = q.data.as_deref().and_then(SettingsAction::parse) else {
        return Ok(());
    };
    let Some(message) = q.message.as_ref() else {
        return Ok(());
    };
    let (chat_id, message_id) = (message.chat().id, message.id());
    let user_id = q.from.id.0.cast_signed();

    let (mut history, shown) = match dialogue.get().await? {
        Some(State::Settings { history, shown }) => (history, shown),
        Some(State::AwaitingInstruction { history }) => (history, None),
        Some(State::Start) | None => (initial_history(), None),
    };

    let before = ctx.storage.get_profile(user_id).await?;
    let mut profile = before.clone();
    let step = navigate(&mut history, &mut profile, action);
    if profile != before {
        ctx.storage.update_profile(user_id, profile.clone()).await?;
    }

    match step {
        Step::AwaitInstruction => {
            bot.send_message(chat_id, SET_INSTRUCTION_PROMPT).await?;
            dialogue
                .update(State::AwaitingInstruction { history })
                .await
                .map_err(|e| anyhow!(e.to_string()))?;
        }
        Step::Show(menu) => {
            let view = render(menu, &profile);
            if !is_shown(shown.as_ref(), message_id, &view) {
                edit_html(
                    &bot,
                    chat_id,
                    message_id,
                    view.text.clone(),
                    Some(view.keyboard.clone()),
                )
                .await?;
            }
            dialogue
                .update(State::Settings {
                    history,
                    shown: Some((message_id.0, view)),
                })
                .await
                .map_err(|e| anyhow!(e.to_string()))?;
        }
    }
    Ok(())
}

fn is_shown(
    shown: Option<&(i32, SettingsView)>,
    message_id: MessageId,
    view: &SettingsView,
) -> bool {
    shown.is_some_and(|(id, current)| *id == message_id.0 && current == view)
}

/// Text received while waiting for a custom instruction
///
/// # Errors
///
/// Returns an error if storage, dialogue or Telegram calls fail.
pub async fn handle_instruction_input(
    bot: Bot,
    msg: Message,
    ctx: Arc<BotContext>,
    dialogue: BotDialogue,
    history: Vec<SettingsMenu>,
) -> Result<()> {
    let Some(text) = msg.text().map(str::trim).filter(|t| !t.is_empty()) else {
        bot.send_message(msg.chat.id, SET_INSTRUCTION_PROMPT).await?;
        return Ok(());
    };

    if let Some(action) = MenuAction::parse(text) {
        dialogue
            .update(State::Start)
            .await
            .map_err(|e| anyhow!(e.to_string()))?;
        return dispatch_menu(action, &bot, &msg, &ctx, &dialogue).await;
    }

    let user_id = get_user_id_safe(&msg);
    let mut profile = ctx.storage.get_profile(user_id).await?;
    profile.instruction = Some(text.to_string());
    ctx.storage.update_profile(user_id, profile.clone()).await?;
    info!(user_id, "Custom instruction updated");

    let menu = history.last().copied().unwrap_or(SettingsMenu::Main);
    let view = SettingsView {
        text: instruction_updated(text),
        keyboard: render(menu, &profile).keyboard,
    };
    let sent = bot
        .send_message(msg.chat.id, view.text.clone())
        .parse_mode(ParseMode::Html)
        .reply_markup(view.keyboard.clone())
        .await?;

    dialogue
        .update(State::Settings {
            history,
            shown: Some((sent.id.0, view)),
        })
        .await
        .map_err(|e| anyhow!(e.to_string()))?;
    Ok(())
}
