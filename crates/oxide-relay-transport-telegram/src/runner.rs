use crate::bot::generations::GenerationRegistry;
use crate::bot::handlers::{self, get_user_id_safe, BotContext, BotDialogue, Command};
use crate::bot::settings::{SettingsMenu, SETTINGS_CALLBACK_PREFIX};
use crate::bot::state::State;
use crate::bot::views::MODEL_CALLBACK_PREFIX;
use crate::bot::UnauthorizedCache;
use crate::config::{
    get_media_group_sweep_secs, get_unauthorized_cache_max_size, get_unauthorized_cache_ttl,
    get_unauthorized_cooldown, BotSettings,
};
use anyhow::{Context, Result};
use oxide_relay_core::dedup::MediaGroupDedup;
use oxide_relay_core::llm::{ChatBackend, RemoteRelay, Router};
use oxide_relay_core::storage::{InMemoryStorage, StorageProvider};
use oxide_relay_core::stream::PresenterConfig;
use std::sync::Arc;
use std::time::Duration;
use teloxide::dispatching::dialogue::InMemStorage;
use teloxide::dispatching::UpdateHandler;
use teloxide::prelude::*;
use teloxide::types::CallbackQuery;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Run the Telegram transport runtime.
///
/// # Errors
///
/// Returns an error if the chat backend cannot be initialized.
pub async fn run_bot(settings: Arc<BotSettings>) -> Result<()> {
    let backend = init_backend(&settings)?;
    let storage = init_storage().await;

    if settings.telegram.allowed_users().is_empty() {
        warn!("ALLOWED_USERS is empty, every user will be denied access.");
    }

    let media_groups = Arc::new(MediaGroupDedup::default());
    let shutdown = CancellationToken::new();
    let sweeper = Arc::clone(&media_groups).spawn_sweeper(
        Duration::from_secs(get_media_group_sweep_secs()),
        shutdown.clone(),
    );

    let ctx = Arc::new(BotContext {
        storage,
        backend,
        generations: GenerationRegistry::new(),
        media_groups,
        settings: Arc::clone(&settings),
        presenter_config: PresenterConfig::from_env(),
    });

    let bot = Bot::new(settings.telegram.telegram_token.clone());
    let bot_state = InMemStorage::<State>::new();
    let unauthorized_cache = init_unauthorized_cache();
    let handler = setup_handler();

    info!("Bot is running...");

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![ctx, bot_state, unauthorized_cache])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;

    shutdown.cancel();
    if let Err(e) = sweeper.await {
        warn!("Media group sweeper ended abnormally: {e}");
    }
    info!("Bot stopped.");
    Ok(())
}

fn init_backend(settings: &BotSettings) -> Result<Arc<dyn ChatBackend>> {
    if let Some(url) = settings.telegram.relay_url() {
        info!("Using remote relay at {url}.");
        return Ok(Arc::new(RemoteRelay::new(
            url,
            settings.telegram.relay_api_key.clone(),
        )));
    }

    let router = Router::from_settings(&settings.relay)
        .context("Failed to load the provider catalog")?;
    info!(
        models = router.registry().len(),
        "In-process router initialized."
    );
    Ok(Arc::new(router))
}

async fn init_storage() -> Arc<dyn StorageProvider> {
    let storage = InMemoryStorage::new();
    if let Err(e) = storage.check_connection().await {
        error!("Storage connection check returned error: {e}");
    }
    info!("In-memory storage initialized.");
    Arc::new(storage)
}

fn init_unauthorized_cache() -> Arc<UnauthorizedCache> {
    let cooldown = get_unauthorized_cooldown();
    let ttl = get_unauthorized_cache_ttl();
    let max_size = get_unauthorized_cache_max_size();

    info!(
        "Initializing UnauthorizedCache (cooldown: {}s, ttl: {}s, max_size: {})",
        cooldown, ttl, max_size
    );

    Arc::new(UnauthorizedCache::new(cooldown, ttl, max_size))
}

fn callback_has_prefix(q: &CallbackQuery, prefix: &str) -> bool {
    q.data.as_deref().is_some_and(|d| d.starts_with(prefix))
}

fn setup_handler() -> UpdateHandler<teloxide::RequestError> {
    dptree::entry()
        .branch(
            Update::filter_callback_query()
                .filter(|q: CallbackQuery, ctx: Arc<BotContext>| {
                    ctx.settings
                        .telegram
                        .allowed_users()
                        .contains(&q.from.id.0.cast_signed())
                })
                .branch(
                    dptree::filter(|q: CallbackQuery| callback_has_prefix(&q, MODEL_CALLBACK_PREFIX))
                        .endpoint(handle_model_callback),
                )
                .branch(
                    dptree::filter(|q: CallbackQuery| {
                        callback_has_prefix(&q, SETTINGS_CALLBACK_PREFIX)
                    })
                    .enter_dialogue::<CallbackQuery, InMemStorage<State>, State>()
                    .endpoint(handle_settings_callback),
                ),
        )
        .branch(
            Update::filter_message().branch(
                // Main branch for authorized users
                dptree::filter(|msg: Message, ctx: Arc<BotContext>| {
                    ctx.settings
                        .telegram
                        .allowed_users()
                        .contains(&get_user_id_safe(&msg))
                })
                .enter_dialogue::<Message, InMemStorage<State>, State>()
                .branch(
                    dptree::entry()
                        .filter_command::<Command>()
                        .endpoint(handle_command),
                )
                .branch(
                    dptree::case![State::AwaitingInstruction { history }]
                        .endpoint(handle_instruction_input),
                )
                .branch(dptree::filter(|msg: Message| msg.text().is_some()).endpoint(handle_text))
                .branch(
                    dptree::filter(|msg: Message| msg.photo().is_some()).endpoint(handle_photo),
                ),
            ),
        )
        .branch(
            // Everyone the filters above rejected
            Update::filter_message().endpoint(handle_unauthorized),
        )
}

async fn handle_unauthorized(
    bot: Bot,
    msg: Message,
    cache: Arc<UnauthorizedCache>,
) -> Result<(), teloxide::RequestError> {
    let user_id = get_user_id_safe(&msg);
    let user_name = msg
        .from
        .as_ref()
        .map_or_else(|| "Unknown".to_string(), |u| u.first_name.clone());

    if cache.should_send(user_id, &user_name).await {
        info!(
            "⛔️ Unauthorized access from user {} ({}). Sending denial message.",
            user_id, user_name
        );

        if let Err(e) = bot.send_message(msg.chat.id, "⛔️ Access denied").await {
            error!("Failed to send access denied message to {}: {}", user_id, e);
        } else {
            cache.mark_sent(user_id).await;
        }
    }

    respond(())
}

async fn handle_command(
    bot: Bot,
    msg: Message,
    cmd: Command,
    ctx: Arc<BotContext>,
    dialogue: BotDialogue,
    cache: Arc<UnauthorizedCache>,
) -> Result<(), teloxide::RequestError> {
    let res = match cmd {
        Command::Start => handlers::start(bot, msg, dialogue).await,
        Command::Clear => handlers::clear(bot, msg, ctx).await,
        Command::Stop => handlers::stop(bot, msg, ctx).await,
        Command::Healthcheck => handlers::healthcheck(bot, msg, ctx).await,
        Command::Stats => handlers::stats(bot, msg, cache, ctx).await,
    };
    if let Err(e) = res {
        error!("Command error: {}", e);
    }
    respond(())
}

async fn handle_text(
    bot: Bot,
    msg: Message,
    ctx: Arc<BotContext>,
    dialogue: BotDialogue,
) -> Result<(), teloxide::RequestError> {
    if let Err(e) = handlers::handle_text(bot, msg, ctx, dialogue).await {
        error!("Text handler error: {}", e);
    }
    respond(())
}

async fn handle_photo(
    bot: Bot,
    msg: Message,
    ctx: Arc<BotContext>,
) -> Result<(), teloxide::RequestError> {
    if let Err(e) = handlers::handle_photo(bot, msg, ctx).await {
        error!("Photo handler error: {}", e);
    }
    respond(())
}

async fn handle_instruction_input(
    bot: Bot,
    msg: Message,
    ctx: Arc<BotContext>,
    dialogue: BotDialogue,
    history: Vec<SettingsMenu>,
) -> Result<(), teloxide::RequestError> {
    if let Err(e) = handlers::handle_instruction_input(bot, msg, ctx, dialogue, history).await {
        error!("Instruction input handler error: {}", e);
    }
    respond(())
}

async fn handle_model_callback(
    bot: Bot,
    q: CallbackQuery,
    ctx: Arc<BotContext>,
) -> Result<(), teloxide::RequestError> {
    if let Err(e) = handlers::handle_model_callback(bot, q, ctx).await {
        error!("Model callback handler error: {}", e);
    }
    respond(())
}

async fn handle_settings_callback(
    bot: Bot,
    q: CallbackQuery,
    ctx: Arc<BotContext>,
    dialogue: BotDialogue,
) -> Result<(), teloxide::RequestError> {
    if let Err(e) = handlers::handle_settings_callback(bot, q, ctx, dialogue).await {
        error!("Settings callback handler error: {}", e);
    }
    respond(())
}
