/// Conversation turn: prompt building, streaming and persistence
pub mod chat;
/// In-flight generations and their cancellation tokens
pub mod generations;
/// General command and message handlers
pub mod handlers;
/// Reply keyboard menu
pub mod menu;
/// Resilient messaging with automatic retry for Telegram API operations
pub mod resilient;
/// Settings menu tree
pub mod settings;
/// Presenter sink writing into a Telegram chat
pub mod sink;
/// User state and dialogue management
pub mod state;
/// Unauthorized access flood protection
pub mod unauthorized_cache;
/// View layer for UI components (keyboards, messages)
pub mod views;

pub use unauthorized_cache::UnauthorizedCache;
