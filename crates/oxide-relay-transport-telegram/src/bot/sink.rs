//! Telegram implementation of the presenter's message sink

use async_trait::async_trait;
use oxide_relay_core::stream::{
    EditOutcome, FlushStage, MessageHandle, MessageSink, Outbound, SegmentKind, SinkError,
};
use oxide_relay_core::utils::format_text;
use teloxide::prelude::*;
use teloxide::types::{ChatId, MessageId};

use super::resilient::{edit_html_resilient, send_html_resilient};

const THINKING_LABEL: &str = "💭";

/// Render an outbound block as Telegram HTML.
///
/// Answer text goes through the markdown formatter. Reasoning is shown
/// escaped while it grows and collapsed into an expandable quote once closed.
#[must_use]
pub fn render_html(outbound: &Outbound) -> String {
    let rendered = match (outbound.kind, outbound.stage) {
        (SegmentKind::Plain, _) => format_text(&outbound.text),
        (SegmentKind::Thinking, FlushStage::Partial) => format!(
            "{THINKING_LABEL} <i>thinking…</i>\n{}",
            html_escape::encode_text(outbound.text.trim())
        ),
        (SegmentKind::Thinking, FlushStage::Final) => format!(
            "{THINKING_LABEL} <i>thoughts</i>\n<blockquote expandable>{}</blockquote>",
            html_escape::encode_text(outbound.text.trim())
        ),
    };

    if rendered.trim().is_empty() {
        // Telegram refuses empty messages
        html_escape::encode_text(outbound.text.trim()).into_owned()
    } else {
        rendered
    }
}

/// [`MessageSink`] writing into one Telegram chat
#[derive(Clone)]
pub struct TelegramSink {
    bot: Bot,
    chat_id: ChatId,
}

impl TelegramSink {
    /// Sink for `chat_id`.
    #[must_use]
    pub const fn new(bot: Bot, chat_id: ChatId) -> Self {
        Self { bot, chat_id }
    }
}

#[async_trait]
impl MessageSink for TelegramSink {
    async fn send(&self, message: &Outbound) -> Result<MessageHandle, SinkError> {
        let html = render_html(message);
        let sent = send_html_resilient(&self.bot, self.chat_id, &html, &message.text).await?;
        Ok(MessageHandle(i64::from(sent.id.0)))
    }

    async fn edit(
        &self,
        handle: &MessageHandle,
        message: &Outbound,
    ) -> Result<EditOutcome, SinkError> {
        let id = i32::try_from(handle.0).map_err(|_| SinkError::Gone)?;
        let html = render_html(message);
        edit_html_resilient(&self.bot, self.chat_id, MessageId(id), &html, &message.text).await
    }
}
