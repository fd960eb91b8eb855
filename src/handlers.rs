use std::sync::Arc;

use teloxide::net::Download;
use teloxide::prelude::*;
use teloxide::types::{ChatAction, Message};
use tracing::{error, info, warn};

use crate::error::{ChartError, DownloadFailure, GENERIC_ERROR_MESSAGE};
use crate::models::ChartSource;
use crate::pipeline::ChartPipeline;
use crate::session::{ChatState, ProcessingGuard, SessionStore};
use crate::utils::{extract_url, format_analysis, format_help, format_welcome, split_message, TELEGRAM_MESSAGE_LIMIT};

pub const BUSY_MESSAGE: &str = "⏳ I'm still working on your previous chart, please wait for that reply first.";
pub const NO_URL_MESSAGE: &str =
    "🤔 Send me a chart image or a link to a page with a chart. Use /help for details.";
const PROCESSING_MESSAGE: &str = "🔍 Analyzing your chart, please wait...";

/// A chat message reduced to what the bot reacts to.
#[derive(Debug, Clone)]
pub enum Incoming {
    Start,
    Help,
    Text(String),
    Image {
        bytes: Vec<u8>,
        declared_mime: Option<String>,
    },
}

/// Reply text for one incoming message.
///
/// For chart requests it holds the chat in `Replied` until dropped, so callers
/// drop it only after the text has been delivered.
pub struct Reply {
    pub text: String,
    _delivery: Option<ProcessingGuard>,
}

impl Reply {
    fn plain(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            _delivery: None,
        }
    }
}

/// Chat front-end: drives the per-chat state machine and turns pipeline
/// results or errors into exactly one reply.
#[derive(Clone)]
pub struct ChartBot {
    pipeline: Arc<ChartPipeline>,
    sessions: SessionStore,
}

impl ChartBot {
    pub fn new(pipeline: Arc<ChartPipeline>) -> Self {
        Self {
            pipeline,
            sessions: SessionStore::new(),
        }
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    pub async fn handle(&self, chat: ChatId, incoming: Incoming) -> Reply {
        match incoming {
            Incoming::Start => {
                if self.sessions.state(chat) == ChatState::Idle {
                    self.sessions.set(chat, ChatState::AwaitingInput);
                }
                Reply::plain(format_welcome())
            }
            Incoming::Help => Reply::plain(format_help()),
            Incoming::Text(text) => match extract_url(&text) {
                Some(url) => self.process(chat, ChartSource::Url(url)).await,
                None => Reply::plain(NO_URL_MESSAGE),
            },
            Incoming::Image {
                bytes,
                declared_mime,
            } => {
                self.process(
                    chat,
                    ChartSource::Image {
                        bytes,
                        declared_mime,
                    },
                )
                .await
            }
        }
    }

    async fn process(&self, chat: ChatId, source: ChartSource) -> Reply {
        let Some(guard) = self.sessions.begin_processing(chat) else {
            info!(chat_id = %chat, "chart request ignored, chat is busy");
            return Reply::plain(BUSY_MESSAGE);
        };

        info!(chat_id = %chat, "processing chart request");
        let pipeline = self.pipeline.clone();
        // own task, so a panic in the pipeline is contained here
        let outcome = tokio::spawn(async move { pipeline.run(source).await }).await;

        let text = match outcome {
            Ok(Ok(outcome)) => {
                info!(chat_id = %chat, "chart analyzed");
                format_analysis(&outcome)
            }
            Ok(Err(e)) => {
                warn!(chat_id = %chat, kind = e.kind(), error = %e, "chart request failed");
                e.user_message().to_string()
            }
            Err(e) => {
                error!(chat_id = %chat, error = %e, "chart task aborted");
                GENERIC_ERROR_MESSAGE.to_string()
            }
        };

        guard.replied();
        Reply {
            text,
            _delivery: Some(guard),
        }
    }
}

pub async fn handle_start(bot: Bot, msg: Message, chart_bot: Arc<ChartBot>) -> ResponseResult<()> {
    let welcome = chart_bot.handle(msg.chat.id, Incoming::Start).await;
    bot.send_message(msg.chat.id, welcome.text)
        .reply_to_message_id(msg.id)
        .await?;
    Ok(())
}

pub async fn handle_help(bot: Bot, msg: Message, chart_bot: Arc<ChartBot>) -> ResponseResult<()> {
    let help = chart_bot.handle(msg.chat.id, Incoming::Help).await;
    bot.send_message(msg.chat.id, help.text)
        .reply_to_message_id(msg.id)
        .await?;
    Ok(())
}

pub async fn handle_message(
    bot: Bot,
    msg: Message,
    chart_bot: Arc<ChartBot>,
    max_image_bytes: usize,
) -> ResponseResult<()> {
    let incoming = match read_incoming(&bot, &msg, max_image_bytes).await {
        Ok(Some(incoming)) => incoming,
        Ok(None) => return Ok(()),
        Err(e) => {
            warn!(chat_id = %msg.chat.id, kind = e.kind(), error = %e, "could not read attachment");
            bot.send_message(msg.chat.id, e.user_message())
                .reply_to_message_id(msg.id)
                .await?;
            return Ok(());
        }
    };

    let is_chart_request = match &incoming {
        Incoming::Image { .. } => true,
        Incoming::Text(text) => extract_url(text).is_some(),
        _ => false,
    };

    let processing_msg = if is_chart_request {
        let notice = bot
            .send_message(msg.chat.id, PROCESSING_MESSAGE)
            .reply_to_message_id(msg.id)
            .await?;
        let _ = bot.send_chat_action(msg.chat.id, ChatAction::Typing).await;
        Some(notice)
    } else {
        None
    };

    let reply = chart_bot.handle(msg.chat.id, incoming).await;

    if let Some(notice) = processing_msg {
        let _ = bot.delete_message(msg.chat.id, notice.id).await;
    }

    for chunk in split_message(&reply.text, TELEGRAM_MESSAGE_LIMIT) {
        bot.send_message(msg.chat.id, chunk).await?;
    }
    // chat leaves `Replied` only once the answer is out
    drop(reply);

    Ok(())
}

/// Turns a Telegram message into [`Incoming`], downloading photos and image documents.
/// `Ok(None)` for messages the bot does not react to (stickers, voice, ...).
async fn read_incoming(
    bot: &Bot,
    msg: &Message,
    max_image_bytes: usize,
) -> Result<Option<Incoming>, ChartError> {
    if let Some(photos) = msg.photo() {
        // Telegram re-encodes photos as JPEG; the largest size is the best input
        let Some(photo) = photos.iter().max_by_key(|p| u64::from(p.width) * u64::from(p.height)) else {
            return Ok(None);
        };
        let bytes = download(bot, &photo.file.id, photo.file.size as usize, max_image_bytes).await?;
        return Ok(Some(Incoming::Image {
            bytes,
            declared_mime: Some("image/jpeg".to_string()),
        }));
    }

    if let Some(document) = msg.document() {
        let bytes = download(bot, &document.file.id, document.file.size as usize, max_image_bytes).await?;
        return Ok(Some(Incoming::Image {
            bytes,
            declared_mime: document.mime_type.as_ref().map(|m| m.to_string()),
        }));
    }

    Ok(msg
        .text()
        .map(str::trim)
        .filter(|text| !text.is_empty())
        .map(|text| Incoming::Text(text.to_string())))
}

async fn download(
    bot: &Bot,
    file_id: &str,
    declared_size: usize,
    max_image_bytes: usize,
) -> Result<Vec<u8>, ChartError> {
    if declared_size > max_image_bytes {
        return Err(ChartError::Download(DownloadFailure::TooLarge {
            limit: max_image_bytes,
        }));
    }

    let file = bot
        .get_file(file_id)
        .await
        .map_err(|e| ChartError::Download(DownloadFailure::Transport(e.to_string())))?;

    let mut bytes = Vec::with_capacity(declared_size);
    bot.download_file(&file.path, &mut bytes)
        .await
        .map_err(|e| ChartError::Download(DownloadFailure::Transport(e.to_string())))?;
    Ok(bytes)
}
