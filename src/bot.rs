use crate::api_client::{InterpretationClient, OpenAiVisionApi};
use crate::config::Config;
use crate::fetcher::build_http_client;
use crate::handlers::{self, ChartBot};
use crate::pipeline::ChartPipeline;
use anyhow::{Context, Result};
use std::sync::Arc;
use teloxide::prelude::*;
use teloxide::types::Message;
use tracing::info;

pub async fn start_bot(bot: Bot, config: Config) -> Result<()> {
    info!("Bot is starting...");

    let http = build_http_client(&config.pipeline).context("Failed to build HTTP client")?;
    let vision_api =
        OpenAiVisionApi::new(config.api.clone()).context("Failed to build model API client")?;
    let interpreter = InterpretationClient::new(Arc::new(vision_api), &config.api);
    let pipeline = ChartPipeline::new(&config.pipeline, http, interpreter);
    let chart_bot = Arc::new(ChartBot::new(Arc::new(pipeline)));
    let max_image_bytes = config.pipeline.max_image_bytes;

    info!(
        model = %config.api.model,
        base_url = %config.api.base_url,
        "Model API configured"
    );

    let chart_bot_commands = chart_bot.clone();
    let chart_bot_messages = chart_bot.clone();
    let handler = dptree::entry()
        .branch(
            Update::filter_message()
                .filter(|msg: Message| {
                    if let Some(text) = msg.text() {
                        text.starts_with('/')
                    } else {
                        false
                    }
                })
                .endpoint(move |bot: Bot, msg: Message| {
                    let chart_bot = chart_bot_commands.clone();
                    async move { handle_commands(bot, msg, chart_bot).await }
                }),
        )
        .branch(
            Update::filter_message().endpoint(move |bot: Bot, msg: Message| {
                let chart_bot = chart_bot_messages.clone();
                async move { handlers::handle_message(bot, msg, chart_bot, max_image_bytes).await }
            }),
        );

    Dispatcher::builder(bot, handler)
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;

    Ok(())
}

async fn handle_commands(bot: Bot, msg: Message, chart_bot: Arc<ChartBot>) -> ResponseResult<()> {
    let text = msg.text().unwrap_or_default();
    let command = command_name(text);

    match command {
        "/start" => handlers::handle_start(bot, msg, chart_bot).await?,
        "/help" => handlers::handle_help(bot, msg, chart_bot).await?,
        _ => {
            // unknown command, ignore
        }
    }

    Ok(())
}

/// `/start@my_bot args` -> `/start`
fn command_name(text: &str) -> &str {
    let first = text.split_whitespace().next().unwrap_or("");
    first.split('@').next().unwrap_or(first)
}
