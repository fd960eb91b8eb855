//! Telegram bot that finds charts on web pages (or takes them as attachments)
//! and explains them with a vision-capable model API.

pub mod api_client;
pub mod bot;
pub mod config;
pub mod error;
pub mod fetcher;
pub mod handlers;
pub mod loader;
pub mod locator;
pub mod models;
pub mod parser;
pub mod pipeline;
pub mod session;
pub mod utils;

#[cfg(test)]
pub(crate) mod testing;
