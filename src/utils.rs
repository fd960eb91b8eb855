use url::Url;

use crate::pipeline::PipelineOutcome;

/// Telegram rejects messages longer than this.
pub const TELEGRAM_MESSAGE_LIMIT: usize = 4096;

/// Formats an analysis as plain text. Empty sections are left out.
pub fn format_analysis(outcome: &PipelineOutcome) -> String {
    let analysis = &outcome.analysis;
    let mut result = String::from("📊 Chart Analysis\n");

    if let Some(label) = &outcome.label {
        result.push_str(&format!("🖼 {}\n", label));
    }
    if let Some(url) = &outcome.image_url {
        result.push_str(&format!("🔗 {}\n", url));
    }

    let sections = [
        ("📈 Chart type", &analysis.chart_type),
        ("📉 Trends", &analysis.trends),
        ("🔢 Key data points", &analysis.data_points),
        ("💡 Interpretation", &analysis.interpretation),
    ];

    for (title, body) in sections {
        if body.trim().is_empty() {
            continue;
        }
        result.push('\n');
        result.push_str(title);
        result.push_str(":\n");
        result.push_str(body.trim());
        result.push('\n');
    }

    if analysis.is_empty() {
        result.push_str("\nThe analysis service returned an empty answer.\n");
    }

    result.trim_end().to_string()
}

/// Splits text into chunks of at most `limit` UTF-16 code units (how Telegram
/// measures message length), on line boundaries when possible.
pub fn split_message(text: &str, limit: usize) -> Vec<String> {
    let limit = limit.max(2);
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_len = 0;

    for line in text.lines() {
        let line_len = utf16_len(line);

        if current_len + line_len + 1 > limit && !current.is_empty() {
            chunks.push(std::mem::take(&mut current));
            current_len = 0;
        }

        if line_len > limit {
            // a single line that cannot fit anywhere is cut between characters
            let mut piece = String::new();
            let mut piece_len = 0;
            for ch in line.chars() {
                if piece_len + ch.len_utf16() > limit {
                    chunks.push(std::mem::take(&mut piece));
                    piece_len = 0;
                }
                piece.push(ch);
                piece_len += ch.len_utf16();
            }
            if !piece.is_empty() {
                chunks.push(piece);
            }
            continue;
        }

        if !current.is_empty() {
            current.push('\n');
            current_len += 1;
        }
        current.push_str(line);
        current_len += line_len;
    }

    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

fn utf16_len(text: &str) -> usize {
    text.encode_utf16().count()
}

/// First http(s) URL in a chat message, tolerating surrounding punctuation.
pub fn extract_url(text: &str) -> Option<Url> {
    text.split_whitespace()
        .map(|token| {
            token
                .trim_start_matches(['(', '<', '"', '\'', '['])
                .trim_end_matches(['.', ',', ';', ':', '!', '?', ')', '>', '"', '\'', ']'])
        })
        .filter(|token| {
            let lower = token.to_ascii_lowercase();
            lower.starts_with("http://") || lower.starts_with("https://")
        })
        .find_map(|token| Url::parse(token).ok())
        .filter(|url| url.has_host())
}

pub fn format_help() -> String {
    r#"📚 How to use this bot

Commands:
/start - Start the bot
/help - Show this help message

What you can send:
• A link to a web page: I'll find the main chart image on it and analyze it
• A chart image (as a photo or as a file): I'll analyze it directly

Tips:
• Make sure images are clear and readable
• Pages must be publicly accessible
• Supported formats: PNG, JPEG, GIF"#
        .to_string()
}

pub fn format_welcome() -> String {
    r#"👋 Welcome to the Chart & Graph Interpretation Bot!

I can help you understand charts and graphs. You can:
1. Send me a URL of a page containing a chart 🔗
2. Send me a chart image directly 📊
3. Use /help to see all available commands 💡

Let's get started!"#
        .to_string()
}
