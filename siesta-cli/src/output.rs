use siesta_engine::{Content, Entity, RequestError, ResponseInfo};

use crate::utils::format_bytes;

/// Renders the outcome of one load for the terminal.
pub fn render(url: &str, info: &ResponseInfo) -> String {
    match &info.response {
        Ok(entity) if !info.is_new => format!("{url}: not modified\n{}", render_entity(entity)),
        Ok(entity) => render_entity(entity),
        Err(error) => render_error(url, error),
    }
}

fn render_entity(entity: &Entity) -> String {
    match entity.content() {
        Content::Text(text) => text.clone(),
        Content::Json(value) => {
            serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
        }
        Content::Bytes(bytes) => format!(
            "<{} of {}>",
            format_bytes(bytes.len() as u64),
            entity.content_type()
        ),
        Content::Custom(custom) => format!("<{}>", custom.type_name()),
    }
}

fn render_error(url: &str, error: &RequestError) -> String {
    match error.http_status_code() {
        Some(status) => format!("{url}: {} (HTTP {status})", error.user_message()),
        None => format!("{url}: {}", error.user_message()),
    }
}
