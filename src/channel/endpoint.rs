//! Resolving the channel URL from server settings.

use crate::config::ServerConfig;
use crate::error::{LiveError, Result};
use url::Url;

/// Build the WebSocket URL: `ws://<host><path>`, or `wss://` when secure.
///
/// An explicit `url` in the config takes precedence.
///
/// # Errors
///
/// Returns [`LiveError::Config`] if the result is not a valid `ws`/`wss` URL.
pub fn endpoint_url(server: &ServerConfig) -> Result<Url> {
    let raw = match &server.url {
        Some(url) => url.clone(),
        None => {
            let scheme = if server.secure { "wss" } else { "ws" };
            let path = if server.path.starts_with('/') {
                server.path.clone()
            } else {
                format!("/{}", server.path)
            };
            format!("{scheme}://{}{path}", server.host)
        }
    };

    let url = Url::parse(&raw).map_err(|e| LiveError::Config(format!("invalid server url '{raw}': {e}")))?;
    match url.scheme() {
        "ws" | "wss" => Ok(url),
        other => Err(LiveError::Config(format!(
            "server url must use ws or wss, got '{other}'"
        ))),
    }
}
