use url::Url;

use crate::error::Result;

pub fn normalize_url(input: &str) -> String {
    let trimmed = input.trim();
    if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        trimmed.trim_end_matches('/').to_string()
    } else {
        format!("https://{}", trimmed.trim_end_matches('/'))
    }
}

/// Socket.IO websocket endpoint for an API base URL or an explicit socket host.
pub fn socket_url(base: &str) -> Result<Url> {
    let mut url = Url::parse(&normalize_url(base))?;
    let scheme = if url.scheme() == "http" { "ws" } else { "wss" };
    // http(s) -> ws(s) is always accepted by the url crate for special schemes
    let _ = url.set_scheme(scheme);
    if !url.path().contains("/socket.io") {
        url.set_path("/socket.io/");
    }
    url.query_pairs_mut()
        .clear()
        .append_pair("EIO", "4")
        .append_pair("transport", "websocket");
    Ok(url)
}

/// Prices come back as numbers or as display strings ("25.00", "R$ 25,00").
pub fn parse_price(raw: &str) -> Option<f64> {
    let cleaned = raw.trim().trim_start_matches("R$").trim();
    if cleaned.is_empty() {
        return None;
    }
    let normalized = if cleaned.contains(',') {
        cleaned.replace('.', "").replace(',', ".")
    } else {
        cleaned.to_string()
    };
    normalized.parse::<f64>().ok().filter(|p| p.is_finite())
}
