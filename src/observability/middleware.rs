// ============================================================================
// METRICS MIDDLEWARE
// ============================================================================

use axum::{extract::Request, middleware::Next, response::Response};
use std::time::Instant;

use crate::observability::record_http_request;

/// Records count, duration and size for every HTTP request.
pub async fn metrics_middleware(req: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = req.method().to_string();
    let normalized_path = normalize_path(req.uri().path());

    let response = next.run(req).await;

    let duration = start.elapsed().as_secs_f64();
    let status = response.status().as_u16();
    let response_size = estimate_response_size(&response);

    record_http_request(&method, &normalized_path, status, duration, response_size);

    response
}

/// Collapse node pubkeys and ids so label cardinality stays bounded.
fn normalize_path(path: &str) -> String {
    path.split('/')
        .map(|seg| {
            if seg.len() == 66 && seg.chars().all(|c| c.is_ascii_hexdigit()) {
                ":pubkey"
            } else if seg.len() == 36 && seg.contains('-') {
                ":id"
            } else if !seg.is_empty() && seg.parse::<i64>().is_ok() {
                ":id"
            } else {
                seg
            }
        })
        .collect::<Vec<_>>()
        .join("/")
}

fn estimate_response_size(response: &Response) -> usize {
    response
        .headers()
        .get(axum::http::header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pubkeys_are_collapsed() {
        let pubkey = "02".to_string() + &"ab".repeat(32);
        assert_eq!(
            normalize_path(&format!("/api/network/nodes/{}/peers-of-peers", pubkey)),
            "/api/network/nodes/:pubkey/peers-of-peers"
        );
        assert_eq!(normalize_path("/api/network/nodes/top"), "/api/network/nodes/top");
        assert_eq!(normalize_path("/api/items/42"), "/api/items/:id");
    }
}
