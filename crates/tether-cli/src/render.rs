//! Terminal output for command results.

use serde_json::Value;
use tether_types::util::preview;
use tether_types::{HttpResponse, TransportError};
use url::Url;

/// Paths tried by `tether probe`, relative to the server root.
pub const PROBE_PATHS: &[&str] = &["/", "/sse", "/messages/", "/request", "/tools", "/v1", "/api"];

/// `- name: description` lines for a tool listing, if the response has one.
///
/// Looks under `result.tools`, then `tools`.
pub fn tool_lines(response: &Value) -> Option<Vec<String>> {
    let tools = response
        .pointer("/result/tools")
        .or_else(|| response.get("tools"))?
        .as_array()?;

    Some(
        tools
            .iter()
            .map(|tool| {
                let name = tool.get("name").and_then(Value::as_str).unwrap_or("<unnamed>");
                match tool.get("description").and_then(Value::as_str) {
                    Some(description) => format!("- {name}: {}", first_line(description)),
                    None => format!("- {name}"),
                }
            })
            .collect(),
    )
}

fn first_line(text: &str) -> &str {
    text.lines().next().unwrap_or_default().trim()
}

/// The base URL followed by each probe path on the same host.
pub fn probe_targets(base: &Url) -> Vec<Url> {
    let mut targets = vec![base.clone()];
    for path in PROBE_PATHS {
        if let Ok(url) = base.join(path) {
            if !targets.contains(&url) {
                targets.push(url);
            }
        }
    }
    targets
}

/// Body bytes shown after a successful probe.
const PROBE_PREVIEW_BYTES: usize = 100;

/// One line of probe output. Successful responses get a body preview.
pub fn probe_line(url: &Url, result: &Result<HttpResponse, TransportError>) -> String {
    match result {
        Ok(response) if response.is_success() && !response.body.is_empty() => {
            let body = preview(&response.body, PROBE_PREVIEW_BYTES);
            let body = body.split_whitespace().collect::<Vec<_>>().join(" ");
            format!("{:>5}  {url}  {body}", response.status)
        }
        Ok(response) => format!("{:>5}  {url}", response.status),
        Err(TransportError::Timeout { timeout_ms }) => {
            format!(" wait  {url} (no complete response in {timeout_ms}ms, may be a stream)")
        }
        Err(e) => format!("  ERR  {url} ({e})"),
    }
}
