use std::collections::BTreeSet;

use futures_util::future::join_all;
use tracing::debug;

use crate::http::{DynHttpTransport, HttpRequest};

/// Resolves grounding redirect links to their destination URLs.
///
/// Gemini grounding chunks reference redirect endpoints; a HEAD request
/// follows the redirect chain to the real source. Resolution is parallel
/// across chunks, and any failure falls back to the original URL so the
/// citation is never lost.
pub(crate) async fn resolve_grounding_urls(
    transport: &DynHttpTransport,
    urls: Vec<String>,
) -> Vec<String> {
    let lookups = urls.into_iter().map(|url| {
        let transport = transport.clone();
        async move {
            match transport.send(HttpRequest::head(url.clone())).await {
                Ok(response) => response.final_url.unwrap_or(url),
                Err(err) => {
                    debug!(error = %err, "grounding redirect resolution failed");
                    url
                }
            }
        }
    });

    // Sorted and deduplicated for stable rendering.
    let resolved: BTreeSet<String> = join_all(lookups).await.into_iter().collect();
    resolved.into_iter().collect()
}

/// Renders resolved URLs as bulleted markdown.
pub(crate) fn render_sources(urls: &[String]) -> String {
    let mut text = String::from("Sources:\n");
    for url in urls {
        text.push_str(&format!("- {url}\n"));
    }
    text
}
