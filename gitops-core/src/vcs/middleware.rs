use std::time::Instant;

use reqwest::{Client, Request, Response};
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware, Middleware, Next, Result as MiddlewareResult};
use tracing::{debug, warn};

/// Logs every outbound provider call with its status and latency.
///
/// Query strings are dropped from the logged URL since GitLab tree and file
/// endpoints carry refs there and nothing else of interest.
#[derive(Debug, Clone, Default)]
pub struct RequestLogMiddleware;

#[async_trait::async_trait]
impl Middleware for RequestLogMiddleware {
    async fn handle(
        &self,
        req: Request,
        extensions: &mut http::Extensions,
        next: Next<'_>,
    ) -> MiddlewareResult<Response> {
        let method = req.method().clone();
        let mut url = req.url().clone();
        url.set_query(None);
        let started = Instant::now();

        let response = next.run(req, extensions).await;
        let elapsed_ms = started.elapsed().as_millis();

        match &response {
            Ok(resp) if resp.status().is_success() => {
                debug!("{} {} -> {} ({} ms)", method, url, resp.status(), elapsed_ms);
            }
            Ok(resp) => {
                warn!("{} {} -> {} ({} ms)", method, url, resp.status(), elapsed_ms);
            }
            Err(err) => {
                warn!("{} {} failed after {} ms: {}", method, url, elapsed_ms, err);
            }
        }

        response
    }
}

pub fn create_http_client() -> reqwest::Result<ClientWithMiddleware> {
    let client = Client::builder()
        .user_agent(concat!("gitops-server/", env!("CARGO_PKG_VERSION")))
        .build()?;

    Ok(ClientBuilder::new(client).with(RequestLogMiddleware).build())
}
