//! HTTP client that attaches a valid bearer token to every request
//!
//! A `401` from the server triggers exactly one forced refresh and one
//! retry. A second `401` is returned to the caller as-is.

use std::sync::Arc;
use std::time::Duration;

use oidc_auth::TokenSet;
use reqwest::header::{AUTHORIZATION, HeaderValue};
use reqwest::{Method, Request, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};

use crate::coordinator::RefreshCoordinator;
use crate::error::{Error, Result};

pub struct AuthorizingHttpClient {
    client: reqwest::Client,
    coordinator: Arc<RefreshCoordinator>,
    margin: Duration,
}

impl AuthorizingHttpClient {
    /// `margin` is passed to `ensure_valid` before every request.
    pub fn new(
        client: reqwest::Client,
        coordinator: Arc<RefreshCoordinator>,
        margin: Duration,
    ) -> Self {
        Self {
            client,
            coordinator,
            margin,
        }
    }

    /// Start building a request with the underlying client.
    pub fn request(&self, method: Method, url: &str) -> RequestBuilder {
        self.client.request(method, url)
    }

    /// Attach a bearer token valid for at least the configured margin.
    ///
    /// Any `Authorization` header already on the request is replaced.
    pub async fn authorize(&self, request: Request) -> Result<Request> {
        let token_set = self.coordinator.ensure_valid(self.margin).await?;
        with_bearer(request, &token_set)
    }

    /// Authorize and send `request`, retrying once after a forced refresh on `401`.
    pub async fn send(&self, request: Request) -> Result<Response> {
        let token_set = self.coordinator.ensure_valid(self.margin).await?;
        let replay = request.try_clone();

        let response = self.execute(with_bearer(request, &token_set)?).await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        let Some(replay) = replay else {
            warn!(url = %response.url(), "unauthorized, request body cannot be replayed");
            return Ok(response);
        };

        info!(url = %response.url(), "unauthorized, refreshing token and retrying once");
        let refreshed = self.coordinator.force_refresh(&token_set).await?;
        self.execute(with_bearer(replay, &refreshed)?).await
    }

    /// `GET url` through `send` and decode the JSON body.
    pub async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T> {
        let request = self
            .client
            .get(url)
            .build()
            .map_err(|e| Error::Http(format!("building request for {url}: {e}")))?;
        let response = self.send(request).await?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::Http(format!("{url} returned {status}")));
        }
        response
            .json::<T>()
            .await
            .map_err(|e| Error::Http(format!("invalid JSON from {url}: {e}")))
    }

    async fn execute(&self, request: Request) -> Result<Response> {
        let url = request.url().clone();
        let response = self
            .client
            .execute(request)
            .await
            .map_err(|e| Error::Http(format!("request to {url} failed: {e}")))?;
        debug!(%url, status = response.status().as_u16(), "authorized request completed");
        Ok(response)
    }
}

fn with_bearer(mut request: Request, token_set: &TokenSet) -> Result<Request> {
    let mut value = HeaderValue::from_str(&format!("Bearer {}", token_set.access_token()))
        .map_err(|_| Error::Http("access token is not a valid header value".into()))?;
    value.set_sensitive(true);
    request.headers_mut().insert(AUTHORIZATION, value);
    Ok(request)
}
