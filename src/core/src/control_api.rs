use std::time::Duration;

use async_trait::async_trait;
use hui_schema::{ListenAddr, OnlineUsers, TrafficSnapshot};
use reqwest::header::AUTHORIZATION;
use serde::de::DeserializeOwned;

use crate::error::ControlError;

/// Base URL of one node's traffic stats API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiEndpoint {
    pub base_url: String,
    pub secret: String,
}

impl ApiEndpoint {
    /// Endpoint for a `trafficStats.listen` value such as `:7653`.
    pub fn from_listen(listen: &str, secret: impl Into<String>) -> Result<Self, ControlError> {
        let addr = ListenAddr::parse(listen)?;
        Ok(Self {
            base_url: format!("http://{}:{}", addr.dial_host(), addr.port),
            secret: secret.into(),
        })
    }
}

/// Client for the Hysteria2 traffic stats API.
#[async_trait]
pub trait ControlApi: Send + Sync + 'static {
    /// Online device count per username.
    async fn online(&self, endpoint: &ApiEndpoint) -> Result<OnlineUsers, ControlError>;

    /// Disconnect every device of the given usernames.
    async fn kick(&self, endpoint: &ApiEndpoint, usernames: &[String]) -> Result<(), ControlError>;

    /// Per-user byte counters; `clear` resets them server-side.
    async fn traffic(&self, endpoint: &ApiEndpoint, clear: bool)
        -> Result<TrafficSnapshot, ControlError>;
}

pub struct HttpControlApi {
    client: reqwest::Client,
}

impl HttpControlApi {
    pub fn new(timeout: Duration) -> Result<Self, ControlError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| ControlError::Sys(format!("build control api client: {err}")))?;
        Ok(Self { client })
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        endpoint: &ApiEndpoint,
        path: &str,
    ) -> Result<T, ControlError> {
        let response = self
            .client
            .get(format!("{}{path}", endpoint.base_url))
            .header(AUTHORIZATION, &endpoint.secret)
            .send()
            .await
            .map_err(|err| request_error(path, err))?;
        let status = response.status();
        if !status.is_success() {
            return Err(status_error(path, status));
        }
        response
            .json()
            .await
            .map_err(|err| ControlError::Sys(format!("decode {path}: {err}")))
    }
}

#[async_trait]
impl ControlApi for HttpControlApi {
    async fn online(&self, endpoint: &ApiEndpoint) -> Result<OnlineUsers, ControlError> {
        self.get_json(endpoint, "/online").await
    }

    async fn kick(&self, endpoint: &ApiEndpoint, usernames: &[String]) -> Result<(), ControlError> {
        let response = self
            .client
            .post(format!("{}/kick", endpoint.base_url))
            .header(AUTHORIZATION, &endpoint.secret)
            .json(usernames)
            .send()
            .await
            .map_err(|err| request_error("/kick", err))?;
        let status = response.status();
        if !status.is_success() {
            return Err(status_error("/kick", status));
        }
        Ok(())
    }

    async fn traffic(
        &self,
        endpoint: &ApiEndpoint,
        clear: bool,
    ) -> Result<TrafficSnapshot, ControlError> {
        let path = if clear { "/traffic?clear=1" } else { "/traffic" };
        self.get_json(endpoint, path).await
    }
}

fn request_error(path: &str, err: reqwest::Error) -> ControlError {
    if err.is_timeout() || err.is_connect() {
        return ControlError::Unreachable(format!("{path}: {err}"));
    }
    ControlError::Sys(format!("request {path}: {err}"))
}

fn status_error(path: &str, status: reqwest::StatusCode) -> ControlError {
    if status == reqwest::StatusCode::UNAUTHORIZED {
        return ControlError::Sys(format!("{path} rejected the traffic stats secret"));
    }
    ControlError::Sys(format!("{path} returned status {status}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_dials_loopback_for_wildcard_listen() {
        let ep = ApiEndpoint::from_listen(":7653", "s").unwrap();
        assert_eq!(ep.base_url, "http://127.0.0.1:7653");
        let ep = ApiEndpoint::from_listen("10.1.1.1:7654", "s").unwrap();
        assert_eq!(ep.base_url, "http://10.1.1.1:7654");
        assert!(ApiEndpoint::from_listen("7653", "s").is_err());
    }

    #[tokio::test]
    async fn refused_connection_is_unreachable() {
        let api = HttpControlApi::new(Duration::from_secs(1)).unwrap();
        let ep = ApiEndpoint::from_listen("127.0.0.1:9", "s").unwrap();
        let err = api.online(&ep).await.unwrap_err();
        assert!(matches!(err, ControlError::Unreachable(_)));
    }
}
