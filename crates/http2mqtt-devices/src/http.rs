use std::time::Duration;

use http2mqtt::error::{Error, ErrorKind, Result};

use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, RequestBuilder};

use serde::de::DeserializeOwned;

// Maximum duration of a request to a device.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Credentials for `HTTP` basic authentication.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    /// User name.
    pub username: String,
    /// Password.
    pub password: String,
}

impl Credentials {
    /// Creates [`Credentials`] only when both values are present.
    #[must_use]
    pub fn new(username: Option<&str>, password: Option<&str>) -> Option<Self> {
        match (username, password) {
            (Some(username), Some(password)) if !username.is_empty() && !password.is_empty() => {
                Some(Self {
                    username: username.into(),
                    password: password.into(),
                })
            }
            _ => None,
        }
    }
}

fn request_error(url: &str, e: &reqwest::Error) -> Error {
    Error::new(ErrorKind::Device, format!("Request to `{url}` failed: {e}"))
}

pub(crate) fn device_url(host: &str, path: &str) -> String {
    format!("http://{host}{path}")
}

#[derive(Debug, Clone)]
pub(crate) struct HttpClient {
    client: Client,
}

impl HttpClient {
    pub(crate) fn new() -> Result<Self> {
        Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map(|client| Self { client })
            .map_err(|e| {
                Error::new(
                    ErrorKind::Device,
                    format!("Unable to build the HTTP client: {e}"),
                )
            })
    }

    fn authenticate(request: RequestBuilder, credentials: Option<&Credentials>) -> RequestBuilder {
        match credentials {
            Some(Credentials { username, password }) => {
                request.basic_auth(username, Some(password))
            }
            None => request,
        }
    }

    async fn send(url: &str, request: RequestBuilder) -> Result<reqwest::Response> {
        request
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| request_error(url, &e))
    }

    pub(crate) async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        credentials: Option<&Credentials>,
    ) -> Result<T> {
        let request = Self::authenticate(self.client.get(url), credentials);
        Self::send(url, request)
            .await?
            .json::<T>()
            .await
            .map_err(|e| {
                Error::new(
                    ErrorKind::InvalidPayload,
                    format!("Invalid response from `{url}`: {e}"),
                )
            })
    }

    pub(crate) async fn get(&self, url: &str, credentials: Option<&Credentials>) -> Result<()> {
        let request = Self::authenticate(self.client.get(url), credentials);
        Self::send(url, request).await.map(|_| ())
    }

    pub(crate) async fn post_form(
        &self,
        url: &str,
        body: String,
        credentials: Option<&Credentials>,
    ) -> Result<()> {
        let request = self
            .client
            .post(url)
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(body);
        let request = Self::authenticate(request, credentials);
        Self::send(url, request).await.map(|_| ())
    }

    pub(crate) async fn post_text(
        &self,
        url: &str,
        body: String,
        credentials: Option<&Credentials>,
    ) -> Result<String> {
        let request = self
            .client
            .post(url)
            .header(CONTENT_TYPE, "text/xml")
            .body(body);
        let request = Self::authenticate(request, credentials);
        Self::send(url, request)
            .await?
            .text()
            .await
            .map_err(|e| request_error(url, &e))
    }
}
