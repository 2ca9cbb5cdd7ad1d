use std::time::Duration;

use reqwest::blocking::Client as HttpClient;
use reqwest::{Method, StatusCode, header};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{info, warn};

use crate::config::{COOKIE_NAME, Config};
use crate::error::{CliError, Result};

/// Every REST endpoint lives under this prefix.
pub const URL_PREFIX: &str = "/api/v2";

/// Query parameters for a request.
pub type Params<'a> = &'a [(&'a str, String)];

/// Typed HTTPS client for the grading server.
///
/// All four operations are fatal on anything but success; the one exception
/// is [`Client::get_optional`], which maps a 404 to `None` so callers can
/// distinguish "no such record" from a broken connection.
pub struct Client {
    http: HttpClient,
    host: String,
    cookie_header: String,
    report_api: bool,
}

impl Client {
    pub fn new(config: &Config, report_api: bool) -> Result<Self> {
        let http = HttpClient::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|err| CliError::Transport(format!("error building HTTP client: {err}")))?;
        Ok(Self {
            http,
            host: config.host.clone(),
            cookie_header: format!("{COOKIE_NAME}={}", config.cookie),
            report_api,
        })
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn get<T: DeserializeOwned>(&self, path: &str, params: Params) -> Result<T> {
        self.expect_body(self.send(Method::GET, path, params, None, false), path)
    }

    /// GET where a 404 is an answer, not an error.
    pub fn get_optional<T: DeserializeOwned>(&self, path: &str, params: Params) -> Result<Option<T>> {
        self.send(Method::GET, path, params, None, true)
    }

    pub fn post<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        params: Params,
        body: &B,
    ) -> Result<T> {
        let body = encode_body(body)?;
        self.expect_body(self.send(Method::POST, path, params, Some(body), false), path)
    }

    pub fn put<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        params: Params,
        body: &B,
    ) -> Result<T> {
        let body = encode_body(body)?;
        self.expect_body(self.send(Method::PUT, path, params, Some(body), false), path)
    }

    fn expect_body<T>(&self, sent: Result<Option<T>>, path: &str) -> Result<T> {
        sent?.ok_or_else(|| CliError::Protocol(format!("missing response body from {path}")))
    }

    fn send<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        params: Params,
        body: Option<String>,
        not_found_okay: bool,
    ) -> Result<Option<T>> {
        let url = format!("https://{}{}{}", self.host, URL_PREFIX, path);
        let mut request = self
            .http
            .request(method.clone(), &url)
            .header(header::ACCEPT, "application/json")
            .header(header::COOKIE, &self.cookie_header);
        if !params.is_empty() {
            request = request.query(params);
        }
        if let Some(body) = body {
            request = request
                .header(header::CONTENT_TYPE, "application/json")
                .body(body);
        }

        if self.report_api {
            info!("{method} {url}");
        }

        let response = request.send().map_err(|err| {
            CliError::Transport(format!("error connecting to {}: {err}", self.host))
        })?;
        let status = response.status();
        if not_found_okay && status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if status != StatusCode::OK {
            warn!("unexpected status {status} from {url}");
            // let the user read whatever the server had to say
            match response.text() {
                Ok(text) if !text.is_empty() => eprintln!("{text}"),
                _ => {}
            }
            return Err(CliError::Protocol(format!(
                "unexpected status {status} from {url}"
            )));
        }

        let parsed = response.json::<T>().map_err(|err| {
            CliError::Protocol(format!("failed to parse result object from server: {err}"))
        })?;
        Ok(Some(parsed))
    }
}

fn encode_body<B: Serialize>(body: &B) -> Result<String> {
    serde_json::to_string_pretty(body)
        .map_err(|err| CliError::Protocol(format!("error encoding request body: {err}")))
}
