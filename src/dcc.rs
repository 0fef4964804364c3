use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use directories::BaseDirs;
use reqwest::StatusCode;
use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::header::{ACCEPT, HeaderMap, HeaderValue, USER_AGENT};
use serde_json::Value;
use tracing::debug;

use crate::error::KiraError;

pub const DEFAULT_HOST: &str = "https://www.encodeproject.org";

/// Metadata source and raw file transport for a DCC-style archive.
pub trait DccClient: Send + Sync {
    /// GET `<host><path>` with the given query and decode the JSON body.
    fn get_json(&self, path: &str, query: &[(String, String)]) -> Result<Value, KiraError>;
    /// Stream `url` (absolute, or host-relative when it starts with `/`) into
    /// `destination`.
    fn download(&self, url: &str, destination: &Path) -> Result<(), KiraError>;
    fn host(&self) -> &str;

    fn file_url(&self, href: &str) -> String {
        if href.starts_with("http://") || href.starts_with("https://") {
            href.to_string()
        } else {
            format!("{}{}", self.host().trim_end_matches('/'), href)
        }
    }
}

pub fn experiment_path(accession: &str) -> String {
    format!("/experiments/{accession}/")
}

pub fn biosample_path(accession: &str) -> String {
    format!("/biosamples/{accession}/")
}

/// Objects can be addressed by any of their aliases, e.g. `lab:sample-1`.
pub fn alias_path(alias: &str) -> String {
    format!("/{}/", alias.trim().trim_matches('/'))
}

#[derive(Debug, Clone)]
struct Credentials {
    user: String,
    secret: String,
}

#[derive(Clone)]
pub struct DccHttpClient {
    client: Client,
    host: String,
    credentials: Option<Credentials>,
}

impl DccHttpClient {
    pub fn new(host: &str) -> Result<Self, KiraError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("kira-dcc/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| KiraError::Filesystem(err.to_string()))?,
        );
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(300))
            .build()
            .map_err(|err| KiraError::DccHttp(err.to_string()))?;

        Ok(Self {
            client,
            host: host.trim_end_matches('/').to_string(),
            credentials: load_credentials(),
        })
    }

    fn send_with_retries<F>(&self, mut make_req: F) -> Result<Response, KiraError>
    where
        F: FnMut() -> RequestBuilder,
    {
        const MAX_RETRIES: usize = 3;
        const BASE_DELAY_MS: u64 = 200;
        let mut attempt = 0usize;
        loop {
            let response = make_req().send();
            match response {
                Ok(resp) => {
                    let status = resp.status().as_u16();
                    if attempt < MAX_RETRIES && is_retryable_status(status) {
                        let delay = BASE_DELAY_MS * (attempt as u64 + 1);
                        thread::sleep(Duration::from_millis(delay));
                        attempt += 1;
                        continue;
                    }
                    return Ok(resp);
                }
                Err(err) => {
                    if attempt < MAX_RETRIES && is_retryable_error(&err) {
                        let delay = BASE_DELAY_MS * (attempt as u64 + 1);
                        thread::sleep(Duration::from_millis(delay));
                        attempt += 1;
                        continue;
                    }
                    return Err(KiraError::DccHttp(err.to_string()));
                }
            }
        }
    }

    /// Anonymous first; on 403 retry once with basic auth.
    fn send_authorized<F>(&self, make_req: F) -> Result<Response, KiraError>
    where
        F: Fn() -> RequestBuilder,
    {
        let response = self.send_with_retries(&make_req)?;
        if response.status() != StatusCode::FORBIDDEN {
            return Ok(response);
        }
        let Some(creds) = &self.credentials else {
            return Err(KiraError::MissingCredentials(credentials_file()));
        };
        debug!("retrying with credentials");
        self.send_with_retries(|| make_req().basic_auth(&creds.user, Some(&creds.secret)))
    }

    fn handle_status(response: Response) -> Result<Response, KiraError> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status().as_u16();
        let message = response
            .text()
            .unwrap_or_else(|_| "DCC request failed".to_string());
        Err(KiraError::DccStatus { status, message })
    }
}

impl DccClient for DccHttpClient {
    fn get_json(&self, path: &str, query: &[(String, String)]) -> Result<Value, KiraError> {
        let url = format!("{}{}", self.host, path);
        debug!(%url, "fetching metadata");
        let response = self.send_authorized(|| {
            self.client
                .get(&url)
                .query(&[("format", "json")])
                .query(query)
        })?;
        let response = Self::handle_status(response)?;
        response
            .json()
            .map_err(|err| KiraError::MetadataParse(format!("{url}: {err}")))
    }

    fn download(&self, url: &str, destination: &Path) -> Result<(), KiraError> {
        let url = self.file_url(url);
        debug!(%url, "downloading file");
        let response = self.send_authorized(|| self.client.get(&url))?;
        let mut response = Self::handle_status(response)?;
        let mut file =
            File::create(destination).map_err(|err| KiraError::Filesystem(err.to_string()))?;
        std::io::copy(&mut response, &mut file)
            .map_err(|err| KiraError::Filesystem(err.to_string()))?;
        Ok(())
    }

    fn host(&self) -> &str {
        &self.host
    }
}

fn credentials_file() -> PathBuf {
    BaseDirs::new()
        .map(|dirs| dirs.home_dir().join(".encode.txt"))
        .unwrap_or_else(|| PathBuf::from("~/.encode.txt"))
}

fn load_credentials() -> Option<Credentials> {
    if let (Ok(user), Ok(secret)) = (
        std::env::var("ENCODE_ACCESS_KEY"),
        std::env::var("ENCODE_SECRET_KEY"),
    ) {
        if !user.trim().is_empty() && !secret.trim().is_empty() {
            return Some(Credentials {
                user: user.trim().to_string(),
                secret: secret.trim().to_string(),
            });
        }
    }
    let content = fs::read_to_string(credentials_file()).ok()?;
    parse_credentials(&content)
}

fn parse_credentials(content: &str) -> Option<Credentials> {
    let mut lines = content.lines().map(str::trim).filter(|line| !line.is_empty());
    let user = lines.next()?.to_string();
    let secret = lines.next()?.to_string();
    Some(Credentials { user, secret })
}

/// Accessions listed in a search response's `@graph`, sorted and deduplicated.
pub fn graph_accessions(doc: &Value) -> Vec<String> {
    let mut accessions = doc
        .get("@graph")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|item| item.get("accession").and_then(Value::as_str))
                .filter(|acc| !acc.is_empty())
                .map(str::to_string)
                .collect::<Vec<_>>()
        })
        .unwrap_or_default();
    accessions.sort();
    accessions.dedup();
    accessions
}

fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504)
}

fn is_retryable_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_request()
}
