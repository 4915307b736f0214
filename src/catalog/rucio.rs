//! Rucio REST client.
//!
//! Speaks just enough of the Rucio HTTP API to list dataset content and
//! replica states: token authentication, `GET /dids/{scope}/{name}/dids`
//! and `POST /replicas/list`. Both listing endpoints stream
//! newline-delimited JSON.

use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde_json::json;
use tracing::debug;
use ureq::http::Response;
use ureq::tls::{Certificate, ClientCert, PemItem, RootCerts, TlsConfig};
use ureq::{Agent, Body, RequestBuilder};

use crate::config::{AuthMethod, ClientConfig};
use crate::error::OndiskError;

use super::{Block, CatalogClient, FileReplica};

const TOKEN_HEADER: &str = "X-Rucio-Auth-Token";
const JSON_STREAM: &str = "application/x-json-stream";
const APP_ID: &str = "ondisk";

/// An authenticated Rucio session.
///
/// The session lives as long as the value; dropping it releases the
/// connection pool. The token is never written anywhere.
pub struct RucioClient {
    agent: Agent,
    rucio_host: String,
    account: String,
    vo: Option<String>,
    token: String,
}

impl RucioClient {
    /// Authenticate against the auth host and open a session.
    pub fn connect(config: &ClientConfig) -> Result<Self, OndiskError> {
        let agent = build_agent(config)?;
        let token = authenticate(&agent, config)?;
        debug!(account = %config.account, host = %config.rucio_host, "catalog session established");

        Ok(Self {
            agent,
            rucio_host: config.rucio_host.clone(),
            account: config.account.clone(),
            vo: config.vo.clone(),
            token,
        })
    }

    fn with_session<B>(&self, request: RequestBuilder<B>) -> RequestBuilder<B> {
        let request = request
            .header(TOKEN_HEADER, &self.token)
            .header("X-Rucio-Account", &self.account)
            .header("X-Rucio-AppID", APP_ID)
            .header("Accept", JSON_STREAM);
        match &self.vo {
            Some(vo) => request.header("X-Rucio-VO", vo),
            None => request,
        }
    }

    fn endpoint(&self, segments: &[&str]) -> Result<String, OndiskError> {
        endpoint_url(&self.rucio_host, segments)
    }
}

impl CatalogClient for RucioClient {
    fn list_blocks(&self, scope: &str, dataset: &str) -> Result<Vec<Block>, OndiskError> {
        let url = self.endpoint(&["dids", scope, dataset, "dids"])?;
        debug!(%url, "listing dataset content");

        let response = self
            .with_session(self.agent.get(&url))
            .call()
            .map_err(|source| request_error(&url, source))?;
        let mut response = check_status(&url, response)?;
        parse_json_stream(BufReader::new(response.body_mut().as_reader()), &url)
    }

    fn list_replicas(
        &self,
        scope: &str,
        blocks: &[Block],
    ) -> Result<Vec<FileReplica>, OndiskError> {
        let url = self.endpoint(&["replicas", "list"])?;
        let dids: Vec<_> = blocks
            .iter()
            .map(|block| json!({ "scope": scope, "name": block.name }))
            .collect();
        let body = json!({ "dids": dids, "all_states": false });

        let response = self
            .with_session(self.agent.post(&url))
            .send_json(&body)
            .map_err(|source| request_error(&url, source))?;
        let mut response = check_status(&url, response)?;
        parse_json_stream(BufReader::new(response.body_mut().as_reader()), &url)
    }
}

/// Parse a newline-delimited JSON stream, skipping blank lines.
pub fn parse_json_stream<T, R>(reader: R, url: &str) -> Result<Vec<T>, OndiskError>
where
    T: DeserializeOwned,
    R: BufRead,
{
    let mut records = Vec::new();
    for (index, line) in reader.lines().enumerate() {
        let line = line.map_err(|source| OndiskError::CatalogRequest {
            url: url.to_string(),
            message: format!("reading response body: {source}"),
        })?;
        if line.trim().is_empty() {
            continue;
        }
        let record = serde_json::from_str(&line).map_err(|source| OndiskError::CatalogResponse {
            url: url.to_string(),
            message: format!("record {}: {}", index + 1, source),
        })?;
        records.push(record);
    }
    Ok(records)
}

/// Join `segments` onto `host`, percent-encoding each one.
fn endpoint_url(host: &str, segments: &[&str]) -> Result<String, OndiskError> {
    let invalid = |message: String| OndiskError::CatalogRequest {
        url: host.to_string(),
        message,
    };

    let mut url = url::Url::parse(host).map_err(|source| invalid(format!("invalid URL: {source}")))?;
    url.path_segments_mut()
        .map_err(|()| invalid("URL cannot be a base".to_string()))?
        .pop_if_empty()
        .extend(segments);
    Ok(url.to_string())
}

fn authenticate(agent: &Agent, config: &ClientConfig) -> Result<String, OndiskError> {
    let path = match &config.auth {
        AuthMethod::UserPass { .. } => "userpass",
        AuthMethod::X509 { .. } => "x509",
        AuthMethod::X509Proxy { .. } => "x509_proxy",
    };
    let url = endpoint_url(&config.auth_host, &["auth", path])?;

    let mut request = agent
        .get(&url)
        .header("X-Rucio-Account", &config.account)
        .header("X-Rucio-AppID", APP_ID);
    if let Some(vo) = &config.vo {
        request = request.header("X-Rucio-VO", vo);
    }
    if let AuthMethod::UserPass { username, password } = &config.auth {
        request = request
            .header("X-Rucio-Username", username)
            .header("X-Rucio-Password", password);
    }

    let response = request.call().map_err(|source| OndiskError::CatalogAuth {
        message: format!("request to {url} failed: {source}"),
    })?;

    let response = check_status(&url, response).map_err(|err| match err {
        OndiskError::CatalogStatus {
            status, message, ..
        } => OndiskError::CatalogAuth {
            message: format!("account '{}' rejected (HTTP {status}): {message}", config.account),
        },
        other => other,
    })?;

    response
        .headers()
        .get(TOKEN_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
        .ok_or_else(|| OndiskError::CatalogAuth {
            message: format!("{url} did not return an {TOKEN_HEADER} header"),
        })
}

fn check_status(url: &str, mut response: Response<Body>) -> Result<Response<Body>, OndiskError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let header = |name: &str| {
        response
            .headers()
            .get(name)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string)
    };
    let class = header("ExceptionClass");
    let detail = header("ExceptionMessage");

    let message = match (class, detail) {
        (Some(class), Some(detail)) => format!("{class}: {detail}"),
        (None, Some(detail)) => detail,
        (class, None) => {
            let body = response.body_mut().read_to_string().unwrap_or_default();
            match class {
                Some(class) if body.trim().is_empty() => class,
                _ => body.trim().to_string(),
            }
        }
    };

    Err(OndiskError::CatalogStatus {
        url: url.to_string(),
        status: status.as_u16(),
        message,
    })
}

fn request_error(url: &str, source: ureq::Error) -> OndiskError {
    OndiskError::CatalogRequest {
        url: url.to_string(),
        message: source.to_string(),
    }
}

fn build_agent(config: &ClientConfig) -> Result<Agent, OndiskError> {
    let mut tls = TlsConfig::builder();

    if let Some(ca) = &config.ca_cert {
        let roots = load_ca_certs(ca)?;
        tls = tls.root_certs(RootCerts::new_with_certs(&roots));
    }

    match &config.auth {
        AuthMethod::X509 { cert, key } => {
            tls = tls.client_cert(Some(load_identity(&[cert, key])?));
        }
        AuthMethod::X509Proxy { path } => {
            tls = tls.client_cert(Some(load_identity(&[path])?));
        }
        AuthMethod::UserPass { .. } => {}
    }

    let agent_config = Agent::config_builder()
        .timeout_global(Some(config.timeout))
        .http_status_as_error(false)
        .tls_config(tls.build())
        .build();
    Ok(agent_config.into())
}

/// Load CA certificates from a PEM bundle or a directory of `.pem` files.
fn load_ca_certs(path: &Path) -> Result<Vec<Certificate<'static>>, OndiskError> {
    let files: Vec<PathBuf> = if path.is_dir() {
        let mut files = Vec::new();
        for entry in std::fs::read_dir(path).map_err(|source| tls_error(path, source))? {
            let entry_path = entry.map_err(|source| tls_error(path, source))?.path();
            if entry_path.extension().and_then(|ext| ext.to_str()) == Some("pem") {
                files.push(entry_path);
            }
        }
        files.sort();
        files
    } else {
        vec![path.to_path_buf()]
    };

    let mut certs = Vec::new();
    for file in &files {
        let pem = std::fs::read(file).map_err(|source| tls_error(file, source))?;
        for item in ureq::tls::parse_pem(&pem) {
            if let PemItem::Certificate(cert) = item.map_err(|source| tls_error(file, source))? {
                certs.push(cert.to_owned());
            }
        }
    }

    if certs.is_empty() {
        return Err(OndiskError::Environment {
            message: format!("no CA certificates found in {}", path.display()),
        });
    }
    Ok(certs)
}

/// Load a client certificate chain and its private key from PEM files.
fn load_identity(paths: &[&PathBuf]) -> Result<ClientCert, OndiskError> {
    let mut chain = Vec::new();
    let mut key = None;

    for path in paths {
        let pem = std::fs::read(path).map_err(|source| tls_error(path, source))?;
        for item in ureq::tls::parse_pem(&pem) {
            match item.map_err(|source| tls_error(path, source))? {
                PemItem::Certificate(cert) => chain.push(cert.to_owned()),
                PemItem::PrivateKey(found) if key.is_none() => key = Some(found.to_owned()),
                _ => {}
            }
        }
    }

    let origin = paths
        .iter()
        .map(|path| path.display().to_string())
        .collect::<Vec<_>>()
        .join(", ");
    let key = key.ok_or_else(|| OndiskError::Environment {
        message: format!("no private key found in {origin}"),
    })?;
    if chain.is_empty() {
        return Err(OndiskError::Environment {
            message: format!("no certificate found in {origin}"),
        });
    }

    Ok(ClientCert::new_with_certs(&chain, key))
}

fn tls_error(path: &Path, source: impl std::fmt::Display) -> OndiskError {
    OndiskError::Environment {
        message: format!("cannot load TLS material from {}: {}", path.display(), source),
    }
}
