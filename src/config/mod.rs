//! Catalog client configuration.
//!
//! The configuration is resolved once at startup into a [`ClientConfig`] and
//! handed to the client constructor. Nothing here touches the process
//! environment beyond reading it.

pub mod host;

use std::path::{Path, PathBuf};
use std::time::Duration;

use ini::Ini;
use tracing::debug;

use crate::error::OndiskError;

/// Default request timeout when the config file does not set one.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(600);

/// How the client proves its identity to the catalog.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AuthMethod {
    UserPass { username: String, password: String },
    X509 { cert: PathBuf, key: PathBuf },
    X509Proxy { path: PathBuf },
}

/// Everything needed to open a catalog session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClientConfig {
    pub rucio_host: String,
    pub auth_host: String,
    pub account: String,
    pub vo: Option<String>,
    pub auth: AuthMethod,
    /// CA bundle file or directory of PEM files.
    pub ca_cert: Option<PathBuf>,
    pub timeout: Duration,
}

/// Where to look for the catalog config file.
#[derive(Clone, Debug, Default)]
pub struct ConfigSource {
    /// Explicit config file path; wins over everything else.
    pub config_file: Option<PathBuf>,
    /// Catalog client home; the file is `<home>/etc/rucio.cfg`.
    pub rucio_home: Option<PathBuf>,
}

impl ConfigSource {
    /// Resolve the config file path, falling back to host discovery.
    pub fn resolve_path(&self) -> Result<PathBuf, OndiskError> {
        if let Some(path) = &self.config_file {
            debug!(path = %path.display(), "using explicit catalog config");
            return Ok(path.clone());
        }
        let home = match &self.rucio_home {
            Some(home) => home.clone(),
            None => host::discover_rucio_home(Path::new(host::RELEASE_FILE))?,
        };
        debug!(home = %home.display(), "using catalog client home");
        Ok(home.join("etc").join("rucio.cfg"))
    }
}

/// Load the client configuration for `account`.
pub fn load_client_config(source: &ConfigSource, account: &str) -> Result<ClientConfig, OndiskError> {
    let path = source.resolve_path()?;
    let ini = Ini::load_from_file(&path).map_err(|source| OndiskError::ConfigParse {
        path: path.clone(),
        source,
    })?;
    client_config_from_ini(&ini, &path, account)
}

/// Seconds, possibly fractional.
fn parse_timeout(value: &str) -> Option<Duration> {
    let seconds = value.parse::<f64>().ok().filter(|s| *s > 0.0)?;
    Duration::try_from_secs_f64(seconds).ok()
}

/// Build a [`ClientConfig`] from a parsed `rucio.cfg`.
///
/// `path` is only used for error messages.
pub fn client_config_from_ini(
    ini: &Ini,
    path: &Path,
    account: &str,
) -> Result<ClientConfig, OndiskError> {
    let lookup = |key: &str| -> Option<String> {
        ini.section(Some("client"))
            .and_then(|section| section.get(key))
            .map(|value| expand_env(value.trim()))
            .filter(|value| !value.is_empty())
    };
    let require = |key: &str| -> Result<String, OndiskError> {
        lookup(key).ok_or_else(|| OndiskError::ConfigMissing {
            path: path.to_path_buf(),
            key: key.to_string(),
        })
    };

    let rucio_host = require("rucio_host")?;
    let auth_host = lookup("auth_host").unwrap_or_else(|| rucio_host.clone());
    let auth_type = lookup("auth_type").unwrap_or_else(|| "x509_proxy".to_string());

    let auth = match auth_type.as_str() {
        "userpass" => AuthMethod::UserPass {
            username: require("username")?,
            password: require("password")?,
        },
        "x509" => AuthMethod::X509 {
            cert: PathBuf::from(require("client_cert")?),
            key: PathBuf::from(require("client_key")?),
        },
        "x509_proxy" => AuthMethod::X509Proxy {
            path: lookup("client_x509_proxy")
                .map(PathBuf::from)
                .map_or_else(host::default_proxy_path, Ok)?,
        },
        other => return Err(OndiskError::UnsupportedAuthType(other.to_string())),
    };

    let timeout = match lookup("request_timeout") {
        Some(value) => parse_timeout(&value).ok_or_else(|| OndiskError::ConfigValue {
            path: path.to_path_buf(),
            key: "request_timeout".to_string(),
            message: "expected a positive number of seconds".to_string(),
            value,
        })?,
        None => DEFAULT_TIMEOUT,
    };

    Ok(ClientConfig {
        rucio_host: rucio_host.trim_end_matches('/').to_string(),
        auth_host: auth_host.trim_end_matches('/').to_string(),
        account: account.to_string(),
        vo: lookup("vo"),
        auth,
        ca_cert: lookup("ca_cert").map(PathBuf::from),
        timeout,
    })
}

/// Expand `$VAR` and `${VAR}` references; unknown variables are left as-is.
fn expand_env(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut rest = value;

    while let Some(pos) = rest.find('$') {
        out.push_str(&rest[..pos]);
        let after = &rest[pos + 1..];

        let (name, consumed) = if let Some(braced) = after.strip_prefix('{') {
            match braced.find('}') {
                Some(end) => (&braced[..end], end + 2),
                None => ("", 0),
            }
        } else {
            let end = after
                .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
                .unwrap_or(after.len());
            (&after[..end], end)
        };

        match (name.is_empty(), std::env::var(name)) {
            (false, Ok(expanded)) => out.push_str(&expanded),
            _ => out.push_str(&rest[pos..pos + 1 + consumed]),
        }
        rest = &after[consumed..];
    }

    out.push_str(rest);
    out
}
