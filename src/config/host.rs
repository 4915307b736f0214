//! Host discovery for the catalog client installation.
//!
//! CVMFS ships one client build per major OS release. The release has to be
//! read from the release file rather than the kernel, since the tool often
//! runs inside a container on a host with a different OS.

use std::path::{Path, PathBuf};

use crate::error::OndiskError;

/// File holding the OS release string on Red Hat-like hosts.
pub const RELEASE_FILE: &str = "/etc/redhat-release";

const CVMFS_RUCIO_ROOT: &str = "/cvmfs/cms.cern.ch/rucio/x86_64";

/// Extract the major version: the first run of decimal digits.
pub fn parse_major_version(release: &str) -> Option<u32> {
    let start = release.find(|c: char| c.is_ascii_digit())?;
    let digits = &release[start..];
    let end = digits
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(digits.len());
    digits[..end].parse().ok()
}

/// Read the release file and return the matching client home directory.
pub fn discover_rucio_home(release_file: &Path) -> Result<PathBuf, OndiskError> {
    let release = std::fs::read_to_string(release_file).map_err(|source| {
        OndiskError::Environment {
            message: format!(
                "cannot read OS release from {}: {} (set RUCIO_HOME or --config)",
                release_file.display(),
                source
            ),
        }
    })?;

    let major = parse_major_version(&release).ok_or_else(|| OndiskError::Environment {
        message: format!(
            "no OS version number in {}: '{}'",
            release_file.display(),
            release.trim()
        ),
    })?;

    Ok(rucio_home_for_release(major))
}

pub fn rucio_home_for_release(major: u32) -> PathBuf {
    PathBuf::from(format!("{CVMFS_RUCIO_ROOT}/rhel{major}/py3/current"))
}

/// Default grid proxy location: `X509_USER_PROXY`, else `/tmp/x509up_u<uid>`.
pub fn default_proxy_path() -> Result<PathBuf, OndiskError> {
    if let Some(path) = std::env::var_os("X509_USER_PROXY") {
        return Ok(PathBuf::from(path));
    }
    let uid = current_uid()?;
    Ok(PathBuf::from(format!("/tmp/x509up_u{uid}")))
}

#[cfg(unix)]
fn current_uid() -> Result<u32, OndiskError> {
    use std::os::unix::fs::MetadataExt;

    // procfs reports the process owner on its self link.
    std::fs::metadata("/proc/self")
        .map(|meta| meta.uid())
        .map_err(|source| OndiskError::Environment {
            message: format!("cannot determine user id for default proxy path: {source}"),
        })
}

#[cfg(not(unix))]
fn current_uid() -> Result<u32, OndiskError> {
    Err(OndiskError::Environment {
        message: "no default proxy path on this platform; set X509_USER_PROXY".to_string(),
    })
}
