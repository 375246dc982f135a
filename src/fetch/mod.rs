//! KN-004: Content acquisition — checksummed, cache-reusing HTTP downloads.
//!
//! An existing destination file is reused when its digest matches (or when
//! no checksum is requested). A mismatching file is deleted and fetched
//! again. The body is hashed while it streams to disk, so nothing is read
//! twice. There is no temp-file-then-rename: an interrupted download leaves
//! a partial file that the next run's checksum check deletes.

pub mod checksum;

use crate::error::{Error, Result};
use checksum::{Algorithm, Checksum, Hasher};
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, CONTROLS};
use std::borrow::Cow;
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;
use std::time::Duration;

/// Upper bound on a single download.
const MAX_DOWNLOAD_SIZE: u64 = 64 * 1024 * 1024 * 1024;

const COPY_BUF_SIZE: usize = 65536;

/// Progress redraws per second.
const PROGRESS_HZ: u8 = 10;

/// Characters a request target may not carry literally. `%`, `/`, `?` and
/// `#` pass through so already-encoded URLs are left alone.
const URL_UNSAFE: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'<')
    .add(b'>')
    .add(b'`')
    .add(b'{')
    .add(b'}')
    .add(b'|')
    .add(b'\\')
    .add(b'^');

/// What `fetch` did to satisfy the request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadOutcome {
    /// The file already at the destination was kept.
    Reused,
    /// A fresh copy was downloaded.
    Fetched { bytes: u64, digest: String },
}

/// Blocking HTTP fetcher.
pub struct Fetcher {
    agent: ureq::Agent,
    progress: bool,
}

impl Fetcher {
    /// Fetcher with an optional whole-request timeout.
    pub fn new(timeout: Option<Duration>, progress: bool) -> Self {
        let config = ureq::Agent::config_builder()
            .http_status_as_error(false)
            .timeout_global(timeout)
            .build();
        Self::from_agent(ureq::Agent::new_with_config(config), progress)
    }

    /// Fetcher over a preconfigured agent. The agent must not treat HTTP
    /// status codes as errors.
    pub fn from_agent(agent: ureq::Agent, progress: bool) -> Self {
        Self { agent, progress }
    }

    /// Make `destination` hold the content at `source`, verified against
    /// `expected` when given.
    pub fn fetch(
        &self,
        source: &str,
        destination: &Path,
        expected: Option<&Checksum>,
    ) -> Result<DownloadOutcome> {
        if destination.exists() {
            match expected {
                None => {
                    log::info!(
                        "destination {} already exists, using it",
                        destination.display()
                    );
                    return Ok(DownloadOutcome::Reused);
                }
                Some(checksum) => {
                    let actual = checksum::hash_file(destination, checksum.algorithm)?;
                    if checksum.matches(&actual) {
                        log::info!("using existing {}", destination.display());
                        return Ok(DownloadOutcome::Reused);
                    }
                    log::info!(
                        "{} has {}:{}, want {}, removing",
                        destination.display(),
                        checksum.algorithm,
                        actual,
                        checksum
                    );
                    remove_stale(destination)?;
                }
            }
        }

        let request_url = encode_url(source);
        log::debug!("GET {}", request_url);
        let mut response = self
            .agent
            .get(request_url.as_ref())
            .call()
            .map_err(|e| Error::Transport {
                url: source.to_string(),
                message: e.to_string(),
            })?;

        let status = response.status().as_u16();
        if status != 200 {
            return Err(Error::ServerResponse {
                url: source.to_string(),
                status,
            });
        }

        let total = response
            .headers()
            .get("content-length")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok());

        let mut out = File::create(destination).map_err(|e| Error::io(destination, e))?;
        let algorithm = expected.map_or(Algorithm::Sha256, |c| c.algorithm);
        let mut hasher = Hasher::new(algorithm);
        let bar = self.progress_bar(total);

        let mut reader = response
            .body_mut()
            .with_config()
            .limit(MAX_DOWNLOAD_SIZE)
            .reader();
        let mut buf = vec![0u8; COPY_BUF_SIZE];
        let mut bytes = 0u64;
        loop {
            let n = reader.read(&mut buf).map_err(|e| Error::io(destination, e))?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
            out.write_all(&buf[..n])
                .map_err(|e| Error::io(destination, e))?;
            bytes += n as u64;
            bar.set_position(bytes);
        }
        out.flush().map_err(|e| Error::io(destination, e))?;
        bar.finish_and_clear();

        let digest = hasher.finalize_hex();
        if let Some(checksum) = expected {
            if !checksum.matches(&digest) {
                return Err(Error::ChecksumMismatch {
                    path: destination.to_path_buf(),
                    expected: checksum.to_string(),
                    actual: format!("{}:{}", algorithm, digest),
                });
            }
        }

        log::debug!(
            "fetched {} bytes to {} ({}:{})",
            bytes,
            destination.display(),
            algorithm,
            digest
        );
        Ok(DownloadOutcome::Fetched { bytes, digest })
    }

    fn progress_bar(&self, total: Option<u64>) -> ProgressBar {
        if !self.progress {
            return ProgressBar::hidden();
        }
        let bar = ProgressBar::with_draw_target(total, ProgressDrawTarget::stderr_with_hz(PROGRESS_HZ));
        let template = if total.is_some() {
            "\t[{bar:40.cyan/blue}] {bytes}/{total_bytes} {bytes_per_sec} ({eta})"
        } else {
            "\t{spinner} {bytes} {bytes_per_sec}"
        };
        if let Ok(style) = ProgressStyle::with_template(template) {
            bar.set_style(style.progress_chars("=>-"));
        }
        bar
    }
}

fn remove_stale(path: &Path) -> Result<()> {
    let removed = if path.is_dir() {
        std::fs::remove_dir_all(path)
    } else {
        std::fs::remove_file(path)
    };
    removed.map_err(|e| Error::io(path, e))
}

/// Whether `source` should go through the fetcher rather than be read locally.
pub fn is_remote(source: &str) -> bool {
    let lower = source.to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}

/// Percent-encode the characters of `source` after its authority that an
/// HTTP request line cannot carry, such as spaces. Scheme and host are kept.
pub fn encode_url(source: &str) -> Cow<'_, str> {
    let after_scheme = source.find("://").map_or(0, |i| i + 3);
    let Some(path_start) = source[after_scheme..].find('/').map(|i| after_scheme + i) else {
        return Cow::Borrowed(source);
    };
    let (origin, rest) = source.split_at(path_start);
    let encoded: Cow<'_, str> = utf8_percent_encode(rest, URL_UNSAFE).into();
    match encoded {
        Cow::Borrowed(_) => Cow::Borrowed(source),
        Cow::Owned(encoded) => Cow::Owned(format!("{}{}", origin, encoded)),
    }
}

/// Final path segment of a URL, without query or fragment, percent-decoded.
/// `Firefox%20124.dmg` and `Firefox 124.dmg` name the same file.
pub fn url_basename(source: &str) -> Option<String> {
    let without_scheme = source.split_once("://").map_or(source, |(_, rest)| rest);
    let path = without_scheme
        .split(['?', '#'])
        .next()
        .unwrap_or(without_scheme);
    let (_, path) = path.split_once('/')?;
    let segment = path.rsplit('/').next().filter(|s| !s.is_empty())?;
    let decoded = percent_decode_str(segment).decode_utf8_lossy();
    if decoded.contains('/') || decoded == ".." {
        return None;
    }
    Some(decoded.into_owned())
}
