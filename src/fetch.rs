//! Ruleset fetching.
//!
//! The engine never talks to the network directly: every remote read goes
//! through a [`Fetcher`]. [`HttpFetcher`] is the default implementation,
//! built on `ureq`. Local files are read only when the path stays inside
//! the working directory.

use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig};
use base64::engine::DecodePaddingMode;
use base64::{alphabet, engine::general_purpose, Engine as _};
use flate2::read::GzDecoder;
use percent_encoding::percent_decode_str;
use std::fs;
use std::io::Read;
use std::path::Path;
use std::time::Duration;

use crate::error::{Error, Result};

/// Default request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);

/// Default `User-Agent` header.
pub const DEFAULT_USER_AGENT: &str = "clash.meta";

/// Default maximum body size (1 MiB).
pub const DEFAULT_MAX_SIZE: u64 = 1024 * 1024;

/// Fetch collaborator for remote content.
pub trait Fetcher: Send + Sync {
    /// Fetch the body behind a link.
    fn fetch(&self, url: &str) -> Result<String>;
}

impl<F> Fetcher for F
where
    F: Fn(&str) -> Result<String> + Send + Sync,
{
    fn fetch(&self, url: &str) -> Result<String> {
        self(url)
    }
}

/// Check whether a string is a fetchable link (`http://`, `https://`, `data:`).
pub fn is_link(url: &str) -> bool {
    url.starts_with("https://") || url.starts_with("http://") || url.starts_with("data:")
}

/// Check whether a local path stays inside the working directory.
pub fn is_in_scope(path: &str) -> bool {
    if path.contains("..") {
        return false;
    }
    if cfg!(windows) {
        !(path.contains(":\\") || path.contains(":/"))
    } else {
        !path.starts_with('/')
    }
}

/// Resolve a ruleset path to its content.
///
/// In-scope local files are read directly; links go to the fetcher.
pub fn fetch_ruleset(path: &str, fetcher: &dyn Fetcher) -> Result<String> {
    if path.is_empty() {
        return Err(Error::Fetch("empty ruleset path".to_string()));
    }
    if is_in_scope(path) && Path::new(path).is_file() {
        return Ok(fs::read_to_string(path)?);
    }
    if is_link(path) {
        return fetcher.fetch(path);
    }
    Err(Error::Fetch(format!("invalid ruleset path: {}", path)))
}

const URL_SAFE_INDIFFERENT: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new()
        .with_encode_padding(false)
        .with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// URL-safe base64 without padding.
pub fn url_safe_base64_encode(value: &str) -> String {
    general_purpose::URL_SAFE_NO_PAD.encode(value)
}

/// Decode URL-safe base64, with or without padding.
///
/// Returns an empty string on malformed input.
pub fn url_safe_base64_decode(value: &str) -> String {
    if value.is_empty() {
        return String::new();
    }
    URL_SAFE_INDIFFERENT
        .decode(value)
        .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
        .unwrap_or_default()
}

/// Decode a URL component, treating `+` as a space.
pub fn url_decode(value: &str) -> String {
    let spaced = value.replace('+', " ");
    percent_decode_str(&spaced).decode_utf8_lossy().into_owned()
}

/// Read the payload of a `data:` URL.
///
/// `;base64` payloads are decoded as URL-safe base64.
pub fn data_get(url: &str) -> String {
    let Some((meta, data)) = url.split_once(',') else {
        return String::new();
    };
    if data.is_empty() {
        return String::new();
    }
    let data = url_decode(data);
    if meta.ends_with(";base64") {
        url_safe_base64_decode(&data.replace('+', "-").replace('/', "_"))
    } else {
        data
    }
}

/// Options for [`HttpFetcher`].
#[derive(Debug, Clone)]
pub struct FetchOptions {
    /// Request timeout
    pub timeout: Duration,
    /// `User-Agent` header
    pub user_agent: String,
    /// Upstream proxy (`http://host:port`, `socks5://host:port`)
    pub proxy: Option<String>,
    /// Maximum accepted body size in bytes
    pub max_size: u64,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            proxy: None,
            max_size: DEFAULT_MAX_SIZE,
        }
    }
}

/// Blocking HTTP fetcher.
///
/// Handles `data:` URLs inline, enforces a body size limit and inflates
/// gzip bodies served without `Content-Encoding`.
pub struct HttpFetcher {
    agent: ureq::Agent,
    max_size: u64,
}

impl HttpFetcher {
    /// Create a fetcher with default options.
    pub fn new() -> Self {
        let opts = FetchOptions::default();
        Self {
            agent: Self::builder(&opts).build(),
            max_size: opts.max_size,
        }
    }

    /// Create a fetcher with custom options.
    pub fn with_options(opts: FetchOptions) -> Result<Self> {
        let mut builder = Self::builder(&opts);
        if let Some(proxy) = opts.proxy.as_deref().filter(|p| !p.trim().is_empty()) {
            let proxy = ureq::Proxy::new(proxy.trim())
                .map_err(|e| Error::Config(format!("invalid proxy {}: {}", proxy, e)))?;
            builder = builder.proxy(proxy);
        }
        Ok(Self {
            agent: builder.build(),
            max_size: opts.max_size,
        })
    }

    fn builder(opts: &FetchOptions) -> ureq::AgentBuilder {
        ureq::AgentBuilder::new()
            .timeout(opts.timeout)
            .user_agent(&opts.user_agent)
    }

    fn read_body(&self, response: ureq::Response) -> Result<Vec<u8>> {
        let mut data = Vec::new();
        response
            .into_reader()
            .take(self.max_size + 1)
            .read_to_end(&mut data)
            .map_err(|e| Error::Fetch(format!("failed to read response: {}", e)))?;
        if data.len() as u64 > self.max_size {
            return Err(Error::Fetch("response exceeds size limit".to_string()));
        }

        if is_gzip(&data) {
            let mut inflated = Vec::new();
            GzDecoder::new(&data[..])
                .read_to_end(&mut inflated)
                .map_err(|e| Error::Fetch(format!("gzip decompression failed: {}", e)))?;
            return Ok(inflated);
        }
        Ok(data)
    }
}

impl Default for HttpFetcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Fetcher for HttpFetcher {
    fn fetch(&self, url: &str) -> Result<String> {
        if url.is_empty() {
            return Err(Error::Fetch("empty url".to_string()));
        }
        if url.get(..5).map_or(false, |p| p.eq_ignore_ascii_case("data:")) {
            return Ok(data_get(url));
        }

        let response = self.agent.get(url).call().map_err(|e| match e {
            ureq::Error::Status(code, _) => Error::Fetch(format!("HTTP error: {}", code)),
            ureq::Error::Transport(t) => Error::Fetch(format!("transport error: {}", t)),
        })?;

        let body = self.read_body(response)?;
        log::debug!("Fetched {} ({} bytes)", url, body.len());
        Ok(String::from_utf8_lossy(&body).into_owned())
    }
}

fn is_gzip(data: &[u8]) -> bool {
    data.len() >= 2 && data[0] == 0x1f && data[1] == 0x8b
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_is_link() {
        assert!(is_link("https://example.com/a.list"));
        assert!(is_link("http://example.com/a.list"));
        assert!(is_link("data:text/plain,DOMAIN,a.com"));
        assert!(!is_link("rules/a.list"));
    }

    #[test]
    fn test_is_in_scope() {
        assert!(is_in_scope("rules/a.list"));
        assert!(!is_in_scope("../secret"));
        assert!(!is_in_scope("rules/../../etc/passwd"));
        #[cfg(not(windows))]
        assert!(!is_in_scope("/etc/passwd"));
    }

    #[test]
    fn test_fetch_ruleset_routes_links() {
        let fetcher = |url: &str| -> Result<String> { Ok(format!("fetched {}", url)) };
        assert_eq!(
            fetch_ruleset("https://example.com/a.list", &fetcher).unwrap(),
            "fetched https://example.com/a.list"
        );
        assert!(fetch_ruleset("", &fetcher).is_err());
        assert!(fetch_ruleset("missing/file.list", &fetcher).is_err());
        assert!(fetch_ruleset("/etc/hostname", &fetcher).is_err());
    }

    #[test]
    fn test_fetch_ruleset_local_file() {
        let dir = tempfile::Builder::new()
            .prefix("subrule-fetch")
            .tempdir_in(".")
            .unwrap();
        // Relative to the working directory
        let relative = format!(
            "{}/local.list",
            dir.path().file_name().unwrap().to_str().unwrap()
        );
        fs::write(&relative, "DOMAIN,example.com\n").unwrap();

        let fetcher = |_: &str| -> Result<String> { Err(Error::Fetch("unused".to_string())) };
        assert_eq!(
            fetch_ruleset(&relative, &fetcher).unwrap(),
            "DOMAIN,example.com\n"
        );
    }

    #[test]
    fn test_base64_helpers() {
        let encoded = url_safe_base64_encode("https://example.com/a?b=c");
        assert!(!encoded.contains('='));
        assert!(!encoded.contains('+'));
        assert_eq!(url_safe_base64_decode(&encoded), "https://example.com/a?b=c");
        assert_eq!(url_safe_base64_decode("YQ=="), "a");
        assert_eq!(url_safe_base64_decode("!!!"), "");
        assert_eq!(url_safe_base64_decode(""), "");
    }

    #[test]
    fn test_url_decode() {
        assert_eq!(url_decode("Apple%20Music"), "Apple Music");
        assert_eq!(url_decode("a+b"), "a b");
        assert_eq!(url_decode("%E4%B8%AD"), "中");
    }

    #[test]
    fn test_data_get() {
        assert_eq!(data_get("data:text/plain,DOMAIN%2Ca.com"), "DOMAIN,a.com");
        assert_eq!(data_get("data:text/plain;base64,YQ"), "a");
        assert_eq!(data_get("data:text/plain,"), "");
        assert_eq!(data_get("data:nocomma"), "");
    }

    #[test]
    fn test_http_fetcher_data_url() {
        let fetcher = HttpFetcher::new();
        assert_eq!(fetcher.fetch("data:,hello").unwrap(), "hello");
        assert!(fetcher.fetch("").is_err());
    }

    #[test]
    fn test_invalid_proxy() {
        let opts = FetchOptions {
            proxy: Some("not a proxy://".to_string()),
            ..Default::default()
        };
        assert!(HttpFetcher::with_options(opts).is_err());
    }

    #[test]
    fn test_is_gzip() {
        let mut encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(b"DOMAIN,a.com").unwrap();
        let data = encoder.finish().unwrap();
        assert!(is_gzip(&data));
        assert!(!is_gzip(b"DOMAIN,a.com"));
    }
}
