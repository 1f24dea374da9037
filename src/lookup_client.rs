use log::{debug, warn};
use rand::Rng;
use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT_LANGUAGE, USER_AGENT};
use reqwest::StatusCode;
use std::time::Duration;
use thiserror::Error;

use crate::delay_manager;
use crate::error::{CheckError, Result};
use crate::record::Identity;

pub const DEFAULT_ENDPOINT: &str = "https://mvic.sos.state.mi.us/Voter/SearchByName";

/// Companion fields the search form requires alongside the identity fields.
const PROTOCOL_CONSTANTS: [(&str, &str); 7] = [
    ("Dln", ""),
    ("DlnBirthMonth", "0"),
    ("DlnBirthYear", ""),
    ("DpaID", "0"),
    ("Months", ""),
    ("VoterNotFound", "false"),
    ("TransistionVoter", "false"),
];

const USER_AGENTS: [&str; 4] = [
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:121.0) Gecko/20100101 Firefox/121.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10.15; rv:121.0) Gecko/20100101 Firefox/121.0",
];

pub type Form = Vec<(&'static str, String)>;

/// How a single transport call failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// Reset, disconnect, timeout, throttling. Worth retrying.
    #[error("connection error: {0}")]
    Connection(String),
    /// No connection could be opened (refused, DNS, no route). Retried, but
    /// fatal once the attempts run out.
    #[error("host unreachable: {0}")]
    Unreachable(String),
    /// The service answered, but not with something usable.
    #[error("protocol error: {0}")]
    Protocol(String),
    /// No retry will help: the request cannot be built or we are blocked.
    #[error("fatal transport error: {0}")]
    Fatal(String),
}

impl TransportError {
    pub fn detail(&self) -> &str {
        match self {
            TransportError::Connection(msg)
            | TransportError::Unreachable(msg)
            | TransportError::Protocol(msg)
            | TransportError::Fatal(msg) => msg,
        }
    }
}

/// Sends one form submission and returns the response body.
pub trait Transport: Send + Sync {
    fn submit(&self, form: &Form) -> std::result::Result<String, TransportError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LookupFailure {
    #[error("gave up after {attempts} attempts: {last_error}")]
    ConnectionExhausted { attempts: u32, last_error: String },
    #[error("{0}")]
    ProtocolError(String),
    #[error("{0}")]
    Fatal(String),
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_attempts: 10,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub endpoint: String,
    pub proxy: Option<String>,
    pub timeout: Duration,
}

impl Default for HttpConfig {
    fn default() -> Self {
        HttpConfig {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            proxy: None,
            timeout: Duration::from_secs(30),
        }
    }
}

/// reqwest-backed transport. One pooled client per instance; the form body
/// carries all per-call state.
pub struct HttpTransport {
    client: Client,
    endpoint: String,
}

impl HttpTransport {
    pub fn new(config: &HttpConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.9"));

        let mut builder = Client::builder()
            .timeout(config.timeout)
            .default_headers(headers);

        if let Some(proxy) = &config.proxy {
            let proxy = reqwest::Proxy::all(proxy)
                .map_err(|e| CheckError::HttpClient(format!("invalid proxy '{}': {}", proxy, e)))?;
            builder = builder.proxy(proxy);
        }

        let client = builder
            .build()
            .map_err(|e| CheckError::HttpClient(e.to_string()))?;

        Ok(HttpTransport {
            client,
            endpoint: config.endpoint.clone(),
        })
    }

    fn random_user_agent() -> &'static str {
        let mut rng = rand::thread_rng();
        USER_AGENTS[rng.gen_range(0..USER_AGENTS.len())]
    }
}

impl Transport for HttpTransport {
    fn submit(&self, form: &Form) -> std::result::Result<String, TransportError> {
        let resp = self
            .client
            .post(&self.endpoint)
            .header(USER_AGENT, Self::random_user_agent())
            .form(form)
            .send()
            .map_err(classify_reqwest_error)?;

        let status = resp.status();
        if let Some(err) = classify_status(status) {
            return Err(err);
        }
        resp.text().map_err(classify_reqwest_error)
    }
}

fn classify_status(status: StatusCode) -> Option<TransportError> {
    if status.is_success() {
        return None;
    }
    let msg = format!("HTTP {}", status);
    Some(match status {
        StatusCode::FORBIDDEN => TransportError::Fatal(format!("{} (blocked by remote host)", msg)),
        StatusCode::TOO_MANY_REQUESTS
        | StatusCode::BAD_GATEWAY
        | StatusCode::SERVICE_UNAVAILABLE
        | StatusCode::GATEWAY_TIMEOUT => TransportError::Connection(msg),
        _ => TransportError::Protocol(msg),
    })
}

/// The parts of a `reqwest::Error` that decide how it is retried.
#[derive(Debug, Clone, Copy, Default)]
struct ErrorFlags {
    builder: bool,
    redirect: bool,
    connect: bool,
    timeout: bool,
    request: bool,
    body: bool,
}

impl ErrorFlags {
    fn of(e: &reqwest::Error) -> Self {
        ErrorFlags {
            builder: e.is_builder(),
            redirect: e.is_redirect(),
            connect: e.is_connect(),
            timeout: e.is_timeout(),
            request: e.is_request(),
            body: e.is_body(),
        }
    }

    fn classify(self, msg: String) -> TransportError {
        if self.builder || self.redirect {
            TransportError::Fatal(msg)
        } else if self.connect {
            TransportError::Unreachable(msg)
        } else if self.timeout || self.request || self.body {
            TransportError::Connection(msg)
        } else {
            TransportError::Protocol(msg)
        }
    }
}

fn classify_reqwest_error(e: reqwest::Error) -> TransportError {
    ErrorFlags::of(&e).classify(e.to_string())
}

/// Builds the full search form for one candidate month.
pub fn lookup_form(identity: &Identity, birth_month: u8) -> Form {
    let mut form: Form = vec![
        ("FirstName", identity.first_name.clone()),
        ("LastName", identity.last_name.clone()),
        ("NameBirthMonth", birth_month.to_string()),
        ("NameBirthYear", identity.birth_year.clone()),
        ("ZipCode", identity.zip_code.clone()),
    ];
    form.extend(PROTOCOL_CONSTANTS.iter().map(|(k, v)| (*k, v.to_string())));
    form
}

pub struct LookupClient<T: Transport> {
    transport: T,
    retry: RetryPolicy,
}

impl<T: Transport> LookupClient<T> {
    pub fn new(transport: T, retry: RetryPolicy) -> Self {
        LookupClient { transport, retry }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// One lookup, retrying connection-class failures up to the policy's
    /// attempt ceiling.
    pub fn lookup(&self, identity: &Identity, birth_month: u8) -> std::result::Result<String, LookupFailure> {
        let form = lookup_form(identity, birth_month);
        let max_attempts = self.retry.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            match self.transport.submit(&form) {
                Ok(body) => return Ok(body),
                Err(err @ (TransportError::Connection(_) | TransportError::Unreachable(_))) => {
                    if attempt >= max_attempts {
                        return Err(match err {
                            TransportError::Unreachable(msg) => LookupFailure::Fatal(format!(
                                "host unreachable after {} attempts: {}",
                                attempt, msg
                            )),
                            other => LookupFailure::ConnectionExhausted {
                                attempts: attempt,
                                last_error: other.detail().to_string(),
                            },
                        });
                    }
                    let msg = err.detail();
                    warn!(
                        "Lookup {} {} month {} failed (attempt {}/{}): {}",
                        identity.first_name, identity.last_name, birth_month, attempt, max_attempts, msg
                    );
                    delay_manager::retry_pause(attempt, self.retry.base_delay, self.retry.max_delay);
                }
                Err(TransportError::Protocol(msg)) => {
                    debug!("Protocol error for month {}: {}", birth_month, msg);
                    return Err(LookupFailure::ProtocolError(msg));
                }
                Err(TransportError::Fatal(msg)) => return Err(LookupFailure::Fatal(msg)),
            }
        }
    }
}
