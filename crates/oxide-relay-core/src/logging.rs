//! Logging setup with secret redaction
//!
//! Both binaries install the same subscriber: an `EnvFilter` chosen from
//! `RUST_LOG` / `DEBUG_MODE` and a stderr writer that masks credentials.

use regex::Regex;
use std::io::{self, Write};
use std::sync::Arc;
use tracing_subscriber::{prelude::*, EnvFilter};

/// Regex patterns for redacting sensitive data
pub struct RedactionPatterns {
    telegram_url: Regex,
    telegram_bare: Regex,
    telegram_prefixed: Regex,
    bearer: Regex,
    provider_key: Regex,
    api_key_field: Regex,
    access_key_env: Regex,
    literals: Vec<String>,
}

impl RedactionPatterns {
    /// Compile the patterns. `literals` are exact secrets (such as the
    /// shared access key) masked wherever they appear.
    ///
    /// # Errors
    ///
    /// Returns an error if any regex pattern is invalid
    pub fn new(literals: Vec<String>) -> Result<Self, regex::Error> {
        Ok(Self {
            telegram_url: Regex::new(r"(https?://[^/]+/bot)([0-9]+:[A-Za-z0-9_-]+)(/['\s]*)")?,
            telegram_bare: Regex::new(r"([0-9]{8,10}:[A-Za-z0-9_-]{35})")?,
            telegram_prefixed: Regex::new(r"(bot[0-9]{8,10}:)[A-Za-z0-9_-]+")?,
            bearer: Regex::new(r"(?i)(bearer\s+)[A-Za-z0-9._~+/=-]+")?,
            provider_key: Regex::new(r"\b(sk|gsk|csk)-[A-Za-z0-9_-]{16,}")?,
            api_key_field: Regex::new(r#"("api_key"\s*:\s*")[^"]*(")"#)?,
            access_key_env: Regex::new(r"ACCESS_API_KEY=[^\s&]+")?,
            literals: literals
                .into_iter()
                .filter(|secret| secret.len() >= 4)
                .collect(),
        })
    }

    /// Mask every known secret in `input`.
    #[must_use]
    pub fn redact(&self, input: &str) -> String {
        let mut output = self
            .telegram_url
            .replace_all(input, "$1[TELEGRAM_TOKEN]$3")
            .to_string();
        output = self
            .telegram_bare
            .replace_all(&output, "[TELEGRAM_TOKEN]")
            .to_string();
        output = self
            .telegram_prefixed
            .replace_all(&output, "$1[TELEGRAM_TOKEN]")
            .to_string();
        output = self.bearer.replace_all(&output, "$1[MASKED]").to_string();
        output = self
            .provider_key
            .replace_all(&output, "$1-[MASKED]")
            .to_string();
        output = self
            .api_key_field
            .replace_all(&output, "$1[MASKED]$2")
            .to_string();
        output = self
            .access_key_env
            .replace_all(&output, "ACCESS_API_KEY=[MASKED]")
            .to_string();
        for secret in &self.literals {
            output = output.replace(secret.as_str(), "[MASKED]");
        }
        output
    }
}

/// Writer that redacts each write before passing it on
pub struct RedactingWriter<W: Write> {
    inner: W,
    patterns: Arc<RedactionPatterns>,
}

impl<W: Write> RedactingWriter<W> {
    /// Wrap `inner`.
    pub const fn new(inner: W, patterns: Arc<RedactionPatterns>) -> Self {
        Self { inner, patterns }
    }
}

impl<W: Write> Write for RedactingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let s = String::from_utf8_lossy(buf);
        let redacted = self.patterns.redact(&s);
        self.inner.write_all(redacted.as_bytes())?;
        // The caller's buffer was consumed in full, whatever the redacted length
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// `MakeWriter` producing [`RedactingWriter`]s
pub struct RedactingMakeWriter<F> {
    make_inner: F,
    patterns: Arc<RedactionPatterns>,
}

impl<F> RedactingMakeWriter<F> {
    /// Wrap a writer factory.
    pub const fn new(make_inner: F, patterns: Arc<RedactionPatterns>) -> Self {
        Self {
            make_inner,
            patterns,
        }
    }
}

impl<'a, F, W> tracing_subscriber::fmt::MakeWriter<'a> for RedactingMakeWriter<F>
where
    F: Fn() -> W + 'static,
    W: Write,
{
    type Writer = RedactingWriter<W>;

    fn make_writer(&'a self) -> Self::Writer {
        RedactingWriter::new((self.make_inner)(), self.patterns.clone())
    }
}

/// Filter used when neither `RUST_LOG` nor `DEBUG_MODE` is set.
pub const PRODUCTION_FILTER: &str = "oxide_relay_core=info,oxide_relay_proxy=info,oxide_relay_transport_telegram=info,oxide_relay_telegram_bot=info,hyper=warn,h2=error,reqwest=warn,tokio=warn,tower=warn,axum=warn,async_openai=warn";

/// Install the global subscriber writing redacted logs to stderr.
///
/// `RUST_LOG` wins; otherwise `DEBUG_MODE=true|1` selects `debug` and
/// anything else selects `production_filter`. Calling it twice is harmless.
pub fn init_logging(patterns: Arc<RedactionPatterns>, production_filter: &str) {
    let make_writer = RedactingMakeWriter::new(io::stderr, patterns);

    let debug_mode = std::env::var("DEBUG_MODE")
        .map(|v| v == "true" || v == "1")
        .unwrap_or(false);

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if debug_mode {
            EnvFilter::new("debug")
        } else {
            EnvFilter::new(production_filter)
        }
    });

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(make_writer))
        .try_init();
}
