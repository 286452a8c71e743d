//! Generation providers
//!
//! Concrete bridges to whatever actually writes a section, plus wrappers that
//! add retry, timeout and cancellation. The engine calls providers exactly once
//! per planned section; any resilience lives here.

use diligence_core::{
    async_trait, config_error, generation_error, retry_async_when, with_cancellation,
    with_timeout, CompanyProfile, DiligenceError, DiligenceResult, ErrorContext, Generation,
    GenerationProvider, ProviderConfig, ProviderKind, RetryConfig,
};
use regex::Regex;
use serde::Serialize;
use std::borrow::Cow;
use std::process::Stdio;
use std::sync::OnceLock;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Runs an external program once per section
///
/// The program receives the section id, company id and run id in the
/// `DILIGENCE_SECTION`, `DILIGENCE_COMPANY` and `DILIGENCE_RUN` environment
/// variables, the company profile as JSON in `DILIGENCE_PROFILE`, and the
/// section context on stdin. Its stdout is the section content, or a JSON
/// object `{"content": ..., "source_refs": [...]}`.
#[derive(Debug, Clone)]
pub struct CommandProvider {
    program: String,
    args: Vec<String>,
    company_id: String,
    profile_json: String,
    run_id: String,
}

impl CommandProvider {
    pub fn new(
        program: impl Into<String>,
        args: Vec<String>,
        profile: &CompanyProfile,
        run_id: impl Into<String>,
    ) -> DiligenceResult<Self> {
        Ok(Self {
            program: program.into(),
            args,
            company_id: profile.company_id(),
            profile_json: serde_json::to_string(profile)?,
            run_id: run_id.into(),
        })
    }
}

#[async_trait]
impl GenerationProvider for CommandProvider {
    async fn generate(&self, section_id: &str, context: &str) -> DiligenceResult<Generation> {
        debug!(program = %self.program, section_id = section_id, "Spawning generator");

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .env("DILIGENCE_SECTION", section_id)
            .env("DILIGENCE_COMPANY", &self.company_id)
            .env("DILIGENCE_RUN", &self.run_id)
            .env("DILIGENCE_PROFILE", &self.profile_json)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| DiligenceError::Generation {
                message: format!("Failed to start '{}': {}", self.program, e),
                provider: Some(self.name().to_string()),
                source: Some(Box::new(e)),
                context: ErrorContext::new("command_provider")
                    .with_operation("spawn")
                    .with_suggestion("Check provider.command in the configuration"),
            })?;

        let stdin = child.stdin.take();
        let feed = async move {
            if let Some(mut stdin) = stdin {
                stdin.write_all(context.as_bytes()).await?;
                stdin.shutdown().await?;
            }
            Ok::<(), std::io::Error>(())
        };

        let (fed, output) = tokio::join!(feed, child.wait_with_output());
        let output = output?;

        if let Err(e) = fed {
            // A generator that ignores its context closes stdin early
            if e.kind() != std::io::ErrorKind::BrokenPipe {
                return Err(e.into());
            }
        }

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(generation_error!(
                format!(
                    "'{}' exited with {} for section '{}': {}",
                    self.program,
                    output.status,
                    section_id,
                    stderr.trim()
                ),
                self.name()
            ));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let generation = parse_generation(&stdout);
        if generation.content.is_empty() {
            return Err(generation_error!(
                format!("'{}' produced no content for section '{}'", self.program, section_id),
                self.name()
            ));
        }
        Ok(generation)
    }

    fn name(&self) -> &str {
        "command"
    }
}

/// Structured stdout if it parses, plain text otherwise
fn parse_generation(stdout: &str) -> Generation {
    let trimmed = stdout.trim();
    if trimmed.starts_with('{') {
        if let Ok(generation) = serde_json::from_str::<Generation>(trimmed) {
            return Generation {
                content: clean_markdown_output(&generation.content),
                source_refs: generation.source_refs,
            };
        }
    }
    Generation::new(clean_markdown_output(trimmed))
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    section_id: &'a str,
    run_id: &'a str,
    company: &'a CompanyProfile,
    context: &'a str,
}

/// POSTs each section request to a generation service
///
/// The service answers with `{"content": ..., "source_refs": [...]}`.
#[derive(Debug, Clone)]
pub struct HttpProvider {
    client: reqwest::Client,
    endpoint: String,
    profile: CompanyProfile,
    run_id: String,
    api_key: Option<String>,
}

impl HttpProvider {
    pub fn new(
        endpoint: impl Into<String>,
        profile: &CompanyProfile,
        run_id: impl Into<String>,
    ) -> DiligenceResult<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("diligence/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| DiligenceError::Config {
                message: format!("Failed to create HTTP client: {}", e),
                source: Some(Box::new(e)),
                context: ErrorContext::new("http_provider"),
            })?;

        Ok(Self {
            client,
            endpoint: endpoint.into(),
            profile: profile.clone(),
            run_id: run_id.into(),
            api_key: None,
        })
    }

    /// Send `Authorization: Bearer <key>` with every request
    pub fn with_api_key(mut self, api_key: Option<String>) -> Self {
        self.api_key = api_key;
        self
    }
}

#[async_trait]
impl GenerationProvider for HttpProvider {
    async fn generate(&self, section_id: &str, context: &str) -> DiligenceResult<Generation> {
        let body = GenerateRequest {
            section_id,
            run_id: &self.run_id,
            company: &self.profile,
            context,
        };

        debug!(endpoint = %self.endpoint, section_id = section_id, "Requesting generation");

        let mut request = self.client.post(&self.endpoint).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(|e| {
            generation_error!(
                format!("Request to {} failed: {}", self.endpoint, e),
                self.name(),
                e
            )
        })?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(generation_error!(
                format!("Generation service returned {} for '{}': {}", status, section_id, text.trim()),
                self.name()
            ));
        }

        let generation: Generation = response.json().await.map_err(|e| {
            generation_error!(
                format!("Malformed response for '{}': {}", section_id, e),
                self.name(),
                e
            )
        })?;

        let content = clean_markdown_output(&generation.content);
        if content.is_empty() {
            return Err(generation_error!(
                format!("Empty content for section '{}'", section_id),
                self.name()
            ));
        }

        Ok(Generation {
            content,
            source_refs: generation.source_refs,
        })
    }

    fn name(&self) -> &str {
        "http"
    }
}

/// Retries recoverable failures of the inner provider
pub struct RetryingProvider<P> {
    inner: P,
    config: RetryConfig,
}

impl<P: GenerationProvider> RetryingProvider<P> {
    pub fn new(inner: P, config: RetryConfig) -> Self {
        Self { inner, config }
    }
}

#[async_trait]
impl<P: GenerationProvider> GenerationProvider for RetryingProvider<P> {
    async fn generate(&self, section_id: &str, context: &str) -> DiligenceResult<Generation> {
        let operation = format!("generate:{section_id}");
        retry_async_when(
            || self.inner.generate(section_id, context),
            DiligenceError::is_recoverable,
            self.config.clone(),
            &operation,
        )
        .await
    }

    fn name(&self) -> &str {
        self.inner.name()
    }
}

/// Fails a section whose generation takes longer than the limit
pub struct TimeoutProvider<P> {
    inner: P,
    timeout_ms: u64,
}

impl<P: GenerationProvider> TimeoutProvider<P> {
    pub fn new(inner: P, timeout_ms: u64) -> Self {
        Self { inner, timeout_ms }
    }
}

#[async_trait]
impl<P: GenerationProvider> GenerationProvider for TimeoutProvider<P> {
    async fn generate(&self, section_id: &str, context: &str) -> DiligenceResult<Generation> {
        let operation = format!("generate:{section_id}");
        with_timeout(
            self.inner.generate(section_id, context),
            self.timeout_ms,
            &operation,
        )
        .await?
    }

    fn name(&self) -> &str {
        self.inner.name()
    }
}

/// Abandons generation once the cancellation signal fires
///
/// Cancellation surfaces as [`DiligenceError::Cancelled`], which the engine
/// treats like any other failure of that section.
pub struct CancellableProvider<P> {
    inner: P,
    cancel: watch::Receiver<bool>,
}

impl<P: GenerationProvider> CancellableProvider<P> {
    pub fn new(inner: P, cancel: watch::Receiver<bool>) -> Self {
        Self { inner, cancel }
    }
}

#[async_trait]
impl<P: GenerationProvider> GenerationProvider for CancellableProvider<P> {
    async fn generate(&self, section_id: &str, context: &str) -> DiligenceResult<Generation> {
        let operation = format!("generate:{section_id}");
        with_cancellation(
            self.inner.generate(section_id, context),
            self.cancel.clone(),
            &operation,
        )
        .await?
    }

    fn name(&self) -> &str {
        self.inner.name()
    }
}

/// Build the configured provider for one company and run
///
/// Each attempt gets its own timeout; retries wrap the timed attempts.
pub fn build_provider(
    config: &ProviderConfig,
    profile: &CompanyProfile,
    run_id: &str,
) -> DiligenceResult<Box<dyn GenerationProvider>> {
    let base: Box<dyn GenerationProvider> = match config.kind {
        ProviderKind::Command => {
            let program = config
                .command
                .as_deref()
                .filter(|c| !c.trim().is_empty())
                .ok_or_else(|| config_error!("provider.command is required", "build_provider"))?;
            Box::new(CommandProvider::new(
                program,
                config.args.clone(),
                profile,
                run_id,
            )?)
        }
        ProviderKind::Http => {
            let endpoint = config
                .endpoint
                .as_deref()
                .ok_or_else(|| config_error!("provider.endpoint is required", "build_provider"))?;
            let api_key = match &config.api_key_env {
                Some(var) => {
                    let key = std::env::var(var).ok();
                    if key.is_none() {
                        warn!(variable = %var, "API key environment variable is not set");
                    }
                    key
                }
                None => None,
            };
            Box::new(HttpProvider::new(endpoint, profile, run_id)?.with_api_key(api_key))
        }
    };

    let timed: Box<dyn GenerationProvider> = if config.timeout_secs > 0 {
        Box::new(TimeoutProvider::new(base, config.timeout_secs * 1000))
    } else {
        base
    };

    let provider: Box<dyn GenerationProvider> = if config.max_attempts > 1 {
        Box::new(RetryingProvider::new(
            timed,
            RetryConfig {
                max_attempts: config.max_attempts,
                ..RetryConfig::default()
            },
        ))
    } else {
        timed
    };

    info!(
        provider = provider.name(),
        timeout_secs = config.timeout_secs,
        max_attempts = config.max_attempts,
        "Generation provider ready"
    );
    Ok(provider)
}

/// Strip code fences and horizontal rules that models wrap around markdown
pub fn clean_markdown_output(content: &str) -> String {
    static OPENING_FENCE: OnceLock<Option<Regex>> = OnceLock::new();
    static CLOSING_FENCE: OnceLock<Option<Regex>> = OnceLock::new();
    static HORIZONTAL_RULE: OnceLock<Option<Regex>> = OnceLock::new();
    static BLANK_RUN: OnceLock<Option<Regex>> = OnceLock::new();

    if content.trim().is_empty() {
        return String::new();
    }

    let cleaned = replace(&OPENING_FENCE, r"(?m)^```markdown\s*\n?", content.trim(), "");
    let cleaned = replace(&CLOSING_FENCE, r"(?m)\n?```\s*$", &cleaned, "");
    let cleaned = replace(&HORIZONTAL_RULE, r"(?m)^[-*]{3,}\s*$", &cleaned, "");
    let cleaned = replace(&BLANK_RUN, r"\n\s*\n\s*\n", &cleaned, "\n\n");

    cleaned.trim().to_string()
}

fn replace<'t>(
    cell: &'static OnceLock<Option<Regex>>,
    pattern: &str,
    text: &'t str,
    replacement: &str,
) -> Cow<'t, str> {
    match cell.get_or_init(|| Regex::new(pattern).ok()) {
        Some(regex) => regex.replace_all(text, replacement),
        None => Cow::Borrowed(text),
    }
}
