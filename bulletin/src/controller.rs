use std::path::{Path, PathBuf};

use anyhow::Context;
use bulletin_common::{internal, logging, tracing};
use bulletin_dispatch::{
    Clock, DispatchError, DispatchPolicy, Dispatcher, EmailConfig, MessageTemplate,
    OutcomeRecorder, OutcomeStatus, RateLimitConfig, Relay, RelayConfig, RunCounters, RunOutcome,
    RunReport, SmtpRelay, SuppressionSet, SystemClock, load_recipients,
};
use bulletin_smtp::client::envelope_address;
use serde::Deserialize;

use crate::config::PASSWORD_ENV;

/// Input and output locations for a run.
#[derive(Debug, Clone, Deserialize)]
pub struct Paths {
    #[serde(default = "default_template")]
    pub template: PathBuf,
    #[serde(default = "default_recipients")]
    pub recipients: PathBuf,
    #[serde(default = "default_suppression")]
    pub suppression: PathBuf,
    #[serde(default = "default_results_dir")]
    pub results_dir: PathBuf,
    #[serde(default = "default_log_file")]
    pub log_file: PathBuf,
}

impl Default for Paths {
    fn default() -> Self {
        Self {
            template: default_template(),
            recipients: default_recipients(),
            suppression: default_suppression(),
            results_dir: default_results_dir(),
            log_file: default_log_file(),
        }
    }
}

fn default_template() -> PathBuf {
    PathBuf::from("template.html")
}

fn default_recipients() -> PathBuf {
    PathBuf::from("recipients.csv")
}

fn default_suppression() -> PathBuf {
    PathBuf::from("recipients_blacklist.csv")
}

fn default_results_dir() -> PathBuf {
    PathBuf::from("results")
}

fn default_log_file() -> PathBuf {
    PathBuf::from("bulletin.log")
}

const fn default_stop_on_error() -> bool {
    true
}

/// Everything a run needs, as read from the configuration file.
#[derive(Debug, Clone, Deserialize)]
pub struct Bulletin {
    /// Halt the run on the first unclassified failure.
    ///
    /// Default: true
    #[serde(default = "default_stop_on_error")]
    pub stop_on_error: bool,
    #[serde(alias = "smtp")]
    pub relay: RelayConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    pub email: EmailConfig,
    #[serde(default)]
    pub paths: Paths,
    #[serde(default)]
    pub policy: DispatchPolicy,
}

impl Bulletin {
    /// Parses a TOML configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the document is not valid for this structure.
    pub fn from_toml(content: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Reads and parses the configuration file, then applies the password
    /// override from the environment.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;
        let mut bulletin = Self::from_toml(&content)
            .with_context(|| format!("Invalid config in {}", path.display()))?;
        bulletin.override_password(std::env::var(PASSWORD_ENV).ok());
        Ok(bulletin)
    }

    /// Replaces the configured relay password when `password` is set and
    /// non-empty.
    pub fn override_password(&mut self, password: Option<String>) {
        if let Some(password) = password.filter(|p| !p.is_empty()) {
            self.relay.password = password;
        }
    }

    /// Rejects settings that cannot produce a sensible run.
    ///
    /// # Errors
    ///
    /// Returns an error describing the first problem found.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.relay.host.trim().is_empty() {
            anyhow::bail!("relay.host must not be empty");
        }
        if self.rate_limit.emails_per_batch == 0 {
            anyhow::bail!("rate_limit.emails_per_batch must be at least 1");
        }
        let delay = self.rate_limit.delay_between_emails;
        if !delay.is_finite() || delay < 0.0 {
            anyhow::bail!("rate_limit.delay_between_emails must be a non-negative number");
        }
        if self.policy.max_attempts == 0 {
            anyhow::bail!("policy.max_attempts must be at least 1");
        }
        envelope_address(&self.email.from)
            .with_context(|| format!("email.from '{}' is not a usable sender", self.email.from))?;
        Ok(())
    }

    fn init_logging(&self) -> anyhow::Result<()> {
        logging::init(Some(&self.paths.log_file))
            .with_context(|| format!("Unable to open log file {}", self.paths.log_file.display()))
    }

    /// Loads the suppression list and checks the relay credentials without
    /// sending anything.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid, the suppression
    /// list is unreadable, or the relay check fails.
    pub async fn verify(self) -> anyhow::Result<()> {
        self.init_logging()?;
        self.validate()?;

        let suppression =
            SuppressionSet::load(&self.paths.suppression).map_err(DispatchError::Suppression)?;
        internal!(level = INFO, "{} suppressed addresses", suppression.len());

        SmtpRelay::new(self.relay.clone())
            .verify()
            .await
            .map_err(DispatchError::from_session)?;
        Ok(())
    }

    /// Runs this configuration against the configured relay.
    ///
    /// # Errors
    ///
    /// Returns an error for any failure that prevents or interrupts the run
    /// as a whole. Per-recipient failures are only recorded.
    pub async fn run(self) -> anyhow::Result<RunReport> {
        self.init_logging()?;
        let mut relay = SmtpRelay::new(self.relay.clone());
        self.run_with(&mut relay, &SystemClock).await
    }

    /// Runs this configuration against any relay and clock.
    ///
    /// # Errors
    ///
    /// See [`Self::run`].
    pub async fn run_with<R: Relay>(
        &self,
        relay: &mut R,
        clock: &dyn Clock,
    ) -> anyhow::Result<RunReport> {
        self.validate()?;
        internal!(level = INFO, "Starting newsletter run");
        tracing::info!(
            template = %self.paths.template.display(),
            recipients = %self.paths.recipients.display(),
            suppression = %self.paths.suppression.display(),
            stop_on_error = self.stop_on_error,
            "Run settings"
        );

        // Never send without the suppression list.
        let suppression =
            SuppressionSet::load(&self.paths.suppression).map_err(DispatchError::Suppression)?;

        relay.verify().await.map_err(DispatchError::from_session)?;

        let template =
            MessageTemplate::load(&self.paths.template).map_err(DispatchError::Template)?;
        let recipients =
            load_recipients(&self.paths.recipients).map_err(DispatchError::Recipients)?;
        internal!(level = INFO, "Found {} recipients to process", recipients.len());

        let started_at = chrono::Local::now();
        let mut recorder = OutcomeRecorder::create(&self.paths.results_dir, &started_at)
            .map_err(DispatchError::Recorder)?;

        relay.open().await.map_err(DispatchError::from_session)?;

        let mut counters = RunCounters::default();
        let result = Dispatcher::new(&suppression, &template, &self.email, clock)
            .with_rate_limit(self.rate_limit.clone())
            .with_policy(self.policy.clone())
            .with_stop_on_error(self.stop_on_error)
            .run(&recipients, relay, &mut recorder, &mut counters)
            .await;
        relay.close().await;

        let report = result?;
        log_report(&report, recorder.path());
        Ok(report)
    }
}

fn log_report(report: &RunReport, results: Option<&Path>) {
    let last = report.last_successful_email.as_deref().unwrap_or("none");

    match &report.outcome {
        RunOutcome::Completed => {
            tracing::info!(
                total_sent = report.total_sent,
                last_successful = last,
                "Newsletter run complete"
            );
        }
        RunOutcome::Aborted { email, detail } => {
            tracing::error!(
                failed = %email,
                %detail,
                total_sent = report.total_sent,
                last_successful = last,
                "Newsletter run stopped due to error"
            );
        }
    }

    for status in OutcomeStatus::ALL {
        let count = report.count(status);
        if count > 0 {
            internal!(level = INFO, "{}: {}", status, count);
        }
    }
    if let Some(path) = results {
        internal!(level = INFO, "Results saved to {}", path.display());
    }
}
