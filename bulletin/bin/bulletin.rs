//! Sends the configured newsletter to every recipient in the list.

#[cfg(not(any(target_os = "macos", unix)))]
compile_error!("Only macos and unix are currently supported");

use std::{path::PathBuf, process::ExitCode};

use bulletin::{Bulletin, config::find_config_file};
use clap::Parser;

/// Send a newsletter through an authenticated SMTP relay
#[derive(Parser, Debug)]
#[command(name = "bulletin")]
#[command(about = "Send a newsletter through an authenticated SMTP relay", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Message template, overriding `paths.template`
    #[arg(short, long)]
    template: Option<PathBuf>,

    /// Recipient list, overriding `paths.recipients`
    #[arg(short, long)]
    recipients: Option<PathBuf>,

    /// Suppression list, overriding `paths.suppression`
    #[arg(short, long)]
    suppression: Option<PathBuf>,

    /// Directory for the results file, overriding `paths.results_dir`
    #[arg(long)]
    results_dir: Option<PathBuf>,

    /// Record unclassified failures and keep going instead of stopping
    #[arg(long)]
    continue_on_error: bool,

    /// Check the suppression list and relay credentials, then exit
    #[arg(long)]
    verify_only: bool,
}

impl Cli {
    fn apply(self, bulletin: &mut Bulletin) {
        if let Some(template) = self.template {
            bulletin.paths.template = template;
        }
        if let Some(recipients) = self.recipients {
            bulletin.paths.recipients = recipients;
        }
        if let Some(suppression) = self.suppression {
            bulletin.paths.suppression = suppression;
        }
        if let Some(results_dir) = self.results_dir {
            bulletin.paths.results_dir = results_dir;
        }
        if self.continue_on_error {
            bulletin.stop_on_error = false;
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    let config_path = find_config_file(cli.config.as_deref())?;
    let mut bulletin = Bulletin::load(&config_path)?;
    let verify_only = cli.verify_only;
    cli.apply(&mut bulletin);

    if verify_only {
        bulletin.verify().await?;
        println!("Relay connection and credentials verified");
        return Ok(ExitCode::SUCCESS);
    }

    let report = bulletin.run().await?;
    if report.is_aborted() {
        return Ok(ExitCode::from(2));
    }

    Ok(ExitCode::SUCCESS)
}
