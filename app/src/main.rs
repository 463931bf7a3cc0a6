// dvlink handset -- runs the digital-voice handset against a networked
// radio, or the RF compliance self-test when strapped for it.
//
// Usage:
//   dvlink --radio icom --host 192.168.1.60 --username op --password secret
//   dvlink --radio flex --host 192.168.1.100
//   dvlink --compliance-test --run-for 30
//
// Logging is controlled by RUST_LOG (default `info`).

mod audio;
mod handset;
mod peripheral;
mod radio;
mod tone;

use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use dvlink::Dialect;
use dvlink::task::{BootStraps, OperatingMode, SequenceOutcome};

use crate::handset::{Handset, HandsetConfig};
use crate::radio::RadioOptions;

// ---------------------------------------------------------------------------
// CLI argument definitions
// ---------------------------------------------------------------------------

/// dvlink handset -- digital voice over a networked radio.
#[derive(Parser, Debug)]
#[command(name = "dvlink", version, about)]
struct Cli {
    /// Radio dialect: icom or flex.
    #[arg(long, default_value = "icom")]
    radio: Dialect,

    /// Radio host name or IP address. Required unless --compliance-test.
    #[arg(long)]
    host: Option<String>,

    /// Radio port. Defaults to the dialect's well-known port.
    #[arg(long)]
    port: Option<u16>,

    /// Login user name (icom only).
    #[arg(long, default_value = "")]
    username: String,

    /// Login password (icom only).
    #[arg(long, default_value = "", hide_default_value = true)]
    password: String,

    /// Boot strap: run the RF compliance self-test instead of normal mode.
    #[arg(long)]
    compliance_test: bool,

    /// Boot strap: ignore --port and use the default radio setup.
    #[arg(long)]
    override_network: bool,

    /// Track outbound audio packets for retransmission (icom only).
    #[arg(long)]
    reliable_audio: bool,

    /// Sleep and exit after this many seconds instead of waiting for Ctrl-C.
    #[arg(long, value_name = "SECS")]
    run_for: Option<u64>,
}

fn validate_options(cli: &Cli) -> Result<()> {
    if !cli.compliance_test && cli.host.is_none() {
        bail!("--host is required unless --compliance-test is set");
    }
    if cli.radio == Dialect::Flex {
        if !cli.username.is_empty() || !cli.password.is_empty() {
            bail!("--username/--password are only used by icom radios");
        }
        if cli.reliable_audio {
            bail!("--reliable-audio is only valid for icom radios");
        }
    }
    if cli.run_for == Some(0) {
        bail!("--run-for must be at least 1 second");
    }
    Ok(())
}

fn handset_config(cli: &Cli) -> HandsetConfig {
    let defaults = RadioOptions::default();
    HandsetConfig {
        radio: RadioOptions {
            dialect: cli.radio,
            host: cli.host.clone().unwrap_or(defaults.host.clone()),
            port: cli.port,
            username: cli.username.clone(),
            password: cli.password.clone(),
            reliable_audio: cli.reliable_audio,
            ..defaults
        },
        straps: BootStraps {
            override_network: cli.override_network,
            compliance_test: cli.compliance_test,
        },
    }
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn wait_for_exit(run_for: Option<u64>) -> Result<()> {
    match run_for {
        Some(secs) => {
            tokio::time::sleep(Duration::from_secs(secs)).await;
            Ok(())
        }
        None => tokio::signal::ctrl_c()
            .await
            .context("failed to listen for Ctrl-C"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging();
    validate_options(&cli)?;

    let handset = Handset::assemble(handset_config(&cli)).context("failed to assemble handset")?;
    if handset.mode() == OperatingMode::ComplianceTest {
        warn!("compliance test mode: transmitting test tones");
    }

    match handset.start().await.context("start sequence failed")? {
        SequenceOutcome::Completed => info!(link_up = handset.link_up(), "handset running"),
        SequenceOutcome::LowBattery => {
            warn!("battery low; shutting down");
            handset.shutdown().await;
            return Ok(());
        }
    }

    wait_for_exit(cli.run_for).await?;

    let slept = handset.sleep().await.context("sleep sequence failed");
    let played = *handset.playback().lock().unwrap_or_else(|e| e.into_inner());
    info!(
        user_frames = played.user_frames,
        radio_frames = played.radio_frames,
        failed_sequences = handset.power().failures().len(),
        "handset asleep"
    );
    handset.shutdown().await;
    slept
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("dvlink").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn host_required_outside_compliance() {
        assert!(validate_options(&parse(&[])).is_err());
        assert!(validate_options(&parse(&["--compliance-test"])).is_ok());
        assert!(validate_options(&parse(&["--host", "10.0.0.2"])).is_ok());
    }

    #[test]
    fn flex_rejects_icom_only_flags() {
        let cli = parse(&["--radio", "flex", "--host", "r", "--reliable-audio"]);
        assert!(validate_options(&cli).is_err());
        let cli = parse(&["--radio", "flex", "--host", "r", "--username", "op"]);
        assert!(validate_options(&cli).is_err());
    }

    #[test]
    fn unknown_dialect_is_rejected() {
        assert!(Cli::try_parse_from(["dvlink", "--radio", "yaesu"]).is_err());
    }

    #[test]
    fn config_carries_straps_and_radio() {
        let cli = parse(&[
            "--radio",
            "icom",
            "--host",
            "10.0.0.2",
            "--port",
            "40001",
            "--override-network",
            "--reliable-audio",
        ]);
        let config = handset_config(&cli);
        assert_eq!(config.radio.dialect, Dialect::Icom);
        assert_eq!(config.radio.host, "10.0.0.2");
        assert_eq!(config.radio.port, Some(40001));
        assert!(config.radio.reliable_audio);
        assert!(config.straps.override_network);
        assert!(!config.straps.compliance_test);
    }
}
