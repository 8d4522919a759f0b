// pinrec - level-triggered video recording on a Raspberry Pi
// Main library entry point

pub mod cli;
pub mod config;
pub mod devices;
pub mod encoding;
pub mod recording;

use anyhow::Context;
use clap::{CommandFactory, Parser};
use crossbeam_channel::Receiver;
use std::process::ExitCode;

use crate::cli::Args;
use crate::config::Config;
use crate::devices::{DigitalInput, VideoSink};
use crate::recording::{PollOutcome, PollSettings, RecordingSession, SessionError};

/// Parse the command line, record once, and report how it went
pub fn run() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    match record(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn record(args: Args) -> anyhow::Result<()> {
    let config_path = args.config_path();
    let mut file = Config::load_or_default(&config_path);

    if args.save_config {
        args.apply_to(&mut file);
        file.save(&config_path)
            .with_context(|| format!("Failed to save {}", config_path.display()))?;
        log::info!("Saved defaults to {}", config_path.display());
        return Ok(());
    }

    // Bad file values are reported like bad flags
    let config = match args.into_config(&file) {
        Ok(config) => config,
        Err(e) => Args::command()
            .error(clap::error::ErrorKind::ValueValidation, e)
            .exit(),
    };

    let mut session = RecordingSession::open(
        config.pin,
        Some(config.target_path()),
        config.resolution,
        config.camera.clone(),
    )
    .context("Failed to open recording session")?;

    let (interrupt_tx, interrupt_rx) = crossbeam_channel::bounded::<()>(1);
    ctrlc::set_handler(move || {
        let _ = interrupt_tx.try_send(());
    })
    .context("Failed to install interrupt handler")?;

    if let Some(outcome) = drive(&mut session, config.poll_settings(), &interrupt_rx)? {
        log::info!("Recording finished: {:?}", outcome);
    }
    Ok(())
}

/// Run one polling task until it ends or an interrupt arrives, then close.
///
/// Shutdown always waits for the task, so capture is stopped before the
/// devices are released.
fn drive<S: VideoSink, I: DigitalInput>(
    session: &mut RecordingSession<S, I>,
    settings: PollSettings,
    interrupt: &Receiver<()>,
) -> Result<Option<PollOutcome>, SessionError> {
    let handle = session.start_with(settings)?;

    let outcome = crossbeam_channel::select! {
        recv(handle.receiver()) -> _ => session.wait(None),
        recv(interrupt) -> _ => {
            log::info!("Interrupted, stopping");
            session.stop(None)
        }
    };

    let closed = session.close();
    let outcome = outcome?;
    closed?;
    Ok(outcome)
}
