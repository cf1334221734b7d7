use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use live_effect::audio::{ChannelStats, PeriodTapReader, DEFAULT_TAP_FRAMES};
use live_effect::hal::{CallbackResult, Direction, HalError, SimulatedHost};
use live_effect::{ConfigOptions, DuplexEngine, EngineHandle, StatusCode, StreamState};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;

#[derive(Parser, Debug)]
#[command(
    name = "live_effect",
    about = "Low-latency microphone to speaker pass-through"
)]
struct Cli {
    /// JSON file with engine options (camelCase keys, missing keys default)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the live pass-through on the default audio host
    Run {
        /// Seconds to run; 0 runs until Ctrl-C
        #[arg(long, default_value_t = 10)]
        seconds: u64,
        /// Record captured periods to a WAV file
        #[arg(long)]
        record: Option<PathBuf>,
    },
    /// List audio devices and the ids accepted by recordDeviceId/playbackDeviceId
    Devices,
    /// Drive the engine against the simulated host and print a JSON report
    Simulate {
        #[arg(long, default_value_t = 50)]
        periods: u32,
        #[arg(long, default_value_t = 7)]
        seed: u64,
        /// Unplug the input after this many periods and recover
        #[arg(long)]
        disconnect_after: Option<u32>,
    },
}

fn main() -> ExitCode {
    live_effect::init_logging();
    match run() {
        Ok(code) => code,
        Err(err) => {
            eprintln!("Error: {err:?}");
            ExitCode::from(1)
        }
    }
}

fn run() -> Result<ExitCode> {
    let cli = Cli::parse();
    let options = cli
        .config
        .as_deref()
        .map(ConfigOptions::load_from_file)
        .unwrap_or_default();

    match cli.command {
        Commands::Run { seconds, record } => run_live(&options, seconds, record),
        Commands::Devices => run_devices(),
        Commands::Simulate {
            periods,
            seed,
            disconnect_after,
        } => run_simulate(&options, periods, seed, disconnect_after),
    }
}

fn check_status(status: StatusCode, what: &str) -> Result<()> {
    if !status.is_ok() {
        bail!("{} failed with status {:?} ({})", what, status, status.as_i32());
    }
    Ok(())
}

/// Writes captured periods from the tap to a WAV file.
struct WavRecorder {
    writer: hound::WavWriter<BufWriter<File>>,
    reader: PeriodTapReader,
}

impl WavRecorder {
    fn create(path: &Path, sample_rate: u32, channels: u16, reader: PeriodTapReader) -> Result<Self> {
        let spec = hound::WavSpec {
            channels,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let writer = hound::WavWriter::create(path, spec)
            .with_context(|| format!("creating {}", path.display()))?;
        Ok(Self { writer, reader })
    }

    fn drain(&mut self) -> Result<usize> {
        let writer = &mut self.writer;
        let mut failure = None;
        let drained = self.reader.drain(Direction::Input, |frame| {
            if failure.is_some() {
                return;
            }
            for &sample in &frame.samples {
                if let Err(err) = writer.write_sample(sample) {
                    failure = Some(err);
                    return;
                }
            }
        });
        match failure {
            Some(err) => Err(err).context("writing WAV samples"),
            None => Ok(drained),
        }
    }

    fn finish(mut self) -> Result<()> {
        self.drain()?;
        self.writer.finalize().context("finalizing WAV file")
    }
}

fn run_live(options: &ConfigOptions, seconds: u64, record: Option<PathBuf>) -> Result<ExitCode> {
    let handle = EngineHandle::create();
    check_status(handle.setup_parameters(options), "setup_parameters")?;

    let config = handle.engine().config();
    let mut recorder = match record {
        Some(path) => {
            let reader = handle.attach_tap(DEFAULT_TAP_FRAMES);
            Some(WavRecorder::create(
                &path,
                config.sample_rate,
                config.channel_count,
                reader,
            )?)
        }
        None => None,
    };

    let notices = handle.subscribe();
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(1)
        .enable_all()
        .build()
        .context("building tokio runtime")?;

    runtime.block_on(async move {
        let printer = tokio::spawn(async move {
            let mut stream = BroadcastStream::new(notices);
            while let Some(item) = stream.next().await {
                match item {
                    Ok(notice) => match serde_json::to_string(&notice) {
                        Ok(line) => println!("{}", line),
                        Err(err) => log::warn!("Failed to encode notice: {}", err),
                    },
                    Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                        log::warn!("Notice printer lagged, {} notices skipped", skipped);
                    }
                }
            }
        });

        check_status(handle.start_audio(), "start_audio")?;
        log::info!(
            "Pass-through running on '{}' ({} Hz, {} ms periods)",
            handle.engine().host_name(),
            config.sample_rate,
            config.period_ms
        );

        let deadline = async {
            if seconds == 0 {
                std::future::pending::<()>().await
            } else {
                tokio::time::sleep(Duration::from_secs(seconds)).await
            }
        };
        tokio::pin!(deadline);
        let ctrl_c = tokio::signal::ctrl_c();
        tokio::pin!(ctrl_c);
        let mut ticker = tokio::time::interval(Duration::from_millis(u64::from(config.period_ms)));

        loop {
            tokio::select! {
                _ = &mut deadline => break,
                _ = &mut ctrl_c => {
                    log::info!("Interrupted");
                    break;
                }
                _ = ticker.tick() => {
                    if let Some(recorder) = recorder.as_mut() {
                        recorder.drain()?;
                    }
                }
            }
        }

        let status = handle.release();
        if let Some(recorder) = recorder.take() {
            recorder.finish()?;
        }
        let _ = printer.await;
        check_status(status, "release")?;
        Ok::<_, anyhow::Error>(())
    })?;

    Ok(ExitCode::from(0))
}

#[cfg(not(target_os = "android"))]
fn run_devices() -> Result<ExitCode> {
    let host = live_effect::hal::CpalHost::new();
    let devices = host
        .list_devices()
        .map_err(|err| anyhow::anyhow!("listing devices: {}", err))?;
    if devices.is_empty() {
        println!("No audio devices found");
    }
    for device in devices {
        println!("{}", serde_json::to_string(&device)?);
    }
    Ok(ExitCode::from(0))
}

#[cfg(target_os = "android")]
fn run_devices() -> Result<ExitCode> {
    bail!("device listing is only available on desktop hosts")
}

#[derive(Debug, Serialize)]
struct SimulationReport {
    sample_rate: u32,
    frames_per_period: u32,
    bytes_per_period: usize,
    periods: u32,
    matched: u32,
    mismatched: u32,
    disconnected_at: Option<u32>,
    input_state: StreamState,
    output_state: StreamState,
    channel: Option<ChannelStats>,
}

fn run_simulate(
    options: &ConfigOptions,
    periods: u32,
    seed: u64,
    disconnect_after: Option<u32>,
) -> Result<ExitCode> {
    let host = SimulatedHost::new();
    let engine = DuplexEngine::builder(Arc::new(host.clone()))
        .manual_recovery()
        .build();
    let handle = EngineHandle::from_engine(engine);
    check_status(handle.setup_parameters(options), "setup_parameters")?;
    check_status(handle.start_audio(), "start_audio")?;

    let layout = handle.engine().config().layout();
    let mut rng = StdRng::seed_from_u64(seed);
    let mut captured = vec![0_i16; layout.period_samples()];
    let mut played = vec![0_i16; layout.period_samples()];
    let mut matched = 0;
    let mut mismatched = 0;
    let mut disconnected_at = None;

    for period in 0..periods {
        if disconnect_after == Some(period) {
            host.disconnect(Direction::Input, HalError::Disconnected);
            handle.engine().process_pending_events();
            disconnected_at = Some(period);
        }

        rng.fill(captured.as_mut_slice());
        if host.pump_input(&captured) != Some(CallbackResult::Continue) {
            mismatched += 1;
            continue;
        }
        played.fill(0);
        host.pump_output(&mut played);
        if played == captured {
            matched += 1;
        } else {
            mismatched += 1;
        }
    }

    let report = SimulationReport {
        sample_rate: layout.sample_rate,
        frames_per_period: layout.frames_per_period,
        bytes_per_period: layout.period_bytes(),
        periods,
        matched,
        mismatched,
        disconnected_at,
        input_state: handle.stream_state(Direction::Input),
        output_state: handle.stream_state(Direction::Output),
        channel: handle.engine().channel_stats(),
    };
    println!("{}", serde_json::to_string_pretty(&report)?);

    check_status(handle.release(), "release")?;
    Ok(ExitCode::from(if mismatched == 0 { 0 } else { 2 }))
}
