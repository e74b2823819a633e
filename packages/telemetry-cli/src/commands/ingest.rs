use crate::cli::IngestArgs;
use crate::commands::parse_source_id;
use crate::exit_codes;
use crate::output;
use serde::Serialize;
use std::time::{Duration, Instant};
use telemetry_core::{
    create_source, IngestSession, LineSourceConfig, PlotUpdate, SessionStats, SourceMetadata,
    StreamState, TapConfig, TelemetryConfig, WriterConfig,
};

const POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Serialize)]
struct IngestOutput {
    source: Option<SourceMetadata>,
    stats: SessionStats,
    latest_plot: Option<PlotUpdate>,
}

fn parse_tap(raw: &str) -> Result<(String, String), String> {
    match raw.split_once(':') {
        Some((id, channel)) if !id.trim().is_empty() && !channel.trim().is_empty() => {
            Ok((id.trim().to_string(), channel.trim().to_string()))
        }
        _ => Err(format!(
            "Invalid --tap '{}', expected sensor_id:channel (e.g. 1:ax)",
            raw
        )),
    }
}

fn parse_host_port(raw: &str) -> Result<(String, u16), String> {
    let (host, port) = raw
        .rsplit_once(':')
        .ok_or_else(|| format!("Invalid --tcp '{}', expected host:port", raw))?;
    let port = port
        .parse()
        .map_err(|_| format!("Invalid port in --tcp '{}'", raw))?;
    Ok((host.to_string(), port))
}

/// Layer the config file, `TELEMETRY_*` variables and flags, in that order
fn build_config(args: &IngestArgs) -> Result<TelemetryConfig, String> {
    let mut config = match &args.config {
        Some(path) => TelemetryConfig::from_file(path).map_err(|e| e.to_string())?,
        None => TelemetryConfig::default(),
    };
    config.apply_env().map_err(|e| e.to_string())?;

    if let Some(path) = &args.file {
        config.source = LineSourceConfig::File {
            path: path.into(),
            rate_limit_ms: args.rate_limit_ms,
            loop_playback: args.loop_playback,
        };
    } else if let Some(addr) = &args.tcp {
        let (host, port) = parse_host_port(addr)?;
        config.source = LineSourceConfig::Tcp {
            host,
            port,
            reconnect: args.reconnect,
        };
    } else if let Some(command) = &args.command {
        let mut parts = command.split_whitespace().map(String::from);
        let program = parts.next().ok_or("--command is empty")?;
        config.source = LineSourceConfig::Command {
            program,
            args: parts.collect(),
        };
    }

    if let Some(fs) = args.sensor_fs {
        config.pipeline.sensor_fs = fs;
    }
    if let Some(capacity) = args.buffer_capacity {
        config.session.buffer_capacity = capacity;
    }
    if let Some(raw) = &args.tap {
        let (id, channel) = parse_tap(raw)?;
        let batch_size = config.session.tap.as_ref().map_or(32, |tap| tap.batch_size);
        config.session.tap = Some(TapConfig {
            source_id: parse_source_id(&id),
            channel,
            batch_size,
        });
    }
    if let Some(batch_size) = args.batch_size {
        let tap = config
            .session
            .tap
            .as_mut()
            .ok_or("--batch-size needs a tapped channel (--tap)")?;
        tap.batch_size = batch_size;
    }

    if let Some(path) = &args.record {
        config.pipeline.recorder.enabled = true;
        config.pipeline.recorder.output = Some(WriterConfig::Csv { path: path.into() });
    }
    if let Some(seconds) = args.chunk_seconds {
        config.pipeline.recorder.chunk_seconds = seconds;
    }
    if let Some(target) = &args.udp {
        config.pipeline.streamer.enabled = true;
        config.pipeline.streamer.udp_target = Some(target.clone());
    }
    if let Some(fs) = args.stream_fs {
        config.pipeline.streamer.stream_fs = fs;
    }
    if let Some(fs) = args.plot_fs {
        config.pipeline.plotter.enabled = true;
        config.pipeline.plotter.plot_fs = fs;
    }

    config.validate().map_err(|e| e.to_string())?;
    Ok(config)
}

fn progress_line(stats: &SessionStats) -> String {
    format!(
        "[{:>7.1}s] {} lines, {} samples, {} channels, {} malformed, {:.1} Hz ({})",
        stats.uptime_seconds.unwrap_or(0.0),
        stats.ingest.lines_read,
        stats.ingest.samples_appended,
        stats.channels,
        stats.ingest.malformed_lines,
        stats.rate.hz_effective,
        stats.rate.quality.as_str()
    )
}

/// Poll until the input ends, the duration elapses or Ctrl-C arrives
async fn supervise(session: &mut IngestSession, args: &IngestArgs) {
    let started = Instant::now();
    let deadline = args
        .duration
        .filter(|s| s.is_finite() && *s > 0.0)
        .map(|s| started + Duration::from_secs_f64(s));
    let report_every = (args.stats_interval.is_finite() && args.stats_interval > 0.0 && !args.quiet)
        .then(|| Duration::from_secs_f64(args.stats_interval));
    let mut last_report = started;

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut ticker = tokio::time::interval(POLL_INTERVAL);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = &mut ctrl_c => {
                log::info!("Interrupted, stopping session");
                break;
            }
        }

        if !session.is_running() {
            break;
        }
        if deadline.is_some_and(|d| Instant::now() >= d) {
            log::info!("Duration reached, stopping session");
            break;
        }
        if let Some(every) = report_every {
            if last_report.elapsed() >= every {
                eprintln!("{}", progress_line(&session.stats()));
                last_report = Instant::now();
            }
        }
    }

    if session.is_running() {
        if let Err(e) = session.stop().await {
            log::error!("Failed to stop source cleanly: {}", e);
        }
    }
    session.wait().await;
}

pub async fn execute(args: IngestArgs) -> i32 {
    let config = match build_config(&args) {
        Ok(config) => config,
        Err(msg) => {
            eprintln!("Error: {}", msg);
            return exit_codes::INPUT_ERROR;
        }
    };

    let mut session = match config.build_session() {
        Ok(session) => session,
        Err(e) => {
            eprintln!("Error: {}", e);
            return exit_codes::INPUT_ERROR;
        }
    };

    let source = match create_source(config.source.clone()) {
        Ok(source) => source,
        Err(e) => {
            eprintln!("Error: {}", e);
            return exit_codes::INPUT_ERROR;
        }
    };

    if let Err(e) = session.start(source).await {
        eprintln!("Error: {}", e);
        return exit_codes::SOURCE_ERROR;
    }
    if !args.quiet {
        eprintln!("Session {} started", session.id);
    }

    supervise(&mut session, &args).await;

    let stats = session.stats();
    if !args.quiet {
        eprintln!("{}", progress_line(&stats));
    }
    let failed = matches!(stats.state, StreamState::Error { .. });

    let result = IngestOutput {
        source: session.source_metadata().await,
        latest_plot: session.latest_update(),
        stats,
    };
    let code = output::emit(&result, args.compact, args.output.as_deref());

    if failed {
        if let StreamState::Error { message } = session.state() {
            eprintln!("Error: {}", message);
        }
        return exit_codes::EXECUTION_ERROR;
    }
    code
}
