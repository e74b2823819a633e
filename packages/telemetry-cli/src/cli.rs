use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "telemetry",
    version,
    about = "Real-time sensor telemetry ingestion and decimation tool",
    long_about = "Ingest newline-delimited JSON sensor records into per-channel buffers,\n\
                  record, stream and plot one tapped channel, or inspect captures offline."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run a live ingest session from a file, TCP peer, command or stdin
    Ingest(IngestArgs),
    /// Read an NDJSON capture and summarize its channels
    Inspect(InspectArgs),
    /// Decimate a timestamp,value CSV series
    Decimate(DecimateArgs),
}

#[derive(Args)]
pub struct IngestArgs {
    /// JSON configuration file
    #[arg(long, env = "TELEMETRY_CONFIG")]
    pub config: Option<String>,

    /// Replay an NDJSON capture
    #[arg(long, conflicts_with_all = ["tcp", "command"])]
    pub file: Option<String>,

    /// Read NDJSON from a TCP peer (host:port)
    #[arg(long, conflicts_with = "command")]
    pub tcp: Option<String>,

    /// Read NDJSON from a command's stdout, e.g. "ssh pi python3 imu.py"
    #[arg(long)]
    pub command: Option<String>,

    /// Delay between replayed lines in milliseconds
    #[arg(long, requires = "file")]
    pub rate_limit_ms: Option<u64>,

    /// Start the replay over at end of file
    #[arg(long = "loop", requires = "file", default_value_t = false)]
    pub loop_playback: bool,

    /// Reconnect to the TCP peer after it disconnects
    #[arg(long, requires = "tcp", default_value_t = false)]
    pub reconnect: bool,

    /// Raw sensor rate in Hz
    #[arg(long)]
    pub sensor_fs: Option<f64>,

    /// Samples kept per channel
    #[arg(long)]
    pub buffer_capacity: Option<usize>,

    /// Channel fed to the pipeline as "sensor_id:channel" (e.g. "1:ax")
    #[arg(long)]
    pub tap: Option<String>,

    /// Samples per pipeline batch
    #[arg(long)]
    pub batch_size: Option<usize>,

    /// Record the tapped channel to this CSV file
    #[arg(long)]
    pub record: Option<String>,

    /// Recorder chunk length in seconds
    #[arg(long)]
    pub chunk_seconds: Option<f64>,

    /// Stream decimated payloads as JSON datagrams to host:port
    #[arg(long)]
    pub udp: Option<String>,

    /// Streamer output rate in Hz
    #[arg(long)]
    pub stream_fs: Option<f64>,

    /// Enable the plotter at this rate in Hz
    #[arg(long)]
    pub plot_fs: Option<f64>,

    /// Stop after this many seconds
    #[arg(long)]
    pub duration: Option<f64>,

    /// Seconds between progress lines on stderr (0 disables)
    #[arg(long, default_value_t = 5.0)]
    pub stats_interval: f64,

    /// Output file for the final summary (default: stdout)
    #[arg(short, long)]
    pub output: Option<String>,

    /// Compact JSON output (no indentation)
    #[arg(long, default_value_t = false)]
    pub compact: bool,

    /// Suppress progress messages on stderr
    #[arg(long, default_value_t = false)]
    pub quiet: bool,
}

#[derive(Args)]
pub struct InspectArgs {
    /// NDJSON capture to read
    #[arg(long)]
    pub file: String,

    /// Samples kept per channel
    #[arg(long, default_value_t = 6000)]
    pub buffer_capacity: usize,

    /// Only estimate the rate from this sensor
    #[arg(long)]
    pub rate_source: Option<String>,

    /// Output file (default: stdout)
    #[arg(short, long)]
    pub output: Option<String>,

    /// Compact JSON output (no indentation)
    #[arg(long, default_value_t = false)]
    pub compact: bool,
}

#[derive(Args)]
pub struct DecimateArgs {
    /// CSV file with a timestamp,value header
    #[arg(long)]
    pub file: String,

    /// Input rate in Hz
    #[arg(long, default_value_t = 100.0)]
    pub sensor_fs: f64,

    /// Output rate in Hz
    #[arg(long, default_value_t = 25.0)]
    pub plot_fs: f64,

    /// Include min/max per window
    #[arg(long, default_value_t = false)]
    pub envelope: bool,

    /// Window mode: block or sliding
    #[arg(long, default_value = "block")]
    pub mode: String,

    /// Sliding window advance in samples
    #[arg(long)]
    pub stride: Option<usize>,

    /// Single-pole smoothing factor in (0, 1]
    #[arg(long)]
    pub alpha: Option<f64>,

    /// Output file (default: stdout)
    #[arg(short, long)]
    pub output: Option<String>,

    /// Compact JSON output (no indentation)
    #[arg(long, default_value_t = false)]
    pub compact: bool,
}
