use crate::cli::InspectArgs;
use crate::commands::parse_source_id;
use crate::exit_codes;
use crate::output;
use serde::Serialize;
use std::fs::File;
use std::io::BufReader;
use std::sync::atomic::AtomicBool;
use telemetry_core::{
    run_reader, ChannelSnapshot, IngestStats, Ingestor, RateConfig, RateEstimate, ReaderExit,
    SourceId,
};

#[derive(Serialize)]
struct ChannelSummary {
    source_id: SourceId,
    channel: String,
    samples: usize,
    first_timestamp: Option<f64>,
    latest_timestamp: Option<f64>,
    latest_value: Option<f64>,
    min: Option<f64>,
    max: Option<f64>,
    mean: Option<f64>,
}

impl From<ChannelSnapshot> for ChannelSummary {
    fn from(snapshot: ChannelSnapshot) -> Self {
        let values = &snapshot.values;
        let mean = if values.is_empty() {
            None
        } else {
            Some(values.iter().sum::<f64>() / values.len() as f64)
        };
        Self {
            samples: values.len(),
            first_timestamp: snapshot.timestamps.first().copied(),
            latest_timestamp: snapshot.timestamps.last().copied(),
            latest_value: values.last().copied(),
            min: values.iter().copied().reduce(f64::min),
            max: values.iter().copied().reduce(f64::max),
            mean,
            source_id: snapshot.key.source_id,
            channel: snapshot.key.channel,
        }
    }
}

#[derive(Serialize)]
struct InspectOutput {
    file: String,
    exit: ReaderExit,
    stats: IngestStats,
    rate: RateEstimate,
    channels: Vec<ChannelSummary>,
}

pub fn execute(args: InspectArgs) -> i32 {
    let file = match File::open(&args.file) {
        Ok(file) => file,
        Err(e) => {
            eprintln!("Error: Failed to open '{}': {}", args.file, e);
            return exit_codes::INPUT_ERROR;
        }
    };

    let mut ingestor = match Ingestor::standalone(args.buffer_capacity, RateConfig::default()) {
        Ok(ingestor) => ingestor.with_rate_source(args.rate_source.as_deref().map(parse_source_id)),
        Err(e) => {
            eprintln!("Error: {}", e);
            return exit_codes::INPUT_ERROR;
        }
    };

    let stop = AtomicBool::new(false);
    let exit = match run_reader(BufReader::new(file), &mut ingestor, &stop) {
        Ok(exit) => exit,
        Err(e) => {
            eprintln!("Error: Failed to read '{}': {}", args.file, e);
            return exit_codes::EXECUTION_ERROR;
        }
    };

    let result = InspectOutput {
        file: args.file.clone(),
        exit,
        stats: ingestor.stats(),
        rate: ingestor.effective_rate(),
        channels: ingestor
            .store()
            .snapshot()
            .into_iter()
            .map(ChannelSummary::from)
            .collect(),
    };

    output::emit(&result, args.compact, args.output.as_deref())
}
