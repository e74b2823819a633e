use crate::cli::DecimateArgs;
use crate::exit_codes;
use crate::output;
use serde::Serialize;
use telemetry_core::{DecimatedBlock, DecimationConfig, Decimator, WindowMode};

#[derive(Serialize)]
struct DecimateOutput {
    file: String,
    sensor_fs: f64,
    plot_fs: f64,
    mode: WindowMode,
    decimation_factor: usize,
    stride: usize,
    input_samples: usize,
    output_samples: usize,
    /// Samples left in the last incomplete window
    pending_samples: usize,
    #[serde(flatten)]
    block: DecimatedBlock,
}

fn read_series(path: &str) -> Result<(Vec<f64>, Vec<f64>), String> {
    let mut reader = csv::Reader::from_path(path)
        .map_err(|e| format!("Failed to open '{}': {}", path, e))?;

    let mut timestamps = Vec::new();
    let mut values = Vec::new();
    for (row, record) in reader.deserialize::<(f64, f64)>().enumerate() {
        let (timestamp, value) =
            record.map_err(|e| format!("{}: bad row {}: {}", path, row + 1, e))?;
        timestamps.push(timestamp);
        values.push(value);
    }
    Ok((timestamps, values))
}

pub fn execute(args: DecimateArgs) -> i32 {
    let mode: WindowMode = match args.mode.parse() {
        Ok(mode) => mode,
        Err(e) => {
            eprintln!("Error: {}", e);
            return exit_codes::INPUT_ERROR;
        }
    };

    let config = DecimationConfig {
        use_envelope: args.envelope,
        window_mode: mode,
        smoothing_alpha: args.alpha,
        stride: args.stride,
        ..DecimationConfig::new(args.sensor_fs, args.plot_fs)
    };
    let mut decimator = match Decimator::new(config) {
        Ok(decimator) => decimator,
        Err(e) => {
            eprintln!("Error: {}", e);
            return exit_codes::INPUT_ERROR;
        }
    };

    let (timestamps, values) = match read_series(&args.file) {
        Ok(series) => series,
        Err(msg) => {
            eprintln!("Error: {}", msg);
            return exit_codes::INPUT_ERROR;
        }
    };

    let block = match decimator.process_timed(&timestamps, &values) {
        Ok(block) => block,
        Err(e) => {
            eprintln!("Error: {}", e);
            return exit_codes::EXECUTION_ERROR;
        }
    };
    log::info!(
        "Decimated {} samples into {} windows (D={})",
        values.len(),
        block.len(),
        decimator.decimation_factor()
    );

    let result = DecimateOutput {
        file: args.file.clone(),
        sensor_fs: args.sensor_fs,
        plot_fs: args.plot_fs,
        mode,
        decimation_factor: decimator.decimation_factor(),
        stride: decimator.stride(),
        input_samples: values.len(),
        output_samples: block.len(),
        pending_samples: decimator.pending(),
        block,
    };

    output::emit(&result, args.compact, args.output.as_deref())
}
