use std::io::{self, BufRead, Write};

use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use vecmath_offload::config::{MachineConfig, OffloadConfig, DEFAULT_GROUP_PRIORITY, DEFAULT_PHYSICAL_UNITS};
use vecmath_offload::coproc::Machine;
use vecmath_offload::offload::{OffloadStatus, Orchestrator};
use vecmath_offload::report;

#[derive(Parser, Debug)]
#[command(
    name = "vecmath-offload",
    about = "Offload a squared-sum/magnitude computation to a simulated vector co-processor."
)]
struct Args {
    /// Input vector: four comma-separated floats
    #[arg(long, value_name = "A,B,C,D", value_parser = parse_vector, default_value = "1,2,3,4")]
    input: [f32; 4],

    /// Execution units to reserve when initializing the subsystem
    #[arg(long, value_name = "N", default_value_t = DEFAULT_PHYSICAL_UNITS)]
    units: usize,

    /// Thread group priority (16 = highest, 255 = lowest)
    #[arg(long, value_name = "PRIORITY", default_value_t = DEFAULT_GROUP_PRIORITY)]
    priority: u32,

    /// Keep re-rendering the result panel until `x`, `q` or end of input
    #[arg(long, action = clap::ArgAction::SetTrue)]
    interactive: bool,

    /// Log filter used when RUST_LOG is not set
    #[arg(long, value_name = "FILTER", default_value = "info")]
    log_level: String,
}

fn parse_vector(s: &str) -> Result<[f32; 4], String> {
    let values = s
        .split(',')
        .map(|part| part.trim().parse::<f32>().map_err(|e| format!("`{part}`: {e}")))
        .collect::<Result<Vec<f32>, String>>()?;
    <[f32; 4]>::try_from(values.as_slice())
        .map_err(|_| format!("expected 4 comma-separated values, got {}", values.len()))
}

fn init_tracing(fallback: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn run_offload(args: &Args) -> (OffloadStatus, Option<String>) {
    let machine = match Machine::new(MachineConfig::default()) {
        Ok(machine) => machine,
        Err(e) => return (OffloadStatus::Unavailable(e.to_string()), None),
    };
    let config = OffloadConfig::default()
        .with_units(args.units)
        .with_priority(args.priority);

    match Orchestrator::new(machine, config).run(args.input) {
        Ok(completion) => {
            let exit = report::render_exit(&completion.exit);
            (OffloadStatus::from(Ok(completion)), Some(exit))
        }
        Err(e) => {
            warn!(error = %e, "offload failed");
            (OffloadStatus::Unavailable(e.to_string()), None)
        }
    }
}

fn print_summary(status: &OffloadStatus, exit: Option<&str>) {
    let mut out = io::stdout().lock();
    if let Some(exit) = exit {
        let _ = writeln!(out, "{exit}");
    }
    let _ = write!(out, "{}", report::render_panel(status));
    if let Some(result) = status.result() {
        let _ = writeln!(out, "{}", report::render_verification(result));
    }
}

fn interactive(status: &OffloadStatus) {
    let stdin = io::stdin();
    let mut frame: u64 = 0;
    println!("{}", report::render_frame(status, frame));
    for line in stdin.lock().lines() {
        let Ok(line) = line else { break };
        if matches!(line.trim(), "x" | "q") {
            break;
        }
        frame += 1;
        println!("{}", report::render_frame(status, frame));
    }
    info!(frames = frame + 1, "exit requested");
}

fn main() {
    let args = Args::parse();
    init_tracing(&args.log_level);

    let (status, exit) = run_offload(&args);
    print_summary(&status, exit.as_deref());

    if args.interactive {
        interactive(&status);
    }
}
