use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use mpegts_tracer::inspector::{analyze, Options};
use mpegts_tracer::{AnalyzerConfig, ReportScope, TimeBase};

#[derive(Parser)]
#[clap(about = "MPEG-TS structure and TR 101 290 analysis")]
struct Opt {
    /// Transport stream file; `-` reads standard input
    #[clap(default_value = "-")]
    input: PathBuf,

    /// JSON analyzer configuration
    #[clap(long)]
    config: Option<PathBuf>,

    /// Nominal mux bitrate (bit/s); derives stream time from packet positions
    #[clap(long)]
    bitrate: Option<u64>,

    /// Highest TR 101 290 priority reported (1, 2 or 3)
    #[clap(long, default_value_t = 3, value_parser = clap::value_parser!(u8).range(1..=3))]
    max_priority: u8,

    /// Skip the DVB SI table checks
    #[clap(long, default_value_t = false)]
    no_dvb_si: bool,

    /// Debug logging (RUST_LOG still wins)
    #[clap(short, long)]
    verbose: bool,
}

fn main() -> anyhow::Result<()> {
    let opt = Opt::parse();

    let default_level = if opt.verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level)).init();

    let mut config = match &opt.config {
        Some(path) => AnalyzerConfig::from_json_file(path)?,
        None => AnalyzerConfig::default(),
    };
    if let Some(bps) = opt.bitrate {
        config.time_base = TimeBase::Bitrate { bits_per_second: bps };
    }
    if opt.no_dvb_si {
        config.dvb_si_checks = false;
    }
    let options = Options {
        config,
        scope: ReportScope { max_priority: opt.max_priority, nominal_bitrate_bps: opt.bitrate },
    };

    let reader: Box<dyn Read> = if opt.input.as_os_str() == "-" {
        Box::new(io::stdin().lock())
    } else {
        let file = File::open(&opt.input).with_context(|| format!("opening {}", opt.input.display()))?;
        Box::new(BufReader::new(file))
    };

    let report = analyze(reader, &options).context("analysis failed")?;
    println!("{}", report.to_json_pretty().context("serializing report")?);
    Ok(())
}
