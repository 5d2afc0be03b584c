use std::fs::File;
use std::io::{BufWriter, Write};
use std::process;
use std::str::FromStr;

use tracing::info;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use respcast::config::SimulationConfig;
use respcast::error::Result;
use respcast::monte_carlo::OccupancyForecast;
use respcast::pipeline::ForecastPlan;
use respcast::simulation::{Series, Simulation};
use respcast::snapshot::ModelSnapshot;
use respcast::types::AgeCohort;

#[derive(Debug, Default)]
struct Args {
    config: Option<String>,
    runs: Option<usize>,
    seed: Option<u64>,
    threads: Option<usize>,
    drain_days: Option<u32>,
    output: Option<String>,
    events: Option<String>,
    write_snapshot: Option<String>,
    json: bool,
    quiet: bool,
    verbose: bool,
}

fn parse_args() -> Args {
    let args: Vec<String> = std::env::args().collect();
    let mut parsed = Args::default();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--config" => parsed.config = Some(value(&args, &mut i)),
            "--runs" => parsed.runs = Some(value(&args, &mut i)),
            "--seed" => parsed.seed = Some(value(&args, &mut i)),
            "--threads" => parsed.threads = Some(value(&args, &mut i)),
            "--drain-days" => parsed.drain_days = Some(value(&args, &mut i)),
            "--output" => parsed.output = Some(value(&args, &mut i)),
            "--events" => parsed.events = Some(value(&args, &mut i)),
            "--write-snapshot" => parsed.write_snapshot = Some(value(&args, &mut i)),
            "--json" => parsed.json = true,
            "--quiet" => parsed.quiet = true,
            "--verbose" => parsed.verbose = true,
            "--help" | "-h" => {
                print_usage();
                process::exit(0);
            }
            other => {
                eprintln!("error: unknown argument {other}");
                print_usage();
                process::exit(2);
            }
        }
        i += 1;
    }
    parsed
}

/// Parse the value following the flag at `args[*i]`, advancing `i` past it.
fn value<T: FromStr>(args: &[String], i: &mut usize) -> T {
    let flag = &args[*i];
    *i += 1;
    let Some(raw) = args.get(*i) else {
        eprintln!("error: {flag} requires a value");
        process::exit(2);
    };
    raw.parse().unwrap_or_else(|_| {
        eprintln!("error: invalid value for {flag}: {raw}");
        process::exit(2);
    })
}

fn print_usage() {
    eprintln!(
        "usage: respcast [--config snapshot.json] [--runs N] [--seed S] [--threads N]\n\
         \x20               [--drain-days N] [--output bands.csv] [--events events.ndjson]\n\
         \x20               [--write-snapshot out.json] [--json] [--quiet] [--verbose]"
    );
}

fn init_tracing(verbose: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if verbose { "debug" } else { "info" }));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn main() {
    let args = parse_args();
    init_tracing(args.verbose);
    if let Err(e) = run(&args) {
        eprintln!("error: {e}");
        process::exit(1);
    }
}

fn run(args: &Args) -> Result<()> {
    let mut snapshot = match &args.config {
        Some(path) => {
            info!(path = %path, "loading snapshot");
            ModelSnapshot::read_from(path)?
        }
        None => ModelSnapshot::canonical()?,
    };
    apply_overrides(args, &mut snapshot.simulation);
    let plan = ForecastPlan::from_snapshot(snapshot)?;

    if let Some(path) = &args.write_snapshot {
        plan.snapshot().write_to(path)?;
        info!(path = %path, "snapshot written");
    }

    if let Some(path) = &args.events {
        write_event_log(&plan, path)?;
    }

    let forecast = plan.run()?;

    if let Some(path) = &args.output {
        write_bands_csv(&forecast, path)?;
        info!(path = %path, rows = forecast.days.len(), "quantile bands written");
    }

    if args.json {
        let stdout = std::io::stdout();
        let mut out = stdout.lock();
        serde_json::to_writer_pretty(&mut out, &forecast)?;
        writeln!(out)?;
    } else if !args.quiet {
        print_forecast(plan.snapshot(), &forecast);
    }
    Ok(())
}

fn apply_overrides(args: &Args, config: &mut SimulationConfig) {
    if let Some(n) = args.runs {
        config.n_runs = n;
    }
    if let Some(seed) = args.seed {
        config.base_seed = seed;
    }
    if args.threads.is_some() {
        config.threads = args.threads;
    }
    if let Some(days) = args.drain_days {
        config.drain_days = days;
    }
}

/// Replay the forecast's first run with event logging on and write it as NDJSON.
fn write_event_log(plan: &ForecastPlan, path: &str) -> Result<()> {
    let s = plan.snapshot();
    let mut sim = Simulation::new(
        &s.scenario,
        &s.cohort_models,
        &s.cohort_proportions,
        &s.simulation,
        s.simulation.run_seed(0),
    )?
    .with_event_log();
    sim.run()?;

    let mut w = BufWriter::new(File::create(path)?);
    let log = sim.log.unwrap_or_default();
    for ev in &log {
        serde_json::to_writer(&mut w, ev)?;
        writeln!(w)?;
    }
    w.flush()?;
    info!(path = %path, events = log.len(), "event log written");
    Ok(())
}

fn write_bands_csv(forecast: &OccupancyForecast, path: &str) -> Result<()> {
    let mut w = BufWriter::new(File::create(path)?);
    writeln!(w, "date,series,p10,p25,p50,p75,p90")?;
    for day in &forecast.days {
        for series in Series::ALL {
            let b = day.get(series);
            writeln!(
                w,
                "{},{},{:.3},{:.3},{:.3},{:.3},{:.3}",
                day.date,
                series_label(series),
                b.p10,
                b.p25,
                b.p50,
                b.p75,
                b.p90
            )?;
        }
    }
    w.flush()?;
    Ok(())
}

fn series_label(series: Series) -> &'static str {
    match series {
        Series::Total => "total",
        Series::Paediatric => "paediatric",
        Series::Adult => "adult",
        Series::Senior => "senior",
    }
}

fn print_forecast(snapshot: &ModelSnapshot, forecast: &OccupancyForecast) {
    println!(
        "=== {}: bed demand forecast ({} runs, base seed {}) ===",
        snapshot.disease_name, forecast.n_runs, forecast.base_seed
    );

    println!("\n--- Inputs ---");
    let peak = snapshot.scenario.peak();
    println!(
        "  Scenario: {} to {} ({} days), peak {:.1}/day on {}, {:.0} expected arrivals",
        snapshot.scenario.start(),
        snapshot.scenario.end(),
        snapshot.scenario.len(),
        peak.expected,
        peak.date,
        snapshot.scenario.total_expected()
    );
    for cohort in AgeCohort::ALL {
        println!(
            "  {:<10} ({:>5}) {:>5.1}%  {}",
            cohort.to_string(),
            cohort.label(),
            snapshot.cohort_proportions.get(cohort) * 100.0,
            snapshot.cohort_models.get(cohort).describe()
        );
    }

    println!("\n--- Daily occupancy (p10 / p50 / p90 total, p50 per cohort) ---");
    println!(
        "{:>10} | {:>7} | {:>7} | {:>7} | {:>10} | {:>7} | {:>7}",
        "Date", "p10", "p50", "p90", "paediatric", "adult", "senior"
    );
    println!("{}", "-".repeat(10 + 3 + 7 + 3 + 7 + 3 + 7 + 3 + 10 + 3 + 7 + 3 + 7));
    for day in &forecast.days {
        println!(
            "{:>10} | {:>7.1} | {:>7.1} | {:>7.1} | {:>10.1} | {:>7.1} | {:>7.1}",
            day.date,
            day.total.p10,
            day.total.p50,
            day.total.p90,
            day.get(Series::of(AgeCohort::Paediatric)).p50,
            day.get(Series::of(AgeCohort::Adult)).p50,
            day.get(Series::of(AgeCohort::Senior)).p50,
        );
    }

    if let Some(peak) = forecast.peak_median() {
        println!(
            "\nPeak median demand: {:.1} beds on {} (p90 {:.1})",
            peak.total.p50, peak.date, peak.total.p90
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn argv(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn drain_days_flag_reaches_simulation_config() {
        let raw = argv(&["respcast", "--drain-days", "21"]);
        let mut i = 1;
        let args = Args { drain_days: Some(value(&raw, &mut i)), runs: Some(12), ..Args::default() };
        assert_eq!(i, 2);

        let mut config = SimulationConfig::canonical();
        apply_overrides(&args, &mut config);
        assert_eq!(config.drain_days, 21);
        assert_eq!(config.n_runs, 12);
        assert_eq!(config.base_seed, SimulationConfig::canonical().base_seed);
    }
}
