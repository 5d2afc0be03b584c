//! Fit length-of-stay distributions and an arrival curve to historical stays.
//!
//! Reads stay records as NDJSON (one upload row per line, default
//! `stays.ndjson`), then prints:
//!   - the ranked distribution table for each age cohort
//!   - the observed cohort mix
//!   - the fitted arrival curve over the chosen window
//! With `--snapshot`, also writes a forecast snapshot built from the best
//! fits that `respcast --config` can run directly.

use std::fs::File;
use std::io::BufReader;
use std::process;
use std::str::FromStr;

use chrono::NaiveDate;
use tracing::info;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use respcast::arrival_fit::ArrivalFit;
use respcast::config::{ArrivalFitConfig, FitConfig, SimulationConfig};
use respcast::error::{Error, Result};
use respcast::pipeline::{FittedModels, HistoricalData};
use respcast::records::{self, StartTimeOption, StayRecord};
use respcast::scenario::ScenarioParams;
use respcast::types::{AgeCohort, DateRange};

#[derive(Debug)]
struct Args {
    stays: String,
    start_time: StartTimeOption,
    window_start: Option<NaiveDate>,
    window_end: Option<NaiveDate>,
    top_n: Option<usize>,
    timeout_secs: Option<f64>,
    snapshot: Option<String>,
    disease: String,
    scenario_start: Option<NaiveDate>,
    verbose: bool,
}

fn parse_args() -> Args {
    let args: Vec<String> = std::env::args().collect();
    let mut parsed = Args {
        stays: "stays.ndjson".to_string(),
        start_time: StartTimeOption::Admission,
        window_start: None,
        window_end: None,
        top_n: None,
        timeout_secs: None,
        snapshot: None,
        disease: "Unnamed outbreak".to_string(),
        scenario_start: None,
        verbose: false,
    };

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--start-time" => {
                let raw: String = value(&args, &mut i);
                parsed.start_time = match raw.as_str() {
                    "admission" => StartTimeOption::Admission,
                    "first-pos" => StartTimeOption::FirstPosCollected,
                    other => {
                        eprintln!("error: --start-time must be admission or first-pos, got {other}");
                        process::exit(2);
                    }
                };
            }
            "--window-start" => parsed.window_start = Some(value(&args, &mut i)),
            "--window-end" => parsed.window_end = Some(value(&args, &mut i)),
            "--top" => parsed.top_n = Some(value(&args, &mut i)),
            "--timeout" => parsed.timeout_secs = Some(value(&args, &mut i)),
            "--snapshot" => parsed.snapshot = Some(value(&args, &mut i)),
            "--disease" => parsed.disease = value(&args, &mut i),
            "--scenario-start" => parsed.scenario_start = Some(value(&args, &mut i)),
            "--verbose" => parsed.verbose = true,
            flag if flag.starts_with("--") => {
                eprintln!("error: unknown argument {flag}");
                process::exit(2);
            }
            path => parsed.stays = path.to_string(),
        }
        i += 1;
    }
    parsed
}

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

fn main() {
    let args = parse_args();
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if args.verbose { "debug" } else { "info" }));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    if let Err(e) = run(&args) {
        eprintln!("error: {e}");
        process::exit(1);
    }
}

fn run(args: &Args) -> Result<()> {
    let file = File::open(&args.stays).map_err(|e| {
        eprintln!("cannot open {}; pass the stays NDJSON path as the first argument", args.stays);
        Error::Io(e)
    })?;
    let stays: Vec<StayRecord> = records::read_ndjson(BufReader::new(file))?;
    info!(path = %args.stays, stays = stays.len(), "stay records loaded");

    let mut fit_config = FitConfig::default();
    if let Some(n) = args.top_n {
        fit_config.top_n = n;
    }
    if let Some(t) = args.timeout_secs {
        fit_config.timeout_secs = t;
    }

    let data = HistoricalData::new(stays, Vec::new());
    let fitted = data.fit_models(&fit_config)?;
    for cohort in AgeCohort::ALL {
        print_fit_table(&data, &fitted, cohort);
    }
    print_proportions(&fitted);

    let daily = data.daily_arrivals(args.start_time);
    let full = daily.range();
    let window = DateRange::new(
        args.window_start.unwrap_or(full.start),
        args.window_end.unwrap_or(full.end),
    );
    let fitted = match data.fit_arrival_curve(window, args.start_time, &ArrivalFitConfig::default()) {
        Ok(fit) => {
            print_arrival_fit(&fit);
            fitted.with_arrival_fit(fit)
        }
        Err(Error::NoArrivals) => {
            println!("\n=== Arrival curve ===\n  no arrivals between {} and {}", window.start, window.end);
            fitted
        }
        Err(e) => return Err(e),
    };

    if let Some(path) = &args.snapshot {
        let Some(fit) = &fitted.arrival_fit else {
            return Err(Error::NoArrivals);
        };
        let start = args.scenario_start.unwrap_or(window.start);
        let plan = fitted
            .builder(args.disease.clone())
            .scenario_params(ScenarioParams::from_arrival_fit(fit, start))?
            .simulation(SimulationConfig::default())
            .build()?;
        plan.snapshot().write_to(path)?;
        info!(path = %path, "snapshot written");
    }
    Ok(())
}

fn print_fit_table(data: &HistoricalData, fitted: &FittedModels, cohort: AgeCohort) {
    let n = records::los_samples(&data.stays, cohort).len();
    println!("\n=== Length of stay: {cohort} ({}), {n} stays ===", cohort.label());
    let ranked = fitted.candidates.get(cohort);
    if ranked.is_empty() {
        println!("  no acceptable distribution");
        return;
    }
    println!(
        "{:>4} | {:<26} | {:>10} | {:>11} | {:>11} | {:>8} | {:>8} | {:>8} | Parameters",
        "Rank", "Distribution", "SSE", "AIC", "BIC", "KS p", "Mean", "Std"
    );
    println!("{}", "-".repeat(4 + 3 + 26 + 3 + 10 + 3 + 11 + 3 + 11 + 3 + 8 + 3 + 8 + 3 + 8 + 3 + 10));
    for (rank, d) in ranked.iter().enumerate() {
        let params: Vec<String> = d.named_params().iter().map(|(k, v)| format!("{k}={v:.4}")).collect();
        println!(
            "{:>4} | {:<26} | {:>10.6} | {:>11.3} | {:>11.3} | {:>8.5} | {:>8.4} | {:>8.4} | {}",
            rank + 1,
            d.family.display_name(),
            d.sse,
            d.aic,
            d.bic,
            d.ks_pvalue,
            d.mean,
            d.std,
            params.join(", ")
        );
    }
}

fn print_proportions(fitted: &FittedModels) {
    println!("\n=== Cohort mix ===");
    for cohort in AgeCohort::ALL {
        println!(
            "  {:<10} ({:>5}) {:>6.2}%",
            cohort.to_string(),
            cohort.label(),
            fitted.proportions.get(cohort) * 100.0
        );
    }
}

fn print_arrival_fit(fit: &ArrivalFit) {
    println!("\n=== Arrival curve ===");
    println!("  window:  {} (+{} days)", fit.window_start, fit.window_days);
    match fit.peak_date() {
        Some(date) => println!("  peak:    {:.2} arrivals/day on {date} (offset {:.1})", fit.peak_value, fit.peak_offset),
        None => println!("  peak:    {:.2} arrivals/day at offset {:.1}", fit.peak_value, fit.peak_offset),
    }
    println!("  scale:   {:.3} days", fit.scale);
    println!("  floor:   {:.3} arrivals/day", fit.floor_value);
    println!("  SSE:     {:.3}", fit.sse);
}
