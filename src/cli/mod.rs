//! Command-line interface: search, fit, predict, forecast and describe
//! over JSON specification files and CSV data.

use anyhow::Context;
use clap::{Parser, Subcommand};
use colored::*;
use polars::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use crate::search::{find_pipeline, SearchManager};
use crate::solution::Solution;
use crate::specification::{PipelineSpecification, ProblemSpecification, TrainSpecification};
use crate::utils::{DataLoader, DataSaver};

// ─── Styling helpers ───────────────────────────────────────────────────────────

fn dim(s: &str) -> ColoredString    { s.truecolor(100, 100, 100) }
fn accent(s: &str) -> ColoredString { s.truecolor(120, 170, 255) }
fn muted(s: &str) -> ColoredString  { s.truecolor(140, 140, 140) }
fn ok(s: &str) -> ColoredString     { s.truecolor(100, 210, 120) }

fn kv(key: &str, val: &str) -> String {
    format!("{} {}", muted(key), val.white())
}

fn step_ok(msg: &str) {
    println!("  {} {}", ok("✓"), msg);
}

fn step_run(msg: &str) {
    print!("  {} {}... ", accent("›"), msg);
}

fn step_done(detail: &str) {
    println!("{} {}", ok("done"), dim(detail));
}

fn section(title: &str) {
    println!();
    println!("  {}", title.white().bold());
    println!("  {}", dim(&"─".repeat(56)));
}

// ─── CLI definition ────────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(name = "raven-solver")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Search, fit and persist solutions for declarative prediction and forecasting problems")]
#[command(long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// List candidate pipelines for a problem
    Search {
        /// Problem specification (JSON)
        #[arg(short, long)]
        problem: PathBuf,
    },

    /// Fit a solution and save it to a directory
    Fit {
        /// Train specification (JSON)
        #[arg(short, long)]
        train: PathBuf,

        /// Pipeline specification (JSON); defaults to the first search candidate
        #[arg(long)]
        pipeline: Option<PathBuf>,

        /// Catalog strategy to use instead of a pipeline file
        #[arg(long, conflicts_with = "pipeline")]
        strategy: Option<String>,

        /// Training data (CSV); defaults to the train specification's input dataset
        #[arg(short, long)]
        data: Option<PathBuf>,

        /// Output solution directory
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Predict with a saved solution
    Predict {
        /// Saved solution directory
        #[arg(short, long)]
        solution: PathBuf,

        /// Input data (CSV)
        #[arg(short, long)]
        data: PathBuf,

        /// Emit class probabilities instead of labels
        #[arg(long)]
        proba: bool,

        /// Output predictions (CSV)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Forecast past the fitted sample of a saved forecasting solution
    Forecast {
        /// Saved solution directory
        #[arg(short, long)]
        solution: PathBuf,

        /// Number of future periods
        #[arg(long, default_value = "10")]
        steps: usize,

        /// Output forecast (CSV)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Show the effective hyperparameters of a saved solution
    Describe {
        /// Saved solution directory
        #[arg(short, long)]
        solution: PathBuf,
    },
}

pub fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Search { problem } => cmd_search(&problem),
        Commands::Fit { train, pipeline, strategy, data, output } => {
            cmd_fit(&train, pipeline.as_deref(), strategy.as_deref(), data.as_deref(), &output)
        }
        Commands::Predict { solution, data, proba, output } => {
            cmd_predict(&solution, &data, proba, output.as_deref())
        }
        Commands::Forecast { solution, steps, output } => cmd_forecast(&solution, steps, output.as_deref()),
        Commands::Describe { solution } => cmd_describe(&solution),
    }
}

fn read_text(path: &Path) -> anyhow::Result<String> {
    fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))
}

fn load_data(path: &Path) -> anyhow::Result<DataFrame> {
    step_run("Loading data");
    let start = Instant::now();
    let df = DataLoader::new().load_csv(path)?;
    step_done(&format!("{} rows × {} cols in {:?}", df.height(), df.width(), start.elapsed()));
    Ok(df)
}

fn emit(mut df: DataFrame, output: Option<&Path>) -> anyhow::Result<()> {
    match output {
        Some(path) => {
            DataSaver::save_csv(&mut df, path)?;
            step_ok(&format!("Wrote {} rows to {}", df.height(), path.display()));
        }
        None => println!("{}", df),
    }
    Ok(())
}

// ─── Commands ──────────────────────────────────────────────────────────────────

pub fn cmd_search(problem_path: &Path) -> anyhow::Result<()> {
    section("Search");
    let problem = ProblemSpecification::from_json(&read_text(problem_path)?)?;
    let search = SearchManager::new(problem)?;
    println!("  {}", kv("keywords", &search.keywords().join(", ")));
    println!();
    for (i, pipeline) in search.iter().enumerate() {
        println!("  {:>3}  {}", dim(&i.to_string()), serde_json::to_string(pipeline)?);
    }
    println!();
    step_ok(&format!("{} candidates", search.len()));
    Ok(())
}

fn resolve_pipeline(
    train: &TrainSpecification,
    pipeline: Option<&Path>,
    strategy: Option<&str>,
) -> anyhow::Result<PipelineSpecification> {
    if let Some(path) = pipeline {
        return Ok(PipelineSpecification::from_json(&read_text(path)?)?);
    }
    if let Some(strategy) = strategy {
        let entry = find_pipeline(strategy)
            .with_context(|| format!("no catalog entry for strategy {}", strategy))?;
        return Ok(entry.pipeline());
    }
    let search = SearchManager::new(train.problem.clone())?;
    search
        .iter()
        .next()
        .cloned()
        .context("no candidate pipeline matches the problem")
}

pub fn cmd_fit(
    train_path: &Path,
    pipeline: Option<&Path>,
    strategy: Option<&str>,
    data: Option<&Path>,
    output: &Path,
) -> anyhow::Result<()> {
    section("Fit");
    let train = TrainSpecification::from_json(&read_text(train_path)?)?;
    let pipeline = resolve_pipeline(&train, pipeline, strategy)?;
    println!("  {}", kv("library ", &pipeline.model.library));
    println!("  {}", kv("strategy", &pipeline.model.strategy.to_string()));

    let df = data.map(load_data).transpose()?;
    let mut solution = Solution::new(pipeline, train)?;

    step_run("Fitting");
    let start = Instant::now();
    solution.fit(df)?;
    step_done(&format!("{:?}", start.elapsed()));

    solution.save(output)?;
    step_ok(&format!("Saved solution to {}", output.display()));
    Ok(())
}

pub fn cmd_predict(solution_dir: &Path, data: &Path, proba: bool, output: Option<&Path>) -> anyhow::Result<()> {
    section("Predict");
    let solution = Solution::load(solution_dir)?;
    let df = load_data(data)?;

    step_run("Predicting");
    let start = Instant::now();
    let predictions = if proba {
        solution.predict_proba(&df)?
    } else {
        solution.predict(&df)?
    };
    step_done(&format!("{} rows in {:?}", predictions.height(), start.elapsed()));
    emit(predictions, output)
}

pub fn cmd_forecast(solution_dir: &Path, steps: usize, output: Option<&Path>) -> anyhow::Result<()> {
    section("Forecast");
    let solution = Solution::load(solution_dir)?;
    let future = solution.get_future_dataframe(steps)?;

    step_run(&format!("Forecasting {} steps", steps));
    let start = Instant::now();
    let forecast = solution.predict(&future)?;
    step_done(&format!("{:?}", start.elapsed()));
    emit(forecast, output)
}

pub fn cmd_describe(solution_dir: &Path) -> anyhow::Result<()> {
    section("Describe");
    let solution = Solution::load(solution_dir)?;
    println!("  {}", kv("library ", &solution.pipeline().model.library));
    println!("{}", serde_json::to_string_pretty(&solution.describe()?)?);
    Ok(())
}
