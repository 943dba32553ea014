use std::path::PathBuf;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};
use env_logger::Env;
use log::info;
use rayon::ThreadPoolBuilder;
use serde::Serialize;
use serde_json::json;
use tome::serialization::{load_input, save_json};
use tome::{MergeConfig, MergeMetrics, MergeMode, Strategy, Tensor, TokenMerger};

const DEFAULT_OUTPUT: &str = "merged.json";

#[derive(Parser, Debug)]
#[command(author, version, about = "Token merging toolkit", long_about = None)]
struct Cli {
    /// Increase verbosity (-v, -vv)
    #[arg(short = 'v', long, global = true, action = ArgAction::Count)]
    verbose: u8,

    /// Decrease verbosity (-q, -qq)
    #[arg(short = 'q', long, global = true, action = ArgAction::Count)]
    quiet: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Merge the tokens of a JSON tensor file
    Merge(MergeArgs),
    /// Inspect the tensors of an input file
    Info(InfoArgs),
}

#[derive(Args, Debug)]
struct MergeArgs {
    /// JSON file holding `metric` and optional `values` tensors
    input: PathBuf,

    /// Output path for the merge report
    #[arg(short, long, value_name = "PATH", default_value = DEFAULT_OUTPUT)]
    output: PathBuf,

    /// Partition strategy
    #[arg(long, value_enum, default_value_t = StrategyArg::Bipartite)]
    strategy: StrategyArg,

    /// Tokens removed per step (bipartite, random)
    #[arg(short = 'r', long, value_name = "COUNT", default_value_t = 8)]
    reduction: usize,

    /// Group size (kary)
    #[arg(short = 'k', long, value_name = "SIZE", default_value_t = 2)]
    group_size: usize,

    /// Position 0 holds a class token that must never merge
    #[arg(long)]
    class_token: bool,

    /// Position 1 holds a distillation token that must never merge
    #[arg(long)]
    distill_token: bool,

    /// Reduction used when weighted averaging is disabled
    #[arg(long, value_enum, default_value_t = ModeArg::Mean)]
    mode: ModeArg,

    /// Disable size-weighted averaging and merge with --mode instead
    #[arg(long)]
    no_weighted: bool,

    /// Track which original tokens make up each merged token
    #[arg(long)]
    track_source: bool,

    /// Number of chained merge steps; later steps match on merged values
    #[arg(long, value_name = "COUNT", default_value_t = 1)]
    steps: usize,

    /// Seed for the random strategy
    #[arg(long, value_name = "SEED")]
    seed: Option<u64>,

    /// Also emit the merged tokens expanded back to the original length
    #[arg(long)]
    unmerge: bool,

    /// Limit Rayon worker threads
    #[arg(long, value_name = "N")]
    threads: Option<usize>,

    /// Emit pretty JSON
    #[arg(long)]
    pretty: bool,
}

#[derive(Args, Debug)]
struct InfoArgs {
    /// JSON file to inspect
    input: PathBuf,

    /// Emit machine-readable JSON summary
    #[arg(long)]
    json: bool,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum StrategyArg {
    /// Even/odd split, top-r most similar tokens merged.
    Bipartite,
    /// Groups of k tokens, each reduced to one.
    Kary,
    /// r randomly chosen tokens merged.
    Random,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum ModeArg {
    Sum,
    Mean,
    Amax,
}

impl From<ModeArg> for MergeMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Sum => MergeMode::Sum,
            ModeArg::Mean => MergeMode::Mean,
            ModeArg::Amax => MergeMode::Amax,
        }
    }
}

#[derive(Serialize)]
struct MergeReport<'a> {
    config: &'a MergeConfig,
    tokens: &'a Tensor,
    #[serde(skip_serializing_if = "Option::is_none")]
    size: Option<&'a Tensor>,
    #[serde(skip_serializing_if = "Option::is_none")]
    source: Option<&'a Tensor>,
    #[serde(skip_serializing_if = "Option::is_none")]
    unmerged: Option<Tensor>,
    metrics: &'a MergeMetrics,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.quiet);

    match cli.command {
        Commands::Merge(args) => run_merge(args),
        Commands::Info(args) => run_info(args),
    }
}

fn init_logging(verbose: u8, quiet: u8) {
    use log::LevelFilter;

    let level = if quiet > 0 {
        match quiet {
            1 => LevelFilter::Warn,
            _ => LevelFilter::Error,
        }
    } else {
        match verbose {
            0 => LevelFilter::Info,
            1 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        }
    };

    let mut builder = env_logger::Builder::from_env(Env::default().default_filter_or("info"));
    builder.format_timestamp_millis();
    builder.filter_level(level);
    let _ = builder.try_init();
}

fn run_merge(args: MergeArgs) -> Result<()> {
    if let Some(threads) = args.threads {
        ThreadPoolBuilder::new()
            .num_threads(threads)
            .build_global()
            .context("unable to configure Rayon thread pool")?;
    }

    let strategy = match args.strategy {
        StrategyArg::Bipartite => Strategy::Bipartite {
            r: args.reduction,
            class_token: args.class_token,
            distill_token: args.distill_token,
        },
        StrategyArg::Kary => Strategy::Kary { k: args.group_size },
        StrategyArg::Random => Strategy::Random {
            r: args.reduction,
            seed: args.seed,
        },
    };
    let cfg = MergeConfig::builder()
        .strategy(strategy)
        .mode(args.mode.into())
        .weighted_average(!args.no_weighted)
        .track_source(args.track_source)
        .steps(args.steps)
        .build()?;

    let input = load_input(&args.input)
        .with_context(|| format!("failed to load {}", args.input.display()))?;
    let [batch, tokens, channels] = input.values().shape();
    info!(
        "loaded {batch}×{tokens}×{channels} values; merging with {} over {} step(s)",
        cfg.strategy.name(),
        cfg.steps
    );

    let start = Instant::now();
    let merger = TokenMerger::new(cfg);
    let artifacts = merger.run(&input.metric, input.values())?;
    let elapsed = start.elapsed();

    let unmerged = if args.unmerge {
        Some(artifacts.unmerge(&artifacts.tokens)?)
    } else {
        None
    };

    let report = MergeReport {
        config: merger.config(),
        tokens: &artifacts.tokens,
        size: artifacts.size.as_ref(),
        source: artifacts.source.as_ref(),
        unmerged,
        metrics: &artifacts.metrics,
    };
    save_json(&report, &args.output, args.pretty)
        .with_context(|| format!("failed to write {}", args.output.display()))?;

    let removed = artifacts.metrics.removed();
    info!("merge complete: removed={removed} duration={elapsed:.2?}");
    let [batch, tokens, channels] = artifacts.tokens.shape();
    println!(
        "wrote merged tensor {batch}×{tokens}×{channels} ({removed} tokens removed) to {}",
        args.output.display()
    );

    Ok(())
}

fn run_info(args: InfoArgs) -> Result<()> {
    let input = load_input(&args.input)
        .with_context(|| format!("failed to load {}", args.input.display()))?;

    let summary = json!({
        "path": args.input.display().to_string(),
        "metric": input.metric.shape(),
        "values": input.values.as_ref().map(Tensor::shape),
    });

    if args.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        let [batch, tokens, channels] = input.metric.shape();
        println!("Metric shape : {batch}×{tokens}×{channels}");
        match &input.values {
            Some(values) => {
                let [batch, tokens, channels] = values.shape();
                println!("Values shape : {batch}×{tokens}×{channels}");
            }
            None => println!("Values shape : (metric)"),
        }
    }

    Ok(())
}
