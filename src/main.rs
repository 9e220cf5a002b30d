use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use occupancy::{
    config::PipelineConfig,
    pipeline::{self, RunOutcome, Selection},
    publish::{self, PublishTarget},
    report, validate,
};
use std::{path::PathBuf, process::ExitCode};
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

/// Exit status when a stage's inputs are missing.
const EXIT_BLOCKED: u8 = 2;

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Office occupancy ETL: spreadsheets to dimension and fact tables"
)]
struct Cli {
    /// YAML config file (defaults to ./occupancy.yaml when present)
    #[arg(long, global = true, env = "OCCUPANCY_CONFIG")]
    config: Option<PathBuf>,

    /// Root of every stage folder; overrides `data_dir` from the config
    #[arg(long, global = true, env = "OCCUPANCY_DATA_DIR")]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Args, Debug, Clone)]
struct StageArgs {
    /// First stage to run
    #[arg(long, default_value_t = pipeline::FIRST_STAGE)]
    from: u8,

    /// Last stage to run
    #[arg(long, default_value_t = pipeline::LAST_STAGE)]
    to: u8,

    /// Run exactly these stages (`5,6` or `5 6`)
    #[arg(long, num_args = 1.., value_delimiter = ',', conflicts_with_all = ["from", "to"])]
    only: Vec<u8>,

    /// Leave these stages out (`5,6` or `5 6`)
    #[arg(long, num_args = 1.., value_delimiter = ',')]
    skip: Vec<u8>,

    /// Log the plan without running anything
    #[arg(long)]
    dry_run: bool,
}

impl StageArgs {
    fn selection(&self) -> Selection {
        Selection {
            from: self.from,
            to: self.to,
            only: self.only.clone(),
            skip: self.skip.clone(),
        }
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run pipeline stages 1-9
    Run(StageArgs),
    /// Write the data-quality report
    Validate {
        /// Report directory (defaults to `reports_dir` from the config)
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Run the stages, then validate
    All {
        #[command(flatten)]
        stages: StageArgs,

        /// Report directory (defaults to `reports_dir` from the config)
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Per-office YTD attendance and line-of-business mix
    Report {
        /// Report directory (defaults to `reports_dir` from the config)
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Write fact tables as Parquet
    Publish {
        #[arg(long, value_enum, default_value_t = PublishTarget::Aggregated)]
        table: PublishTarget,

        /// Output directory (defaults to `publish_dir` from the config)
        #[arg(long)]
        out: Option<PathBuf>,
    },
}

fn main() -> ExitCode {
    let env = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt::Subscriber::builder()
        .with_env_filter(env)
        .with_span_events(fmt::format::FmtSpan::CLOSE)
        .with_target(false)
        .init();

    let cli = Cli::parse();
    match run(cli) {
        Ok(code) => code,
        Err(e) => {
            error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run_stages(cfg: &PipelineConfig, args: &StageArgs) -> Result<Option<ExitCode>> {
    let plan = args.selection().plan()?;
    info!(?plan, dry_run = args.dry_run, "stage plan");
    match pipeline::run(cfg, &plan, args.dry_run)? {
        RunOutcome::Blocked { stage, missing } => {
            error!(stage, "cannot run stage; missing:");
            for m in &missing {
                error!("  - {}", m);
            }
            Ok(Some(ExitCode::from(EXIT_BLOCKED)))
        }
        RunOutcome::Planned(_) | RunOutcome::Completed(_) => Ok(None),
    }
}

fn run(cli: Cli) -> Result<ExitCode> {
    let mut cfg = PipelineConfig::load(cli.config.as_deref())?;
    if let Some(dir) = cli.data_dir {
        cfg.data_dir = dir;
    }
    info!(data_dir = %cfg.data_dir.display(), "startup");
    let layout = cfg.layout();

    let command = cli.command.unwrap_or(Command::All {
        stages: StageArgs {
            from: pipeline::FIRST_STAGE,
            to: pipeline::LAST_STAGE,
            only: Vec::new(),
            skip: Vec::new(),
            dry_run: false,
        },
        out: None,
    });

    match command {
        Command::Run(args) => {
            if let Some(code) = run_stages(&cfg, &args)? {
                return Ok(code);
            }
        }
        Command::Validate { out } => {
            let out = out.unwrap_or_else(|| cfg.resolve(&cfg.reports_dir));
            validate::validate(&layout, &out)?;
        }
        Command::All { stages, out } => {
            if let Some(code) = run_stages(&cfg, &stages)? {
                return Ok(code);
            }
            if !stages.dry_run {
                let out = out.unwrap_or_else(|| cfg.resolve(&cfg.reports_dir));
                validate::validate(&layout, &out)?;
            }
        }
        Command::Report { out } => {
            let out = out.unwrap_or_else(|| cfg.resolve(&cfg.reports_dir));
            report::report(&layout, &out)?;
        }
        Command::Publish { table, out } => {
            let out = out.unwrap_or_else(|| cfg.resolve(&cfg.publish_dir));
            let written = publish::publish(&layout, &out, table)?;
            info!(files = written.len(), "publish finished");
        }
    }
    Ok(ExitCode::SUCCESS)
}
