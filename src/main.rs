use clap::{Parser, Subcommand, ValueEnum};
use holy_compress::config::{self, CompressConfig, Mode};
use holy_compress::{BatchEvent, BatchRequest, inventory, output};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "holy-compress")]
#[command(about = "Batch-recompress an image folder into size-constrained JPEGs")]
#[command(long_about = "\
Batch-recompress an image folder into size-constrained JPEGs

Every PNG, WebP, BMP, TIFF or GIF in the input folder becomes one JPEG in the
output folder. Sources are never modified.

Strategies:
  target-size       Highest quality whose JPEG fits --target-kb. If even
                    --min-quality is too big, the smallest attempt is saved
                    unless --no-best-effort is given.
  relative-quality  One quality per image: --base-quality for an image of
                    average size, lower for larger images, higher for smaller.

Output names record how each file was made:
  photo.png → photo_245kb_q72_id4821.jpeg

Run 'holy-compress gen-config' to generate a documented config file.")]
#[command(version)]
struct Cli {
    /// TOML file with default settings (flags override it)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Debug logging on stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Compress every image in a folder
    Compress(CompressArgs),
    /// Show which images a run would cover, without encoding
    Scan(InputArgs),
    /// Print a stock config file with all options documented
    GenConfig,
}

/// Input selection shared by `compress` and `scan`.
#[derive(clap::Args, Clone)]
struct InputArgs {
    /// Folder with the source images
    #[arg(long)]
    input: PathBuf,

    /// Also compress images in subfolders
    #[arg(long)]
    recursive: bool,

    /// Match extensions case-sensitively
    #[arg(long)]
    case_sensitive: bool,
}

#[derive(Clone, Copy, ValueEnum)]
enum ModeArg {
    TargetSize,
    RelativeQuality,
}

#[derive(clap::Args)]
struct CompressArgs {
    #[command(flatten)]
    input: InputArgs,

    /// Folder for the JPEGs (created if missing)
    #[arg(long)]
    output: PathBuf,

    /// Quality strategy
    #[arg(long, value_enum)]
    mode: Option<ModeArg>,

    /// Size budget per image in KB (target-size)
    #[arg(long)]
    target_kb: Option<u64>,

    /// Lowest quality ever used (1-100)
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..=100))]
    min_quality: Option<u32>,

    /// Highest quality ever used (1-100)
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..=100))]
    max_quality: Option<u32>,

    /// Quality for an average-sized image (relative-quality)
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..=100))]
    base_quality: Option<u32>,

    /// Save nothing when the size target cannot be met
    #[arg(long)]
    no_best_effort: bool,

    /// Parallel workers (default: all CPU cores)
    #[arg(long)]
    workers: Option<usize>,

    /// Print the summary and every outcome as JSON instead of text
    #[arg(long)]
    json: bool,
}

impl InputArgs {
    fn apply(&self, config: &mut CompressConfig) {
        config.input.recursive |= self.recursive;
        config.input.case_sensitive |= self.case_sensitive;
    }
}

impl CompressArgs {
    /// Layer command-line flags over file/stock config.
    fn apply(&self, config: &mut CompressConfig) {
        self.input.apply(config);
        let s = &mut config.strategy;
        if let Some(mode) = self.mode {
            s.mode = match mode {
                ModeArg::TargetSize => Mode::TargetSize,
                ModeArg::RelativeQuality => Mode::RelativeQuality,
            };
        }
        if let Some(kb) = self.target_kb {
            s.target_size_kb = kb;
        }
        if let Some(q) = self.min_quality {
            s.min_quality = q;
        }
        if let Some(q) = self.max_quality {
            s.max_quality = q;
        }
        if let Some(q) = self.base_quality {
            s.base_quality = q;
        }
        if self.no_best_effort {
            s.save_best_effort = false;
        }
        if self.workers.is_some() {
            config.processing.workers = self.workers;
        }
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    setup_logging(cli.verbose);
    quiet_worker_panics();

    match cli.command {
        Command::Compress(args) => {
            let mut config = config::load_config(cli.config.as_deref())?;
            args.apply(&mut config);
            config.validate()?;
            compress(&args, &config)?;
        }
        Command::Scan(args) => {
            let mut config = config::load_config(cli.config.as_deref())?;
            args.apply(&mut config);
            config.validate_input()?;
            let inventory = inventory::scan(&args.input, &config.scan_options())?;
            output::print_inventory(&inventory);
        }
        Command::GenConfig => {
            print!("{}", config::stock_config_toml());
        }
    }

    Ok(())
}

fn compress(args: &CompressArgs, config: &CompressConfig) -> Result<(), Box<dyn std::error::Error>> {
    let request = BatchRequest {
        input_dir: args.input.input.clone(),
        output_dir: args.output.clone(),
        strategy: config.to_strategy(),
        workers: Some(config::effective_workers(&config.processing)),
        scan: config.scan_options(),
    };
    let handle = holy_compress::start(&request)?;

    let token = handle.cancel_token();
    ctrlc::set_handler(move || {
        eprintln!("\nInterrupt received, finishing images in progress...");
        token.cancel();
    })?;

    let mut outcomes = Vec::new();
    for event in handle.events() {
        if !args.json {
            output::print_batch_event(&event);
        }
        if let BatchEvent::Progress { outcome, .. } = event {
            outcomes.push(outcome);
        }
    }
    let summary = handle.wait();
    info!(state = ?summary.state, processed = summary.processed(), "done");

    if args.json {
        let report = serde_json::json!({
            "summary": summary,
            "outcomes": outcomes,
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!();
        output::print_summary(&summary);
    }
    Ok(())
}

/// Worker panics become failed outcomes and an `error!` line from the batch;
/// skip the default hook's stderr report for them.
fn quiet_worker_panics() {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let on_worker = std::thread::current()
            .name()
            .is_some_and(holy_compress::batch::is_worker_thread);
        if !on_worker {
            default_hook(info);
        }
    }));
}

fn setup_logging(verbose: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if verbose {
            EnvFilter::new("holy_compress=debug,warn")
        } else {
            EnvFilter::new("holy_compress=info,warn")
        }
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();
}
