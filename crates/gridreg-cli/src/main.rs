use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use gridreg_baseline::BaselineStore;
use gridreg_core::{RevisionToken, RunId};
use gridreg_dispatch::{request_stop, Config, Dispatcher};
use gridreg_queue::RevisionQueue;
use gridreg_suite::{run_suite, HashMode, SuiteOptions};

#[derive(Parser)]
#[command(name = "gridreg", version)]
struct Cli {
    /// Debug-level logging (overrides RUST_LOG)
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write a default gridreg.toml into the working directory
    Init,

    /// Run the dispatch loop: take queued revisions, update, build, test
    Dispatch {
        /// Process at most one queued revision, then exit
        #[arg(long)]
        once: bool,
    },

    /// Ask a running dispatcher to shut down after its current revision
    Stop,

    /// Queue a revision for regression testing
    Enqueue { revision: String },

    /// Show queued revisions and whether a dispatcher holds the lock
    Status,

    /// Inspect the baseline database
    Baseline {
        #[arg(long, default_value = "reg_baseline.txt")]
        path: String,

        /// Print the stored hash for one key instead of a summary
        #[arg(long)]
        key: Option<String>,
    },

    /// Run a regression suite directly (this is what the batch job runs)
    Regress {
        /// Executable under test, plus any fixed flags
        #[arg(long)]
        exe: String,

        /// Corpus root the test globs are relative to
        #[arg(long, default_value = "~/tests")]
        testpath: String,

        /// Test glob, relative to the corpus root; repeatable. Defaults
        /// follow the executable's interpreter family.
        #[arg(long = "test")]
        tests: Vec<String>,

        /// Output device; repeatable
        #[arg(long = "device", default_values_t = vec!["ppmraw".to_string()])]
        devices: Vec<String>,

        /// Rendering resolution; repeatable
        #[arg(long = "dpi", default_values_t = vec![600u32])]
        dpis: Vec<u32>,

        /// Baseline database path
        #[arg(long, default_value = "reg_baseline.txt")]
        baseline: String,

        /// Scratch directory for rendered output
        #[arg(long, default_value = "/tmp")]
        scratch: String,

        /// Hash command the render output is piped through
        #[arg(long, default_value = "md5sum")]
        hasher: String,

        /// Hash the raw render output directly instead of piping it
        /// through the hasher command
        #[arg(long)]
        raw: bool,

        /// Worker threads
        #[arg(long, default_value_t = 1)]
        jobs: usize,

        /// Quiet mode: no per-case progress, detail sections in the report
        #[arg(long)]
        batch: bool,

        /// Accept differences as the new baseline
        #[arg(long)]
        update: bool,

        /// Seconds without a worker result before the run is cut short
        #[arg(long, default_value_t = gridreg_core::WORKER_STALL_SECS)]
        stall_timeout: u64,
    },
}

fn load_config(workdir: &std::path::Path) -> anyhow::Result<Config> {
    let path = Config::config_path(workdir);
    if path.exists() {
        Config::load_from(&path)
    } else {
        Ok(Config::default_config())
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::from_default_env()
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let workdir = std::env::current_dir()?;

    match cli.cmd {
        Command::Init => {
            let path = Config::config_path(&workdir);
            if path.exists() {
                anyhow::bail!("{} already exists", path.display());
            }
            Config::default_config().save_to(&path)?;
            println!("Wrote {}", path.display());
        }
        Command::Dispatch { once } => {
            let cfg = load_config(&workdir)?;
            let dispatcher = Dispatcher::open(workdir, cfg)?;
            if once {
                match dispatcher.run_once()? {
                    Some(revision) => println!("Dispatched r{}", revision),
                    None => println!("Queue is empty"),
                }
            } else {
                dispatcher.run()?;
            }
        }
        Command::Stop => {
            request_stop(&workdir)?;
            println!("Stop requested; the dispatcher exits after its current revision");
        }
        Command::Enqueue { revision } => {
            let cfg = load_config(&workdir)?;
            let queue = RevisionQueue::open(cfg.queue_dir())?;
            queue.push(&RevisionToken::from_str(revision.clone()))?;
            println!("Queued r{}", revision);
        }
        Command::Status => {
            let cfg = load_config(&workdir)?;
            let queue = RevisionQueue::open(cfg.queue_dir())?;
            println!("Queued revisions: {}", queue.len()?);
            let locked = workdir.join("dispatch.lock").exists();
            println!("Dispatcher: {}", if locked { "running" } else { "not running" });
        }
        Command::Baseline { path, key } => {
            let store = BaselineStore::load(expand(&path));
            match key {
                Some(key) => match store.lookup(&key) {
                    Some(hash) => println!("{}", hash),
                    None => anyhow::bail!("no baseline entry for `{}`", key),
                },
                None => println!("{} baseline entries", store.len()),
            }
        }
        Command::Regress {
            exe,
            testpath,
            tests,
            devices,
            dpis,
            baseline,
            scratch,
            hasher,
            raw,
            jobs,
            batch,
            update,
            stall_timeout,
        } => {
            let mut opts = SuiteOptions::new(exe, expand(&testpath));
            opts.tests = tests;
            opts.devices = devices;
            opts.dpis = dpis;
            // per-run scratch subdirectory, so concurrent suites sharing
            // one scratch root never collide on sidecar names
            let scratch = expand(&scratch).join(format!("gridreg-{}", RunId::new()));
            std::fs::create_dir_all(&scratch)?;
            opts.scratch_dir = scratch;
            opts.hash_mode = if raw { HashMode::RawOutput } else { HashMode::Sidecar { hasher } };
            opts.jobs = jobs.max(1);
            opts.batch = batch;
            opts.update_baselines = update;
            opts.stall_timeout = Duration::from_secs(stall_timeout);

            let mut store = BaselineStore::load(expand(&baseline));
            let report = run_suite(&opts, &mut store)?;
            // on the cluster, stdout is the report file the dispatcher
            // waits for and mails out
            print!("{}", report.render(batch));
            // empty unless a case left a sidecar behind for diagnosis
            let _ = std::fs::remove_dir(&opts.scratch_dir);
        }
    }

    Ok(())
}

fn expand(path: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(path).to_string())
}
