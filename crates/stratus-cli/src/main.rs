mod commands;

use clap::{Parser, Subcommand};
use clap_complete::Shell;
use commands::{exit_code_for, expand_tilde, LocationArg};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "stratus",
    version,
    about = "Unattended OS installs in cloud instances, captured as reusable images"
)]
struct Cli {
    /// Artifact cache directory shared by concurrent builds.
    #[arg(long, default_value = "~/.cache/stratus", global = true)]
    cache_dir: String,

    /// Output results as structured JSON.
    #[arg(long, default_value_t = false, global = true)]
    json: bool,

    /// Enable verbose (debug) logging output.
    #[arg(short, long, default_value_t = false, global = true)]
    verbose: bool,

    /// Enable trace-level logging (more detailed than --verbose).
    #[arg(long, default_value_t = false, global = true)]
    trace: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Install an OS in a cloud instance and snapshot the result.
    Build {
        /// Path to the build TOML file.
        #[arg(default_value = "stratus.toml")]
        config: PathBuf,
        /// Consecutive idle ticks before the install is declared stalled.
        #[arg(long, default_value_t = 600)]
        timeout: u64,
        /// Launch the install instance and return without waiting.
        #[arg(long, default_value_t = false)]
        no_wait: bool,
    },
    /// Show backend status and I/O counters of an install instance.
    Status {
        /// Path to the build TOML file (for the cloud section).
        config: PathBuf,
        /// Server id printed by `build --no-wait`.
        server_id: String,
    },
    /// Inspect and maintain the artifact cache.
    Cache {
        #[command(subcommand)]
        command: CacheCommands,
    },
    /// Generate shell completions for bash, zsh, fish, elvish, or powershell.
    Completions {
        /// Shell to generate completions for.
        shell: Shell,
    },
}

#[derive(Debug, Subcommand)]
enum CacheCommands {
    /// List every cached object and its locations.
    List,
    /// Cache an object, downloading and uploading only what is missing.
    Fetch {
        /// Object name, e.g. `install-iso` or `install-url-kernel`.
        object: String,
        #[arg(long)]
        os: String,
        #[arg(long, default_value = "x86_64")]
        arch: String,
        /// URL or path to fetch from when the object is not cached.
        #[arg(long)]
        source: Option<String>,
        /// Also upload to the cloud named by this build file's cloud section.
        #[arg(long)]
        remote: Option<PathBuf>,
    },
    /// Drop one location of an object from the index.
    Forget {
        object: String,
        #[arg(long)]
        os: String,
        #[arg(long, default_value = "x86_64")]
        arch: String,
        #[arg(long, value_enum)]
        kind: LocationArg,
    },
}

fn main() -> ExitCode {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let msg = info.to_string();
        if msg.contains("Broken pipe")
            || msg.contains("broken pipe")
            || msg.contains("os error 32")
            || msg.contains("failed printing to stdout")
        {
            std::process::exit(0);
        }
        default_hook(info);
    }));

    let cli = Cli::parse();

    let default_level = if cli.trace {
        "trace"
    } else if cli.verbose {
        "debug"
    } else {
        "warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("STRATUS_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_target(false)
        .without_time()
        .init();

    let cache_dir = expand_tilde(&cli.cache_dir);
    let json_output = cli.json;

    let result = match cli.command {
        Commands::Build {
            config,
            timeout,
            no_wait,
        } => commands::build::run(&cache_dir, &config, timeout, no_wait, json_output),
        Commands::Status { config, server_id } => {
            commands::status::run(&config, &server_id, json_output)
        }
        Commands::Cache { command } => match command {
            CacheCommands::List => commands::cache::list(&cache_dir, json_output),
            CacheCommands::Fetch {
                object,
                os,
                arch,
                source,
                remote,
            } => commands::cache::fetch(
                &cache_dir,
                &object,
                &os,
                &arch,
                source.as_deref(),
                remote.as_deref(),
                json_output,
            ),
            CacheCommands::Forget {
                object,
                os,
                arch,
                kind,
            } => commands::cache::forget(&cache_dir, &object, &os, &arch, kind.into(), json_output),
        },
        Commands::Completions { shell } => commands::completions::run::<Cli>(shell),
    };

    match result {
        Ok(code) => ExitCode::from(code),
        Err(msg) => {
            eprintln!("error: {msg}");
            ExitCode::from(exit_code_for(&msg))
        }
    }
}
