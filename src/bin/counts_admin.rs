//! Binary entry point for the counts store administrative CLI.
#![forbid(unsafe_code)]

use std::error::Error;
use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use sombra_counts::{
    admin::{
        init, inspect, read_count, verify, AdminError, AdminOpenOptions, CountReport, InitReport,
        InspectReport, VerifyReport,
    },
    counts::{default_config_path, CountKey, CountsConfig, KeyKind},
    logging::init_logging,
};

#[derive(Parser, Debug)]
#[command(
    name = "counts-admin",
    version,
    about = "Administrative CLI for Sombra counts stores",
    disable_help_subcommand = true
)]
struct Cli {
    #[arg(
        long,
        global = true,
        value_name = "FILE",
        env = "SOMBRA_COUNTS_CONFIG",
        help = "Path to the counts TOML config"
    )]
    config: Option<PathBuf>,

    #[arg(
        long,
        global = true,
        value_name = "FILTER",
        env = "SOMBRA_COUNTS_LOG",
        default_value = "warn",
        help = "tracing filter directive for stderr logs"
    )]
    log: String,

    #[arg(
        long,
        global = true,
        value_enum,
        default_value_t = OutputFormat::Text,
        help = "Output format for structured responses"
    )]
    format: OutputFormat,

    #[arg(long, global = true, help = "Override the expected version tag")]
    version_tag: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    #[command(about = "Create an empty store (tx 0, generation 0)")]
    Init {
        #[arg(value_name = "STORE")]
        store: Option<PathBuf>,
    },

    #[command(about = "Show the header of the current snapshot")]
    Inspect {
        #[arg(value_name = "STORE")]
        store: Option<PathBuf>,

        #[arg(long, help = "Also list every persisted entry")]
        entries: bool,
    },

    #[command(about = "Check every generation file of a store")]
    Verify {
        #[arg(value_name = "STORE")]
        store: Option<PathBuf>,

        #[arg(long, help = "Skip the body checksum and order scan")]
        header_only: bool,
    },

    #[command(about = "Read one persisted count, e.g. `get rel-labels 3 '*' 7`")]
    Get {
        #[arg(long, value_name = "STORE")]
        store: Option<PathBuf>,

        #[arg(value_name = "KIND", help = "node | rel | rel-labels | index")]
        kind: String,

        #[arg(
            value_name = "TOKEN",
            allow_hyphen_values = true,
            help = "Token ids; `*` means any"
        )]
        tokens: Vec<String>,
    },
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

fn main() {
    if let Err(err) = run() {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    init_logging(&cli.log)?;

    let config = match cli.config.clone().or_else(default_config_path) {
        Some(path) => CountsConfig::load(&path)?,
        None => CountsConfig::default(),
    };
    let mut open_opts = AdminOpenOptions::from(&config);
    if let Some(tag) = &cli.version_tag {
        open_opts.version_tag = tag.clone();
    }

    match cli.command {
        Command::Init { store } => {
            let store = resolve_store(store, &config)?;
            let report = init(&store, &open_opts)?;
            emit(&cli.format, &report, || print_init_text(&report))?;
        }
        Command::Inspect { store, entries } => {
            let store = resolve_store(store, &config)?;
            let report = inspect(&store, &open_opts, entries)?;
            emit(&cli.format, &report, || print_inspect_text(&report))?;
        }
        Command::Verify { store, header_only } => {
            let store = resolve_store(store, &config)?;
            open_opts.verify_body = !header_only;
            let report = verify(&store, &open_opts)?;
            emit(&cli.format, &report, || print_verify_text(&report))?;
            if !report.success {
                std::process::exit(2);
            }
        }
        Command::Get {
            store,
            kind,
            tokens,
        } => {
            let store = resolve_store(store, &config)?;
            let key = parse_key(&kind, &tokens)?;
            let report = read_count(&store, &open_opts, &key)?;
            emit(&cli.format, &report, || print_count_text(&report))?;
        }
    }
    Ok(())
}

fn resolve_store(explicit: Option<PathBuf>, config: &CountsConfig) -> Result<PathBuf, AdminError> {
    explicit.or_else(|| config.store.clone()).ok_or_else(|| {
        AdminError::Message("no store path given; pass STORE or set `store` in the config".into())
    })
}

fn parse_key(kind: &str, tokens: &[String]) -> Result<CountKey, Box<dyn Error>> {
    let kind: KeyKind = kind.parse()?;
    let parsed = tokens
        .iter()
        .map(|token| match token.as_str() {
            "*" | "any" => Ok(None),
            raw => raw
                .parse::<u32>()
                .map(Some)
                .map_err(|_| AdminError::Message(format!("invalid token `{raw}`"))),
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok(CountKey::from_parts(kind, &parsed)?)
}

fn emit<T, F>(format: &OutputFormat, value: &T, printer: F) -> Result<(), Box<dyn Error>>
where
    T: serde::Serialize,
    F: Fn(),
{
    match format {
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(value)?;
            println!("{json}");
        }
        OutputFormat::Text => printer(),
    }
    Ok(())
}

fn print_init_text(report: &InitReport) {
    println!(
        "Initialized {} (file={}, version_tag={})",
        report.base, report.store_file, report.version_tag
    );
}

fn print_inspect_text(report: &InspectReport) {
    let header = &report.header;
    println!("Store: {} ({} bytes)", report.store_file, report.file_size_bytes);
    println!(
        "  tx_id={} generation={} entries={} format_version={} version_tag={} body_crc32={}",
        header.tx_id,
        header.generation,
        header.entry_count,
        header.format_version,
        header.version_tag,
        header.body_crc32
    );
    println!("  generations on disk: {:?}", report.generations);
    if let Some(entries) = &report.entries {
        for row in entries {
            println!("  {:<32} {:>12}  {}", row.key, row.value, row.key_hex);
        }
    }
}

fn print_verify_text(report: &VerifyReport) {
    println!(
        "Verify => success={} current_generation={}",
        report.success,
        report
            .current_generation
            .map(|g| g.to_string())
            .unwrap_or_else(|| "none".into())
    );
    for check in &report.generations {
        println!("  [{:?}] {} gen={}", check.status, check.path, check.generation);
    }
    for finding in &report.findings {
        println!("- {:?}: {}", finding.severity, finding.message);
    }
}

fn print_count_text(report: &CountReport) {
    println!(
        "{} = {}{} (tx_id={})",
        report.entry.key,
        report.entry.value,
        if report.present { "" } else { " (absent)" },
        report.tx_id
    );
}
