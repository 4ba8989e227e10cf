//! CLI entry point for daq-nexus
//!
//! Converts a recorded document stream (one `[kind, payload]` JSON array per
//! line) into NeXus container files.
//!
//! Writing files needs the HDF5 backend. Build with
//! `cargo build --release --features storage_hdf5`; without it every export
//! fails with a `FeatureNotEnabled` error.
//!
//! # Usage
//!
//! Export a recording:
//! ```bash
//! daq-nexus export run.jsonl --output /data/runs
//! daq-nexus export run.jsonl --file-option compression=4 --file-option libver_latest=true
//! ```
//!
//! Print the default configuration:
//! ```bash
//! daq-nexus init-config > daq-nexus.toml
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use daq_nexus::config::ExportConfig;
use daq_nexus::container::OpenMode;
use daq_nexus::export::{export_json_lines, ExportOptions};
use daq_nexus::logging;
use daq_nexus::plot::PlotBinding;
use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "daq-nexus")]
#[command(about = "Write acquisition document streams into NeXus files", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Export a JSON-lines document stream
    Export {
        /// Path to the .jsonl recording
        input: PathBuf,

        /// Output directory (overrides the configured one)
        #[arg(long, short)]
        output: Option<PathBuf>,

        /// Optional config file
        #[arg(long)]
        config: Option<PathBuf>,

        /// File name template, e.g. "{session_name}_{uid}"
        #[arg(long)]
        template: Option<String>,

        /// Truncate existing files instead of picking a new name
        #[arg(long)]
        overwrite: bool,

        /// JSON file holding a list of plot bindings
        #[arg(long)]
        plots: Option<PathBuf>,

        /// File layer option as key=value (libver_latest, userblock_size, compression)
        #[arg(long = "file-option", value_parser = parse_key_value)]
        file_options: Vec<(String, String)>,
    },

    /// Print the default configuration as TOML
    InitConfig,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Export {
            input,
            output,
            config,
            template,
            overwrite,
            plots,
            file_options,
        } => run_export(input, output, config, template, overwrite, plots, file_options),
        Commands::InitConfig => {
            print!("{}", ExportConfig::default().to_toml()?);
            Ok(())
        }
    }
}

fn parse_key_value(s: &str) -> Result<(String, String), String> {
    s.split_once('=')
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .ok_or_else(|| format!("expected key=value, got '{s}'"))
}

fn run_export(
    input: PathBuf,
    output: Option<PathBuf>,
    config_path: Option<PathBuf>,
    template: Option<String>,
    overwrite: bool,
    plots: Option<PathBuf>,
    file_options: Vec<(String, String)>,
) -> Result<()> {
    let mut config = match &config_path {
        Some(path) => ExportConfig::load_from(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => ExportConfig::load()?,
    };
    if let Some(template) = template {
        config.output.name_template = template;
    }
    if let Some(directory) = output {
        config.output.directory = directory;
    }
    if overwrite {
        config.output.one_file_per_entry = false;
        config.output.open_mode = OpenMode::Create;
    }
    if !file_options.is_empty() {
        let pairs = file_options.iter().map(|(k, v)| (k.as_str(), v.as_str()));
        config.file = config.file.clone().with_pairs(pairs)?;
    }
    config.validate()?;
    logging::init_from_config(&config)?;

    let mut options = ExportOptions::from_config(&config);
    if let Some(path) = plots {
        let file = File::open(&path).with_context(|| format!("opening plots {}", path.display()))?;
        let bindings: Vec<PlotBinding> = serde_json::from_reader(BufReader::new(file))
            .with_context(|| format!("parsing plots {}", path.display()))?;
        options = options.with_plots(bindings);
    }

    let reader = BufReader::new(
        File::open(&input).with_context(|| format!("opening {}", input.display()))?,
    );
    let artifacts = export_json_lines(reader, config.output.directory.clone(), options)?;
    println!("{}", serde_json::to_string_pretty(&artifacts)?);
    Ok(())
}
