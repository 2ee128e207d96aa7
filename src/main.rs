//! Command-line front end for the gpsbabel driver.

use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use gpsbabel::{
    ActionOptions, BabelConfig, Capabilities, Error, GpsBabel, RunOutput, guess_format, parse_gpx,
};
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(version, about = "Convert GPS data through gpsbabel")]
struct Cli {
    /// JSON file with driver settings
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Converter executable, overriding the configuration
    #[arg(long, global = true)]
    gpsbabel: Option<String>,

    /// JSON capability tables; skips probing the converter
    #[arg(long, global = true)]
    capabilities: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List the formats, filters and charsets the converter supports
    Formats {
        /// Print the tables as JSON
        #[arg(long)]
        json: bool,
    },
    /// Convert one file into another
    Convert {
        input: String,
        output: String,
        /// Input format, guessed from the extension when omitted
        #[arg(short = 'i', long)]
        input_format: Option<String>,
        /// Output format, guessed from the extension when omitted
        #[arg(short = 'o', long)]
        output_format: Option<String>,
        /// Filter as `name[,option[=value]...]`; may be repeated
        #[arg(short = 'x', long = "filter")]
        filters: Vec<String>,
        /// Charset for both files
        #[arg(short = 'c', long)]
        charset: Option<String>,
        /// Pass the configured debug level to gpsbabel
        #[arg(long)]
        debug: bool,
    },
    /// Parse a GPX file locally and summarise it
    Parse {
        file: PathBuf,
        /// Re-serialise the parsed document instead of summarising
        #[arg(long)]
        xml: bool,
    },
}

fn load_config(cli: &Cli) -> Result<BabelConfig, Error> {
    let config = match &cli.config {
        Some(path) => BabelConfig::from_json(&fs::read_to_string(path)?)?,
        None => BabelConfig::default(),
    };
    Ok(match &cli.gpsbabel {
        Some(exe) => config.with_executable(exe.clone()),
        None => config,
    })
}

fn open_session(cli: &Cli) -> Result<GpsBabel, Error> {
    let config = load_config(cli)?;
    match &cli.capabilities {
        Some(path) => {
            let caps = Capabilities::from_json(&fs::read_to_string(path)?)?;
            Ok(GpsBabel::new(config, caps))
        }
        None => GpsBabel::discover(config),
    }
}

/// Split `simplify,count=6,crosstrack` into a name and its options.
fn parse_filter(arg: &str) -> (&str, ActionOptions) {
    let mut parts = arg.split(',');
    let name = parts.next().unwrap_or_default();
    let options = parts
        .filter(|part| !part.is_empty())
        .map(|part| match part.split_once('=') {
            Some((key, value)) => (key.to_string(), Some(value.to_string())),
            None => (part.to_string(), None),
        })
        .collect();
    (name, options)
}

fn format_for(explicit: Option<String>, path: &str) -> Result<String, Error> {
    match explicit {
        Some(format) => Ok(format),
        None => guess_format(path)
            .map(str::to_string)
            .ok_or_else(|| Error::UnknownFormat(path.to_string())),
    }
}

fn run(cli: Cli) -> Result<(), Error> {
    match &cli.command {
        Command::Formats { json } => {
            let babel = open_session(&cli)?;
            let caps = babel.capabilities();
            if *json {
                println!("{}", serde_json::to_string_pretty(caps)?);
            } else {
                if let Some(version) = babel.version() {
                    println!("{}", version.banner);
                }
                println!("formats: {}", caps.formats.keys().cloned().collect::<Vec<_>>().join(" "));
                println!("filters: {}", caps.filters.keys().cloned().collect::<Vec<_>>().join(" "));
                println!("charsets: {}", caps.charsets.keys().cloned().collect::<Vec<_>>().join(" "));
            }
        }
        Command::Convert {
            input,
            output,
            input_format,
            output_format,
            filters,
            charset,
            debug,
        } => {
            let debug = *debug;
            let in_format = format_for(input_format.clone(), input)?;
            let out_format = format_for(output_format.clone(), output)?;
            let mut babel = open_session(&cli)?;
            babel.add_input_file(input, &in_format, charset.as_deref())?;
            for arg in filters {
                let (name, options) = parse_filter(arg);
                babel.add_action("filter", name, None, options)?;
            }
            babel.add_output_file(output, &out_format, charset.as_deref())?;
            let args = babel.build_command(debug);
            debug!(args = ?args, "converting");
            if let RunOutput::Lines(lines) = babel.execute(false, debug)?.output {
                for line in lines {
                    println!("{line}");
                }
            }
        }
        Command::Parse { file, xml } => {
            let doc = parse_gpx(&fs::read_to_string(file)?)?;
            if *xml {
                print!("{}", doc.to_xml_with_creator(&load_config(&cli)?.creator));
            } else {
                let points: usize = doc
                    .tracks
                    .iter()
                    .flat_map(|t| &t.segments)
                    .map(|s| s.points.len())
                    .sum();
                println!("waypoints: {}", doc.waypoints.len());
                println!("routes: {}", doc.routes.len());
                println!("tracks: {} ({points} points)", doc.tracks.len());
            }
        }
    }
    Ok(())
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    match run(Cli::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("gpsbabel-rs: {err}");
            ExitCode::FAILURE
        }
    }
}
