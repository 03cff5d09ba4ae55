//! subrule-gen: CLI tool for rendering rulesets and rule sections.

use clap::{Parser, Subcommand};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use subrule::{Engine, HttpFetcher, OutputType, RequestOverrides, RulesetRequest, Settings};

#[derive(Parser)]
#[command(name = "subrule-gen")]
#[command(author = "Kaitu.io")]
#[command(version = "0.1.0")]
#[command(about = "Render Clash rulesets and rule providers from remote rule lists", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Render rulesets in one output type (same as /getruleset)
    Ruleset {
        /// Output type: 1 Surge, 2 QuanX, 3 domain, 4 ipcidr, 5 domain list, 6 classical
        #[arg(short = 't', long = "type")]
        output_type: i64,

        /// Ruleset URL or local path, dialect prefix allowed (repeatable)
        #[arg(short, long, required = true)]
        url: Vec<String>,

        /// Policy group for QuanX output
        #[arg(short, long, default_value = "")]
        group: String,

        /// Settings file for fetch options
        #[arg(short, long)]
        settings: Option<PathBuf>,

        /// Output file (stdout when omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Generate rule-providers, rules and script sections from a settings file
    Providers {
        /// Settings YAML file
        #[arg(short, long)]
        settings: PathBuf,

        /// Extra ruleset lines (`group,url`) replacing the configured ones
        #[arg(short, long)]
        ruleset: Vec<String>,

        /// Output file (stdout when omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Verbose output
        #[arg(short, long)]
        verbose: bool,
    },
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Ruleset {
            output_type,
            url,
            group,
            settings,
            output,
        } => render_ruleset(output_type, url, group, settings.as_deref(), output.as_deref()),
        Commands::Providers {
            settings,
            ruleset,
            output,
            verbose,
        } => generate_providers(&settings, ruleset, output.as_deref(), verbose),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn load_settings(path: Option<&Path>) -> subrule::Result<Settings> {
    match path {
        Some(path) => Settings::load(path),
        None => Ok(Settings::default()),
    }
}

fn write_output(output: Option<&Path>, content: &str) -> Result<(), Box<dyn std::error::Error>> {
    match output {
        Some(path) => {
            let mut file = fs::File::create(path)?;
            file.write_all(content.as_bytes())?;
            println!("Generated {:?} ({} bytes)", path, content.len());
        }
        None => print!("{}", content),
    }
    Ok(())
}

fn render_ruleset(
    output_type: i64,
    urls: Vec<String>,
    group: String,
    settings: Option<&Path>,
    output: Option<&Path>,
) -> Result<(), Box<dyn std::error::Error>> {
    let output_type = OutputType::from_code(output_type)?;
    if output_type == OutputType::QuanX && group.is_empty() {
        return Err("type 2 requires --group".into());
    }

    let settings = load_settings(settings)?;
    let fetcher = HttpFetcher::with_options(settings.fetch_options())?;
    let request = RulesetRequest {
        output_type,
        urls,
        group,
    };
    let body = request.serve(&fetcher)?;
    write_output(output, &body)
}

fn generate_providers(
    settings: &Path,
    rulesets: Vec<String>,
    output: Option<&Path>,
    verbose: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let settings = Settings::load(settings)?;
    if verbose {
        println!(
            "Mode: {:?}, {} rulesets configured",
            settings.rule_provider_mode,
            settings.rulesets.len()
        );
    }

    let engine = Engine::with_http(settings)?;
    let overrides = RequestOverrides {
        rulesets,
        ..Default::default()
    };
    let sections = engine.rule_sections(&overrides)?;

    if verbose {
        println!(
            "Synthesized {} rule providers, {} rules{}",
            sections.rule_providers.len(),
            sections.rules.len(),
            if sections.script.is_some() { ", script" } else { "" }
        );
    }

    write_output(output, &sections.to_yaml()?)
}
