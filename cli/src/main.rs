// capmesh-cli — simulate, inspect and configure capability discovery
//
// Runs multi-node simulations over tokio tasks, prints persisted capability
// and route tables, and checks taxonomy documents.

mod config;
mod sim;

use anyhow::{Context, Result};
use capmesh_core::store::{load_capability_table, load_route_table, load_taxonomy};
use capmesh_core::{Parameter, PeerId, SearchKind, Taxonomy};
use clap::{Parser, Subcommand};
use colored::*;
use sim::{SimulationOptions, SimulationReport, Topology};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "capmesh")]
#[command(about = "capmesh — capability dissemination and gradient search", long_about = None)]
#[command(version)]
struct Cli {
    /// Node config file (defaults to the platform config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log protocol steps at info level
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs and reports as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a simulated network: the last node provides, node 0 searches
    Simulate {
        #[arg(short, long, default_value = "5")]
        nodes: u32,
        #[arg(short, long, value_enum, default_value = "line")]
        topology: Topology,
        /// Parameter provided by the last node (repeatable)
        #[arg(short, long)]
        provide: Vec<Parameter>,
        /// Parameter searched by node 0 (repeatable)
        #[arg(short, long)]
        search: Vec<Parameter>,
        /// Match providers of more specific parameters
        #[arg(short, long)]
        generic: bool,
        #[arg(short, long, default_value = "2000")]
        duration_ms: u64,
        /// Age every table at this period
        #[arg(long)]
        age_ms: Option<u64>,
        /// Save each node's capability and route tables here
        #[arg(long)]
        save: Option<PathBuf>,
    },
    /// Print a persisted capability table
    Inspect {
        file: PathBuf,
        /// Node the table belongs to
        #[arg(long, default_value = "0")]
        host: PeerId,
        /// Read the file as a route table
        #[arg(long)]
        routes: bool,
    },
    /// Load a taxonomy document
    Taxonomy {
        file: PathBuf,
        /// Evaluate whether the first concept subsumes the second
        #[arg(long, num_args = 2, value_names = ["GENERAL", "SPECIFIC"])]
        check: Option<Vec<String>>,
    },
    /// Show or change the node config
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    Set { key: String, value: String },
    List,
    Path,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.json);

    let config_path = cli.config.as_deref();
    match cli.command {
        Commands::Simulate {
            nodes,
            topology,
            provide,
            search,
            generic,
            duration_ms,
            age_ms,
            save,
        } => {
            let kind = if generic {
                SearchKind::Generic
            } else {
                SearchKind::Exact
            };
            let options = SimulationOptions {
                nodes,
                topology,
                provide,
                search,
                kind,
                duration: Duration::from_millis(duration_ms),
                age_every: age_ms.filter(|ms| *ms > 0).map(Duration::from_millis),
                save_dir: save,
            };
            cmd_simulate(config_path, options, cli.json).await
        }
        Commands::Inspect { file, host, routes } => cmd_inspect(config_path, &file, host, routes),
        Commands::Taxonomy { file, check } => cmd_taxonomy(&file, check),
        Commands::Config { action } => cmd_config(config_path, action),
    }
}

fn init_tracing(verbose: bool, json: bool) {
    let default_level = if verbose { "info" } else { "warn" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn cmd_simulate(
    config_path: Option<&Path>,
    options: SimulationOptions,
    json: bool,
) -> Result<()> {
    let config = config::load(config_path)?;
    let taxonomy = config.load_taxonomy();
    let searched: Vec<String> = options.search.iter().map(|p| p.to_string()).collect();
    let topology = options.topology;

    let report = sim::run(config, taxonomy, options).await?;

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&report).context("Failed to serialize report")?
        );
        return Ok(());
    }

    print_report(&report, topology, &searched);
    Ok(())
}

fn print_report(report: &SimulationReport, topology: Topology, searched: &[String]) {
    println!(
        "{} ({:?}, {} nodes, {} frames)",
        "Simulation".bold(),
        topology,
        report.nodes.len(),
        report.frames
    );
    if !report.settled {
        println!("  {} did not settle in time", "⚠".yellow());
    }
    println!();

    if !searched.is_empty() {
        println!("{} {}", "Search".bold(), searched.join(", ").bright_cyan());
        if report.found.is_empty() {
            println!("  {}", "No provider found.".dimmed());
        }
        for found in &report.found {
            println!(
                "  {} node {} provides {} ({} hops)",
                "✓".green(),
                found.provider.to_string().bright_cyan(),
                found.parameters.join(", ").bright_yellow(),
                found.distance
            );
        }
        println!();
    }

    println!("{}", "Tables".bold());
    for node in &report.nodes {
        let rows: Vec<String> = node
            .distances
            .iter()
            .map(|(p, d)| format!("{}={}", p, d))
            .collect();
        let rows = if rows.is_empty() {
            "(empty)".dimmed().to_string()
        } else {
            rows.join(" ")
        };
        let searching = if node.active_searches > 0 {
            format!(" [{} searches]", node.active_searches).dimmed().to_string()
        } else {
            String::new()
        };
        println!("  {:>3}  {}{}", node.id.to_string().bright_cyan(), rows, searching);
    }
}

fn cmd_inspect(config_path: Option<&Path>, file: &Path, host: PeerId, routes: bool) -> Result<()> {
    let config = config::load(config_path)?;
    let taxonomy: Arc<dyn Taxonomy> = config.load_taxonomy();

    if routes {
        let table = load_route_table(file, host, taxonomy, config.max_ttl())
            .with_context(|| format!("Failed to load route table {}", file.display()))?;

        println!("{} {}", "Routes of node".bold(), host.to_string().bright_cyan());
        for route in table.routes() {
            println!(
                "  {} → {} via {} ({} hops, {})",
                route.route_id.to_string().dimmed(),
                route.dest.to_string().bright_cyan(),
                route.through,
                route.distance,
                if table.is_search_route(&route.route_id) {
                    "search"
                } else {
                    "response"
                }
            );
        }
        for search in table.active_searches() {
            let parameters: Vec<String> = search.searched().iter().map(|p| p.to_string()).collect();
            println!(
                "  {} {} from {} [{}]",
                "search".bright_green(),
                search.id,
                search.source(),
                parameters.join(", ").bright_yellow()
            );
        }
        return Ok(());
    }

    let table = load_capability_table(file, host, config.max_distance(), taxonomy)
        .with_context(|| format!("Failed to load capability table {}", file.display()))?;

    println!("{} ({} rows)", "Capability table".bold(), table.len());
    if table.is_empty() {
        println!("  {}", "(empty)".dimmed());
    }
    for (p, distances) in table.rows() {
        let marker = if table.is_local(p) { "*" } else { " " };
        println!(
            "  {}{:<12} {}",
            marker.bright_green(),
            p.to_string().bright_yellow(),
            distances.effective_distance()
        );
        for entry in distances.iter() {
            let optional = if entry.optional { " (optional)" } else { "" };
            println!(
                "      {} from {}{}",
                entry.distance,
                entry.neighbor,
                optional.dimmed()
            );
        }
    }
    Ok(())
}

fn cmd_taxonomy(file: &Path, check: Option<Vec<String>>) -> Result<()> {
    let taxonomy = load_taxonomy(file)
        .with_context(|| format!("Failed to load taxonomy {}", file.display()))?;

    println!(
        "{} {} concepts, root {}",
        "✓".green(),
        taxonomy.len(),
        taxonomy.root().unwrap_or("(none)").bright_cyan()
    );
    if let Some(root) = taxonomy.root() {
        print_concept(&taxonomy, root, 1);
    }

    if let Some([general, specific]) = check.as_deref() {
        let verdict = if taxonomy.subsumes(general, specific) {
            "subsumes".green()
        } else {
            "does not subsume".red()
        };
        println!();
        println!("{} {} {}", general.bright_cyan(), verdict, specific.bright_cyan());
    }
    Ok(())
}

fn print_concept(taxonomy: &capmesh_core::BasicTaxonomy, concept: &str, depth: usize) {
    println!("{}{}", "  ".repeat(depth), concept);
    for child in taxonomy.children(concept) {
        print_concept(taxonomy, child, depth + 1);
    }
}

fn cmd_config(config_path: Option<&Path>, action: ConfigAction) -> Result<()> {
    let mut node_config = config::load(config_path)?;

    match action {
        ConfigAction::Set { key, value } => {
            config::set(&mut node_config, &key, &value)?;
            config::save(&node_config, config_path)?;
            println!("{} Set {} = {}", "✓".green(), key.bright_cyan(), value);
        }

        ConfigAction::List => {
            println!("{}", "Configuration".bold());
            println!();
            for (key, value) in config::list(&node_config) {
                println!("  {:<16} {}", key.bright_cyan(), value);
            }
        }

        ConfigAction::Path => {
            println!("{}", config::config_file(config_path)?.display());
        }
    }

    Ok(())
}
