use anyhow::{Result, bail};
use clap::{Args, Parser};
use composable_federation::{FederationBuild, load_config};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

const MANIFEST_FILE: &str = "federation-manifest.json";
const CONTAINER_ENTRY_FILE: &str = "container-entry.js";

#[derive(Parser)]
#[command(name = "federate")]
#[command(about = "Resolve module federation declarations into runtime glue")]
struct Cli {
    #[command(flatten)]
    mode: ModeArgs,

    /// Federation definition files (.toml)
    #[arg(required = true)]
    definitions: Vec<PathBuf>,

    /// Directory requests are resolved from
    #[arg(long, short, default_value = ".")]
    context: PathBuf,

    /// Import request issued by the bundle (repeatable)
    #[arg(long, short)]
    request: Vec<String>,
}

#[derive(Args)]
#[group(required = true, multiple = false)]
struct ModeArgs {
    /// Perform a dry run, printing the module graph without writing output
    #[arg(long, short)]
    dry_run: bool,

    /// Export module graph to DOT file (graph.dot)
    #[arg(long, short)]
    export: bool,

    /// Write the federation manifest and container entry to a directory
    #[arg(long, value_name = "DIR")]
    emit: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    println!("Loading definitions from: {:?}...", cli.definitions);
    let config = load_config(&cli.definitions)?;
    let output = FederationBuild::new(config, &cli.context)
        .with_requests(cli.request)
        .run()
        .await?;

    if cli.mode.dry_run {
        println!("--- Federation Module Graph (Dry Run) ---");
        println!("{:#?}", output.graph);
        println!("-----------------------------------------");
        for warning in &output.warnings {
            println!("warning: {warning}");
        }
    } else if cli.mode.export {
        let filename = "graph.dot";
        output.graph.write_dot_file(filename)?;
        println!("Graph exported to {filename}");
    } else if let Some(dir) = &cli.mode.emit {
        tokio::fs::create_dir_all(dir).await?;
        let manifest = serde_json::to_string_pretty(&output.manifest)?;
        tokio::fs::write(dir.join(MANIFEST_FILE), manifest).await?;
        println!("Manifest written to {}", dir.join(MANIFEST_FILE).display());
        if let Some(source) = &output.container_source {
            tokio::fs::write(dir.join(CONTAINER_ENTRY_FILE), source).await?;
            println!("Container entry written to {}", dir.join(CONTAINER_ENTRY_FILE).display());
        }
    }

    for error in &output.errors {
        eprintln!("error: {error}");
    }
    if !output.is_ok() {
        bail!("Federation build failed with {} error(s)", output.errors.len());
    }
    Ok(())
}
