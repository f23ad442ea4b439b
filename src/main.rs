//! mnemos CLI: hyperdimensional memory with a write-ahead log.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use miette::{IntoDiagnostic, Result};

use mnemos::cleanup::CleanupMatch;
use mnemos::concept::Metadata;
use mnemos::config::EngineConfig;
use mnemos::engine::Engine;
use mnemos::vsa::{Dimension, HyperVec};

const CONFIG_FILE: &str = "mnemos.toml";

#[derive(Parser)]
#[command(name = "mnemos", version, about = "Hyperdimensional memory with a write-ahead log")]
struct Cli {
    /// Data directory holding wal.log and snapshot.json.
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Hypervector dimension (overrides the config file).
    #[arg(long, global = true)]
    dimension: Option<usize>,

    /// TOML config file (default: <data-dir>/mnemos.toml when present).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Where a vector comes from on the command line.
#[derive(Args)]
#[group(required = true, multiple = false)]
struct VectorSource {
    /// Deterministic random vector from a numeric seed.
    #[arg(long)]
    seed: Option<u64>,

    /// Deterministic vector for a text token.
    #[arg(long)]
    token: Option<String>,

    /// Bundle of the tokens of a multi-word label.
    #[arg(long)]
    label: Option<String>,

    /// Order-sensitive encoding of comma-separated tokens.
    #[arg(long, value_delimiter = ',')]
    sequence: Option<Vec<String>>,

    /// Record of role=filler tokens, repeatable.
    #[arg(long, value_parser = parse_key_val)]
    record: Option<Vec<(String, String)>>,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize a data directory and write its config file.
    Init,

    /// Store a concept.
    Put {
        id: String,

        #[command(flatten)]
        source: VectorSource,

        /// Metadata entry, repeatable.
        #[arg(long = "meta", value_parser = parse_key_val)]
        meta: Vec<(String, String)>,
    },

    /// Show a concept.
    Get {
        id: String,

        /// Also print the phase vector.
        #[arg(long)]
        vector: bool,
    },

    /// Delete a concept.
    Delete { id: String },

    /// Similarity between two stored concepts.
    Similarity { a: String, b: String },

    /// Stored concepts nearest a concept or token.
    Cleanup {
        /// Stored concept to use as the query.
        #[arg(conflicts_with = "token", required_unless_present = "token")]
        id: Option<String>,

        /// Token to use as the query.
        #[arg(long)]
        token: Option<String>,

        /// Number of results.
        #[arg(long, default_value = "5")]
        k: usize,
    },

    /// Run a query plan, e.g. "load red; load apple; bind; store red_apple".
    Query { plan: String },

    /// Write a snapshot (default: <data-dir>/snapshot.json).
    Snapshot { path: Option<PathBuf> },

    /// Snapshot into the data directory and compact the WAL.
    Checkpoint,

    /// Rebuild state from a snapshot and WAL without modifying them.
    Replay {
        #[arg(long)]
        snapshot: Option<PathBuf>,

        #[arg(long)]
        wal: PathBuf,

        /// Print the rebuilt concepts as JSON lines.
        #[arg(long)]
        dump: bool,
    },

    /// Print every concept as JSON lines.
    Dump,

    /// Show engine info.
    Info,
}

fn main() -> Result<()> {
    miette::set_hook(Box::new(|_| {
        Box::new(
            miette::MietteHandlerOpts::new()
                .terminal_links(true)
                .unicode(true)
                .context_lines(3)
                .build(),
        )
    }))
    .ok(); // Ignore error if hook already set (e.g., in tests)

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = resolve_config(&cli)?;

    match cli.command {
        Commands::Init => {
            let engine = Engine::open(config.clone())?;
            if let Some(dir) = &config.data_dir {
                let path = dir.join(CONFIG_FILE);
                if !path.exists() {
                    config.save(&path)?;
                }
                println!("Initialized mnemos at {}", dir.display());
            }
            println!("{}", engine.info()?);
            engine.close()?;
        }

        Commands::Put { id, source, meta } => {
            let engine = Engine::open(config)?;
            let vector = source_vector(&engine, &source)?;
            let metadata: Metadata = meta.into_iter().collect();
            let concept = engine.store(&id, vector, metadata)?;
            println!("stored \"{}\" (revision {})", concept.id, concept.revision);
            engine.close()?;
        }

        Commands::Get { id, vector } => {
            let engine = Engine::open(config)?;
            let concept = engine.get(&id)?;
            println!("id:         {}", concept.id);
            println!("created_at: {}", concept.created_at);
            println!("updated_at: {}", concept.updated_at);
            println!("revision:   {}", concept.revision);
            for (key, value) in &concept.metadata {
                println!("meta:       {key}={value}");
            }
            if vector {
                println!("{}", serde_json::to_string(&concept.vector).into_diagnostic()?);
            }
        }

        Commands::Delete { id } => {
            let engine = Engine::open(config)?;
            engine.delete(&id)?;
            println!("deleted \"{id}\"");
            engine.close()?;
        }

        Commands::Similarity { a, b } => {
            let engine = Engine::open(config)?;
            let a = engine.get(&a)?;
            let b = engine.get(&b)?;
            let sim = engine.similarity(&a.vector, &b.vector)?;
            println!("{sim:.6}");
        }

        Commands::Cleanup { id, token, k } => {
            let engine = Engine::open(config)?;
            let query = match (id, token) {
                (Some(id), _) => engine.get(&id)?.vector,
                (None, Some(token)) => engine.encode_token(&token),
                (None, None) => miette::bail!("give a concept id or --token"),
            };
            print_matches(&engine.cleanup(&query, k)?);
        }

        Commands::Query { plan } => {
            let engine = Engine::open(config)?;
            let outcome = engine.planner().run(&plan)?;
            for id in &outcome.stored {
                println!("stored \"{id}\"");
            }
            if let Some(seq) = outcome.commit_seq {
                println!("committed at seq {seq}");
            }
            print_matches(&outcome.matches);
            engine.close()?;
        }

        Commands::Snapshot { path } => {
            let engine = Engine::open(config.clone())?;
            let path = path
                .or_else(|| config.snapshot_path())
                .ok_or_else(|| miette::miette!("no snapshot path and no data directory"))?;
            let info = engine.snapshot(&path)?;
            println!(
                "snapshot of {} concepts at seq {} written to {}",
                info.concepts,
                info.wal_offset,
                info.path.display()
            );
            engine.close()?;
        }

        Commands::Checkpoint => {
            let engine = Engine::open(config)?;
            let (info, stats) = engine.checkpoint()?;
            println!(
                "checkpoint at seq {}: {} concepts, WAL kept {} frames, dropped {}",
                info.wal_offset, info.concepts, stats.kept, stats.dropped
            );
            engine.close()?;
        }

        Commands::Replay {
            snapshot,
            wal,
            dump,
        } => {
            let engine = Engine::open(EngineConfig {
                data_dir: None,
                ..config
            })?;
            let recovered = engine.replay(snapshot.as_deref(), &wal)?;
            println!(
                "{} concepts, last seq {}: {}",
                recovered.store.len(),
                recovered.last_seq,
                recovered.report
            );
            for warning in &recovered.report.warnings {
                println!("  warning: {warning}");
            }
            if dump {
                for concept in recovered.store.all() {
                    println!("{}", serde_json::to_string(&concept).into_diagnostic()?);
                }
            }
        }

        Commands::Dump => {
            let engine = Engine::open(config)?;
            for concept in engine.all() {
                println!("{}", serde_json::to_string(&concept).into_diagnostic()?);
            }
        }

        Commands::Info => {
            let engine = Engine::open(config)?;
            println!("{}", engine.info()?);
            let report = engine.recovery_report();
            if !report.warnings.is_empty() || !report.discarded.is_empty() {
                println!("last recovery: {report}");
            }
        }
    }

    Ok(())
}

/// Config file (explicit, or `<data-dir>/mnemos.toml`), then CLI overrides.
fn resolve_config(cli: &Cli) -> Result<EngineConfig> {
    let data_dir = cli
        .data_dir
        .clone()
        .unwrap_or_else(|| PathBuf::from(".mnemos"));
    let file = cli
        .config
        .clone()
        .or_else(|| Some(data_dir.join(CONFIG_FILE)).filter(|p| p.exists()));

    let mut config = match file {
        Some(path) => EngineConfig::from_toml_file(&path)?,
        None => EngineConfig::default(),
    };
    if cli.data_dir.is_some() || config.data_dir.is_none() {
        config.data_dir = Some(data_dir);
    }
    if let Some(dimension) = cli.dimension {
        config.dimension = Dimension(dimension);
    }
    Ok(config)
}

fn source_vector(engine: &Engine, source: &VectorSource) -> Result<HyperVec> {
    if let Some(seed) = source.seed {
        return Ok(engine.random_vector(seed));
    }
    if let Some(token) = &source.token {
        return Ok(engine.encode_token(token));
    }
    if let Some(label) = &source.label {
        return Ok(engine.encode_label(label)?);
    }
    if let Some(tokens) = &source.sequence {
        let vecs: Vec<HyperVec> = tokens.iter().map(|t| engine.encode_token(t.trim())).collect();
        let refs: Vec<&HyperVec> = vecs.iter().collect();
        return Ok(engine.encode_sequence(&refs)?);
    }
    if let Some(pairs) = &source.record {
        let vecs: Vec<(HyperVec, HyperVec)> = pairs
            .iter()
            .map(|(role, filler)| (engine.encode_token(role), engine.encode_token(filler)))
            .collect();
        let refs: Vec<(&HyperVec, &HyperVec)> = vecs.iter().map(|(r, f)| (r, f)).collect();
        return Ok(engine.encode_record(&refs)?);
    }
    miette::bail!("give --seed, --token, --label, --sequence or --record")
}

fn print_matches(matches: &[CleanupMatch]) {
    if matches.is_empty() {
        println!("no match above threshold");
    }
    for (i, m) in matches.iter().enumerate() {
        println!("  {}. \"{}\" (similarity: {:.4})", i + 1, m.concept.id, m.similarity);
    }
}

fn parse_key_val(s: &str) -> std::result::Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got \"{s}\""))?;
    Ok((key.to_string(), value.to_string()))
}
