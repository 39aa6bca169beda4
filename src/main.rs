use std::{
    collections::HashMap,
    fs::File,
    io::{BufRead, BufReader},
    path::PathBuf,
};

use anyhow::Context;
use clap::{Parser, Subcommand};
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use serde::Deserialize;

use simbase::{codec, logging, Config, DocId, Neighbor, SimTable, TableConfig};

#[derive(Parser, Debug)]
#[command(name = "simbase", about = "Incremental top-K cosine similarity tables")]
struct Cli {
    /// Optional path to a config file (TOML)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Neighbors kept per document (overrides config)
    #[arg(long, global = true)]
    max_neighbors: Option<usize>,

    /// Snapshot preallocation hint (overrides config)
    #[arg(long, global = true)]
    load_factor: Option<f64>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Build a small table in memory and print its neighbor lists
    Demo,
    /// Build a table from JSON lines and save it
    Import {
        input: PathBuf,
        output: PathBuf,
        /// Dimension names, comma separated
        #[arg(long, value_delimiter = ',')]
        schema: Vec<String>,
    },
    /// Print statistics of a saved table
    Inspect {
        table: PathBuf,
        #[arg(long)]
        json: bool,
    },
    /// Print the ranked neighbors of one document
    Neighbors { table: PathBuf, id: DocId },
}

#[derive(Debug, Deserialize)]
struct ImportLine {
    id: DocId,
    #[serde(default)]
    distribution: Option<Vec<f32>>,
    #[serde(default)]
    pairs: Option<HashMap<String, f32>>,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Merge config values if provided; CLI flags win
    let mut cfg = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    if cli.max_neighbors.is_some() { cfg.max_neighbors = cli.max_neighbors; }
    if cli.load_factor.is_some() { cfg.load_factor = cli.load_factor; }
    logging::init_logging(cfg.log_filter.as_deref());
    let table_cfg = cfg.table()?;

    match cli.command {
        Commands::Demo => demo_cmd(table_cfg)?,
        Commands::Import { input, output, schema } => import_cmd(&input, &output, &schema, table_cfg)?,
        Commands::Inspect { table, json } => inspect_cmd(&table, json, table_cfg)?,
        Commands::Neighbors { table, id } => {
            let table = codec::load(&table, table_cfg).with_context(|| format!("loading {}", table.display()))?;
            print_neighbors(id, &table.retrieve(id));
        }
    }

    Ok(())
}

fn demo_cmd(cfg: TableConfig) -> anyhow::Result<()> {
    let mut table = SimTable::new(cfg);
    table.revise(["a", "b", "c"]);
    let docs: [(DocId, [f32; 3]); 6] = [
        (2, [0.9, 0.1, 0.0]),
        (3, [0.9, 0.0, 0.1]),
        (5, [0.1, 0.9, 0.0]),
        (7, [0.1, 0.0, 0.9]),
        (11, [0.0, 0.9, 0.1]),
        (13, [0.0, 0.1, 0.9]),
    ];
    for (id, distr) in &docs {
        table.add(*id, distr)?;
    }
    for (id, _) in &docs {
        print_neighbors(*id, &table.retrieve(*id));
    }
    Ok(())
}

fn import_cmd(input: &PathBuf, output: &PathBuf, schema: &[String], cfg: TableConfig) -> anyhow::Result<()> {
    let file = File::open(input).with_context(|| format!("opening {}", input.display()))?;
    let lines: Vec<String> = BufReader::new(file).lines().collect::<Result<_, _>>()?;

    let mut table = SimTable::new(cfg);
    if !schema.is_empty() {
        table.revise(schema.iter().cloned());
    }

    let pb = ProgressBar::new(lines.len() as u64);
    pb.set_style(ProgressStyle::with_template("{bar:40} {pos}/{len} documents").unwrap_or_else(|_| ProgressStyle::default_bar()));
    let mut skipped = 0usize;
    for (lineno, line) in lines.iter().enumerate() {
        pb.inc(1);
        if line.trim().is_empty() { continue; }
        let doc: ImportLine = serde_json::from_str(line).with_context(|| format!("line {}", lineno + 1))?;
        let res = match (doc.distribution, doc.pairs) {
            (Some(distr), _) => table.add(doc.id, &distr),
            (None, Some(pairs)) => table.append(doc.id, pairs),
            (None, None) => anyhow::bail!("line {}: needs `distribution` or `pairs`", lineno + 1),
        };
        if let Err(err) = res {
            pb.println(format!("{} line {}: {}", "skipped".yellow(), lineno + 1, err));
            skipped += 1;
        }
    }
    pb.finish_and_clear();

    codec::save(output, &table.snapshot()).with_context(|| format!("writing {}", output.display()))?;
    println!("Imported {} documents ({} skipped) to {}", table.len(), skipped, output.display());
    Ok(())
}

fn inspect_cmd(path: &PathBuf, json: bool, cfg: TableConfig) -> anyhow::Result<()> {
    let table = codec::load(path, cfg).with_context(|| format!("loading {}", path.display()))?;
    let stats = table.stats();
    if json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
        return Ok(());
    }
    println!("{}", path.display().to_string().bold());
    println!("  documents   {}", stats.live_documents);
    println!("  tombstones  {}", stats.tombstoned_records);
    println!("  floats      {}", stats.flat_len);
    println!("  dimensions  {} (active: {})", stats.dimensions, table.schema().join(", "));
    println!("  lists       {} (K = {})", stats.neighbor_lists, stats.max_neighbors);
    Ok(())
}

fn print_neighbors(id: DocId, neighbors: &[Neighbor]) {
    if neighbors.is_empty() {
        println!("{} {}", id.to_string().bold(), "no neighbors".dimmed());
        return;
    }
    let ranked: Vec<String> = neighbors
        .iter()
        .map(|n| format!("{}:{:.4}", n.id.to_string().green(), n.score))
        .collect();
    println!("{} {}", id.to_string().bold(), ranked.join(" "));
}
