//! Cruller CLI - quad remeshing command-line tool.
//!
//! Usage: cruller [OPTIONS] <INPUT> <OUTPUT>
//!
//! Run `cruller --help` for available options.

use std::path::PathBuf;
use std::time::Instant;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use cruller::param::{ParamOptions, Parametrizer, DEFAULT_SEED};
use cruller::{io, param};

#[derive(Parser)]
#[command(name = "cruller")]
#[command(author, version, about = "Field-aligned quad remesher", long_about = None)]
struct Cli {
    /// Input triangle mesh (.obj)
    input: PathBuf,

    /// Output quad mesh (.obj)
    output: PathBuf,

    /// Target face count (default: source vertex count)
    #[arg(short = 'f', long)]
    faces: Option<usize>,

    /// Use the anisotropic scale field
    #[arg(long)]
    with_scale: bool,

    /// Relax final quad vertex positions
    #[arg(long)]
    optimize_positions: bool,

    /// Seed for the randomized cut cancellation
    #[arg(long, default_value_t = DEFAULT_SEED)]
    seed: u64,

    /// Write a binary snapshot of the pipeline inputs before extraction
    #[arg(long)]
    snapshot: Option<PathBuf>,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    if let Err(e) = run(cli) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let mesh = io::load(&cli.input)?;
    println!(
        "Loaded: {} vertices, {} faces",
        mesh.num_vertices(),
        mesh.num_faces()
    );

    let mut options = ParamOptions::default().with_seed(cli.seed);
    options.with_scale = cli.with_scale;
    options.optimize_positions = cli.optimize_positions;
    if let Some(faces) = cli.faces {
        options.target_faces = Some(faces);
    }

    let start = Instant::now();
    let mut state = Parametrizer::initialize(mesh, &options)?;
    println!(
        "Prepared: {} vertices, {} faces (lattice scale {:.6})",
        state.mesh.num_vertices(),
        state.mesh.num_faces(),
        state.scale
    );

    println!("Optimizing fields...");
    state.optimize_fields();

    if let Some(path) = &cli.snapshot {
        param::snapshot::save_to_path(&state, path)?;
        println!("Snapshot: {}", path.display());
    }

    println!("Extracting quads...");
    state.compute_index_map()?;
    let elapsed = start.elapsed();

    let kept = state.bad_vertices.iter().filter(|&&b| !b).count();
    println!(
        "Result: {} vertices, {} quads, {} cut edges",
        kept,
        state.f_compact.len(),
        state.cuts.len()
    );
    io::save_quads(&state, &cli.output)?;
    println!("Saved: {} ({:.2?})", cli.output.display(), elapsed);

    Ok(())
}
