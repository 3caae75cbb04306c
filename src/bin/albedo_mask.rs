use std::fs;
use std::path::PathBuf;

use albedo_to_mask::{ClusterBackend, ClusterConfig, OutputKind, OutputNaming, QuantizationPipeline};
use anyhow::{Context, Result, bail};
use clap::{Parser, ValueEnum};
use serde_json::json;

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Backend {
    /// Weighted Lloyd iterations with pixel-sampled restarts
    Lloyd,
    /// kmeans_colors (k-means++ init), at most 255 colors
    KmeansColors,
}

impl From<Backend> for ClusterBackend {
    fn from(b: Backend) -> Self {
        match b {
            Backend::Lloyd => ClusterBackend::Lloyd,
            Backend::KmeansColors => ClusterBackend::KmeansColors,
        }
    }
}

/// Split albedo textures into RGB channel masks, three color clusters per mask.
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// One or more input image paths
    #[arg(required = true)]
    inputs: Vec<PathBuf>,

    /// Total number of color clusters
    #[arg(short = 'k', long = "colors", default_value_t = 8)]
    n_colors: usize,

    /// Maximum refinement iterations per attempt
    #[arg(long, default_value_t = 100)]
    max_iter: usize,

    /// Stop once no cluster center moves further than this (0-255 units)
    #[arg(long, default_value_t = 0.2)]
    epsilon: f64,

    /// Number of k-means restarts; the lowest-distortion one is kept
    #[arg(short, long, default_value_t = 10)]
    attempts: usize,

    /// Seed for the restarts. Random when omitted.
    #[arg(long)]
    seed: Option<u64>,

    #[arg(long, value_enum, default_value_t = Backend::Lloyd)]
    backend: Backend,

    /// Run restarts one after another instead of on worker threads
    #[arg(long)]
    sequential: bool,

    /// Output directory. Defaults to the directory of each input.
    #[arg(short = 'd', long)]
    out_dir: Option<PathBuf>,

    /// Output file extension. Defaults to the extension of each input.
    #[arg(short, long)]
    format: Option<String>,

    /// Also save the clustered preview as <name>_Clustered.<ext>
    #[arg(short, long)]
    preview: bool,

    /// Print a JSON summary per input instead of plain lines
    #[arg(long)]
    json: bool,
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let config = ClusterConfig {
        k: args.n_colors,
        max_iterations: args.max_iter,
        epsilon: args.epsilon,
        attempts: args.attempts,
        seed: args.seed.unwrap_or_else(rand::random),
        backend: args.backend.into(),
        parallel: !args.sequential,
    };
    let pipeline = QuantizationPipeline::new(config);

    if let Some(dir) = &args.out_dir {
        fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
    }

    let mut failed = 0usize;
    for input in &args.inputs {
        let mut naming = OutputNaming::for_input(input);
        if let Some(dir) = &args.out_dir {
            naming = naming.in_dir(dir);
        }
        if let Some(ext) = &args.format {
            naming = naming.with_extension(ext);
        }

        let report = pipeline
            .write_outputs(input, &naming, args.preview)
            .with_context(|| format!("processing {}", input.display()))?;

        for err in &report.failures {
            eprintln!("error: {err}");
        }
        failed += report.failures.len();

        if args.json {
            let masks: Vec<String> = report
                .written
                .iter()
                .filter(|(kind, _)| matches!(kind, OutputKind::Mask(_)))
                .map(|(_, path)| path.display().to_string())
                .collect();
            let summary = json!({
                "input": input.display().to_string(),
                "colors": report.summary.clustering.k(),
                "palette": report.summary.clustering.palette_hex(),
                "distortion": report.summary.clustering.distortion,
                "groups": report.summary.groups.iter().map(|g| g.clusters().to_vec()).collect::<Vec<_>>(),
                "masks": masks,
                "failures": report.failures.len(),
            });
            println!("{summary}");
        } else {
            for (_, path) in &report.written {
                println!("Saved → {}", path.display());
            }
        }
    }

    if failed > 0 {
        bail!("{failed} output(s) could not be written");
    }
    Ok(())
}
