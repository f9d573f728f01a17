//! Reports whether the persisted document index is present and consistent.
//! Exits 0 when the `.index`/`.data` pair is ready to serve searches.

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;

use docs_assistant::core::config::{AppPaths, ConfigService};
use docs_assistant::rag::persist;

fn megabytes(bytes: Option<u64>) -> String {
    match bytes {
        Some(bytes) => format!("{:.2} MB", bytes as f64 / (1024.0 * 1024.0)),
        None => "-".to_string(),
    }
}

fn run() -> anyhow::Result<bool> {
    let paths = Arc::new(AppPaths::new());
    let config = ConfigService::new(paths)
        .retrieval_config()
        .context("Failed to resolve retrieval configuration")?;

    let report = persist::inspect(&config.index_path);

    println!("Index path: {}", report.paths.vectors.display());
    println!("Data path: {}", report.paths.data.display());
    println!("Index exists: {}", report.paths.both_exist());
    println!("Index size: {}", megabytes(report.vectors_bytes));
    println!("Data size: {}", megabytes(report.data_bytes));

    if let Some(manifest) = &report.manifest {
        println!("Vectors: {}", manifest.count);
        println!("Dimension: {}", manifest.dimension);
        println!("Model: {}", manifest.model_id);
        println!("Built at: {}", manifest.built_at.to_rfc3339());
    }

    if report.is_healthy() {
        println!("\nIndex files found - ready for vector search");
        return Ok(true);
    }

    println!("\nIndex is not usable:");
    for problem in &report.problems {
        println!("  {}", problem);
    }
    println!("  Set BUILD_INDEX=true and DOCS_DIR to build it,");
    println!("  or ship a pre-built .index/.data pair with the deployment.");
    Ok(false)
}

fn main() -> ExitCode {
    match run() {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(1),
        Err(err) => {
            eprintln!("ERROR: {:#}", err);
            ExitCode::from(1)
        }
    }
}
