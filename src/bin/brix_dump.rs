//! Template dump utility
//! Writes a JSON tree (as produced by brix-parse --json) back out as bytes

use brix::{Template, TemplateConfig, Tree};
use std::env;
use std::fs;
use tracing_subscriber::{fmt::format::FmtSpan, prelude::*, EnvFilter};

fn main() -> anyhow::Result<()> {
    // Initialize tracing
    let filter_layer = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new("info"))?;

    let format_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_span_events(FmtSpan::NONE);

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(format_layer)
        .init();

    // Parse command line arguments
    let args: Vec<String> = env::args().collect();
    if args.len() != 4 && args.len() != 6 {
        eprintln!(
            "Usage: {} <schema.yaml> <tree.json> <out.bin> [--max-depth N]",
            args[0]
        );
        std::process::exit(1);
    }

    let schema_file = &args[1];
    let tree_file = &args[2];
    let out_file = &args[3];

    let mut config = TemplateConfig::default();
    if args.len() == 6 {
        if args[4] != "--max-depth" {
            anyhow::bail!("Unknown option: {}", args[4]);
        }
        config.max_depth = args[5].parse()?;
    }

    let schema = fs::read_to_string(schema_file)?;
    let template = Template::from_yaml(&schema)?.with_config(config);
    let tree = Tree::from_json(&fs::read_to_string(tree_file)?)?;

    let bytes = template.dump(&tree)?;
    if let Some(size) = tree.size.filter(|size| *size != bytes.len()) {
        tracing::warn!("Dumped {} bytes, tree was parsed from {}", bytes.len(), size);
    }

    fs::write(out_file, &bytes)?;
    tracing::info!("Wrote {} bytes to {}", bytes.len(), out_file);

    Ok(())
}
