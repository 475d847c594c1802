//! Template parse utility
//! Parses a binary file against a YAML template and prints the resulting tree

use brix::{ElementRef, Template, TemplateConfig};
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
    if args.len() < 3 {
        eprintln!(
            "Usage: {} <schema.yaml> <data.bin> [--json] [--title T] [--max-depth N]",
            args[0]
        );
        eprintln!("\nExamples:");
        eprintln!("  {} bmp.yaml image.bmp              # Indented tree", args[0]);
        eprintln!("  {} bmp.yaml image.bmp --json > t.json", args[0]);
        std::process::exit(1);
    }

    let schema_file = &args[1];
    let data_file = &args[2];

    let mut json = false;
    let mut title = String::new();
    let mut config = TemplateConfig::default();
    let mut options = args[3..].iter();
    while let Some(option) = options.next() {
        match option.as_str() {
            "--json" => json = true,
            "--title" => {
                title = options
                    .next()
                    .ok_or_else(|| anyhow::anyhow!("--title needs a value"))?
                    .clone();
            }
            "--max-depth" => {
                let value = options
                    .next()
                    .ok_or_else(|| anyhow::anyhow!("--max-depth needs a value"))?;
                config.max_depth = value.parse()?;
            }
            other => anyhow::bail!("Unknown option: {}", other),
        }
    }

    let schema = fs::read_to_string(schema_file)?;
    let template = Template::from_yaml(&schema)?.with_config(config);
    let data = fs::read(data_file)?;
    tracing::info!("Parsing {} ({} bytes) with {}", data_file, data.len(), schema_file);

    let tree = template.parse(&data, &title)?;
    tracing::info!("Parsed {} elements", tree.count());

    if json {
        println!("{}", tree.to_json_pretty()?);
        return Ok(());
    }

    tree.traverse(|element, level| {
        let indent = "  ".repeat(level);
        match element {
            ElementRef::Node(node) => println!("{}{} @ 0x{:04X}", indent, node.title, node.offset),
            ElementRef::Leaf(leaf) => println!(
                "{}{} @ 0x{:04X} = {}",
                indent, leaf.title, leaf.offset, leaf.value
            ),
        }
    });

    Ok(())
}
