use anyhow::{Context, Result};
use catalog_filter::config::{CatalogConfig, ConfigError};
use catalog_filter::{ExpressionCompiler, FilterNode, HandlerRegistry, SqlCompiler};
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const DEFAULT_CONFIG: &str = "catalog.json";

/// Loads the catalog config, falling back to the built-in catalog when the file is absent.
fn load_config(path: &str) -> Result<CatalogConfig> {
    match CatalogConfig::from_json_file(path) {
        Ok(config) => {
            info!(path, fields = config.fields.len(), "loaded catalog config");
            Ok(config)
        }
        Err(ConfigError::Missing(_)) => {
            warn!(path, "catalog config not found, using the built-in catalog");
            Ok(CatalogConfig::default())
        }
        Err(e) => Err(e).with_context(|| format!("invalid catalog config {path}")),
    }
}

fn print_help() {
    println!("Enter a filter tree as JSON on one line, for example:");
    println!(r#"  {{"or": [{{"field": "bucketId", "op": "eq", "value": 1}}, {{"field": "name", "op": "like", "value": "wf%"}}]}}"#);
    println!("Operators: eq ne like not_like gt gte lt lte. Groups: and, or.");
    println!("Commands: .fields  .help  .quit");
}

fn print_fields(config: &CatalogConfig) {
    println!("Base table: {}", config.base_table);
    for field in &config.fields {
        let families: Vec<String> = field.operators.iter().map(ToString::to_string).collect();
        let location = match &field.join {
            Some(join) => format!("{join}.{}", field.column),
            None => field.column.clone(),
        };
        println!(
            "  {:<16} {:<32} {:<8} {}",
            field.name,
            location,
            field.kind.to_string(),
            families.join(", ")
        );
    }
}

fn run_filter(line: &str, compiler: &ExpressionCompiler, sql: &SqlCompiler) -> Result<()> {
    let tree: FilterNode = serde_json::from_str(line).context("not a valid filter tree")?;
    let predicate = compiler.compile(Some(&tree))?;

    match &predicate {
        Some(predicate) => println!("Predicate: {predicate}"),
        None => println!("Predicate: <none, matches every record>"),
    }
    let result = sql.compile(predicate.as_ref())?;
    println!("SQL: {}", result.sql);
    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config_path = std::env::args().nth(1).unwrap_or_else(|| DEFAULT_CONFIG.to_string());
    let config = load_config(&config_path)?;

    let registry = HandlerRegistry::from_config(&config).context("cannot build field handlers")?;
    let compiler = ExpressionCompiler::new(Arc::new(registry));
    let sql = SqlCompiler::from_config(&config);

    println!("--- Catalog filter compiler ---");
    print_help();

    let mut editor = DefaultEditor::new().context("cannot start line editor")?;
    loop {
        match editor.readline("filter> ") {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                editor.add_history_entry(line)?;

                match line {
                    ".quit" | ".exit" => break,
                    ".help" => print_help(),
                    ".fields" => print_fields(&config),
                    _ => {
                        if let Err(e) = run_filter(line, &compiler, &sql) {
                            println!("Error: {e:#}");
                        }
                    }
                }
            }
            Err(ReadlineError::Interrupted | ReadlineError::Eof) => break,
            Err(e) => return Err(e).context("cannot read input"),
        }
    }
    Ok(())
}
