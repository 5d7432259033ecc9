use anyhow::Context;
use clap::Parser;
use pathql::driver::registry::parse_type_definition;
use pathql::Driver;
use serde_json::{Map, Value};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "pathql")]
#[command(about = "PathQL - SQL over line-delimited JSON/YAML tables", long_about = None)]
struct Args {
    /// Data source name (e.g. file:///data/ or a bare directory path)
    #[arg(long, env = "PATHQL_DSN", default_value = ".")]
    dsn: String,

    /// Register a table type (e.g. --type 'Foo=struct{Id int; Name string}')
    #[arg(long = "type")]
    types: Vec<String>,

    /// Placeholder argument; parsed as JSON, falling back to a plain string
    #[arg(long = "arg")]
    args: Vec<String>,

    /// Pretty-print each row
    #[arg(long)]
    pretty: bool,

    /// Print column metadata before the rows
    #[arg(long)]
    columns: bool,

    /// SELECT or REGISTER TYPE statement
    sql: String,
}

fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "pathql=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let conn = Driver::open(&args.dsn).with_context(|| format!("failed to open {}", args.dsn))?;
    for entry in &args.types {
        let (name, definition) = entry
            .split_once('=')
            .with_context(|| format!("invalid --type '{}', expected Name=definition", entry))?;
        let schema = parse_type_definition(name.trim(), definition.trim())?;
        conn.register_type(name.trim(), schema);
    }

    let values: Vec<Value> = args
        .args
        .iter()
        .map(|arg| serde_json::from_str(arg).unwrap_or_else(|_| Value::String(arg.clone())))
        .collect();

    let stmt = conn.prepare(&args.sql)?;
    if !stmt.is_select() {
        stmt.exec(&values)?;
        tracing::info!("Statement executed");
        return Ok(());
    }

    let rows = stmt.query(&values)?;
    if args.columns {
        println!("{}", serde_json::to_string(&rows.column_types())?);
    }
    let names = rows.columns();
    let mut count = 0;
    for row in rows {
        let row = row?;
        let record: Map<String, Value> = names.iter().cloned().zip(row).collect();
        let record = Value::Object(record);
        if args.pretty {
            println!("{}", serde_json::to_string_pretty(&record)?);
        } else {
            println!("{}", serde_json::to_string(&record)?);
        }
        count += 1;
    }
    tracing::info!("{} row(s)", count);
    Ok(())
}
