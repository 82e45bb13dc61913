use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Load spreadsheet order exports into SQL tables described by a mapping catalog",
    long_about = None
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Validate and insert the rows of a delimited file into a table
    Import(ImportArgs),
    /// Write the rows of a table to a delimited file
    Export(ExportArgs),
    /// Remove every row of a table
    Truncate(TruncateArgs),
    /// Print the resolved column definitions of a table as YAML
    Resolve(ResolveArgs),
    /// Load a mapping catalog and report its tables
    CheckCatalog(CheckCatalogArgs),
}

#[derive(Debug, Args)]
pub struct CatalogArg {
    /// Mapping catalog YAML (built-in orders catalog if omitted)
    #[arg(short = 'c', long = "catalog")]
    pub catalog: Option<PathBuf>,
}

#[derive(Debug, Args)]
pub struct StoreArgs {
    #[command(flatten)]
    pub catalog: CatalogArg,
    /// SQLite database file
    #[arg(short = 'd', long = "database")]
    pub database: PathBuf,
    /// Table identifier from the catalog
    #[arg(short = 't', long = "table")]
    pub table: String,
    /// Persisted-name overrides of the form `id=table_name`
    #[arg(long = "table-name", action = clap::ArgAction::Append, value_parser = parse_table_name)]
    pub table_names: Vec<(String, String)>,
}

#[derive(Debug, Args)]
pub struct ImportArgs {
    #[command(flatten)]
    pub store: StoreArgs,
    /// Input file (`-` for stdin)
    #[arg(short = 'i', long = "input")]
    pub input: PathBuf,
    /// Statements per transaction (catalog setting if omitted)
    #[arg(long = "batch-size")]
    pub batch_size: Option<usize>,
    /// Apply the whole file in one transaction
    #[arg(long = "single-transaction")]
    pub single_transaction: bool,
    /// Fail on the first rejected row instead of skipping it
    #[arg(long = "abort-on-reject")]
    pub abort_on_reject: bool,
    /// Clear the table before loading
    #[arg(long = "truncate-first")]
    pub truncate_first: bool,
    /// Write rejected rows as JSON lines to this file
    #[arg(long = "rejects")]
    pub rejects: Option<PathBuf>,
    /// Delimiter character (supports ',', 'tab', ';', '|')
    #[arg(long, value_parser = parse_delimiter)]
    pub delimiter: Option<u8>,
    /// Character encoding of the input file (defaults to utf-8)
    #[arg(long = "input-encoding")]
    pub input_encoding: Option<String>,
}

#[derive(Debug, Args)]
pub struct ExportArgs {
    #[command(flatten)]
    pub store: StoreArgs,
    /// Output file (stdout if omitted)
    #[arg(short = 'o', long = "output")]
    pub output: Option<PathBuf>,
    /// Delimiter character (supports ',', 'tab', ';', '|')
    #[arg(long, value_parser = parse_delimiter)]
    pub delimiter: Option<u8>,
}

#[derive(Debug, Args)]
pub struct TruncateArgs {
    #[command(flatten)]
    pub store: StoreArgs,
}

#[derive(Debug, Args)]
pub struct ResolveArgs {
    #[command(flatten)]
    pub catalog: CatalogArg,
    /// Table identifier
    #[arg(short = 't', long = "table")]
    pub table: String,
    /// Delimited file whose first row seeds columns for tables the catalog lacks
    #[arg(long = "sample")]
    pub sample: Option<PathBuf>,
    /// Delimiter of the sample file
    #[arg(long, value_parser = parse_delimiter)]
    pub delimiter: Option<u8>,
}

#[derive(Debug, Args)]
pub struct CheckCatalogArgs {
    #[command(flatten)]
    pub catalog: CatalogArg,
}

pub fn parse_delimiter(value: &str) -> Result<u8, String> {
    match value {
        "tab" | "\t" => Ok(b'\t'),
        "comma" | "," => Ok(b','),
        "|" | "pipe" => Ok(b'|'),
        ";" | "semicolon" => Ok(b';'),
        other => {
            let mut chars = other.chars();
            let first = chars
                .next()
                .ok_or_else(|| "Delimiter cannot be empty".to_string())?;
            if chars.next().is_some() {
                return Err("Delimiter must be a single character".to_string());
            }
            if !first.is_ascii() {
                return Err("Delimiter must be ASCII".to_string());
            }
            Ok(first as u8)
        }
    }
}

pub fn parse_table_name(value: &str) -> Result<(String, String), String> {
    let (id, name) = value
        .split_once('=')
        .ok_or_else(|| format!("Expected `id=table_name`, got '{value}'"))?;
    let (id, name) = (id.trim(), name.trim());
    if id.is_empty() || name.is_empty() {
        return Err(format!("Expected `id=table_name`, got '{value}'"));
    }
    Ok((id.to_string(), name.to_string()))
}
