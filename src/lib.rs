pub mod adapter;
pub mod catalog;
pub mod cli;
pub mod config;
pub mod data;
pub mod error;
pub mod export;
pub mod identifier;
pub mod import;
pub mod io_utils;
pub mod record;
pub mod repository;
pub mod resolver;
pub mod statement;
pub mod store;
pub mod validate;
pub mod writer;
pub mod yaml_provider;

use std::{env, path::Path, sync::Arc, sync::OnceLock};

use anyhow::{Context, Result, anyhow};
use clap::Parser;
use log::{LevelFilter, info, warn};

use crate::{
    catalog::{CatalogHandle, MappingCatalog},
    cli::{CatalogArg, Cli, Commands, StoreArgs},
    config::LoaderConfig,
    repository::Repository,
    store::SqliteStore,
};

static LOGGER: OnceLock<()> = OnceLock::new();

fn init_logging() {
    LOGGER.get_or_init(|| {
        let mut builder = env_logger::Builder::from_env(env_logger::Env::default());
        if env::var("RUST_LOG").is_err() {
            builder.filter_module("order_loader", LevelFilter::Info);
        }
        let _ = builder.format_timestamp_millis().try_init();
    });
}

pub fn run() -> Result<()> {
    init_logging();
    let cli = Cli::parse();
    match cli.command {
        Commands::Import(args) => import::execute(&args),
        Commands::Export(args) => export::execute(&args),
        Commands::Truncate(args) => handle_truncate(&args.store),
        Commands::Resolve(args) => handle_resolve(&args),
        Commands::CheckCatalog(args) => handle_check_catalog(&args.catalog),
    }
}

fn handle_truncate(args: &StoreArgs) -> Result<()> {
    let catalog = load_catalog(&args.catalog)?;
    let config = loader_config(&catalog, args);
    let mut repository = open_repository(catalog, &args.database, config)?;
    if !repository.truncate(&args.table) {
        return Err(anyhow!("Could not clear table '{}'", args.table));
    }
    Ok(())
}

fn handle_resolve(args: &cli::ResolveArgs) -> Result<()> {
    let catalog = load_catalog(&args.catalog)?;
    let sample = match &args.sample {
        Some(path) => {
            let delimiter = io_utils::resolve_delimiter(Some(path.as_path()), args.delimiter);
            import::read_sample(path, delimiter, &catalog, &args.table)
                .with_context(|| format!("Reading sample {path:?}"))?
        }
        None => None,
    };
    let resolved = resolver::resolve(&args.table, &catalog, sample.as_ref())?;
    print!("{}", yaml_provider::to_string(&resolved)?);
    Ok(())
}

fn handle_check_catalog(args: &CatalogArg) -> Result<()> {
    let catalog = load_catalog(args)?;
    println!(
        "catalog v{} ({} table(s), sha256 {})",
        catalog.version,
        catalog.len(),
        catalog.fingerprint()
    );
    for (id, mapping) in catalog.active_tables() {
        println!(
            "{id} -> {} [{} column(s), order {}]",
            mapping.table_name,
            mapping.persisted_columns().len(),
            mapping.processing_order
        );
    }
    for id in catalog.skipped_tables() {
        warn!("Inactive table '{id}' was skipped");
    }
    Ok(())
}

pub(crate) fn load_catalog(arg: &CatalogArg) -> Result<MappingCatalog> {
    match &arg.catalog {
        Some(path) => {
            MappingCatalog::load(path).with_context(|| format!("Loading mapping catalog {path:?}"))
        }
        None => {
            info!("No catalog given; using the built-in orders catalog");
            Ok(MappingCatalog::builtin()?)
        }
    }
}

pub(crate) fn loader_config(catalog: &MappingCatalog, args: &StoreArgs) -> LoaderConfig {
    args.table_names
        .iter()
        .fold(LoaderConfig::from_settings(&catalog.settings), |config, (id, name)| {
            config.with_table_name(id.as_str(), name.as_str())
        })
}

pub(crate) fn open_repository(
    catalog: MappingCatalog,
    database: &Path,
    config: LoaderConfig,
) -> Result<Repository<SqliteStore>> {
    let store = SqliteStore::open(database)
        .map_err(|err| anyhow!("Opening database {database:?}: {err}"))?;
    Ok(Repository::new(
        Arc::new(CatalogHandle::new(catalog)),
        store,
        config,
    ))
}

pub(crate) fn printable_delimiter(delimiter: u8) -> String {
    match delimiter {
        b',' => ",".to_string(),
        b'\t' => "\\t".to_string(),
        b'\n' => "\\n".to_string(),
        other => (other as char).to_string(),
    }
}
