use std::{fs::File, io::BufWriter, path::Path};

use anyhow::{Context, Result, bail};
use encoding_rs::Encoding;
use log::{debug, info};

use crate::{
    adapter::{RowAdapter, from_row_untyped},
    catalog::{ErrorPolicy, MappingCatalog, TableMapping, TransactionMode},
    cli::ImportArgs,
    io_utils,
    record::Record,
    resolver::sample_from_records,
    validate::{JsonLinesSink, LogSink, RejectSink},
    writer::{Progress, WriteOptions},
};

pub fn execute(args: &ImportArgs) -> Result<()> {
    let catalog = crate::load_catalog(&args.store.catalog)?;
    let table_id = args.store.table.as_str();
    let delimiter = io_utils::resolve_delimiter(Some(args.input.as_path()), args.delimiter);
    let encoding = io_utils::resolve_encoding(args.input_encoding.as_deref())?;
    info!(
        "Importing {:?} into '{table_id}' using delimiter '{}'",
        args.input,
        crate::printable_delimiter(delimiter)
    );

    let records = read_records(&args.input, delimiter, encoding, catalog.resolve_table(table_id))
        .with_context(|| format!("Reading {:?}", args.input))?;
    if records.is_empty() {
        info!("No rows found in {:?}; nothing to import", args.input);
        return Ok(());
    }

    let mut config = crate::loader_config(&catalog, &args.store);
    if args.single_transaction {
        config = config.with_transaction_mode(TransactionMode::Single);
    }
    if args.abort_on_reject {
        config = config.with_error_policy(ErrorPolicy::Abort);
    }
    let mut repository = crate::open_repository(catalog, &args.store.database, config)?;

    if args.truncate_first && !repository.truncate(table_id) {
        bail!("Could not clear table '{table_id}' before import");
    }

    let mut report = |p: Progress| {
        info!(
            "Committed {}/{} row(s) (batch {}/{})",
            p.committed, p.total, p.unit, p.units
        )
    };
    let mut log_sink = LogSink::default();
    let mut file_sink = match &args.rejects {
        Some(path) => Some(JsonLinesSink::new(BufWriter::new(
            File::create(path).with_context(|| format!("Creating rejects file {path:?}"))?,
        ))),
        None => None,
    };
    let rejects: &mut dyn RejectSink = match file_sink.as_mut() {
        Some(sink) => sink,
        None => &mut log_sink,
    };

    let mut options = WriteOptions::default().progress(&mut report).rejects(rejects);
    if let Some(size) = args.batch_size {
        options = options.batch_size(size);
    }
    let outcome = repository
        .write(table_id, &records, options)
        .with_context(|| format!("Importing {:?} into '{table_id}'", args.input))?;

    if let (Some(sink), Some(path)) = (file_sink, &args.rejects) {
        let failed = sink.failed();
        let written = sink.written();
        sink.into_inner();
        info!("Recorded {written} rejected row(s) in {path:?}");
        if failed > 0 {
            bail!("{failed} rejected row(s) could not be written to {path:?}");
        }
    }
    info!(
        "Imported {} of {} row(s) into '{}' ({} rejected, run {})",
        outcome.committed,
        records.len(),
        outcome.table,
        outcome.rejected,
        outcome.run_id
    );
    Ok(())
}

/// Reads every non-empty row of `path` as a record, typed through `mapping`
/// when the table is catalogued.
pub fn read_records(
    path: &Path,
    delimiter: u8,
    encoding: &'static Encoding,
    mapping: Option<&TableMapping>,
) -> Result<Vec<Record>> {
    let mut reader = io_utils::open_csv_reader_from_path(path, delimiter)?;
    let headers = io_utils::reader_headers(&mut reader, encoding)?;
    let adapter = mapping.map(|mapping| RowAdapter::new(mapping, &headers));
    if let Some(adapter) = &adapter
        && adapter.matched() == 0
    {
        bail!("None of the headers {headers:?} match a mapped column");
    }

    let mut records = Vec::new();
    let mut raw = csv::ByteRecord::new();
    let mut line = 1;
    while reader.read_byte_record(&mut raw)? {
        line += 1;
        let cells = io_utils::decode_record(&raw, encoding)
            .with_context(|| format!("Decoding row {line}"))?;
        if cells.iter().all(|cell| cell.trim().is_empty()) {
            debug!("Skipping empty row {line}");
            continue;
        }
        records.push(match &adapter {
            Some(adapter) => adapter.adapt(&cells),
            None => from_row_untyped(&headers, &cells),
        });
    }
    Ok(records)
}

/// Every field present in `path`, used to seed columns for uncatalogued tables.
pub fn read_sample(path: &Path, delimiter: u8, catalog: &MappingCatalog, table_id: &str) -> Result<Option<Record>> {
    let encoding = io_utils::resolve_encoding(None)?;
    let records = read_records(path, delimiter, encoding, catalog.resolve_table(table_id))?;
    Ok(sample_from_records(&records))
}
