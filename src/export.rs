use anyhow::{Context, Result};
use log::info;

use crate::{adapter::to_row, cli::ExportArgs, io_utils, record::Record, resolver};

pub fn execute(args: &ExportArgs) -> Result<()> {
    let catalog = crate::load_catalog(&args.store.catalog)?;
    let table_id = args.store.table.as_str();
    let mapping = catalog.resolve_table(table_id).cloned();
    let headers: Vec<String> = match &mapping {
        Some(_) => resolver::resolve(table_id, &catalog, None)?
            .columns
            .into_iter()
            .map(|column| column.persisted_name)
            .collect(),
        None => Vec::new(),
    };

    let config = crate::loader_config(&catalog, &args.store);
    let mut repository = crate::open_repository(catalog, &args.store.database, config)?;
    let records = repository
        .read(table_id)
        .with_context(|| format!("Reading table '{table_id}'"))?;
    let headers = if headers.is_empty() {
        observed_fields(&records)
    } else {
        headers
    };

    let delimiter = io_utils::resolve_delimiter(args.output.as_deref(), args.delimiter);
    let mut writer = io_utils::open_csv_writer(args.output.as_deref(), delimiter)?;
    writer.write_record(&headers)?;
    for record in &records {
        writer.write_record(to_row(record, &headers, mapping.as_ref()))?;
    }
    writer.flush().context("Flushing export output")?;
    info!(
        "Exported {} row(s) from '{table_id}' using delimiter '{}'",
        records.len(),
        crate::printable_delimiter(delimiter)
    );
    Ok(())
}

/// Field names in first-seen order across all records.
fn observed_fields(records: &[Record]) -> Vec<String> {
    let mut fields: Vec<String> = Vec::new();
    for record in records {
        for name in record.field_names() {
            if !fields.iter().any(|known| known == name) {
                fields.push(name.to_string());
            }
        }
    }
    fields
}
