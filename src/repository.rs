//! Facade binding a catalog handle, a store and explicit run configuration.

use std::sync::Arc;

use log::{info, warn};

use crate::{
    adapter::from_store_row,
    catalog::{CatalogHandle, MappingCatalog},
    config::LoaderConfig,
    error::{LoaderError, Result},
    identifier::validate_table_name,
    record::Record,
    resolver::SchemaResolver,
    statement::{GeneratedStatement, StatementBuilder, WhereClause},
    store::{Store, StoreRow},
    writer::{BatchWriter, WriteOptions, WriteOutcome},
};

pub struct Repository<S: Store> {
    catalog: Arc<CatalogHandle>,
    store: S,
    config: LoaderConfig,
}

impl<S: Store> Repository<S> {
    pub fn new(catalog: Arc<CatalogHandle>, store: S, config: LoaderConfig) -> Self {
        Self {
            catalog,
            store,
            config,
        }
    }

    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn into_store(self) -> S {
        self.store
    }

    /// Inserts `records` into `table_id` against the current catalog snapshot.
    pub fn write(
        &mut self,
        table_id: &str,
        records: &[Record],
        options: WriteOptions<'_>,
    ) -> Result<WriteOutcome> {
        let mut writer = BatchWriter::new(&mut self.store, self.catalog.snapshot(), self.config.clone());
        writer.write(table_id, records, options)
    }

    /// Clears every row of the table. Failures are logged and reported as
    /// `false`; the clear runs in its own transaction so it is never partial.
    pub fn truncate(&mut self, table_id: &str) -> bool {
        match self.try_truncate(table_id) {
            Ok(()) => true,
            Err(err) => {
                warn!("Truncate of '{table_id}' failed: {err}");
                false
            }
        }
    }

    fn try_truncate(&mut self, table_id: &str) -> Result<()> {
        validate_table_name(table_id)?;
        let catalog = self.catalog.snapshot();
        let table_name = self.persisted_name(&catalog, table_id);
        let statement = self.builder().truncate(&table_name)?;
        self.store
            .execute_unit(std::slice::from_ref(&statement))
            .map_err(|source| LoaderError::Transaction {
                table: table_name.clone(),
                unit: 1,
                source,
            })?;
        info!("Cleared table '{table_name}'");
        Ok(())
    }

    /// Reads every row of the table back as logical records.
    pub fn read(&mut self, table_id: &str) -> Result<Vec<Record>> {
        validate_table_name(table_id)?;
        let catalog = self.catalog.snapshot();
        if catalog.resolve_table(table_id).is_none() {
            let table_name = self.persisted_name(&catalog, table_id);
            let statement = self.builder().select_all(&table_name)?;
            let rows = self.query(&statement)?;
            return Ok(rows
                .into_iter()
                .map(|row| row.into_iter().collect())
                .collect());
        }
        let table = self.resolver(catalog).resolve(table_id, None)?;
        let statement = self.builder().select(&table)?;
        let rows = self.query(&statement)?;
        Ok(rows.iter().map(|row| from_store_row(row, &table)).collect())
    }

    /// Updates the rows matched by `filter`, or by the primary key carried in
    /// `record` when no filter is given. Returns the affected row count.
    pub fn update(&mut self, table_id: &str, record: &Record, filter: Option<&WhereClause>) -> Result<usize> {
        validate_table_name(table_id)?;
        let table = self
            .resolver(self.catalog.snapshot())
            .resolve(table_id, Some(record))?;
        let statement = self.builder().update(&table, record, filter)?;
        self.execute_one(statement)
    }

    pub fn delete(&mut self, table_id: &str, record: &Record, filter: Option<&WhereClause>) -> Result<usize> {
        validate_table_name(table_id)?;
        let table = self
            .resolver(self.catalog.snapshot())
            .resolve(table_id, Some(record))?;
        let statement = self.builder().delete(&table, record, filter)?;
        self.execute_one(statement)
    }

    fn builder(&self) -> StatementBuilder {
        StatementBuilder::new(self.config.dialect)
    }

    fn resolver(&self, catalog: Arc<MappingCatalog>) -> SchemaResolver {
        SchemaResolver::new(catalog).with_table_names(self.config.table_names.clone())
    }

    fn persisted_name(&self, catalog: &MappingCatalog, table_id: &str) -> String {
        self.config
            .table_names
            .get(table_id)
            .cloned()
            .or_else(|| catalog.resolve_table(table_id).map(|m| m.table_name.clone()))
            .unwrap_or_else(|| table_id.to_string())
    }

    fn query(&mut self, statement: &GeneratedStatement) -> Result<Vec<StoreRow>> {
        self.store
            .query(statement)
            .map_err(|source| LoaderError::store(statement.table(), source))
    }

    fn execute_one(&mut self, statement: GeneratedStatement) -> Result<usize> {
        self.store
            .execute_unit(std::slice::from_ref(&statement))
            .map_err(|source| LoaderError::store(statement.table(), source))
    }
}
