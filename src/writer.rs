//! Batched, transactional application of validated records.
//!
//! A run prepares every statement before touching the store, then executes
//! them in units. Each unit is one store transaction; the first failing unit
//! stops the run while units already committed stay committed.

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use indexmap::IndexSet;
use itertools::Itertools;
use log::{debug, info, warn};
use serde::Serialize;
use uuid::Uuid;

use crate::{
    catalog::{ErrorPolicy, MappingCatalog, TransactionMode},
    config::LoaderConfig,
    error::{LoaderError, Result},
    identifier::validate_table_name,
    record::Record,
    resolver::{ResolvedTable, SchemaResolver, sample_from_records},
    statement::{GeneratedStatement, StatementBuilder},
    store::Store,
    validate::{RecordValidator, RejectSink, Rejection},
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WriterState {
    #[default]
    Idle,
    Preparing,
    Executing,
    Completed,
    Failed,
}

/// Reported after every committed unit. Unit numbers are 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    pub committed: usize,
    pub total: usize,
    pub unit: usize,
    pub units: usize,
}

pub trait ProgressSink {
    fn report(&mut self, progress: Progress);
}

impl<F: FnMut(Progress)> ProgressSink for F {
    fn report(&mut self, progress: Progress) {
        self(progress)
    }
}

/// Cooperative cancellation flag, checked before each unit is submitted.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WriteOutcome {
    pub run_id: Uuid,
    /// Persisted name of the table written
    pub table: String,
    pub committed: usize,
    pub rejected: usize,
    pub units_committed: usize,
    pub units_total: usize,
    pub cancelled: bool,
}

/// Optional collaborators for one write.
#[derive(Default)]
pub struct WriteOptions<'a> {
    pub batch_size: Option<usize>,
    pub progress: Option<&'a mut dyn ProgressSink>,
    pub rejects: Option<&'a mut dyn RejectSink>,
    pub cancel: Option<CancelToken>,
}

impl<'a> WriteOptions<'a> {
    pub fn batch_size(mut self, size: usize) -> Self {
        self.batch_size = Some(size);
        self
    }

    pub fn progress(mut self, sink: &'a mut dyn ProgressSink) -> Self {
        self.progress = Some(sink);
        self
    }

    pub fn rejects(mut self, sink: &'a mut dyn RejectSink) -> Self {
        self.rejects = Some(sink);
        self
    }

    pub fn cancel(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }
}

pub struct BatchWriter<S: Store> {
    store: S,
    catalog: Arc<MappingCatalog>,
    config: LoaderConfig,
    builder: StatementBuilder,
    state: WriterState,
}

impl<S: Store> BatchWriter<S> {
    pub fn new(store: S, catalog: Arc<MappingCatalog>, config: LoaderConfig) -> Self {
        let builder = StatementBuilder::new(config.dialect);
        Self {
            store,
            catalog,
            config,
            builder,
            state: WriterState::Idle,
        }
    }

    pub fn state(&self) -> WriterState {
        self.state
    }

    pub fn into_store(self) -> S {
        self.store
    }

    /// Validates, builds and applies `records` as inserts into `table_id`.
    ///
    /// Writing the same records twice inserts them twice.
    pub fn write(
        &mut self,
        table_id: &str,
        records: &[Record],
        options: WriteOptions<'_>,
    ) -> Result<WriteOutcome> {
        self.state = WriterState::Preparing;
        let result = self.run(table_id, records, options);
        self.state = match result {
            Ok(_) => WriterState::Completed,
            Err(_) => WriterState::Failed,
        };
        result
    }

    fn run(
        &mut self,
        table_id: &str,
        records: &[Record],
        mut options: WriteOptions<'_>,
    ) -> Result<WriteOutcome> {
        let run_id = Uuid::new_v4();
        validate_table_name(table_id)?;
        let mut resolver = SchemaResolver::new(Arc::clone(&self.catalog))
            .with_table_names(self.config.table_names.clone());
        let sample = match self.catalog.resolve_table(table_id) {
            Some(_) => None,
            None => sample_from_records(records),
        };
        let table = resolver.resolve(table_id, sample.as_ref())?;
        validate_table_name(&table.table_name)?;
        warn_unmapped_fields(&table, records);

        let rules = self
            .catalog
            .resolve_table(table_id)
            .map(|mapping| mapping.validation.clone())
            .unwrap_or_default();
        let validator = RecordValidator::new(
            &table,
            rules,
            self.catalog.settings.universal_fields.clone(),
        );

        let mut statements = Vec::with_capacity(records.len());
        let mut rejected = 0;
        for (idx, record) in records.iter().enumerate() {
            let row = idx + 1;
            let built = validator
                .check(record)
                .and_then(|_| {
                    self.builder
                        .insert(&table, record)
                        .map_err(|err| vec![err.to_string()])
                });
            match built {
                Ok(statement) => statements.push(statement),
                Err(reasons) => {
                    if self.config.error_policy == ErrorPolicy::Abort {
                        return Err(LoaderError::ValidationRejection {
                            table: table.table_name.clone(),
                            row,
                            reasons,
                        });
                    }
                    rejected += 1;
                    if let Some(sink) = options.rejects.as_deref_mut() {
                        sink.reject(&Rejection {
                            table: table.table_name.clone(),
                            row,
                            reasons,
                            record: record.clone(),
                        });
                    }
                }
            }
        }
        debug!(
            "Run {run_id}: prepared {} statement(s) for '{}', {rejected} rejected",
            statements.len(),
            table.table_name
        );

        let unit_size = match self.config.transaction_mode {
            TransactionMode::Single => statements.len().max(1),
            TransactionMode::Batched => self.config.effective_batch_size(options.batch_size),
        };
        let units: Vec<&[GeneratedStatement]> = statements.chunks(unit_size).collect();
        let mut outcome = WriteOutcome {
            run_id,
            table: table.table_name.clone(),
            committed: 0,
            rejected,
            units_committed: 0,
            units_total: units.len(),
            cancelled: false,
        };

        self.state = WriterState::Executing;
        for (idx, unit) in units.iter().enumerate() {
            if options.cancel.as_ref().is_some_and(CancelToken::is_cancelled) {
                warn!(
                    "Run {run_id} cancelled before batch {} of {} for '{}'",
                    idx + 1,
                    outcome.units_total,
                    table.table_name
                );
                outcome.cancelled = true;
                break;
            }
            self.store
                .execute_unit(unit)
                .map_err(|source| LoaderError::Transaction {
                    table: table.table_name.clone(),
                    unit: idx + 1,
                    source,
                })?;
            outcome.committed += unit.len();
            outcome.units_committed += 1;
            if let Some(sink) = options.progress.as_deref_mut() {
                sink.report(Progress {
                    committed: outcome.committed,
                    total: statements.len(),
                    unit: idx + 1,
                    units: outcome.units_total,
                });
            }
        }

        info!(
            "Run {run_id}: wrote {} row(s) to '{}' in {} batch(es); {} rejected",
            outcome.committed, outcome.table, outcome.units_committed, outcome.rejected
        );
        Ok(outcome)
    }
}

/// Logs once per run for record fields that no resolved column persists.
fn warn_unmapped_fields(table: &ResolvedTable, records: &[Record]) {
    let mut unmapped: IndexSet<&str> = IndexSet::new();
    for record in records {
        unmapped.extend(
            record
                .field_names()
                .filter(|field| table.column(field).is_none()),
        );
    }
    if !unmapped.is_empty() {
        warn!(
            "Fields {} are not columns of '{}' and will not be written",
            unmapped.iter().join(", "),
            table.table_name
        );
    }
}
