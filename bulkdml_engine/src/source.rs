//! Row sources feeding a DML node.
//!
//! The DML node owns a [`SourceNode`] tree. Most of the tree is produced by the query compiler and
//! is opaque to the engine; the two shapes the engine understands are a scan of the target entity
//! ([`ScanSource`]) and a computed projection over it ([`ComputeScalar`]), because those are the
//! shapes that can be narrowed to the key columns of the records being changed.

use std::{collections::HashSet, error::Error, fmt::Debug, sync::Arc};

use futures::{StreamExt, TryStreamExt, stream::BoxStream};
use indexmap::IndexMap;

use crate::{
    hints::QueryHints,
    value::{ColumnSchema, LogicalRow, Value},
};

pub type SourceError = Box<dyn Error + Send + Sync>;

/// Produces the rows a DML operation is applied to
pub trait RowSource: Debug + Send + Sync + 'static {
    fn schema(&self) -> ColumnSchema;

    /// Produce the rows. The stream is consumed once.
    fn execute(&self) -> BoxStream<'static, Result<LogicalRow, SourceError>>;

    /// A rewritten version of this source, or `None` when folding leaves it unchanged
    fn fold(&self, _hints: &QueryHints) -> Option<Arc<dyn RowSource>> {
        None
    }
}

/// A [`RowSource`] that reads records of a single entity and can be narrowed to a subset of its
/// columns
pub trait ScanSource: RowSource {
    /// Narrow the scan so it only reads `required` and `keys` from `entity`
    ///
    /// Returns `None` when this scan can't be narrowed for that entity. Narrowing an already
    /// narrowed scan to the same columns yields an equivalent scan.
    fn fold_dml_source(
        &self,
        entity: &str,
        required: &[String],
        keys: &[String],
    ) -> Option<Arc<dyn ScanSource>>;
}

/// The row source subtree of a DML node
#[derive(Debug, Clone)]
pub enum SourceNode {
    Scan(Arc<dyn ScanSource>),
    Compute(ComputeScalar),
    Opaque(Arc<dyn RowSource>),
}

impl SourceNode {
    pub fn schema(&self) -> ColumnSchema {
        match self {
            Self::Scan(scan) => scan.schema(),
            Self::Compute(compute) => compute.schema(),
            Self::Opaque(source) => source.schema(),
        }
    }

    pub fn execute(&self) -> BoxStream<'static, Result<LogicalRow, SourceError>> {
        match self {
            Self::Scan(scan) => scan.execute(),
            Self::Compute(compute) => compute.execute(),
            Self::Opaque(source) => source.execute(),
        }
    }

    /// Fold every node of the subtree, children first
    pub fn fold(self, hints: &QueryHints) -> Self {
        match self {
            Self::Scan(scan) => scan.fold(hints).map(Self::Opaque).unwrap_or(Self::Scan(scan)),
            Self::Compute(ComputeScalar { columns, source }) => Self::Compute(ComputeScalar {
                columns,
                source: Box::new(source.fold(hints)),
            }),
            Self::Opaque(source) => Self::Opaque(source.fold(hints).unwrap_or(source)),
        }
    }
}

/// Adds computed columns to every row of its source
#[derive(Debug, Clone)]
pub struct ComputeScalar {
    pub columns: Arc<IndexMap<String, Expr>>,
    pub source: Box<SourceNode>,
}

impl ComputeScalar {
    pub fn new(source: SourceNode, columns: impl IntoIterator<Item = (String, Expr)>) -> Self {
        Self {
            columns: Arc::new(columns.into_iter().collect()),
            source: Box::new(source),
        }
    }

    /// Every source column read by any of the computed expressions
    pub fn referenced_columns(&self) -> HashSet<&str> {
        let mut referenced = HashSet::new();
        for expr in self.columns.values() {
            expr.collect_columns(&mut referenced);
        }
        referenced
    }

    fn schema(&self) -> ColumnSchema {
        self.columns
            .keys()
            .fold(self.source.schema(), |schema, name| {
                schema.with_column(name.clone(), None)
            })
    }

    fn execute(&self) -> BoxStream<'static, Result<LogicalRow, SourceError>> {
        let columns = Arc::clone(&self.columns);
        self.source
            .execute()
            .map_ok(move |row| {
                let computed: Vec<_> = columns
                    .iter()
                    .map(|(name, expr)| (name.clone(), expr.evaluate(&row)))
                    .collect();
                computed
                    .into_iter()
                    .fold(row, |row, (name, value)| row.with(name, value))
            })
            .boxed()
    }
}

/// A scalar expression evaluated against one row
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Column(String),
    Literal(Value),
    /// The first non-null argument
    Coalesce(Vec<Expr>),
}

impl Expr {
    pub fn column(name: impl Into<String>) -> Self {
        Self::Column(name.into())
    }

    pub fn evaluate(&self, row: &LogicalRow) -> Value {
        match self {
            Self::Column(name) => row.get(name).cloned().unwrap_or(Value::Null),
            Self::Literal(value) => value.clone(),
            Self::Coalesce(args) => args
                .iter()
                .map(|a| a.evaluate(row))
                .find(|v| !v.is_null())
                .unwrap_or(Value::Null),
        }
    }

    fn collect_columns<'a>(&'a self, out: &mut HashSet<&'a str>) {
        match self {
            Self::Column(name) => {
                out.insert(name);
            }
            Self::Literal(_) => {}
            Self::Coalesce(args) => args.iter().for_each(|a| a.collect_columns(out)),
        }
    }
}

/// A scan over rows that are already in memory, such as rows loaded from a file or returned by
/// an earlier query
#[derive(Debug, Clone)]
pub struct ConstantScan {
    entity: Option<String>,
    schema: ColumnSchema,
    rows: Arc<[LogicalRow]>,
}

impl ConstantScan {
    pub fn new(schema: ColumnSchema, rows: impl Into<Arc<[LogicalRow]>>) -> Self {
        Self {
            entity: None,
            schema,
            rows: rows.into(),
        }
    }

    /// Build a scan whose schema is the union of the columns of `rows`, typed by the first
    /// non-null value of each column
    pub fn from_rows(rows: Vec<LogicalRow>) -> Self {
        let mut columns: IndexMap<String, Option<_>> = IndexMap::new();
        for row in &rows {
            for (name, value) in row.iter() {
                let column_type = columns.entry(name.to_owned()).or_default();
                if column_type.is_none() {
                    *column_type = value.column_type();
                }
            }
        }

        let schema = columns
            .into_iter()
            .fold(ColumnSchema::new(), |schema, (name, column_type)| {
                schema.with_column(name, column_type)
            });

        Self::new(schema, rows)
    }

    /// Only allow this scan to be narrowed for records of `entity`
    pub fn for_entity(mut self, entity: impl Into<String>) -> Self {
        self.entity = Some(entity.into());
        self
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

impl RowSource for ConstantScan {
    fn schema(&self) -> ColumnSchema {
        self.schema.clone()
    }

    fn execute(&self) -> BoxStream<'static, Result<LogicalRow, SourceError>> {
        let rows = Arc::clone(&self.rows);
        let columns: Vec<String> = self.schema.column_names().map(str::to_owned).collect();

        futures::stream::iter(0..rows.len())
            .map(move |i| Ok(rows[i].project(columns.iter().map(String::as_str))))
            .boxed()
    }
}

impl ScanSource for ConstantScan {
    fn fold_dml_source(
        &self,
        entity: &str,
        required: &[String],
        keys: &[String],
    ) -> Option<Arc<dyn ScanSource>> {
        if self
            .entity
            .as_deref()
            .is_some_and(|e| !e.eq_ignore_ascii_case(entity))
        {
            return None;
        }

        let wanted: HashSet<&str> = required
            .iter()
            .chain(keys)
            .map(String::as_str)
            .collect();

        let schema = self
            .schema
            .column_names()
            .filter(|c| wanted.contains(c))
            .fold(ColumnSchema::new(), |schema, c| {
                schema.with_column(c, self.schema.column_type(c))
            });
        let schema = match self.schema.primary_key() {
            Some(pk) if schema.contains(pk) => schema.with_primary_key(pk),
            _ => schema,
        };

        Some(Arc::new(Self {
            entity: self.entity.clone(),
            schema,
            rows: Arc::clone(&self.rows),
        }))
    }
}
