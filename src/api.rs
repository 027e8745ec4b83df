// api.rs - Public surface: compile an expression once, bind it to row
// batches, evaluate per batch.

use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::bind::{bind_columns, ColBatch, RowBatch};
use crate::defs::{ColInfo, ColumnCatalog, RandomSource, RowVec, Shape, ValueKind};
use crate::error::{BindError, EvalError, ParseError, ParseErrorKind};
use crate::eval::{evaluate, EvalCtx};
use crate::node::{Node, NodeId};
use crate::parse;

/// A compiled row expression.
///
/// Parsing performs the full static pass: column resolution, type
/// promotion, shape checks and constant folding. The compiled tree is
/// immutable afterwards; bind it to one batch at a time and evaluate.
///
/// # Examples
///
/// ```
/// use fitsel::prelude::*;
///
/// let schema = TableSchema::new()
///     .with("ENERGY", ColInfo::scalar(ValueKind::Double));
/// let expr = RowExpr::parse("energy > 2.5", &schema).unwrap();
/// assert_eq!(expr.result_kind(), ValueKind::Bool);
///
/// // sentinel at index 0, then one element per row
/// let energy = [0.0, 1.0, 3.0, 2.0];
/// let batch = RowBatch::new(1, 3).col(0, ColData::Double(&energy));
/// let mut bound = expr.bind(&batch).unwrap();
/// let result = bound.evaluate().unwrap();
/// assert_eq!(result.as_bool().unwrap(), &[false, true, false]);
/// ```
///
/// A `RowExpr` must not be shared across threads while bound; for
/// parallel evaluation, clone it per worker (the arena stores child
/// indices, so a clone is a flat copy).
#[derive(Clone)]
pub struct RowExpr {
    nodes: Vec<Node>,
    root: NodeId,
    kind: ValueKind,
    shape: Shape,
    cols: Vec<(usize, ColInfo)>,
}

impl RowExpr {
    /// Compile `text` against the host's column catalog.
    pub fn parse(text: &str, catalog: &dyn ColumnCatalog) -> Result<RowExpr, ParseError> {
        let (builder, root) = parse::parse(text, catalog)?;
        let kind = builder.node(root).ty;
        let shape = builder.node(root).shape;
        let mut cols = Vec::new();
        for idx in builder.columns_used(root) {
            let info = catalog.info(idx).cloned().ok_or_else(|| {
                ParseError::new(
                    ParseErrorKind::UnknownColumn,
                    format!("no metadata for column {}", idx),
                    0,
                )
            })?;
            cols.push((idx, info));
        }
        Ok(RowExpr {
            nodes: builder.nodes,
            root,
            kind,
            shape,
            cols,
        })
    }

    /// Kind of the evaluation result; fixed at parse time.
    pub fn result_kind(&self) -> ValueKind {
        self.kind
    }

    /// Per-row shape of the evaluation result; fixed at parse time.
    pub fn result_shape(&self) -> Shape {
        self.shape
    }

    /// 0-based indices of the columns the expression reads, sorted.
    pub fn referenced_columns(&self) -> Vec<usize> {
        self.cols.iter().map(|(i, _)| *i).collect()
    }

    /// Bind to one batch of rows, with an entropy-seeded generator
    /// backing `RANDOM()`.
    pub fn bind<'e, 'b>(
        &'e self,
        batch: &RowBatch<'b>,
    ) -> Result<BoundExpr<'e, 'b>, BindError> {
        self.bind_with_rng(batch, Box::new(StdRng::from_entropy()))
    }

    /// Bind to one batch of rows with a caller-supplied random source.
    pub fn bind_with_rng<'e, 'b>(
        &'e self,
        batch: &RowBatch<'b>,
        rng: Box<dyn RandomSource>,
    ) -> Result<BoundExpr<'e, 'b>, BindError> {
        let cols = bind_columns(&self.cols, batch)?;
        Ok(BoundExpr {
            expr: self,
            cols,
            first_row: batch.first_row,
            row_offset: batch.row_offset,
            n_rows: batch.n_rows,
            rng,
            status: None,
            result: None,
        })
    }
}

impl std::fmt::Debug for RowExpr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RowExpr")
            .field("kind", &self.kind)
            .field("nelem", &self.shape.nelem)
            .field("columns", &self.referenced_columns())
            .finish_non_exhaustive()
    }
}

/// A compiled expression bound to one batch: column views are built,
/// undef masks reconstructed, and the evaluator is ready to run.
///
/// Evaluation errors are sticky; after the first failure every further
/// [`evaluate`](BoundExpr::evaluate) returns the same error.
pub struct BoundExpr<'e, 'b> {
    expr: &'e RowExpr,
    cols: Vec<Option<ColBatch<'b>>>,
    first_row: i64,
    row_offset: i64,
    n_rows: usize,
    rng: Box<dyn RandomSource>,
    status: Option<EvalError>,
    result: Option<RowVec>,
}

impl std::fmt::Debug for BoundExpr<'_, '_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoundExpr")
            .field("n_rows", &self.n_rows)
            .field("status", &self.status)
            .finish_non_exhaustive()
    }
}

impl BoundExpr<'_, '_> {
    /// Run the evaluator over the bound batch.
    pub fn evaluate(&mut self) -> Result<&RowVec, EvalError> {
        if let Some(err) = &self.status {
            return Err(err.clone());
        }
        let mut ctx = EvalCtx {
            nodes: &self.expr.nodes,
            cols: &self.cols,
            first_row: self.first_row,
            row_offset: self.row_offset,
            n_rows: self.n_rows,
            rng: self.rng.as_mut(),
        };
        match evaluate(&mut ctx, self.expr.root) {
            Ok(rv) => Ok(&*self.result.insert(rv)),
            Err(err) => {
                self.status = Some(err.clone());
                Err(err)
            }
        }
    }

    /// The most recent evaluation result, if any.
    pub fn result(&self) -> Option<&RowVec> {
        self.result.as_ref()
    }

    pub fn n_rows(&self) -> usize {
        self.n_rows
    }
}
