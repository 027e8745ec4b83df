// prelude.rs - Convenient re-exports for the common workflow.
//
//! # Prelude
//!
//! ```
//! use fitsel::prelude::*;
//!
//! let schema = TableSchema::new().with("PHA", ColInfo::scalar(ValueKind::Long));
//! let expr = RowExpr::parse("pha % 2 == 0", &schema).unwrap();
//! assert_eq!(expr.result_kind(), ValueKind::Bool);
//! ```

pub use crate::api::{BoundExpr, RowExpr};
pub use crate::bind::{ColData, RowBatch};
pub use crate::defs::{
    ColInfo, ColumnCatalog, RandomSource, RowVec, Scalar, Shape, TableSchema, ValueKind,
};
pub use crate::error::{BindError, EvalError, EvalErrorKind, ParseError, ParseErrorKind};
