// defs.rs - Public value model: kinds, shapes, scalar payloads, row vectors,
// engine limits, and the host-supplied collaborator traits.

use std::fmt;

/// Maximum number of axes a vector column may carry.
pub const MAX_DIMS: usize = 5;

/// Maximum width of a string or bit-string value, in bytes.
pub const MAX_STRLEN: usize = 255;

/// Maximum number of children an operator node may carry.
pub const MAX_SUBS: usize = 7;

/// Tolerance used by the binary `~` (approximately-equal) operator.
pub const APPROX_TOL: f64 = 1.0e-7;

// === Value kinds ===

/// The five disjoint value kinds of the expression language.
///
/// `Bool`, `Long` and `Double` form the numeric promotion lattice
/// `Bool < Long < Double`; mixed-kind arithmetic inserts implicit casts
/// upward. `Str` and `Bits` never promote.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ValueKind {
    /// Logical value.
    Bool,
    /// 64-bit signed integer.
    Long,
    /// IEEE-754 double.
    Double,
    /// Character string, at most [`MAX_STRLEN`] bytes.
    Str,
    /// Bit string over `{'0','1','x'}`; `'x'` means "unknown".
    Bits,
}

impl ValueKind {
    /// Rank in the numeric promotion lattice; `None` for `Str`/`Bits`.
    pub(crate) fn rank(self) -> Option<u8> {
        match self {
            ValueKind::Bool => Some(0),
            ValueKind::Long => Some(1),
            ValueKind::Double => Some(2),
            ValueKind::Str | ValueKind::Bits => None,
        }
    }

    pub(crate) fn is_numeric(self) -> bool {
        matches!(self, ValueKind::Long | ValueKind::Double)
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValueKind::Bool => "boolean",
            ValueKind::Long => "long",
            ValueKind::Double => "double",
            ValueKind::Str => "string",
            ValueKind::Bits => "bit string",
        };
        f.write_str(name)
    }
}

// === Shape ===

/// Element count and axis layout of a value, per row.
///
/// Scalars have `nelem == 1`, `naxis == 1`, `naxes[0] == 1`. Vector
/// columns may carry up to [`MAX_DIMS`] axes; the first axis varies
/// fastest, the last slowest.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Shape {
    /// Total scalar elements per row (product of the active axes).
    pub nelem: usize,
    /// Number of active axes, `1..=MAX_DIMS`.
    pub naxis: usize,
    /// Axis lengths; entries past `naxis` are 1.
    pub naxes: [usize; MAX_DIMS],
}

impl Shape {
    /// The scalar shape: one element, one axis of length one.
    pub const SCALAR: Shape = Shape {
        nelem: 1,
        naxis: 1,
        naxes: [1; MAX_DIMS],
    };

    /// Build a shape from explicit axis lengths.
    pub fn vector(naxes: &[usize]) -> Shape {
        assert!(!naxes.is_empty() && naxes.len() <= MAX_DIMS);
        let mut axes = [1usize; MAX_DIMS];
        let mut nelem = 1usize;
        for (i, &n) in naxes.iter().enumerate() {
            axes[i] = n;
            nelem *= n;
        }
        Shape {
            nelem,
            naxis: naxes.len(),
            naxes: axes,
        }
    }

    pub fn is_scalar(&self) -> bool {
        self.nelem == 1
    }

    /// True iff the two shapes have identical axis structure.
    pub(crate) fn same_dims(&self, other: &Shape) -> bool {
        self.naxis == other.naxis && self.naxes[..self.naxis] == other.naxes[..other.naxis]
    }
}

// === Scalar constants ===

/// A single constant payload, as produced by literals and constant folding.
#[derive(Clone, Debug, PartialEq)]
pub enum Scalar {
    Bool(bool),
    Long(i64),
    Double(f64),
    Str(String),
    Bits(String),
}

impl Scalar {
    pub fn kind(&self) -> ValueKind {
        match self {
            Scalar::Bool(_) => ValueKind::Bool,
            Scalar::Long(_) => ValueKind::Long,
            Scalar::Double(_) => ValueKind::Double,
            Scalar::Str(_) => ValueKind::Str,
            Scalar::Bits(_) => ValueKind::Bits,
        }
    }
}

// === Row vectors ===

/// A fully materialized per-batch value: one variant per kind.
///
/// Numeric and boolean variants hold `n_rows * nelem` elements with a
/// parallel undef mask (`true` = undefined; readers must not depend on
/// the data at masked positions). Strings hold one entry and one undef
/// flag per row. Bit strings hold one `'0'/'1'/'x'` string per row and
/// no mask: unknown positions are carried in-band as `'x'`.
#[derive(Clone, Debug, PartialEq)]
pub enum RowVec {
    Bool { data: Vec<bool>, undef: Vec<bool> },
    Long { data: Vec<i64>, undef: Vec<bool> },
    Double { data: Vec<f64>, undef: Vec<bool> },
    Str { data: Vec<String>, undef: Vec<bool> },
    Bits { data: Vec<String> },
}

impl RowVec {
    pub fn kind(&self) -> ValueKind {
        match self {
            RowVec::Bool { .. } => ValueKind::Bool,
            RowVec::Long { .. } => ValueKind::Long,
            RowVec::Double { .. } => ValueKind::Double,
            RowVec::Str { .. } => ValueKind::Str,
            RowVec::Bits { .. } => ValueKind::Bits,
        }
    }

    /// Number of stored elements (`n_rows * nelem` for numerics,
    /// `n_rows` for strings and bit strings).
    pub fn len(&self) -> usize {
        match self {
            RowVec::Bool { data, .. } => data.len(),
            RowVec::Long { data, .. } => data.len(),
            RowVec::Double { data, .. } => data.len(),
            RowVec::Str { data, .. } => data.len(),
            RowVec::Bits { data } => data.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The undef mask, or `None` for bit strings.
    pub fn undef(&self) -> Option<&[bool]> {
        match self {
            RowVec::Bool { undef, .. }
            | RowVec::Long { undef, .. }
            | RowVec::Double { undef, .. }
            | RowVec::Str { undef, .. } => Some(undef),
            RowVec::Bits { .. } => None,
        }
    }

    pub fn as_bool(&self) -> Option<&[bool]> {
        match self {
            RowVec::Bool { data, .. } => Some(data),
            _ => None,
        }
    }

    pub fn as_long(&self) -> Option<&[i64]> {
        match self {
            RowVec::Long { data, .. } => Some(data),
            _ => None,
        }
    }

    pub fn as_double(&self) -> Option<&[f64]> {
        match self {
            RowVec::Double { data, .. } => Some(data),
            _ => None,
        }
    }

    pub fn as_str_rows(&self) -> Option<&[String]> {
        match self {
            RowVec::Str { data, .. } => Some(data),
            _ => None,
        }
    }

    pub fn as_bits_rows(&self) -> Option<&[String]> {
        match self {
            RowVec::Bits { data } => Some(data),
            _ => None,
        }
    }
}

// === Column metadata ===

/// Kind and shape of one table column, as reported by the host catalog.
#[derive(Clone, Debug, PartialEq)]
pub struct ColInfo {
    pub kind: ValueKind,
    pub shape: Shape,
}

impl ColInfo {
    pub fn scalar(kind: ValueKind) -> ColInfo {
        ColInfo {
            kind,
            shape: Shape::SCALAR,
        }
    }

    pub fn vector(kind: ValueKind, naxes: &[usize]) -> ColInfo {
        ColInfo {
            kind,
            shape: Shape::vector(naxes),
        }
    }
}

// === Host collaborators ===

/// Column-name resolution, supplied by the host table reader.
///
/// Names are matched case-insensitively, as FITS column names are.
pub trait ColumnCatalog {
    /// Number of columns in the table.
    fn ncols(&self) -> usize;
    /// Resolve a column name to its 0-based index.
    fn resolve(&self, name: &str) -> Option<usize>;
    /// Metadata for the column at `idx`.
    fn info(&self, idx: usize) -> Option<&ColInfo>;
}

/// A simple owned [`ColumnCatalog`] for hosts that assemble schemas by hand.
///
/// # Examples
///
/// ```
/// use fitsel::defs::{ColInfo, ColumnCatalog, TableSchema, ValueKind};
///
/// let schema = TableSchema::new()
///     .with("ENERGY", ColInfo::scalar(ValueKind::Double))
///     .with("PHA", ColInfo::scalar(ValueKind::Long));
/// assert_eq!(schema.resolve("energy"), Some(0));
/// assert_eq!(schema.info(1).unwrap().kind, ValueKind::Long);
/// ```
#[derive(Clone, Debug, Default)]
pub struct TableSchema {
    cols: Vec<(String, ColInfo)>,
}

impl TableSchema {
    pub fn new() -> TableSchema {
        TableSchema { cols: Vec::new() }
    }

    /// Append a column and return the schema, builder style.
    pub fn with(mut self, name: &str, info: ColInfo) -> TableSchema {
        self.cols.push((name.to_string(), info));
        self
    }

    pub fn push(&mut self, name: &str, info: ColInfo) {
        self.cols.push((name.to_string(), info));
    }
}

impl ColumnCatalog for TableSchema {
    fn ncols(&self) -> usize {
        self.cols.len()
    }

    fn resolve(&self, name: &str) -> Option<usize> {
        self.cols
            .iter()
            .position(|(n, _)| n.eq_ignore_ascii_case(name))
    }

    fn info(&self, idx: usize) -> Option<&ColInfo> {
        self.cols.get(idx).map(|(_, i)| i)
    }
}

/// Source of uniform doubles in `[0, 1)`, used by `RANDOM()`.
///
/// Blanket-implemented for every [`rand::Rng`], so any `rand` generator
/// can be handed to [`crate::api::RowExpr::bind_with_rng`] directly.
pub trait RandomSource {
    fn uniform(&mut self) -> f64;
}

impl<R: rand::Rng> RandomSource for R {
    fn uniform(&mut self) -> f64 {
        self.gen::<f64>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalar_shape() {
        assert!(Shape::SCALAR.is_scalar());
        assert_eq!(Shape::SCALAR.nelem, 1);
        assert_eq!(Shape::SCALAR.naxes, [1; MAX_DIMS]);
    }

    #[test]
    fn vector_shape_nelem() {
        let s = Shape::vector(&[4, 3]);
        assert_eq!(s.nelem, 12);
        assert_eq!(s.naxis, 2);
        assert_eq!(&s.naxes[..2], &[4, 3]);
        assert!(!s.is_scalar());
    }

    #[test]
    fn same_dims_ignores_trailing_axes() {
        let a = Shape::vector(&[4]);
        let b = Shape::vector(&[4]);
        let c = Shape::vector(&[4, 2]);
        assert!(a.same_dims(&b));
        assert!(!a.same_dims(&c));
    }

    #[test]
    fn promotion_ranks() {
        assert!(ValueKind::Bool.rank() < ValueKind::Long.rank());
        assert!(ValueKind::Long.rank() < ValueKind::Double.rank());
        assert_eq!(ValueKind::Str.rank(), None);
        assert_eq!(ValueKind::Bits.rank(), None);
    }

    #[test]
    fn schema_is_case_insensitive() {
        let schema = TableSchema::new().with("Flux", ColInfo::scalar(ValueKind::Double));
        assert_eq!(schema.resolve("FLUX"), Some(0));
        assert_eq!(schema.resolve("flux"), Some(0));
        assert_eq!(schema.resolve("fluxx"), None);
    }

    #[test]
    fn rand_rng_is_a_random_source() {
        use rand::SeedableRng;
        let mut rng = rand::rngs::StdRng::seed_from_u64(7);
        let x = RandomSource::uniform(&mut rng);
        assert!((0.0..1.0).contains(&x));
    }
}
