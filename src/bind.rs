// bind.rs - Batch manager: host batch input and per-batch column views.
//
// The host hands over raw column buffers in the iterator convention:
// element 0 holds the column's null sentinel and row data starts at
// element 1. Binding rebuilds an undef mask per referenced column
// (element == sentinel, with a zero/empty sentinel meaning "no nulls"),
// converts logical bytes to bool, and unpacks packed bit columns into
// per-row '0'/'1' strings. Long, double and string data stay borrowed
// in place.

use crate::defs::{ColInfo, ValueKind};
use crate::error::BindError;

// === Host input ===

/// Raw per-column data for one batch, borrowed from the host.
///
/// `Bool`, `Long`, `Double` and `Str` buffers hold the null sentinel at
/// index 0 and `n_rows * nelem` row elements from index 1. `Bits`
/// buffers are packed bytes, `ceil(nelem / 8)` per row, most
/// significant bit first, with no sentinel.
#[derive(Clone, Copy, Debug)]
pub enum ColData<'a> {
    Bool(&'a [u8]),
    Long(&'a [i64]),
    Double(&'a [f64]),
    Str(&'a [String]),
    Bits(&'a [u8]),
}

impl ColData<'_> {
    fn kind(&self) -> ValueKind {
        match self {
            ColData::Bool(_) => ValueKind::Bool,
            ColData::Long(_) => ValueKind::Long,
            ColData::Double(_) => ValueKind::Double,
            ColData::Str(_) => ValueKind::Str,
            ColData::Bits(_) => ValueKind::Bits,
        }
    }
}

/// One batch of rows, presented to [`crate::api::RowExpr::bind`].
///
/// `first_row` is the 1-based table row the batch starts at;
/// `row_offset` lets a host that iterates in chunks keep `#ROW`
/// numbering continuous.
#[derive(Clone, Debug, Default)]
pub struct RowBatch<'a> {
    pub first_row: i64,
    pub row_offset: i64,
    pub n_rows: usize,
    cols: Vec<(usize, ColData<'a>)>,
}

impl<'a> RowBatch<'a> {
    pub fn new(first_row: i64, n_rows: usize) -> RowBatch<'a> {
        RowBatch {
            first_row,
            row_offset: 0,
            n_rows,
            cols: Vec::new(),
        }
    }

    pub fn with_offset(mut self, row_offset: i64) -> RowBatch<'a> {
        self.row_offset = row_offset;
        self
    }

    /// Attach data for the column with the given 0-based index.
    pub fn col(mut self, idx: usize, data: ColData<'a>) -> RowBatch<'a> {
        self.cols.push((idx, data));
        self
    }

    fn find(&self, idx: usize) -> Option<&ColData<'a>> {
        self.cols.iter().find(|(i, _)| *i == idx).map(|(_, d)| d)
    }
}

// === Bound column views ===

/// A referenced column, materialized for one batch.
#[derive(Debug)]
pub(crate) enum ColBatch<'a> {
    Bool {
        data: Vec<bool>,
        undef: Vec<bool>,
    },
    Long {
        data: &'a [i64],
        undef: Vec<bool>,
    },
    Double {
        data: &'a [f64],
        undef: Vec<bool>,
    },
    Str {
        data: &'a [String],
        undef: Vec<bool>,
        /// The per-column null string, kept for `ISNULL`.
        sentinel: &'a str,
    },
    Bits {
        data: Vec<String>,
    },
}

/// Build the per-batch views for every column the expression references.
/// The result is indexed by column index; untouched columns stay `None`.
pub(crate) fn bind_columns<'a>(
    used: &[(usize, ColInfo)],
    batch: &RowBatch<'a>,
) -> Result<Vec<Option<ColBatch<'a>>>, BindError> {
    let ncols = used.iter().map(|(i, _)| i + 1).max().unwrap_or(0);
    let mut out: Vec<Option<ColBatch<'a>>> = Vec::new();
    out.resize_with(ncols, || None);
    for (idx, info) in used {
        let data = batch
            .find(*idx)
            .ok_or(BindError::MissingColumn { col: *idx })?;
        out[*idx] = Some(bind_one(*idx, info, data, batch.n_rows)?);
    }
    Ok(out)
}

fn bind_one<'a>(
    col: usize,
    info: &ColInfo,
    data: &ColData<'a>,
    n_rows: usize,
) -> Result<ColBatch<'a>, BindError> {
    let nelem = info.shape.nelem;
    match (info.kind, data) {
        (ValueKind::Bool, ColData::Bool(raw)) => {
            let rows = checked_region(col, raw, n_rows * nelem)?;
            let sentinel = raw[0];
            let data = rows.iter().map(|&b| b != 0).collect();
            let undef = rows
                .iter()
                .map(|&b| sentinel != 0 && b == sentinel)
                .collect();
            Ok(ColBatch::Bool { data, undef })
        }
        (ValueKind::Long, ColData::Long(raw)) => {
            let rows = checked_region(col, raw, n_rows * nelem)?;
            let sentinel = raw[0];
            let undef = rows
                .iter()
                .map(|&v| sentinel != 0 && v == sentinel)
                .collect();
            Ok(ColBatch::Long { data: rows, undef })
        }
        (ValueKind::Double, ColData::Double(raw)) => {
            let rows = checked_region(col, raw, n_rows * nelem)?;
            // bitwise comparison so a NaN sentinel still marks rows
            let sentinel = raw[0].to_bits();
            let armed = raw[0] != 0.0 || raw[0].is_nan();
            let undef = rows
                .iter()
                .map(|&v| armed && v.to_bits() == sentinel)
                .collect();
            Ok(ColBatch::Double { data: rows, undef })
        }
        (ValueKind::Str, ColData::Str(raw)) => {
            let rows = checked_region(col, raw, n_rows)?;
            let sentinel = raw[0].as_str();
            let undef = rows
                .iter()
                .map(|v| !sentinel.is_empty() && v == sentinel)
                .collect();
            Ok(ColBatch::Str {
                data: rows,
                undef,
                sentinel,
            })
        }
        (ValueKind::Bits, ColData::Bits(raw)) => {
            let bytes_per_row = nelem.div_ceil(8);
            let need = n_rows * bytes_per_row;
            if raw.len() < need {
                return Err(BindError::ShortColumn {
                    col,
                    expected: need,
                    found: raw.len(),
                });
            }
            let mut data = Vec::with_capacity(n_rows);
            for row in 0..n_rows {
                let chunk = &raw[row * bytes_per_row..(row + 1) * bytes_per_row];
                let mut s = String::with_capacity(nelem);
                for bit in 0..nelem {
                    let byte = chunk[bit / 8];
                    let set = byte >> (7 - bit % 8) & 1 == 1;
                    s.push(if set { '1' } else { '0' });
                }
                data.push(s);
            }
            Ok(ColBatch::Bits { data })
        }
        (expected, found) => Err(BindError::KindMismatch {
            col,
            expected,
            found: found.kind(),
        }),
    }
}

/// Slice off the row region (everything after the sentinel), checking
/// the buffer is long enough.
fn checked_region<'a, T>(
    col: usize,
    raw: &'a [T],
    n: usize,
) -> Result<&'a [T], BindError> {
    let need = 1 + n;
    if raw.len() < need {
        return Err(BindError::ShortColumn {
            col,
            expected: need,
            found: raw.len(),
        });
    }
    Ok(&raw[1..need])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::defs::ColInfo;

    #[test]
    fn long_sentinel_builds_undef_mask() {
        let raw = [-99i64, 5, -99, 7];
        let batch = RowBatch::new(1, 3).col(0, ColData::Long(&raw));
        let used = [(0usize, ColInfo::scalar(ValueKind::Long))];
        let cols = bind_columns(&used, &batch).unwrap();
        match cols[0].as_ref().unwrap() {
            ColBatch::Long { data, undef } => {
                assert_eq!(*data, [5, -99, 7]);
                assert_eq!(undef, &[false, true, false]);
            }
            other => panic!("wrong view: {:?}", other),
        }
    }

    #[test]
    fn zero_sentinel_means_no_nulls() {
        let raw = [0i64, 0, 3];
        let batch = RowBatch::new(1, 2).col(0, ColData::Long(&raw));
        let used = [(0usize, ColInfo::scalar(ValueKind::Long))];
        let cols = bind_columns(&used, &batch).unwrap();
        match cols[0].as_ref().unwrap() {
            ColBatch::Long { undef, .. } => assert_eq!(undef, &[false, false]),
            other => panic!("wrong view: {:?}", other),
        }
    }

    #[test]
    fn nan_sentinel_marks_rows() {
        let raw = [f64::NAN, 1.0, f64::NAN, 2.0];
        let batch = RowBatch::new(1, 3).col(0, ColData::Double(&raw));
        let used = [(0usize, ColInfo::scalar(ValueKind::Double))];
        let cols = bind_columns(&used, &batch).unwrap();
        match cols[0].as_ref().unwrap() {
            ColBatch::Double { undef, .. } => assert_eq!(undef, &[false, true, false]),
            other => panic!("wrong view: {:?}", other),
        }
    }

    #[test]
    fn bits_unpack_msb_first() {
        let raw = [0b1010_0000u8, 0b0110_0000];
        let batch = RowBatch::new(1, 2).col(0, ColData::Bits(&raw));
        let used = [(0usize, ColInfo::vector(ValueKind::Bits, &[4]))];
        let cols = bind_columns(&used, &batch).unwrap();
        match cols[0].as_ref().unwrap() {
            ColBatch::Bits { data } => assert_eq!(*data, ["1010", "0110"]),
            other => panic!("wrong view: {:?}", other),
        }
    }

    #[test]
    fn missing_and_short_columns() {
        let batch = RowBatch::new(1, 3);
        let used = [(0usize, ColInfo::scalar(ValueKind::Long))];
        assert_eq!(
            bind_columns(&used, &batch).unwrap_err(),
            BindError::MissingColumn { col: 0 }
        );

        let raw = [0i64, 1];
        let batch = RowBatch::new(1, 3).col(0, ColData::Long(&raw));
        assert!(matches!(
            bind_columns(&used, &batch).unwrap_err(),
            BindError::ShortColumn { col: 0, .. }
        ));
    }

    #[test]
    fn kind_mismatch() {
        let raw = [0.0f64, 1.0, 2.0, 3.0];
        let batch = RowBatch::new(1, 3).col(0, ColData::Double(&raw));
        let used = [(0usize, ColInfo::scalar(ValueKind::Long))];
        assert_eq!(
            bind_columns(&used, &batch).unwrap_err(),
            BindError::KindMismatch {
                col: 0,
                expected: ValueKind::Long,
                found: ValueKind::Double,
            }
        );
    }
}
