// eval.rs - Tree-walking vectorized evaluator.
//
// One recursive pass per batch, post-order, dispatching on the node's
// opcode and the first operand's kind. Kernels loop row-major over
// n_rows * nelem elements; constant operands replicate, nelem == 1
// operands index per row, full vectors run lock-step. Undef masks
// propagate elementwise (undef_out = undef_a | undef_b) with exactly
// two exceptions, DEFNULL and the true-dominant OR.
//
// The scalar helpers at the bottom are shared with the parser's
// constant folder, so folded literals and per-row evaluation cannot
// disagree.

use crate::bind::ColBatch;
use crate::defs::{RandomSource, RowVec, Scalar, Shape, ValueKind, APPROX_TOL, MAX_STRLEN};
use crate::error::{EvalError, EvalErrorKind};
use crate::node::{Node, NodeId, NodeKind, OpCode};

// === Evaluation context ===

pub(crate) struct EvalCtx<'e, 'b> {
    pub nodes: &'e [Node],
    pub cols: &'e [Option<ColBatch<'b>>],
    pub first_row: i64,
    pub row_offset: i64,
    pub n_rows: usize,
    pub rng: &'e mut dyn RandomSource,
}

/// Result of evaluating one node: constants and column leaves stay
/// borrowed, interior nodes hand their freshly computed buffer to the
/// single parent that consumes it.
enum Val<'e> {
    Const(&'e Scalar),
    Col(usize),
    Owned(RowVec),
}

/// Evaluate the tree rooted at `root` into a full result buffer.
pub(crate) fn evaluate(ctx: &mut EvalCtx<'_, '_>, root: NodeId) -> Result<RowVec, EvalError> {
    let val = ctx.eval(root)?;
    ctx.materialize(val)
}

impl<'e, 'b> EvalCtx<'e, 'b> {
    fn eval(&mut self, id: NodeId) -> Result<Val<'e>, EvalError> {
        let nodes = self.nodes;
        match &nodes[id].kind {
            NodeKind::Const(s) => Ok(Val::Const(s)),
            NodeKind::Column(c) => Ok(Val::Col(*c)),
            NodeKind::Op { op, args } => self.eval_op(&nodes[id], *op, args),
        }
    }

    fn eval_op(
        &mut self,
        node: &'e Node,
        op: OpCode,
        args: &'e [NodeId],
    ) -> Result<Val<'e>, EvalError> {
        let out = match op {
            OpCode::CastLong
            | OpCode::CastDouble
            | OpCode::Neg
            | OpCode::Not
            | OpCode::BitNot => self.eval_unary(op, args)?,

            OpCode::Add
            | OpCode::Sub
            | OpCode::Mul
            | OpCode::Div
            | OpCode::Mod
            | OpCode::Pow
            | OpCode::BitAnd
            | OpCode::BitOr
            | OpCode::And
            | OpCode::Or
            | OpCode::Eq
            | OpCode::Ne
            | OpCode::Lt
            | OpCode::Le
            | OpCode::Gt
            | OpCode::Ge
            | OpCode::Approx => self.eval_binary(op, node, args)?,

            OpCode::Sin
            | OpCode::Cos
            | OpCode::Tan
            | OpCode::Asin
            | OpCode::Acos
            | OpCode::Atan
            | OpCode::Exp
            | OpCode::Log
            | OpCode::Log10
            | OpCode::Sqrt => {
                let nelem = self.nodes[args[0]].shape.nelem;
                let child = self.eval(args[0])?;
                let a = self.dbl_arg(&child, nelem);
                unary_dbl(a, nelem, self.n_rows, |x| dbl_func1(op, x))?
            }

            OpCode::Atan2 => {
                let (na, nb) = self.arg_nelems(args);
                let a = self.eval(args[0])?;
                let b = self.eval(args[1])?;
                let av = self.dbl_arg(&a, na);
                let bv = self.dbl_arg(&b, nb);
                bin_dbl(OpCode::Atan2, av, bv, &node.shape, self.n_rows)?
            }

            OpCode::Abs => self.eval_abs(args)?,
            OpCode::Sum => self.eval_sum(args)?,
            OpCode::IsNull => self.eval_isnull(args)?,
            OpCode::DefNull => self.eval_defnull(args)?,
            OpCode::Near | OpCode::Circle | OpCode::Box | OpCode::Ellipse => {
                self.eval_geometry(op, args)?
            }
            OpCode::RowNum => self.eval_rownum()?,
            OpCode::Random => self.eval_random()?,
            OpCode::Deref => self.eval_deref(args)?,
        };
        Ok(Val::Owned(out))
    }

    fn arg_nelems(&self, args: &[NodeId]) -> (usize, usize) {
        (
            self.nodes[args[0]].shape.nelem,
            self.nodes[args[1]].shape.nelem,
        )
    }

    // === unary operators and casts ===

    fn eval_unary(&mut self, op: OpCode, args: &'e [NodeId]) -> Result<RowVec, EvalError> {
        let ck = self.nodes[args[0]].ty;
        let nelem = self.nodes[args[0]].shape.nelem;
        let child = self.eval(args[0])?;
        let n_rows = self.n_rows;
        match (op, ck) {
            (OpCode::Neg, ValueKind::Long) => {
                unary_long(self.long_arg(&child, nelem), nelem, n_rows, |x| x.wrapping_neg())
            }
            (OpCode::Neg, ValueKind::Double) => {
                unary_dbl(self.dbl_arg(&child, nelem), nelem, n_rows, |x| Ok(-x))
            }
            (OpCode::Not, ValueKind::Bool) => {
                unary_bool(self.bool_arg(&child, nelem), nelem, n_rows, |x| !x)
            }
            (OpCode::BitNot, ValueKind::Bits) => {
                let a = self.bits_arg(&child);
                let mut data = alloc_vec::<String>(n_rows)?;
                for (row, slot) in data.iter_mut().enumerate() {
                    *slot = bits_not(a.get(row));
                }
                Ok(RowVec::Bits { data })
            }
            (OpCode::CastLong, ValueKind::Bool) => {
                map_bool_long(self.bool_arg(&child, nelem), nelem, n_rows, |x| x as i64)
            }
            (OpCode::CastLong, ValueKind::Double) => {
                map_dbl_long(self.dbl_arg(&child, nelem), nelem, n_rows, |x| x.trunc() as i64)
            }
            (OpCode::CastDouble, ValueKind::Bool) => {
                map_bool_dbl(self.bool_arg(&child, nelem), nelem, n_rows, |x| {
                    if x {
                        1.0
                    } else {
                        0.0
                    }
                })
            }
            (OpCode::CastDouble, ValueKind::Long) => {
                map_long_dbl(self.long_arg(&child, nelem), nelem, n_rows, |x| x as f64)
            }
            _ => Err(type_confusion()),
        }
    }

    // === binary operators ===

    fn eval_binary(
        &mut self,
        op: OpCode,
        node: &'e Node,
        args: &'e [NodeId],
    ) -> Result<RowVec, EvalError> {
        let ka = self.nodes[args[0]].ty;
        let (na, nb) = self.arg_nelems(args);
        let a = self.eval(args[0])?;
        let b = self.eval(args[1])?;
        let n_rows = self.n_rows;
        match ka {
            ValueKind::Long => {
                let av = self.long_arg(&a, na);
                let bv = self.long_arg(&b, nb);
                if is_cmp(op) {
                    cmp_long(op, av, bv, &node.shape, n_rows)
                } else {
                    bin_long(op, av, bv, &node.shape, n_rows)
                }
            }
            ValueKind::Double => {
                let av = self.dbl_arg(&a, na);
                let bv = self.dbl_arg(&b, nb);
                if is_cmp(op) {
                    cmp_dbl(op, av, bv, &node.shape, n_rows)
                } else {
                    bin_dbl(op, av, bv, &node.shape, n_rows)
                }
            }
            ValueKind::Bool => {
                let av = self.bool_arg(&a, na);
                let bv = self.bool_arg(&b, nb);
                bin_bool(op, av, bv, &node.shape, n_rows)
            }
            ValueKind::Str => {
                let av = self.str_arg(&a);
                let bv = self.str_arg(&b);
                bin_str(op, av, bv, n_rows)
            }
            ValueKind::Bits => {
                let av = self.bits_arg(&a);
                let bv = self.bits_arg(&b);
                bin_bits(op, av, bv, n_rows)
            }
        }
    }

    // === functions ===

    fn eval_abs(&mut self, args: &'e [NodeId]) -> Result<RowVec, EvalError> {
        let ck = self.nodes[args[0]].ty;
        let nelem = self.nodes[args[0]].shape.nelem;
        let child = self.eval(args[0])?;
        match ck {
            ValueKind::Long => {
                unary_long(self.long_arg(&child, nelem), nelem, self.n_rows, |x| {
                    x.wrapping_abs()
                })
            }
            ValueKind::Double => {
                unary_dbl(self.dbl_arg(&child, nelem), nelem, self.n_rows, |x| Ok(x.abs()))
            }
            _ => Err(type_confusion()),
        }
    }

    /// Per-row sum over the argument's elements; an undefined element
    /// makes the whole row undefined.
    fn eval_sum(&mut self, args: &'e [NodeId]) -> Result<RowVec, EvalError> {
        let ck = self.nodes[args[0]].ty;
        let nelem = self.nodes[args[0]].shape.nelem;
        let child = self.eval(args[0])?;
        let n_rows = self.n_rows;
        match ck {
            ValueKind::Bool => {
                let a = self.bool_arg(&child, nelem);
                let mut data = alloc_vec::<i64>(n_rows)?;
                let mut undef = alloc_vec::<bool>(n_rows)?;
                for row in 0..n_rows {
                    let mut acc = 0i64;
                    let mut u = false;
                    for e in 0..nelem {
                        let (x, ux) = a.get(row, e);
                        u |= ux;
                        acc += x as i64;
                    }
                    data[row] = acc;
                    undef[row] = u;
                }
                Ok(RowVec::Long { data, undef })
            }
            ValueKind::Long => {
                let a = self.long_arg(&child, nelem);
                let mut data = alloc_vec::<i64>(n_rows)?;
                let mut undef = alloc_vec::<bool>(n_rows)?;
                for row in 0..n_rows {
                    let mut acc = 0i64;
                    let mut u = false;
                    for e in 0..nelem {
                        let (x, ux) = a.get(row, e);
                        u |= ux;
                        acc = acc.wrapping_add(x);
                    }
                    data[row] = acc;
                    undef[row] = u;
                }
                Ok(RowVec::Long { data, undef })
            }
            ValueKind::Double => {
                let a = self.dbl_arg(&child, nelem);
                let mut data = alloc_vec::<f64>(n_rows)?;
                let mut undef = alloc_vec::<bool>(n_rows)?;
                for row in 0..n_rows {
                    let mut acc = 0f64;
                    let mut u = false;
                    for e in 0..nelem {
                        let (x, ux) = a.get(row, e);
                        u |= ux;
                        acc += x;
                    }
                    data[row] = acc;
                    undef[row] = u;
                }
                Ok(RowVec::Double { data, undef })
            }
            ValueKind::Bits => {
                let a = self.bits_arg(&child);
                let mut data = alloc_vec::<i64>(n_rows)?;
                let undef = alloc_vec::<bool>(n_rows)?;
                for row in 0..n_rows {
                    data[row] = a.get(row).bytes().filter(|&c| c == b'1').count() as i64;
                }
                Ok(RowVec::Long { data, undef })
            }
            ValueKind::Str => Err(type_confusion()),
        }
    }

    /// Always-defined boolean: the argument's undef mask. For string
    /// columns the per-row value is compared against the column's null
    /// sentinel directly, so an empty sentinel still matches empty rows.
    fn eval_isnull(&mut self, args: &'e [NodeId]) -> Result<RowVec, EvalError> {
        let ck = self.nodes[args[0]].ty;
        let nelem = self.nodes[args[0]].shape.nelem;
        let child = self.eval(args[0])?;
        let n_rows = self.n_rows;
        let n = n_rows * nelem;
        let mut data = alloc_vec::<bool>(n)?;
        let undef = alloc_vec::<bool>(n)?;
        if let Val::Col(c) = &child {
            if let Some(ColBatch::Str {
                data: rows,
                sentinel,
                ..
            }) = self.cols[*c].as_ref()
            {
                for row in 0..n_rows {
                    data[row] = rows[row] == *sentinel;
                }
                return Ok(RowVec::Bool { data, undef });
            }
        }
        match ck {
            ValueKind::Bool => {
                let a = self.bool_arg(&child, nelem);
                let mut i = 0;
                for row in 0..n_rows {
                    for e in 0..nelem {
                        data[i] = a.get(row, e).1;
                        i += 1;
                    }
                }
            }
            ValueKind::Long => {
                let a = self.long_arg(&child, nelem);
                let mut i = 0;
                for row in 0..n_rows {
                    for e in 0..nelem {
                        data[i] = a.get(row, e).1;
                        i += 1;
                    }
                }
            }
            ValueKind::Double => {
                let a = self.dbl_arg(&child, nelem);
                let mut i = 0;
                for row in 0..n_rows {
                    for e in 0..nelem {
                        data[i] = a.get(row, e).1;
                        i += 1;
                    }
                }
            }
            ValueKind::Str => {
                let a = self.str_arg(&child);
                for (row, slot) in data.iter_mut().enumerate() {
                    *slot = a.get(row).1;
                }
            }
            ValueKind::Bits => return Err(type_confusion()),
        }
        Ok(RowVec::Bool { data, undef })
    }

    /// `DEFNULL(a, b)`: `a` where defined, else `b`.
    fn eval_defnull(&mut self, args: &'e [NodeId]) -> Result<RowVec, EvalError> {
        let ck = self.nodes[args[0]].ty;
        let (na, nb) = self.arg_nelems(args);
        let nelem = na.max(nb);
        let a = self.eval(args[0])?;
        let b = self.eval(args[1])?;
        let n_rows = self.n_rows;
        let n = n_rows * nelem;
        match ck {
            ValueKind::Bool => {
                let av = self.bool_arg(&a, na);
                let bv = self.bool_arg(&b, nb);
                let mut data = alloc_vec::<bool>(n)?;
                let mut undef = alloc_vec::<bool>(n)?;
                let mut i = 0;
                for row in 0..n_rows {
                    for e in 0..nelem {
                        let (x, ux) = av.get(row, e);
                        let (y, uy) = bv.get(row, e);
                        if !ux {
                            data[i] = x;
                        } else {
                            data[i] = y;
                            undef[i] = uy;
                        }
                        i += 1;
                    }
                }
                Ok(RowVec::Bool { data, undef })
            }
            ValueKind::Long => {
                let av = self.long_arg(&a, na);
                let bv = self.long_arg(&b, nb);
                let mut data = alloc_vec::<i64>(n)?;
                let mut undef = alloc_vec::<bool>(n)?;
                let mut i = 0;
                for row in 0..n_rows {
                    for e in 0..nelem {
                        let (x, ux) = av.get(row, e);
                        let (y, uy) = bv.get(row, e);
                        if !ux {
                            data[i] = x;
                        } else {
                            data[i] = y;
                            undef[i] = uy;
                        }
                        i += 1;
                    }
                }
                Ok(RowVec::Long { data, undef })
            }
            ValueKind::Double => {
                let av = self.dbl_arg(&a, na);
                let bv = self.dbl_arg(&b, nb);
                let mut data = alloc_vec::<f64>(n)?;
                let mut undef = alloc_vec::<bool>(n)?;
                let mut i = 0;
                for row in 0..n_rows {
                    for e in 0..nelem {
                        let (x, ux) = av.get(row, e);
                        let (y, uy) = bv.get(row, e);
                        if !ux {
                            data[i] = x;
                        } else {
                            data[i] = y;
                            undef[i] = uy;
                        }
                        i += 1;
                    }
                }
                Ok(RowVec::Double { data, undef })
            }
            ValueKind::Str => {
                let av = self.str_arg(&a);
                let bv = self.str_arg(&b);
                let mut data = alloc_vec::<String>(n_rows)?;
                let mut undef = alloc_vec::<bool>(n_rows)?;
                for row in 0..n_rows {
                    let (x, ux) = av.get(row);
                    let (y, uy) = bv.get(row);
                    if !ux {
                        data[row] = x.to_string();
                    } else {
                        data[row] = y.to_string();
                        undef[row] = uy;
                    }
                }
                Ok(RowVec::Str { data, undef })
            }
            ValueKind::Bits => Err(type_confusion()),
        }
    }

    /// 2-D region predicates. All arguments are scalars; rotations are
    /// degrees counterclockwise, undone before the axis-aligned test.
    fn eval_geometry(&mut self, op: OpCode, args: &'e [NodeId]) -> Result<RowVec, EvalError> {
        let mut vals = Vec::with_capacity(args.len());
        for &a in args {
            vals.push(self.eval(a)?);
        }
        let views: Vec<DblArg<'_>> = vals.iter().map(|v| self.dbl_arg(v, 1)).collect();
        let n_rows = self.n_rows;
        let mut data = alloc_vec::<bool>(n_rows)?;
        let mut undef = alloc_vec::<bool>(n_rows)?;
        for row in 0..n_rows {
            let mut vs = [0f64; 7];
            let mut u = false;
            for (slot, view) in vs.iter_mut().zip(&views) {
                let (x, ux) = view.get(row, 0);
                *slot = x;
                u |= ux;
            }
            if u {
                undef[row] = true;
                continue;
            }
            data[row] = match op {
                OpCode::Near => (vs[0] - vs[1]).abs() < vs[2],
                OpCode::Circle => {
                    let (dx, dy) = (vs[3] - vs[0], vs[4] - vs[1]);
                    dx * dx + dy * dy <= vs[2] * vs[2]
                }
                OpCode::Box => {
                    let (xr, yr) = unrotate(vs[5] - vs[0], vs[6] - vs[1], vs[4]);
                    xr.abs() <= vs[2] / 2.0 && yr.abs() <= vs[3] / 2.0
                }
                OpCode::Ellipse => {
                    let (xr, yr) = unrotate(vs[5] - vs[0], vs[6] - vs[1], vs[4]);
                    let (a, b) = (vs[2], vs[3]);
                    (xr / a) * (xr / a) + (yr / b) * (yr / b) <= 1.0
                }
                _ => return Err(type_confusion()),
            };
        }
        Ok(RowVec::Bool { data, undef })
    }

    fn eval_rownum(&mut self) -> Result<RowVec, EvalError> {
        let n_rows = self.n_rows;
        let base = self.first_row + self.row_offset;
        let mut data = alloc_vec::<i64>(n_rows)?;
        let undef = alloc_vec::<bool>(n_rows)?;
        for (row, slot) in data.iter_mut().enumerate() {
            *slot = base + row as i64;
        }
        Ok(RowVec::Long { data, undef })
    }

    fn eval_random(&mut self) -> Result<RowVec, EvalError> {
        let n_rows = self.n_rows;
        let mut data = alloc_vec::<f64>(n_rows)?;
        let undef = alloc_vec::<bool>(n_rows)?;
        for slot in data.iter_mut() {
            *slot = self.rng.uniform();
        }
        Ok(RowVec::Double { data, undef })
    }

    // === dereference ===

    fn eval_deref(&mut self, args: &'e [NodeId]) -> Result<RowVec, EvalError> {
        let vnode = &self.nodes[args[0]];
        let vshape = vnode.shape;
        let vk = vnode.ty;
        let k = args.len() - 1;
        let var = self.eval(args[0])?;
        let mut idx_vals = Vec::with_capacity(k);
        for &a in &args[1..] {
            idx_vals.push(self.eval(a)?);
        }
        let idx_views: Vec<LongArg<'_>> =
            idx_vals.iter().map(|v| self.long_arg(v, 1)).collect();
        let n_rows = self.n_rows;

        if k == vshape.naxis {
            // full scalarization: one element per row
            match vk {
                ValueKind::Bool => {
                    let v = self.bool_arg(&var, vshape.nelem);
                    let mut data = alloc_vec::<bool>(n_rows)?;
                    let mut undef = alloc_vec::<bool>(n_rows)?;
                    for row in 0..n_rows {
                        let off = element_offset(&idx_views, &vshape, row)?;
                        let (x, ux) = v.get(row, off);
                        data[row] = x;
                        undef[row] = ux;
                    }
                    Ok(RowVec::Bool { data, undef })
                }
                ValueKind::Long => {
                    let v = self.long_arg(&var, vshape.nelem);
                    let mut data = alloc_vec::<i64>(n_rows)?;
                    let mut undef = alloc_vec::<bool>(n_rows)?;
                    for row in 0..n_rows {
                        let off = element_offset(&idx_views, &vshape, row)?;
                        let (x, ux) = v.get(row, off);
                        data[row] = x;
                        undef[row] = ux;
                    }
                    Ok(RowVec::Long { data, undef })
                }
                ValueKind::Double => {
                    let v = self.dbl_arg(&var, vshape.nelem);
                    let mut data = alloc_vec::<f64>(n_rows)?;
                    let mut undef = alloc_vec::<bool>(n_rows)?;
                    for row in 0..n_rows {
                        let off = element_offset(&idx_views, &vshape, row)?;
                        let (x, ux) = v.get(row, off);
                        data[row] = x;
                        undef[row] = ux;
                    }
                    Ok(RowVec::Double { data, undef })
                }
                _ => Err(type_confusion()),
            }
        } else {
            // one index selecting a slice along the last (slowest) axis
            let axis_len = vshape.naxes[vshape.naxis - 1];
            let out_nelem = vshape.nelem / axis_len;
            let n = n_rows * out_nelem;
            match vk {
                ValueKind::Bool => {
                    let v = self.bool_arg(&var, vshape.nelem);
                    let mut data = alloc_vec::<bool>(n)?;
                    let mut undef = alloc_vec::<bool>(n)?;
                    for row in 0..n_rows {
                        let base = slice_base(&idx_views[0], axis_len, out_nelem, row)?;
                        for e in 0..out_nelem {
                            let (x, ux) = v.get(row, base + e);
                            data[row * out_nelem + e] = x;
                            undef[row * out_nelem + e] = ux;
                        }
                    }
                    Ok(RowVec::Bool { data, undef })
                }
                ValueKind::Long => {
                    let v = self.long_arg(&var, vshape.nelem);
                    let mut data = alloc_vec::<i64>(n)?;
                    let mut undef = alloc_vec::<bool>(n)?;
                    for row in 0..n_rows {
                        let base = slice_base(&idx_views[0], axis_len, out_nelem, row)?;
                        for e in 0..out_nelem {
                            let (x, ux) = v.get(row, base + e);
                            data[row * out_nelem + e] = x;
                            undef[row * out_nelem + e] = ux;
                        }
                    }
                    Ok(RowVec::Long { data, undef })
                }
                ValueKind::Double => {
                    let v = self.dbl_arg(&var, vshape.nelem);
                    let mut data = alloc_vec::<f64>(n)?;
                    let mut undef = alloc_vec::<bool>(n)?;
                    for row in 0..n_rows {
                        let base = slice_base(&idx_views[0], axis_len, out_nelem, row)?;
                        for e in 0..out_nelem {
                            let (x, ux) = v.get(row, base + e);
                            data[row * out_nelem + e] = x;
                            undef[row * out_nelem + e] = ux;
                        }
                    }
                    Ok(RowVec::Double { data, undef })
                }
                _ => Err(type_confusion()),
            }
        }
    }

    // === operand views ===

    fn bool_arg<'v>(&'v self, v: &'v Val<'e>, nelem: usize) -> BoolArg<'v> {
        match v {
            Val::Const(Scalar::Bool(x)) => BoolArg::Const(*x),
            Val::Col(i) => match self.cols[*i].as_ref() {
                Some(ColBatch::Bool { data, undef }) => BoolArg::Vec { data, undef, nelem },
                _ => unreachable!("column bound with a non-boolean view"),
            },
            Val::Owned(RowVec::Bool { data, undef }) => BoolArg::Vec { data, undef, nelem },
            _ => unreachable!("boolean operand expected"),
        }
    }

    fn long_arg<'v>(&'v self, v: &'v Val<'e>, nelem: usize) -> LongArg<'v> {
        match v {
            Val::Const(Scalar::Long(x)) => LongArg::Const(*x),
            Val::Col(i) => match self.cols[*i].as_ref() {
                Some(ColBatch::Long { data, undef }) => LongArg::Vec { data, undef, nelem },
                _ => unreachable!("column bound with a non-long view"),
            },
            Val::Owned(RowVec::Long { data, undef }) => LongArg::Vec { data, undef, nelem },
            _ => unreachable!("long operand expected"),
        }
    }

    fn dbl_arg<'v>(&'v self, v: &'v Val<'e>, nelem: usize) -> DblArg<'v> {
        match v {
            Val::Const(Scalar::Double(x)) => DblArg::Const(*x),
            Val::Col(i) => match self.cols[*i].as_ref() {
                Some(ColBatch::Double { data, undef }) => DblArg::Vec { data, undef, nelem },
                _ => unreachable!("column bound with a non-double view"),
            },
            Val::Owned(RowVec::Double { data, undef }) => DblArg::Vec { data, undef, nelem },
            _ => unreachable!("double operand expected"),
        }
    }

    fn str_arg<'v>(&'v self, v: &'v Val<'e>) -> StrArg<'v> {
        match v {
            Val::Const(Scalar::Str(s)) => StrArg::Const(s),
            Val::Col(i) => match self.cols[*i].as_ref() {
                Some(ColBatch::Str { data, undef, .. }) => StrArg::Vec { data, undef },
                _ => unreachable!("column bound with a non-string view"),
            },
            Val::Owned(RowVec::Str { data, undef }) => StrArg::Vec { data, undef },
            _ => unreachable!("string operand expected"),
        }
    }

    fn bits_arg<'v>(&'v self, v: &'v Val<'e>) -> BitsArg<'v> {
        match v {
            Val::Const(Scalar::Bits(s)) => BitsArg::Const(s),
            Val::Col(i) => match self.cols[*i].as_ref() {
                Some(ColBatch::Bits { data }) => BitsArg::Vec { data },
                _ => unreachable!("column bound with a non-bits view"),
            },
            Val::Owned(RowVec::Bits { data }) => BitsArg::Vec { data },
            _ => unreachable!("bit-string operand expected"),
        }
    }

    // === root materialization ===

    fn materialize(&self, val: Val<'e>) -> Result<RowVec, EvalError> {
        let n_rows = self.n_rows;
        match val {
            Val::Owned(rv) => Ok(rv),
            Val::Const(s) => {
                let undef = alloc_vec::<bool>(n_rows)?;
                Ok(match s {
                    Scalar::Bool(x) => RowVec::Bool {
                        data: vec![*x; n_rows],
                        undef,
                    },
                    Scalar::Long(x) => RowVec::Long {
                        data: vec![*x; n_rows],
                        undef,
                    },
                    Scalar::Double(x) => RowVec::Double {
                        data: vec![*x; n_rows],
                        undef,
                    },
                    Scalar::Str(x) => RowVec::Str {
                        data: vec![x.clone(); n_rows],
                        undef,
                    },
                    Scalar::Bits(x) => RowVec::Bits {
                        data: vec![x.clone(); n_rows],
                    },
                })
            }
            Val::Col(i) => Ok(match self.cols[i].as_ref() {
                Some(ColBatch::Bool { data, undef }) => RowVec::Bool {
                    data: data.clone(),
                    undef: undef.clone(),
                },
                Some(ColBatch::Long { data, undef }) => RowVec::Long {
                    data: data.to_vec(),
                    undef: undef.clone(),
                },
                Some(ColBatch::Double { data, undef }) => RowVec::Double {
                    data: data.to_vec(),
                    undef: undef.clone(),
                },
                Some(ColBatch::Str { data, undef, .. }) => RowVec::Str {
                    data: data.to_vec(),
                    undef: undef.clone(),
                },
                Some(ColBatch::Bits { data }) => RowVec::Bits { data: data.clone() },
                None => return Err(type_confusion()),
            }),
        }
    }
}

// === operand views ===

#[derive(Clone, Copy)]
enum BoolArg<'v> {
    Const(bool),
    Vec {
        data: &'v [bool],
        undef: &'v [bool],
        nelem: usize,
    },
}

impl BoolArg<'_> {
    #[inline]
    fn get(&self, row: usize, elem: usize) -> (bool, bool) {
        match self {
            BoolArg::Const(x) => (*x, false),
            BoolArg::Vec { data, undef, nelem } => {
                let i = if *nelem == 1 { row } else { row * nelem + elem };
                (data[i], undef[i])
            }
        }
    }
}

#[derive(Clone, Copy)]
enum LongArg<'v> {
    Const(i64),
    Vec {
        data: &'v [i64],
        undef: &'v [bool],
        nelem: usize,
    },
}

impl LongArg<'_> {
    #[inline]
    fn get(&self, row: usize, elem: usize) -> (i64, bool) {
        match self {
            LongArg::Const(x) => (*x, false),
            LongArg::Vec { data, undef, nelem } => {
                let i = if *nelem == 1 { row } else { row * nelem + elem };
                (data[i], undef[i])
            }
        }
    }
}

#[derive(Clone, Copy)]
enum DblArg<'v> {
    Const(f64),
    Vec {
        data: &'v [f64],
        undef: &'v [bool],
        nelem: usize,
    },
}

impl DblArg<'_> {
    #[inline]
    fn get(&self, row: usize, elem: usize) -> (f64, bool) {
        match self {
            DblArg::Const(x) => (*x, false),
            DblArg::Vec { data, undef, nelem } => {
                let i = if *nelem == 1 { row } else { row * nelem + elem };
                (data[i], undef[i])
            }
        }
    }
}

#[derive(Clone, Copy)]
enum StrArg<'v> {
    Const(&'v str),
    Vec {
        data: &'v [String],
        undef: &'v [bool],
    },
}

impl<'v> StrArg<'v> {
    #[inline]
    fn get(&self, row: usize) -> (&'v str, bool) {
        match self {
            StrArg::Const(s) => (s, false),
            StrArg::Vec { data, undef } => (data[row].as_str(), undef[row]),
        }
    }
}

#[derive(Clone, Copy)]
enum BitsArg<'v> {
    Const(&'v str),
    Vec { data: &'v [String] },
}

impl<'v> BitsArg<'v> {
    #[inline]
    fn get(&self, row: usize) -> &'v str {
        match self {
            BitsArg::Const(s) => s,
            BitsArg::Vec { data } => data[row].as_str(),
        }
    }
}

// === vector kernels ===

fn bin_long(
    op: OpCode,
    a: LongArg<'_>,
    b: LongArg<'_>,
    shape: &Shape,
    n_rows: usize,
) -> Result<RowVec, EvalError> {
    let nelem = shape.nelem;
    let n = n_rows * nelem;
    let mut data = alloc_vec::<i64>(n)?;
    let mut undef = alloc_vec::<bool>(n)?;
    let mut i = 0;
    for row in 0..n_rows {
        for e in 0..nelem {
            let (x, ux) = a.get(row, e);
            let (y, uy) = b.get(row, e);
            if ux || uy {
                undef[i] = true;
            } else {
                data[i] = long_binop(op, x, y)?;
            }
            i += 1;
        }
    }
    Ok(RowVec::Long { data, undef })
}

fn bin_dbl(
    op: OpCode,
    a: DblArg<'_>,
    b: DblArg<'_>,
    shape: &Shape,
    n_rows: usize,
) -> Result<RowVec, EvalError> {
    let nelem = shape.nelem;
    let n = n_rows * nelem;
    let mut data = alloc_vec::<f64>(n)?;
    let mut undef = alloc_vec::<bool>(n)?;
    let mut i = 0;
    for row in 0..n_rows {
        for e in 0..nelem {
            let (x, ux) = a.get(row, e);
            let (y, uy) = b.get(row, e);
            if ux || uy {
                undef[i] = true;
            } else {
                data[i] = dbl_binop(op, x, y)?;
            }
            i += 1;
        }
    }
    Ok(RowVec::Double { data, undef })
}

fn cmp_long(
    op: OpCode,
    a: LongArg<'_>,
    b: LongArg<'_>,
    shape: &Shape,
    n_rows: usize,
) -> Result<RowVec, EvalError> {
    let nelem = shape.nelem;
    let n = n_rows * nelem;
    let mut data = alloc_vec::<bool>(n)?;
    let mut undef = alloc_vec::<bool>(n)?;
    let mut i = 0;
    for row in 0..n_rows {
        for e in 0..nelem {
            let (x, ux) = a.get(row, e);
            let (y, uy) = b.get(row, e);
            if ux || uy {
                undef[i] = true;
            } else {
                data[i] = long_cmp(op, x, y);
            }
            i += 1;
        }
    }
    Ok(RowVec::Bool { data, undef })
}

fn cmp_dbl(
    op: OpCode,
    a: DblArg<'_>,
    b: DblArg<'_>,
    shape: &Shape,
    n_rows: usize,
) -> Result<RowVec, EvalError> {
    let nelem = shape.nelem;
    let n = n_rows * nelem;
    let mut data = alloc_vec::<bool>(n)?;
    let mut undef = alloc_vec::<bool>(n)?;
    let mut i = 0;
    for row in 0..n_rows {
        for e in 0..nelem {
            let (x, ux) = a.get(row, e);
            let (y, uy) = b.get(row, e);
            if ux || uy {
                undef[i] = true;
            } else {
                data[i] = dbl_cmp(op, x, y);
            }
            i += 1;
        }
    }
    Ok(RowVec::Bool { data, undef })
}

/// Boolean AND/OR/EQ/NE. OR is true-dominant: a defined true on either
/// side yields a defined true whatever the other side is.
fn bin_bool(
    op: OpCode,
    a: BoolArg<'_>,
    b: BoolArg<'_>,
    shape: &Shape,
    n_rows: usize,
) -> Result<RowVec, EvalError> {
    let nelem = shape.nelem;
    let n = n_rows * nelem;
    let mut data = alloc_vec::<bool>(n)?;
    let mut undef = alloc_vec::<bool>(n)?;
    let mut i = 0;
    for row in 0..n_rows {
        for e in 0..nelem {
            let (x, ux) = a.get(row, e);
            let (y, uy) = b.get(row, e);
            match op {
                OpCode::Or => {
                    if (!ux && x) || (!uy && y) {
                        data[i] = true;
                    } else if ux || uy {
                        undef[i] = true;
                    }
                }
                OpCode::And => {
                    if ux || uy {
                        undef[i] = true;
                    } else {
                        data[i] = x && y;
                    }
                }
                OpCode::Eq => {
                    if ux || uy {
                        undef[i] = true;
                    } else {
                        data[i] = x == y;
                    }
                }
                OpCode::Ne => {
                    if ux || uy {
                        undef[i] = true;
                    } else {
                        data[i] = x != y;
                    }
                }
                _ => return Err(type_confusion()),
            }
            i += 1;
        }
    }
    Ok(RowVec::Bool { data, undef })
}

fn bin_str(
    op: OpCode,
    a: StrArg<'_>,
    b: StrArg<'_>,
    n_rows: usize,
) -> Result<RowVec, EvalError> {
    if op == OpCode::Add {
        let mut data = alloc_vec::<String>(n_rows)?;
        let mut undef = alloc_vec::<bool>(n_rows)?;
        for row in 0..n_rows {
            let (x, ux) = a.get(row);
            let (y, uy) = b.get(row);
            if ux || uy {
                undef[row] = true;
            } else {
                data[row] = str_concat(x, y)?;
            }
        }
        return Ok(RowVec::Str { data, undef });
    }
    let mut data = alloc_vec::<bool>(n_rows)?;
    let mut undef = alloc_vec::<bool>(n_rows)?;
    for row in 0..n_rows {
        let (x, ux) = a.get(row);
        let (y, uy) = b.get(row);
        if ux || uy {
            undef[row] = true;
        } else {
            data[row] = str_cmp(op, x, y)?;
        }
    }
    Ok(RowVec::Bool { data, undef })
}

fn bin_bits(
    op: OpCode,
    a: BitsArg<'_>,
    b: BitsArg<'_>,
    n_rows: usize,
) -> Result<RowVec, EvalError> {
    match op {
        OpCode::Add | OpCode::BitAnd | OpCode::BitOr => {
            let mut data = alloc_vec::<String>(n_rows)?;
            for row in 0..n_rows {
                let (x, y) = (a.get(row), b.get(row));
                data[row] = match op {
                    OpCode::Add => bits_concat(x, y)?,
                    OpCode::BitAnd => bits_and(x, y),
                    _ => bits_or(x, y),
                };
            }
            Ok(RowVec::Bits { data })
        }
        OpCode::Eq | OpCode::Ne | OpCode::Lt | OpCode::Le | OpCode::Gt | OpCode::Ge => {
            let mut data = alloc_vec::<bool>(n_rows)?;
            let undef = alloc_vec::<bool>(n_rows)?;
            for row in 0..n_rows {
                let (x, y) = (a.get(row), b.get(row));
                data[row] = match op {
                    OpCode::Eq => bits_eq(x, y),
                    OpCode::Ne => !bits_eq(x, y),
                    _ => {
                        let (vx, vy) = bits_ints(x, y);
                        long_cmp(op, vx, vy)
                    }
                };
            }
            Ok(RowVec::Bool { data, undef })
        }
        _ => Err(type_confusion()),
    }
}

// === unary mapping helpers ===

fn unary_long(
    a: LongArg<'_>,
    nelem: usize,
    n_rows: usize,
    f: impl Fn(i64) -> i64,
) -> Result<RowVec, EvalError> {
    let n = n_rows * nelem;
    let mut data = alloc_vec::<i64>(n)?;
    let mut undef = alloc_vec::<bool>(n)?;
    let mut i = 0;
    for row in 0..n_rows {
        for e in 0..nelem {
            let (x, ux) = a.get(row, e);
            if ux {
                undef[i] = true;
            } else {
                data[i] = f(x);
            }
            i += 1;
        }
    }
    Ok(RowVec::Long { data, undef })
}

fn unary_dbl(
    a: DblArg<'_>,
    nelem: usize,
    n_rows: usize,
    f: impl Fn(f64) -> Result<f64, EvalError>,
) -> Result<RowVec, EvalError> {
    let n = n_rows * nelem;
    let mut data = alloc_vec::<f64>(n)?;
    let mut undef = alloc_vec::<bool>(n)?;
    let mut i = 0;
    for row in 0..n_rows {
        for e in 0..nelem {
            let (x, ux) = a.get(row, e);
            if ux {
                undef[i] = true;
            } else {
                data[i] = f(x)?;
            }
            i += 1;
        }
    }
    Ok(RowVec::Double { data, undef })
}

fn unary_bool(
    a: BoolArg<'_>,
    nelem: usize,
    n_rows: usize,
    f: impl Fn(bool) -> bool,
) -> Result<RowVec, EvalError> {
    let n = n_rows * nelem;
    let mut data = alloc_vec::<bool>(n)?;
    let mut undef = alloc_vec::<bool>(n)?;
    let mut i = 0;
    for row in 0..n_rows {
        for e in 0..nelem {
            let (x, ux) = a.get(row, e);
            if ux {
                undef[i] = true;
            } else {
                data[i] = f(x);
            }
            i += 1;
        }
    }
    Ok(RowVec::Bool { data, undef })
}

fn map_bool_long(
    a: BoolArg<'_>,
    nelem: usize,
    n_rows: usize,
    f: impl Fn(bool) -> i64,
) -> Result<RowVec, EvalError> {
    let n = n_rows * nelem;
    let mut data = alloc_vec::<i64>(n)?;
    let mut undef = alloc_vec::<bool>(n)?;
    let mut i = 0;
    for row in 0..n_rows {
        for e in 0..nelem {
            let (x, ux) = a.get(row, e);
            if ux {
                undef[i] = true;
            } else {
                data[i] = f(x);
            }
            i += 1;
        }
    }
    Ok(RowVec::Long { data, undef })
}

fn map_dbl_long(
    a: DblArg<'_>,
    nelem: usize,
    n_rows: usize,
    f: impl Fn(f64) -> i64,
) -> Result<RowVec, EvalError> {
    let n = n_rows * nelem;
    let mut data = alloc_vec::<i64>(n)?;
    let mut undef = alloc_vec::<bool>(n)?;
    let mut i = 0;
    for row in 0..n_rows {
        for e in 0..nelem {
            let (x, ux) = a.get(row, e);
            if ux {
                undef[i] = true;
            } else {
                data[i] = f(x);
            }
            i += 1;
        }
    }
    Ok(RowVec::Long { data, undef })
}

fn map_bool_dbl(
    a: BoolArg<'_>,
    nelem: usize,
    n_rows: usize,
    f: impl Fn(bool) -> f64,
) -> Result<RowVec, EvalError> {
    let n = n_rows * nelem;
    let mut data = alloc_vec::<f64>(n)?;
    let mut undef = alloc_vec::<bool>(n)?;
    let mut i = 0;
    for row in 0..n_rows {
        for e in 0..nelem {
            let (x, ux) = a.get(row, e);
            if ux {
                undef[i] = true;
            } else {
                data[i] = f(x);
            }
            i += 1;
        }
    }
    Ok(RowVec::Double { data, undef })
}

fn map_long_dbl(
    a: LongArg<'_>,
    nelem: usize,
    n_rows: usize,
    f: impl Fn(i64) -> f64,
) -> Result<RowVec, EvalError> {
    let n = n_rows * nelem;
    let mut data = alloc_vec::<f64>(n)?;
    let mut undef = alloc_vec::<bool>(n)?;
    let mut i = 0;
    for row in 0..n_rows {
        for e in 0..nelem {
            let (x, ux) = a.get(row, e);
            if ux {
                undef[i] = true;
            } else {
                data[i] = f(x);
            }
            i += 1;
        }
    }
    Ok(RowVec::Double { data, undef })
}

// === subscript helpers ===

fn index_at(view: &LongArg<'_>, row: usize) -> Result<i64, EvalError> {
    let (v, u) = view.get(row, 0);
    if u {
        return Err(EvalError::new(
            EvalErrorKind::NullIndex,
            "Null encountered as vector index",
        ));
    }
    Ok(v)
}

/// Flat element offset for a full-scalarization subscript; indices are
/// 1-based, the first axis varies fastest.
fn element_offset(
    views: &[LongArg<'_>],
    shape: &Shape,
    row: usize,
) -> Result<usize, EvalError> {
    let mut offset = 0usize;
    let mut stride = 1usize;
    for (d, view) in views.iter().enumerate() {
        let idx = index_at(view, row)?;
        let len = shape.naxes[d];
        if idx < 1 || idx as usize > len {
            return Err(EvalError::new(
                EvalErrorKind::IndexOutOfRange,
                format!("index {} outside 1..{} on axis {}", idx, len, d + 1),
            ));
        }
        offset += (idx as usize - 1) * stride;
        stride *= len;
    }
    Ok(offset)
}

/// Element offset of the selected slice along the last axis.
fn slice_base(
    view: &LongArg<'_>,
    axis_len: usize,
    out_nelem: usize,
    row: usize,
) -> Result<usize, EvalError> {
    let idx = index_at(view, row)?;
    if idx < 1 || idx as usize > axis_len {
        return Err(EvalError::new(
            EvalErrorKind::IndexOutOfRange,
            format!("index {} outside 1..{} on the last axis", idx, axis_len),
        ));
    }
    Ok((idx as usize - 1) * out_nelem)
}

// === allocation ===

fn alloc_vec<T: Clone + Default>(n: usize) -> Result<Vec<T>, EvalError> {
    let mut v: Vec<T> = Vec::new();
    v.try_reserve_exact(n).map_err(|_| EvalError::alloc(n))?;
    v.resize(n, T::default());
    Ok(v)
}

fn type_confusion() -> EvalError {
    EvalError::domain("internal kind confusion in the evaluator")
}

// === scalar helpers (shared with the constant folder) ===

fn is_cmp(op: OpCode) -> bool {
    matches!(
        op,
        OpCode::Eq | OpCode::Ne | OpCode::Lt | OpCode::Le | OpCode::Gt | OpCode::Ge | OpCode::Approx
    )
}

fn long_binop(op: OpCode, x: i64, y: i64) -> Result<i64, EvalError> {
    Ok(match op {
        OpCode::Add => x.wrapping_add(y),
        OpCode::Sub => x.wrapping_sub(y),
        OpCode::Mul => x.wrapping_mul(y),
        OpCode::Div => {
            if y == 0 {
                return Err(EvalError::domain("divide by zero encountered"));
            }
            x.wrapping_div(y)
        }
        OpCode::Mod => {
            if y == 0 {
                return Err(EvalError::domain("modulus by zero encountered"));
            }
            x.wrapping_rem(y)
        }
        OpCode::Pow => (x as f64).powf(y as f64) as i64,
        OpCode::BitAnd => x & y,
        OpCode::BitOr => x | y,
        _ => return Err(type_confusion()),
    })
}

fn dbl_binop(op: OpCode, x: f64, y: f64) -> Result<f64, EvalError> {
    Ok(match op {
        OpCode::Add => x + y,
        OpCode::Sub => x - y,
        OpCode::Mul => x * y,
        OpCode::Div => {
            if y == 0.0 {
                return Err(EvalError::domain("divide by zero encountered"));
            }
            x / y
        }
        OpCode::Mod => {
            if y == 0.0 {
                return Err(EvalError::domain("modulus by zero encountered"));
            }
            x - y * (x / y).trunc()
        }
        OpCode::Pow => x.powf(y),
        OpCode::Atan2 => x.atan2(y),
        _ => return Err(type_confusion()),
    })
}

fn long_cmp(op: OpCode, x: i64, y: i64) -> bool {
    match op {
        OpCode::Eq => x == y,
        OpCode::Ne => x != y,
        OpCode::Lt => x < y,
        OpCode::Le => x <= y,
        OpCode::Gt => x > y,
        _ => x >= y,
    }
}

fn dbl_cmp(op: OpCode, x: f64, y: f64) -> bool {
    match op {
        OpCode::Eq => x == y,
        OpCode::Ne => x != y,
        OpCode::Lt => x < y,
        OpCode::Le => x <= y,
        OpCode::Gt => x > y,
        OpCode::Ge => x >= y,
        _ => (x - y).abs() < APPROX_TOL,
    }
}

fn str_cmp(op: OpCode, x: &str, y: &str) -> Result<bool, EvalError> {
    Ok(match op {
        OpCode::Eq => x == y,
        OpCode::Ne => x != y,
        OpCode::Lt => x < y,
        OpCode::Le => x <= y,
        OpCode::Gt => x > y,
        OpCode::Ge => x >= y,
        _ => return Err(type_confusion()),
    })
}

fn str_concat(x: &str, y: &str) -> Result<String, EvalError> {
    if x.len() + y.len() > MAX_STRLEN {
        return Err(EvalError::domain(format!(
            "string concatenation longer than {} bytes",
            MAX_STRLEN
        )));
    }
    Ok(format!("{}{}", x, y))
}

// === bit-string helpers ===

/// Left-pad the shorter operand with '0' to the longer length.
fn bits_pad(a: &str, b: &str) -> (String, String) {
    let len = a.len().max(b.len());
    let pad = |s: &str| {
        let mut t = String::with_capacity(len);
        for _ in 0..len - s.len() {
            t.push('0');
        }
        t.push_str(s);
        t
    };
    (pad(a), pad(b))
}

/// Positionwise AND; 'x' absorbs.
fn bits_and(a: &str, b: &str) -> String {
    let (a, b) = bits_pad(a, b);
    a.chars()
        .zip(b.chars())
        .map(|(x, y)| {
            if x == 'x' || y == 'x' {
                'x'
            } else if x == '1' && y == '1' {
                '1'
            } else {
                '0'
            }
        })
        .collect()
}

/// Positionwise OR; '1' dominates, 'x' survives otherwise.
fn bits_or(a: &str, b: &str) -> String {
    let (a, b) = bits_pad(a, b);
    a.chars()
        .zip(b.chars())
        .map(|(x, y)| {
            if x == '1' || y == '1' {
                '1'
            } else if x == 'x' || y == 'x' {
                'x'
            } else {
                '0'
            }
        })
        .collect()
}

fn bits_not(a: &str) -> String {
    a.chars()
        .map(|c| match c {
            '0' => '1',
            '1' => '0',
            other => other,
        })
        .collect()
}

/// Bit-string equality: no position may pair '0' against '1'.
fn bits_eq(a: &str, b: &str) -> bool {
    let (a, b) = bits_pad(a, b);
    !a.chars()
        .zip(b.chars())
        .any(|(x, y)| (x == '0' && y == '1') || (x == '1' && y == '0'))
}

/// Integer values for ordering; a position with 'x' on either side
/// contributes 0 to both operands.
fn bits_ints(a: &str, b: &str) -> (i64, i64) {
    let (a, b) = bits_pad(a, b);
    let mut va = 0i64;
    let mut vb = 0i64;
    for (x, y) in a.chars().zip(b.chars()) {
        va = va.wrapping_shl(1);
        vb = vb.wrapping_shl(1);
        if x == 'x' || y == 'x' {
            continue;
        }
        va |= (x == '1') as i64;
        vb |= (y == '1') as i64;
    }
    (va, vb)
}

fn bits_concat(a: &str, b: &str) -> Result<String, EvalError> {
    if a.len() + b.len() > MAX_STRLEN {
        return Err(EvalError::domain(format!(
            "bit-string concatenation longer than {} bits",
            MAX_STRLEN
        )));
    }
    Ok(format!("{}{}", a, b))
}

fn dbl_func1(op: OpCode, x: f64) -> Result<f64, EvalError> {
    Ok(match op {
        OpCode::Sin => x.sin(),
        OpCode::Cos => x.cos(),
        OpCode::Tan => x.tan(),
        OpCode::Asin => {
            if !(-1.0..=1.0).contains(&x) {
                return Err(EvalError::domain("arcsin argument outside [-1,1]"));
            }
            x.asin()
        }
        OpCode::Acos => {
            if !(-1.0..=1.0).contains(&x) {
                return Err(EvalError::domain("arccos argument outside [-1,1]"));
            }
            x.acos()
        }
        OpCode::Atan => x.atan(),
        OpCode::Exp => x.exp(),
        OpCode::Log => {
            if x <= 0.0 {
                return Err(EvalError::domain("log of a non-positive argument"));
            }
            x.ln()
        }
        OpCode::Log10 => {
            if x <= 0.0 {
                return Err(EvalError::domain("log10 of a non-positive argument"));
            }
            x.log10()
        }
        OpCode::Sqrt => {
            if x < 0.0 {
                return Err(EvalError::domain("sqrt of a negative argument"));
            }
            x.sqrt()
        }
        _ => return Err(type_confusion()),
    })
}

/// Rotate `(dx, dy)` by `-deg` degrees.
fn unrotate(dx: f64, dy: f64, deg: f64) -> (f64, f64) {
    let theta = deg.to_radians();
    let (sin, cos) = theta.sin_cos();
    (dx * cos + dy * sin, -dx * sin + dy * cos)
}

// === constant folding entry points ===

pub(crate) fn fold_unary(op: OpCode, v: &Scalar) -> Result<Scalar, EvalError> {
    match (op, v) {
        (OpCode::Neg, Scalar::Long(x)) => Ok(Scalar::Long(x.wrapping_neg())),
        (OpCode::Neg, Scalar::Double(x)) => Ok(Scalar::Double(-x)),
        (OpCode::Not, Scalar::Bool(x)) => Ok(Scalar::Bool(!x)),
        (OpCode::BitNot, Scalar::Bits(s)) => Ok(Scalar::Bits(bits_not(s))),
        (OpCode::CastLong, Scalar::Bool(x)) => Ok(Scalar::Long(*x as i64)),
        (OpCode::CastLong, Scalar::Long(x)) => Ok(Scalar::Long(*x)),
        (OpCode::CastLong, Scalar::Double(x)) => Ok(Scalar::Long(x.trunc() as i64)),
        (OpCode::CastDouble, Scalar::Bool(x)) => {
            Ok(Scalar::Double(if *x { 1.0 } else { 0.0 }))
        }
        (OpCode::CastDouble, Scalar::Long(x)) => Ok(Scalar::Double(*x as f64)),
        (OpCode::CastDouble, Scalar::Double(x)) => Ok(Scalar::Double(*x)),
        _ => Err(type_confusion()),
    }
}

pub(crate) fn fold_binary(op: OpCode, a: &Scalar, b: &Scalar) -> Result<Scalar, EvalError> {
    match (a, b) {
        (Scalar::Long(x), Scalar::Long(y)) => {
            if is_cmp(op) {
                Ok(Scalar::Bool(long_cmp(op, *x, *y)))
            } else {
                Ok(Scalar::Long(long_binop(op, *x, *y)?))
            }
        }
        (Scalar::Double(x), Scalar::Double(y)) => {
            if is_cmp(op) {
                Ok(Scalar::Bool(dbl_cmp(op, *x, *y)))
            } else {
                Ok(Scalar::Double(dbl_binop(op, *x, *y)?))
            }
        }
        (Scalar::Bool(x), Scalar::Bool(y)) => Ok(Scalar::Bool(match op {
            OpCode::And => *x && *y,
            OpCode::Or => *x || *y,
            OpCode::Eq => x == y,
            OpCode::Ne => x != y,
            _ => return Err(type_confusion()),
        })),
        (Scalar::Str(x), Scalar::Str(y)) => {
            if op == OpCode::Add {
                Ok(Scalar::Str(str_concat(x, y)?))
            } else {
                Ok(Scalar::Bool(str_cmp(op, x, y)?))
            }
        }
        (Scalar::Bits(x), Scalar::Bits(y)) => match op {
            OpCode::Add => Ok(Scalar::Bits(bits_concat(x, y)?)),
            OpCode::BitAnd => Ok(Scalar::Bits(bits_and(x, y))),
            OpCode::BitOr => Ok(Scalar::Bits(bits_or(x, y))),
            OpCode::Eq => Ok(Scalar::Bool(bits_eq(x, y))),
            OpCode::Ne => Ok(Scalar::Bool(!bits_eq(x, y))),
            OpCode::Lt | OpCode::Le | OpCode::Gt | OpCode::Ge => {
                let (vx, vy) = bits_ints(x, y);
                Ok(Scalar::Bool(long_cmp(op, vx, vy)))
            }
            _ => Err(type_confusion()),
        },
        _ => Err(type_confusion()),
    }
}
