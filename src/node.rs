// node.rs - Compiled-tree node arena, opcodes, and the tree builder.
//
// Nodes live in one growable arena and reference children by index, so
// the compiled form is cheap to clone and traversal never chases
// pointers. The builder enforces the static rules at construction
// time: numeric promotion, shape compatibility, and constant folding
// of literal-only subtrees (folding reuses the evaluator's scalar
// kernels, so parse-time and run-time arithmetic cannot drift apart).

use smallvec::SmallVec;

use crate::defs::{ColInfo, Scalar, Shape, ValueKind, MAX_SUBS};
use crate::error::{ParseError, ParseErrorKind};
use crate::eval::{fold_binary, fold_unary};

pub(crate) type NodeId = usize;

// === Opcodes ===

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum OpCode {
    // arithmetic; Add doubles as concatenation on strings and bit strings
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
    Neg,
    // comparison; Approx is the binary `~` operator
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Approx,
    // logical
    And,
    Or,
    Not,
    // `&` / `|` on bit strings and on integers; BitNot is prefix `~`
    BitAnd,
    BitOr,
    BitNot,
    // implicit and explicit casts
    CastLong,
    CastDouble,
    // built-in functions
    Sum,
    Abs,
    Sin,
    Cos,
    Tan,
    Asin,
    Acos,
    Atan,
    Atan2,
    Exp,
    Log,
    Log10,
    Sqrt,
    Random,
    IsNull,
    DefNull,
    Near,
    Circle,
    Box,
    Ellipse,
    RowNum,
    // vector subscript
    Deref,
}

impl OpCode {
    /// Operations whose result is one element per row regardless of the
    /// argument shapes.
    pub(crate) fn scalarizes(self) -> bool {
        matches!(
            self,
            OpCode::Sum
                | OpCode::Near
                | OpCode::Circle
                | OpCode::Box
                | OpCode::Ellipse
                | OpCode::Random
                | OpCode::RowNum
        )
    }
}

// === Nodes ===

#[derive(Clone, Debug)]
pub(crate) enum NodeKind {
    /// Literal or folded constant.
    Const(Scalar),
    /// Reference to the table column with this 0-based index.
    Column(usize),
    /// Operator or function application.
    Op {
        op: OpCode,
        args: SmallVec<[NodeId; MAX_SUBS]>,
    },
}

#[derive(Clone, Debug)]
pub(crate) struct Node {
    pub kind: NodeKind,
    pub ty: ValueKind,
    pub shape: Shape,
}

impl Node {
    pub fn constant(&self) -> Option<&Scalar> {
        match &self.kind {
            NodeKind::Const(s) => Some(s),
            _ => None,
        }
    }
}

// === Tree builder ===

#[derive(Debug)]
pub(crate) struct TreeBuilder {
    pub nodes: Vec<Node>,
}

impl TreeBuilder {
    pub fn new() -> TreeBuilder {
        TreeBuilder { nodes: Vec::new() }
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id]
    }

    fn push(&mut self, node: Node) -> NodeId {
        self.nodes.push(node);
        self.nodes.len() - 1
    }

    pub fn const_node(&mut self, value: Scalar) -> NodeId {
        let ty = value.kind();
        self.push(Node {
            kind: NodeKind::Const(value),
            ty,
            shape: Shape::SCALAR,
        })
    }

    pub fn column_node(&mut self, idx: usize, info: &ColInfo) -> NodeId {
        // String columns are one value per row; their width is carried
        // in the data, not in the shape.
        let shape = match info.kind {
            ValueKind::Str => Shape::SCALAR,
            _ => info.shape,
        };
        self.push(Node {
            kind: NodeKind::Column(idx),
            ty: info.kind,
            shape,
        })
    }

    /// True iff one operand is a scalar or both share the axis layout.
    pub fn test_dims(&self, a: NodeId, b: NodeId) -> bool {
        let (sa, sb) = (&self.nodes[a].shape, &self.nodes[b].shape);
        sa.is_scalar() || sb.is_scalar() || sa.same_dims(sb)
    }

    /// Shape of the result of a broadcasting binary operation.
    fn merged_shape(&self, a: NodeId, b: NodeId) -> Shape {
        if self.nodes[a].shape.is_scalar() {
            self.nodes[b].shape
        } else {
            self.nodes[a].shape
        }
    }

    /// Unary operator or cast. No-op casts return the child unchanged;
    /// casts, negation and the two NOTs fold a constant child in place.
    pub fn new_unary(
        &mut self,
        out: ValueKind,
        op: OpCode,
        child: NodeId,
        at: usize,
    ) -> Result<NodeId, ParseError> {
        if matches!(op, OpCode::CastLong | OpCode::CastDouble) && self.nodes[child].ty == out {
            return Ok(child);
        }
        if let Some(value) = self.nodes[child].constant() {
            let folded = fold_unary(op, value).map_err(|e| ParseError::syntax(e.message, at))?;
            let node = &mut self.nodes[child];
            node.kind = NodeKind::Const(folded);
            node.ty = out;
            return Ok(child);
        }
        let shape = self.nodes[child].shape;
        Ok(self.push(Node {
            kind: NodeKind::Op {
                op,
                args: SmallVec::from_slice(&[child]),
            },
            ty: out,
            shape,
        }))
    }

    /// Binary operator. Operand kinds must already agree (the parser
    /// promotes numerics first); shapes must broadcast. A literal-only
    /// pair folds into a single constant node.
    pub fn new_bin_op(
        &mut self,
        out: ValueKind,
        a: NodeId,
        op: OpCode,
        b: NodeId,
        at: usize,
    ) -> Result<NodeId, ParseError> {
        let kinds_are_rowwise =
            matches!(self.nodes[a].ty, ValueKind::Str | ValueKind::Bits);
        if !kinds_are_rowwise && !self.test_dims(a, b) {
            return Err(ParseError::new(
                ParseErrorKind::ShapeMismatch,
                "vector operands of a binary operation must have identical dimensions",
                at,
            ));
        }
        if let (Some(va), Some(vb)) = (self.nodes[a].constant(), self.nodes[b].constant()) {
            let folded =
                fold_binary(op, va, vb).map_err(|e| ParseError::syntax(e.message, at))?;
            let node = &mut self.nodes[a];
            node.kind = NodeKind::Const(folded);
            node.ty = out;
            return Ok(a);
        }
        let shape = if kinds_are_rowwise {
            Shape::SCALAR
        } else {
            self.merged_shape(a, b)
        };
        Ok(self.push(Node {
            kind: NodeKind::Op {
                op,
                args: SmallVec::from_slice(&[a, b]),
            },
            ty: out,
            shape,
        }))
    }

    /// Function application. The result kind is `out` when given,
    /// otherwise the first argument's; scalarizing functions yield one
    /// element per row, the rest broadcast (the shape of the first
    /// non-scalar argument, the parser has already checked agreement).
    pub fn new_func(
        &mut self,
        out: Option<ValueKind>,
        op: OpCode,
        args: &[NodeId],
        _at: usize,
    ) -> Result<NodeId, ParseError> {
        let (ty, shape) = match args.first() {
            Some(&first) => {
                let ty = out.unwrap_or(self.nodes[first].ty);
                let shape = if op.scalarizes() {
                    Shape::SCALAR
                } else {
                    args.iter()
                        .map(|&a| self.nodes[a].shape)
                        .find(|s| !s.is_scalar())
                        .unwrap_or(Shape::SCALAR)
                };
                (ty, shape)
            }
            None => (out.expect("zero-argument functions fix their kind"), Shape::SCALAR),
        };
        Ok(self.push(Node {
            kind: NodeKind::Op {
                op,
                args: SmallVec::from_slice(args),
            },
            ty,
            shape,
        }))
    }

    /// Vector subscript: full scalarization (`k == naxis`) or a single
    /// index selecting along the last axis (`k == 1`).
    pub fn new_deref(
        &mut self,
        var: NodeId,
        idxs: &[NodeId],
        at: usize,
    ) -> Result<NodeId, ParseError> {
        let vnode = &self.nodes[var];
        if !matches!(vnode.ty, ValueKind::Bool | ValueKind::Long | ValueKind::Double) {
            return Err(ParseError::types(
                format!("cannot subscript a {} value", vnode.ty),
                at,
            ));
        }
        if vnode.shape.nelem <= 1 {
            return Err(ParseError::types("cannot subscript a scalar", at));
        }
        let naxis = vnode.shape.naxis;
        let ty = vnode.ty;
        let shape = if idxs.len() == naxis {
            Shape::SCALAR
        } else if idxs.len() == 1 {
            let axes = &vnode.shape.naxes[..naxis - 1];
            Shape::vector(axes)
        } else {
            return Err(ParseError::syntax(
                format!(
                    "subscript needs 1 or {} indices, found {}",
                    naxis,
                    idxs.len()
                ),
                at,
            ));
        };
        for &idx in idxs {
            let inode = &self.nodes[idx];
            if inode.ty != ValueKind::Long || !inode.shape.is_scalar() {
                return Err(ParseError::types(
                    "subscript indices must be scalar integers",
                    at,
                ));
            }
        }
        let mut args: SmallVec<[NodeId; MAX_SUBS]> = SmallVec::from_slice(&[var]);
        args.extend_from_slice(idxs);
        Ok(self.push(Node {
            kind: NodeKind::Op {
                op: OpCode::Deref,
                args,
            },
            ty,
            shape,
        }))
    }

    /// Insert an implicit cast raising `n` to `to`.
    pub fn coerce(
        &mut self,
        n: NodeId,
        to: ValueKind,
        at: usize,
    ) -> Result<NodeId, ParseError> {
        let from = self.nodes[n].ty;
        if from == to {
            return Ok(n);
        }
        match to {
            ValueKind::Long => self.new_unary(ValueKind::Long, OpCode::CastLong, n, at),
            ValueKind::Double => self.new_unary(ValueKind::Double, OpCode::CastDouble, n, at),
            _ => Err(ParseError::types(
                format!("cannot convert {} to {}", from, to),
                at,
            )),
        }
    }

    /// Promote two numeric-lattice operands to a common kind, at least
    /// `floor` (arithmetic uses `Long` so booleans never add as booleans).
    pub fn promote(
        &mut self,
        a: NodeId,
        b: NodeId,
        floor: Option<ValueKind>,
        at: usize,
    ) -> Result<(NodeId, NodeId, ValueKind), ParseError> {
        let (ka, kb) = (self.nodes[a].ty, self.nodes[b].ty);
        let (ra, rb) = match (ka.rank(), kb.rank()) {
            (Some(ra), Some(rb)) => (ra, rb),
            _ => {
                return Err(ParseError::types(
                    format!("operand kinds {} and {} do not mix", ka, kb),
                    at,
                ))
            }
        };
        let mut rank = ra.max(rb);
        if let Some(floor) = floor {
            rank = rank.max(floor.rank().expect("floor is a lattice kind"));
        }
        let common = match rank {
            0 => ValueKind::Bool,
            1 => ValueKind::Long,
            _ => ValueKind::Double,
        };
        let a = self.coerce(a, common, at)?;
        let b = self.coerce(b, common, at)?;
        Ok((a, b, common))
    }

    /// Collect the column indices reachable from `root`, deduplicated
    /// and sorted. Folded-away subtrees are not reachable and do not
    /// count as references.
    pub fn columns_used(&self, root: NodeId) -> Vec<usize> {
        let mut used = Vec::new();
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            match &self.nodes[id].kind {
                NodeKind::Const(_) => {}
                NodeKind::Column(c) => {
                    if !used.contains(c) {
                        used.push(*c);
                    }
                }
                NodeKind::Op { args, .. } => stack.extend(args.iter().copied()),
            }
        }
        used.sort_unstable();
        used
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn long(b: &mut TreeBuilder, v: i64) -> NodeId {
        b.const_node(Scalar::Long(v))
    }

    #[test]
    fn binop_on_constants_folds_to_one_node() {
        let mut b = TreeBuilder::new();
        let x = long(&mut b, 4);
        let y = long(&mut b, 2);
        let id = b.new_bin_op(ValueKind::Long, x, OpCode::Mul, y, 0).unwrap();
        assert_eq!(id, x);
        assert_eq!(b.node(id).constant(), Some(&Scalar::Long(8)));
    }

    #[test]
    fn cast_folds_in_place() {
        let mut b = TreeBuilder::new();
        let x = long(&mut b, 3);
        let id = b.new_unary(ValueKind::Double, OpCode::CastDouble, x, 0).unwrap();
        assert_eq!(id, x);
        assert_eq!(b.node(id).constant(), Some(&Scalar::Double(3.0)));
    }

    #[test]
    fn noop_cast_returns_child() {
        let mut b = TreeBuilder::new();
        let x = b.const_node(Scalar::Double(1.5));
        let id = b.new_unary(ValueKind::Double, OpCode::CastDouble, x, 0).unwrap();
        assert_eq!(id, x);
        assert_eq!(b.nodes.len(), 1);
    }

    #[test]
    fn promotion_raises_the_lower_operand() {
        let mut b = TreeBuilder::new();
        let x = long(&mut b, 3);
        let y = b.const_node(Scalar::Double(0.5));
        let (x2, _y2, common) = b.promote(x, y, None, 0).unwrap();
        assert_eq!(common, ValueKind::Double);
        assert_eq!(b.node(x2).constant(), Some(&Scalar::Double(3.0)));
    }

    #[test]
    fn arithmetic_floor_promotes_booleans_to_long() {
        let mut b = TreeBuilder::new();
        let x = b.const_node(Scalar::Bool(true));
        let y = b.const_node(Scalar::Bool(false));
        let (_, _, common) = b.promote(x, y, Some(ValueKind::Long), 0).unwrap();
        assert_eq!(common, ValueKind::Long);
    }

    #[test]
    fn mismatched_vector_shapes_are_rejected() {
        let mut b = TreeBuilder::new();
        let a = b.column_node(0, &ColInfo::vector(ValueKind::Long, &[4]));
        let c = b.column_node(1, &ColInfo::vector(ValueKind::Long, &[3]));
        let err = b.new_bin_op(ValueKind::Long, a, OpCode::Add, c, 7).unwrap_err();
        assert_eq!(err.kind, ParseErrorKind::ShapeMismatch);
        assert_eq!(err.offset, 7);
    }

    #[test]
    fn scalar_broadcasts_against_vector() {
        let mut b = TreeBuilder::new();
        let a = b.column_node(0, &ColInfo::vector(ValueKind::Long, &[4]));
        let s = long(&mut b, 10);
        let id = b.new_bin_op(ValueKind::Long, a, OpCode::Add, s, 0).unwrap();
        assert_eq!(b.node(id).shape.nelem, 4);
    }

    #[test]
    fn deref_full_and_partial_shapes() {
        let mut b = TreeBuilder::new();
        let v = b.column_node(0, &ColInfo::vector(ValueKind::Double, &[4, 3]));
        let i = long(&mut b, 2);
        let j = long(&mut b, 1);
        let full = b.new_deref(v, &[i, j], 0).unwrap();
        assert!(b.node(full).shape.is_scalar());

        let v2 = b.column_node(0, &ColInfo::vector(ValueKind::Double, &[4, 3]));
        let k = long(&mut b, 2);
        let part = b.new_deref(v2, &[k], 0).unwrap();
        assert_eq!(b.node(part).shape.naxis, 1);
        assert_eq!(b.node(part).shape.nelem, 4);
    }

    #[test]
    fn deref_rejects_scalars_and_bad_index_counts() {
        let mut b = TreeBuilder::new();
        let s = long(&mut b, 5);
        let i = long(&mut b, 1);
        assert!(b.new_deref(s, &[i], 0).is_err());

        let v = b.column_node(0, &ColInfo::vector(ValueKind::Long, &[4, 3]));
        let i1 = long(&mut b, 1);
        let i2 = long(&mut b, 1);
        let i3 = long(&mut b, 1);
        assert!(b.new_deref(v, &[i1, i2, i3], 0).is_err());
    }

    #[test]
    fn folding_a_divide_by_zero_is_a_parse_error() {
        let mut b = TreeBuilder::new();
        let x = long(&mut b, 1);
        let y = long(&mut b, 0);
        let err = b.new_bin_op(ValueKind::Long, x, OpCode::Div, y, 3).unwrap_err();
        assert_eq!(err.kind, ParseErrorKind::Syntax);
        assert!(err.message.contains("zero"));
    }

    #[test]
    fn columns_used_skips_folded_subtrees() {
        let mut b = TreeBuilder::new();
        let c = b.column_node(2, &ColInfo::scalar(ValueKind::Long));
        let x = long(&mut b, 1);
        let y = long(&mut b, 2);
        let sum = b.new_bin_op(ValueKind::Long, x, OpCode::Add, y, 0).unwrap();
        let root = b.new_bin_op(ValueKind::Long, c, OpCode::Add, sum, 0).unwrap();
        assert_eq!(b.columns_used(root), vec![2]);
    }
}
