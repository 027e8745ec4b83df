// parse.rs - Precedence-climbing parser over the token stream.
//
// The parser resolves identifiers against the host catalog, drives the
// tree builder (which owns promotion, shape checks and constant
// folding), and fixes the arity and argument kinds of the built-in
// function set. Precedence, loosest to tightest:
//
//   = :  ||  &&  == != ~  < <= > >=  + - %  * /  | &  ** (right)
//   then prefix !, casts, unary -, and subscripts.

use crate::defs::{ColumnCatalog, Scalar, ValueKind};
use crate::error::{ParseError, ParseErrorKind};
use crate::lex::{Lexer, Spanned, Tok};
use crate::node::{NodeId, OpCode, TreeBuilder};

/// Parse `text` into a node arena and the root node index.
pub(crate) fn parse(
    text: &str,
    catalog: &dyn ColumnCatalog,
) -> Result<(TreeBuilder, NodeId), ParseError> {
    let toks = Lexer::new(text).run()?;
    let mut p = Parser {
        toks,
        pos: 0,
        b: TreeBuilder::new(),
        catalog,
        end: text.len(),
    };
    let root = p.parse_expr(0)?;
    if let Some(t) = p.peek() {
        return Err(ParseError::syntax("unexpected trailing token", t.at));
    }
    Ok((p.b, root))
}

// prefix binding powers
const BP_NOT: u8 = 17;
const BP_CAST: u8 = 19;
const BP_NEG: u8 = 21;

struct Parser<'a> {
    toks: Vec<Spanned>,
    pos: usize,
    b: TreeBuilder,
    catalog: &'a dyn ColumnCatalog,
    end: usize,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<&Spanned> {
        self.toks.get(self.pos)
    }

    fn peek_tok(&self) -> Option<&Tok> {
        self.peek().map(|s| &s.tok)
    }

    /// Offset of the current token, or end of input.
    fn at(&self) -> usize {
        self.peek().map(|s| s.at).unwrap_or(self.end)
    }

    fn advance(&mut self) -> Option<Spanned> {
        let t = self.toks.get(self.pos).cloned();
        if t.is_some() {
            self.pos += 1;
        }
        t
    }

    fn expect(&mut self, tok: Tok, what: &str) -> Result<(), ParseError> {
        match self.peek_tok() {
            Some(t) if *t == tok => {
                self.pos += 1;
                Ok(())
            }
            _ => Err(ParseError::syntax(format!("missing {}", what), self.at())),
        }
    }

    /// Left / right binding power of an infix operator token.
    fn infix_bp(tok: &Tok) -> Option<(u8, u8)> {
        let bp = match tok {
            Tok::OrOr => (1, 2),
            Tok::AndAnd => (3, 4),
            Tok::Eq | Tok::EqEq | Tok::Ne | Tok::Tilde => (5, 6),
            Tok::Lt | Tok::Le | Tok::Gt | Tok::Ge => (7, 8),
            Tok::Plus | Tok::Minus | Tok::Percent => (9, 10),
            Tok::Star | Tok::Slash => (11, 12),
            Tok::Pipe | Tok::Amp => (13, 14),
            Tok::Pow => (16, 15),
            _ => return None,
        };
        Some(bp)
    }

    fn parse_expr(&mut self, min_bp: u8) -> Result<NodeId, ParseError> {
        let mut lhs = self.parse_prefix()?;
        loop {
            let (tok, at) = match self.peek() {
                Some(s) => (s.tok.clone(), s.at),
                None => break,
            };
            let (lbp, rbp) = match Self::infix_bp(&tok) {
                Some(bp) => bp,
                None => break,
            };
            if lbp < min_bp {
                break;
            }
            self.pos += 1;
            let rhs = self.parse_expr(rbp)?;
            // range shorthand: `e = lo : hi` means lo <= e <= hi
            if matches!(tok, Tok::Eq | Tok::EqEq) && self.peek_tok() == Some(&Tok::Colon) {
                self.pos += 1;
                let hi = self.parse_expr(rbp)?;
                lhs = self.build_range(lhs, rhs, hi, at)?;
            } else {
                lhs = self.build_binary(&tok, lhs, rhs, at)?;
            }
        }
        Ok(lhs)
    }

    fn parse_prefix(&mut self) -> Result<NodeId, ParseError> {
        let spanned = self
            .advance()
            .ok_or_else(|| ParseError::syntax("unexpected end of expression", self.end))?;
        let at = spanned.at;
        let node = match spanned.tok {
            Tok::Long(v) => self.b.const_node(Scalar::Long(v)),
            Tok::Double(v) => self.b.const_node(Scalar::Double(v)),
            Tok::Bool(v) => self.b.const_node(Scalar::Bool(v)),
            Tok::Str(s) => self.b.const_node(Scalar::Str(s)),
            Tok::Bits(s) => self.b.const_node(Scalar::Bits(s)),
            Tok::Ident(name) => self.column_by_name(&name, at)?,
            Tok::ColNum(n) => self.column_by_number(n, at)?,
            Tok::RowRef => self.b.new_func(Some(ValueKind::Long), OpCode::RowNum, &[], at)?,
            Tok::Func(name) => {
                let args = self.parse_args()?;
                self.build_func(&name, &args, at)?
            }
            Tok::LParen => {
                let inner = self.parse_expr(0)?;
                self.expect(Tok::RParen, "')'")?;
                inner
            }
            Tok::Minus => {
                let child = self.parse_expr(BP_NEG)?;
                let child = match self.b.node(child).ty {
                    ValueKind::Bool => self.b.coerce(child, ValueKind::Long, at)?,
                    ValueKind::Long | ValueKind::Double => child,
                    other => {
                        return Err(ParseError::types(
                            format!("cannot negate a {} value", other),
                            at,
                        ))
                    }
                };
                let out = self.b.node(child).ty;
                self.b.new_unary(out, OpCode::Neg, child, at)?
            }
            Tok::Not => {
                let child = self.parse_expr(BP_NOT)?;
                if self.b.node(child).ty != ValueKind::Bool {
                    return Err(ParseError::types("'!' needs a boolean operand", at));
                }
                self.b.new_unary(ValueKind::Bool, OpCode::Not, child, at)?
            }
            Tok::Tilde => {
                let child = self.parse_expr(BP_NOT)?;
                if self.b.node(child).ty != ValueKind::Bits {
                    return Err(ParseError::types("prefix '~' needs a bit-string operand", at));
                }
                self.b.new_unary(ValueKind::Bits, OpCode::BitNot, child, at)?
            }
            Tok::CastInt => {
                let child = self.parse_expr(BP_CAST)?;
                self.numeric_cast(child, ValueKind::Long, at)?
            }
            Tok::CastDouble => {
                let child = self.parse_expr(BP_CAST)?;
                self.numeric_cast(child, ValueKind::Double, at)?
            }
            other => {
                return Err(ParseError::syntax(
                    format!("unexpected token {:?}", other),
                    at,
                ))
            }
        };
        self.parse_subscripts(node)
    }

    fn numeric_cast(
        &mut self,
        child: NodeId,
        to: ValueKind,
        at: usize,
    ) -> Result<NodeId, ParseError> {
        match self.b.node(child).ty {
            ValueKind::Bool | ValueKind::Long | ValueKind::Double => self.b.coerce(child, to, at),
            other => Err(ParseError::types(
                format!("cannot cast a {} value to {}", other, to),
                at,
            )),
        }
    }

    /// Trailing `[i]`, `[i,j]` or chained `[i][j]` subscripts.
    fn parse_subscripts(&mut self, mut node: NodeId) -> Result<NodeId, ParseError> {
        while self.peek_tok() == Some(&Tok::LBracket) {
            let at = self.at();
            self.pos += 1;
            let mut idxs = vec![self.parse_expr(0)?];
            while self.peek_tok() == Some(&Tok::Comma) {
                self.pos += 1;
                idxs.push(self.parse_expr(0)?);
            }
            self.expect(Tok::RBracket, "']'")?;
            node = self.b.new_deref(node, &idxs, at)?;
        }
        Ok(node)
    }

    fn column_by_name(&mut self, name: &str, at: usize) -> Result<NodeId, ParseError> {
        let idx = self.catalog.resolve(name).ok_or_else(|| {
            ParseError::new(
                ParseErrorKind::UnknownColumn,
                format!("column '{}' not found", name),
                at,
            )
        })?;
        let info = self.catalog.info(idx).cloned().ok_or_else(|| {
            ParseError::new(
                ParseErrorKind::UnknownColumn,
                format!("no metadata for column '{}'", name),
                at,
            )
        })?;
        Ok(self.b.column_node(idx, &info))
    }

    fn column_by_number(&mut self, n: usize, at: usize) -> Result<NodeId, ParseError> {
        if n == 0 || n > self.catalog.ncols() {
            return Err(ParseError::new(
                ParseErrorKind::UnknownColumn,
                format!("column #{} out of range", n),
                at,
            ));
        }
        let idx = n - 1;
        let info = self.catalog.info(idx).cloned().ok_or_else(|| {
            ParseError::new(
                ParseErrorKind::UnknownColumn,
                format!("no metadata for column #{}", n),
                at,
            )
        })?;
        Ok(self.b.column_node(idx, &info))
    }

    fn parse_args(&mut self) -> Result<Vec<NodeId>, ParseError> {
        let mut args = Vec::new();
        if self.peek_tok() == Some(&Tok::RParen) {
            self.pos += 1;
            return Ok(args);
        }
        loop {
            args.push(self.parse_expr(0)?);
            match self.peek_tok() {
                Some(Tok::Comma) => {
                    self.pos += 1;
                }
                Some(Tok::RParen) => {
                    self.pos += 1;
                    return Ok(args);
                }
                _ => return Err(ParseError::syntax("missing ')'", self.at())),
            }
        }
    }

    // === binary dispatch ===

    fn build_binary(
        &mut self,
        tok: &Tok,
        a: NodeId,
        b: NodeId,
        at: usize,
    ) -> Result<NodeId, ParseError> {
        let (ka, kb) = (self.b.node(a).ty, self.b.node(b).ty);
        match tok {
            Tok::Plus => match (ka, kb) {
                (ValueKind::Str, ValueKind::Str) => {
                    self.b.new_bin_op(ValueKind::Str, a, OpCode::Add, b, at)
                }
                (ValueKind::Bits, ValueKind::Bits) => {
                    self.b.new_bin_op(ValueKind::Bits, a, OpCode::Add, b, at)
                }
                _ => self.arith(OpCode::Add, a, b, at),
            },
            Tok::Minus => self.arith(OpCode::Sub, a, b, at),
            Tok::Star => self.arith(OpCode::Mul, a, b, at),
            Tok::Slash => self.arith(OpCode::Div, a, b, at),
            Tok::Percent => self.arith(OpCode::Mod, a, b, at),
            Tok::Pow => self.arith(OpCode::Pow, a, b, at),

            Tok::Amp | Tok::Pipe => {
                let wants_and = matches!(tok, Tok::Amp);
                match (ka, kb) {
                    (ValueKind::Bool, ValueKind::Bool) => {
                        let op = if wants_and { OpCode::And } else { OpCode::Or };
                        self.b.new_bin_op(ValueKind::Bool, a, op, b, at)
                    }
                    (ValueKind::Bits, ValueKind::Bits) => {
                        let op = if wants_and { OpCode::BitAnd } else { OpCode::BitOr };
                        self.b.new_bin_op(ValueKind::Bits, a, op, b, at)
                    }
                    _ => {
                        let (a, b, common) =
                            self.b.promote(a, b, Some(ValueKind::Long), at)?;
                        if common == ValueKind::Double {
                            return Err(ParseError::types(
                                "bitwise '&'/'|' needs integer operands",
                                at,
                            ));
                        }
                        let op = if wants_and { OpCode::BitAnd } else { OpCode::BitOr };
                        self.b.new_bin_op(ValueKind::Long, a, op, b, at)
                    }
                }
            }

            Tok::AndAnd | Tok::OrOr => {
                if ka != ValueKind::Bool || kb != ValueKind::Bool {
                    return Err(ParseError::types(
                        "logical '&&'/'||' need boolean operands",
                        at,
                    ));
                }
                let op = if matches!(tok, Tok::AndAnd) {
                    OpCode::And
                } else {
                    OpCode::Or
                };
                self.b.new_bin_op(ValueKind::Bool, a, op, b, at)
            }

            Tok::Eq | Tok::EqEq | Tok::Ne => {
                let op = if matches!(tok, Tok::Ne) {
                    OpCode::Ne
                } else {
                    OpCode::Eq
                };
                self.compare(op, a, b, at)
            }
            Tok::Lt => self.compare(OpCode::Lt, a, b, at),
            Tok::Le => self.compare(OpCode::Le, a, b, at),
            Tok::Gt => self.compare(OpCode::Gt, a, b, at),
            Tok::Ge => self.compare(OpCode::Ge, a, b, at),

            Tok::Tilde => {
                let (a, b, _) = self.promote_double(a, b, at)?;
                self.b.new_bin_op(ValueKind::Bool, a, OpCode::Approx, b, at)
            }

            other => Err(ParseError::syntax(
                format!("token {:?} is not a binary operator", other),
                at,
            )),
        }
    }

    fn arith(
        &mut self,
        op: OpCode,
        a: NodeId,
        b: NodeId,
        at: usize,
    ) -> Result<NodeId, ParseError> {
        let (a, b, common) = self.b.promote(a, b, Some(ValueKind::Long), at)?;
        self.b.new_bin_op(common, a, op, b, at)
    }

    fn compare(
        &mut self,
        op: OpCode,
        a: NodeId,
        b: NodeId,
        at: usize,
    ) -> Result<NodeId, ParseError> {
        let (ka, kb) = (self.b.node(a).ty, self.b.node(b).ty);
        match (ka, kb) {
            (ValueKind::Str, ValueKind::Str) | (ValueKind::Bits, ValueKind::Bits) => {
                self.b.new_bin_op(ValueKind::Bool, a, op, b, at)
            }
            (ValueKind::Bool, ValueKind::Bool) => {
                if matches!(op, OpCode::Eq | OpCode::Ne) {
                    self.b.new_bin_op(ValueKind::Bool, a, op, b, at)
                } else {
                    Err(ParseError::types(
                        "ordering comparisons need numeric operands",
                        at,
                    ))
                }
            }
            _ => {
                let (a, b, _) = self.b.promote(a, b, Some(ValueKind::Long), at)?;
                self.b.new_bin_op(ValueKind::Bool, a, op, b, at)
            }
        }
    }

    fn promote_double(
        &mut self,
        a: NodeId,
        b: NodeId,
        at: usize,
    ) -> Result<(NodeId, NodeId, ValueKind), ParseError> {
        self.b.promote(a, b, Some(ValueKind::Double), at)
    }

    /// `e = lo : hi` becomes `(lo <= e) && (e <= hi)`; the subject node
    /// is shared by both comparisons through the arena.
    fn build_range(
        &mut self,
        e: NodeId,
        lo: NodeId,
        hi: NodeId,
        at: usize,
    ) -> Result<NodeId, ParseError> {
        let left = self.compare(OpCode::Le, lo, e, at)?;
        let right = self.compare(OpCode::Le, e, hi, at)?;
        self.b.new_bin_op(ValueKind::Bool, left, OpCode::And, right, at)
    }

    // === function dispatch ===

    fn arity(
        &self,
        name: &str,
        args: &[NodeId],
        want: usize,
        at: usize,
    ) -> Result<(), ParseError> {
        if args.len() != want {
            return Err(ParseError::new(
                ParseErrorKind::WrongArity,
                format!(
                    "{} takes {} argument(s), found {}",
                    name,
                    want,
                    args.len()
                ),
                at,
            ));
        }
        Ok(())
    }

    fn double_args(&mut self, args: &[NodeId], at: usize) -> Result<Vec<NodeId>, ParseError> {
        args.iter()
            .map(|&a| self.b.coerce(a, ValueKind::Double, at))
            .collect()
    }

    fn require_scalars(&self, args: &[NodeId], name: &str, at: usize) -> Result<(), ParseError> {
        for &a in args {
            if !self.b.node(a).shape.is_scalar() {
                return Err(ParseError::new(
                    ParseErrorKind::ShapeMismatch,
                    format!("{} arguments must be scalars", name),
                    at,
                ));
            }
        }
        Ok(())
    }

    fn build_func(
        &mut self,
        raw_name: &str,
        args: &[NodeId],
        at: usize,
    ) -> Result<NodeId, ParseError> {
        let name = raw_name.to_ascii_uppercase();
        match name.as_str() {
            "SUM" => {
                self.arity(&name, args, 1, at)?;
                let out = match self.b.node(args[0]).ty {
                    ValueKind::Bool | ValueKind::Long | ValueKind::Bits => ValueKind::Long,
                    ValueKind::Double => ValueKind::Double,
                    ValueKind::Str => {
                        return Err(ParseError::types("SUM does not apply to strings", at))
                    }
                };
                self.b.new_func(Some(out), OpCode::Sum, args, at)
            }
            "NELEM" => {
                self.arity(&name, args, 1, at)?;
                let node = self.b.node(args[0]);
                if node.ty == ValueKind::Str {
                    return Err(ParseError::types("NELEM does not apply to strings", at));
                }
                let n = node.shape.nelem as i64;
                Ok(self.b.const_node(Scalar::Long(n)))
            }
            "ABS" => {
                self.arity(&name, args, 1, at)?;
                let arg = match self.b.node(args[0]).ty {
                    ValueKind::Bool => self.b.coerce(args[0], ValueKind::Long, at)?,
                    ValueKind::Long | ValueKind::Double => args[0],
                    other => {
                        return Err(ParseError::types(
                            format!("ABS does not apply to {} values", other),
                            at,
                        ))
                    }
                };
                self.b.new_func(None, OpCode::Abs, &[arg], at)
            }
            "SIN" | "COS" | "TAN" | "ARCSIN" | "ARCCOS" | "ARCTAN" | "EXP" | "LOG"
            | "LOG10" | "SQRT" => {
                self.arity(&name, args, 1, at)?;
                let op = match name.as_str() {
                    "SIN" => OpCode::Sin,
                    "COS" => OpCode::Cos,
                    "TAN" => OpCode::Tan,
                    "ARCSIN" => OpCode::Asin,
                    "ARCCOS" => OpCode::Acos,
                    "ARCTAN" => OpCode::Atan,
                    "EXP" => OpCode::Exp,
                    "LOG" => OpCode::Log,
                    "LOG10" => OpCode::Log10,
                    _ => OpCode::Sqrt,
                };
                let arg = self.b.coerce(args[0], ValueKind::Double, at)?;
                self.b.new_func(None, op, &[arg], at)
            }
            "ARCTAN2" => {
                self.arity(&name, args, 2, at)?;
                let args = self.double_args(args, at)?;
                if !self.b.test_dims(args[0], args[1]) {
                    return Err(ParseError::new(
                        ParseErrorKind::ShapeMismatch,
                        "ARCTAN2 arguments must have identical dimensions",
                        at,
                    ));
                }
                self.b.new_func(Some(ValueKind::Double), OpCode::Atan2, &args, at)
            }
            "RANDOM" => {
                self.arity(&name, args, 0, at)?;
                self.b.new_func(Some(ValueKind::Double), OpCode::Random, args, at)
            }
            "ISNULL" => {
                self.arity(&name, args, 1, at)?;
                if self.b.node(args[0]).ty == ValueKind::Bits {
                    return Err(ParseError::types(
                        "ISNULL does not apply to bit strings",
                        at,
                    ));
                }
                self.b.new_func(Some(ValueKind::Bool), OpCode::IsNull, args, at)
            }
            "DEFNULL" => {
                self.arity(&name, args, 2, at)?;
                let (ka, kb) = (self.b.node(args[0]).ty, self.b.node(args[1]).ty);
                let (a, b, out) = match (ka, kb) {
                    (ValueKind::Str, ValueKind::Str) => (args[0], args[1], ValueKind::Str),
                    (ValueKind::Bits, _) | (_, ValueKind::Bits) => {
                        return Err(ParseError::types(
                            "DEFNULL does not apply to bit strings",
                            at,
                        ))
                    }
                    _ => {
                        let (a, b, common) = self.b.promote(args[0], args[1], None, at)?;
                        (a, b, common)
                    }
                };
                if !self.b.test_dims(a, b) {
                    return Err(ParseError::new(
                        ParseErrorKind::ShapeMismatch,
                        "DEFNULL arguments must have identical dimensions",
                        at,
                    ));
                }
                self.b.new_func(Some(out), OpCode::DefNull, &[a, b], at)
            }
            "NEAR" | "CIRCLE" | "BOX" | "ELLIPSE" => {
                let (want, op) = match name.as_str() {
                    "NEAR" => (3, OpCode::Near),
                    "CIRCLE" => (5, OpCode::Circle),
                    "BOX" => (7, OpCode::Box),
                    _ => (7, OpCode::Ellipse),
                };
                self.arity(&name, args, want, at)?;
                self.require_scalars(args, &name, at)?;
                let args = self.double_args(args, at)?;
                self.b.new_func(Some(ValueKind::Bool), op, &args, at)
            }
            _ => Err(ParseError::new(
                ParseErrorKind::UnknownFunction,
                format!("Function({}) not supported", raw_name),
                at,
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::defs::{ColInfo, Shape, TableSchema};
    use crate::node::NodeKind;

    fn schema() -> TableSchema {
        TableSchema::new()
            .with("X", ColInfo::scalar(ValueKind::Long))
            .with("Y", ColInfo::scalar(ValueKind::Double))
            .with("FLAG", ColInfo::scalar(ValueKind::Bool))
            .with("NAME", ColInfo::scalar(ValueKind::Str))
            .with("V", ColInfo::vector(ValueKind::Long, &[4]))
            .with("GRID", ColInfo::vector(ValueKind::Double, &[4, 3]))
            .with("MASK", ColInfo::vector(ValueKind::Bits, &[8]))
    }

    fn parse_ok(text: &str) -> (TreeBuilder, NodeId) {
        parse(text, &schema()).unwrap()
    }

    fn parse_err(text: &str) -> ParseError {
        parse(text, &schema()).unwrap_err()
    }

    #[test]
    fn literal_arithmetic_folds_to_a_single_constant() {
        let (b, root) = parse_ok("3 + 4 * 2");
        assert_eq!(b.node(root).constant(), Some(&Scalar::Long(11)));
    }

    #[test]
    fn precedence_of_power_is_right_associative() {
        let (b, root) = parse_ok("2 ** 3 ** 2");
        assert_eq!(b.node(root).constant(), Some(&Scalar::Long(512)));
    }

    #[test]
    fn caret_is_power() {
        let (b, root) = parse_ok("2 ^ 10");
        assert_eq!(b.node(root).constant(), Some(&Scalar::Long(1024)));
    }

    #[test]
    fn unary_minus_binds_tighter_than_power() {
        let (b, root) = parse_ok("-2 ** 2");
        assert_eq!(b.node(root).constant(), Some(&Scalar::Long(4)));
    }

    #[test]
    fn percent_sits_at_additive_level() {
        // ((3 + 4) % 2), unlike C
        let (b, root) = parse_ok("3 + 4 % 2");
        assert_eq!(b.node(root).constant(), Some(&Scalar::Long(1)));
    }

    #[test]
    fn mixed_arithmetic_promotes_to_double() {
        let (b, root) = parse_ok("1 + 0.5");
        assert_eq!(b.node(root).constant(), Some(&Scalar::Double(1.5)));
    }

    #[test]
    fn column_resolution_is_case_insensitive() {
        let (b, root) = parse_ok("x + 1");
        assert_eq!(b.node(root).ty, ValueKind::Long);
        assert_eq!(b.columns_used(root), vec![0]);
    }

    #[test]
    fn column_by_number_and_row_ref() {
        let (b, root) = parse_ok("#2 + #ROW");
        assert_eq!(b.node(root).ty, ValueKind::Double);
        assert_eq!(b.columns_used(root), vec![1]);
    }

    #[test]
    fn unknown_column_and_function() {
        assert_eq!(parse_err("nosuch + 1").kind, ParseErrorKind::UnknownColumn);
        let err = parse_err("median(X)");
        assert_eq!(err.kind, ParseErrorKind::UnknownFunction);
        assert!(err.message.contains("Function(median) not supported"));
    }

    #[test]
    fn wrong_arity_is_reported() {
        assert_eq!(parse_err("sqrt(X, Y)").kind, ParseErrorKind::WrongArity);
        assert_eq!(parse_err("circle(1,2,3)").kind, ParseErrorKind::WrongArity);
    }

    #[test]
    fn geometry_rejects_array_arguments() {
        let err = parse_err("circle(0, 0, 1, V, Y)");
        assert_eq!(err.kind, ParseErrorKind::ShapeMismatch);
    }

    #[test]
    fn range_desugars_to_two_comparisons() {
        let (b, root) = parse_ok("X = 2 : 5");
        assert_eq!(b.node(root).ty, ValueKind::Bool);
        match &b.node(root).kind {
            NodeKind::Op { op, args } => {
                assert_eq!(*op, OpCode::And);
                assert_eq!(args.len(), 2);
            }
            other => panic!("expected an AND node, got {:?}", other),
        }
    }

    #[test]
    fn nelem_folds_to_a_constant() {
        let (b, root) = parse_ok("NELEM(V)");
        assert_eq!(b.node(root).constant(), Some(&Scalar::Long(4)));
        // the folded argument no longer counts as a reference
        assert!(b.columns_used(root).is_empty());
    }

    #[test]
    fn subscript_shapes() {
        let (b, root) = parse_ok("V[2]");
        assert!(b.node(root).shape.is_scalar());
        let (b, root) = parse_ok("GRID[2, 3]");
        assert!(b.node(root).shape.is_scalar());
        let (b, root) = parse_ok("GRID[2]");
        assert_eq!(b.node(root).shape, Shape::vector(&[4]));
        let (b, root) = parse_ok("GRID[2][3]");
        assert!(b.node(root).shape.is_scalar());
    }

    #[test]
    fn vector_comparison_keeps_the_vector_shape() {
        let (b, root) = parse_ok("V > 2");
        assert_eq!(b.node(root).ty, ValueKind::Bool);
        assert_eq!(b.node(root).shape.nelem, 4);
    }

    #[test]
    fn shape_mismatch_between_vectors() {
        let err = parse_err("V + GRID");
        assert_eq!(err.kind, ParseErrorKind::ShapeMismatch);
    }

    #[test]
    fn logical_ops_need_booleans() {
        assert_eq!(parse_err("X && FLAG").kind, ParseErrorKind::TypeMismatch);
        let (b, root) = parse_ok("FLAG & (X > 1)");
        assert_eq!(b.node(root).ty, ValueKind::Bool);
    }

    #[test]
    fn amp_on_integers_is_bitwise() {
        let (b, root) = parse_ok("6 & 3");
        assert_eq!(b.node(root).constant(), Some(&Scalar::Long(2)));
        assert_eq!(parse_err("1.5 & 2").kind, ParseErrorKind::TypeMismatch);
    }

    #[test]
    fn bit_literal_ops_fold() {
        let (b, root) = parse_ok("b'1100' & b'1010'");
        assert_eq!(b.node(root).constant(), Some(&Scalar::Bits("1000".into())));
        let (b, root) = parse_ok("b'11x0' | b'0100'");
        assert_eq!(b.node(root).constant(), Some(&Scalar::Bits("11x0".into())));
    }

    #[test]
    fn string_concat_and_compare() {
        let (b, root) = parse_ok("'ab' + 'cd'");
        assert_eq!(b.node(root).constant(), Some(&Scalar::Str("abcd".into())));
        let (b, root) = parse_ok("NAME == 'x'");
        assert_eq!(b.node(root).ty, ValueKind::Bool);
    }

    #[test]
    fn approx_operator_promotes_to_double() {
        let (b, root) = parse_ok("Y ~ 1");
        assert_eq!(b.node(root).ty, ValueKind::Bool);
        let (b, root) = parse_ok("1.0 ~ 1.00000000001");
        assert_eq!(b.node(root).constant(), Some(&Scalar::Bool(true)));
    }

    #[test]
    fn missing_paren_reports_offset() {
        let err = parse_err("(1 + 2");
        assert_eq!(err.kind, ParseErrorKind::Syntax);
        assert!(err.message.contains("')'"));
        assert_eq!(err.offset, 6);
    }

    #[test]
    fn trailing_tokens_are_rejected() {
        let err = parse_err("1 + 2 3");
        assert!(err.message.contains("trailing"));
    }

    #[test]
    fn isnull_keeps_argument_shape() {
        let (b, root) = parse_ok("ISNULL(V)");
        assert_eq!(b.node(root).ty, ValueKind::Bool);
        assert_eq!(b.node(root).shape.nelem, 4);
    }

    #[test]
    fn defnull_promotes_and_checks_shape() {
        let (b, root) = parse_ok("DEFNULL(X, -1.5)");
        assert_eq!(b.node(root).ty, ValueKind::Double);
        let err = parse_err("DEFNULL(V, GRID)");
        assert_eq!(err.kind, ParseErrorKind::ShapeMismatch);
    }
}
