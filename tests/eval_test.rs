// eval_test.rs - Evaluation semantics: arithmetic, broadcasting,
// vectors, subscripts, row numbers and region predicates.

use fitsel::prelude::*;
use rand::rngs::StdRng;
use rand::SeedableRng;

fn schema() -> TableSchema {
    TableSchema::new()
        .with("X", ColInfo::scalar(ValueKind::Long))
        .with("Y", ColInfo::scalar(ValueKind::Double))
        .with("V", ColInfo::vector(ValueKind::Long, &[4]))
        .with("GRID", ColInfo::vector(ValueKind::Double, &[4, 3]))
        .with("PX", ColInfo::scalar(ValueKind::Double))
        .with("PY", ColInfo::scalar(ValueKind::Double))
}

fn eval_one(text: &str, batch: &RowBatch<'_>) -> RowVec {
    let schema = schema();
    let expr = RowExpr::parse(text, &schema).unwrap();
    let mut bound = expr.bind(batch).unwrap();
    bound.evaluate().unwrap().clone()
}

// === scalar arithmetic ===

#[test]
fn constant_expression_broadcasts_over_rows() {
    let batch = RowBatch::new(1, 1);
    assert_eq!(eval_one("3 + 4 * 2", &batch).as_long().unwrap(), &[11]);

    let batch = RowBatch::new(1, 3);
    assert_eq!(eval_one("3 + 4 * 2", &batch).as_long().unwrap(), &[11, 11, 11]);
}

#[test]
fn integer_division_truncates() {
    let x = [0i64, 7, -7, 9];
    let batch = RowBatch::new(1, 3).col(0, ColData::Long(&x));
    assert_eq!(eval_one("X / 2", &batch).as_long().unwrap(), &[3, -3, 4]);
    assert_eq!(eval_one("X % 4", &batch).as_long().unwrap(), &[3, -3, 1]);
}

#[test]
fn double_modulus_is_truncated_remainder() {
    let y = [0.0f64, 7.5, -7.5];
    let batch = RowBatch::new(1, 2).col(1, ColData::Double(&y));
    assert_eq!(eval_one("Y % 2.0", &batch).as_double().unwrap(), &[1.5, -1.5]);
}

#[test]
fn power_promotes_through_doubles() {
    let x = [0i64, 3];
    let batch = RowBatch::new(1, 1).col(0, ColData::Long(&x));
    assert_eq!(eval_one("X ** 2", &batch).as_long().unwrap(), &[9]);
    assert_eq!(eval_one("X ^ 2", &batch).as_long().unwrap(), &[9]);
    let out = eval_one("2 ** Y", &RowBatch::new(1, 1).col(1, ColData::Double(&[0.0, 0.5])));
    assert!((out.as_double().unwrap()[0] - 2f64.sqrt()).abs() < 1e-12);
}

// === filtering ===

#[test]
fn relational_and_logical_filter() {
    let x = [0i64, 1, 2, 3, 4];
    let y = [0.0f64, 10.0, 4.0, 3.0, 6.0];
    let batch = RowBatch::new(1, 4)
        .col(0, ColData::Long(&x))
        .col(1, ColData::Double(&y));
    let out = eval_one("X > 2 && Y < 5", &batch);
    assert_eq!(out.as_bool().unwrap(), &[false, false, true, false]);
}

#[test]
fn range_shorthand() {
    let x = [0i64, 1, 2, 3, 5, 6];
    let batch = RowBatch::new(1, 5).col(0, ColData::Long(&x));
    let out = eval_one("X = 2 : 5", &batch);
    assert_eq!(out.as_bool().unwrap(), &[false, true, true, true, false]);
}

#[test]
fn approx_equality_on_doubles() {
    let y = [0.0f64, 1.0, 1.0 + 1e-9, 1.01];
    let batch = RowBatch::new(1, 3).col(1, ColData::Double(&y));
    let out = eval_one("Y ~ 1.0", &batch);
    assert_eq!(out.as_bool().unwrap(), &[true, true, false]);
}

// === broadcasting and vectors ===

#[test]
fn scalar_broadcasts_elementwise_over_a_vector() {
    let v = [0i64, 1, 2, 3, 4];
    let batch = RowBatch::new(1, 1).col(2, ColData::Long(&v));
    assert_eq!(eval_one("V * 10", &batch).as_long().unwrap(), &[10, 20, 30, 40]);
    assert_eq!(
        eval_one("100 - V", &batch).as_long().unwrap(),
        &[99, 98, 97, 96]
    );
}

#[test]
fn per_row_scalar_broadcasts_against_a_vector_column() {
    let v = [0i64, 1, 2, 3, 4, 10, 20, 30, 40];
    let x = [0i64, 1, 2];
    let batch = RowBatch::new(1, 2)
        .col(0, ColData::Long(&x))
        .col(2, ColData::Long(&v));
    let out = eval_one("V + X", &batch);
    assert_eq!(out.as_long().unwrap(), &[2, 3, 4, 5, 12, 22, 32, 42]);
}

#[test]
fn vector_comparison_is_elementwise() {
    let v = [0i64, 1, 5, 2, 8];
    let batch = RowBatch::new(1, 1).col(2, ColData::Long(&v));
    let out = eval_one("V > 3", &batch);
    assert_eq!(out.as_bool().unwrap(), &[false, true, false, true]);
}

// === subscripts ===

#[test]
fn subscript_scalarizes_a_vector() {
    let v = [0i64, 10, 20, 30, 40, 50, 60, 70, 80];
    let batch = RowBatch::new(1, 2).col(2, ColData::Long(&v));
    let out = eval_one("V[2]", &batch);
    assert_eq!(out.as_long().unwrap(), &[20, 60]);
}

#[test]
fn subscript_out_of_range() {
    let schema = schema();
    let v = [0i64, 10, 20, 30, 40];
    let batch = RowBatch::new(1, 1).col(2, ColData::Long(&v));
    let expr = RowExpr::parse("V[5]", &schema).unwrap();
    let mut bound = expr.bind(&batch).unwrap();
    assert_eq!(
        bound.evaluate().unwrap_err().kind,
        EvalErrorKind::IndexOutOfRange
    );
}

#[test]
fn computed_subscript_reads_per_row() {
    let v = [0i64, 10, 20, 30, 40, 50, 60, 70, 80];
    let x = [0i64, 1, 4];
    let batch = RowBatch::new(1, 2)
        .col(0, ColData::Long(&x))
        .col(2, ColData::Long(&v));
    let out = eval_one("V[X]", &batch);
    assert_eq!(out.as_long().unwrap(), &[10, 80]);
}

#[test]
fn multi_axis_subscripts() {
    // 4x3 grid per row, first axis fastest: element (i,j) at (j-1)*4 + i-1
    let mut grid = vec![0.0f64];
    grid.extend((0..12).map(|k| k as f64));
    let batch = RowBatch::new(1, 1).col(3, ColData::Double(&grid));
    let out = eval_one("GRID[2, 3]", &batch);
    assert_eq!(out.as_double().unwrap(), &[9.0]);

    // one index selects a slice along the last axis
    let out = eval_one("GRID[3]", &batch);
    assert_eq!(out.as_double().unwrap(), &[8.0, 9.0, 10.0, 11.0]);

    let out = eval_one("GRID[3][2]", &batch);
    assert_eq!(out.as_double().unwrap(), &[9.0]);
}

// === aggregation and special leaves ===

#[test]
fn sum_over_vector_elements() {
    let v = [0i64, 1, 2, 3, 4, 5, 6, 7, 8];
    let batch = RowBatch::new(1, 2).col(2, ColData::Long(&v));
    let out = eval_one("SUM(V)", &batch);
    assert_eq!(out.as_long().unwrap(), &[10, 26]);
}

#[test]
fn sum_of_booleans_counts_trues() {
    let v = [0i64, 1, 5, 2, 8];
    let batch = RowBatch::new(1, 1).col(2, ColData::Long(&v));
    let out = eval_one("SUM(V > 3)", &batch);
    assert_eq!(out.as_long().unwrap(), &[2]);
}

#[test]
fn row_number_counts_from_first_row() {
    let batch = RowBatch::new(10, 3);
    assert_eq!(eval_one("#ROW", &batch).as_long().unwrap(), &[10, 11, 12]);

    let batch = RowBatch::new(1, 2).with_offset(100);
    assert_eq!(eval_one("#ROW", &batch).as_long().unwrap(), &[101, 102]);
}

#[test]
fn random_stays_in_unit_interval() {
    let schema = schema();
    let expr = RowExpr::parse("RANDOM()", &schema).unwrap();
    let batch = RowBatch::new(1, 100);
    let rng = Box::new(StdRng::seed_from_u64(42));
    let mut bound = expr.bind_with_rng(&batch, rng).unwrap();
    let out = bound.evaluate().unwrap();
    assert!(out.as_double().unwrap().iter().all(|&x| (0.0..1.0).contains(&x)));
}

#[test]
fn trig_and_transcendentals() {
    let y = [0.0f64, 0.0, 1.0];
    let batch = RowBatch::new(1, 2).col(1, ColData::Double(&y));
    let out = eval_one("COS(Y)", &batch);
    assert!((out.as_double().unwrap()[0] - 1.0).abs() < 1e-12);
    let out = eval_one("EXP(LOG(Y + 1.0))", &batch);
    let got = out.as_double().unwrap();
    assert!((got[0] - 1.0).abs() < 1e-12);
    assert!((got[1] - 2.0).abs() < 1e-12);
    let out = eval_one("ARCTAN2(Y, 1.0)", &batch);
    assert!((out.as_double().unwrap()[1] - std::f64::consts::FRAC_PI_4).abs() < 1e-12);
}

#[test]
fn abs_keeps_the_argument_kind() {
    let x = [0i64, -5, 5];
    let batch = RowBatch::new(1, 2).col(0, ColData::Long(&x));
    assert_eq!(eval_one("ABS(X)", &batch).as_long().unwrap(), &[5, 5]);
    let y = [0.0f64, -2.5];
    let batch = RowBatch::new(1, 1).col(1, ColData::Double(&y));
    assert_eq!(eval_one("ABS(Y)", &batch).as_double().unwrap(), &[2.5]);
}

// === region predicates ===

fn point_batch<'a>(px: &'a [f64], py: &'a [f64], n: usize) -> RowBatch<'a> {
    RowBatch::new(1, n)
        .col(4, ColData::Double(px))
        .col(5, ColData::Double(py))
}

#[test]
fn circle_is_a_closed_disc() {
    let px = [0.0f64, 0.0, 1.0, 0.5];
    let py = [0.0f64, 0.0, 0.0, 0.5];
    let batch = point_batch(&px, &py, 3);
    let out = eval_one("CIRCLE(0.0, 0.0, 1.0, PX, PY)", &batch);
    assert_eq!(out.as_bool().unwrap(), &[true, true, true]);

    let px = [0.0f64, 2.0];
    let py = [0.0f64, 0.0];
    let batch = point_batch(&px, &py, 1);
    let out = eval_one("CIRCLE(0.0, 0.0, 1.0, PX, PY)", &batch);
    assert_eq!(out.as_bool().unwrap(), &[false]);
}

#[test]
fn circle_matches_the_quadratic_form() {
    let px = [0.0f64, 0.3, -0.9, 0.8, 1.2];
    let py = [0.0f64, 0.4, 0.1, 0.7, 0.0];
    let batch = point_batch(&px, &py, 4);
    let out = eval_one("CIRCLE(0.0, 0.0, 1.0, PX, PY)", &batch);
    let direct = eval_one("PX*PX + PY*PY <= 1.0", &batch);
    assert_eq!(out, direct);
}

#[test]
fn rotated_box() {
    // 45-degree box centered at origin, width 2, height 0.5
    let px = [0.0f64, 0.5, 1.0];
    let py = [0.0f64, 0.5, 0.0];
    let batch = point_batch(&px, &py, 2);
    let out = eval_one("BOX(0.0, 0.0, 2.0, 0.5, 45.0, PX, PY)", &batch);
    // (0.5, 0.5) lies on the rotated long axis; (1, 0) falls outside the
    // half-height after unrotation
    assert_eq!(out.as_bool().unwrap(), &[true, false]);
}

#[test]
fn ellipse_axes() {
    let px = [0.0f64, 1.9, 0.0, 1.9];
    let py = [0.0f64, 0.0, 0.9, 0.9];
    let batch = point_batch(&px, &py, 3);
    let out = eval_one("ELLIPSE(0.0, 0.0, 2.0, 1.0, 0.0, PX, PY)", &batch);
    assert_eq!(out.as_bool().unwrap(), &[true, true, false]);
}

#[test]
fn near_is_an_open_tolerance() {
    let y = [0.0f64, 1.0, 1.05, 2.0];
    let batch = RowBatch::new(1, 3).col(1, ColData::Double(&y));
    let out = eval_one("NEAR(Y, 1.0, 0.1)", &batch);
    assert_eq!(out.as_bool().unwrap(), &[true, true, false]);
}

// === strings ===

#[test]
fn string_comparison_and_concat() {
    let schema = TableSchema::new().with("NAME", ColInfo::scalar(ValueKind::Str));
    let names: Vec<String> = vec!["".into(), "ab".into(), "cd".into(), "ab".into()];
    let batch = RowBatch::new(1, 3).col(0, ColData::Str(&names));

    let expr = RowExpr::parse("NAME == 'ab'", &schema).unwrap();
    let mut bound = expr.bind(&batch).unwrap();
    assert_eq!(
        bound.evaluate().unwrap().as_bool().unwrap(),
        &[true, false, true]
    );

    let expr = RowExpr::parse("NAME + '!'", &schema).unwrap();
    let mut bound = expr.bind(&batch).unwrap();
    assert_eq!(
        bound.evaluate().unwrap().as_str_rows().unwrap(),
        &["ab!", "cd!", "ab!"]
    );

    let expr = RowExpr::parse("NAME < 'b'", &schema).unwrap();
    let mut bound = expr.bind(&batch).unwrap();
    assert_eq!(
        bound.evaluate().unwrap().as_bool().unwrap(),
        &[true, false, true]
    );
}

#[test]
fn oversized_literal_concat_fails_at_parse_time() {
    let schema = schema();
    let a = "a".repeat(200);
    let text = format!("'{}' + '{}'", a, a);
    let err = RowExpr::parse(&text, &schema).unwrap_err();
    assert_eq!(err.kind, ParseErrorKind::Syntax);
    assert!(err.message.contains("longer than 255"));
}
