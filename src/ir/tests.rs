use std::sync::Arc;

use super::bind::bind;
use super::builder::KernelBuilder;
use super::hash::{hash_ir, hash_kernel};
use super::verify::verify;
use super::*;
use crate::error::KernelError;
use crate::field::{DataType, Field, FieldTable};

fn oldeven() -> KernelIr {
    let mut b = KernelBuilder::new("oldeven", Domain::range(16));
    let i = b.index(0);
    let two = b.constant(2.0);
    let zero = b.constant(0.0);
    let rem = b.rem(i, two);
    let even = b.compare(CmpOp::Eq, rem, zero);
    b.if_then(even, |b| {
        let y = b.load("y", &[i]);
        b.store("x", &[i], y);
    });
    b.finish()
}

fn table(names: &[&str]) -> FieldTable {
    let mut table = FieldTable::new();
    for name in names {
        table
            .declare(Field::allocate(*name, DataType::F32, vec![16]))
            .unwrap();
    }
    table
}

#[test]
fn test_display() {
    let text = oldeven().to_string();
    let expected = "\
kernel oldeven over [0..16] {
  %0 = index 0
  %1 = const 2.0
  %2 = const 0.0
  %3 = mod %0, %1
  %4 = eq %3, %2
  if %4 {
    %5 = load y[%0]
    store x[%0], %5
  }
}
";
    assert_eq!(text, expected);
}

#[test]
fn test_display_args_and_else() {
    let mut b = KernelBuilder::new("k", Domain::new(vec![0..2, 1..3])).with_args(1);
    let s = b.arg(0);
    b.if_else(
        s,
        |b| {
            let n = b.unary(UnaryOp::Neg, s);
            b.store("x", &[], n);
        },
        |b| b.store("x", &[], s),
    );
    let text = b.finish().to_string();
    assert!(text.starts_with("kernel k over [0..2, 1..3] args 1 {\n"));
    assert!(text.contains("  if %0 {\n    %1 = neg %0\n    store x[], %1\n  } else {\n"));
}

#[test]
fn test_operator_names_round_trip() {
    for op in BinaryOp::ALL {
        assert_eq!(BinaryOp::from_name(op.name()), Some(op));
    }
    for op in UnaryOp::ALL {
        assert_eq!(UnaryOp::from_name(op.name()), Some(op));
    }
    for op in CmpOp::ALL {
        assert_eq!(CmpOp::from_name(op.name()), Some(op));
    }
    assert_eq!(BinaryOp::from_name("xor"), None);
}

#[test]
fn test_floored_mod() {
    assert_eq!(BinaryOp::Mod.apply(5.0, 2.0), 1.0);
    assert_eq!(BinaryOp::Mod.apply(-1.0, 2.0), 1.0);
    assert_eq!(BinaryOp::FloorDiv.apply(-1.0, 2.0), -1.0);
    assert_eq!(CmpOp::Le.apply(1.0, 1.0), 1.0);
    assert_eq!(UnaryOp::Sgn.apply(-0.5), -1.0);
}

#[test]
fn test_domain_points() {
    let d = Domain::new(vec![0..2, 5..8]);
    assert_eq!(d.len(), 6);
    let forward: Vec<Vec<i64>> = d.points(IterationOrder::Forward).collect();
    assert_eq!(forward[0], vec![0, 5]);
    assert_eq!(forward[1], vec![0, 6]);
    assert_eq!(forward[3], vec![1, 5]);
    let mut reverse: Vec<Vec<i64>> = d.points(IterationOrder::Reverse).collect();
    reverse.reverse();
    assert_eq!(forward, reverse);

    assert_eq!(Domain::serial().len(), 1);
    assert_eq!(Domain::serial().points(IterationOrder::Forward).count(), 1);
    assert!(Domain::range(0).is_empty());
    assert!(Domain::new(vec![3..1]).is_empty());
}

#[test]
fn test_renumbered_shifts_every_id() {
    let ir = oldeven();
    let shifted: Vec<Stmt> = ir.body.iter().map(|s| s.renumbered(10)).collect();
    let moved = KernelIr::new("oldeven", ir.domain.clone(), 0, shifted);
    assert_eq!(moved.next_value, 16);
    match &moved.body[5] {
        Stmt::If { cond, then_body, .. } => {
            assert_eq!(*cond, ValueId(14));
            assert_eq!(then_body[0].dst(), Some(ValueId(15)));
        }
        other => panic!("expected if, got {:?}", other),
    }
}

#[test]
fn test_access_sets() {
    let access = Access::of(&oldeven().body);
    assert!(access.reads.contains("y"));
    assert!(access.writes.contains("x"));
    assert!(access.gradient_fields().is_empty());
    assert_eq!(access.fields().len(), 2);
}

#[test]
fn test_stmt_count_includes_nested() {
    let ir = oldeven();
    assert_eq!(ir.body.len(), 6);
    assert_eq!(ir.stmt_count(), 8);
}

// ─── verify ───────────────────────────────────────────────────────

#[test]
fn test_verify_accepts_builder_output() {
    verify(&oldeven()).unwrap();
}

#[test]
fn test_verify_rejects_out_of_scope_use() {
    // %1 is defined inside the branch and used after it.
    let body = vec![
        Stmt::Index {
            dst: ValueId(0),
            axis: 0,
        },
        Stmt::If {
            cond: ValueId(0),
            then_body: vec![Stmt::Const {
                dst: ValueId(1),
                value: 1.0,
            }],
            else_body: Vec::new(),
        },
        Stmt::Store {
            field: "x".to_string(),
            index: vec![ValueId(0)],
            value: ValueId(1),
        },
    ];
    let err = verify(&KernelIr::new("leak", Domain::range(4), 0, body)).unwrap_err();
    assert!(matches!(err, KernelError::MalformedIr { .. }));
}

#[test]
fn test_verify_rejects_redefinition() {
    let body = vec![
        Stmt::Const {
            dst: ValueId(0),
            value: 1.0,
        },
        Stmt::Const {
            dst: ValueId(0),
            value: 2.0,
        },
    ];
    let err = verify(&KernelIr::new("twice", Domain::range(1), 0, body)).unwrap_err();
    assert!(matches!(err, KernelError::MalformedIr { .. }));
}

#[test]
fn test_verify_checks_axes_and_args() {
    let axis = KernelIr::new(
        "axis",
        Domain::range(4),
        0,
        vec![Stmt::Index {
            dst: ValueId(0),
            axis: 1,
        }],
    );
    assert!(matches!(
        verify(&axis),
        Err(KernelError::ShapeMismatch { .. })
    ));

    let arg = KernelIr::new(
        "arg",
        Domain::range(4),
        1,
        vec![Stmt::Arg {
            dst: ValueId(0),
            position: 1,
        }],
    );
    assert!(matches!(verify(&arg), Err(KernelError::MalformedIr { .. })));
}

#[test]
fn test_verify_checks_value_counter() {
    let mut ir = oldeven();
    ir.next_value = 3;
    assert!(matches!(verify(&ir), Err(KernelError::MalformedIr { .. })));
}

// ─── bind ─────────────────────────────────────────────────────────

#[test]
fn test_bind_resolves_fields() {
    let kernel = bind(Arc::new(oldeven()), &table(&["x", "y"])).unwrap();
    assert_eq!(kernel.name(), "oldeven");
    assert_eq!(kernel.fields.len(), 2);
    assert_eq!(kernel.fields["y"].shape, vec![16]);
}

#[test]
fn test_bind_unknown_field() {
    let err = bind(Arc::new(oldeven()), &table(&["x"])).unwrap_err();
    assert_eq!(
        err,
        KernelError::UnknownField {
            field: "y".to_string()
        }
    );
}

#[test]
fn test_bind_checks_index_arity() {
    let mut b = KernelBuilder::new("flat", Domain::range(4));
    let i = b.index(0);
    let v = b.load("y", &[i, i]);
    b.store("x", &[i], v);
    let err = bind(Arc::new(b.finish()), &table(&["x", "y"])).unwrap_err();
    match err {
        KernelError::ShapeMismatch { subject, .. } => assert_eq!(subject, "y"),
        other => panic!("expected shape mismatch, got {:?}", other),
    }
}

// ─── hash ─────────────────────────────────────────────────────────

#[test]
fn test_hash_is_structural() {
    assert_eq!(hash_ir(&oldeven()), hash_ir(&oldeven()));

    let mut renamed = oldeven();
    renamed.name = "other".to_string();
    assert_ne!(hash_ir(&oldeven()), hash_ir(&renamed));
}

#[test]
fn test_hash_covers_field_signatures() {
    let ir = oldeven();
    let small = bind(Arc::new(ir.clone()), &table(&["x", "y"])).unwrap();
    let mut wide = FieldTable::new();
    wide.declare(Field::allocate("x", DataType::F64, vec![16]))
        .unwrap();
    wide.declare(Field::allocate("y", DataType::F64, vec![16]))
        .unwrap();
    let wide = bind(Arc::new(ir.clone()), &wide).unwrap();
    assert_ne!(small.hash, wide.hash);
    assert_eq!(small.hash, hash_kernel(&ir, &small.fields));
}

#[test]
fn test_hash_formats() {
    let hash = hash_ir(&oldeven());
    assert_eq!(hash.to_hex().len(), 64);
    assert_eq!(hash.to_short().len(), 8);
    assert_eq!(format!("{}", hash), format!("#{}", hash.to_short()));
}
