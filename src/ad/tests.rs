use std::collections::BTreeMap;

use super::*;
use crate::field::{DataType, FieldSig};
use crate::ir::builder::KernelBuilder;
use crate::ir::{BinaryOp, CmpOp, Domain, Scale, UnaryOp};
use crate::runtime::Runtime;

fn sigs(fields: &[(&str, DataType)], n: usize) -> BTreeMap<String, FieldSig> {
    fields
        .iter()
        .map(|(name, dtype)| {
            (
                name.to_string(),
                FieldSig {
                    dtype: *dtype,
                    shape: vec![n],
                },
            )
        })
        .collect()
}

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

fn reals(names: &[&str]) -> BTreeMap<String, FieldSig> {
    let fields: Vec<(&str, DataType)> = names.iter().map(|n| (*n, DataType::F32)).collect();
    sigs(&fields, 16)
}

#[test]
fn test_branch_reversal_text() {
    let grad = reverse(&oldeven(), &reals(&["x", "y"])).unwrap();
    insta::assert_snapshot!(grad.to_string(), @r###"
    kernel oldeven_grad over [0..16] {
      %0 = index 0
      %1 = const 2.0
      %2 = const 0.0
      %3 = mod %0, %1
      %4 = eq %3, %2
      if %4 {
        %5 = load y[%0]
        adj %5 += grad x[%0]
        grad y[%0] += adj %5
      }
    }
    "###);
}

#[test]
fn test_reverse_keeps_domain_and_args() {
    let grad = reverse(&oldeven(), &reals(&["x", "y"])).unwrap();
    assert_eq!(grad.name, "oldeven_grad");
    assert_eq!(grad.domain, Domain::range(16));
    assert_eq!(grad.num_args, 0);
    crate::ir::verify::verify(&grad).unwrap();
}

#[test]
fn test_derivation_is_idempotent() {
    let ir = oldeven();
    let fields = reals(&["x", "y"]);
    let a = reverse(&ir, &fields).unwrap();
    let b = reverse(&ir, &fields).unwrap();
    assert_eq!(a, b);
    assert_eq!(a.to_string(), b.to_string());
}

#[test]
fn test_predicate_reading_written_field_is_rejected() {
    let mut b = KernelBuilder::new("selfmask", Domain::range(16));
    let i = b.index(0);
    let x = b.load("x", &[i]);
    let zero = b.constant(0.0);
    let pos = b.compare(CmpOp::Gt, x, zero);
    b.if_then(pos, |b| {
        let y = b.load("y", &[i]);
        b.store("x", &[i], y);
    });
    let err = reverse(&b.finish(), &reals(&["x", "y"])).unwrap_err();
    assert_eq!(
        err,
        KernelError::ImpureBranchCondition {
            kernel: "selfmask".to_string(),
            predicate: pos,
            field: "x".to_string(),
        }
    );
}

#[test]
fn test_read_only_mask_emits_no_mask_gradient() {
    let mut b = KernelBuilder::new("masked", Domain::range(16));
    let i = b.index(0);
    let m = b.load("m", &[i]);
    let half = b.constant(0.5);
    let on = b.compare(CmpOp::Gt, m, half);
    b.if_then(on, |b| {
        let y = b.load("y", &[i]);
        b.store("x", &[i], y);
    });
    let grad = reverse(&b.finish(), &reals(&["m", "x", "y"])).unwrap();
    let access = crate::ir::Access::of(&grad.body);
    assert!(access.grad_writes.contains("y"));
    assert!(!access.grad_writes.contains("m"));
    assert!(access.reads.contains("m"));
}

#[test]
fn test_mod_on_active_value_is_not_differentiable() {
    let mut b = KernelBuilder::new("wrap", Domain::range(16));
    let i = b.index(0);
    let y = b.load("y", &[i]);
    let one = b.constant(1.0);
    let wrapped = b.rem(y, one);
    b.store("x", &[i], wrapped);
    let err = reverse(&b.finish(), &reals(&["x", "y"])).unwrap_err();
    match err {
        KernelError::NotDifferentiable { kernel, op } => {
            assert_eq!(kernel, "wrap");
            assert!(op.contains("mod"), "{}", op);
        }
        other => panic!("expected NotDifferentiable, got {:?}", other),
    }
}

#[test]
fn test_mod_on_unused_active_value_is_fine() {
    // The remainder only feeds a predicate, so it needs no adjoint.
    let mut b = KernelBuilder::new("parity", Domain::range(16));
    let i = b.index(0);
    let y = b.load("y", &[i]);
    let two = b.constant(2.0);
    let rem = b.rem(y, two);
    b.if_then(rem, |b| {
        let z = b.load("z", &[i]);
        b.store("x", &[i], z);
    });
    assert!(reverse(&b.finish(), &reals(&["x", "y", "z"])).is_ok());
}

#[test]
fn test_reverse_only_statement_in_forward_ir() {
    let ir = KernelIr::new(
        "bogus",
        Domain::range(4),
        0,
        vec![
            Stmt::Index {
                dst: ValueId(0),
                axis: 0,
            },
            Stmt::AccumulateGrad {
                field: "x".to_string(),
                index: vec![ValueId(0)],
                source: ValueId(0),
            },
        ],
    );
    let err = reverse(&ir, &reals(&["x"])).unwrap_err();
    assert!(matches!(err, KernelError::NotDifferentiable { .. }));
}

#[test]
fn test_factor_from_overwritten_field() {
    // x[i] = x[i] * x[i]: the reverse pass would read the squared value.
    let mut b = KernelBuilder::new("square_in_place", Domain::range(16));
    let i = b.index(0);
    let x = b.load("x", &[i]);
    let sq = b.mul(x, x);
    b.store("x", &[i], sq);
    let err = reverse(&b.finish(), &reals(&["x"])).unwrap_err();
    assert_eq!(
        err,
        KernelError::OverwrittenPrimal {
            kernel: "square_in_place".to_string(),
            value: x,
            field: "x".to_string(),
        }
    );
}

#[test]
fn test_integer_store_has_no_adjoint() {
    let mut b = KernelBuilder::new("quantize", Domain::range(16));
    let i = b.index(0);
    let y = b.load("y", &[i]);
    b.store("n", &[i], y);
    let fields = sigs(&[("y", DataType::F32), ("n", DataType::I32)], 16);
    let grad = reverse(&b.finish(), &fields).unwrap();
    assert!(grad.is_empty());
}

#[test]
fn test_else_branch_is_reversed() {
    let mut b = KernelBuilder::new("pick", Domain::range(16));
    let i = b.index(0);
    let two = b.constant(2.0);
    let three = b.constant(3.0);
    let eight = b.constant(8.0);
    let low = b.compare(CmpOp::Lt, i, eight);
    b.if_else(
        low,
        |b| {
            let y = b.load("y", &[i]);
            let v = b.mul(y, two);
            b.store("x", &[i], v);
        },
        |b| {
            let y = b.load("y", &[i]);
            let v = b.mul(y, three);
            b.store("x", &[i], v);
        },
    );
    let grad = reverse(&b.finish(), &reals(&["x", "y"])).unwrap();
    let branch = grad.body.iter().find_map(|s| match s {
        Stmt::If {
            cond,
            then_body,
            else_body,
        } => Some((*cond, then_body, else_body)),
        _ => None,
    });
    let (cond, then_body, else_body) = branch.unwrap();
    assert_eq!(cond, low);
    for (arm, factor) in [(then_body, two), (else_body, three)] {
        assert!(arm.iter().any(|s| matches!(
            s,
            Stmt::Adjoint { scale: Scale::By(f), .. } if *f == factor
        )));
        assert!(arm.iter().any(|s| matches!(s, Stmt::AccumulateGrad { .. })));
    }
}

/// x[i] = 3 * y[i] for even i below 8, y[i] for even i from 8 on.
fn nested() -> KernelIr {
    let mut b = KernelBuilder::new("nested", Domain::range(16));
    let i = b.index(0);
    let two = b.constant(2.0);
    let zero = b.constant(0.0);
    let rem = b.rem(i, two);
    let even = b.compare(CmpOp::Eq, rem, zero);
    b.if_then(even, |b| {
        let eight = b.constant(8.0);
        let low = b.compare(CmpOp::Lt, i, eight);
        b.if_else(
            low,
            |b| {
                let y = b.load("y", &[i]);
                let three = b.constant(3.0);
                let v = b.mul(three, y);
                b.store("x", &[i], v);
            },
            |b| {
                let y = b.load("y", &[i]);
                b.store("x", &[i], y);
            },
        );
    });
    b.finish()
}

#[test]
fn test_nested_branch_reversal_text() {
    let grad = reverse(&nested(), &reals(&["x", "y"])).unwrap();
    insta::assert_snapshot!(grad.to_string(), @r###"
    kernel nested_grad over [0..16] {
      %0 = index 0
      %1 = const 2.0
      %2 = const 0.0
      %3 = mod %0, %1
      %4 = eq %3, %2
      if %4 {
        %5 = const 8.0
        %6 = lt %0, %5
        if %6 {
          %7 = load y[%0]
          %8 = const 3.0
          %9 = mul %8, %7
          adj %9 += grad x[%0]
          adj %7 += adj %9 * %8
          grad y[%0] += adj %7
        } else {
          %10 = load y[%0]
          adj %10 += grad x[%0]
          grad y[%0] += adj %10
        }
      }
    }
    "###);
}

#[test]
fn test_nested_branch_gradient_values() {
    let mut rt = Runtime::default();
    rt.declare_field("x", DataType::F32, &[16]).unwrap();
    rt.declare_field("y", DataType::F32, &[16]).unwrap();
    rt.enable_gradients(crate::field::ROOT_GROUP);
    rt.define_kernel(nested()).unwrap();
    rt.field_mut("x").unwrap().fill_grad(1.0).unwrap();
    rt.invoke_gradient("nested", &[]).unwrap();

    let expected: Vec<f64> = (0..16)
        .map(|i| match (i % 2 == 0, i < 8) {
            (false, _) => 0.0,
            (true, true) => 3.0,
            (true, false) => 1.0,
        })
        .collect();
    assert_eq!(rt.field("y").unwrap().grad_to_vec().unwrap(), expected);
}

#[test]
fn test_fresh_ids_continue_forward_counter() {
    let mut b = KernelBuilder::new("recip", Domain::range(4));
    let i = b.index(0);
    let y = b.load("y", &[i]);
    let l = b.unary(UnaryOp::Log, y);
    b.store("x", &[i], l);
    let ir = b.finish();
    let grad = reverse(&ir, &reals(&["x", "y"])).unwrap();
    // log needs `1 / y`: one constant and one division.
    assert_eq!(grad.next_value, ir.next_value + 2);
}

// ─── Numeric checks through the runtime ──────────────────────────

const N: usize = 5;
const H: f64 = 1e-6;

fn inputs() -> Vec<f64> {
    vec![0.3, 0.7, 1.1, 1.9, 2.6]
}

fn other_inputs() -> Vec<f64> {
    vec![1.4, 0.2, 2.3, 0.5, 1.7]
}

fn runtime_for(ir: KernelIr, names: &[&str]) -> Runtime {
    let mut rt = Runtime::default();
    for name in names {
        rt.declare_field(name, DataType::F64, &[N]).unwrap();
    }
    rt.enable_gradients(crate::field::ROOT_GROUP);
    rt.define_kernel(ir).unwrap();
    rt
}

fn fill(rt: &mut Runtime, name: &str, values: &[f64]) {
    let field = rt.field_mut(name).unwrap();
    for (i, v) in values.iter().enumerate() {
        field.write(&[i as i64], *v).unwrap();
    }
}

fn assert_close(actual: f64, expected: f64, what: &str) {
    assert!(
        (actual - expected).abs() < 1e-5 * (1.0 + expected.abs()),
        "{}: got {}, expected {}",
        what,
        actual,
        expected
    );
}

#[test]
fn test_unary_rules_match_finite_differences() {
    for op in UnaryOp::ALL {
        if op == UnaryOp::Sgn {
            continue;
        }
        let mut b = KernelBuilder::new(op.name(), Domain::range(N as i64));
        let i = b.index(0);
        let y = b.load("y", &[i]);
        let v = b.unary(op, y);
        b.store("x", &[i], v);

        let mut rt = runtime_for(b.finish(), &["x", "y"]);
        fill(&mut rt, "y", &inputs());
        rt.field_mut("x").unwrap().fill_grad(1.0).unwrap();
        rt.invoke_gradient(op.name(), &[]).unwrap();

        let grad = rt.field("y").unwrap().grad_to_vec().unwrap();
        for (k, a) in inputs().into_iter().enumerate() {
            let fd = (op.apply(a + H) - op.apply(a - H)) / (2.0 * H);
            assert_close(grad[k], fd, &format!("{} at {}", op.name(), a));
        }
    }
}

#[test]
fn test_binary_rules_match_finite_differences() {
    let differentiable = [
        BinaryOp::Add,
        BinaryOp::Sub,
        BinaryOp::Mul,
        BinaryOp::Div,
        BinaryOp::Pow,
        BinaryOp::Max,
        BinaryOp::Min,
    ];
    for op in differentiable {
        let mut b = KernelBuilder::new(op.name(), Domain::range(N as i64));
        let i = b.index(0);
        let y = b.load("y", &[i]);
        let z = b.load("z", &[i]);
        let v = b.binary(op, y, z);
        b.store("x", &[i], v);

        let mut rt = runtime_for(b.finish(), &["x", "y", "z"]);
        fill(&mut rt, "y", &inputs());
        fill(&mut rt, "z", &other_inputs());
        rt.field_mut("x").unwrap().fill_grad(1.0).unwrap();
        rt.invoke_gradient(op.name(), &[]).unwrap();

        let dy = rt.field("y").unwrap().grad_to_vec().unwrap();
        let dz = rt.field("z").unwrap().grad_to_vec().unwrap();
        for (k, (a, c)) in inputs().into_iter().zip(other_inputs()).enumerate() {
            let fd_a = (op.apply(a + H, c) - op.apply(a - H, c)) / (2.0 * H);
            let fd_c = (op.apply(a, c + H) - op.apply(a, c - H)) / (2.0 * H);
            assert_close(dy[k], fd_a, &format!("d{}/da at {}", op.name(), k));
            assert_close(dz[k], fd_c, &format!("d{}/db at {}", op.name(), k));
        }
    }
}

#[test]
fn test_chain_through_arguments() {
    // x[i] = sin(y[i]) * s, with s a kernel argument.
    let mut b = KernelBuilder::new("scaled_sin", Domain::range(N as i64)).with_args(1);
    let i = b.index(0);
    let s = b.arg(0);
    let y = b.load("y", &[i]);
    let sin = b.unary(UnaryOp::Sin, y);
    let v = b.mul(sin, s);
    b.store("x", &[i], v);

    let mut rt = runtime_for(b.finish(), &["x", "y"]);
    fill(&mut rt, "y", &inputs());
    rt.field_mut("x").unwrap().fill_grad(1.0).unwrap();
    rt.invoke_gradient("scaled_sin", &[2.5]).unwrap();

    let grad = rt.field("y").unwrap().grad_to_vec().unwrap();
    for (k, a) in inputs().into_iter().enumerate() {
        assert_close(grad[k], 2.5 * a.cos(), "scaled sin");
    }
}
