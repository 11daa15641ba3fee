use super::*;

#[test]
fn values_are_numbered_in_recording_order() {
    let mut b = KernelBuilder::new("k", Domain::range(4));
    let i = b.index(0);
    let y = b.load("y", &[i]);
    let c = b.constant(3.0);
    let prod = b.mul(y, c);
    b.store("x", &[i], prod);
    let ir = b.finish();

    assert_eq!(i, ValueId(0));
    assert_eq!(prod, ValueId(3));
    assert_eq!(ir.next_value, 4);
    assert_eq!(ir.body.len(), 5);
    assert!(matches!(ir.body[4], Stmt::Store { value: ValueId(3), .. }));
}

#[test]
fn if_then_records_nested_block() {
    let mut b = KernelBuilder::new("k", Domain::range(4));
    let i = b.index(0);
    let zero = b.constant(0.0);
    let pos = b.compare(CmpOp::Gt, i, zero);
    b.if_then(pos, |b| {
        let v = b.load("y", &[i]);
        b.store("x", &[i], v);
    });
    let one = b.constant(1.0);
    let ir = b.finish();

    assert_eq!(ir.body.len(), 5);
    match &ir.body[3] {
        Stmt::If {
            cond,
            then_body,
            else_body,
        } => {
            assert_eq!(*cond, pos);
            assert_eq!(then_body.len(), 2);
            assert!(else_body.is_empty());
        }
        other => panic!("expected if, got {:?}", other),
    }
    // Ids keep counting across the nested block.
    assert_eq!(one, ValueId(4));
}

#[test]
fn if_else_records_both_arms() {
    let mut b = KernelBuilder::new("k", Domain::range(2));
    let i = b.index(0);
    b.if_else(
        i,
        |b| {
            let v = b.constant(1.0);
            b.store("x", &[i], v);
        },
        |b| {
            let v = b.constant(2.0);
            b.store("x", &[i], v);
        },
    );
    let ir = b.finish();
    match &ir.body[1] {
        Stmt::If {
            then_body,
            else_body,
            ..
        } => {
            assert_eq!(then_body.len(), 2);
            assert_eq!(else_body.len(), 2);
        }
        other => panic!("expected if, got {:?}", other),
    }
}

#[test]
fn with_args_sets_argument_count() {
    let mut b = KernelBuilder::new("scale", Domain::range(3)).with_args(2);
    let a = b.arg(1);
    let ir = b.finish();
    assert_eq!(ir.num_args, 2);
    assert!(matches!(ir.body[0], Stmt::Arg { position: 1, .. }));
    assert_eq!(a, ValueId(0));
}

#[test]
fn builder_matches_kernel_ir_new() {
    let mut b = KernelBuilder::new("k", Domain::range(8));
    let i = b.index(0);
    let y = b.load("y", &[i]);
    let s = b.unary(UnaryOp::Sin, y);
    b.store("x", &[i], s);
    let built = b.finish();
    let rebuilt = KernelIr::new("k", Domain::range(8), 0, built.body.clone());
    assert_eq!(built, rebuilt);
}
