use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use strata_export::prelude::*;
use strata_export::strata_convert::pb::TensorProto;

type Snapshot = (Vec<(Subsystem, Option<Arc<dyn Lowering>>)>, Option<Arc<SymbolicTable>>);

fn setup_test_logger() {
    let _ = env_logger::Builder::from_env("STRATA_LOG").is_test(true).try_init();
}

fn snapshot(ctx: &ExportContext) -> Snapshot {
    let slots = Subsystem::ALL.iter().map(|&s| (s, ctx.slot(s).cloned())).collect();
    (slots, ctx.symbolic.table(9).cloned())
}

fn same<T: ?Sized>(a: &Option<Arc<T>>, b: &Option<Arc<T>>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => Arc::ptr_eq(a, b),
        (None, None) => true,
        _ => false,
    }
}

fn assert_restored(ctx: &ExportContext, before: &Snapshot) {
    let (slots, table) = snapshot(ctx);
    for ((s, now), (_, then)) in slots.iter().zip(&before.0) {
        assert!(same(now, then), "{s} not restored");
    }
    assert!(same(&table, &before.1), "symbolic table not restored");
}

fn unavailable(session: &PatchSession) -> Vec<Subsystem> {
    session.capabilities().iter().filter(|(_, c)| !c.is_enabled()).map(|(s, _)| *s).collect()
}

struct Flipper;

impl Exportable for Flipper {
    fn name(&self) -> &str {
        "flipper"
    }

    fn trace(&self, t: &mut Tracer, inputs: &[Traced]) -> StrataResult<TVec<Traced>> {
        let x = &inputs[0];
        t.op(Call::op("flip").input(x).ints("dims", &[3]).output(x.shape.clone()))
    }
}

struct Panicking;

impl Exportable for Panicking {
    fn trace(&self, _: &mut Tracer, _: &[Traced]) -> StrataResult<TVec<Traced>> {
        panic!("module blew up")
    }
}

#[test]
fn session_swaps_and_restores() {
    setup_test_logger();
    let mut ctx = ExportContext::native();
    ctx.load_extension("deform_conv").unwrap();
    let before = snapshot(&ctx);
    {
        let session = PatchSession::open(&mut ctx, &PatchSet::default()).unwrap();
        assert!(unavailable(&session).is_empty());
        for s in Subsystem::ALL {
            if s != Subsystem::SymbolicRegistry {
                assert!(!same(&session.slot(s).cloned(), &before.0.iter().find(|p| p.0 == s).unwrap().1));
            }
        }
        assert!(!same(&session.symbolic.table(9).cloned(), &before.1));
        assert!(session.symbolic.lookup("psroi_mask_pooling", 9).is_some());
    }
    assert_restored(&ctx, &before);
    assert!(ctx.symbolic.lookup("psroi_mask_pooling", 9).is_none());
}

#[test]
fn missing_extension_is_reported_not_fatal() {
    let mut ctx = ExportContext::native();
    let before = snapshot(&ctx);
    {
        let session = PatchSession::open(&mut ctx, &PatchSet::default()).unwrap();
        assert_eq!(unavailable(&session), vec![Subsystem::DeformConv]);
        match session.capability(Subsystem::DeformConv) {
            Some(Capability::Unavailable { reason }) => assert!(reason.contains("deform_conv")),
            other => panic!("unexpected {other:?}"),
        }
        let err = session.require(Subsystem::DeformConv).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ExportError>(),
            Some(ExportError::PatchUnavailable { subsystem: Subsystem::DeformConv, .. })
        ));
        session.require(Subsystem::Flip).unwrap();
    }
    assert_restored(&ctx, &before);
    assert!(ctx.slot(Subsystem::DeformConv).is_none());
}

#[test]
fn all_optional_subsystems_unavailable() {
    let mut ctx = Subsystem::ALL.into_iter().fold(ExportContext::native(), |ctx, s| ctx.without(s));
    let before = snapshot(&ctx);
    {
        let session = PatchSession::open(&mut ctx, &PatchSet::default()).unwrap();
        assert_eq!(unavailable(&session).len(), 8);
        assert!(session.capability(Subsystem::SymbolicRegistry).unwrap().is_enabled());
    }
    assert_restored(&ctx, &before);
    assert!(Subsystem::ALL.iter().all(|&s| ctx.slot(s).is_none()));
}

#[test]
fn unpatched_subsystem_requirement() {
    let mut ctx = ExportContext::native();
    let session = PatchSession::open(&mut ctx, &PatchSet::only(&[Subsystem::Flip])).unwrap();
    assert!(session.capability(Subsystem::Lstm).is_none());
    assert!(session.require(Subsystem::Lstm).is_err());
}

#[test]
fn duplicate_subsystem_refused() {
    let mut ctx = ExportContext::native();
    let before = snapshot(&ctx);
    assert!(PatchSession::open(&mut ctx, &PatchSet::only(&[Subsystem::Flip, Subsystem::Flip])).is_err());
    assert_restored(&ctx, &before);
}

#[test]
fn registered_hooks_restored_individually() {
    let mut ctx = ExportContext::native();
    let custom = Symbolic::arc("custom_relu", |t, call| t.unary(call, "Relu", vec![]));
    let later = Symbolic::arc("late_op", |t, call| t.unary(call, "Relu", vec![]));
    ctx.symbolic.register_op("relu", custom.clone(), "", 9);
    {
        let mut session = PatchSession::open(&mut ctx, &PatchSet::default()).unwrap();
        let during = session.symbolic.lookup("relu", 9).unwrap();
        assert!(!Arc::ptr_eq(&during, &custom));
        session.symbolic.register_op("late_op", later.clone(), "", 9);
    }
    assert!(Arc::ptr_eq(&ctx.symbolic.lookup("relu", 9).unwrap(), &custom));
    assert!(Arc::ptr_eq(&ctx.symbolic.lookup("late_op", 9).unwrap(), &later));
}

#[test]
fn export_restores_on_failure() {
    setup_test_logger();
    let mut ctx = ExportContext::native();
    let before = snapshot(&ctx);
    let err = export(&mut ctx, &PatchSet::none(), &Flipper, &[("data", &[1, 3, 4, 4])], &["output"])
        .unwrap_err();
    assert!(matches!(err.downcast_ref::<ExportError>(), Some(ExportError::ExportFailed { .. })));
    assert_restored(&ctx, &before);

    let bad = PatchSet::default().with_replacement(
        Subsystem::Flip,
        Symbolic::arc("broken_flip", |_, _| Err(ExportError::failed("flip", "broken").into())),
    );
    assert!(export(&mut ctx, &bad, &Flipper, &[("data", &[1, 3, 4, 4])], &["output"]).is_err());
    assert_restored(&ctx, &before);
}

#[test]
fn export_restores_on_panic() {
    let mut ctx = ExportContext::native();
    let before = snapshot(&ctx);
    let result = catch_unwind(AssertUnwindSafe(|| {
        export(&mut ctx, &PatchSet::default(), &Panicking, &[("data", &[1, 3])], &["output"])
    }));
    assert!(result.is_err());
    assert_restored(&ctx, &before);
}

#[test]
fn patched_flip_translates() {
    setup_test_logger();
    let mut ctx = ExportContext::native();
    let exported =
        export(&mut ctx, &PatchSet::default(), &Flipper, &[("data", &[1, 3, 4, 4])], &["output"]).unwrap();
    let network = strata_export::strata_convert::strata().translate(&exported.model).unwrap();
    assert_eq!(network.layers.len(), 1);
    assert_eq!(network.layers[0].layer_type(), "Reverse");
    assert_eq!(network.layers[0].top.as_slice(), ["output".to_string()]);
    assert_eq!(&**network.shapes.get("output").unwrap(), &[1, 3, 4, 4]);
}

struct Normed;

impl Exportable for Normed {
    fn trace(&self, t: &mut Tracer, inputs: &[Traced]) -> StrataResult<TVec<Traced>> {
        let x = &inputs[0];
        t.op(Call::op("group_norm")
            .input(x)
            .int("num_groups", 2)
            .float("eps", 1e-5)
            .weight(TensorProto::from_f32("scale", &[4], &[1.0; 4]))
            .weight(TensorProto::from_f32("bias", &[4], &[0.0; 4]))
            .output(x.shape.clone()))
    }
}

#[test]
fn native_group_norm_is_not_translatable() {
    let mut ctx = ExportContext::native();
    let exported =
        export(&mut ctx, &PatchSet::none(), &Normed, &[("data", &[1, 4, 3, 3])], &["output"]).unwrap();
    let err = strata_export::strata_convert::strata().translate(&exported.model).unwrap_err();
    match err.downcast_ref::<ConvertError>() {
        Some(ConvertError::UnsupportedOperator { op_type, .. }) => {
            assert_eq!(op_type, "InstanceNormalization")
        }
        other => panic!("unexpected {other:?}"),
    }

    let exported =
        export(&mut ctx, &PatchSet::default(), &Normed, &[("data", &[1, 4, 3, 3])], &["output"]).unwrap();
    let network = strata_export::strata_convert::strata().translate(&exported.model).unwrap();
    assert_eq!(network.layers[0].layer_type(), "GroupNorm");
    assert_eq!(network.layers[0].blobs.len(), 2);
}
