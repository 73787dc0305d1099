//! Tracing a module into an ONNX graph.

use strata_convert::pb::ModelProto;

use crate::errors::ExportError;
use crate::internal::*;
use crate::patches::PatchSet;
use crate::session::{Capability, PatchSession};

/// Something that can be traced into graph nodes.
pub trait Exportable {
    fn name(&self) -> &str {
        "module"
    }

    fn trace(&self, tracer: &mut Tracer, inputs: &[Traced]) -> StrataResult<TVec<Traced>>;
}

/// The state of one trace: the context lowerings are taken from and the
/// graph being built.
#[derive(Debug)]
pub struct Tracer<'a> {
    ctx: &'a ExportContext,
    pub graph: GraphBuilder,
    pub opset: u32,
}

impl<'a> Tracer<'a> {
    pub fn new(ctx: &'a ExportContext, name: &str, opset: u32) -> Tracer<'a> {
        Tracer { ctx, graph: GraphBuilder::new(name, opset as i64), opset }
    }

    pub fn context(&self) -> &ExportContext {
        self.ctx
    }

    /// Lowers one call, through the subsystem owning its operator if any,
    /// through the symbolic hooks otherwise.
    pub fn op(&mut self, call: Call) -> StrataResult<TVec<Traced>> {
        if let Some(subsystem) = Subsystem::for_op(&call.op) {
            return self.apply(subsystem, call);
        }
        let Some(hook) = self.ctx.symbolic.lookup(&call.op, self.opset) else {
            return Err(ExportError::failed(
                &call.op,
                format!("no symbolic hook for opset {}", self.opset),
            )
            .into());
        };
        trace!("lower {} with {:?}", call.op, hook);
        hook.lower(self, &call).with_context(|| format!("Lowering {}", call.op))
    }

    /// Lowers a call with whatever implementation the subsystem currently has.
    pub fn apply(&mut self, subsystem: Subsystem, call: Call) -> StrataResult<TVec<Traced>> {
        let Some(lowering) = self.ctx.slot(subsystem).cloned() else {
            let reason = self.ctx.missing_reason(subsystem).unwrap_or_default();
            return Err(ExportError::failed(&call.op, reason).into());
        };
        trace!("lower {} with {} implementation {:?}", call.op, subsystem, lowering);
        lowering.lower(self, &call).with_context(|| format!("Lowering {}", call.op))
    }

    /// Size of dimension `dim` of `x`.
    pub fn size(&mut self, x: &Traced, dim: usize) -> StrataResult<Traced> {
        let call = Call::op("size").input(x).int("dim", dim as i64).output(Shape::new());
        let mut outputs = self.op(call)?;
        outputs.pop().ok_or_else(|| ExportError::failed("size", "no result").into())
    }

    /// A value known at trace time, not yet part of the graph.
    pub fn konst(&mut self, values: &[i64]) -> Traced {
        Traced::konst(self.graph.fresh("const"), values.to_vec())
    }

    /// Packs scalar and vector parts into a 1-D shape vector in the graph.
    /// Parts all known at trace time fold into a single initializer.
    pub fn pack(&mut self, parts: &[&Traced]) -> StrataResult<Traced> {
        if parts.iter().all(|p| p.konst.is_some()) {
            let values: Vec<i64> = parts.iter().flat_map(|p| p.konst.iter().flatten().copied()).collect();
            return Ok(self.graph.constant_i64("shape", &values));
        }
        let mut vectors = vec![];
        for part in parts {
            vectors.push(match &part.konst {
                Some(values) => self.graph.constant_i64("shape", values),
                None if part.rank() == 0 => {
                    let mut unsqueezed = self.graph.emit(
                        "Unsqueeze",
                        &[*part],
                        vec![AttributeProto::ints("axes", &[0])],
                        &[tvec!(1)],
                    );
                    unsqueezed.remove(0)
                }
                None => (*part).clone(),
            });
        }
        let len = vectors.iter().map(|v| v.shape.iter().product::<usize>()).sum::<usize>();
        let refs: Vec<&Traced> = vectors.iter().collect();
        let mut packed =
            self.graph.emit("Concat", &refs, vec![AttributeProto::int("axis", 0)], &[tvec!(len)]);
        Ok(packed.remove(0))
    }

    /// Turns the weights of a call into graph initializers.
    pub fn weights(&mut self, call: &Call) -> StrataResult<TVec<Traced>> {
        call.weights
            .iter()
            .enumerate()
            .map(|(ix, w)| {
                let hint = if w.name.is_empty() { format!("{}.w{ix}", call.op) } else { w.name.clone() };
                self.graph.initializer(&hint, w.clone())
            })
            .collect()
    }

    /// Emits one node producing the outputs the call declares.
    pub fn emit(
        &mut self,
        call: &Call,
        op_type: &str,
        inputs: &[&Traced],
        attributes: Vec<AttributeProto>,
    ) -> StrataResult<TVec<Traced>> {
        ensure!(!call.output_shapes.is_empty(), "{} call declares no output", call.op);
        Ok(self.graph.emit(op_type, inputs, attributes, &call.output_shapes))
    }

    /// Emits a node on the first input of the call.
    pub fn unary(
        &mut self,
        call: &Call,
        op_type: &str,
        attributes: Vec<AttributeProto>,
    ) -> StrataResult<TVec<Traced>> {
        let x = call.input_at(0)?;
        self.emit(call, op_type, &[x], attributes)
    }
}

/// The result of an export: the model and what the session could patch.
#[derive(Clone, Debug)]
pub struct Exported {
    pub model: ModelProto,
    pub capabilities: Vec<(Subsystem, Capability)>,
}

/// Exports `module` with the patches of `patches` installed in `ctx` for the
/// duration of the trace. `ctx` is in its original state when this returns,
/// whatever the outcome.
pub fn export(
    ctx: &mut ExportContext,
    patches: &PatchSet,
    module: &dyn Exportable,
    inputs: &[(&str, &[usize])],
    outputs: &[&str],
) -> StrataResult<Exported> {
    let session = PatchSession::open(ctx, patches)?;
    let capabilities = session.capabilities().to_vec();
    let mut tracer = Tracer::new(&session, module.name(), patches.opset);
    let traced_inputs = inputs
        .iter()
        .map(|(name, shape)| tracer.graph.input(name, shape))
        .collect::<StrataResult<Vec<_>>>()?;
    let results = module
        .trace(&mut tracer, &traced_inputs)
        .with_context(|| format!("Tracing {}", module.name()))?;
    let model = tracer.graph.into_model(&results, outputs)?;
    debug!("Exported {} with {} nodes", module.name(), model.graph.as_ref().map_or(0, |g| g.node.len()));
    Ok(Exported { model, capabilities })
}
