//! Replacement lowerings installed by a patch session.
//!
//! Each one emits the nodes the translator has a rule for: static sizes,
//! `Flip`, single-direction `LSTM`/`GRU`, `Upsample` to a fixed size,
//! `GroupNorm` and `DeformConv`.

use crate::internal::*;
use crate::native::{conv_attributes, opset9};
use crate::symbolic::{Symbolic, SymbolicTable};
use crate::trace::Tracer;

/// What a session patches.
#[derive(Clone, Debug)]
pub struct PatchSet {
    pub subsystems: Vec<Subsystem>,
    pub opset: u32,
    overrides: HashMap<Subsystem, Arc<dyn Lowering>>,
}

impl Default for PatchSet {
    fn default() -> PatchSet {
        PatchSet { subsystems: Subsystem::ALL.to_vec(), opset: 9, overrides: HashMap::new() }
    }
}

impl PatchSet {
    /// Patches nothing: the export runs with the native exporter.
    pub fn none() -> PatchSet {
        PatchSet { subsystems: vec![], ..PatchSet::default() }
    }

    pub fn only(subsystems: &[Subsystem]) -> PatchSet {
        PatchSet { subsystems: subsystems.to_vec(), ..PatchSet::default() }
    }

    pub fn with_opset(self, opset: u32) -> PatchSet {
        PatchSet { opset, ..self }
    }

    /// Installs `lowering` instead of the stock replacement for `subsystem`.
    pub fn with_replacement(mut self, subsystem: Subsystem, lowering: Arc<dyn Lowering>) -> PatchSet {
        self.overrides.insert(subsystem, lowering);
        self
    }

    /// The implementation a session installs for a subsystem slot.
    pub fn replacement(&self, subsystem: Subsystem) -> Option<Arc<dyn Lowering>> {
        self.overrides.get(&subsystem).cloned().or_else(|| replacement(subsystem))
    }

    /// The opset table a session installs in the symbolic registry.
    pub fn symbolic_table(&self) -> SymbolicTable {
        replacement_table(self.opset)
    }
}

/// Stock replacement for a subsystem slot.
pub fn replacement(subsystem: Subsystem) -> Option<Arc<dyn Lowering>> {
    Some(match subsystem {
        Subsystem::SizeAccessor => Symbolic::arc("size", size),
        Subsystem::Flip => Symbolic::arc("flip", flip),
        Subsystem::LstmCell => Symbolic::arc("lstm_cell", lstm_cell),
        Subsystem::Lstm => Symbolic::arc("lstm", lstm),
        Subsystem::Gru => Symbolic::arc("gru", gru),
        Subsystem::Interpolate => Symbolic::arc("interpolate", interpolate),
        Subsystem::GroupNorm => Symbolic::arc("group_norm", group_norm),
        Subsystem::DeformConv => Symbolic::arc("deform_conv2d", deform_conv2d),
        Subsystem::SymbolicRegistry => return None,
    })
}

/// The shipped table for `opset`, with the hooks for operators the
/// translator knows but the framework does not export.
pub fn replacement_table(opset: u32) -> SymbolicTable {
    let mut table = opset9();
    table.version = opset;
    table
        .with_fn("dropout", dropout)
        .with_fn("hardswish", hardswish)
        .with_fn("psroi_mask_pooling", psroi_mask_pooling)
}

fn size(t: &mut Tracer, call: &Call) -> StrataResult<TVec<Traced>> {
    let x = call.input_at(0)?;
    let dim = call.get_int("dim")?;
    let Some(&d) = usize::try_from(dim).ok().and_then(|dim| x.shape.get(dim)) else {
        bail!("size: dimension {} out of range for rank {}", dim, x.rank())
    };
    Ok(tvec!(t.konst(&[d as i64])))
}

fn flip(t: &mut Tracer, call: &Call) -> StrataResult<TVec<Traced>> {
    let dims = call.get_ints("dims")?;
    t.unary(call, "Flip", vec![AttributeProto::ints("dims", dims)])
}

/// Positional inputs of an ONNX recurrent node, the absent ones left empty.
fn recurrent_inputs<'t>(
    x: &'t Traced,
    weights: &'t [Traced],
    states: &[&'t Traced],
    absent: &'t Traced,
) -> Vec<&'t Traced> {
    let mut inputs = vec![x];
    inputs.extend(weights.iter());
    if !states.is_empty() {
        while inputs.len() < 5 {
            inputs.push(absent);
        }
        inputs.extend(states.iter().copied());
    }
    inputs
}

fn lstm_cell(t: &mut Tracer, call: &Call) -> StrataResult<TVec<Traced>> {
    let hidden = call.get_int("hidden_size")?;
    let Ok(units) = usize::try_from(hidden) else { bail!("lstm_cell: negative hidden_size {hidden}") };
    let x = call.input_at(0)?;
    ensure!(x.rank() == 2, "lstm_cell expects a [batch, input] input, got {:?}", x.shape);
    let state: Shape = tvec!(1, x.shape[0], units);
    let unsqueeze = |t: &mut Tracer, v: &Traced| {
        let mut shape = v.shape.clone();
        shape.insert(0, 1);
        t.graph.emit("Unsqueeze", &[v], vec![AttributeProto::ints("axes", &[0])], &[shape]).remove(0)
    };
    let seq = unsqueeze(t, x);
    let states = match &call.inputs[1..] {
        [h, c] => vec![unsqueeze(t, h), unsqueeze(t, c)],
        [] => vec![],
        _ => bail!("lstm_cell takes the input and optionally both states"),
    };
    let weights = t.weights(call)?;
    let absent = Traced::new(String::new(), tvec!());
    let states_refs: Vec<&Traced> = states.iter().collect();
    let inputs = recurrent_inputs(&seq, &weights, &states_refs, &absent);
    let outputs = t.graph.emit(
        "LSTM",
        &inputs,
        vec![AttributeProto::int("hidden_size", hidden)],
        &[state.clone(), state.clone(), state],
    );
    let squeeze = |t: &mut Tracer, v: &Traced| {
        let shape: Shape = v.shape[1..].into();
        t.graph.emit("Squeeze", &[v], vec![AttributeProto::ints("axes", &[0])], &[shape]).remove(0)
    };
    Ok(tvec!(squeeze(t, &outputs[1]), squeeze(t, &outputs[2])))
}

fn recurrent(
    t: &mut Tracer,
    call: &Call,
    op_type: &str,
    mut attributes: Vec<AttributeProto>,
) -> StrataResult<TVec<Traced>> {
    attributes.extend(call.attributes(&["hidden_size"])?);
    let x = call.input_at(0)?;
    let weights = t.weights(call)?;
    let states: Vec<&Traced> = call.inputs.iter().skip(1).collect();
    let absent = Traced::new(String::new(), tvec!());
    let inputs = recurrent_inputs(x, &weights, &states, &absent);
    t.emit(call, op_type, &inputs, attributes)
}

/// Y comes out as `[seq, batch, hidden]`: the single direction axis of the
/// ONNX layout is left out, as the layer produces it.
fn lstm(t: &mut Tracer, call: &Call) -> StrataResult<TVec<Traced>> {
    recurrent(t, call, "LSTM", vec![])
}

fn gru(t: &mut Tracer, call: &Call) -> StrataResult<TVec<Traced>> {
    recurrent(t, call, "GRU", vec![AttributeProto::int("linear_before_reset", 1)])
}

fn interpolate(t: &mut Tracer, call: &Call) -> StrataResult<TVec<Traced>> {
    let size = call.get_ints("size")?;
    let mode = call.get_string("mode")?;
    ensure!(size.len() == 2, "interpolate: expected a 2D size, got {:?}", size);
    t.unary(
        call,
        "Upsample",
        vec![
            AttributeProto::string("mode", mode),
            AttributeProto::int("height", size[0]),
            AttributeProto::int("width", size[1]),
        ],
    )
}

fn group_norm(t: &mut Tracer, call: &Call) -> StrataResult<TVec<Traced>> {
    let attributes = vec![
        AttributeProto::int("num_groups", call.get_int("num_groups")?),
        AttributeProto::float("eps", call.get_float("eps")?),
    ];
    let x = call.input_at(0)?;
    let weights = t.weights(call)?;
    let mut inputs = vec![x];
    inputs.extend(weights.iter());
    t.emit(call, "GroupNorm", &inputs, attributes)
}

fn deform_conv2d(t: &mut Tracer, call: &Call) -> StrataResult<TVec<Traced>> {
    let mut attributes = conv_attributes(call)?;
    attributes.push(AttributeProto::int("deformable_group", call.get_int("deformable_groups")?));
    let inputs = [call.input_at(0)?, call.input_at(1)?];
    let weights = t.weights(call)?;
    let mut all: Vec<&Traced> = inputs.to_vec();
    all.extend(weights.iter());
    t.emit(call, "DeformConv", &all, attributes)
}

fn dropout(t: &mut Tracer, call: &Call) -> StrataResult<TVec<Traced>> {
    let ratio = call.get_float("p")?;
    t.unary(call, "Dropout", vec![AttributeProto::float("ratio", ratio)])
}

fn hardswish(t: &mut Tracer, call: &Call) -> StrataResult<TVec<Traced>> {
    t.unary(call, "HardSwish", vec![])
}

fn psroi_mask_pooling(t: &mut Tracer, call: &Call) -> StrataResult<TVec<Traced>> {
    let attributes = call.attributes(&[
        "spatial_scale",
        "output_dim",
        "group_size",
        "roi_scale",
        "bin_scale",
    ])?;
    let inputs = [call.input_at(0)?, call.input_at(1)?];
    t.emit(call, "PSROIMaskPooling", &inputs, attributes)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn replacement_table_extends_shipped_one() {
        let shipped = opset9();
        let table = replacement_table(9);
        assert!(shipped.ops().all(|op| table.get(op).is_some()));
        assert!(shipped.get("psroi_mask_pooling").is_none());
        assert!(table.get("psroi_mask_pooling").is_some());
    }

    #[test]
    fn every_slot_has_a_replacement() {
        for s in Subsystem::ALL {
            assert_eq!(replacement(s).is_some(), s != Subsystem::SymbolicRegistry);
        }
    }
}
