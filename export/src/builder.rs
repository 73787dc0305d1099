use std::collections::HashSet;

use strata_convert::pb::tensor_proto::DataType;
use strata_convert::pb::{
    AttributeProto, GraphProto, ModelProto, NodeProto, OperatorSetIdProto, TensorProto, ValueInfoProto,
};

use crate::errors::ExportError;
use crate::internal::*;

/// A value flowing through a trace: the name of the blob holding it, its
/// static shape and, for values known at export time, their content.
#[derive(Clone, Debug, PartialEq, Eq, new)]
pub struct Traced {
    pub name: String,
    pub shape: Shape,
    #[new(default)]
    pub konst: Option<Vec<i64>>,
}

impl Traced {
    pub fn konst(name: impl Into<String>, values: Vec<i64>) -> Traced {
        Traced { name: name.into(), shape: tvec!(values.len()), konst: Some(values) }
    }

    pub fn rank(&self) -> usize {
        self.shape.len()
    }
}

/// Accumulates the ONNX graph produced by an export.
#[derive(Clone, Debug)]
pub struct GraphBuilder {
    pub name: String,
    pub opset: i64,
    inputs: Vec<ValueInfoProto>,
    nodes: Vec<NodeProto>,
    initializers: Vec<TensorProto>,
    taken: HashSet<String>,
}

impl GraphBuilder {
    pub fn new(name: impl Into<String>, opset: i64) -> GraphBuilder {
        GraphBuilder {
            name: name.into(),
            opset,
            inputs: vec![],
            nodes: vec![],
            initializers: vec![],
            taken: HashSet::new(),
        }
    }

    /// A blob name derived from `hint` not used yet in this graph.
    pub fn fresh(&mut self, hint: &str) -> String {
        let mut name = hint.to_string();
        let mut ix = 1;
        while self.taken.contains(&name) {
            name = format!("{hint}.{ix}");
            ix += 1;
        }
        self.taken.insert(name.clone());
        name
    }

    pub fn input(&mut self, name: &str, shape: &[usize]) -> StrataResult<Traced> {
        ensure!(!self.taken.contains(name), "Input name {} used twice", name);
        self.taken.insert(name.to_string());
        self.inputs.push(ValueInfoProto::new(name, DataType::Float, shape));
        Ok(Traced::new(name.to_string(), shape.into()))
    }

    pub fn initializer(&mut self, hint: &str, mut tensor: TensorProto) -> StrataResult<Traced> {
        let name = self.fresh(hint);
        let shape = tensor.shape()?;
        tensor.name = name.clone();
        self.initializers.push(tensor);
        Ok(Traced::new(name, shape))
    }

    pub fn constant_i64(&mut self, hint: &str, values: &[i64]) -> Traced {
        let name = self.fresh(hint);
        self.initializers.push(TensorProto::from_i64(&name, &[values.len()], values));
        Traced::konst(name, values.to_vec())
    }

    /// Appends a node with fresh output names, one per output shape.
    pub fn emit(
        &mut self,
        op_type: &str,
        inputs: &[&Traced],
        attributes: Vec<AttributeProto>,
        output_shapes: &[Shape],
    ) -> TVec<Traced> {
        let hint = op_type.to_lowercase();
        let outputs: TVec<Traced> =
            output_shapes.iter().map(|s| Traced::new(self.fresh(&hint), s.clone())).collect();
        let node_name = self.fresh(&format!("{hint}_node"));
        let node = NodeProto {
            name: node_name,
            op_type: op_type.to_string(),
            input: inputs.iter().map(|i| i.name.clone()).collect(),
            output: outputs.iter().map(|o| o.name.clone()).collect(),
            attribute: attributes,
            ..NodeProto::default()
        };
        trace!("  emit {} {:?} -> {:?}", node.op_type, node.input, node.output);
        self.nodes.push(node);
        outputs
    }

    pub fn nodes(&self) -> &[NodeProto] {
        &self.nodes
    }

    /// Finishes the graph, giving the traced results their requested names.
    pub fn into_model(mut self, results: &[Traced], names: &[&str]) -> StrataResult<ModelProto> {
        if results.len() != names.len() {
            return Err(ExportError::failed(
                &self.name,
                format!("module produced {} outputs, {} names given", results.len(), names.len()),
            )
            .into());
        }
        let mut outputs = vec![];
        for (result, &name) in results.iter().zip(names) {
            if self.inputs.iter().any(|i| i.name == result.name) {
                return Err(ExportError::failed(
                    &self.name,
                    format!("output {name} is the graph input {} itself", result.name),
                )
                .into());
            }
            if result.name != name {
                ensure!(!self.taken.contains(name), "Output name {} collides with a traced blob", name);
                self.rename(&result.name, name);
            }
            outputs.push(ValueInfoProto::new(name, DataType::Float, &result.shape));
        }
        Ok(ModelProto {
            ir_version: 4,
            producer_name: "strata".into(),
            opset_import: vec![OperatorSetIdProto { domain: String::new(), version: self.opset }],
            graph: Some(GraphProto {
                name: self.name,
                node: self.nodes,
                initializer: self.initializers,
                input: self.inputs,
                output: outputs,
                ..GraphProto::default()
            }),
            ..ModelProto::default()
        })
    }

    fn rename(&mut self, from: &str, to: &str) {
        for node in &mut self.nodes {
            for blob in node.input.iter_mut().chain(node.output.iter_mut()) {
                if blob == from {
                    *blob = to.to_string();
                }
            }
        }
        self.taken.insert(to.to_string());
    }
}
