//! Whole-graph translation: ONNX model in, layer network out.

use std::collections::HashMap;

use anyhow::Context;

use crate::StrataResult;
use crate::caffe::{BlobShape, NetParameter};
use crate::errors::ConvertError;
use crate::layer::{LayerDescriptor, NodeContext};
use crate::pb::{GraphProto, ModelProto, TensorProto};
use crate::registry::ConverterRegistry;
use crate::shape::{BlobShapeTable, Shape, display_shape};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TranslateOptions {
    /// Operator set the graph is expected to use. A model declaring another
    /// version is translated anyway, with a warning.
    pub opset: Option<i64>,
    /// Refuse attributes no converter schema declares.
    pub strict_attributes: bool,
}

impl Default for TranslateOptions {
    fn default() -> TranslateOptions {
        TranslateOptions { opset: Some(9), strict_attributes: false }
    }
}

impl TranslateOptions {
    pub fn with_opset(self, opset: Option<i64>) -> TranslateOptions {
        TranslateOptions { opset, ..self }
    }

    pub fn with_strict_attributes(self, strict_attributes: bool) -> TranslateOptions {
        TranslateOptions { strict_attributes, ..self }
    }
}

/// The translated network, with every blob shape resolved.
#[derive(Clone, Debug, PartialEq)]
pub struct Network {
    pub name: String,
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
    pub layers: Vec<LayerDescriptor>,
    pub shapes: BlobShapeTable,
}

impl Network {
    pub fn layer(&self, name: &str) -> Option<&LayerDescriptor> {
        self.layers.iter().find(|l| l.name == name)
    }

    pub fn input_shapes(&self) -> StrataResult<Vec<&Shape>> {
        self.inputs.iter().map(|i| self.shapes.get(i)).collect()
    }

    pub fn to_proto(&self) -> StrataResult<NetParameter> {
        Ok(NetParameter {
            name: self.name.clone(),
            input: self.inputs.clone(),
            input_shape: self
                .input_shapes()?
                .into_iter()
                .map(|s| BlobShape { dim: s.iter().map(|&d| d as i64).collect() })
                .collect(),
            layer: self.layers.iter().map(|l| l.to_proto()).collect(),
        })
    }
}

#[derive(Clone, Debug, Default)]
pub struct GraphTranslator {
    pub registry: ConverterRegistry,
    pub options: TranslateOptions,
}

impl GraphTranslator {
    pub fn new(registry: ConverterRegistry, options: TranslateOptions) -> GraphTranslator {
        GraphTranslator { registry, options }
    }

    pub fn with_options(self, options: TranslateOptions) -> GraphTranslator {
        GraphTranslator { options, ..self }
    }

    pub fn translate(&self, model: &ModelProto) -> StrataResult<Network> {
        let opset = model.default_opset();
        if let (Some(expected), Some(found)) = (self.options.opset, opset) {
            if expected != found {
                warn!("Model declares opset {found}, translator targets opset {expected}");
            }
        }
        let Some(graph) = &model.graph else { anyhow::bail!("Model has no graph") };
        self.translate_graph(graph)
    }

    pub fn translate_graph(&self, graph: &GraphProto) -> StrataResult<Network> {
        let initializers: HashMap<String, &TensorProto> =
            graph.initializer.iter().map(|t| (t.name.clone(), t)).collect();
        let mut shapes = BlobShapeTable::default();
        let mut inputs = vec![];
        for input in &graph.input {
            if initializers.contains_key(&input.name) {
                continue;
            }
            let shape = input.shape().with_context(|| format!("Graph input {}", input.name))?;
            debug!("Input: {} {}", input.name, display_shape(&shape));
            shapes.insert(input.name.clone(), shape)?;
            inputs.push(input.name.clone());
        }
        for init in &graph.initializer {
            trace!("Initializer: {} {:?}", init.name, init.dims);
            let shape = init.shape()?;
            shapes.insert(init.name.clone(), shape)?;
        }
        let mut layers = vec![];
        for (ix, node) in graph.node.iter().enumerate() {
            let name = if !node.name.is_empty() {
                node.name.clone()
            } else if let Some(first) = node.output.first().filter(|s| !s.is_empty()) {
                first.clone()
            } else {
                format!("{}-{}", ix, node.op_type)
            };
            trace!("Converting node {} ({})", name, node.op_type);
            let ctx = NodeContext { node, name: &name, initializers: &initializers, options: &self.options };
            let layer = self
                .registry
                .convert(&ctx, &mut shapes)
                .with_context(|| format!("Translating node {} ({})", name, node.op_type))?;
            debug!("Layer {}", layer);
            layers.push(layer);
        }
        let mut outputs = vec![];
        for output in &graph.output {
            if !shapes.contains(&output.name) {
                return Err(ConvertError::shape_inference(
                    &output.name,
                    "graph output is not produced by any node",
                )
                .into());
            }
            outputs.push(output.name.clone());
        }
        Ok(Network { name: graph.name.clone(), inputs, outputs, layers, shapes })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::pb::tensor_proto::DataType;
    use crate::pb::{AttributeProto, NodeProto, ValueInfoProto};

    fn graph(nodes: Vec<NodeProto>, output: &str) -> GraphProto {
        GraphProto {
            name: "test".into(),
            node: nodes,
            input: vec![ValueInfoProto::new("x", DataType::Float, &[1, 8, 4, 4])],
            output: vec![ValueInfoProto::new(output, DataType::Float, &[])],
            ..GraphProto::default()
        }
    }

    #[test]
    fn chain() {
        crate::setup_test_logger();
        let g = graph(
            vec![
                NodeProto::new("Relu", &["x"], &["r"]),
                NodeProto::new("Sigmoid", &["r"], &["s"]).named("sig"),
            ],
            "s",
        );
        let net = GraphTranslator::default().translate_graph(&g).unwrap();
        assert_eq!(net.layers.len(), 2);
        assert_eq!(net.layers[0].name, "r");
        assert_eq!(net.layers[0].layer_type(), "ReLU");
        assert_eq!(net.layers[1].name, "sig");
        assert_eq!(&**net.shapes.get("s").unwrap(), &[1, 8, 4, 4]);
        let proto = net.to_proto().unwrap();
        assert_eq!(proto.input, vec!["x"]);
        assert_eq!(proto.input_shape[0].dim, vec![1, 8, 4, 4]);
    }

    #[test]
    fn anonymous_node_without_output_name() {
        let g = graph(
            vec![
                NodeProto::new("Relu", &["x"], &["r"]),
                NodeProto::new("Dropout", &["r"], &["", "mask"])
                    .with_attribute(AttributeProto::float("ratio", 0.1)),
            ],
            "r",
        );
        let net = GraphTranslator::default().translate_graph(&g);
        // the dropout binds output[0], which is the absent name
        assert!(net.is_err());
    }

    #[test]
    fn missing_output_is_shape_error() {
        let g = graph(vec![NodeProto::new("Relu", &["x"], &["r"])], "nowhere");
        let err = GraphTranslator::default().translate_graph(&g).unwrap_err();
        assert_eq!(err.downcast_ref::<ConvertError>().unwrap().kind(), "ShapeInferenceError");
    }

    #[test]
    fn strict_attributes() {
        let g = graph(
            vec![NodeProto::new("Relu", &["x"], &["r"]).with_attribute(AttributeProto::int("foo", 1))],
            "r",
        );
        assert!(GraphTranslator::default().translate_graph(&g).is_ok());
        let strict = GraphTranslator::default()
            .with_options(TranslateOptions::default().with_strict_attributes(true));
        let err = strict.translate_graph(&g).unwrap_err();
        assert_eq!(err.downcast_ref::<ConvertError>().unwrap().kind(), "SchemaMismatch");
    }

    #[test]
    fn node_out_of_order() {
        let g = graph(
            vec![NodeProto::new("Relu", &["r0"], &["r1"]), NodeProto::new("Relu", &["x"], &["r0"])],
            "r1",
        );
        let err = GraphTranslator::default().translate_graph(&g).unwrap_err();
        assert!(format!("{err:#}").contains("r1"));
        assert!(matches!(
            err.downcast_ref::<ConvertError>(),
            Some(ConvertError::ShapeInference { blob, .. }) if blob == "r0"
        ));
    }
}
