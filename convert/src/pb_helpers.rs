use crate::errors::ConvertError;
use crate::pb::attribute_proto::AttributeType;
use crate::pb::tensor_proto::DataType;
use crate::pb::tensor_shape_proto::dimension;
use crate::pb::*;
use crate::shape::Shape;
use crate::{StrataResult, TVec};

use std::borrow::Cow;
use std::fmt;

pub trait Reason {
    fn reason(&self) -> Cow<'_, str>;
}

impl Reason for &str {
    fn reason(&self) -> Cow<'_, str> {
        (*self).into()
    }
}

impl<F> Reason for F
where
    F: Fn() -> String,
{
    fn reason(&self) -> Cow<'_, str> {
        self().into()
    }
}

impl fmt::Display for AttributeType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match self {
            AttributeType::Int => "int",
            AttributeType::Float => "float",
            AttributeType::Tensor => "tensor",
            AttributeType::String => "string",
            AttributeType::Ints => "list of ints",
            AttributeType::Floats => "list of floats",
            AttributeType::Tensors => "list of tensors",
            AttributeType::Strings => "list of strings",
            AttributeType::Graph => "graph",
            AttributeType::Graphs => "graphs",
            _ => "<undefined>",
        })
    }
}

impl NodeProto {
    pub fn new(op_type: impl Into<String>, input: &[&str], output: &[&str]) -> NodeProto {
        NodeProto {
            op_type: op_type.into(),
            input: input.iter().map(|s| s.to_string()).collect(),
            output: output.iter().map(|s| s.to_string()).collect(),
            ..NodeProto::default()
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> NodeProto {
        self.name = name.into();
        self
    }

    pub fn with_attribute(mut self, attr: AttributeProto) -> NodeProto {
        self.attribute.push(attr);
        self
    }

    /// How the node is referred to in messages: its name, or its first output
    /// when the exporter left it anonymous.
    pub fn display_name(&self) -> Cow<'_, str> {
        if !self.name.is_empty() {
            Cow::Borrowed(&self.name)
        } else if let Some(first) = self.output.iter().find(|s| !s.is_empty()) {
            Cow::Borrowed(first)
        } else {
            Cow::Owned(format!("<anonymous {}>", self.op_type))
        }
    }

    /// Inputs, without the empty names ONNX uses for absent optional inputs.
    pub fn inputs(&self) -> TVec<String> {
        self.input.iter().filter(|s| !s.is_empty()).cloned().collect()
    }

    pub fn outputs(&self) -> TVec<String> {
        self.output.iter().filter(|s| !s.is_empty()).cloned().collect()
    }

    pub fn schema_mismatch<R: Reason>(&self, what: R) -> ConvertError {
        ConvertError::SchemaMismatch {
            node: self.display_name().into_owned(),
            op_type: self.op_type.clone(),
            reason: what.reason().into_owned(),
        }
    }

    pub fn expect<R: Reason>(&self, cond: bool, what: R) -> StrataResult<()> {
        if !cond {
            Err(self.schema_mismatch(|| format!("expected {}", what.reason())))?
        }
        Ok(())
    }

    pub fn expect_inputs(&self, range: std::ops::RangeInclusive<usize>) -> StrataResult<()> {
        let n = self.inputs().len();
        self.expect(range.contains(&n), || {
            format!("between {} and {} inputs, got {}", range.start(), range.end(), n)
        })
    }

    pub fn expect_outputs(&self, range: std::ops::RangeInclusive<usize>) -> StrataResult<()> {
        let n = self.outputs().len();
        self.expect(range.contains(&n), || {
            format!("between {} and {} outputs, got {}", range.start(), range.end(), n)
        })
    }
}

impl AttributeProto {
    fn typed(name: &str, ty: AttributeType) -> AttributeProto {
        AttributeProto { name: name.to_string(), r#type: ty as i32, ..AttributeProto::default() }
    }

    pub fn float(name: &str, f: f32) -> AttributeProto {
        AttributeProto { f, ..Self::typed(name, AttributeType::Float) }
    }

    pub fn int(name: &str, i: i64) -> AttributeProto {
        AttributeProto { i, ..Self::typed(name, AttributeType::Int) }
    }

    pub fn string(name: &str, s: &str) -> AttributeProto {
        AttributeProto { s: s.as_bytes().to_vec(), ..Self::typed(name, AttributeType::String) }
    }

    pub fn tensor(name: &str, t: TensorProto) -> AttributeProto {
        AttributeProto { t: Some(t), ..Self::typed(name, AttributeType::Tensor) }
    }

    pub fn floats(name: &str, floats: &[f32]) -> AttributeProto {
        AttributeProto { floats: floats.to_vec(), ..Self::typed(name, AttributeType::Floats) }
    }

    pub fn ints(name: &str, ints: &[i64]) -> AttributeProto {
        AttributeProto { ints: ints.to_vec(), ..Self::typed(name, AttributeType::Ints) }
    }

    pub fn strings(name: &str, strings: &[&str]) -> AttributeProto {
        AttributeProto {
            strings: strings.iter().map(|s| s.as_bytes().to_vec()).collect(),
            ..Self::typed(name, AttributeType::Strings)
        }
    }

    pub fn attribute_type(&self) -> AttributeType {
        AttributeType::from_i32(self.r#type).unwrap_or(AttributeType::Undefined)
    }
}

impl TensorProto {
    pub fn from_f32(name: &str, dims: &[usize], data: &[f32]) -> TensorProto {
        TensorProto {
            name: name.to_string(),
            dims: dims.iter().map(|&d| d as i64).collect(),
            data_type: DataType::Float as i32,
            float_data: data.to_vec(),
            ..TensorProto::default()
        }
    }

    pub fn from_i64(name: &str, dims: &[usize], data: &[i64]) -> TensorProto {
        TensorProto {
            name: name.to_string(),
            dims: dims.iter().map(|&d| d as i64).collect(),
            data_type: DataType::Int64 as i32,
            int64_data: data.to_vec(),
            ..TensorProto::default()
        }
    }

    pub fn shape(&self) -> StrataResult<Shape> {
        self.dims
            .iter()
            .map(|&d| {
                usize::try_from(d).map_err(|_| {
                    anyhow::Error::from(ConvertError::shape_inference(
                        &self.name,
                        format!("negative dimension {d}"),
                    ))
                })
            })
            .collect()
    }

    pub fn len(&self) -> StrataResult<usize> {
        Ok(self.shape()?.iter().product())
    }

    pub fn is_empty(&self) -> bool {
        self.len().map(|l| l == 0).unwrap_or(true)
    }

    pub fn data_type(&self) -> DataType {
        DataType::from_i32(self.data_type).unwrap_or(DataType::Undefined)
    }

    /// Values as f32, from whichever storage field the exporter used.
    pub fn f32_values(&self) -> StrataResult<Vec<f32>> {
        anyhow::ensure!(
            self.data_type() == DataType::Float,
            "Tensor {} is {:?}, expected float",
            self.name,
            self.data_type()
        );
        let values: Vec<f32> = if !self.raw_data.is_empty() {
            self.raw_data
                .chunks_exact(4)
                .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                .collect()
        } else {
            self.float_data.clone()
        };
        anyhow::ensure!(
            values.len() == self.len()?,
            "Tensor {} holds {} values for shape {:?}",
            self.name,
            values.len(),
            self.dims
        );
        Ok(values)
    }

    /// Values as i64, for the integer types shape arguments come in.
    pub fn i64_values(&self) -> StrataResult<Vec<i64>> {
        let values: Vec<i64> = match self.data_type() {
            DataType::Int64 if !self.raw_data.is_empty() => self
                .raw_data
                .chunks_exact(8)
                .map(|c| i64::from_le_bytes([c[0], c[1], c[2], c[3], c[4], c[5], c[6], c[7]]))
                .collect(),
            DataType::Int64 => self.int64_data.clone(),
            DataType::Int32 if !self.raw_data.is_empty() => self
                .raw_data
                .chunks_exact(4)
                .map(|c| i32::from_le_bytes([c[0], c[1], c[2], c[3]]) as i64)
                .collect(),
            DataType::Int32 => self.int32_data.iter().map(|&i| i as i64).collect(),
            dt => anyhow::bail!("Tensor {} is {:?}, expected an integer type", self.name, dt),
        };
        anyhow::ensure!(
            values.len() == self.len()?,
            "Tensor {} holds {} values for shape {:?}",
            self.name,
            values.len(),
            self.dims
        );
        Ok(values)
    }
}

impl ValueInfoProto {
    pub fn new(name: &str, elem_type: DataType, shape: &[usize]) -> ValueInfoProto {
        let dim = shape
            .iter()
            .map(|&d| tensor_shape_proto::Dimension {
                value: Some(dimension::Value::DimValue(d as i64)),
                ..Default::default()
            })
            .collect();
        ValueInfoProto {
            name: name.to_string(),
            r#type: Some(TypeProto {
                value: Some(type_proto::Value::TensorType(type_proto::Tensor {
                    elem_type: elem_type as i32,
                    shape: Some(TensorShapeProto { dim }),
                })),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    /// Concrete shape of the value. Symbolic or unknown dimensions are refused.
    pub fn shape(&self) -> StrataResult<Shape> {
        let Some(TypeProto { value: Some(type_proto::Value::TensorType(tensor)), .. }) = &self.r#type
        else {
            return Err(ConvertError::shape_inference(&self.name, "value has no tensor type").into());
        };
        let Some(shape) = &tensor.shape else {
            return Err(ConvertError::shape_inference(&self.name, "tensor type has no shape").into());
        };
        shape
            .dim
            .iter()
            .map(|d| match &d.value {
                Some(dimension::Value::DimValue(v)) if *v >= 0 => Ok(*v as usize),
                other => Err(anyhow::Error::from(ConvertError::shape_inference(
                    &self.name,
                    format!("expected a concrete dimension, got {other:?}"),
                ))),
            })
            .collect()
    }
}

impl ModelProto {
    /// Version of the default ("" or "ai.onnx") operator set.
    pub fn default_opset(&self) -> Option<i64> {
        self.opset_import
            .iter()
            .find(|o| o.domain.is_empty() || o.domain == "ai.onnx")
            .map(|o| o.version)
    }
}
