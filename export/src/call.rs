use crate::internal::*;

#[derive(Clone, Debug, PartialEq)]
pub enum Arg {
    Int(i64),
    Float(f32),
    Ints(Vec<i64>),
    Str(String),
}

/// One operator invocation recorded while tracing a module: its traced
/// inputs, scalar arguments, learned weights and the shapes of its results.
#[derive(Clone, Debug, new)]
pub struct Call {
    pub op: String,
    #[new(default)]
    pub inputs: TVec<Traced>,
    #[new(default)]
    pub args: Vec<(String, Arg)>,
    #[new(default)]
    pub weights: Vec<TensorProto>,
    #[new(default)]
    pub output_shapes: TVec<Shape>,
}

impl Call {
    pub fn op(op: impl Into<String>) -> Call {
        Call::new(op.into())
    }

    pub fn input(mut self, input: &Traced) -> Call {
        self.inputs.push(input.clone());
        self
    }

    pub fn arg(mut self, name: &str, arg: Arg) -> Call {
        self.args.push((name.to_string(), arg));
        self
    }

    pub fn int(self, name: &str, v: i64) -> Call {
        self.arg(name, Arg::Int(v))
    }

    pub fn float(self, name: &str, v: f32) -> Call {
        self.arg(name, Arg::Float(v))
    }

    pub fn ints(self, name: &str, v: &[i64]) -> Call {
        self.arg(name, Arg::Ints(v.to_vec()))
    }

    pub fn string(self, name: &str, v: &str) -> Call {
        self.arg(name, Arg::Str(v.to_string()))
    }

    pub fn weight(mut self, tensor: TensorProto) -> Call {
        self.weights.push(tensor);
        self
    }

    pub fn output(mut self, shape: impl Into<Shape>) -> Call {
        self.output_shapes.push(shape.into());
        self
    }

    pub fn get(&self, name: &str) -> StrataResult<&Arg> {
        self.args
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, a)| a)
            .ok_or_else(|| format_err!("{} call has no argument {}", self.op, name))
    }

    pub fn has(&self, name: &str) -> bool {
        self.args.iter().any(|(n, _)| n == name)
    }

    pub fn get_int(&self, name: &str) -> StrataResult<i64> {
        match self.get(name)? {
            Arg::Int(i) => Ok(*i),
            other => bail!("{} call: argument {} is {:?}, expected an int", self.op, name, other),
        }
    }

    pub fn get_float(&self, name: &str) -> StrataResult<f32> {
        match self.get(name)? {
            Arg::Float(f) => Ok(*f),
            other => bail!("{} call: argument {} is {:?}, expected a float", self.op, name, other),
        }
    }

    pub fn get_ints(&self, name: &str) -> StrataResult<&[i64]> {
        match self.get(name)? {
            Arg::Ints(v) => Ok(v),
            other => bail!("{} call: argument {} is {:?}, expected ints", self.op, name, other),
        }
    }

    pub fn get_string(&self, name: &str) -> StrataResult<&str> {
        match self.get(name)? {
            Arg::Str(s) => Ok(s),
            other => bail!("{} call: argument {} is {:?}, expected a string", self.op, name, other),
        }
    }

    pub fn input_at(&self, ix: usize) -> StrataResult<&Traced> {
        self.inputs.get(ix).ok_or_else(|| format_err!("{} call has no input #{}", self.op, ix))
    }

    pub fn output_shape(&self, ix: usize) -> StrataResult<&Shape> {
        self.output_shapes.get(ix).ok_or_else(|| format_err!("{} call has no output #{}", self.op, ix))
    }

    /// Arguments carried over as ONNX attributes of the same name.
    pub fn attributes(&self, names: &[&str]) -> StrataResult<Vec<AttributeProto>> {
        names
            .iter()
            .map(|&name| {
                Ok(match self.get(name)? {
                    Arg::Int(i) => AttributeProto::int(name, *i),
                    Arg::Float(f) => AttributeProto::float(name, *f),
                    Arg::Ints(v) => AttributeProto::ints(name, v),
                    Arg::Str(s) => AttributeProto::string(name, s),
                })
            })
            .collect()
    }
}
