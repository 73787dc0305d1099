//! Reference modules. `forward` is the oracle the translated network is
//! checked against, `trace` is what the exporter sees of the module.

use std::fmt;

use anyhow::{bail, ensure, format_err};
use itertools::Itertools;
use ndarray::{Array4, ArrayD, Axis, Ix4, IxDyn};
use rand::Rng;
use rand_distr::{Distribution, Normal};
use strata_export::prelude::*;
use strata_export::strata_convert::pb::TensorProto;

pub trait Module: Exportable + fmt::Debug {
    fn forward(&self, inputs: &[ArrayD<f32>]) -> StrataResult<Vec<ArrayD<f32>>>;
}

fn single(inputs: &[ArrayD<f32>]) -> StrataResult<&ArrayD<f32>> {
    inputs.first().ok_or_else(|| format_err!("module expects an input"))
}

fn traced(inputs: &[Traced]) -> StrataResult<&Traced> {
    inputs.first().ok_or_else(|| format_err!("module expects an input"))
}

/// Result shapes of the forward pass on zeros shaped like the traced inputs.
fn output_shapes(module: &dyn Module, inputs: &[Traced]) -> StrataResult<Vec<Shape>> {
    let zeros: Vec<ArrayD<f32>> = inputs.iter().map(|i| ArrayD::zeros(IxDyn(&i.shape))).collect();
    Ok(module.forward(&zeros)?.iter().map(|o| o.shape().into()).collect())
}

fn with_outputs(call: Call, shapes: Vec<Shape>) -> Call {
    shapes.into_iter().fold(call, |call, shape| call.output(shape))
}

fn ints(v: &[usize]) -> Vec<i64> {
    v.iter().map(|&i| i as i64).collect()
}

fn tensor(name: &str, a: &ArrayD<f32>) -> TensorProto {
    TensorProto::from_f32(name, a.shape(), &a.iter().copied().collect_vec())
}

fn normal(rng: &mut impl Rng, shape: &[usize], mean: f32, std: f32) -> StrataResult<ArrayD<f32>> {
    let dist = Normal::new(mean, std).map_err(|e| format_err!("{e:?}"))?;
    Ok(ArrayD::from_shape_simple_fn(IxDyn(shape), || dist.sample(rng)))
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Activation {
    Relu,
    LeakyRelu(f32),
    Sigmoid,
    Tanh,
    HardSwish,
}

impl Module for Activation {
    fn forward(&self, inputs: &[ArrayD<f32>]) -> StrataResult<Vec<ArrayD<f32>>> {
        let x = single(inputs)?;
        Ok(vec![match *self {
            Activation::Relu => x.mapv(|v| v.max(0.0)),
            Activation::LeakyRelu(slope) => x.mapv(|v| if v < 0.0 { v * slope } else { v }),
            Activation::Sigmoid => x.mapv(|v| 1.0 / (1.0 + (-v).exp())),
            Activation::Tanh => x.mapv(f32::tanh),
            Activation::HardSwish => x.mapv(|v| v * (v + 3.0).clamp(0.0, 6.0) / 6.0),
        }])
    }
}

impl Exportable for Activation {
    fn trace(&self, t: &mut Tracer, inputs: &[Traced]) -> StrataResult<TVec<Traced>> {
        let call = match *self {
            Activation::Relu => Call::op("relu"),
            Activation::LeakyRelu(slope) => Call::op("leaky_relu").float("negative_slope", slope),
            Activation::Sigmoid => Call::op("sigmoid"),
            Activation::Tanh => Call::op("tanh"),
            Activation::HardSwish => Call::op("hardswish"),
        };
        let call = with_outputs(call.input(traced(inputs)?), output_shapes(self, inputs)?);
        t.op(call)
    }
}

#[derive(Clone, Debug, new)]
pub struct Transpose {
    pub perm: Vec<usize>,
}

impl Module for Transpose {
    fn forward(&self, inputs: &[ArrayD<f32>]) -> StrataResult<Vec<ArrayD<f32>>> {
        let x = single(inputs)?;
        ensure!(x.ndim() == self.perm.len(), "permutation {:?} for rank {}", self.perm, x.ndim());
        Ok(vec![x.clone().permuted_axes(IxDyn(&self.perm)).as_standard_layout().into_owned()])
    }
}

impl Exportable for Transpose {
    fn trace(&self, t: &mut Tracer, inputs: &[Traced]) -> StrataResult<TVec<Traced>> {
        let call = Call::op("permute").input(traced(inputs)?).ints("dims", &ints(&self.perm));
        t.op(with_outputs(call, output_shapes(self, inputs)?))
    }
}

/// 2D convolution over NCHW input, weights in OIHW.
#[derive(Clone, Debug)]
pub struct Conv2d {
    pub weight: ArrayD<f32>,
    pub bias: Option<ArrayD<f32>>,
    pub stride: [usize; 2],
    pub padding: [usize; 2],
    pub dilation: [usize; 2],
    pub groups: usize,
}

impl Conv2d {
    /// Weights drawn from N(0, sqrt(2 / (k * k * out))), bias from N(0, 1).
    pub fn random(
        rng: &mut impl Rng,
        in_channels: usize,
        out_channels: usize,
        kernel: usize,
        groups: usize,
    ) -> StrataResult<Conv2d> {
        ensure!(in_channels % groups == 0 && out_channels % groups == 0, "channels not divisible by groups");
        let n = (kernel * kernel * out_channels) as f32;
        let weight =
            normal(rng, &[out_channels, in_channels / groups, kernel, kernel], 0.0, (2.0 / n).sqrt())?;
        let bias = normal(rng, &[out_channels], 0.0, 1.0)?;
        Ok(Conv2d { weight, bias: Some(bias), stride: [1, 1], padding: [0, 0], dilation: [1, 1], groups })
    }

    pub fn stride(self, stride: usize) -> Conv2d {
        Conv2d { stride: [stride; 2], ..self }
    }

    pub fn padding(self, padding: usize) -> Conv2d {
        Conv2d { padding: [padding; 2], ..self }
    }

    pub fn dilation(self, dilation: usize) -> Conv2d {
        Conv2d { dilation: [dilation; 2], ..self }
    }

    pub fn without_bias(self) -> Conv2d {
        Conv2d { bias: None, ..self }
    }
}

impl Module for Conv2d {
    fn forward(&self, inputs: &[ArrayD<f32>]) -> StrataResult<Vec<ArrayD<f32>>> {
        let x = single(inputs)?.view().into_dimensionality::<Ix4>()?;
        let w = self.weight.view().into_dimensionality::<Ix4>()?;
        let (n, c, h, wd) = x.dim();
        let (o, cg, kh, kw) = w.dim();
        ensure!(c == cg * self.groups, "input has {} channels, weights expect {}", c, cg * self.groups);
        let extent = |input: usize, k: usize, ax: usize| -> StrataResult<usize> {
            let span = self.dilation[ax] * (k - 1) + 1;
            let padded = input + 2 * self.padding[ax];
            ensure!(padded >= span, "kernel larger than padded input");
            Ok((padded - span) / self.stride[ax] + 1)
        };
        let (oh, ow) = (extent(h, kh, 0)?, extent(wd, kw, 1)?);
        let per_group = o / self.groups;
        let mut y = Array4::<f32>::zeros((n, o, oh, ow));
        for ((b, oc, oy, ox), out) in y.indexed_iter_mut() {
            let g = oc / per_group;
            let mut acc = self.bias.as_ref().map(|bias| bias[[oc]]).unwrap_or(0.0);
            for ic in 0..cg {
                for ky in 0..kh {
                    let iy = (oy * self.stride[0] + ky * self.dilation[0]) as isize - self.padding[0] as isize;
                    if iy < 0 || iy >= h as isize {
                        continue;
                    }
                    for kx in 0..kw {
                        let ix =
                            (ox * self.stride[1] + kx * self.dilation[1]) as isize - self.padding[1] as isize;
                        if ix < 0 || ix >= wd as isize {
                            continue;
                        }
                        acc += x[[b, g * cg + ic, iy as usize, ix as usize]] * w[[oc, ic, ky, kx]];
                    }
                }
            }
            *out = acc;
        }
        Ok(vec![y.into_dyn()])
    }
}

impl Exportable for Conv2d {
    fn trace(&self, t: &mut Tracer, inputs: &[Traced]) -> StrataResult<TVec<Traced>> {
        let mut call = Call::op("conv2d")
            .input(traced(inputs)?)
            .ints("stride", &ints(&self.stride))
            .ints("padding", &ints(&self.padding))
            .ints("dilation", &ints(&self.dilation))
            .int("groups", self.groups as i64)
            .weight(tensor("weight", &self.weight));
        if let Some(bias) = &self.bias {
            call = call.weight(tensor("bias", bias));
        }
        t.op(with_outputs(call, output_shapes(self, inputs)?))
    }
}

/// Dropout in evaluation mode.
#[derive(Clone, Debug, new)]
pub struct Dropout {
    pub p: f32,
}

impl Module for Dropout {
    fn forward(&self, inputs: &[ArrayD<f32>]) -> StrataResult<Vec<ArrayD<f32>>> {
        Ok(vec![single(inputs)?.clone()])
    }
}

impl Exportable for Dropout {
    fn trace(&self, t: &mut Tracer, inputs: &[Traced]) -> StrataResult<TVec<Traced>> {
        let call = Call::op("dropout").input(traced(inputs)?).float("p", self.p);
        t.op(with_outputs(call, output_shapes(self, inputs)?))
    }
}

#[derive(Clone, Debug)]
pub struct GroupNorm {
    pub num_groups: usize,
    pub eps: f32,
    pub weight: ArrayD<f32>,
    pub bias: ArrayD<f32>,
}

impl GroupNorm {
    /// Affine parameters drawn around the identity transform.
    pub fn random(rng: &mut impl Rng, num_groups: usize, channels: usize) -> StrataResult<GroupNorm> {
        Ok(GroupNorm {
            num_groups,
            eps: 1e-5,
            weight: normal(rng, &[channels], 1.0, 0.1)?,
            bias: normal(rng, &[channels], 0.0, 0.1)?,
        })
    }
}

impl Module for GroupNorm {
    fn forward(&self, inputs: &[ArrayD<f32>]) -> StrataResult<Vec<ArrayD<f32>>> {
        let x = single(inputs)?;
        ensure!(x.ndim() >= 2, "group norm input of rank {}", x.ndim());
        let (n, c) = (x.shape()[0], x.shape()[1]);
        ensure!(c % self.num_groups == 0, "{} channels in {} groups", c, self.num_groups);
        let spatial = x.len() / n / c;
        let per_group = c / self.num_groups;
        let x3 = x.to_shape((n, c, spatial))?;
        let mut y = ndarray::Array3::<f32>::zeros((n, c, spatial));
        for b in 0..n {
            for g in 0..self.num_groups {
                let channels = g * per_group..(g + 1) * per_group;
                let values = x3.slice(ndarray::s![b, channels.clone(), ..]);
                let count = values.len() as f32;
                let mean = values.sum() / count;
                let var = values.mapv(|v| (v - mean) * (v - mean)).sum() / count;
                let inv = 1.0 / (var + self.eps).sqrt();
                for ch in channels {
                    let (scale, shift) = (self.weight[[ch]], self.bias[[ch]]);
                    for s in 0..spatial {
                        y[[b, ch, s]] = (x3[[b, ch, s]] - mean) * inv * scale + shift;
                    }
                }
            }
        }
        Ok(vec![y.into_shape_with_order(x.raw_dim())?])
    }
}

impl Exportable for GroupNorm {
    fn trace(&self, t: &mut Tracer, inputs: &[Traced]) -> StrataResult<TVec<Traced>> {
        let call = Call::op("group_norm")
            .input(traced(inputs)?)
            .int("num_groups", self.num_groups as i64)
            .float("eps", self.eps)
            .weight(tensor("weight", &self.weight))
            .weight(tensor("bias", &self.bias));
        t.op(with_outputs(call, output_shapes(self, inputs)?))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InterpolateMode {
    Nearest,
    Bilinear,
}

/// Resize of the two spatial axes of NCHW input to a fixed size.
#[derive(Clone, Debug, new)]
pub struct Interpolate {
    pub size: [usize; 2],
    pub mode: InterpolateMode,
}

/// Source coordinate sampled by output coordinate `dst`, without corner
/// alignment.
fn source(dst: usize, input: usize, output: usize, mode: InterpolateMode) -> f32 {
    let scale = input as f32 / output as f32;
    match mode {
        InterpolateMode::Nearest => (dst as f32 * scale).floor().min(input as f32 - 1.0),
        InterpolateMode::Bilinear => ((dst as f32 + 0.5) * scale - 0.5).max(0.0),
    }
}

impl Module for Interpolate {
    fn forward(&self, inputs: &[ArrayD<f32>]) -> StrataResult<Vec<ArrayD<f32>>> {
        let x = single(inputs)?.view().into_dimensionality::<Ix4>()?;
        let (n, c, h, w) = x.dim();
        let [oh, ow] = self.size;
        let y = Array4::from_shape_fn((n, c, oh, ow), |(b, ch, oy, ox)| {
            let sy = source(oy, h, oh, self.mode);
            let sx = source(ox, w, ow, self.mode);
            match self.mode {
                InterpolateMode::Nearest => x[[b, ch, sy as usize, sx as usize]],
                InterpolateMode::Bilinear => {
                    let (y0, x0) = ((sy as usize).min(h - 1), (sx as usize).min(w - 1));
                    let (y1, x1) = ((y0 + 1).min(h - 1), (x0 + 1).min(w - 1));
                    let (ly, lx) = (sy - y0 as f32, sx - x0 as f32);
                    let top = x[[b, ch, y0, x0]] * (1.0 - lx) + x[[b, ch, y0, x1]] * lx;
                    let bottom = x[[b, ch, y1, x0]] * (1.0 - lx) + x[[b, ch, y1, x1]] * lx;
                    top * (1.0 - ly) + bottom * ly
                }
            }
        });
        Ok(vec![y.into_dyn()])
    }
}

impl Exportable for Interpolate {
    fn trace(&self, t: &mut Tracer, inputs: &[Traced]) -> StrataResult<TVec<Traced>> {
        let mode = match self.mode {
            InterpolateMode::Nearest => "nearest",
            InterpolateMode::Bilinear => "bilinear",
        };
        let call = Call::op("interpolate")
            .input(traced(inputs)?)
            .ints("size", &ints(&self.size))
            .string("mode", mode);
        t.op(with_outputs(call, output_shapes(self, inputs)?))
    }
}

#[derive(Clone, Debug, new)]
pub struct Flip {
    pub dims: Vec<usize>,
}

impl Module for Flip {
    fn forward(&self, inputs: &[ArrayD<f32>]) -> StrataResult<Vec<ArrayD<f32>>> {
        let mut y = single(inputs)?.clone();
        for &d in &self.dims {
            ensure!(d < y.ndim(), "flip axis {} for rank {}", d, y.ndim());
            y.invert_axis(Axis(d));
        }
        Ok(vec![y.as_standard_layout().into_owned()])
    }
}

impl Exportable for Flip {
    fn trace(&self, t: &mut Tracer, inputs: &[Traced]) -> StrataResult<TVec<Traced>> {
        let call = Call::op("flip").input(traced(inputs)?).ints("dims", &ints(&self.dims));
        t.op(with_outputs(call, output_shapes(self, inputs)?))
    }
}

/// `x.view(x.size(0), -1)`: the batch size is queried on the traced value.
#[derive(Clone, Copy, Debug, Default)]
pub struct FlattenBySize;

impl Module for FlattenBySize {
    fn forward(&self, inputs: &[ArrayD<f32>]) -> StrataResult<Vec<ArrayD<f32>>> {
        let x = single(inputs)?;
        let Some(&n) = x.shape().first() else { bail!("can not flatten a scalar") };
        let rest = if n == 0 { 0 } else { x.len() / n };
        Ok(vec![x.as_standard_layout().into_owned().into_shape_with_order(IxDyn(&[n, rest]))?])
    }
}

impl Exportable for FlattenBySize {
    fn trace(&self, t: &mut Tracer, inputs: &[Traced]) -> StrataResult<TVec<Traced>> {
        let x = traced(inputs)?;
        let n = t.size(x, 0)?;
        let rest = t.konst(&[-1]);
        let target = t.pack(&[&n, &rest])?;
        let call = Call::op("view").input(x).input(&target);
        t.op(with_outputs(call, output_shapes(self, inputs)?))
    }
}

#[derive(Debug, Default)]
pub struct Sequential(pub Vec<Box<dyn Module>>);

impl Sequential {
    pub fn push(mut self, module: impl Module + 'static) -> Sequential {
        self.0.push(Box::new(module));
        self
    }
}

impl Module for Sequential {
    fn forward(&self, inputs: &[ArrayD<f32>]) -> StrataResult<Vec<ArrayD<f32>>> {
        let mut values = inputs.to_vec();
        for module in &self.0 {
            values = module.forward(&values)?;
        }
        Ok(values)
    }
}

impl Exportable for Sequential {
    fn name(&self) -> &str {
        "sequential"
    }

    fn trace(&self, t: &mut Tracer, inputs: &[Traced]) -> StrataResult<TVec<Traced>> {
        let mut values: TVec<Traced> = inputs.iter().cloned().collect();
        for module in &self.0 {
            values = module.trace(t, &values)?;
        }
        Ok(values)
    }
}
