//! Reference executor for translated networks.
//!
//! Straightforward loops over `ndarray` values, one function per layer type.
//! Output shapes are taken from the network shape table and checked.
//! Recurrent layers run forward only, with ONNX gate order and the sequence
//! output laid out `[seq, batch, hidden]`.

use std::collections::HashMap;

use anyhow::{Context, bail, ensure, format_err};
use ndarray::{Array1, Array2, Array3, Array4, ArrayD, ArrayView4, Axis, Ix2, Ix3, Ix4, IxDyn, s};
use strata_convert::caffe::eltwise_parameter::EltwiseOp;
use strata_convert::caffe::interp_parameter::Mode;
use strata_convert::caffe::pooling_parameter::PoolMethod;
use strata_convert::caffe::{self, BlobProto};
use strata_convert::layer::Activation;
use strata_convert::prelude::*;

pub type Blobs = HashMap<String, ArrayD<f32>>;

/// Runs the network on named inputs, returning every computed blob.
pub fn run(network: &Network, inputs: Vec<(&str, ArrayD<f32>)>) -> StrataResult<Blobs> {
    let mut blobs: Blobs = inputs.into_iter().map(|(n, a)| (n.to_string(), a)).collect();
    for name in &network.inputs {
        let Some(value) = blobs.get(name) else { bail!("No value for network input {}", name) };
        let declared = network.shapes.get(name)?;
        ensure!(value.shape() == &**declared, "Input {} is {:?}, expected {:?}", name, value.shape(), declared);
    }
    for layer in &network.layers {
        let tops = {
            let bottoms = layer
                .bottom
                .iter()
                .map(|b| blobs.get(b).ok_or_else(|| format_err!("Blob {} not computed", b)))
                .collect::<StrataResult<Vec<_>>>()?;
            eval(network, layer, &bottoms).with_context(|| format!("Evaluating {layer}"))?
        };
        ensure!(tops.len() == layer.top.len(), "{} computed {} tops", layer, tops.len());
        for (name, value) in layer.top.iter().zip(tops) {
            let declared = network.shapes.get(name)?;
            ensure!(
                value.shape() == &**declared,
                "{}: top {} is {:?}, shape table says {:?}",
                layer,
                name,
                value.shape(),
                declared
            );
            trace!("{} -> {} {:?}", layer.name, name, value.shape());
            blobs.insert(name.clone(), value);
        }
    }
    Ok(blobs)
}

fn blob(layer: &LayerDescriptor, ix: usize) -> StrataResult<ArrayD<f32>> {
    let Some(BlobProto { shape: Some(shape), data }) = layer.blobs.get(ix) else {
        bail!("{} has no blob #{}", layer, ix)
    };
    let dims: Vec<usize> = shape.dim.iter().map(|&d| d as usize).collect();
    Ok(ArrayD::from_shape_vec(IxDyn(&dims), data.clone())?)
}

fn eval(network: &Network, layer: &LayerDescriptor, bottoms: &[&ArrayD<f32>]) -> StrataResult<Vec<ArrayD<f32>>> {
    let Some(&x) = bottoms.first() else { bail!("{} has no bottom", layer) };
    match &layer.param {
        LayerParam::Lstm(p) => return recurrent(layer, bottoms, p, false),
        LayerParam::Gru(p) => return recurrent(layer, bottoms, p, true),
        _ => (),
    }
    let y = match &layer.param {
        LayerParam::Relu(p) => {
            let slope = p.negative_slope;
            x.mapv(|v| if v < 0.0 { v * slope } else { v })
        }
        LayerParam::Activation(Activation::Sigmoid) => x.mapv(|v| 1.0 / (1.0 + (-v).exp())),
        LayerParam::Activation(Activation::TanH) => x.mapv(f32::tanh),
        LayerParam::Activation(Activation::HSwish) => x.mapv(|v| v * (v + 3.0).min(6.0).max(0.0) / 6.0),
        LayerParam::Dropout(_) => x.clone(),
        LayerParam::Permute(p) => {
            let order: Vec<usize> = p.order.iter().map(|&o| o as usize).collect();
            x.clone().permuted_axes(IxDyn(&order)).as_standard_layout().into_owned()
        }
        LayerParam::Reverse(p) => {
            let mut y = x.clone();
            for &axis in &p.axis {
                y.invert_axis(Axis(axis as usize));
            }
            y.as_standard_layout().into_owned()
        }
        LayerParam::Reshape(_) | LayerParam::Flatten(_) => {
            let shape = network.shapes.get(&layer.top[0])?;
            x.as_standard_layout().into_owned().into_shape_with_order(IxDyn(shape))?
        }
        LayerParam::Eltwise(p) => eltwise(p.operation(), bottoms)?,
        LayerParam::Convolution(p) => {
            let bias = if p.bias_term { Some(blob(layer, 1)?) } else { None };
            convolution(x.view().into_dimensionality()?, &blob(layer, 0)?, bias.as_ref(), p)?.into_dyn()
        }
        LayerParam::InnerProduct(p) => inner_product(x, &blob(layer, 0)?, p, layer)?,
        LayerParam::Pooling(p) => pooling(x.view().into_dimensionality()?, p)?.into_dyn(),
        LayerParam::GroupNorm(p) => {
            let affine = if layer.blobs.len() == 2 { Some((blob(layer, 0)?, blob(layer, 1)?)) } else { None };
            group_norm(x, p, affine)?
        }
        LayerParam::Interp(p) => interp(x.view().into_dimensionality()?, p)?.into_dyn(),
        LayerParam::Softmax(p) => softmax(x, p.axis as usize),
        _ => bail!("No reference implementation for {} layers", layer.layer_type()),
    };
    Ok(vec![y])
}

fn sigmoid(v: f32) -> f32 {
    1.0 / (1.0 + (-v).exp())
}

/// Single-direction LSTM (gates i, o, f, c) or GRU (gates z, r, h).
/// Bottoms are X, then the optional initial states.
fn recurrent(
    layer: &LayerDescriptor,
    bottoms: &[&ArrayD<f32>],
    p: &caffe::RecurrentParameter,
    gru: bool,
) -> StrataResult<Vec<ArrayD<f32>>> {
    let x = bottoms[0].view().into_dimensionality::<Ix3>()?;
    let (seq, batch, _) = x.dim();
    let hidden = p.num_output as usize;
    let gates = if gru { 3 } else { 4 };
    let w = blob(layer, 0)?.index_axis_move(Axis(0), 0).into_dimensionality::<Ix2>()?;
    let r = blob(layer, 1)?.index_axis_move(Axis(0), 0).into_dimensionality::<Ix2>()?;
    ensure!(
        w.nrows() == gates * hidden && r.dim() == (gates * hidden, hidden),
        "{}: W {:?} and R {:?} do not match {} gates of {}",
        layer,
        w.dim(),
        r.dim(),
        gates,
        hidden
    );
    let bias = match layer.blobs.get(2) {
        Some(b) => {
            ensure!(b.data.len() == 2 * gates * hidden, "{}: bias of {} values", layer, b.data.len());
            Array1::from_vec(b.data.clone())
        }
        None => Array1::zeros(2 * gates * hidden),
    };
    let (wb, rb) = bias.view().split_at(Axis(0), gates * hidden);
    let initial = |ix: usize| -> StrataResult<Array2<f32>> {
        match bottoms.get(ix) {
            Some(state) => Ok(state.view().into_dimensionality::<Ix3>()?.index_axis(Axis(0), 0).to_owned()),
            None => Ok(Array2::zeros((batch, hidden))),
        }
    };
    let mut h = initial(1)?;
    let mut c = if gru { Array2::zeros((batch, hidden)) } else { initial(2)? };
    let gate = |a: &Array2<f32>, k: usize| a.slice(s![.., k * hidden..(k + 1) * hidden]).to_owned();
    let mut y = Array3::<f32>::zeros((seq, batch, hidden));
    for t in 0..seq {
        let xw = x.index_axis(Axis(0), t).dot(&w.t()) + &wb;
        let hr = h.dot(&r.t()) + &rb;
        if gru {
            let z = (gate(&xw, 0) + &gate(&hr, 0)).mapv(sigmoid);
            let reset = (gate(&xw, 1) + &gate(&hr, 1)).mapv(sigmoid);
            let candidate = if p.linear_before_reset {
                gate(&xw, 2) + &(&reset * &gate(&hr, 2))
            } else {
                let rh = r.slice(s![2 * hidden.., ..]);
                gate(&xw, 2) + &(&reset * &h).dot(&rh.t()) + &rb.slice(s![2 * hidden..])
            }
            .mapv(f32::tanh);
            h = (1.0 - &z) * &candidate + &z * &h;
        } else {
            let g = &xw + &hr;
            let input = gate(&g, 0).mapv(sigmoid);
            let output = gate(&g, 1).mapv(sigmoid);
            let forget = gate(&g, 2).mapv(sigmoid);
            let cell = gate(&g, 3).mapv(f32::tanh);
            c = &forget * &c + &input * &cell;
            h = &output * &c.mapv(f32::tanh);
        }
        y.index_axis_mut(Axis(0), t).assign(&h);
    }
    let outputs = [y.into_dyn(), h.insert_axis(Axis(0)).into_dyn(), c.insert_axis(Axis(0)).into_dyn()];
    Ok(outputs.into_iter().take(layer.top.len()).collect())
}

fn eltwise(op: EltwiseOp, bottoms: &[&ArrayD<f32>]) -> StrataResult<ArrayD<f32>> {
    let mut acc = bottoms[0].clone();
    for other in &bottoms[1..] {
        ensure!(acc.shape() == other.shape(), "Eltwise on {:?} and {:?}", acc.shape(), other.shape());
        acc.zip_mut_with(other, |a, &b| {
            *a = match op {
                EltwiseOp::Sum => *a + b,
                EltwiseOp::Prod => *a * b,
                EltwiseOp::Max => a.max(b),
            }
        });
    }
    Ok(acc)
}

fn convolution(
    x: ArrayView4<f32>,
    w: &ArrayD<f32>,
    bias: Option<&ArrayD<f32>>,
    p: &caffe::ConvolutionParameter,
) -> StrataResult<Array4<f32>> {
    let w = w.view().into_dimensionality::<Ix4>()?;
    let (n, _, h, wd) = x.dim();
    let (o, cg, kh, kw) = w.dim();
    let (sh, sw) = (p.stride_h as usize, p.stride_w as usize);
    let (ph, pw) = (p.pad_h as usize, p.pad_w as usize);
    let (dh, dw) = (p.dilation[0] as usize, p.dilation[1] as usize);
    let oh = (h + 2 * ph - dh * (kh - 1) - 1) / sh + 1;
    let ow = (wd + 2 * pw - dw * (kw - 1) - 1) / sw + 1;
    let group_out = o / p.group as usize;
    let mut padded = Array4::<f32>::zeros((n, x.dim().1, h + 2 * ph, wd + 2 * pw));
    padded.slice_mut(ndarray::s![.., .., ph..ph + h, pw..pw + wd]).assign(&x);
    let mut y = Array4::<f32>::zeros((n, o, oh, ow));
    for b in 0..n {
        for oc in 0..o {
            let first = (oc / group_out) * cg;
            let shift = bias.map(|bias| bias[[oc]]).unwrap_or(0.0);
            for oy in 0..oh {
                for ox in 0..ow {
                    let mut sum = shift;
                    for ((ic, ky, kx), &k) in w.index_axis(Axis(0), oc).indexed_iter() {
                        sum += k * padded[[b, first + ic, oy * sh + ky * dh, ox * sw + kx * dw]];
                    }
                    y[[b, oc, oy, ox]] = sum;
                }
            }
        }
    }
    Ok(y)
}

fn inner_product(
    x: &ArrayD<f32>,
    w: &ArrayD<f32>,
    p: &caffe::InnerProductParameter,
    layer: &LayerDescriptor,
) -> StrataResult<ArrayD<f32>> {
    let n = x.shape()[0];
    let x = x.as_standard_layout().into_owned().into_shape_with_order((n, x.len() / n))?;
    let w = w.view().into_dimensionality::<ndarray::Ix2>()?;
    let mut y: Array2<f32> = x.dot(&w.t());
    if p.bias_term {
        y += &blob(layer, 1)?.into_dimensionality::<ndarray::Ix1>()?;
    }
    Ok(y.into_dyn())
}

fn pooling(x: ArrayView4<f32>, p: &caffe::PoolingParameter) -> StrataResult<Array4<f32>> {
    let (n, c, h, w) = x.dim();
    let max = p.pool() == PoolMethod::Max;
    if p.global_pooling {
        return Ok(Array4::from_shape_fn((n, c, 1, 1), |(b, ch, _, _)| {
            let plane = x.slice(ndarray::s![b, ch, .., ..]);
            if max { plane.fold(f32::NEG_INFINITY, |a, &v| a.max(v)) } else { plane.sum() / plane.len() as f32 }
        }));
    }
    let (kh, kw) = (p.kernel_h as usize, p.kernel_w as usize);
    let (sh, sw) = (p.stride_h as usize, p.stride_w as usize);
    let (ph, pw) = (p.pad_h as usize, p.pad_w as usize);
    let extent = |input: usize, k: usize, s: usize, pad: usize| {
        let span = input + 2 * pad - k;
        let mut out = if p.ceil_mode { span.div_ceil(s) + 1 } else { span / s + 1 };
        if pad > 0 && (out - 1) * s >= input + pad {
            out -= 1;
        }
        out
    };
    let (oh, ow) = (extent(h, kh, sh, ph), extent(w, kw, sw, pw));
    Ok(Array4::from_shape_fn((n, c, oh, ow), |(b, ch, oy, ox)| {
        let y0 = (oy * sh) as isize - ph as isize;
        let x0 = (ox * sw) as isize - pw as isize;
        let mut acc = if max { f32::NEG_INFINITY } else { 0.0 };
        for y in y0.max(0)..(y0 + kh as isize).min(h as isize) {
            for x_ in x0.max(0)..(x0 + kw as isize).min(w as isize) {
                let v = x[[b, ch, y as usize, x_ as usize]];
                acc = if max { acc.max(v) } else { acc + v };
            }
        }
        if max {
            acc
        } else {
            // padded area counts, clipped at the padded border
            let ye = (y0 + kh as isize).min(h as isize + ph as isize);
            let xe = (x0 + kw as isize).min(w as isize + pw as isize);
            acc / ((ye - y0) * (xe - x0)) as f32
        }
    }))
}

fn group_norm(
    x: &ArrayD<f32>,
    p: &caffe::GroupNormParameter,
    affine: Option<(ArrayD<f32>, ArrayD<f32>)>,
) -> StrataResult<ArrayD<f32>> {
    let (n, c) = (x.shape()[0], x.shape()[1]);
    let groups = p.num_groups as usize;
    ensure!(c % groups == 0, "{} channels in {} groups", c, groups);
    let mut y = x.as_standard_layout().into_owned().into_shape_with_order((n * groups, x.len() / n / groups))?;
    for mut row in y.rows_mut() {
        let mean = row.mean().unwrap_or(0.0);
        let var = row.mapv(|v| (v - mean).powi(2)).mean().unwrap_or(0.0);
        let scale = 1.0 / (var + p.eps).sqrt();
        row.mapv_inplace(|v| (v - mean) * scale);
    }
    let mut y = y.into_shape_with_order(x.raw_dim())?;
    if let Some((weight, bias)) = affine {
        for (ix, v) in y.indexed_iter_mut() {
            *v = *v * weight[[ix[1]]] + bias[[ix[1]]];
        }
    }
    Ok(y)
}

fn interp(x: ArrayView4<f32>, p: &caffe::InterpParameter) -> StrataResult<Array4<f32>> {
    let (n, c, h, w) = x.dim();
    let (oh, ow) = (p.height as usize, p.width as usize);
    let nearest = p.mode() == Mode::Nearest;
    let coord = |dst: usize, input: usize, output: usize| -> f32 {
        if p.align_corners && output > 1 {
            dst as f32 * (input - 1) as f32 / (output - 1) as f32
        } else if nearest {
            ((dst * input) / output) as f32
        } else {
            ((dst as f32 + 0.5) * input as f32 / output as f32 - 0.5).max(0.0)
        }
    };
    Ok(Array4::from_shape_fn((n, c, oh, ow), |(b, ch, oy, ox)| {
        let (sy, sx) = (coord(oy, h, oh), coord(ox, w, ow));
        let (y0, x0) = ((sy as usize).min(h - 1), (sx as usize).min(w - 1));
        if nearest {
            return x[[b, ch, y0, x0]];
        }
        let (y1, x1) = ((y0 + 1).min(h - 1), (x0 + 1).min(w - 1));
        let (ly, lx) = (sy - y0 as f32, sx - x0 as f32);
        (1.0 - ly) * ((1.0 - lx) * x[[b, ch, y0, x0]] + lx * x[[b, ch, y0, x1]])
            + ly * ((1.0 - lx) * x[[b, ch, y1, x0]] + lx * x[[b, ch, y1, x1]])
    }))
}

fn softmax(x: &ArrayD<f32>, axis: usize) -> ArrayD<f32> {
    let mut y = x.clone();
    for mut lane in y.lanes_mut(Axis(axis)) {
        let max = lane.fold(f32::NEG_INFINITY, |a, &v| a.max(v));
        lane.mapv_inplace(|v| (v - max).exp());
        let sum = lane.sum();
        lane.mapv_inplace(|v| v / sum);
    }
    y
}

#[cfg(test)]
mod test {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn softmax_rows_sum_to_one() {
        let x = ArrayD::from_shape_vec(IxDyn(&[2, 3]), vec![1.0, 2.0, 3.0, -1.0, 0.0, 1.0]).unwrap();
        let y = softmax(&x, 1);
        for row in y.rows() {
            assert_abs_diff_eq!(row.sum(), 1.0, epsilon = 1e-6);
        }
        assert_abs_diff_eq!(y[[0, 2]], y[[1, 2]], epsilon = 1e-6);
    }

    fn recurrent_layer(param: LayerParam, gates: usize, tops: &[&str]) -> LayerDescriptor {
        let zeros = |dim: &[i64]| BlobProto {
            shape: Some(caffe::BlobShape { dim: dim.to_vec() }),
            data: vec![0.0; dim.iter().product::<i64>() as usize],
        };
        let g = (gates * 2) as i64;
        let mut layer = LayerDescriptor::new(
            "rnn".to_string(),
            ["x", "h0", "c0"].iter().map(|s| s.to_string()).collect(),
            tops.iter().map(|s| s.to_string()).collect(),
            param,
        );
        layer.blobs = vec![zeros(&[1, g, 3]), zeros(&[1, g, 2]), zeros(&[1, 2 * g])];
        layer
    }

    #[test]
    fn lstm_with_null_weights_halves_the_cell() {
        let p = caffe::RecurrentParameter { num_output: 2, expose_hidden: true, linear_before_reset: false };
        let layer = recurrent_layer(LayerParam::Lstm(p.clone()), 4, &["y", "y_h", "y_c"]);
        let x = ArrayD::<f32>::ones(IxDyn(&[2, 1, 3]));
        let h0 = ArrayD::<f32>::zeros(IxDyn(&[1, 1, 2]));
        let c0 = ArrayD::<f32>::ones(IxDyn(&[1, 1, 2]));
        let out = recurrent(&layer, &[&x, &h0, &c0], &p, false).unwrap();
        assert_eq!(out.len(), 3);
        assert_eq!(out[0].shape(), &[2, 1, 2]);
        // every gate is sigmoid(0) and the candidate is tanh(0)
        assert_abs_diff_eq!(out[2][[0, 0, 0]], 0.25, epsilon = 1e-6);
        assert_abs_diff_eq!(out[1][[0, 0, 1]], 0.5 * 0.25f32.tanh(), epsilon = 1e-6);
        assert_abs_diff_eq!(out[0][[0, 0, 0]], 0.5 * 0.5f32.tanh(), epsilon = 1e-6);
    }

    #[test]
    fn gru_with_null_weights_decays_the_state() {
        for linear_before_reset in [false, true] {
            let p = caffe::RecurrentParameter { num_output: 2, expose_hidden: true, linear_before_reset };
            let layer = recurrent_layer(LayerParam::Gru(p.clone()), 3, &["y", "y_h"]);
            let x = ArrayD::<f32>::ones(IxDyn(&[3, 1, 3]));
            let h0 = ArrayD::from_elem(IxDyn(&[1, 1, 2]), 8.0f32);
            let out = recurrent(&layer, &[&x, &h0], &p, true).unwrap();
            assert_eq!(out.len(), 2);
            assert_abs_diff_eq!(out[0][[0, 0, 0]], 4.0, epsilon = 1e-6);
            assert_abs_diff_eq!(out[1][[0, 0, 1]], 1.0, epsilon = 1e-6);
        }
    }

    #[test]
    fn average_pool_counts_padding() {
        let x = Array4::<f32>::ones((1, 1, 2, 2));
        let p = caffe::PoolingParameter {
            pool: PoolMethod::Ave as i32,
            kernel_h: 2,
            kernel_w: 2,
            stride_h: 2,
            stride_w: 2,
            pad_h: 1,
            pad_w: 1,
            ..Default::default()
        };
        let y = pooling(x.view(), &p).unwrap();
        assert_eq!(y.dim(), (1, 1, 2, 2));
        assert_abs_diff_eq!(y[[0, 0, 0, 0]], 0.25);
    }
}
