//! Elementwise operations on tensors whose axes are named by variables.
//!
//! Two tensors are combined over the union of their scopes: the result scope is the scope of the
//! left operand followed by the variables only found in the right operand. Shared axes are lined
//! up, missing axes are inserted with length 1 and broadcast.

use ndarray::{ArrayD, ArrayViewD, Axis, Dimension, IxDyn, Zip};

use crate::{CgError, Result};

/// Two tensor views expanded to the same rank over a common scope.
#[derive(Debug)]
pub(crate) struct Aligned<'a> {
    pub(crate) vars: Vec<String>,
    pub(crate) shape: Vec<usize>,
    pub(crate) left: ArrayViewD<'a, f64>,
    pub(crate) right: ArrayViewD<'a, f64>,
}

/// Align `right` on `left`.
///
/// Fails if a shared variable has a different cardinality in the two tensors.
pub(crate) fn align<'a>(
    left: ArrayViewD<'a, f64>,
    left_vars: &[String],
    right: ArrayViewD<'a, f64>,
    right_vars: &[String],
) -> Result<Aligned<'a>> {
    let mut vars = left_vars.to_vec();
    let mut shape = left.shape().to_vec();
    for (i, var) in left_vars.iter().enumerate() {
        if let Some(j) = right_vars.iter().position(|v| v == var) {
            if right.shape()[j] != shape[i] {
                return Err(CgError::CardinalityMismatch {
                    var: var.clone(),
                    left: shape[i],
                    right: right.shape()[j],
                });
            }
        }
    }
    for (j, var) in right_vars.iter().enumerate() {
        if !left_vars.contains(var) {
            vars.push(var.clone());
            shape.push(right.shape()[j]);
        }
    }

    let mut left = left;
    while left.ndim() < vars.len() {
        let n = left.ndim();
        left = left.insert_axis(Axis(n));
    }

    // Order the axes of right as in the result, then insert the axes it lacks.
    let perm: Vec<usize> = vars
        .iter()
        .filter_map(|v| right_vars.iter().position(|r| r == v))
        .collect();
    let mut right = right.permuted_axes(perm);
    for (i, var) in vars.iter().enumerate() {
        if !right_vars.contains(var) {
            right = right.insert_axis(Axis(i));
        }
    }

    Ok(Aligned {
        vars,
        shape,
        left,
        right,
    })
}

impl Aligned<'_> {
    /// Apply `f` elementwise over the broadcast tensors.
    pub(crate) fn map<F>(&self, f: F) -> ArrayD<f64>
    where
        F: Fn(f64, f64) -> f64,
    {
        let shape = IxDyn(&self.shape);
        let left = self.left.broadcast(shape.clone()).expect("aligned left tensor");
        let right = self.right.broadcast(shape).expect("aligned right tensor");
        Zip::from(&left).and(&right).map_collect(|l, r| f(*l, *r))
    }

    /// Apply `f` elementwise, failing with the first error returned by `f`.
    /// `f` receives the index of the current cell.
    pub(crate) fn try_map<F>(&self, f: F) -> Result<ArrayD<f64>>
    where
        F: Fn(&[usize], f64, f64) -> Result<f64>,
    {
        let shape = IxDyn(&self.shape);
        let left = self.left.broadcast(shape.clone()).expect("aligned left tensor");
        let right = self.right.broadcast(shape).expect("aligned right tensor");
        let mut first_err = None;
        let res = Zip::indexed(&left).and(&right).map_collect(|idx, l, r| {
            match f(idx.slice(), *l, *r) {
                Ok(x) => x,
                Err(e) => {
                    first_err.get_or_insert(e);
                    f64::NAN
                }
            }
        });
        match first_err {
            Some(e) => Err(e),
            None => Ok(res),
        }
    }
}

/// `log(sum(exp(x)))`, stable for large magnitudes and for all `-inf` inputs.
pub(crate) fn logsumexp<'a>(values: impl IntoIterator<Item = &'a f64> + Clone) -> f64 {
    let max = values
        .clone()
        .into_iter()
        .cloned()
        .fold(f64::NEG_INFINITY, f64::max);
    if max.is_infinite() {
        return max;
    }
    max + values
        .into_iter()
        .map(|x| (x - max).exp())
        .sum::<f64>()
        .ln()
}

/// Sum out the given axes in log space.
pub(crate) fn logsumexp_axes(tensor: ArrayViewD<f64>, axes: &[usize]) -> ArrayD<f64> {
    let mut axes = axes.to_vec();
    axes.sort_unstable();
    let mut res = tensor.to_owned();
    // Highest axis first so that the remaining indices stay valid.
    for ax in axes.into_iter().rev() {
        res = res.map_axis(Axis(ax), |lane| logsumexp(lane.iter()));
    }
    res
}
