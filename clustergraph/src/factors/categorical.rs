//! Dense categorical factors stored as log-probability tensors.

use std::fmt;

use ndarray::{ArrayD, ArrayViewD, Axis, Dimension, IxDyn};
use ndarray_stats::QuantileExt;

use super::tensor::{self, logsumexp};
use super::Factor;
use crate::{CgError, Result};

/// Tolerance under which a negative KL-divergence is attributed to rounding errors.
const KL_NEG_TOL: f64 = 1e-5;
/// Distance from the uniform factor under which a factor is considered vacuous.
const VACUOUS_TOL: f64 = 1e-10;

/// A factor over discrete variables.
///
/// Axis `i` of the log-probability tensor corresponds to variable `var_names[i]`, and its length
/// is the cardinality of that variable. Zero probabilities are stored as `-inf`.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Categorical {
    var_names: Vec<String>,
    log_probs: ArrayD<f64>,
}

fn to_names<S: AsRef<str>>(vars: &[S]) -> Vec<String> {
    vars.iter().map(|v| v.as_ref().to_owned()).collect()
}

fn check_unique(var_names: &[String]) -> Result<()> {
    for (i, v) in var_names.iter().enumerate() {
        if var_names[..i].contains(v) {
            return Err(CgError::DuplicateVar(v.clone()));
        }
    }
    Ok(())
}

fn same_set(a: &[String], b: &[String]) -> bool {
    a.len() == b.len() && a.iter().all(|v| b.contains(v))
}

/// `numpy.isclose` for log values, with infinities only close to themselves.
fn log_close(a: f64, b: f64) -> bool {
    if a.is_infinite() || b.is_infinite() {
        return a == b;
    }
    (a - b).abs() <= 1e-8 + 1e-5 * b.abs()
}

impl Categorical {
    /// Build a factor from a table of (assignment, probability) pairs.
    /// Missing assignments have zero probability.
    ///
    /// Example:
    /// ```
    /// use clustergraph::Categorical;
    /// let rain_slip = Categorical::from_probs_table(
    ///     &["rain", "slip"],
    ///     &[2, 2],
    ///     [(vec![0, 0], 0.8), (vec![0, 1], 0.2), (vec![1, 0], 0.4), (vec![1, 1], 0.6)],
    /// )
    /// .unwrap();
    /// assert_eq!(rain_slip.cardinalities(), vec![2, 2]);
    /// ```
    pub fn from_probs_table<S, A>(
        var_names: &[S],
        cardinalities: &[usize],
        probs_table: impl IntoIterator<Item = (A, f64)>,
    ) -> Result<Self>
    where
        S: AsRef<str>,
        A: AsRef<[usize]>,
    {
        if cardinalities.len() != var_names.len() {
            return Err(CgError::CardinalitiesLength {
                cards: cardinalities.len(),
                vars: var_names.len(),
            });
        }
        let mut probs = ArrayD::<f64>::zeros(IxDyn(cardinalities));
        for (assignment, prob) in probs_table {
            let assignment = assignment.as_ref();
            let cell = if assignment.len() == cardinalities.len() {
                probs.get_mut(assignment)
            } else {
                None
            };
            let Some(cell) = cell else {
                return Err(CgError::AssignmentOutOfRange {
                    assignment: assignment.to_vec(),
                    cardinalities: cardinalities.to_vec(),
                });
            };
            if prob < 0.0 {
                return Err(CgError::NegativeProbability {
                    assignment: assignment.to_vec(),
                    prob,
                });
            }
            *cell = prob;
        }
        Self::from_probs(var_names, probs)
    }

    /// Build a factor from a dense probability tensor.
    pub fn from_probs<S: AsRef<str>>(var_names: &[S], probs: ArrayD<f64>) -> Result<Self> {
        if let Some((idx, prob)) = probs.indexed_iter().find(|(_, p)| **p < 0.0) {
            return Err(CgError::NegativeProbability {
                assignment: idx.slice().to_vec(),
                prob: *prob,
            });
        }
        Self::from_log_probs(var_names, probs.mapv(f64::ln))
    }

    /// Build a factor from a log-probability tensor; cardinalities are given by its shape.
    pub fn from_log_probs<S: AsRef<str>>(var_names: &[S], log_probs: ArrayD<f64>) -> Result<Self> {
        let var_names = to_names(var_names);
        if log_probs.ndim() != var_names.len() {
            return Err(CgError::RankMismatch {
                expected: var_names.len(),
                got: log_probs.ndim(),
            });
        }
        check_unique(&var_names)?;
        Ok(Self {
            var_names,
            log_probs: log_probs.as_standard_layout().into_owned(),
        })
    }

    fn from_parts(var_names: Vec<String>, log_probs: ArrayD<f64>) -> Self {
        debug_assert_eq!(var_names.len(), log_probs.ndim());
        Self {
            var_names,
            log_probs,
        }
    }

    pub fn var_names(&self) -> &[String] {
        &self.var_names
    }
    pub fn cardinalities(&self) -> Vec<usize> {
        self.log_probs.shape().to_vec()
    }
    pub fn cardinality(&self, var: &str) -> Option<usize> {
        self.var_index(var).map(|i| self.log_probs.shape()[i])
    }
    pub fn log_probs(&self) -> ArrayViewD<f64> {
        self.log_probs.view()
    }
    fn var_index(&self, var: &str) -> Option<usize> {
        self.var_names.iter().position(|v| v == var)
    }

    /// The same factor with its axes in `new_order`.
    ///
    /// ```text
    /// a b P(a,b)  reorder([b, a])  b a P(a,b)
    /// 0 0 pa0b0                    0 0 pa0b0
    /// 0 1 pa0b1                    0 1 pa1b0
    /// 1 0 pa1b0                    1 0 pa0b1
    /// 1 1 pa1b1                    1 1 pa1b1
    /// ```
    pub fn reorder<S: AsRef<str>>(&self, new_order: &[S]) -> Result<Self> {
        let new_order = to_names(new_order);
        if new_order == self.var_names {
            return Ok(self.clone());
        }
        if !same_set(&new_order, &self.var_names) {
            return Err(CgError::VarSetMismatch {
                left: self.var_names.clone(),
                right: new_order,
            });
        }
        let perm: Vec<usize> = new_order
            .iter()
            .filter_map(|v| self.var_index(v))
            .collect();
        let log_probs = self
            .log_probs
            .view()
            .permuted_axes(perm)
            .as_standard_layout()
            .into_owned();
        Ok(Self::from_parts(new_order, log_probs))
    }

    /// Same scope (in any order) and numerically close log-probabilities.
    pub fn equals(&self, other: &Categorical) -> bool {
        if !same_set(&self.var_names, &other.var_names) {
            return false;
        }
        match other.reorder(&self.var_names) {
            Ok(other) => {
                self.log_probs.shape() == other.log_probs.shape()
                    && self
                        .log_probs
                        .iter()
                        .zip(other.log_probs.iter())
                        .all(|(a, b)| log_close(*a, *b))
            }
            Err(_) => false,
        }
    }

    fn combine<F>(&self, other: &Categorical, f: F) -> Result<Self>
    where
        F: Fn(f64, f64) -> f64,
    {
        let aligned = tensor::align(
            self.log_probs.view(),
            &self.var_names,
            other.log_probs.view(),
            &other.var_names,
        )?;
        let log_probs = aligned.map(f);
        Ok(Self::from_parts(aligned.vars, log_probs))
    }

    pub fn multiply(&self, other: &Categorical) -> Result<Self> {
        self.combine(other, |a, b| a + b)
    }

    /// Plain division: zero divided by zero is undefined (NaN).
    pub fn divide(&self, other: &Categorical) -> Result<Self> {
        self.combine(other, |a, b| a - b)
    }

    /// Division where `0/0 = 0`.
    ///
    /// A zero-probability cell of `other` may only be cancelled from a zero-probability cell of
    /// `self`: once a zero message has been multiplied into a belief, dividing it out again must
    /// leave the zero in place. A non-zero cell divided by zero is reported as an error.
    pub fn cancel(&self, other: &Categorical) -> Result<Self> {
        let aligned = tensor::align(
            self.log_probs.view(),
            &self.var_names,
            other.log_probs.view(),
            &other.var_names,
        )?;
        let log_probs = aligned.try_map(|idx, a, b| {
            if b == f64::NEG_INFINITY {
                if a == f64::NEG_INFINITY {
                    Ok(f64::NEG_INFINITY)
                } else {
                    Err(CgError::InconsistentCancel(idx.to_vec()))
                }
            } else {
                Ok(a - b)
            }
        })?;
        Ok(Self::from_parts(aligned.vars, log_probs))
    }

    /// Sum out `vars`, or every variable except `vars` if `keep`.
    /// The remaining variables keep their relative order.
    pub fn marginalize<S: AsRef<str>>(&self, vars: &[S], keep: bool) -> Result<Self> {
        for v in vars {
            if self.var_index(v.as_ref()).is_none() {
                return Err(CgError::UnknownVar(v.as_ref().to_owned()));
            }
        }
        let listed = |v: &String| vars.iter().any(|x| x.as_ref() == v);
        let (kept, summed): (Vec<usize>, Vec<usize>) =
            (0..self.var_names.len()).partition(|i| listed(&self.var_names[*i]) == keep);
        let log_probs = tensor::logsumexp_axes(self.log_probs.view(), &summed);
        let var_names = kept.iter().map(|i| self.var_names[*i].clone()).collect();
        Ok(Self::from_parts(var_names, log_probs))
    }

    /// Observe `vars` to have `values`. Variables outside of the scope are ignored.
    pub fn reduce<S: AsRef<str>>(&self, vars: &[S], values: &[usize]) -> Result<Self> {
        if vars.len() != values.len() {
            return Err(CgError::EvidenceLength {
                vars: vars.len(),
                values: values.len(),
            });
        }
        let mut observed: Vec<(usize, usize)> = Vec::with_capacity(vars.len());
        for (var, value) in vars.iter().zip(values.iter()) {
            if let Some(i) = self.var_index(var.as_ref()) {
                let card = self.log_probs.shape()[i];
                if *value >= card {
                    return Err(CgError::EvidenceOutOfRange {
                        var: var.as_ref().to_owned(),
                        value: *value,
                        card,
                    });
                }
                if observed.iter().all(|(j, _)| *j != i) {
                    observed.push((i, *value));
                }
            }
        }
        observed.sort_unstable();
        let mut log_probs = self.log_probs.view();
        for (i, value) in observed.iter().rev() {
            log_probs = log_probs.index_axis_move(Axis(*i), *value);
        }
        let var_names = self
            .var_names
            .iter()
            .enumerate()
            .filter(|(i, _)| observed.iter().all(|(j, _)| j != i))
            .map(|(_, v)| v.clone())
            .collect();
        Ok(Self::from_parts(var_names, log_probs.to_owned()))
    }

    /// Assignment with the largest probability.
    pub fn argmax(&self) -> Vec<usize> {
        match self.log_probs.argmax() {
            Ok(idx) => idx.slice().to_vec(),
            // Only reachable with NaN entries.
            Err(_) => vec![0; self.var_names.len()],
        }
    }

    /// Copy of the factor scaled so that its probabilities sum to one.
    /// A factor with zero total mass is returned unchanged.
    pub fn normalize(&self) -> Self {
        let logz = logsumexp(self.log_probs.iter());
        if logz == f64::NEG_INFINITY {
            return self.clone();
        }
        Self::from_parts(self.var_names.clone(), self.log_probs.mapv(|x| x - logz))
    }

    /// Whether the factor is (after normalization) the uniform distribution.
    pub fn is_vacuous(&self) -> Result<bool> {
        Ok(self.distance_from_vacuous()? < VACUOUS_TOL)
    }

    /// `D_KL(P||Q)` between `P`, the normalized version of this factor, and `Q`, `other`
    /// (normalized if `normalize_other`).
    ///
    /// Cells where `P` is zero contribute nothing. Negative results within `1e-5` of zero are
    /// rounding errors and return 0, larger negative results are errors.
    pub fn kl_divergence(&self, other: &Categorical, normalize_other: bool) -> Result<f64> {
        let other = other.reorder(&self.var_names)?;
        let mismatch = self
            .var_names
            .iter()
            .zip(self.log_probs.shape().iter().zip(other.log_probs.shape()))
            .find(|(_, (a, b))| a != b);
        if let Some((var, (left, right))) = mismatch {
            return Err(CgError::CardinalityMismatch {
                var: var.clone(),
                left: *left,
                right: *right,
            });
        }
        let log_p = self.normalize().log_probs;
        let log_q = if normalize_other {
            other.normalize().log_probs
        } else {
            other.log_probs
        };
        let kld: f64 = log_p
            .iter()
            .zip(log_q.iter())
            .filter(|(lp, _)| **lp != f64::NEG_INFINITY)
            .map(|(lp, lq)| lp.exp() * (lp - lq))
            .sum();
        if kld < 0.0 {
            if kld > -KL_NEG_TOL {
                return Ok(0.0);
            }
            return Err(CgError::NegativeKlDivergence(kld));
        }
        Ok(kld)
    }

    /// KL-divergence between this factor and the uniform distribution over its scope.
    pub fn distance_from_vacuous(&self) -> Result<f64> {
        let uniform_log_prob = -(self.log_probs.len() as f64).ln();
        let uniform = Self::from_parts(
            self.var_names.clone(),
            ArrayD::from_elem(self.log_probs.raw_dim(), uniform_log_prob),
        );
        self.kl_divergence(&uniform, false)
    }

    /// Log-probability of a full assignment of the scope, given in the order of `vars`.
    pub fn potential<S: AsRef<str>>(&self, vars: &[S], assignment: &[usize]) -> Result<f64> {
        let vars = to_names(vars);
        if !same_set(&vars, &self.var_names) {
            return Err(CgError::VarSetMismatch {
                left: self.var_names.clone(),
                right: vars,
            });
        }
        if assignment.len() != vars.len() {
            return Err(CgError::EvidenceLength {
                vars: vars.len(),
                values: assignment.len(),
            });
        }
        let index: Vec<usize> = self
            .var_names
            .iter()
            .filter_map(|v| vars.iter().position(|x| x == v).map(|i| assignment[i]))
            .collect();
        self.log_probs
            .get(index.as_slice())
            .copied()
            .ok_or_else(|| CgError::AssignmentOutOfRange {
                assignment: assignment.to_vec(),
                cardinalities: self.cardinalities(),
            })
    }
}

impl Factor for Categorical {
    fn var_names(&self) -> &[String] {
        Categorical::var_names(self)
    }
    fn cardinality(&self, var: &str) -> Option<usize> {
        Categorical::cardinality(self, var)
    }
    fn reduce(&self, vars: &[String], values: &[usize]) -> Result<Self> {
        Categorical::reduce(self, vars, values)
    }
    fn multiply(&self, other: &Self) -> Result<Self> {
        Categorical::multiply(self, other)
    }
    fn cancel(&self, other: &Self) -> Result<Self> {
        Categorical::cancel(self, other)
    }
    fn marginalize(&self, vars: &[String], keep: bool) -> Result<Self> {
        Categorical::marginalize(self, vars, keep)
    }
    fn kl_divergence(&self, other: &Self, normalize_other: bool) -> Result<f64> {
        Categorical::kl_divergence(self, other, normalize_other)
    }
    fn distance_from_vacuous(&self) -> Result<f64> {
        Categorical::distance_from_vacuous(self)
    }
}

impl fmt::Display for Categorical {
    /// One line per assignment, with its probability.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{:?}   prob", self.var_names)?;
        for (idx, log_prob) in self.log_probs.indexed_iter() {
            writeln!(f, "{:?}   {}", idx.slice(), log_prob.exp())?;
        }
        Ok(())
    }
}
