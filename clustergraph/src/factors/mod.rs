mod categorical;
mod template;
pub(crate) mod tensor;

pub use categorical::Categorical;
pub use template::CategoricalTemplate;

use crate::Result;

/// Observed variables, mapping a variable name to the index of its observed value.
pub type Evidence = indexmap::IndexMap<String, usize>;

/// The operations the cluster graph needs from a factor.
///
/// All operations return new factors: a factor handed to a graph is never aliased by it.
pub trait Factor: Clone + std::fmt::Debug + Send + Sync {
    /// Ordered scope of the factor.
    fn var_names(&self) -> &[String];
    /// Cardinality of `var`, `None` if `var` is not in scope.
    fn cardinality(&self, var: &str) -> Option<usize>;
    /// Fix `vars` to `values`, removing them from the scope.
    /// Variables outside of the scope are ignored.
    fn reduce(&self, vars: &[String], values: &[usize]) -> Result<Self>;
    fn multiply(&self, other: &Self) -> Result<Self>;
    /// Division where zero divided by zero is zero.
    fn cancel(&self, other: &Self) -> Result<Self>;
    /// Sum out `vars` (or every variable except `vars` if `keep`).
    fn marginalize(&self, vars: &[String], keep: bool) -> Result<Self>;
    /// `D_KL(self || other)`, `self` being normalized first.
    fn kl_divergence(&self, other: &Self, normalize_other: bool) -> Result<f64>;
    /// KL-divergence from the uniform factor with the same scope.
    fn distance_from_vacuous(&self) -> Result<f64>;
}

/// Split the part of `evidence` that concerns `vars` into variables and values, in the order of
/// `vars`.
pub fn subset_evidence(evidence: &Evidence, vars: &[String]) -> (Vec<String>, Vec<usize>) {
    vars.iter()
        .filter_map(|v| evidence.get(v).map(|value| (v.clone(), *value)))
        .unzip()
}
