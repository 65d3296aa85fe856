use indexmap::IndexMap;

use super::Categorical;
use crate::Result;

/// A factor with a fixed table and variable names left to be filled in.
///
/// Variable templates are strings with `{key}` placeholders, e.g. `"x_{t}"`. This allows building
/// repeated structures (such as the slices of a dynamic model) from a single table.
#[derive(Debug, Clone)]
pub struct CategoricalTemplate {
    var_templates: Vec<String>,
    cardinalities: Vec<usize>,
    probs_table: Vec<(Vec<usize>, f64)>,
}

impl CategoricalTemplate {
    pub fn new<S: AsRef<str>>(
        var_templates: &[S],
        cardinalities: &[usize],
        probs_table: impl IntoIterator<Item = (Vec<usize>, f64)>,
    ) -> Self {
        Self {
            var_templates: var_templates.iter().map(|t| t.as_ref().to_owned()).collect(),
            cardinalities: cardinalities.to_vec(),
            probs_table: probs_table.into_iter().collect(),
        }
    }

    pub fn var_templates(&self) -> &[String] {
        &self.var_templates
    }

    /// Variable names obtained by substituting every `{key}` of the templates.
    pub fn format_var_names(&self, format: &IndexMap<String, String>) -> Vec<String> {
        self.var_templates
            .iter()
            .map(|t| {
                format.iter().fold(t.clone(), |name, (key, value)| {
                    name.replace(&format!("{{{key}}}"), value)
                })
            })
            .collect()
    }

    /// Instantiate the template with the variable names given by `format`.
    pub fn make_factor(&self, format: &IndexMap<String, String>) -> Result<Categorical> {
        self.make_factor_with_names(&self.format_var_names(format))
    }

    /// Instantiate the template with explicit variable names.
    pub fn make_factor_with_names<S: AsRef<str>>(&self, var_names: &[S]) -> Result<Categorical> {
        Categorical::from_probs_table(
            var_names,
            &self.cardinalities,
            self.probs_table.iter().map(|(a, p)| (a.as_slice(), *p)),
        )
    }
}
