//! Aligning dataset label ids with the model's label mapping

use std::collections::BTreeMap;
use std::fmt;

/// Non-fatal notice that dataset labels could not be matched to the model.
///
/// Metrics computed alongside this warning may compare mismatched classes.
#[derive(Clone, Debug, PartialEq)]
pub struct LabelMappingWarning {
    /// Model label name to class id
    pub model_label2id: BTreeMap<String, usize>,
    /// Dataset class names, when declared
    pub dataset_labels: Option<Vec<String>>,
    /// What did not match
    pub reason: String,
}

impl fmt::Display for LabelMappingWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Model label mapping: {:?}; dataset label features: {:?}; {}. \
             Could not guarantee the model label mapping and the dataset labels match, \
             evaluation results may suffer from a wrong matching",
            self.model_label2id, self.dataset_labels, self.reason
        )
    }
}

/// Map each dataset label id to the model's id for the same (case-insensitive) name.
///
/// Returns the table indexed by dataset id, or a warning when no consistent
/// mapping exists.
pub fn align_labels(
    model_label2id: &BTreeMap<String, usize>,
    dataset_labels: Option<&[String]>,
) -> Result<Vec<usize>, LabelMappingWarning> {
    let warn = |reason: String| LabelMappingWarning {
        model_label2id: model_label2id.clone(),
        dataset_labels: dataset_labels.map(<[String]>::to_vec),
        reason,
    };

    let Some(names) = dataset_labels else {
        return Err(warn("the dataset declares no label names".into()));
    };
    if model_label2id.is_empty() {
        return Err(warn("the model declares no label mapping".into()));
    }
    if names.len() != model_label2id.len() {
        return Err(warn(format!(
            "the dataset has {} classes but the model has {}",
            names.len(),
            model_label2id.len()
        )));
    }

    let lowered: BTreeMap<String, usize> =
        model_label2id.iter().map(|(k, v)| (k.to_lowercase(), *v)).collect();
    names
        .iter()
        .map(|name| {
            lowered
                .get(&name.to_lowercase())
                .copied()
                .ok_or_else(|| warn(format!("label '{name}' is missing from the model")))
        })
        .collect()
}
