use std::{
    collections::{BTreeMap, btree_map},
    fs,
    path::Path,
};

use log::{debug, info, warn};

use super::dump::{self, DumpId, DumpRole, DumpSide, info_file_name, key};
use crate::Result;

/// Counts the elements of `target` further than `epsilon` from `reference`.
///
/// A pair differing by exactly `epsilon` passes. NaN never passes and a
/// length mismatch makes every element of the longer buffer diverge.
pub fn divergence(reference: &[f32], target: &[f32], epsilon: f32) -> usize {
    if reference.len() != target.len() {
        return reference.len().max(target.len());
    }

    reference
        .iter()
        .zip(target)
        .filter(|(r, t)| !((*r - *t).abs() <= epsilon))
        .count()
}

/// The layers whose dumps diverged, keyed by `<tag><index> <kind>`, with the
/// amount of diverging elements.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorDictionary(BTreeMap<String, usize>);

impl ErrorDictionary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `count` diverging elements for `layer`, ignoring zero counts.
    pub fn record(&mut self, layer: String, count: usize) {
        if count > 0 {
            *self.0.entry(layer).or_default() += count;
        }
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn get(&self, layer: &str) -> Option<usize> {
        self.0.get(layer).copied()
    }

    pub fn iter(&self) -> btree_map::Iter<'_, String, usize> {
        self.0.iter()
    }

    /// Logs the verdict of a compare run.
    pub fn log(&self) {
        if self.is_empty() {
            info!("*** all layers are working correctly ***");
            return;
        }

        info!("invalid layer behaviour detected on:");
        for (layer, count) in self.iter() {
            warn!("\t{layer} ({count} elements)");
        }
    }
}

/// Compares one reference/target pair of dumps.
///
/// # Returns
/// `None` if either file can't be read.
fn compare_pair(reference_dir: &Path, target_dir: &Path, role: DumpRole, index: usize, epsilon: f32) -> Option<usize> {
    let reference = DumpId::new(role, DumpSide::Reference, index).path(reference_dir);
    let target = DumpId::new(role, DumpSide::Target, index).path(target_dir);

    let read = |path: &Path| {
        dump::read(path)
            .inspect_err(|e| warn!("skipping {}: {e}", path.display()))
            .ok()
    };

    Some(divergence(&read(&reference)?, &read(&target)?, epsilon))
}

/// Compares every dump listed in the target info log against its reference,
/// then every parameter gradient and weight.
///
/// # Arguments
/// * `reference_dir` - Where `collect` wrote its dumps.
/// * `target_dir` - Where `compare` wrote its dumps and info log.
/// * `on_device` - Whether the target pass ran on a device.
/// * `epsilon` - The tolerated absolute difference per element.
pub fn compare_dumps(reference_dir: &Path, target_dir: &Path, on_device: bool, epsilon: f64) -> Result<ErrorDictionary> {
    let epsilon = epsilon as f32;
    let info_path = target_dir.join(info_file_name(on_device));
    let entries = dump::parse_info(&fs::read_to_string(&info_path)?)?;

    let mut errors = ErrorDictionary::new();
    for entry in entries {
        let reference = DumpId::new(entry.role, DumpSide::Reference, entry.index).path(reference_dir);
        if entry.role == DumpRole::Backward && !reference.exists() {
            debug!("{} has no input gradient", key(entry.role, entry.index));
            continue;
        }

        if let Some(count) = compare_pair(reference_dir, target_dir, entry.role, entry.index, epsilon) {
            errors.record(entry.to_string(), count);
        }
    }

    for index in 0.. {
        let gradient = DumpId::new(DumpRole::Gradient, DumpSide::Reference, index);
        if !gradient.path(reference_dir).exists() {
            break;
        }

        for role in [DumpRole::Gradient, DumpRole::Weight] {
            if let Some(count) = compare_pair(reference_dir, target_dir, role, index, epsilon) {
                errors.record(key(role, index), count);
            }
        }
    }

    Ok(errors)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn difference_of_exactly_epsilon_passes() {
        let eps = 1e-3;
        assert_eq!(divergence(&[0.0], &[eps], eps), 0);
        assert_eq!(divergence(&[0.0], &[eps + 1e-4], eps), 1);
    }

    #[test]
    fn nan_and_length_mismatch_diverge() {
        assert_eq!(divergence(&[1.0, 2.0], &[1.0, f32::NAN], 1.0), 1);
        assert_eq!(divergence(&[1.0, 2.0], &[1.0, 2.0, 3.0], 1.0), 3);
    }

    #[test]
    fn zero_counts_are_not_recorded() {
        let mut errors = ErrorDictionary::new();
        errors.record("Fwrd0001 ReLU".into(), 0);
        assert!(errors.is_empty());

        errors.record("Fwrd0002 InnerProduct".into(), 2);
        errors.record("Fwrd0002 InnerProduct".into(), 1);
        assert_eq!(errors.get("Fwrd0002 InnerProduct"), Some(3));
    }
}
