use crate::error::{EpiError, EpiResult};
use std::collections::HashMap;

/// Bijective map between compartment labels and dense, zero-based indices.
///
/// Indices are handed out in insertion order and never change. There is no
/// removal: a registry only grows.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompartmentRegistry {
    labels: Vec<String>,
    indices: HashMap<String, usize>,
}

impl CompartmentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a registry from an ordered label list, failing on the first duplicate.
    pub fn from_labels<I, S>(labels: I) -> EpiResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut registry = Self::new();
        for label in labels {
            registry.add(label)?;
        }
        Ok(registry)
    }

    /// Registers `label` and returns its index.
    pub fn add(&mut self, label: impl Into<String>) -> EpiResult<usize> {
        let label = label.into();
        if self.indices.contains_key(&label) {
            return Err(EpiError::DuplicateCompartment { label });
        }
        let index = self.labels.len();
        self.indices.insert(label.clone(), index);
        self.labels.push(label);
        Ok(index)
    }

    pub fn index_of(&self, label: &str) -> EpiResult<usize> {
        self.indices
            .get(label)
            .copied()
            .ok_or_else(|| EpiError::unknown(label))
    }

    pub fn label_of(&self, index: usize) -> EpiResult<&str> {
        self.labels
            .get(index)
            .map(String::as_str)
            .ok_or_else(|| EpiError::unknown(format!("#{index}")))
    }

    pub fn contains(&self, label: &str) -> bool {
        self.indices.contains_key(label)
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Labels in index order.
    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &str)> {
        self.labels.iter().map(String::as_str).enumerate()
    }
}
