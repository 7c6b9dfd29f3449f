use alloc::vec::Vec;

use burn::module::ParamId;

/// Whether an optimizer is allowed to update a parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParamKind {
    /// Updated by gradient descent.
    Trainable,
    /// Excluded from gradient computation, never updated.
    Frozen,
}

/// A single parameter exposed by an adapted layer.
#[derive(new, Debug, Clone, PartialEq, Eq)]
pub struct ParamEntry {
    /// Field name of the parameter inside the layer.
    pub name: &'static str,
    /// Identifier shared with the module's [param](burn::module::Param).
    pub id: ParamId,
    /// Shape of the parameter tensor.
    pub shape: Vec<usize>,
    /// Trainable or frozen.
    pub kind: ParamKind,
}

impl ParamEntry {
    /// Number of scalar values held by the parameter.
    pub fn num_elements(&self) -> usize {
        self.shape.iter().product()
    }

    /// True when an optimizer may update this parameter.
    pub fn is_trainable(&self) -> bool {
        self.kind == ParamKind::Trainable
    }
}

/// Receives the parameters of an adapted layer.
///
/// Layers call [register](ParamRegistry::register) once per parameter, trainable ones first,
/// so an external optimizer or checkpoint mechanism can discover them by name.
pub trait ParamRegistry {
    /// Record a parameter.
    fn register(&mut self, entry: ParamEntry);
}

impl ParamRegistry for Vec<ParamEntry> {
    fn register(&mut self, entry: ParamEntry) {
        self.push(entry);
    }
}

/// Registry keeping only the parameters an optimizer should update.
#[derive(Debug, Clone, Default)]
pub struct TrainableParams {
    entries: Vec<ParamEntry>,
}

impl TrainableParams {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// The registered trainable parameters, in registration order.
    pub fn entries(&self) -> &[ParamEntry] {
        &self.entries
    }

    /// Identifiers of the registered parameters.
    pub fn ids(&self) -> Vec<ParamId> {
        self.entries.iter().map(|entry| entry.id).collect()
    }

    /// Names of the registered parameters.
    pub fn names(&self) -> Vec<&'static str> {
        self.entries.iter().map(|entry| entry.name).collect()
    }

    /// Look up a parameter by name.
    pub fn get(&self, name: &str) -> Option<&ParamEntry> {
        self.entries.iter().find(|entry| entry.name == name)
    }

    /// Total number of trainable scalars.
    pub fn num_params(&self) -> usize {
        self.entries.iter().map(ParamEntry::num_elements).sum()
    }
}

impl ParamRegistry for TrainableParams {
    fn register(&mut self, entry: ParamEntry) {
        if entry.is_trainable() {
            self.entries.push(entry);
        }
    }
}
