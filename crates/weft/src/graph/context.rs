//! Graph-level defaults inherited by every node.

use crate::types::DataType;

/// Shared defaults for a graph: its name and the data types used to
/// fill unset tensor and compute types during property inference.
#[derive(Debug, Clone, Default)]
pub struct Context {
    name: String,
    io_data_type: Option<DataType>,
    compute_data_type: Option<DataType>,
    intermediate_data_type: Option<DataType>,
}

impl Context {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    pub fn io_data_type(&self) -> Option<DataType> {
        self.io_data_type
    }

    pub fn set_io_data_type(&mut self, data_type: DataType) {
        self.io_data_type = Some(data_type);
    }

    pub fn compute_data_type(&self) -> Option<DataType> {
        self.compute_data_type
    }

    pub fn set_compute_data_type(&mut self, data_type: DataType) {
        self.compute_data_type = Some(data_type);
    }

    pub fn intermediate_data_type(&self) -> Option<DataType> {
        self.intermediate_data_type
    }

    pub fn set_intermediate_data_type(&mut self, data_type: DataType) {
        self.intermediate_data_type = Some(data_type);
    }

    /// Picks the default dtype for a tensor based on its role: virtual
    /// tensors are intermediates, everything else is graph I/O.
    pub(crate) fn default_data_type_for(&self, is_virtual: bool) -> Option<DataType> {
        if is_virtual {
            self.intermediate_data_type.or(self.io_data_type)
        } else {
            self.io_data_type
        }
    }
}
