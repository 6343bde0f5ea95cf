//! Attributes for matrix multiplication nodes.

use crate::attributes::tensor::TensorRef;
use crate::types::DataType;

/// Attributes for a matmul node: operands A and B and product C.
/// A is `[batch.., M, K]`, B is `[batch.., K, N]` (or rank 2), and C
/// is `[batch.., M, N]`.
#[derive(Debug, Clone, Default)]
pub struct MatmulAttr {
    name: String,
    compute_data_type: Option<DataType>,
    a: Option<TensorRef>,
    b: Option<TensorRef>,
    c: Option<TensorRef>,
}

impl MatmulAttr {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn set_compute_data_type(mut self, data_type: DataType) -> Self {
        self.compute_data_type = Some(data_type);
        self
    }

    pub fn set_a(mut self, tensor: &TensorRef) -> Self {
        self.a = Some(tensor.clone());
        self
    }

    pub fn set_b(mut self, tensor: &TensorRef) -> Self {
        self.b = Some(tensor.clone());
        self
    }

    pub fn set_c(mut self, tensor: &TensorRef) -> Self {
        self.c = Some(tensor.clone());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn compute_data_type(&self) -> Option<DataType> {
        self.compute_data_type
    }

    pub fn a(&self) -> Option<&TensorRef> {
        self.a.as_ref()
    }

    pub fn b(&self) -> Option<&TensorRef> {
        self.b.as_ref()
    }

    pub fn c(&self) -> Option<&TensorRef> {
        self.c.as_ref()
    }

    pub(crate) fn set_name_mut(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    pub(crate) fn set_compute_data_type_mut(&mut self, data_type: DataType) {
        self.compute_data_type = Some(data_type);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attributes::tensor::TensorAttr;

    #[test]
    fn slot_binding() {
        let a = TensorRef::new(TensorAttr::new().set_name("a"));
        let b = TensorRef::new(TensorAttr::new().set_name("b"));
        let c = TensorRef::new(TensorAttr::new().set_name("c"));
        let attr = MatmulAttr::new().set_a(&a).set_b(&b).set_c(&c);
        assert_eq!(attr.a(), Some(&a));
        assert_eq!(attr.b(), Some(&b));
        assert_eq!(attr.c(), Some(&c));
    }
}
