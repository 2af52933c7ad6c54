use crate::errors::ModelError;
use crate::model::array::DenseArray;
use crate::model::record::Field;
use crate::pickle::{Object, Value};

/// A chumpy node. Leaf nodes (`chumpy.ch.Ch`) keep their value in `x`.
#[derive(Debug, Clone, PartialEq)]
pub struct SymbolicArray {
    class: String,
    value: Option<Value>,
}

impl SymbolicArray {
    pub fn from_pickle(object: &Object) -> Self {
        SymbolicArray {
            class: object.class_name(),
            value: object.attribute("x"),
        }
    }

    pub fn class(&self) -> &str {
        self.class.as_str()
    }

    pub fn materialize(&self) -> Result<DenseArray, ModelError> {
        let unmaterializable = || ModelError::UnmaterializableSymbolic { class: self.class.clone() };
        let value = self.value.clone().ok_or_else(unmaterializable)?;
        Field::classify(value)?
            .into_dense()?
            .ok_or_else(unmaterializable)
    }
}
