use std::fmt::{Display, Formatter};
use ndarray::{ArrayD, IxDyn};
use crate::errors::{ConversionError, ModelError};
use crate::model::array::{is_numpy_array, is_numpy_scalar, DenseArray};
use crate::model::sparse::SparseMatrix;
use crate::model::symbolic::SymbolicArray;
use crate::pickle::{self, Value};

/// A model field as found in the input, tagged by its runtime type.
#[derive(Debug, Clone, PartialEq)]
pub enum Field {
    Dense(DenseArray),
    Sparse(SparseMatrix),
    Symbolic(SymbolicArray),
    Other(Value)
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum FieldKind {
    Dense,
    Sparse,
    Symbolic,
    Other
}

#[derive(Debug, Clone, PartialEq)]
pub struct ModelRecord {
    fields: Vec<(String, Field)>,
}

/// The output dictionary: field names mapped to dense arrays only.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DenseRecord {
    arrays: Vec<(String, DenseArray)>,
}

pub fn load_record(bytes: &[u8]) -> Result<ModelRecord, ConversionError> {
    let value = pickle::load_with_fallback(bytes)?;
    Ok(ModelRecord::from_value(value)?)
}

impl Field {
    /// Classifies a value by its type tag, the qualified name of its class.
    pub fn classify(value: Value) -> Result<Self, ModelError> {
        let tag = value.type_name();
        if let Value::Object(object) = &value {
            let object = object.borrow();
            if tag.contains("chumpy") {
                return Ok(Field::Symbolic(SymbolicArray::from_pickle(&object)));
            }
            if tag.contains("scipy.sparse") {
                return Ok(Field::Sparse(SparseMatrix::from_pickle(&object)?));
            }
            let dense = if is_numpy_array(&object) {
                DenseArray::from_ndarray(&object)
            } else if is_numpy_scalar(&object) {
                DenseArray::from_numpy_scalar(&object)
            } else {
                return Ok(Field::Other(value.clone()));
            };
            return match dense {
                Ok(array) => Ok(Field::Dense(array)),
                Err(ModelError::UnsupportedDtype { descr }) => {
                    log::warn!("{} with dtype {} has no numeric array form", tag, descr);
                    Ok(Field::Other(value.clone()))
                }
                Err(e) => Err(e)
            };
        }
        Ok(Field::Other(value))
    }

    pub fn describe(&self) -> String {
        match self {
            Field::Dense(array) => array.describe(),
            Field::Sparse(matrix) => format!(
                "{} {}x{}, {} stored", matrix.format, matrix.shape.0, matrix.shape.1, matrix.stored_entries()
            ),
            Field::Symbolic(node) => node.class().to_string(),
            Field::Other(value) => value.type_name()
        }
    }

    pub fn kind(&self) -> FieldKind {
        match self {
            Field::Dense(_) => FieldKind::Dense,
            Field::Sparse(_) => FieldKind::Sparse,
            Field::Symbolic(_) => FieldKind::Symbolic,
            Field::Other(_) => FieldKind::Other
        }
    }

    /// Converts the field to a dense array. `Ok(None)` means the value is
    /// passed through but has no numeric array form.
    pub fn into_dense(self) -> Result<Option<DenseArray>, ModelError> {
        match self {
            Field::Dense(array) => Ok(Some(array)),
            Field::Sparse(matrix) => Ok(Some(matrix.to_dense())),
            Field::Symbolic(node) => node.materialize().map(Some),
            Field::Other(value) => Ok(coerce_plain_value(&value))
        }
    }
}

impl Display for FieldKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            FieldKind::Dense => write!(f, "dense"),
            FieldKind::Sparse => write!(f, "sparse"),
            FieldKind::Symbolic => write!(f, "symbolic"),
            FieldKind::Other => write!(f, "other")
        }
    }
}

impl ModelRecord {
    pub fn from_value(value: Value) -> Result<Self, ModelError> {
        let Value::Dict(items) = &value else {
            return Err(ModelError::NotAMapping { found: value.type_name() });
        };
        let mut fields: Vec<(String, Field)> = Vec::new();
        for (key, value) in items.borrow().iter() {
            let name = match key {
                Value::Text(name) => name.to_string(),
                Value::Bytes(raw) => raw.iter().map(|&b| b as char).collect(),
                other => return Err(ModelError::NonTextKey { found: other.type_name() })
            };
            let field = Field::classify(value.clone())?;
            log::debug!("Field {} is {} ({})", name, field.kind(), field.describe());
            match fields.iter_mut().find(|(existing, _)| *existing == name) {
                Some(entry) => entry.1 = field,
                None => fields.push((name, field))
            }
        }
        Ok(ModelRecord { fields })
    }

    pub fn kinds(&self) -> Vec<(String, FieldKind)> {
        self.fields.iter()
            .map(|(name, field)| (name.clone(), field.kind()))
            .collect()
    }

    /// Densifies every field. Plain values without a numeric array form
    /// are dropped with a warning.
    pub fn normalize(self) -> Result<DenseRecord, ModelError> {
        let mut record = DenseRecord::default();
        for (name, field) in self.fields {
            let kind = field.kind();
            match field.into_dense()? {
                Some(array) => {
                    log::debug!("{}: {} -> {}", name, kind, array.describe());
                    record.insert(name, array);
                }
                None => log::warn!("Skipping field {}: value has no numeric array form", name)
            }
        }
        Ok(record)
    }
}

impl DenseRecord {
    pub fn insert(&mut self, name: impl Into<String>, array: DenseArray) {
        let name = name.into();
        match self.arrays.iter_mut().find(|(existing, _)| *existing == name) {
            Some(entry) => entry.1 = array,
            None => self.arrays.push((name, array))
        }
    }

    pub fn get(&self, name: &str) -> Option<&DenseArray> {
        self.arrays.iter()
            .find(|(existing, _)| existing == name)
            .map(|(_, array)| array)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &DenseArray)> {
        self.arrays.iter().map(|(name, array)| (name.as_str(), array))
    }

    pub fn len(&self) -> usize {
        self.arrays.len()
    }

    pub fn is_empty(&self) -> bool {
        self.arrays.is_empty()
    }
}

// numpy's NPY_MAXDIMS
const MAX_DIMENSIONS: usize = 64;

enum Leaf {
    Bool(bool),
    Int(i64),
    Float(f64)
}

/// What `numpy.asarray` would make of a plain Python value, for numeric
/// scalars and rectangular nested sequences of them.
fn coerce_plain_value(value: &Value) -> Option<DenseArray> {
    let mut shape = Vec::new();
    let mut leaves = Vec::new();
    flatten(value, 0, &mut shape, &mut leaves)?;
    if leaves.len() != shape.iter().product::<usize>() {
        return None;
    }
    let dimension = IxDyn(&shape);
    let array = if !leaves.is_empty() && leaves.iter().all(|leaf| matches!(leaf, Leaf::Bool(_))) {
        let data = leaves.iter().map(|leaf| matches!(leaf, Leaf::Bool(true))).collect();
        DenseArray::Bool(ArrayD::from_shape_vec(dimension, data).ok()?)
    } else if !leaves.is_empty() && leaves.iter().all(|leaf| !matches!(leaf, Leaf::Float(_))) {
        let data = leaves.iter()
            .map(|leaf| match leaf {
                Leaf::Bool(b) => *b as i64,
                Leaf::Int(i) => *i,
                Leaf::Float(f) => *f as i64
            })
            .collect();
        DenseArray::I64(ArrayD::from_shape_vec(dimension, data).ok()?)
    } else {
        // numpy gives empty sequences a float64 dtype
        let data = leaves.iter()
            .map(|leaf| match leaf {
                Leaf::Bool(b) => *b as i64 as f64,
                Leaf::Int(i) => *i as f64,
                Leaf::Float(f) => *f
            })
            .collect();
        DenseArray::F64(ArrayD::from_shape_vec(dimension, data).ok()?)
    };
    Some(array)
}

fn flatten(value: &Value, depth: usize, shape: &mut Vec<usize>, leaves: &mut Vec<Leaf>) -> Option<()> {
    if depth > MAX_DIMENSIONS {
        return None;
    }
    let leaf = match value {
        Value::Bool(b) => Leaf::Bool(*b),
        Value::Int(i) => Leaf::Int(*i),
        Value::Float(f) => Leaf::Float(*f),
        Value::Tuple(_) | Value::List(_) => {
            let items = value.as_sequence()?;
            match shape.get(depth) {
                Some(&length) if length != items.len() => return None,
                Some(_) => {}
                None if shape.len() == depth && leaves.is_empty() => shape.push(items.len()),
                None => return None
            }
            for item in &items {
                flatten(item, depth + 1, shape, leaves)?;
            }
            return Some(());
        }
        _ => return None
    };
    if shape.len() != depth {
        return None;
    }
    leaves.push(leaf);
    Some(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{array, Array2};
    use crate::pickle::fixtures::PickleWriter;

    fn sample_model() -> Vec<u8> {
        let mut writer = PickleWriter::new();
        writer.dict(|w| {
            w.key("v_template");
            w.chumpy(|w| w.ndarray_f64(&[2, 3], &[0.0, 0.1, 0.2, 1.0, 1.1, 1.2]));
            w.key("J_regressor");
            w.identity_csc(2);
            w.key("f");
            w.ndarray_u32(&[1, 3], &[0, 1, 2]);
            w.key("kintree_table");
            w.ndarray_i64(&[2, 2], &[-1, 0, 0, 1]);
            w.key("bs_style");
            w.key("lbs");
            w.key("scale");
            w.float(2.5);
        });
        writer.finish()
    }

    #[test]
    fn classifies_each_field_by_type_tag() {
        let record = load_record(&sample_model()).unwrap();
        let kinds = record.kinds();
        assert_eq!(kinds, vec![
            ("v_template".to_string(), FieldKind::Symbolic),
            ("J_regressor".to_string(), FieldKind::Sparse),
            ("f".to_string(), FieldKind::Dense),
            ("kintree_table".to_string(), FieldKind::Dense),
            ("bs_style".to_string(), FieldKind::Other),
            ("scale".to_string(), FieldKind::Other),
        ]);
    }

    #[test]
    fn normalized_record_is_dense_only() {
        let record = load_record(&sample_model()).unwrap().normalize().unwrap();
        assert_eq!(record.len(), 5);
        assert_eq!(record.get("bs_style"), None);
        assert_eq!(
            record.get("v_template"),
            Some(&DenseArray::F64(array![[0.0, 0.1, 0.2], [1.0, 1.1, 1.2]].into_dyn()))
        );
        assert_eq!(record.get("J_regressor"), Some(&DenseArray::F64(Array2::<f64>::eye(2).into_dyn())));
        assert_eq!(record.get("f"), Some(&DenseArray::U32(array![[0u32, 1, 2]].into_dyn())));
        assert_eq!(record.get("scale"), Some(&DenseArray::F64(ArrayD::from_elem(IxDyn(&[]), 2.5))));
        let names = record.iter().map(|(name, _)| name).collect::<Vec<_>>();
        assert_eq!(names, vec!["v_template", "J_regressor", "f", "kintree_table", "scale"]);
    }

    #[test]
    fn unsupported_numpy_dtype_is_skipped_not_fatal() {
        let mut writer = PickleWriter::new();
        writer.dict(|w| {
            w.key("f");
            w.ndarray_i64(&[1, 3], &[0, 1, 2]);
            w.key("names");
            let raw = ['a', 'b'].iter().flat_map(|&c| (c as u32).to_le_bytes()).collect::<Vec<_>>();
            w.ndarray("U1", "<", &[2], false, &raw);
        });
        let record = load_record(&writer.finish()).unwrap();
        assert_eq!(record.kinds(), vec![
            ("f".to_string(), FieldKind::Dense),
            ("names".to_string(), FieldKind::Other),
        ]);
        let dense = record.normalize().unwrap();
        assert_eq!(dense.len(), 1);
        assert_eq!(dense.get("f"), Some(&DenseArray::I64(array![[0i64, 1, 2]].into_dyn())));
        assert_eq!(dense.get("names"), None);
    }

    #[test]
    fn root_must_be_a_dictionary() {
        let mut writer = PickleWriter::new();
        writer.empty_list();
        let error = load_record(&writer.finish()).unwrap_err();
        assert!(matches!(error, ConversionError::NotAMapping { .. }));
    }

    #[test]
    fn coerces_plain_sequences_like_numpy() {
        let ints = Value::new_list(vec![
            Value::Tuple(vec![Value::Int(1), Value::Int(2)].into()),
            Value::Tuple(vec![Value::Int(3), Value::Bool(true)].into()),
        ]);
        assert_eq!(coerce_plain_value(&ints), Some(DenseArray::I64(array![[1, 2], [3, 1]].into_dyn())));

        let mixed = Value::new_list(vec![Value::Int(1), Value::Float(0.5)]);
        assert_eq!(coerce_plain_value(&mixed), Some(DenseArray::F64(array![1.0, 0.5].into_dyn())));

        let flags = Value::new_list(vec![Value::Bool(true), Value::Bool(false)]);
        assert_eq!(coerce_plain_value(&flags), Some(DenseArray::Bool(array![true, false].into_dyn())));

        let empty = Value::new_list(Vec::new());
        assert_eq!(coerce_plain_value(&empty), Some(DenseArray::F64(ArrayD::zeros(IxDyn(&[0])))));
    }

    #[test]
    fn ragged_and_textual_values_have_no_array_form() {
        let ragged = Value::new_list(vec![
            Value::new_list(vec![Value::Int(1)]),
            Value::new_list(vec![Value::Int(1), Value::Int(2)]),
        ]);
        assert_eq!(coerce_plain_value(&ragged), None);
        let mixed_depth = Value::new_list(vec![Value::Int(1), Value::new_list(vec![Value::Int(2)])]);
        assert_eq!(coerce_plain_value(&mixed_depth), None);
        assert_eq!(coerce_plain_value(&Value::text("lrotmin")), None);
        assert_eq!(coerce_plain_value(&Value::None), None);
    }

    #[test]
    fn self_referential_list_has_no_array_form() {
        let list = Value::new_list(Vec::new());
        if let Value::List(items) = &list {
            items.borrow_mut().push(list.clone());
        }
        assert!(coerce_plain_value(&list).is_none());
    }
}
