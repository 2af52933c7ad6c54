use std::fmt::{Display, Formatter};
use ndarray::{Array2, ArrayD};
use crate::errors::ModelError;
use crate::model::array::{is_numpy_array, map_array, DenseArray, Element};
use crate::pickle::{Object, Value};

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SparseFormat {
    Csc,
    Csr,
    Coo
}

/// A scipy sparse matrix, expanded to one (row, col) coordinate per stored value.
#[derive(Debug, Clone, PartialEq)]
pub struct SparseMatrix {
    pub shape: (usize, usize),
    pub format: SparseFormat,
    data: DenseArray,
    rows: Vec<usize>,
    cols: Vec<usize>,
}

impl SparseFormat {
    fn from_name(name: &str) -> Option<Self> {
        match name.get(..3)? {
            "csc" => Some(SparseFormat::Csc),
            "csr" => Some(SparseFormat::Csr),
            "coo" => Some(SparseFormat::Coo),
            _ => None
        }
    }
}

impl Display for SparseFormat {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            SparseFormat::Csc => write!(f, "csc"),
            SparseFormat::Csr => write!(f, "csr"),
            SparseFormat::Coo => write!(f, "coo")
        }
    }
}

impl SparseMatrix {
    /// CSC (`indptr` over columns) or CSR (`indptr` over rows) storage.
    pub fn from_compressed(format: SparseFormat,
                           shape: (usize, usize),
                           data: DenseArray,
                           indices: Vec<usize>,
                           indptr: Vec<usize>) -> Result<Self, ModelError> {
        let (major_len, minor_len) = match format {
            SparseFormat::Csc => (shape.1, shape.0),
            SparseFormat::Csr => (shape.0, shape.1),
            SparseFormat::Coo => return Err(malformed("coordinate storage has no index pointer"))
        };
        if indptr.len() != major_len + 1 {
            return Err(malformed(format!(
                "indptr has {} entries for {} {}",
                indptr.len(), major_len, if format == SparseFormat::Csc { "columns" } else { "rows" }
            )));
        }
        if indptr.windows(2).any(|w| w[0] > w[1]) {
            return Err(malformed("indptr is not monotonic"));
        }
        let stored = indptr[major_len];
        if stored > data.len() || stored > indices.len() || indptr[0] > stored {
            return Err(malformed(format!(
                "indptr addresses {} entries, data holds {} and indices {}",
                stored, data.len(), indices.len()
            )));
        }
        let mut rows = Vec::with_capacity(stored);
        let mut cols = Vec::with_capacity(stored);
        let mut data_positions = Vec::with_capacity(stored);
        for major in 0..major_len {
            for position in indptr[major]..indptr[major + 1] {
                let minor = indices[position];
                if minor >= minor_len {
                    return Err(malformed(format!("index {minor} out of bounds for {minor_len}")));
                }
                let (row, col) = match format {
                    SparseFormat::Csc => (minor, major),
                    _ => (major, minor)
                };
                rows.push(row);
                cols.push(col);
                data_positions.push(position);
            }
        }
        let data = map_array!(&data, values => select(values, &data_positions));
        Ok(SparseMatrix { shape, format, data, rows, cols })
    }

    pub fn from_coordinates(shape: (usize, usize),
                            data: DenseArray,
                            rows: Vec<usize>,
                            cols: Vec<usize>) -> Result<Self, ModelError> {
        if rows.len() != cols.len() || rows.len() != data.len() {
            return Err(malformed(format!(
                "{} rows, {} cols and {} values", rows.len(), cols.len(), data.len()
            )));
        }
        if rows.iter().any(|&r| r >= shape.0) || cols.iter().any(|&c| c >= shape.1) {
            return Err(malformed(format!("coordinate out of bounds for {}x{}", shape.0, shape.1)));
        }
        let data = map_array!(&data, values => values.iter().copied().collect::<ndarray::Array1<_>>().into_dyn());
        Ok(SparseMatrix { shape, format: SparseFormat::Coo, data, rows, cols })
    }

    /// Reads a pickled `scipy.sparse` matrix from its `__dict__` state.
    pub fn from_pickle(object: &Object) -> Result<Self, ModelError> {
        let class = object.class_name();
        let format = object.class_global()
            .and_then(|global| SparseFormat::from_name(&global.name))
            .or_else(|| object.attribute("format")
                .and_then(|format| format.as_text().and_then(SparseFormat::from_name)))
            .ok_or_else(|| ModelError::UnsupportedSparseFormat {
                format: object.attribute("format")
                    .and_then(|format| format.as_text().map(str::to_string))
                    .unwrap_or(class.clone())
            })?;
        let shape = object.attribute("_shape")
            .or_else(|| object.attribute("shape"))
            .and_then(|shape| shape.as_sequence())
            .and_then(|shape| match shape.as_slice() {
                [rows, cols] => Some((
                    usize::try_from(rows.as_int()?).ok()?,
                    usize::try_from(cols.as_int()?).ok()?
                )),
                _ => None
            })
            .ok_or_else(|| missing(&class, "_shape"))?;
        let data = array_attribute(object, &class, "data")?;
        match format {
            SparseFormat::Coo => {
                let (rows, cols) = match object.attribute("coords").and_then(|c| c.as_sequence()) {
                    Some(coords) if coords.len() == 2 => (
                        array_value(&coords[0], &class, "coords")?,
                        array_value(&coords[1], &class, "coords")?
                    ),
                    _ => (array_attribute(object, &class, "row")?, array_attribute(object, &class, "col")?)
                };
                SparseMatrix::from_coordinates(shape, data, rows.to_indices()?, cols.to_indices()?)
            }
            _ => {
                let indices = array_attribute(object, &class, "indices")?.to_indices()?;
                let indptr = array_attribute(object, &class, "indptr")?.to_indices()?;
                SparseMatrix::from_compressed(format, shape, data, indices, indptr)
            }
        }
    }

    pub fn stored_entries(&self) -> usize {
        self.rows.len()
    }

    pub fn to_dense(&self) -> DenseArray {
        map_array!(&self.data, values => scatter(values, &self.rows, &self.cols, self.shape))
    }
}

fn select<T: Element>(values: &ArrayD<T>, positions: &[usize]) -> ArrayD<T> {
    let flat = values.iter().copied().collect::<Vec<T>>();
    positions.iter()
        .map(|&position| flat[position])
        .collect::<ndarray::Array1<T>>()
        .into_dyn()
}

fn scatter<T: Element>(values: &ArrayD<T>, rows: &[usize], cols: &[usize], shape: (usize, usize)) -> ArrayD<T> {
    let mut dense = Array2::<T>::default(shape);
    for ((&value, &row), &col) in values.iter().zip(rows).zip(cols) {
        dense[[row, col]].accumulate(value);
    }
    dense.into_dyn()
}

fn array_attribute(object: &Object, class: &str, name: &str) -> Result<DenseArray, ModelError> {
    let value = object.attribute(name).ok_or_else(|| missing(class, name))?;
    array_value(&value, class, name)
}

fn array_value(value: &Value, class: &str, name: &str) -> Result<DenseArray, ModelError> {
    match value {
        Value::Object(array) if is_numpy_array(&array.borrow()) => DenseArray::from_ndarray(&array.borrow()),
        _ => Err(missing(class, name))
    }
}

fn missing(class: &str, attribute: &str) -> ModelError {
    ModelError::MissingAttribute { class: class.to_string(), attribute: attribute.to_string() }
}

fn malformed(reason: impl Into<String>) -> ModelError {
    ModelError::MalformedSparse { reason: reason.into() }
}
