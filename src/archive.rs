use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Seek, Write};
use std::path::Path;
use ndarray::{ArrayD, IxDyn, OwnedRepr};
use ndarray_npy::{NpzReader, NpzWriter, ReadNpzError, ReadableElement};
use crate::model::array::for_each_array;
use crate::model::{DenseArray, DenseRecord};

const NPY_SUFFIX: &str = ".npy";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    pub name: String,
    pub size: u64,
    pub compressed_size: u64,
    pub compression: String,
}

/// Writes every array of the record to a deflate-compressed `.npz` file,
/// replacing the file if it exists. Each array is stored as `<name>.npy`.
pub fn write_archive(path: impl AsRef<Path>, record: &DenseRecord) -> anyhow::Result<()> {
    let path = path.as_ref();
    let file = File::create(path)
        .map_err(|e| anyhow::anyhow!("Failed to create archive {}: {}", path.display(), e))?;
    let mut npz = NpzWriter::new_compressed(BufWriter::new(file));
    for (name, array) in record.iter() {
        for_each_array!(array, inner => npz.add_array(name, inner))
            .map_err(|e| anyhow::anyhow!("Failed to write array {} to {}: {}", name, path.display(), e))?;
    }
    let mut writer = npz.finish()
        .map_err(|e| anyhow::anyhow!("Failed to finish archive {}: {}", path.display(), e))?;
    writer.flush()?;
    Ok(())
}

pub fn read_archive(path: impl AsRef<Path>) -> anyhow::Result<DenseRecord> {
    let path = path.as_ref();
    let file = File::open(path)
        .map_err(|e| anyhow::anyhow!("Failed to open archive {}: {}", path.display(), e))?;
    let mut npz = NpzReader::new(BufReader::new(file))
        .map_err(|e| anyhow::anyhow!("Failed to read archive {}: {}", path.display(), e))?;
    let mut record = DenseRecord::default();
    for entry in npz.names()? {
        let array = read_entry(&mut npz, &entry)
            .map_err(|e| anyhow::anyhow!("Failed to read array {} from {}: {}", entry, path.display(), e))?;
        let name = entry.strip_suffix(NPY_SUFFIX).unwrap_or(&entry);
        record.insert(name, array);
    }
    Ok(record)
}

pub fn list_entries(path: impl AsRef<Path>) -> anyhow::Result<Vec<ArchiveEntry>> {
    let path = path.as_ref();
    let file = File::open(path)
        .map_err(|e| anyhow::anyhow!("Failed to open archive {}: {}", path.display(), e))?;
    let mut zip = zip::ZipArchive::new(BufReader::new(file))?;
    let mut entries = Vec::with_capacity(zip.len());
    for index in 0..zip.len() {
        let member = zip.by_index(index)?;
        entries.push(ArchiveEntry {
            name: member.name().to_string(),
            size: member.size(),
            compressed_size: member.compressed_size(),
            compression: member.compression().to_string(),
        });
    }
    Ok(entries)
}

fn read_entry<R: Read + Seek>(npz: &mut NpzReader<R>, entry: &str) -> Result<DenseArray, ReadNpzError> {
    // tries each element type until the header descriptor matches
    macro_rules! first_matching {
        ($first:ty $(, $rest:ty)*) => {{
            let result = by_name::<_, $first>(npz, entry).map(DenseArray::from);
            $(let result = result.or_else(|_| by_name::<_, $rest>(npz, entry).map(DenseArray::from));)*
            result
        }};
    }
    first_matching!(f64, f32, i64, i32, u32, u64, i16, u16, i8, u8, bool)
}

fn by_name<R: Read + Seek, T: ReadableElement>(npz: &mut NpzReader<R>, entry: &str) -> Result<ArrayD<T>, ReadNpzError> {
    npz.by_name::<OwnedRepr<T>, IxDyn>(entry)
}
