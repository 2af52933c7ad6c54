use std::path::{Path, PathBuf};
use crate::archive;
use crate::model::{check_consumer_layout, load_record, Category};
use crate::report::ConversionReport;

/// Converts every input into `<output_directory>/SMPL_<CATEGORY>.npz`, in order.
pub fn convert_models(inputs: Vec<PathBuf>, output_directory: PathBuf, summary: bool) -> anyhow::Result<()> {
    std::fs::create_dir_all(&output_directory)
        .map_err(|e| anyhow::anyhow!("Failed to create output directory {}: {}", output_directory.display(), e))?;
    if inputs.is_empty() {
        log::info!("No input files given");
        return Ok(());
    }
    for input in inputs {
        let report = convert_model(&input, &output_directory)?;
        if summary {
            report.print();
        }
    }
    Ok(())
}

pub fn convert_model(input: &Path, output_directory: &Path) -> anyhow::Result<ConversionReport> {
    log::info!("Converting {}", input.display());
    let bytes = std::fs::read(input)
        .map_err(|e| anyhow::anyhow!("Failed to read {}: {}", input.display(), e))?;
    let record = load_record(&bytes)
        .map_err(|e| anyhow::anyhow!("Failed to decode {}: {}", input.display(), e))?;
    let kinds = record.kinds();
    let dense = record.normalize()
        .map_err(|e| anyhow::anyhow!("Failed to densify {}: {}", input.display(), e))?;

    if dense.is_empty() {
        log::warn!("{} has no numeric fields, the archive will be empty", input.display());
    }

    let category = Category::from_path(input);
    let output = output_directory.join(category.archive_name());
    println!("Writing {}", output.display());
    archive::write_archive(&output, &dense)?;

    let issues = check_consumer_layout(&dense);
    for issue in issues.iter() {
        log::warn!("{}: {}", output.display(), issue);
    }
    let entries = archive::list_entries(&output)?;
    Ok(ConversionReport::new(input.to_path_buf(), output, category, &kinds, &dense, &entries)
        .with_layout_issues(issues))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{array, Array2};
    use crate::model::DenseArray;
    use crate::model::FieldKind;
    use crate::pickle::fixtures::PickleWriter;

    fn female_model() -> Vec<u8> {
        let mut writer = PickleWriter::new();
        writer.dict(|w| {
            w.key("v_template");
            w.identity_csc(3);
            w.key("f");
            w.ndarray_i64(&[1, 3], &[0, 1, 2]);
        });
        writer.finish()
    }

    #[test]
    fn converts_female_model() {
        let directory = tempfile::tempdir().unwrap();
        let input = directory.path().join("basicModel_f_lbs_10_207_0_v1.0.0.pkl");
        std::fs::write(&input, female_model()).unwrap();
        let output_directory = directory.path().join("data/models/smpl");

        convert_models(vec![input.clone()], output_directory.clone(), false).unwrap();

        let written = archive::read_archive(output_directory.join("SMPL_FEMALE.npz")).unwrap();
        assert_eq!(written.len(), 2);
        assert_eq!(written.get("v_template"), Some(&DenseArray::F64(Array2::<f64>::eye(3).into_dyn())));
        assert_eq!(written.get("f"), Some(&DenseArray::I64(array![[0i64, 1, 2]].into_dyn())));
        assert!(!output_directory.join("SMPL_MALE.npz").exists());
        assert!(!output_directory.join("SMPL_NEUTRAL.npz").exists());
    }

    #[test]
    fn report_describes_the_conversion() {
        let directory = tempfile::tempdir().unwrap();
        let input = directory.path().join("basicmodel_m_lbs_10_207_0_v1.0.0.pkl");
        std::fs::write(&input, female_model()).unwrap();

        let report = convert_model(&input, directory.path()).unwrap();

        assert_eq!(report.category, Category::Male);
        assert_eq!(report.output, directory.path().join("SMPL_MALE.npz"));
        let origins = report.fields.iter().map(|field| (field.name.as_str(), field.origin)).collect::<Vec<_>>();
        assert_eq!(origins, vec![("v_template", FieldKind::Sparse), ("f", FieldKind::Dense)]);
        assert!(report.fields.iter().all(|field| field.compressed_size.is_some()));
        assert!(report.layout_issues.contains(&"missing required array kintree_table".to_string()));
    }

    #[test]
    fn text_array_does_not_block_the_archive() {
        let directory = tempfile::tempdir().unwrap();
        let input = directory.path().join("basicModel_f_lbs_10_207_0_v1.0.0.pkl");
        let mut writer = PickleWriter::new();
        writer.dict(|w| {
            w.key("f");
            w.ndarray_i64(&[1, 3], &[0, 1, 2]);
            w.key("names");
            let raw = ['a', 'b'].iter().flat_map(|&c| (c as u32).to_le_bytes()).collect::<Vec<_>>();
            w.ndarray("U1", "<", &[2], false, &raw);
        });
        std::fs::write(&input, writer.finish()).unwrap();

        convert_models(vec![input], directory.path().to_path_buf(), false).unwrap();

        let written = archive::read_archive(directory.path().join("SMPL_FEMALE.npz")).unwrap();
        assert_eq!(written.len(), 1);
        assert_eq!(written.get("f"), Some(&DenseArray::I64(array![[0i64, 1, 2]].into_dyn())));
    }

    #[test]
    fn empty_input_list_only_creates_directory() {
        let directory = tempfile::tempdir().unwrap();
        let output_directory = directory.path().join("data/models/smpl");
        convert_models(Vec::new(), output_directory.clone(), false).unwrap();
        assert!(output_directory.is_dir());
        assert_eq!(std::fs::read_dir(&output_directory).unwrap().count(), 0);
    }

    #[test]
    fn later_inputs_of_same_category_overwrite() {
        let directory = tempfile::tempdir().unwrap();
        let first = directory.path().join("model_a.pkl");
        std::fs::write(&first, female_model()).unwrap();
        let mut writer = PickleWriter::new();
        writer.dict(|w| {
            w.key("weights");
            w.ndarray_f64(&[2], &[0.5, 0.5]);
        });
        let second = directory.path().join("model_b.pkl");
        std::fs::write(&second, writer.finish()).unwrap();

        convert_models(vec![first, second], directory.path().to_path_buf(), false).unwrap();

        let written = archive::read_archive(directory.path().join("SMPL_NEUTRAL.npz")).unwrap();
        assert_eq!(written.len(), 1);
        assert_eq!(written.get("weights"), Some(&DenseArray::F64(array![0.5, 0.5].into_dyn())));
    }

    #[test]
    fn missing_input_aborts_the_run() {
        let directory = tempfile::tempdir().unwrap();
        let missing = directory.path().join("basicModel_f_missing.pkl");
        let error = convert_models(vec![missing], directory.path().to_path_buf(), false).unwrap_err();
        assert!(error.to_string().contains("Failed to read"));
    }

    #[test]
    fn undecodable_input_is_fatal() {
        let directory = tempfile::tempdir().unwrap();
        let input = directory.path().join("basicModel_m_broken.pkl");
        std::fs::write(&input, b"not a pickle").unwrap();
        let error = convert_model(&input, directory.path()).unwrap_err();
        assert!(error.to_string().contains("Failed to decode"));
        assert!(!directory.path().join("SMPL_MALE.npz").exists());
    }
}
