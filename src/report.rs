use std::path::PathBuf;
use itertools::Itertools;
use prettytable::{Cell, Row, Table};
use crate::archive::ArchiveEntry;
use crate::model::array::format_shape;
use crate::model::{Category, DenseRecord, FieldKind};

#[derive(Debug, Clone, PartialEq)]
pub struct ConversionReport {
    pub input: PathBuf,
    pub output: PathBuf,
    pub category: Category,
    pub fields: Vec<FieldSummary>,
    pub skipped: Vec<String>,
    pub layout_issues: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldSummary {
    pub name: String,
    pub origin: FieldKind,
    pub dtype: &'static str,
    pub shape: String,
    pub compressed_size: Option<u64>,
}

impl ConversionReport {
    pub fn new(input: PathBuf,
               output: PathBuf,
               category: Category,
               kinds: &[(String, FieldKind)],
               record: &DenseRecord,
               entries: &[ArchiveEntry]) -> Self {
        let mut fields = Vec::new();
        let mut skipped = Vec::new();
        for (name, origin) in kinds {
            let Some(array) = record.get(name) else {
                skipped.push(name.clone());
                continue;
            };
            let compressed_size = entries.iter()
                .find(|entry| entry.name.strip_suffix(".npy") == Some(name.as_str()))
                .map(|entry| entry.compressed_size);
            fields.push(FieldSummary {
                name: name.clone(),
                origin: *origin,
                dtype: array.element_type().descr(),
                shape: format_shape(array.shape()),
                compressed_size,
            });
        }
        ConversionReport { input, output, category, fields, skipped, layout_issues: Vec::new() }
    }

    pub fn with_layout_issues(mut self, issues: Vec<String>) -> Self {
        self.layout_issues = issues;
        self
    }

    pub fn table(&self) -> Table {
        let mut table = Table::new();
        let header = vec![
            Cell::new("Field"),
            Cell::new("Origin"),
            Cell::new("Dtype"),
            Cell::new("Shape"),
            Cell::new("Compressed"),
        ];
        table.set_titles(Row::new(header));
        for field in self.fields.iter() {
            let compressed = field.compressed_size
                .map_or(" ".to_string(), |size| size.to_string());
            table.add_row(Row::new(vec![
                Cell::new(field.name.as_str()),
                Cell::new(field.origin.to_string().as_str()),
                Cell::new(field.dtype),
                Cell::new(field.shape.as_str()),
                Cell::new(compressed.as_str()),
            ]));
        }
        table
    }

    pub fn print(&self) {
        println!("{} -> {} ({})", self.input.display(), self.output.display(), self.category);
        self.table().printstd();
        if !self.skipped.is_empty() {
            println!("Skipped: {}", self.skipped.iter().join(", "));
        }
        for issue in self.layout_issues.iter() {
            println!("Layout: {issue}");
        }
    }
}
