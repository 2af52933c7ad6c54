use itertools::Itertools;
use crate::model::array::{format_shape, DenseArray};
use crate::model::record::DenseRecord;

/// Compares a dense record against the arrays a body-model loader reads
/// from `SMPL_*.npz`, returning one message per mismatch.
pub fn check_consumer_layout(record: &DenseRecord) -> Vec<String> {
    let mut issues = Vec::new();

    let joints = required(record, "kintree_table", &mut issues)
        .and_then(|table| expect_shape(table, "kintree_table", &[Some(2), None], &mut issues))
        .map(|shape| shape[1]);
    let vertices = required(record, "v_template", &mut issues)
        .and_then(|verts| expect_shape(verts, "v_template", &[None, Some(3)], &mut issues))
        .map(|shape| shape[0]);
    if vertices == Some(0) {
        issues.push("v_template has no vertices".to_string());
    }

    match record.get("f") {
        Some(faces) => {
            expect_shape(faces, "f", &[None, Some(3)], &mut issues);
            let element = faces.element_type();
            if !element.is_integer() || element.size() != 4 {
                issues.push(format!("f must hold 4-byte integers, found {}", element.descr()));
            }
        }
        None => issues.push("no triangle faces (f), meshes will not render".to_string())
    }

    if let Some(regressor) = required(record, "J_regressor", &mut issues) {
        expect_shape(regressor, "J_regressor", &[joints, vertices], &mut issues);
    }
    if let Some(weights) = required(record, "weights", &mut issues) {
        expect_shape(weights, "weights", &[vertices, joints], &mut issues);
    }
    if let Some(shapedirs) = required(record, "shapedirs", &mut issues) {
        expect_shape(shapedirs, "shapedirs", &[vertices, Some(3), None], &mut issues);
    }
    if let Some(posedirs) = required(record, "posedirs", &mut issues) {
        let pose_blends = joints.map(|j| 9 * j.saturating_sub(1));
        expect_shape(posedirs, "posedirs", &[vertices, Some(3), pose_blends], &mut issues);
    }

    issues
}

fn required<'r>(record: &'r DenseRecord, name: &str, issues: &mut Vec<String>) -> Option<&'r DenseArray> {
    let Some(array) = record.get(name) else {
        issues.push(format!("missing required array {name}"));
        return None;
    };
    let element = array.element_type();
    if element.size() != 4 && element.size() != 8 {
        issues.push(format!("{name} has {}-byte elements, expected 4 or 8", element.size()));
    }
    Some(array)
}

fn expect_shape<'a>(array: &'a DenseArray,
                    name: &str,
                    expected: &[Option<usize>],
                    issues: &mut Vec<String>) -> Option<&'a [usize]> {
    let shape = array.shape();
    let matches = shape.len() == expected.len()
        && shape.iter().zip(expected).all(|(&actual, want)| want.map_or(true, |want| actual == want));
    if matches {
        return Some(shape);
    }
    let wanted = expected.iter()
        .map(|extent| extent.map_or("?".to_string(), |extent| extent.to_string()))
        .join("x");
    issues.push(format!("{name} has shape {}, expected {wanted}", format_shape(shape)));
    None
}
