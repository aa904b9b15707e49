//! Build dependencies from `debian/control`

use std::fs;
use std::path::{Path, PathBuf};

use debforge_core::PackageId;

use crate::error::{Result, ToolsError};

/// Source paragraph fields that carry build dependencies
const BUILD_DEP_FIELDS: &[&str] = &["Build-Depends", "Build-Depends-Indep", "Build-Depends-Arch"];

/// `debian/control` under `tree`, if present
pub fn locate(tree: &Path) -> Option<PathBuf> {
    let path = tree.join("debian").join("control");
    path.is_file().then_some(path)
}

/// Read the build dependencies declared in a control file
pub fn read_build_deps(path: &Path) -> Result<Vec<PackageId>> {
    let content = fs::read_to_string(path)
        .map_err(|e| ToolsError::control_file(path, format!("cannot read: {e}")))?;
    parse_build_deps(&content).map_err(|reason| ToolsError::control_file(path, reason))
}

/// Primary package names from the source paragraph, in declaration order
///
/// Alternatives (`a | b`) resolve to their first member; version
/// constraints, architecture and profile restrictions and `:any`/`:native`
/// qualifiers are dropped.
pub fn parse_build_deps(content: &str) -> std::result::Result<Vec<PackageId>, String> {
    let mut deps: Vec<PackageId> = Vec::new();
    for value in source_fields(content) {
        for group in value.split(',') {
            let Some(first) = group.split('|').next() else {
                continue;
            };
            let Some(name) = package_name(first) else {
                continue;
            };
            let id = PackageId::new(name).map_err(|e| e.to_string())?;
            if !deps.contains(&id) {
                deps.push(id);
            }
        }
    }
    Ok(deps)
}

/// Values of the build dependency fields in the first paragraph
fn source_fields(content: &str) -> Vec<String> {
    let mut values = Vec::new();
    let mut current: Option<String> = None;
    let mut started = false;

    for line in content.lines() {
        if line.trim().is_empty() {
            // End of the source paragraph
            if started {
                break;
            }
            continue;
        }
        started = true;
        if line.starts_with('#') {
            continue;
        }
        if line.starts_with(' ') || line.starts_with('\t') {
            if let Some(value) = current.as_mut() {
                value.push(' ');
                value.push_str(line.trim());
            }
            continue;
        }

        if let Some(value) = current.take() {
            values.push(value);
        }
        if let Some((field, value)) = line.split_once(':') {
            if BUILD_DEP_FIELDS.iter().any(|f| f.eq_ignore_ascii_case(field.trim())) {
                current = Some(value.trim().to_string());
            }
        }
    }
    if let Some(value) = current {
        values.push(value);
    }
    values
}

fn package_name(relation: &str) -> Option<&str> {
    let end = relation
        .trim()
        .find(|c: char| c.is_whitespace() || matches!(c, '(' | '[' | '<' | ':'))
        .unwrap_or(relation.trim().len());
    let name = &relation.trim()[..end];
    (!name.is_empty() && !name.starts_with('$')).then_some(name)
}
