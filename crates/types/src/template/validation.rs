//! Structural checks applied to a composite template before it runs.

use std::collections::HashSet;

use super::CompositeTemplate;

/// Validate the structure of a composite template.
///
/// The checks are purely syntactic:
/// - the template has a name
/// - no run-task name is blank
/// - every default entry has a non-blank name, and names are unique once trimmed
pub fn validate_composite_template(template: &CompositeTemplate) -> Result<(), String> {
    if template.name.trim().is_empty() {
        return Err("composite template name is empty".to_string());
    }

    if let Some(position) = template.run_tasks.iter().position(|name| name.trim().is_empty()) {
        return Err(format!(
            "composite template '{}' has an empty run-task name at position {}",
            template.name, position
        ));
    }

    if let Some(output) = &template.output_task
        && output.trim().is_empty()
    {
        return Err(format!("composite template '{}' declares an empty output task", template.name));
    }

    let mut seen = HashSet::new();
    for entry in &template.defaults {
        let name = entry.name.trim();
        if name.is_empty() {
            return Err(format!("composite template '{}' has a default config entry without a name", template.name));
        }
        if !seen.insert(name.to_string()) {
            return Err(format!("composite template '{}' declares config '{}' more than once", template.name, name));
        }
    }
    Ok(())
}
