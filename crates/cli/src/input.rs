//! Loading rule and model files from disk.

use std::path::{Path, PathBuf};

use riskscript_eval::RiskRule;

/// Read a model file. `.json` files are parsed as JSON, anything else
/// as YAML.
pub fn read_model(path: &Path) -> Result<serde_json::Value, String> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| format!("could not read '{}': {}", path.display(), e))?;
    let is_json = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
    if is_json {
        serde_json::from_str(&content)
            .map_err(|e| format!("invalid JSON in '{}': {}", path.display(), e))
    } else {
        serde_yaml::from_str(&content)
            .map_err(|e| format!("invalid YAML in '{}': {}", path.display(), e))
    }
}

/// Rule files named by `path`: the file itself, or every `.yaml`/`.yml`
/// file directly inside a directory, sorted by name.
pub fn rule_files(path: &Path) -> Result<Vec<PathBuf>, String> {
    if !path.is_dir() {
        return Ok(vec![path.to_path_buf()]);
    }
    let entries = std::fs::read_dir(path)
        .map_err(|e| format!("could not read '{}': {}", path.display(), e))?;
    let mut files = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| format!("could not read '{}': {}", path.display(), e))?;
        let file = entry.path();
        let is_rule = file
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| matches!(ext.to_ascii_lowercase().as_str(), "yaml" | "yml"));
        if file.is_file() && is_rule {
            files.push(file);
        }
    }
    files.sort();
    Ok(files)
}

/// Read and parse one rule file.
pub fn read_rule(path: &Path) -> Result<RiskRule, String> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| format!("could not read '{}': {}", path.display(), e))?;
    RiskRule::from_yaml(&content)
        .map_err(|e| format!("error parsing rule '{}': {}", path.display(), e))
}
