//! Configuration file for `riskscript run --config`.
//!
//! # Example
//!
//! ```toml
//! [eval]
//! max_call_depth = 32
//! ```

use std::path::Path;

use serde::Deserialize;

use riskscript_eval::EvalConfig;

/// Top-level configuration. Every section is optional.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    /// `[eval]` section: evaluation limits.
    pub eval: EvalConfig,
}

/// Read and parse a config TOML file from `path`.
///
/// Returns a human-readable error string on failure.
pub fn read_config(path: &Path) -> Result<CliConfig, String> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| format!("could not read '{}': {}", path.display(), e))?;

    toml::from_str(&content).map_err(|e| format!("could not parse '{}': {}", path.display(), e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_uses_defaults() {
        let config: CliConfig = toml::from_str("").unwrap();
        assert_eq!(config.eval.max_call_depth, 64);
    }

    #[test]
    fn eval_section_overrides_depth() {
        let config: CliConfig = toml::from_str("[eval]\nmax_call_depth = 8\n").unwrap();
        assert_eq!(config.eval.max_call_depth, 8);
    }

    #[test]
    fn unreadable_file_is_reported() {
        let err = read_config(Path::new("/nonexistent/riskscript.toml")).unwrap_err();
        assert!(err.starts_with("could not read '/nonexistent/riskscript.toml'"));
    }
}
