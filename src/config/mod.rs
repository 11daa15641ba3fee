use std::path::{Path, PathBuf};

use crate::diagnostic::Diagnostic;
use crate::ir::IterationOrder;
use crate::span::Span;

/// File name searched for by `Config::find`.
pub const CONFIG_FILE: &str = "gradus.toml";

/// Runtime settings from the `[runtime]` section of gradus.toml.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Config {
    /// Log forward and reverse IR at info level when kernels are compiled.
    pub print_ir: bool,
    /// Derive reverse kernels at compile time instead of on first use.
    pub eager_gradients: bool,
    pub forward_order: IterationOrder,
    pub gradient_order: IterationOrder,
    /// Fuse adjacent independent launches in the deferred queue.
    pub fusion: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            print_ir: false,
            eager_gradients: false,
            forward_order: IterationOrder::Forward,
            gradient_order: IterationOrder::Reverse,
            fusion: true,
        }
    }
}

fn parse_bool(key: &str, value: &str, span: Span) -> Result<bool, Diagnostic> {
    match value {
        "true" => Ok(true),
        "false" => Ok(false),
        _ => Err(Diagnostic::error(
            format!("'{}' expects true or false, found '{}'", key, value),
            span,
        )),
    }
}

fn parse_order(key: &str, value: &str, span: Span) -> Result<IterationOrder, Diagnostic> {
    IterationOrder::from_name(value.trim_matches('"')).ok_or_else(|| {
        Diagnostic::error(
            format!("'{}' expects \"forward\" or \"reverse\", found {}", key, value),
            span,
        )
    })
}

impl Config {
    /// Parse gradus.toml contents. Unknown sections are ignored; unknown
    /// keys in `[runtime]` are errors.
    pub fn parse(content: &str) -> Result<Config, Diagnostic> {
        let mut config = Config::default();
        let mut current_section = String::new();
        let mut offset = 0u32;

        for raw in content.split_inclusive('\n') {
            let start = offset;
            offset += raw.len() as u32;
            let line = raw.trim_end_matches(['\n', '\r']);
            let span = Span::new(start, start + line.len() as u32);

            let trimmed = line.trim();
            if trimmed.starts_with('#') || trimmed.is_empty() {
                continue;
            }
            if trimmed.starts_with('[') && trimmed.ends_with(']') {
                current_section = trimmed[1..trimmed.len() - 1].trim().to_string();
                continue;
            }
            if current_section != "runtime" {
                continue;
            }
            let Some((key, value)) = trimmed.split_once('=') else {
                return Err(Diagnostic::error(
                    format!("expected 'key = value', found '{}'", trimmed),
                    span,
                ));
            };
            let key = key.trim().trim_matches('"');
            // Trailing comments
            let value = value.split('#').next().unwrap_or("").trim();

            match key {
                "print_ir" => config.print_ir = parse_bool(key, value, span)?,
                "eager_gradients" => config.eager_gradients = parse_bool(key, value, span)?,
                "fusion" => config.fusion = parse_bool(key, value, span)?,
                "forward_order" => config.forward_order = parse_order(key, value, span)?,
                "gradient_order" => config.gradient_order = parse_order(key, value, span)?,
                _ => {
                    return Err(Diagnostic::error(
                        format!("unknown runtime setting '{}'", key),
                        span,
                    )
                    .with_help(
                        "known settings: print_ir, eager_gradients, fusion, forward_order, gradient_order"
                            .to_string(),
                    ))
                }
            }
        }
        Ok(config)
    }

    /// Load settings from a gradus.toml file.
    pub fn load(path: &Path) -> Result<Config, Diagnostic> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Diagnostic::error(
                format!("cannot read '{}': {}", path.display(), e),
                Span::dummy(),
            )
        })?;
        let config = Config::parse(&content)
            .map_err(|d| d.with_note(format!("in {}", path.display())))?;
        log::debug!("loaded {}: {:?}", path.display(), config);
        Ok(config)
    }

    /// Try to find a gradus.toml in the given directory or its ancestors.
    pub fn find(start_dir: &Path) -> Option<PathBuf> {
        let mut dir = start_dir.to_path_buf();
        loop {
            let candidate = dir.join(CONFIG_FILE);
            if candidate.exists() {
                return Some(candidate);
            }
            if !dir.pop() {
                return None;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert!(!config.print_ir);
        assert!(!config.eager_gradients);
        assert!(config.fusion);
        assert_eq!(config.forward_order, IterationOrder::Forward);
        assert_eq!(config.gradient_order, IterationOrder::Reverse);
        assert_eq!(Config::parse("").unwrap(), config);
    }

    #[test]
    fn test_load_runtime_section() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        fs::write(
            &path,
            r#"# kernels for the solver
[runtime]
print_ir = true
eager_gradients = true  # derive up front
gradient_order = "forward"
fusion = false

[other]
anything = "ignored"
"#,
        )
        .unwrap();

        let config = Config::load(&path).unwrap();
        assert!(config.print_ir);
        assert!(config.eager_gradients);
        assert!(!config.fusion);
        assert_eq!(config.gradient_order, IterationOrder::Forward);
        assert_eq!(config.forward_order, IterationOrder::Forward);
    }

    #[test]
    fn test_unknown_key_is_error() {
        let err = Config::parse("[runtime]\nprint_ir = true\nthreads = 4\n").unwrap_err();
        assert!(err.message.contains("threads"));
        assert!(err.help.is_some());
        // Span covers the offending line.
        assert_eq!(err.span.start, 26);
    }

    #[test]
    fn test_crlf_spans_track_line_starts() {
        let err = Config::parse("[runtime]\r\nprint_ir = true\r\nthreads = 4\r\n").unwrap_err();
        assert!(err.message.contains("threads"));
        assert_eq!(err.span, Span::new(28, 39));
    }

    #[test]
    fn test_bad_values() {
        assert!(Config::parse("[runtime]\nfusion = yes\n").is_err());
        assert!(Config::parse("[runtime]\ngradient_order = \"sideways\"\n").is_err());
        assert!(Config::parse("[runtime]\njust a line\n").is_err());
    }

    #[test]
    fn test_find_walks_ancestors() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a").join("b");
        fs::create_dir_all(&nested).unwrap();
        fs::write(dir.path().join(CONFIG_FILE), "[runtime]\n").unwrap();

        let found = Config::find(&nested).unwrap();
        assert_eq!(found, dir.path().join(CONFIG_FILE));
    }

    #[test]
    fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = Config::load(&dir.path().join(CONFIG_FILE)).unwrap_err();
        assert!(err.message.contains("cannot read"));
    }
}
