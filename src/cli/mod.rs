pub mod hash;
pub mod print;
pub mod run;

use std::path::{Path, PathBuf};
use std::process;

use gradus::config::Config;
use gradus::{Program, Runtime};

/// Read and parse a program file, rendering diagnostics.
pub fn try_load_program(path: &Path) -> Option<(String, Program)> {
    let source = match std::fs::read_to_string(path) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("error: cannot read '{}': {}", path.display(), e);
            return None;
        }
    };
    let filename = path.to_string_lossy().to_string();
    match gradus::parse_program(&source, &filename) {
        Ok(program) => Some((source, program)),
        Err(errors) => {
            eprintln!(
                "error: {} problem(s) in '{}'",
                errors.len(),
                path.display()
            );
            None
        }
    }
}

/// Load and parse a program file, exiting on error.
pub fn load_program(path: &Path) -> Program {
    match try_load_program(path) {
        Some((_, program)) => program,
        None => process::exit(1),
    }
}

/// Resolve runtime settings: an explicit `--config`, else the nearest
/// gradus.toml above the program file, else defaults.
pub fn resolve_config(input: &Path, explicit: Option<&PathBuf>) -> Config {
    let found = match explicit {
        Some(path) => Some(path.clone()),
        None => Config::find(input.parent().unwrap_or(Path::new("."))),
    };
    let Some(path) = found else {
        return Config::default();
    };
    match Config::load(&path) {
        Ok(config) => config,
        Err(diag) => {
            if let Ok(source) = std::fs::read_to_string(&path) {
                diag.render(&path.to_string_lossy(), &source);
            } else {
                eprintln!("error: {}", diag.message);
            }
            process::exit(1);
        }
    }
}

/// A runtime with every field, gradient group and kernel of `program`.
pub fn build_runtime(program: &Program, config: Config) -> Runtime {
    let mut rt = Runtime::new(config);
    if let Err(e) = program.load_into(&mut rt) {
        eprintln!("error: {}", e);
        process::exit(1);
    }
    rt
}

/// Parse a `name=value` pair.
pub fn parse_assignment(s: &str) -> Result<(String, f64), String> {
    let (name, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=VALUE, found '{}'", s))?;
    let value: f64 = value
        .trim()
        .parse()
        .map_err(|_| format!("'{}' is not a number", value.trim()))?;
    Ok((name.trim().to_string(), value))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_assignment() {
        assert_eq!(parse_assignment("x=1.5"), Ok(("x".to_string(), 1.5)));
        assert_eq!(parse_assignment(" y = -2 "), Ok(("y".to_string(), -2.0)));
        assert!(parse_assignment("x").is_err());
        assert!(parse_assignment("x=abc").is_err());
    }

    #[test]
    fn test_resolve_config_walks_up() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("kernels");
        std::fs::create_dir(&nested).unwrap();
        std::fs::write(
            dir.path().join("gradus.toml"),
            "[runtime]\nfusion = false\n",
        )
        .unwrap();
        let config = resolve_config(&nested.join("k.gd"), None);
        assert!(!config.fusion);
    }
}
