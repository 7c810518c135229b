pub mod config;
pub mod cpu;
pub mod simulate;

use std::path::Path;

use anyhow::Context;
use gridguard_core::GuardConfig;

/// Output format for command reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Format {
    Text,
    Json,
}

/// Load `path`, or fall back to the defaults when no file is given.
pub fn load_config(path: Option<&Path>) -> anyhow::Result<GuardConfig> {
    match path {
        Some(path) => GuardConfig::from_file(path)
            .with_context(|| format!("failed to load {}", path.display())),
        None => Ok(GuardConfig::default()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_path_uses_defaults() {
        assert_eq!(load_config(None).unwrap(), GuardConfig::default());
    }

    #[test]
    fn load_errors_name_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gridguard.toml");
        std::fs::write(&path, "[shedder]\nbeta_decay = 2.0\n").unwrap();

        let err = load_config(Some(&path)).unwrap_err();
        assert!(err.to_string().contains("gridguard.toml"));
        assert!(format!("{err:#}").contains("shedder.beta_decay"));
    }
}
