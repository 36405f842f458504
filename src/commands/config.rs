use anyhow::Result;
use colored::Colorize;
use sql_exporter::config::Config;
use std::path::Path;

/// Execute the config show command
///
/// Displays the effective configuration with DSN credentials masked.
pub fn show(config_path: &Path) -> Result<()> {
    println!("{}", "Loading configuration...".yellow());

    let config = Config::load(config_path)?;

    println!("{}", "Current configuration:".green().bold());
    println!();
    println!("{}", serde_yaml::to_string(&config.masked())?);

    Ok(())
}

/// Execute the config validate command
pub fn validate(config_path: &Path) -> Result<()> {
    println!("{}", "Validating configuration...".yellow());

    let config = Config::load(config_path)?;

    println!("{}", "✓ Configuration is valid".green());
    println!();
    println!("{}", "Summary:".bold());
    println!("  Jobs: {}", config.jobs.len());
    println!("  Collectors: {}", config.collectors.len());
    println!("  Targets: {}", config.target_count());

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const VALID: &str = r#"
collectors:
  - collector_name: c
    metrics:
      - metric_name: m
        type: gauge
        help: h
        values: [v]
        query: SELECT 1.0 AS v
jobs:
  - job_name: j
    collectors: [c]
    static_configs:
      - targets:
          i: "sqlite::memory:"
"#;

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_validate_valid_file() {
        let file = write_config(VALID);
        assert!(validate(file.path()).is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_file() {
        let file = write_config("jobs: []\n");
        assert!(validate(file.path()).is_err());
    }

    #[test]
    fn test_show_valid_file() {
        let file = write_config(VALID);
        assert!(show(file.path()).is_ok());
    }
}
