//! `cadence validate`: configuration check.

use std::path::Path;

use anyhow::Context;
use chrono::Utc;

use cadence_config::{Config, ConfigLoader, ConfigValidator, ValidationWarning};
use cadence_scheduler::CronSchedule;
use cadence_workqueue::HandlerRegistry;

use crate::handlers;

/// Validate the configuration at `path` and print a report.
pub(crate) fn validate(path: &Path) -> anyhow::Result<()> {
    let config = ConfigLoader::load(path)
        .with_context(|| format!("failed to load {}", path.display()))?;
    let mut result = ConfigValidator::validate(&config);
    result.warnings.extend(handler_warnings(&config));

    println!("{}: {} job(s)", path.display(), config.jobs.len());
    for job in &config.jobs {
        let next = CronSchedule::parse(&job.schedule)
            .and_then(|s| s.next_after(Utc::now()))
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|_| "-".to_string());
        println!(
            "  {:<24} {:<16} queue={:<12} next={}",
            job.id, job.schedule, job.queue, next
        );
    }

    for warning in &result.warnings {
        println!("warning: {}", warning);
    }
    for error in &result.errors {
        println!("error: {}", error);
    }

    if !result.is_valid() {
        anyhow::bail!("{} error(s) in {}", result.errors.len(), path.display());
    }
    println!("Configuration is valid");
    Ok(())
}

/// Jobs whose payload has no built-in handler.
fn handler_warnings(config: &Config) -> Vec<ValidationWarning> {
    let handlers = HandlerRegistry::new();
    handlers::register_builtin(&handlers);

    config
        .jobs
        .iter()
        .enumerate()
        .filter(|(_, job)| !handlers.contains(&job.payload_ref))
        .map(|(i, job)| {
            ValidationWarning::new(
                format!("jobs[{}].payload_ref", i),
                format!("no built-in handler named '{}'", job.payload_ref),
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn config_file(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_valid_config() {
        let file = config_file(
            r#"
                [[jobs]]
                id = "monthly-trigger-job"
                schedule = "0 10 * * *"
                payload_ref = "builtin:log"
            "#,
        );
        assert!(validate(file.path()).is_ok());
    }

    #[test]
    fn test_invalid_config() {
        let file = config_file(
            r#"
                [[jobs]]
                id = "broken"
                schedule = "0 10 * *"
                payload_ref = "builtin:log"
            "#,
        );
        let err = validate(file.path()).unwrap_err();
        assert!(err.to_string().contains("1 error(s)"));
    }

    #[test]
    fn test_shipped_config() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("config/cadence.toml");
        assert!(validate(&path).is_ok());
    }

    #[test]
    fn test_missing_file() {
        assert!(validate(Path::new("/nonexistent/cadence.toml")).is_err());
    }

    #[test]
    fn test_unknown_handler_warns() {
        let config = ConfigLoader::load_str(
            r#"
                [[jobs]]
                id = "a"
                schedule = "@daily"
                payload_ref = "http:report"
            "#,
        )
        .unwrap();
        let warnings = handler_warnings(&config);
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].path, "jobs[0].payload_ref");
    }
}
