//! Python toolchain validation backend.
//!
//! Materializes the generated file map into a temporary directory and
//! runs the interpreter against it: per-file syntax compilation, an
//! optional ruff lint pass, and pytest when the artifact ships tests.
//! Every external command runs under the configured timeout.

use std::collections::BTreeMap;
use std::path::Path;
use std::process::Output;
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;
use tokio::process::Command;

use crate::config::ValidationConfig;
use crate::errors::{ServiceError, ServiceResult};
use crate::state::{FileIssue, TestResult};
use crate::traits::ValidationService;

pub struct PythonToolchainValidator {
    config: ValidationConfig,
}

impl PythonToolchainValidator {
    pub fn new(config: ValidationConfig) -> Self {
        Self { config }
    }

    /// Write the file map into a fresh temp directory, creating
    /// intermediate directories as needed.
    async fn materialize(&self, files: &BTreeMap<String, String>) -> ServiceResult<TempDir> {
        let dir = tempfile::tempdir().map_err(ServiceError::ProcessError)?;
        for (path, content) in files {
            // Reject paths that would escape the workspace.
            if path.starts_with('/') || path.split('/').any(|part| part == "..") {
                return Err(ServiceError::InvalidResponse(format!(
                    "unsafe file path in artifact: {}",
                    path
                )));
            }
            let full = dir.path().join(path);
            if let Some(parent) = full.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(&full, content).await?;
        }
        Ok(dir)
    }

    async fn run_command(
        &self,
        program: &str,
        args: &[&str],
        cwd: &Path,
    ) -> ServiceResult<Output> {
        let timeout = Duration::from_secs(self.config.tool_timeout_secs);
        let future = Command::new(program)
            .args(args)
            .current_dir(cwd)
            .kill_on_drop(true)
            .output();
        match tokio::time::timeout(timeout, future).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(ServiceError::Timeout),
        }
    }
}

/// Pull a `line N` reference out of a CPython traceback, defaulting
/// to line 0 when the message has no location.
fn extract_line(stderr: &str) -> u32 {
    for part in stderr.split("line ").skip(1) {
        let digits: String = part.chars().take_while(|c| c.is_ascii_digit()).collect();
        if let Ok(n) = digits.parse() {
            return n;
        }
    }
    0
}

/// Last non-empty line of a traceback, which CPython uses for the
/// actual error message.
fn last_error_line(stderr: &str) -> String {
    stderr
        .lines()
        .rev()
        .find(|l| !l.trim().is_empty())
        .unwrap_or("syntax error")
        .trim()
        .to_string()
}

#[derive(serde::Deserialize)]
struct RuffDiagnostic {
    filename: String,
    message: String,
    #[serde(default)]
    location: RuffLocation,
}

#[derive(serde::Deserialize, Default)]
struct RuffLocation {
    #[serde(default)]
    row: u32,
}

#[async_trait]
impl ValidationService for PythonToolchainValidator {
    async fn check_syntax(
        &self,
        files: &BTreeMap<String, String>,
    ) -> ServiceResult<Vec<FileIssue>> {
        let dir = self.materialize(files).await?;
        let mut issues = Vec::new();

        for path in files.keys().filter(|p| p.ends_with(".py")) {
            let output = self
                .run_command(&self.config.python_bin, &["-m", "py_compile", path], dir.path())
                .await?;
            if !output.status.success() {
                let stderr = String::from_utf8_lossy(&output.stderr);
                issues.push(FileIssue {
                    file: path.clone(),
                    line: extract_line(&stderr),
                    message: last_error_line(&stderr),
                });
            }
        }

        Ok(issues)
    }

    async fn lint(&self, files: &BTreeMap<String, String>) -> ServiceResult<Vec<FileIssue>> {
        if !self.config.lint_enabled {
            return Ok(Vec::new());
        }

        let dir = self.materialize(files).await?;
        let output = match self
            .run_command("ruff", &["check", "--output-format", "json", "."], dir.path())
            .await
        {
            Ok(output) => output,
            // Lint is best-effort: a missing ruff binary skips the
            // pass rather than failing validation.
            Err(ServiceError::ProcessError(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!("ruff not found on PATH, skipping lint pass");
                return Ok(Vec::new());
            }
            Err(e) => return Err(e),
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        let diagnostics: Vec<RuffDiagnostic> = match serde_json::from_str(&stdout) {
            Ok(d) => d,
            Err(e) => {
                tracing::warn!(error = %e, "unparseable ruff output, skipping lint pass");
                return Ok(Vec::new());
            }
        };

        let prefix = format!("{}/", dir.path().display());
        Ok(diagnostics
            .into_iter()
            .map(|d| FileIssue {
                file: d.filename.strip_prefix(&prefix).unwrap_or(&d.filename).to_string(),
                line: d.location.row,
                message: d.message,
            })
            .collect())
    }

    async fn run_tests(&self, files: &BTreeMap<String, String>) -> ServiceResult<Vec<TestResult>> {
        let has_tests = files.keys().any(|p| {
            let name = p.rsplit('/').next().unwrap_or(p);
            name.starts_with("test_") || name.ends_with("_test.py")
        });
        if !has_tests {
            return Ok(Vec::new());
        }

        let dir = self.materialize(files).await?;
        let result = self
            .run_command(
                &self.config.python_bin,
                &["-m", "pytest", "-q", "--no-header"],
                dir.path(),
            )
            .await;

        match result {
            Ok(output) if output.status.success() => Ok(vec![TestResult {
                test_name: "pytest".to_string(),
                passed: true,
                error_message: None,
            }]),
            Ok(output) => {
                let stdout = String::from_utf8_lossy(&output.stdout);
                // Keep the summary tail; full pytest output is noise.
                let tail: Vec<&str> = stdout.lines().rev().take(20).collect();
                let summary = tail.into_iter().rev().collect::<Vec<_>>().join("\n");
                Ok(vec![TestResult {
                    test_name: "pytest".to_string(),
                    passed: false,
                    error_message: Some(summary),
                }])
            }
            Err(ServiceError::Timeout) => Ok(vec![TestResult {
                test_name: "pytest".to_string(),
                passed: false,
                error_message: Some(format!(
                    "test run timed out after {}s",
                    self.config.tool_timeout_secs
                )),
            }]),
            Err(e) => Err(e),
        }
    }
}
