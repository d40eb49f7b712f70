//! Leaf Task Execution
//!
//! Runs the work of a single leaf task run:
//! - Rendering of commands and messages through the evaluator
//! - Script generation for `bash` tasks
//! - Logging for `log` tasks, forced failure for `fail` tasks

use std::error::Error;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Command;

use log::{debug, error, info, warn};

use crate::error::EvaluationError;
use crate::template::{Evaluator, VariableScope};
use crate::workflow::{Task, TaskKind};

/// What a leaf task run does, with every template already rendered.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    Bash { command: String },
    Log { message: String },
    Fail { message: Option<String> },
}

impl Action {
    /// Renders the action of a leaf task. Returns `Ok(None)` for composites.
    pub fn render(
        task: &Task,
        evaluator: &dyn Evaluator,
        scope: &VariableScope,
    ) -> Result<Option<Self>, EvaluationError> {
        let action = match &task.kind {
            TaskKind::Bash { command } => Self::Bash {
                command: evaluator.render(command, scope)?,
            },
            TaskKind::Log { message } => Self::Log {
                message: evaluator.render(message, scope)?,
            },
            TaskKind::Fail { message } => Self::Fail {
                message: message
                    .as_deref()
                    .map(|m| evaluator.render(m, scope))
                    .transpose()?,
            },
            _ => return Ok(None),
        };
        Ok(Some(action))
    }
}

/// A leaf task run handed to a worker thread.
#[derive(Debug, Clone)]
pub struct WorkItem {
    pub task_run_id: String,
    pub task_id: String,
    pub value: Option<String>,
    /// 1 for the first run, incremented on every retry
    pub attempt: u32,
    pub action: Action,
}

impl WorkItem {
    /// Label used in logs, e.g. `align[s1]`.
    pub fn label(&self) -> String {
        match &self.value {
            Some(value) => format!("{}[{}]", self.task_id, value),
            None => self.task_id.clone(),
        }
    }
}

/// Executes a work item.
///
/// # Returns
///
/// * `Ok(())` - The task run succeeded
/// * `Err` - The task run failed with a descriptive error
pub fn execute(
    item: &WorkItem,
    working_dir: &Option<PathBuf>,
    dry_run: bool,
) -> Result<(), Box<dyn Error + Send + Sync>> {
    if dry_run {
        print_dry_run(item);
        return Ok(());
    }

    match &item.action {
        Action::Log { message } => {
            info!("[{}] {}", item.label(), message);
            Ok(())
        }
        Action::Fail { message } => {
            let reason = message.as_deref().unwrap_or("Task failed");
            Err(format!(
                "Task '{}' failed on attempt {}: {}",
                item.label(),
                item.attempt,
                reason
            )
            .into())
        }
        Action::Bash { command } => run_bash(item, command, working_dir),
    }
}

fn print_dry_run(item: &WorkItem) {
    println!();
    println!("[DRY RUN] Task: {} (attempt {})", item.label(), item.attempt);
    match &item.action {
        Action::Bash { command } => println!("  Command: {}", command),
        Action::Log { message } => println!("  Log: {}", message),
        Action::Fail { message } => {
            println!("  Fail: {}", message.as_deref().unwrap_or("(no message)"))
        }
    }
}

fn run_bash(
    item: &WorkItem,
    command: &str,
    working_dir: &Option<PathBuf>,
) -> Result<(), Box<dyn Error + Send + Sync>> {
    let script_path = create_execution_script(&item.task_run_id, command)?;
    let output = execute_with_bash(&script_path, working_dir);

    if let Err(e) = fs::remove_file(&script_path) {
        warn!("Failed to clean up script {}: {}", script_path.display(), e);
    }
    let output = output?;

    if output.status.success() {
        debug!("Task '{}' completed successfully", item.label());

        let stdout = String::from_utf8_lossy(&output.stdout);
        if !stdout.trim().is_empty() {
            debug!("Task '{}' output:\n{}", item.label(), stdout);
        }
        Ok(())
    } else {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let stdout = String::from_utf8_lossy(&output.stdout);

        error!(
            "Task '{}' failed with exit code {:?} on attempt {}",
            item.label(),
            output.status.code(),
            item.attempt
        );
        if !stderr.trim().is_empty() {
            error!("stderr:\n{}", stderr);
        }
        if !stdout.trim().is_empty() {
            debug!("stdout:\n{}", stdout);
        }

        Err(format!(
            "Task '{}' exited with code {:?} on attempt {}",
            item.label(),
            output.status.code(),
            item.attempt
        )
        .into())
    }
}

/// Creates a temporary bash script for one task run.
fn create_execution_script(
    task_run_id: &str,
    command_text: &str,
) -> Result<PathBuf, Box<dyn Error + Send + Sync>> {
    let script_dir = std::env::temp_dir().join("flowrunner_scripts");
    fs::create_dir_all(&script_dir)?;

    let script_path = script_dir.join(format!("run_{}.sh", task_run_id));
    let mut file = File::create(&script_path)?;

    writeln!(file, "#!/bin/bash")?;
    writeln!(file, "set -e")?;
    writeln!(file, "{}", command_text)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(&script_path, fs::Permissions::from_mode(0o755))?;
    }

    Ok(script_path)
}

fn execute_with_bash(
    script_path: &Path,
    working_dir: &Option<PathBuf>,
) -> Result<std::process::Output, Box<dyn Error + Send + Sync>> {
    let mut cmd = Command::new("bash");
    cmd.arg(script_path);

    if let Some(dir) = working_dir {
        cmd.current_dir(dir);
        debug!("Executing in directory: {}", dir.display());
    }

    Ok(cmd.output()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::TemplateEvaluator;
    use serde_json::json;
    use tempfile::tempdir;

    fn item(action: Action) -> WorkItem {
        WorkItem {
            task_run_id: uuid::Uuid::new_v4().to_string(),
            task_id: "test".to_string(),
            value: None,
            attempt: 1,
            action,
        }
    }

    #[test]
    fn test_render_bash() {
        let mut scope = VariableScope::new();
        scope.insert_path("taskrun.value", json!("s1"));
        let task = Task::bash("align", "echo {{ taskrun.value }}");

        let action = Action::render(&task, &TemplateEvaluator, &scope).unwrap();
        assert_eq!(
            action,
            Some(Action::Bash {
                command: "echo s1".to_string()
            })
        );
    }

    #[test]
    fn test_render_composite_is_none() {
        let task = Task::sequential("seq", vec![Task::log("a", "a")]);
        let action = Action::render(&task, &TemplateEvaluator, &VariableScope::new()).unwrap();
        assert!(action.is_none());
    }

    #[test]
    fn test_render_unresolved() {
        let task = Task::log("say", "{{ inputs.missing }}");
        assert!(Action::render(&task, &TemplateEvaluator, &VariableScope::new()).is_err());
    }

    #[test]
    fn test_label() {
        let mut work = item(Action::Log {
            message: "hi".to_string(),
        });
        assert_eq!(work.label(), "test");
        work.value = Some("s1".to_string());
        assert_eq!(work.label(), "test[s1]");
    }

    #[test]
    fn test_create_execution_script() {
        let script_path = create_execution_script("script-test", "echo 'hello world'").unwrap();
        assert!(script_path.exists());

        let content = std::fs::read_to_string(&script_path).unwrap();
        assert!(content.contains("#!/bin/bash"));
        assert!(content.contains("set -e"));
        assert!(content.contains("echo 'hello world'"));

        std::fs::remove_file(script_path).unwrap();
    }

    #[test]
    fn test_execute_bash() {
        let temp_dir = tempdir().unwrap();
        let work = item(Action::Bash {
            command: "echo hello > out.txt".to_string(),
        });

        let result = execute(&work, &Some(temp_dir.path().to_path_buf()), false);
        assert!(result.is_ok());
        assert!(temp_dir.path().join("out.txt").exists());
    }

    #[test]
    fn test_execute_bash_failure() {
        let work = item(Action::Bash {
            command: "exit 3".to_string(),
        });
        let err = execute(&work, &None, false).unwrap_err();
        assert!(err.to_string().contains("Some(3)"));
        assert!(err.to_string().contains("attempt 1"));
    }

    #[test]
    fn test_failure_reports_attempt() {
        let mut work = item(Action::Fail { message: None });
        work.attempt = 3;
        let err = execute(&work, &None, false).unwrap_err();
        assert_eq!(err.to_string(), "Task 'test' failed on attempt 3: Task failed");
    }

    #[test]
    fn test_execute_log_and_fail() {
        let log = item(Action::Log {
            message: "hello".to_string(),
        });
        assert!(execute(&log, &None, false).is_ok());

        let fail = item(Action::Fail {
            message: Some("boom".to_string()),
        });
        let err = execute(&fail, &None, false).unwrap_err();
        assert!(err.to_string().contains("boom"));
    }

    #[test]
    fn test_dry_run_does_nothing() {
        let temp_dir = tempdir().unwrap();
        let work = item(Action::Bash {
            command: "echo hello > out.txt".to_string(),
        });

        assert!(execute(&work, &Some(temp_dir.path().to_path_buf()), true).is_ok());
        assert!(!temp_dir.path().join("out.txt").exists());

        let fail = item(Action::Fail { message: None });
        assert!(execute(&fail, &None, true).is_ok());
    }
}
