use std::path::Path;

use crate::error::{CdeError, Result};

/// Maximum accepted prompt length in characters
pub const MAX_PROMPT_CHARS: usize = 100_000;

/// Maximum accepted project name length
pub const MAX_NAME_CHARS: usize = 120;

/// Input validation utilities shared by the tool surface and coordinator.
///
/// All checks are pure; filesystem existence checks belong to the callers
/// that actually touch the filesystem.
pub struct InputValidator;

impl InputValidator {
    /// Validate a free-text task prompt
    pub fn validate_prompt(prompt: &str) -> Result<()> {
        if prompt.trim().is_empty() {
            return Err(CdeError::empty_field("prompt"));
        }
        if prompt.chars().count() > MAX_PROMPT_CHARS {
            return Err(CdeError::Validation(format!(
                "Prompt exceeds {MAX_PROMPT_CHARS} characters"
            )));
        }
        Ok(())
    }

    /// Validate a project name
    pub fn validate_project_name(name: &str) -> Result<()> {
        if name.trim().is_empty() {
            return Err(CdeError::empty_field("name"));
        }
        if name.chars().count() > MAX_NAME_CHARS {
            return Err(CdeError::Validation(format!(
                "Project name exceeds {MAX_NAME_CHARS} characters"
            )));
        }
        if name.chars().any(|c| c == '\0' || c == '\n') {
            return Err(CdeError::Validation(
                "Project name contains control characters".to_string(),
            ));
        }
        Ok(())
    }

    /// Validate that a project path is absolute
    pub fn validate_project_path(path: &Path) -> Result<()> {
        if path.as_os_str().is_empty() {
            return Err(CdeError::empty_field("path"));
        }
        if !path.is_absolute() {
            return Err(CdeError::Validation(format!(
                "Project path must be absolute, got '{}'",
                path.display()
            )));
        }
        Ok(())
    }

    /// Validate an agent id against the known chain format
    pub fn validate_agent_id(agent_id: &str) -> Result<()> {
        if agent_id.trim().is_empty() {
            return Err(CdeError::empty_field("agent_id"));
        }
        if !agent_id
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_')
        {
            return Err(CdeError::Validation(format!(
                "Agent id '{agent_id}' must be lowercase alphanumeric with '-' or '_'"
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_prompt_validation() {
        assert!(InputValidator::validate_prompt("fix the bug").is_ok());
        assert!(InputValidator::validate_prompt("  ").is_err());
        let long = "x".repeat(MAX_PROMPT_CHARS + 1);
        assert!(InputValidator::validate_prompt(&long).is_err());
    }

    #[test]
    fn test_project_name_validation() {
        assert!(InputValidator::validate_project_name("my-project").is_ok());
        assert!(InputValidator::validate_project_name("").is_err());
        assert!(InputValidator::validate_project_name("bad\nname").is_err());
        let long = "n".repeat(MAX_NAME_CHARS + 1);
        assert!(InputValidator::validate_project_name(&long).is_err());
    }

    #[test]
    fn test_path_must_be_absolute() {
        assert!(InputValidator::validate_project_path(&PathBuf::from("/tmp/ok")).is_ok());
        assert!(InputValidator::validate_project_path(&PathBuf::from("relative/path")).is_err());
        assert!(InputValidator::validate_project_path(&PathBuf::from("")).is_err());
    }

    #[test]
    fn test_agent_id_format() {
        assert!(InputValidator::validate_agent_id("jules").is_ok());
        assert!(InputValidator::validate_agent_id("deep_agents-2").is_ok());
        assert!(InputValidator::validate_agent_id("Jules").is_err());
        assert!(InputValidator::validate_agent_id("").is_err());
    }
}
