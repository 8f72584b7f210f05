//! Skill reader tool — returns the full `SKILL.md` body of an enabled skill
//! so the model can pull in instructions on demand.

use async_trait::async_trait;
use std::collections::BTreeSet;
use std::sync::Arc;

use concierge_agent::SkillLibrary;
use concierge_core::{Tool, ToolError, ToolOutcome};

pub struct ReadSkillTool {
    library: Arc<SkillLibrary>,
    /// Skills the current agent may read; `None` means every skill
    allowed: Option<BTreeSet<String>>,
}

impl ReadSkillTool {
    pub fn new(library: Arc<SkillLibrary>) -> Self {
        Self {
            library,
            allowed: None,
        }
    }

    /// Restrict reads to the given skill names.
    pub fn with_allowed<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed = Some(names.into_iter().map(Into::into).collect());
        self
    }

    fn is_allowed(&self, name: &str) -> bool {
        self.allowed.as_ref().is_none_or(|a| a.contains(name))
    }

    fn available(&self) -> Vec<&str> {
        self.library.names().filter(|n| self.is_allowed(n)).collect()
    }
}

#[async_trait]
impl Tool for ReadSkillTool {
    fn name(&self) -> &str {
        "read_skill"
    }

    fn description(&self) -> &str {
        "Read the full instructions of one of your skills by name."
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "name": {
                    "type": "string",
                    "description": "The skill name, e.g. 'gmail'",
                    "enum": self.available()
                }
            },
            "required": ["name"]
        })
    }

    async fn execute(
        &self,
        input: serde_json::Value,
        _context: Option<&serde_json::Value>,
    ) -> Result<ToolOutcome, ToolError> {
        let name = input["name"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'name' argument".into()))?;

        let skill = match self.library.get(name) {
            Some(skill) if self.is_allowed(name) => skill,
            _ => {
                return Ok(ToolOutcome::failure(format!(
                    "Skill '{name}' is not available. Available skills: {}",
                    self.available().join(", ")
                )));
            }
        };

        Ok(ToolOutcome::success(serde_json::json!({
            "name": skill.name,
            "description": skill.description,
            "content": skill.content,
        })))
    }
}
