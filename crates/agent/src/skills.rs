//! Skill library: `SKILL.md` files discovered under a skills root.
//!
//! Each skill lives in its own directory:
//!
//! ```text
//! skills/
//!   gmail/SKILL.md
//!   project/jira/SKILL.md
//! ```
//!
//! A `SKILL.md` starts with YAML frontmatter carrying `name` and
//! `description`; the markdown body is the prompt content. Skills that fail
//! [`validate_skill`] are skipped.

use serde::Deserialize;
use serde::de::IgnoredAny;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

const SKILL_MD: &str = "SKILL.md";

/// Maximum length of a skill name.
pub const MAX_NAME_LEN: usize = 64;

/// Maximum length of a skill description.
pub const MAX_DESCRIPTION_LEN: usize = 1024;

/// One loaded skill.
#[derive(Debug, Clone, PartialEq)]
pub struct Skill {
    pub name: String,
    pub description: String,
    /// Markdown body, trimmed
    pub content: String,
    pub path: PathBuf,
}

/// Errors from loading a single skill file.
#[derive(Debug, thiserror::Error)]
pub enum SkillError {
    #[error("cannot read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid frontmatter in {}: {reason}", .path.display())]
    Frontmatter { path: PathBuf, reason: String },

    #[error("invalid skill {}: {}", .path.display(), .errors.join("; "))]
    Invalid { path: PathBuf, errors: Vec<String> },
}

/// Recognized frontmatter keys. Anything else is rejected.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct Frontmatter {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default, rename = "license")]
    _license: Option<IgnoredAny>,
    #[serde(default, rename = "allowed-tools")]
    _allowed_tools: Option<IgnoredAny>,
    #[serde(default, rename = "metadata")]
    _metadata: Option<IgnoredAny>,
}

/// Split `---`-delimited frontmatter from the body.
///
/// Returns `None` when the content does not open with a delimiter line or
/// the closing delimiter is missing.
fn split_frontmatter(content: &str) -> Option<(&str, &str)> {
    let content = content.trim_start_matches('\u{feff}');
    let rest = content.strip_prefix("---")?;
    let rest = &rest[rest.find('\n')? + 1..];

    let mut pos = 0;
    for line in rest.split_inclusive('\n') {
        if line.trim() == "---" {
            return Some((&rest[..pos], &rest[pos + line.len()..]));
        }
        pos += line.len();
    }
    None
}

/// Parse the text of a `SKILL.md`.
///
/// Missing `name` or `description` parse as empty strings; [`validate_skill`]
/// rejects them.
pub fn parse_skill(content: &str, path: &Path) -> Result<Skill, SkillError> {
    let frontmatter_error = |reason: String| SkillError::Frontmatter {
        path: path.to_path_buf(),
        reason,
    };

    let (yaml, body) = split_frontmatter(content)
        .ok_or_else(|| frontmatter_error("missing `---` frontmatter block".into()))?;
    let meta = if yaml.trim().is_empty() {
        Frontmatter::default()
    } else {
        serde_yaml::from_str::<Frontmatter>(yaml).map_err(|e| frontmatter_error(e.to_string()))?
    };

    Ok(Skill {
        name: meta.name.unwrap_or_default().trim().to_string(),
        description: meta.description.unwrap_or_default().trim().to_string(),
        content: body.trim().to_string(),
        path: path.to_path_buf(),
    })
}

/// Check the name and description of a skill.
///
/// Names are lowercase ASCII letters, digits and hyphens, at most
/// [`MAX_NAME_LEN`] long. Descriptions are required, at most
/// [`MAX_DESCRIPTION_LEN`] long and free of angle brackets. Both end up
/// inside the assembled system prompt.
pub fn validate_skill(skill: &Skill) -> Result<(), SkillError> {
    let mut errors = Vec::new();

    if skill.name.is_empty() {
        errors.push("name must not be empty".to_string());
    } else if skill.name.len() > MAX_NAME_LEN {
        errors.push(format!(
            "name exceeds max length of {MAX_NAME_LEN}: got {}",
            skill.name.len()
        ));
    } else if !is_valid_name(&skill.name) {
        errors.push(format!(
            "name contains invalid characters: '{}' (only a-z, 0-9 and '-' allowed)",
            skill.name
        ));
    }

    if skill.description.is_empty() {
        errors.push("description must not be empty".to_string());
    } else if skill.description.len() > MAX_DESCRIPTION_LEN {
        errors.push(format!(
            "description exceeds max length of {MAX_DESCRIPTION_LEN}: got {}",
            skill.description.len()
        ));
    } else if skill.description.contains(['<', '>']) {
        errors.push("description must not contain angle brackets".to_string());
    } else if skill.description.starts_with("[TODO") {
        errors.push("description is still a TODO placeholder".to_string());
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(SkillError::Invalid {
            path: skill.path.clone(),
            errors,
        })
    }
}

fn is_valid_name(name: &str) -> bool {
    name.chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
}

/// All skills found under one root, keyed by name.
#[derive(Debug, Clone, Default)]
pub struct SkillLibrary {
    skills: BTreeMap<String, Skill>,
}

impl SkillLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a library from already-loaded skills. Invalid skills and later
    /// duplicates are dropped.
    pub fn from_skills(skills: impl IntoIterator<Item = Skill>) -> Self {
        let mut library = Self::new();
        for skill in skills {
            library.insert(skill);
        }
        library
    }

    /// Walk `root` depth-first, in file-name order, and load every
    /// `SKILL.md`.
    ///
    /// A missing root yields an empty library. Symlinks are followed;
    /// symlink loops, unreadable entries and invalid skills are logged and
    /// skipped.
    pub fn discover(root: &Path) -> Self {
        let mut library = Self::new();
        if !root.is_dir() {
            debug!(root = %root.display(), "Skills root does not exist");
            return library;
        }

        let walker = WalkDir::new(root)
            .follow_links(true)
            .sort_by_file_name()
            .into_iter();

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) if err.loop_ancestor().is_some() => {
                    warn!(error = %err, "Skipping symlink loop in skills directory");
                    continue;
                }
                Err(err) => {
                    debug!(error = %err, "Skipping inaccessible entry in skills directory");
                    continue;
                }
            };

            if !entry.file_type().is_file() || entry.file_name() != SKILL_MD {
                continue;
            }

            match load_skill_file(entry.path()) {
                Ok(skill) => library.insert(skill),
                Err(e) => warn!(error = %e, "Skipping skill"),
            }
        }

        debug!(root = %root.display(), count = library.len(), "Discovered skills");
        library
    }

    fn insert(&mut self, skill: Skill) {
        if let Err(e) = validate_skill(&skill) {
            warn!(error = %e, "Skipping skill");
            return;
        }
        if let Some(existing) = self.skills.get(&skill.name) {
            warn!(
                skill = %skill.name,
                kept = %existing.path.display(),
                ignored = %skill.path.display(),
                "Duplicate skill name"
            );
            return;
        }
        self.skills.insert(skill.name.clone(), skill);
    }

    pub fn get(&self, name: &str) -> Option<&Skill> {
        self.skills.get(name)
    }

    /// Skill names, sorted.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.skills.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Skill> {
        self.skills.values()
    }

    pub fn len(&self) -> usize {
        self.skills.len()
    }

    pub fn is_empty(&self) -> bool {
        self.skills.is_empty()
    }
}

fn load_skill_file(skill_md: &Path) -> Result<Skill, SkillError> {
    let content = fs::read_to_string(skill_md).map_err(|source| SkillError::Io {
        path: skill_md.to_path_buf(),
        source,
    })?;
    parse_skill(&content, skill_md)
}
