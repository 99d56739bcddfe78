//! Persona, skill, and agent resources.
//!
//! Resources are Markdown files under a resource directory: `personas/*.md`
//! (the whole body is the system message), `skills/*/SKILL.md` or
//! `skills/*.md` (YAML frontmatter plus body), and `agents/*.md`. A
//! project-local `.wn/` directory layers over the global `~/.wn/`; a
//! same-named entry from the local layer replaces the global one entirely.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::errors::AgentError;

pub const RESOURCE_DIR_NAME: &str = ".wn";

#[derive(Debug, Clone)]
pub struct Persona {
    pub name: String,
    pub content: String,
}

#[derive(Debug, Clone)]
pub struct Skill {
    pub name: String,
    pub description: String,
    pub tools: Vec<String>,
    pub body: String,
}

#[derive(Debug, Clone)]
pub struct AgentDef {
    pub name: String,
    pub persona: Option<String>,
    pub provider: Option<String>,
    pub model: Option<String>,
    pub skills: Vec<String>,
    pub description: String,
}

#[derive(Debug, Clone, Default)]
pub struct ResourceSet {
    pub personas: HashMap<String, Persona>,
    pub skills: HashMap<String, Skill>,
    pub agents: HashMap<String, AgentDef>,
}

#[derive(Debug, Deserialize, Default)]
struct SkillFrontmatter {
    name: Option<String>,
    description: Option<String>,
    #[serde(default)]
    tools: Vec<String>,
}

#[derive(Debug, Deserialize, Default)]
struct AgentFrontmatter {
    name: Option<String>,
    persona: Option<String>,
    provider: Option<String>,
    model: Option<String>,
    #[serde(default)]
    skills: Vec<String>,
}

/// Split `---`-delimited frontmatter from a Markdown body.
///
/// Returns `(frontmatter, body)`; a file without a leading delimiter is all
/// body.
pub fn split_frontmatter(content: &str) -> (Option<&str>, &str) {
    let rest = match content.strip_prefix("---") {
        Some(rest) => rest,
        None => return (None, content),
    };
    let rest = match rest.strip_prefix('\n') {
        Some(rest) => rest,
        None => match rest.strip_prefix("\r\n") {
            Some(rest) => rest,
            None => return (None, content),
        },
    };

    for (offset, line) in line_offsets(rest) {
        if line.trim_end() == "---" {
            let frontmatter = &rest[..offset];
            let body_start = offset + line.len();
            let body = rest[body_start..].trim_start_matches(['\r', '\n']);
            return (Some(frontmatter), body);
        }
    }
    (None, content)
}

fn line_offsets(text: &str) -> impl Iterator<Item = (usize, &str)> {
    let mut offset = 0;
    text.split_inclusive('\n').map(move |line| {
        let start = offset;
        offset += line.len();
        (start, line)
    })
}

impl ResourceSet {
    /// Load one resource directory. Missing subdirectories are fine; broken
    /// skill files (missing `description`) are fatal.
    pub async fn load_dir(dir: &Path) -> Result<Self, AgentError> {
        let mut set = ResourceSet::default();

        for path in markdown_files(&dir.join("personas")).await {
            let content = tokio::fs::read_to_string(&path).await?;
            let name = file_stem(&path);
            set.personas.insert(
                name.clone(),
                Persona {
                    name,
                    content: content.trim().to_string(),
                },
            );
        }

        for path in skill_files(&dir.join("skills")).await {
            let skill = parse_skill(&path).await?;
            set.skills.insert(skill.name.clone(), skill);
        }

        for path in markdown_files(&dir.join("agents")).await {
            let agent = parse_agent(&path).await?;
            set.agents.insert(agent.name.clone(), agent);
        }

        Ok(set)
    }

    /// Layer `local` over `self`: same-named entries are replaced whole.
    pub fn layered(mut self, local: ResourceSet) -> Self {
        self.personas.extend(local.personas);
        self.skills.extend(local.skills);
        self.agents.extend(local.agents);
        self
    }

    /// Global `~/.wn/` base layered with the working directory's `.wn/`.
    pub async fn load() -> Result<Self, AgentError> {
        let mut set = ResourceSet::default();
        if let Some(home) = dirs::home_dir() {
            let global = home.join(RESOURCE_DIR_NAME);
            if global.is_dir() {
                set = ResourceSet::load_dir(&global).await?;
            }
        }
        let local = PathBuf::from(RESOURCE_DIR_NAME);
        if local.is_dir() {
            set = set.layered(ResourceSet::load_dir(&local).await?);
        }
        Ok(set)
    }
}

async fn parse_skill(path: &Path) -> Result<Skill, AgentError> {
    let content = tokio::fs::read_to_string(path).await?;
    let (frontmatter, body) = split_frontmatter(&content);
    let meta: SkillFrontmatter = match frontmatter {
        Some(frontmatter) => serde_yaml::from_str(frontmatter).map_err(|e| {
            AgentError::Validation(format!("Invalid frontmatter in {}: {}", path.display(), e))
        })?,
        None => SkillFrontmatter::default(),
    };

    let default_name = if path.file_name().and_then(|n| n.to_str()) == Some("SKILL.md") {
        path.parent()
            .map(file_stem)
            .unwrap_or_else(|| file_stem(path))
    } else {
        file_stem(path)
    };

    let description = meta.description.ok_or_else(|| {
        AgentError::Validation(format!(
            "Skill {} is missing the required 'description' field",
            path.display()
        ))
    })?;

    Ok(Skill {
        name: meta.name.unwrap_or(default_name),
        description,
        tools: meta.tools,
        body: body.trim().to_string(),
    })
}

async fn parse_agent(path: &Path) -> Result<AgentDef, AgentError> {
    let content = tokio::fs::read_to_string(path).await?;
    let (frontmatter, body) = split_frontmatter(&content);
    let meta: AgentFrontmatter = match frontmatter {
        Some(frontmatter) => serde_yaml::from_str(frontmatter).map_err(|e| {
            AgentError::Validation(format!("Invalid frontmatter in {}: {}", path.display(), e))
        })?,
        None => AgentFrontmatter::default(),
    };

    Ok(AgentDef {
        name: meta.name.unwrap_or_else(|| file_stem(path)),
        persona: meta.persona,
        provider: meta.provider,
        model: meta.model,
        skills: meta.skills,
        description: body.trim().to_string(),
    })
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or_default()
        .to_string()
}

async fn markdown_files(dir: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();
    let Ok(mut entries) = tokio::fs::read_dir(dir).await else {
        return files;
    };
    while let Ok(Some(entry)) = entries.next_entry().await {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) == Some("md") {
            files.push(path);
        }
    }
    files.sort();
    files
}

/// Skills live either as `skills/<name>.md` or `skills/<name>/SKILL.md`.
async fn skill_files(dir: &Path) -> Vec<PathBuf> {
    let mut files = markdown_files(dir).await;
    let Ok(mut entries) = tokio::fs::read_dir(dir).await else {
        return files;
    };
    while let Ok(Some(entry)) = entries.next_entry().await {
        let path = entry.path();
        if path.is_dir() {
            let candidate = path.join("SKILL.md");
            if candidate.is_file() {
                files.push(candidate);
            }
        }
    }
    files.sort();
    files
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn fixture(structure: &[(&str, &str)]) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("wn-resources-{}", uuid::Uuid::new_v4()));
        for (rel, content) in structure {
            let path = dir.join(rel);
            tokio::fs::create_dir_all(path.parent().unwrap())
                .await
                .unwrap();
            tokio::fs::write(path, content).await.unwrap();
        }
        dir
    }

    #[test]
    fn test_split_frontmatter() {
        let (fm, body) = split_frontmatter("---\nname: x\n---\nThe body\n");
        assert_eq!(fm.unwrap().trim(), "name: x");
        assert_eq!(body.trim(), "The body");

        let (fm, body) = split_frontmatter("just a body");
        assert!(fm.is_none());
        assert_eq!(body, "just a body");
    }

    #[tokio::test]
    async fn test_load_personas() {
        let dir = fixture(&[("personas/default.md", "You are helpful.\n")]).await;
        let set = ResourceSet::load_dir(&dir).await.unwrap();
        assert_eq!(set.personas["default"].content, "You are helpful.");
        let _ = tokio::fs::remove_dir_all(dir).await;
    }

    #[tokio::test]
    async fn test_skill_name_defaults_to_directory() {
        let dir = fixture(&[(
            "skills/review/SKILL.md",
            "---\ndescription: Review code\ntools: [read_file]\n---\nDo reviews.\n",
        )])
        .await;
        let set = ResourceSet::load_dir(&dir).await.unwrap();
        let skill = &set.skills["review"];
        assert_eq!(skill.description, "Review code");
        assert_eq!(skill.tools, vec!["read_file"]);
        assert_eq!(skill.body, "Do reviews.");
        let _ = tokio::fs::remove_dir_all(dir).await;
    }

    #[tokio::test]
    async fn test_skill_without_description_is_fatal() {
        let dir = fixture(&[("skills/bad.md", "---\nname: bad\n---\nbody\n")]).await;
        let err = ResourceSet::load_dir(&dir).await.unwrap_err();
        assert!(err.to_string().contains("description"));
        let _ = tokio::fs::remove_dir_all(dir).await;
    }

    #[tokio::test]
    async fn test_agent_defaults_name_to_filename() {
        let dir = fixture(&[(
            "agents/scout.md",
            "---\npersona: default\nskills: [review]\n---\nA scouting agent.\n",
        )])
        .await;
        let set = ResourceSet::load_dir(&dir).await.unwrap();
        let agent = &set.agents["scout"];
        assert_eq!(agent.persona.as_deref(), Some("default"));
        assert_eq!(agent.skills, vec!["review"]);
        assert_eq!(agent.description, "A scouting agent.");
        let _ = tokio::fs::remove_dir_all(dir).await;
    }

    #[tokio::test]
    async fn test_local_layer_replaces_global_entry() {
        let global = fixture(&[
            ("personas/default.md", "global persona"),
            ("personas/extra.md", "global extra"),
        ])
        .await;
        let local = fixture(&[("personas/default.md", "local persona")]).await;

        let set = ResourceSet::load_dir(&global)
            .await
            .unwrap()
            .layered(ResourceSet::load_dir(&local).await.unwrap());

        assert_eq!(set.personas["default"].content, "local persona");
        assert_eq!(set.personas["extra"].content, "global extra");
        let _ = tokio::fs::remove_dir_all(global).await;
        let _ = tokio::fs::remove_dir_all(local).await;
    }
}
