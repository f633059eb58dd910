//! Static catalog of installable server templates.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepKind {
    Download,
    Run,
    /// Unrecognised step types are skipped with a warning.
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallationStep {
    #[serde(rename = "type")]
    pub kind: StepKind,
    #[serde(default)]
    pub command: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Template {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub description: String,
    /// Free text such as "Java 21+".
    #[serde(default)]
    pub system_requirements: Option<String>,
    /// Free text such as "4GB RAM, 2 cores".
    #[serde(default)]
    pub hardware_requirements: Option<String>,
    #[serde(default)]
    pub image_url: Option<String>,
    pub download_url: String,
    #[serde(default, rename = "type")]
    pub server_type: String,
    #[serde(default)]
    pub installation_steps: Vec<InstallationStep>,
}

impl Template {
    /// Artifact file name taken from the last URL segment.
    pub fn jar_file_name(&self) -> String {
        let trimmed = self.download_url.split(['?', '#']).next().unwrap_or_default();
        match trimmed.rsplit('/').next() {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => "server.jar".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct TemplateCatalog {
    templates: Vec<Template>,
}

impl TemplateCatalog {
    pub fn new(templates: Vec<Template>) -> Self {
        Self { templates }
    }

    /// Load the catalog from a JSON array. A missing file is an empty catalog.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            log::warn!("Template catalog {:?} not found, no templates loaded", path);
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path).map_err(|e| AppError::io(e.to_string()))?;
        let templates: Vec<Template> =
            serde_json::from_str(&content).map_err(|e| AppError::template(e.to_string()))?;
        log::info!("Loaded {} server templates", templates.len());
        Ok(Self { templates })
    }

    pub fn list_templates(&self) -> &[Template] {
        &self.templates
    }

    pub fn get(&self, id: &str) -> Result<&Template> {
        self.templates
            .iter()
            .find(|t| t.id == id)
            .ok_or_else(|| AppError::template_not_found(id))
    }
}
