// src/bot/censor_import_export.rs - Share censor lists between communities as JSON, YAML or TOML

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tokio::fs;

use crate::bot::pattern_matching::PatternSet;
use crate::types::{ModerationError, PatternEntry, ValidationError};

const EXPORT_VERSION: &str = "1.0";

/// On-disk censor list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CensorExport {
    pub version: String,
    pub exported_at: DateTime<Utc>,
    #[serde(default)]
    pub exported_by: String,
    #[serde(default)]
    pub entries: Vec<PatternEntry>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ExportFormat {
    Json,
    Yaml,
    Toml,
}

#[derive(Debug, Clone, Default)]
pub struct ImportOptions {
    /// Validate every entry without changing the censor list
    pub dry_run: bool,
}

#[derive(Debug, Default)]
pub struct ImportResult {
    pub added: Vec<PatternEntry>,
    pub duplicates: Vec<String>,
    pub errors: Vec<String>,
    pub source_version: String,
}

impl ImportResult {
    pub fn added_count(&self) -> usize {
        self.added.len()
    }
}

pub struct CensorImportExport;

impl CensorImportExport {
    /// Write the global censor list to `output_path`
    pub async fn export(
        patterns: &PatternSet,
        format: ExportFormat,
        output_path: &Path,
        exported_by: &str,
    ) -> Result<usize> {
        let export = CensorExport {
            version: EXPORT_VERSION.to_string(),
            exported_at: Utc::now(),
            exported_by: exported_by.to_string(),
            entries: patterns.list(None).await,
        };

        let rendered = match format {
            ExportFormat::Json => serde_json::to_string_pretty(&export).context("Failed to serialize to JSON")?,
            ExportFormat::Yaml => serde_yaml::to_string(&export).context("Failed to serialize to YAML")?,
            ExportFormat::Toml => toml::to_string_pretty(&export).context("Failed to serialize to TOML")?,
        };

        fs::write(output_path, rendered)
            .await
            .with_context(|| format!("Failed to write censor export: {}", output_path.display()))?;
        info!("Exported {} censor entries to {}", export.entries.len(), output_path.display());
        Ok(export.entries.len())
    }

    /// Add every entry from `input_path` to the censor list.
    ///
    /// Duplicates and invalid expressions are counted, not fatal. Store
    /// failures abort the import.
    pub async fn import(
        patterns: &PatternSet,
        input_path: &Path,
        format: Option<ExportFormat>,
        options: ImportOptions,
    ) -> Result<ImportResult> {
        let format = match format {
            Some(format) => format,
            None => Self::detect_format(input_path).await?,
        };

        let content = fs::read_to_string(input_path)
            .await
            .with_context(|| format!("Failed to read censor import: {}", input_path.display()))?;
        let import: CensorExport = match format {
            ExportFormat::Json => serde_json::from_str(&content).context("Failed to parse JSON import file")?,
            ExportFormat::Yaml => serde_yaml::from_str(&content).context("Failed to parse YAML import file")?,
            ExportFormat::Toml => toml::from_str(&content).context("Failed to parse TOML import file")?,
        };

        if import.version != EXPORT_VERSION {
            warn!("Censor import version {} may not be fully compatible", import.version);
        }

        let mut result = ImportResult {
            source_version: import.version.clone(),
            ..ImportResult::default()
        };
        for mut entry in import.entries {
            // Imported lists only ever feed the global censor list
            entry.owner_id = None;

            if options.dry_run {
                if let Err(e) = PatternSet::validate(&entry) {
                    result.errors.push(e.to_string());
                }
                continue;
            }

            match patterns.add(entry.clone()).await {
                Ok(added) => result.added.push(added),
                Err(ModerationError::Validation(ValidationError::AlreadyRegistered { expression })) => {
                    result.duplicates.push(expression)
                }
                Err(ModerationError::Validation(e)) => result.errors.push(e.to_string()),
                Err(e) => {
                    return Err(e).with_context(|| format!("Failed to import censor entry '{}'", entry.expression))
                }
            }
        }

        info!(
            "Imported censor list from {}: {} added, {} duplicates, {} errors",
            input_path.display(),
            result.added.len(),
            result.duplicates.len(),
            result.errors.len()
        );
        Ok(result)
    }

    pub async fn detect_format(input_path: &Path) -> Result<ExportFormat> {
        let extension = input_path.extension().and_then(|ext| ext.to_str()).unwrap_or("");

        match extension {
            "json" => Ok(ExportFormat::Json),
            "yaml" | "yml" => Ok(ExportFormat::Yaml),
            "toml" => Ok(ExportFormat::Toml),
            _ => {
                let content = fs::read_to_string(input_path)
                    .await
                    .with_context(|| format!("Failed to read censor import: {}", input_path.display()))?;
                let trimmed = content.trim_start();
                if trimmed.starts_with('{') {
                    Ok(ExportFormat::Json)
                } else if trimmed.starts_with("version =") || trimmed.contains("[[entries]]") {
                    Ok(ExportFormat::Toml)
                } else if content.contains("version:") || content.contains("entries:") {
                    Ok(ExportFormat::Yaml)
                } else {
                    Err(anyhow::anyhow!("Could not detect censor list format"))
                }
            }
        }
    }
}
