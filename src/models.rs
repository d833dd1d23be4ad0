use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::pipeline::PipelineErrorKind;

/// Read/write surface of one catalog row. Column names follow the catalog table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogRecord {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Image", default)]
    pub image: Option<String>,
    #[serde(rename = "Resized_Image", default)]
    pub resized_image: Option<String>,
    #[serde(rename = "Model_3D", default)]
    pub model_3d: Option<String>,
}

impl CatalogRecord {
    /// The resized variant wins over the original upload.
    pub fn source_image(&self) -> Option<&str> {
        non_blank(self.resized_image.as_deref()).or_else(|| non_blank(self.image.as_deref()))
    }

    pub fn asset_reference(&self) -> Option<&str> {
        non_blank(self.model_3d.as_deref())
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// Filename stem derived from a catalog item name.
///
/// Whitespace, path separators and characters that are reserved on common
/// filesystems map to `_`. The mapping is pure, so the same item always lands
/// on the same file.
pub fn sanitize_stem(item: &str) -> String {
    item.trim()
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_whitespace() || c.is_control() => '_',
            c => c,
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Completed,
    CompletedWithWarning,
    FailedFatal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepReport {
    pub index: u8,
    pub name: String,
    pub status: StepStatus,
    pub elapsed_ms: u128,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
    pub output: Value,
}

impl StepReport {
    pub fn new(index: u8, name: &str, status: StepStatus, elapsed_ms: u128, output: Value) -> Self {
        Self {
            index,
            name: name.to_string(),
            status,
            elapsed_ms,
            timestamp: Utc::now(),
            warning: None,
            output,
        }
    }

    pub fn with_warning(mut self, warning: Option<String>) -> Self {
        self.warning = warning;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RunOutcome {
    Succeeded {
        asset: String,
    },
    /// Dry run stopped at the cost gate without triggering generation.
    Previewed {
        observed_cost: String,
    },
    Skipped {
        reason: String,
    },
    Failed {
        step: String,
        kind: PipelineErrorKind,
        error: String,
    },
}

impl RunOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            RunOutcome::Succeeded { .. } => "succeeded",
            RunOutcome::Previewed { .. } => "previewed",
            RunOutcome::Skipped { .. } => "skipped",
            RunOutcome::Failed { .. } => "failed",
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, RunOutcome::Failed { .. })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub item: String,
    pub stem: String,
    pub outcome: RunOutcome,
    pub steps: Vec<StepReport>,
}

impl RunReport {
    #[cfg(test)]
    pub fn step(&self, name: &str) -> Option<&StepReport> {
        self.steps.iter().find(|s| s.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(image: Option<&str>, resized: Option<&str>, model: Option<&str>) -> CatalogRecord {
        CatalogRecord {
            name: "Accent Chair 03093".into(),
            image: image.map(Into::into),
            resized_image: resized.map(Into::into),
            model_3d: model.map(Into::into),
        }
    }

    #[test]
    fn stem_replaces_spaces_and_separators() {
        assert_eq!(sanitize_stem("Accent Chair 03093"), "Accent_Chair_03093");
        assert_eq!(sanitize_stem("Sofa/Loveseat\\Set"), "Sofa_Loveseat_Set");
        assert_eq!(sanitize_stem("  Lamp: Brass  "), "Lamp__Brass");
    }

    #[test]
    fn stem_is_stable_across_calls() {
        let item = "Side Table / Walnut 7";
        assert_eq!(sanitize_stem(item), sanitize_stem(item));
        assert!(!sanitize_stem(item).contains('/'));
    }

    #[test]
    fn resized_image_takes_precedence() {
        let rec = record(Some("https://a/orig.jpg"), Some("https://a/small.jpg"), None);
        assert_eq!(rec.source_image(), Some("https://a/small.jpg"));
        let rec = record(Some("https://a/orig.jpg"), Some("  "), None);
        assert_eq!(rec.source_image(), Some("https://a/orig.jpg"));
        assert_eq!(record(None, None, None).source_image(), None);
    }

    #[test]
    fn blank_asset_reference_is_not_converted() {
        assert_eq!(record(None, None, Some("")).asset_reference(), None);
        assert_eq!(
            record(None, None, Some("x.glb")).asset_reference(),
            Some("x.glb")
        );
    }

    #[test]
    fn record_deserializes_catalog_columns() {
        let raw = r#"{"Name":"Desk","Image":null,"Resized_Image":"https://r/desk.jpg"}"#;
        let rec: CatalogRecord = serde_json::from_str(raw).expect("record");
        assert_eq!(rec.source_image(), Some("https://r/desk.jpg"));
        assert!(rec.model_3d.is_none());
    }
}
