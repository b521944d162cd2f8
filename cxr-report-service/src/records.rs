//! Patient records from a YAML manifest.
//!
//! ```yaml
//! images_dir: images
//! patients:
//!   - patient_id: 1
//!     age: 45
//!     gender: M
//!     view_position: PA
//!     images:
//!       - file: 00000001_000.png
//!         findings: [No Finding]
//!         follow_up: 0
//! ```

use anyhow::Context as _;
use async_trait::async_trait;
use cxr_flow::{ImageRecord, RecordSource};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::debug;

#[derive(Debug, Clone, Deserialize)]
pub struct Manifest {
    /// Resolved against the manifest's own directory when relative.
    #[serde(default)]
    pub images_dir: PathBuf,
    pub patients: Vec<PatientEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PatientEntry {
    pub patient_id: i64,
    pub age: u32,
    pub gender: String,
    pub view_position: String,
    #[serde(default)]
    pub images: Vec<ImageEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ImageEntry {
    pub file: PathBuf,
    #[serde(default)]
    pub findings: Vec<String>,
    #[serde(default)]
    pub follow_up: u32,
}

impl Manifest {
    pub fn from_yaml(yaml: &str) -> anyhow::Result<Self> {
        serde_yaml::from_str(yaml).context("Invalid record manifest")
    }

    /// Flattens the manifest into records, patient by patient in file order.
    pub fn records(&self, base_dir: &Path, patient_filter: Option<i64>) -> Vec<ImageRecord> {
        let images_dir = base_dir.join(&self.images_dir);

        self.patients
            .iter()
            .filter(|p| patient_filter.is_none_or(|id| p.patient_id == id))
            .flat_map(|patient| {
                let images_dir = images_dir.clone();
                patient.images.iter().map(move |image| ImageRecord {
                    image_path: images_dir.join(&image.file),
                    finding_labels: image.findings.clone(),
                    follow_up: image.follow_up,
                    patient_id: patient.patient_id,
                    patient_age: patient.age,
                    patient_gender: patient.gender.clone(),
                    view_position: patient.view_position.clone(),
                })
            })
            .collect()
    }
}

/// Record source re-reading a manifest file on every load.
pub struct ManifestRecordSource {
    path: PathBuf,
    patient_filter: Option<i64>,
}

impl ManifestRecordSource {
    pub fn new(path: impl Into<PathBuf>, patient_filter: Option<i64>) -> Self {
        Self {
            path: path.into(),
            patient_filter,
        }
    }
}

#[async_trait]
impl RecordSource for ManifestRecordSource {
    async fn load(&self) -> anyhow::Result<Vec<ImageRecord>> {
        let yaml = tokio::fs::read_to_string(&self.path)
            .await
            .with_context(|| format!("Failed to read manifest {}", self.path.display()))?;
        let manifest = Manifest::from_yaml(&yaml)?;

        let base_dir = self.path.parent().unwrap_or_else(|| Path::new(""));
        let records = manifest.records(base_dir, self.patient_filter);
        debug!(
            manifest = %self.path.display(),
            records = records.len(),
            "Loaded patient records"
        );
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MANIFEST: &str = r#"
images_dir: images
patients:
  - patient_id: 1
    age: 45
    gender: M
    view_position: PA
    images:
      - file: 00000001_000.png
        findings: [No Finding]
        follow_up: 0
      - file: 00000001_001.png
        findings: [Pneumonia, Effusion]
        follow_up: 1
  - patient_id: 2
    age: 62
    gender: F
    view_position: AP
    images:
      - file: 00000002_000.png
        findings: [Nodule]
"#;

    #[test]
    fn test_flattens_patients_in_order() {
        let manifest = Manifest::from_yaml(MANIFEST).unwrap();
        let records = manifest.records(Path::new("/data"), None);

        assert_eq!(records.len(), 3);
        assert_eq!(records[0].image_path, PathBuf::from("/data/images/00000001_000.png"));
        assert_eq!(records[1].finding_labels, vec!["Pneumonia", "Effusion"]);
        assert_eq!(records[1].follow_up, 1);
        assert_eq!(records[2].patient_id, 2);
        assert_eq!(records[2].patient_gender, "F");
        assert_eq!(records[2].follow_up, 0);
    }

    #[test]
    fn test_patient_filter() {
        let manifest = Manifest::from_yaml(MANIFEST).unwrap();
        let records = manifest.records(Path::new(""), Some(2));
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].view_position, "AP");
    }

    #[test]
    fn test_invalid_manifest() {
        assert!(Manifest::from_yaml("patients: 3").is_err());
    }

    #[tokio::test]
    async fn test_source_rereads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("records.yaml");
        std::fs::write(&path, MANIFEST).unwrap();

        let source = ManifestRecordSource::new(&path, None);
        let records = source.load().await.unwrap();
        assert_eq!(records.len(), 3);
        assert!(records[0].image_path.starts_with(dir.path()));

        std::fs::write(&path, "patients: []").unwrap();
        assert!(source.load().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_missing_manifest() {
        let source = ManifestRecordSource::new("missing/records.yaml", None);
        let err = source.load().await.unwrap_err();
        assert!(err.to_string().contains("Failed to read manifest"));
    }
}
