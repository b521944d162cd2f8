use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::path::PathBuf;
use uuid::Uuid;

/// One chest X-ray image to process, with the patient metadata that goes into
/// the report header.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageRecord {
    pub image_path: PathBuf,
    pub finding_labels: Vec<String>,
    pub follow_up: u32,
    pub patient_id: i64,
    pub patient_age: u32,
    pub patient_gender: String,
    pub view_position: String,
}

impl ImageRecord {
    /// Patient metadata block handed to the anchor together with the reader's analysis.
    pub fn query(&self) -> String {
        format!(
            "possible disease: {}\nfollow-up: {}\npatient id: {}\npatient age: {}\npatient gender: {}\nview position: {}",
            self.finding_labels.join(", "),
            self.follow_up,
            self.patient_id,
            self.patient_age,
            self.patient_gender,
            self.view_position,
        )
    }

    pub fn patient(&self) -> PatientId {
        PatientId::Known(self.patient_id)
    }
}

/// Stable session key for the record at `index`.
pub fn image_id(index: usize, patient_id: i64) -> String {
    format!("img_{}_{}", index, patient_id)
}

/// Patient identity of a stored report. Reports for `Unknown` patients are
/// never deduplicated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PatientId {
    Known(i64),
    Unknown,
}

impl fmt::Display for PatientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PatientId::Known(id) => write!(f, "{}", id),
            PatientId::Unknown => f.write_str("Unknown"),
        }
    }
}

impl From<i64> for PatientId {
    fn from(id: i64) -> Self {
        PatientId::Known(id)
    }
}

impl Serialize for PatientId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            PatientId::Known(id) => serializer.serialize_i64(*id),
            PatientId::Unknown => serializer.serialize_str("Unknown"),
        }
    }
}

impl<'de> Deserialize<'de> for PatientId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Id(i64),
            Text(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Id(id) => Ok(PatientId::Known(id)),
            Raw::Text(text) if text == "Unknown" => Ok(PatientId::Unknown),
            Raw::Text(text) => text
                .parse::<i64>()
                .map(PatientId::Known)
                .map_err(|_| serde::de::Error::custom(format!("invalid patient id: {}", text))),
        }
    }
}

/// A finalized, user-edited report kept in the report store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredReport {
    pub id: Uuid,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub patient_id: PatientId,
    pub follow_up: u32,
}

/// Content returned by a delegated agent call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentReply {
    pub content: String,
}

impl AgentReply {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
        }
    }
}
