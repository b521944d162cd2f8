use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use crate::{
    error::Result,
    model::{PatientId, StoredReport},
    session::Session,
};

/// Trait for storing and retrieving Q&A sessions, keyed by image id
#[async_trait]
pub trait SessionStorage: Send + Sync {
    async fn save(&self, session: Session) -> Result<()>;
    async fn get(&self, image_id: &str) -> Result<Option<Session>>;
    async fn delete(&self, image_id: &str) -> Result<()>;
    async fn clear(&self) -> Result<()>;
    async fn ids(&self) -> Result<Vec<String>>;
}

/// Trait for the finalized report collection
#[async_trait]
pub trait ReportStorage: Send + Sync {
    /// Appends a report, first dropping every entry with the same known
    /// patient id and follow-up.
    async fn save(
        &self,
        content: String,
        patient_id: PatientId,
        follow_up: u32,
    ) -> Result<StoredReport>;
    async fn get(&self, id: Uuid) -> Result<Option<StoredReport>>;
    async fn list(&self) -> Result<Vec<StoredReport>>;
    async fn clear(&self) -> Result<()>;
}

/// In-memory implementation of SessionStorage
#[derive(Default)]
pub struct InMemorySessionStorage {
    sessions: Arc<DashMap<String, Session>>,
}

impl InMemorySessionStorage {
    pub fn new() -> Self {
        Self {
            sessions: Arc::new(DashMap::new()),
        }
    }
}

#[async_trait]
impl SessionStorage for InMemorySessionStorage {
    async fn save(&self, session: Session) -> Result<()> {
        self.sessions.insert(session.image_id.clone(), session);
        Ok(())
    }

    async fn get(&self, image_id: &str) -> Result<Option<Session>> {
        Ok(self.sessions.get(image_id).map(|entry| entry.clone()))
    }

    async fn delete(&self, image_id: &str) -> Result<()> {
        self.sessions.remove(image_id);
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        self.sessions.clear();
        Ok(())
    }

    async fn ids(&self) -> Result<Vec<String>> {
        Ok(self.sessions.iter().map(|entry| entry.key().clone()).collect())
    }
}

/// In-memory implementation of ReportStorage. Survivors keep insertion order.
#[derive(Default)]
pub struct InMemoryReportStore {
    reports: RwLock<Vec<StoredReport>>,
}

impl InMemoryReportStore {
    pub fn new() -> Self {
        Self {
            reports: RwLock::new(Vec::new()),
        }
    }
}

#[async_trait]
impl ReportStorage for InMemoryReportStore {
    async fn save(
        &self,
        content: String,
        patient_id: PatientId,
        follow_up: u32,
    ) -> Result<StoredReport> {
        let report = StoredReport {
            id: Uuid::new_v4(),
            content,
            created_at: Utc::now(),
            patient_id,
            follow_up,
        };

        let mut reports = self.reports.write().await;
        if let PatientId::Known(_) = patient_id {
            let before = reports.len();
            reports.retain(|r| !(r.patient_id == patient_id && r.follow_up == follow_up));
            let replaced = before - reports.len();
            if replaced > 0 {
                debug!(
                    patient_id = %patient_id,
                    follow_up,
                    replaced,
                    "Replacing existing report"
                );
            }
        }
        reports.push(report.clone());

        Ok(report)
    }

    async fn get(&self, id: Uuid) -> Result<Option<StoredReport>> {
        Ok(self.reports.read().await.iter().find(|r| r.id == id).cloned())
    }

    async fn list(&self) -> Result<Vec<StoredReport>> {
        Ok(self.reports.read().await.clone())
    }

    async fn clear(&self) -> Result<()> {
        self.reports.write().await.clear();
        Ok(())
    }
}
