use metrics_exporter_prometheus::PrometheusHandle;
use registrar::workflows::enrollment::{
    EnrollmentEvent, EnrollmentId, EnrollmentRecord, EnrollmentRepository, EventError,
    EventPublisher, RepositoryError, SectionId, StudentId,
};
use std::collections::HashMap;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) readiness: Arc<AtomicBool>,
    pub(crate) metrics: Arc<PrometheusHandle>,
}

#[derive(Default, Clone)]
pub(crate) struct InMemoryEnrollmentRepository {
    records: Arc<Mutex<HashMap<EnrollmentId, EnrollmentRecord>>>,
}

impl EnrollmentRepository for InMemoryEnrollmentRepository {
    fn insert(&self, record: EnrollmentRecord) -> Result<EnrollmentRecord, RepositoryError> {
        let mut guard = self.records.lock().expect("repository mutex poisoned");
        if guard.contains_key(&record.enrollment_id) {
            return Err(RepositoryError::Conflict);
        }
        guard.insert(record.enrollment_id.clone(), record.clone());
        Ok(record)
    }

    fn update(&self, record: EnrollmentRecord) -> Result<(), RepositoryError> {
        let mut guard = self.records.lock().expect("repository mutex poisoned");
        if guard.contains_key(&record.enrollment_id) {
            guard.insert(record.enrollment_id.clone(), record);
            Ok(())
        } else {
            Err(RepositoryError::NotFound)
        }
    }

    fn fetch(&self, id: &EnrollmentId) -> Result<Option<EnrollmentRecord>, RepositoryError> {
        let guard = self.records.lock().expect("repository mutex poisoned");
        Ok(guard.get(id).cloned())
    }

    fn find_active(
        &self,
        student_id: &StudentId,
        section_id: &SectionId,
    ) -> Result<Option<EnrollmentRecord>, RepositoryError> {
        let guard = self.records.lock().expect("repository mutex poisoned");
        Ok(guard
            .values()
            .find(|record| {
                &record.student_id == student_id
                    && &record.section_id == section_id
                    && record.status.is_active()
            })
            .cloned())
    }
}

#[derive(Default, Clone)]
pub(crate) struct InMemoryEventPublisher {
    events: Arc<Mutex<Vec<EnrollmentEvent>>>,
}

impl EventPublisher for InMemoryEventPublisher {
    fn publish(&self, event: EnrollmentEvent) -> Result<(), EventError> {
        let mut guard = self.events.lock().expect("event mutex poisoned");
        guard.push(event);
        Ok(())
    }
}

impl InMemoryEventPublisher {
    pub(crate) fn events(&self) -> Vec<EnrollmentEvent> {
        self.events.lock().expect("event mutex poisoned").clone()
    }
}
