use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, TimeZone, Utc};

use crate::config::EnrollmentConfig;
use crate::workflows::enrollment::domain::{
    EnrollmentId, EnrollmentRecord, SectionId, SectionProfile, StudentId, TermCalendar,
};
use crate::workflows::enrollment::repository::{
    EnrollmentEvent, EnrollmentRepository, EventError, EventPublisher, RepositoryError,
};
use crate::workflows::enrollment::service::EnrollmentService;

/// Mid-January instant well inside the add window of the spring term.
pub(super) fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 1, 20, 9, 0, 0)
        .single()
        .expect("valid timestamp")
}

pub(super) fn between_drop_and_withdraw() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 2, 20, 9, 0, 0)
        .single()
        .expect("valid timestamp")
}

pub(super) fn after_withdraw_deadline() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 4, 1, 9, 0, 0)
        .single()
        .expect("valid timestamp")
}

pub(super) fn term() -> TermCalendar {
    TermCalendar {
        term_code: "2026-SP".to_string(),
        add_deadline: Utc
            .with_ymd_and_hms(2026, 1, 27, 23, 59, 59)
            .single()
            .expect("valid timestamp"),
        drop_deadline: Utc
            .with_ymd_and_hms(2026, 2, 10, 23, 59, 59)
            .single()
            .expect("valid timestamp"),
        withdraw_deadline: Utc
            .with_ymd_and_hms(2026, 3, 24, 23, 59, 59)
            .single()
            .expect("valid timestamp"),
    }
}

pub(super) fn section(id: &str, capacity: u32) -> SectionProfile {
    SectionProfile {
        section_id: SectionId(id.to_string()),
        term: term(),
        capacity,
        waitlist_capacity: None,
    }
}

pub(super) fn section_with_waitlist_cap(
    id: &str,
    capacity: u32,
    waitlist_capacity: u32,
) -> SectionProfile {
    SectionProfile {
        waitlist_capacity: Some(waitlist_capacity),
        ..section(id, capacity)
    }
}

pub(super) fn student(id: &str) -> StudentId {
    StudentId(id.to_string())
}

pub(super) fn enrollment_config() -> EnrollmentConfig {
    EnrollmentConfig {
        offer_window_hours: 24,
        partial_refund_percent: 50,
        sweep_interval_secs: 60,
    }
}

pub(super) fn offer_window() -> Duration {
    Duration::hours(enrollment_config().offer_window_hours)
}

pub(super) fn build_service() -> (
    Arc<EnrollmentService<MemoryRepository, MemoryEvents>>,
    Arc<MemoryRepository>,
    Arc<MemoryEvents>,
) {
    let repository = Arc::new(MemoryRepository::default());
    let events = Arc::new(MemoryEvents::default());
    let service = Arc::new(EnrollmentService::new(
        repository.clone(),
        events.clone(),
        enrollment_config(),
    ));
    (service, repository, events)
}

#[derive(Default, Clone)]
pub(super) struct MemoryRepository {
    records: Arc<Mutex<HashMap<EnrollmentId, EnrollmentRecord>>>,
}

impl EnrollmentRepository for MemoryRepository {
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
        guard.insert(record.enrollment_id.clone(), record);
        Ok(())
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
pub(super) struct MemoryEvents {
    events: Arc<Mutex<Vec<EnrollmentEvent>>>,
}

impl MemoryEvents {
    pub(super) fn events(&self) -> Vec<EnrollmentEvent> {
        self.events.lock().expect("event mutex poisoned").clone()
    }
}

impl EventPublisher for MemoryEvents {
    fn publish(&self, event: EnrollmentEvent) -> Result<(), EventError> {
        self.events
            .lock()
            .expect("event mutex poisoned")
            .push(event);
        Ok(())
    }
}

pub(super) struct UnavailableRepository;

impl EnrollmentRepository for UnavailableRepository {
    fn insert(&self, _record: EnrollmentRecord) -> Result<EnrollmentRecord, RepositoryError> {
        Err(RepositoryError::Unavailable("database offline".to_string()))
    }

    fn update(&self, _record: EnrollmentRecord) -> Result<(), RepositoryError> {
        Err(RepositoryError::Unavailable("database offline".to_string()))
    }

    fn fetch(&self, _id: &EnrollmentId) -> Result<Option<EnrollmentRecord>, RepositoryError> {
        Err(RepositoryError::Unavailable("database offline".to_string()))
    }

    fn find_active(
        &self,
        _student_id: &StudentId,
        _section_id: &SectionId,
    ) -> Result<Option<EnrollmentRecord>, RepositoryError> {
        Ok(None)
    }
}
