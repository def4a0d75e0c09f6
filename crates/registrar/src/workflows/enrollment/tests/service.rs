use std::sync::Arc;
use std::thread;

use chrono::Duration;

use super::common::{
    after_withdraw_deadline, between_drop_and_withdraw, build_service, enrollment_config, now,
    offer_window, section, section_with_waitlist_cap, student, MemoryEvents, UnavailableRepository,
};
use crate::workflows::enrollment::domain::{EnrollmentStatus, RefundTier, SectionId};
use crate::workflows::enrollment::repository::{EnrollmentEvent, RepositoryError};
use crate::workflows::enrollment::service::{EnrollmentError, EnrollmentService};

#[test]
fn full_section_waitlists_the_next_request_at_position_one() {
    let (service, _, _) = build_service();
    service.open_section(section("CS-101-A", 1)).expect("opens");

    let a = service
        .request_enrollment(student("stu-a"), SectionId("CS-101-A".into()), "registrar", now())
        .expect("first request");
    assert_eq!(a.status, EnrollmentStatus::Enrolled);

    let b = service
        .request_enrollment(student("stu-b"), SectionId("CS-101-A".into()), "registrar", now())
        .expect("second request");
    assert_eq!(b.status, EnrollmentStatus::Waitlisted);
    assert_eq!(b.waitlist_position, Some(1));

    let status = service
        .section_status(&SectionId("CS-101-A".into()))
        .expect("status");
    assert_eq!(status.enrolled, 1);
    assert_eq!(status.waitlist_length, 1);
}

#[test]
fn drop_promotes_the_head_and_accept_seats_them() {
    let (service, _, events) = build_service();
    let section_id = SectionId("CS-101-A".into());
    service.open_section(section("CS-101-A", 1)).expect("opens");

    let a = service
        .request_enrollment(student("stu-a"), section_id.clone(), "registrar", now())
        .expect("a enrolls");
    let b = service
        .request_enrollment(student("stu-b"), section_id.clone(), "registrar", now())
        .expect("b waitlists");

    service
        .request_drop(&a.enrollment_id, now() + Duration::hours(1))
        .expect("a drops");

    let offer = service
        .pending_offer(&b.enrollment_id)
        .expect("offer opened for b");
    assert_eq!(offer.student_id, student("stu-b"));

    let accepted = service
        .accept_offer(&b.enrollment_id, now() + Duration::hours(2))
        .expect("b accepts in time");
    assert_eq!(accepted.status, EnrollmentStatus::Enrolled);

    let status = service.section_status(&section_id).expect("status");
    assert_eq!(status.enrolled, 1);
    assert_eq!(status.waitlist_length, 0);

    let published = events.events();
    assert!(published.iter().any(|event| matches!(
        event,
        EnrollmentEvent::SeatReleased { section_id: s } if s == &section_id
    )));
    assert!(published.iter().any(|event| matches!(
        event,
        EnrollmentEvent::WaitlistOfferCreated { student_id, .. } if student_id == &student("stu-b")
    )));
    assert!(
        published
            .iter()
            .filter(|event| matches!(
                event,
                EnrollmentEvent::SeatGranted { student_id, .. } if student_id == &student("stu-b")
            ))
            .count()
            == 1
    );
}

#[test]
fn expired_offer_terminates_the_record_and_promotes_the_next_head() {
    let (service, _, events) = build_service();
    let section_id = SectionId("CS-101-A".into());
    service.open_section(section("CS-101-A", 1)).expect("opens");

    let a = service
        .request_enrollment(student("stu-a"), section_id.clone(), "registrar", now())
        .expect("a enrolls");
    let b = service
        .request_enrollment(student("stu-b"), section_id.clone(), "registrar", now())
        .expect("b waitlists");
    let c = service
        .request_enrollment(student("stu-c"), section_id.clone(), "registrar", now())
        .expect("c waitlists");
    assert_eq!(c.waitlist_position, Some(2));

    let drop_at = now() + Duration::hours(1);
    service.request_drop(&a.enrollment_id, drop_at).expect("a drops");

    let past_window = drop_at + offer_window() + Duration::minutes(5);
    let reaped = service.sweep_expired_offers(past_window).expect("sweep runs");
    assert_eq!(reaped, 1);

    let b_record = service.get_record(&b.enrollment_id).expect("b record");
    assert_eq!(b_record.status, EnrollmentStatus::Expired);

    // C moved up and now holds the offer.
    let offer = service
        .pending_offer(&c.enrollment_id)
        .expect("offer for c");
    assert_eq!(offer.student_id, student("stu-c"));
    let c_record = service.get_record(&c.enrollment_id).expect("c record");
    assert_eq!(c_record.status, EnrollmentStatus::Waitlisted);
    assert_eq!(c_record.waitlist_position, None);

    assert!(events.events().iter().any(|event| matches!(
        event,
        EnrollmentEvent::WaitlistOfferExpired { student_id, .. } if student_id == &student("stu-b")
    )));
}

#[test]
fn capacity_increase_promotes_exactly_like_a_drop() {
    let (service, _, events) = build_service();
    let section_id = SectionId("CS-101-A".into());
    service.open_section(section("CS-101-A", 1)).expect("opens");

    service
        .request_enrollment(student("stu-a"), section_id.clone(), "registrar", now())
        .expect("a enrolls");
    let b = service
        .request_enrollment(student("stu-b"), section_id.clone(), "registrar", now())
        .expect("b waitlists");

    let adjustment = service
        .adjust_capacity(&section_id, 2, now() + Duration::hours(1))
        .expect("capacity widens");
    assert!(adjustment.widened());

    let offer = service
        .pending_offer(&b.enrollment_id)
        .expect("offer for b");
    assert_eq!(offer.section_id, section_id);
    assert!(events.events().iter().any(|event| matches!(
        event,
        EnrollmentEvent::WaitlistOfferCreated { student_id, .. } if student_id == &student("stu-b")
    )));
}

#[test]
fn drop_after_the_withdraw_deadline_is_rejected_unchanged() {
    let (service, _, _) = build_service();
    let section_id = SectionId("CS-101-A".into());
    service.open_section(section("CS-101-A", 1)).expect("opens");

    let a = service
        .request_enrollment(student("stu-a"), section_id.clone(), "registrar", now())
        .expect("a enrolls");

    match service.request_drop(&a.enrollment_id, after_withdraw_deadline()) {
        Err(EnrollmentError::DeadlinePassed { .. }) => {}
        other => panic!("expected deadline rejection, got {other:?}"),
    }

    let status = service.section_status(&section_id).expect("status");
    assert_eq!(status.enrolled, 1, "a rejected drop must not free the seat");
    let record = service.get_record(&a.enrollment_id).expect("record");
    assert_eq!(record.status, EnrollmentStatus::Enrolled);
}

#[test]
fn duplicate_active_request_is_rejected_without_state_change() {
    let (service, _, _) = build_service();
    let section_id = SectionId("CS-101-A".into());
    service.open_section(section("CS-101-A", 2)).expect("opens");

    service
        .request_enrollment(student("stu-a"), section_id.clone(), "registrar", now())
        .expect("first request");
    match service.request_enrollment(student("stu-a"), section_id.clone(), "registrar", now()) {
        Err(EnrollmentError::DuplicateActiveEnrollment) => {}
        other => panic!("expected duplicate rejection, got {other:?}"),
    }
    let status = service.section_status(&section_id).expect("status");
    assert_eq!(status.enrolled, 1);

    // A waitlisted record is just as active.
    let full = SectionId("CS-201-A".into());
    service.open_section(section("CS-201-A", 1)).expect("opens");
    service
        .request_enrollment(student("stu-b"), full.clone(), "registrar", now())
        .expect("fills section");
    service
        .request_enrollment(student("stu-c"), full.clone(), "registrar", now())
        .expect("waitlists");
    match service.request_enrollment(student("stu-c"), full.clone(), "registrar", now()) {
        Err(EnrollmentError::DuplicateActiveEnrollment) => {}
        other => panic!("expected duplicate rejection, got {other:?}"),
    }
}

#[test]
fn withdraw_records_the_placeholder_grade_and_partial_refund() {
    let (service, _, events) = build_service();
    let section_id = SectionId("CS-101-A".into());
    service.open_section(section("CS-101-A", 1)).expect("opens");

    let a = service
        .request_enrollment(student("stu-a"), section_id.clone(), "registrar", now())
        .expect("a enrolls");

    let record = service
        .request_withdraw(&a.enrollment_id, between_drop_and_withdraw())
        .expect("withdraw inside window");
    assert_eq!(record.status, EnrollmentStatus::Withdrawn);
    assert_eq!(record.grade.as_deref(), Some("W"));

    assert!(events.events().iter().any(|event| matches!(
        event,
        EnrollmentEvent::RefundTierAssigned { tier: RefundTier::Partial(50), .. }
    )));
}

#[test]
fn withdraw_inside_the_drop_window_is_redirected_to_drop() {
    let (service, _, _) = build_service();
    let section_id = SectionId("CS-101-A".into());
    service.open_section(section("CS-101-A", 1)).expect("opens");

    let a = service
        .request_enrollment(student("stu-a"), section_id, "registrar", now())
        .expect("a enrolls");

    match service.request_withdraw(&a.enrollment_id, now() + Duration::hours(1)) {
        Err(EnrollmentError::DeadlinePassed { .. }) => {}
        other => panic!("expected deadline rejection, got {other:?}"),
    }
}

#[test]
fn drop_assigns_a_full_refund() {
    let (service, _, events) = build_service();
    let section_id = SectionId("CS-101-A".into());
    service.open_section(section("CS-101-A", 1)).expect("opens");

    let a = service
        .request_enrollment(student("stu-a"), section_id, "registrar", now())
        .expect("a enrolls");
    service
        .request_drop(&a.enrollment_id, now() + Duration::hours(1))
        .expect("drop inside window");

    assert!(events.events().iter().any(|event| matches!(
        event,
        EnrollmentEvent::RefundTierAssigned { tier: RefundTier::Full, .. }
    )));
}

#[test]
fn waitlist_withdraw_compacts_the_positions_behind_it() {
    let (service, _, _) = build_service();
    let section_id = SectionId("CS-101-A".into());
    service.open_section(section("CS-101-A", 1)).expect("opens");

    service
        .request_enrollment(student("stu-a"), section_id.clone(), "registrar", now())
        .expect("fills seat");
    let b = service
        .request_enrollment(student("stu-b"), section_id.clone(), "registrar", now())
        .expect("b waitlists");
    let c = service
        .request_enrollment(student("stu-c"), section_id.clone(), "registrar", now())
        .expect("c waitlists");
    let d = service
        .request_enrollment(student("stu-d"), section_id.clone(), "registrar", now())
        .expect("d waitlists");
    assert_eq!(d.waitlist_position, Some(3));

    let withdrawn = service
        .request_waitlist_withdraw(&c.enrollment_id, now() + Duration::hours(1))
        .expect("c leaves the waitlist");
    assert_eq!(withdrawn.status, EnrollmentStatus::Withdrawn);

    assert_eq!(
        service
            .waitlist_position(&student("stu-b"), &section_id)
            .expect("position"),
        Some(1)
    );
    assert_eq!(
        service
            .waitlist_position(&student("stu-d"), &section_id)
            .expect("position"),
        Some(2)
    );
    let d_record = service.get_record(&d.enrollment_id).expect("d record");
    assert_eq!(d_record.waitlist_position, Some(2));
    assert_eq!(b.waitlist_position, Some(1));
}

#[test]
fn waitlist_withdraw_with_a_pending_offer_frees_the_held_seat() {
    let (service, _, _) = build_service();
    let section_id = SectionId("CS-101-A".into());
    service.open_section(section("CS-101-A", 1)).expect("opens");

    let a = service
        .request_enrollment(student("stu-a"), section_id.clone(), "registrar", now())
        .expect("a enrolls");
    let b = service
        .request_enrollment(student("stu-b"), section_id.clone(), "registrar", now())
        .expect("b waitlists");
    let c = service
        .request_enrollment(student("stu-c"), section_id.clone(), "registrar", now())
        .expect("c waitlists");

    service
        .request_drop(&a.enrollment_id, now() + Duration::hours(1))
        .expect("a drops");
    assert!(service.pending_offer(&b.enrollment_id).is_some());

    service
        .request_waitlist_withdraw(&b.enrollment_id, now() + Duration::hours(2))
        .expect("b declines by leaving");

    // The held seat cascades to c.
    assert!(service.pending_offer(&c.enrollment_id).is_some());
    let b_record = service.get_record(&b.enrollment_id).expect("b record");
    assert_eq!(b_record.status, EnrollmentStatus::Withdrawn);
}

#[test]
fn decline_offer_cascades_to_the_next_head() {
    let (service, _, _) = build_service();
    let section_id = SectionId("CS-101-A".into());
    service.open_section(section("CS-101-A", 1)).expect("opens");

    let a = service
        .request_enrollment(student("stu-a"), section_id.clone(), "registrar", now())
        .expect("a enrolls");
    let b = service
        .request_enrollment(student("stu-b"), section_id.clone(), "registrar", now())
        .expect("b waitlists");
    let c = service
        .request_enrollment(student("stu-c"), section_id.clone(), "registrar", now())
        .expect("c waitlists");

    service
        .request_drop(&a.enrollment_id, now() + Duration::hours(1))
        .expect("a drops");
    let declined = service
        .decline_offer(&b.enrollment_id, now() + Duration::hours(2))
        .expect("b declines");
    assert_eq!(declined.status, EnrollmentStatus::Withdrawn);

    assert!(service.pending_offer(&c.enrollment_id).is_some());
}

#[test]
fn late_accept_runs_the_expiry_path_instead_of_seating() {
    let (service, _, _) = build_service();
    let section_id = SectionId("CS-101-A".into());
    service.open_section(section("CS-101-A", 1)).expect("opens");

    let a = service
        .request_enrollment(student("stu-a"), section_id.clone(), "registrar", now())
        .expect("a enrolls");
    let b = service
        .request_enrollment(student("stu-b"), section_id.clone(), "registrar", now())
        .expect("b waitlists");
    let c = service
        .request_enrollment(student("stu-c"), section_id.clone(), "registrar", now())
        .expect("c waitlists");

    let drop_at = now() + Duration::hours(1);
    service.request_drop(&a.enrollment_id, drop_at).expect("a drops");

    let late = drop_at + offer_window() + Duration::minutes(1);
    match service.accept_offer(&b.enrollment_id, late) {
        Err(EnrollmentError::OfferExpired(_)) => {}
        other => panic!("expected expired offer rejection, got {other:?}"),
    }

    let b_record = service.get_record(&b.enrollment_id).expect("b record");
    assert_eq!(b_record.status, EnrollmentStatus::Expired);
    assert!(service.pending_offer(&c.enrollment_id).is_some());
}

#[test]
fn enroll_drop_reenroll_roundtrip_frees_the_seat_exactly_once() {
    let (service, _, _) = build_service();
    let section_id = SectionId("CS-101-A".into());
    service.open_section(section("CS-101-A", 1)).expect("opens");

    let a = service
        .request_enrollment(student("stu-a"), section_id.clone(), "registrar", now())
        .expect("a enrolls");
    service
        .request_drop(&a.enrollment_id, now() + Duration::hours(1))
        .expect("a drops");

    let status = service.section_status(&section_id).expect("status");
    assert_eq!(status.enrolled, 0);

    let again = service
        .request_enrollment(
            student("stu-a"),
            section_id.clone(),
            "registrar",
            now() + Duration::hours(2),
        )
        .expect("a re-enrolls into the freed seat");
    assert_eq!(again.status, EnrollmentStatus::Enrolled);
    assert_ne!(again.enrollment_id, a.enrollment_id);
    assert_eq!(service.section_status(&section_id).expect("status").enrolled, 1);
}

#[test]
fn full_waitlist_rejects_the_request_without_creating_a_record() {
    let (service, repository, _) = build_service();
    let section_id = SectionId("CS-101-A".into());
    service
        .open_section(section_with_waitlist_cap("CS-101-A", 1, 1))
        .expect("opens");

    service
        .request_enrollment(student("stu-a"), section_id.clone(), "registrar", now())
        .expect("fills seat");
    service
        .request_enrollment(student("stu-b"), section_id.clone(), "registrar", now())
        .expect("fills waitlist");

    match service.request_enrollment(student("stu-c"), section_id.clone(), "registrar", now()) {
        Err(EnrollmentError::SectionAndWaitlistFull(_)) => {}
        other => panic!("expected full rejection, got {other:?}"),
    }
    use crate::workflows::enrollment::repository::EnrollmentRepository;
    assert!(repository
        .find_active(&student("stu-c"), &section_id)
        .expect("lookup")
        .is_none());
}

#[test]
fn mark_completed_finalizes_the_roster_without_freeing_the_seat() {
    let (service, _, _) = build_service();
    let section_id = SectionId("CS-101-A".into());
    service.open_section(section("CS-101-A", 1)).expect("opens");

    let a = service
        .request_enrollment(student("stu-a"), section_id.clone(), "registrar", now())
        .expect("a enrolls");
    let record = service
        .mark_completed(&a.enrollment_id, after_withdraw_deadline())
        .expect("close-out");
    assert_eq!(record.status, EnrollmentStatus::Completed);
    assert_eq!(service.section_status(&section_id).expect("status").enrolled, 1);
}

#[test]
fn two_freed_seats_promote_the_two_earliest_students_in_order() {
    let (service, _, _) = build_service();
    let section_id = SectionId("CS-101-A".into());
    service.open_section(section("CS-101-A", 2)).expect("opens");

    let a = service
        .request_enrollment(student("stu-a"), section_id.clone(), "registrar", now())
        .expect("a enrolls");
    let b = service
        .request_enrollment(student("stu-b"), section_id.clone(), "registrar", now())
        .expect("b enrolls");
    let c = service
        .request_enrollment(student("stu-c"), section_id.clone(), "registrar", now())
        .expect("c waitlists");
    let d = service
        .request_enrollment(student("stu-d"), section_id.clone(), "registrar", now())
        .expect("d waitlists");

    service
        .request_drop(&b.enrollment_id, now() + Duration::hours(1))
        .expect("b drops");
    service
        .request_drop(&a.enrollment_id, now() + Duration::hours(2))
        .expect("a drops");

    assert!(service.pending_offer(&c.enrollment_id).is_some());
    assert!(service.pending_offer(&d.enrollment_id).is_some());
    assert!(service
        .waitlist_position(&student("stu-c"), &section_id)
        .expect("position")
        .is_none());
}

#[test]
fn unknown_section_and_missing_record_are_not_found() {
    let (service, _, _) = build_service();
    match service.request_enrollment(student("stu-a"), SectionId("missing".into()), "registrar", now()) {
        Err(EnrollmentError::UnknownSection(_)) => {}
        other => panic!("expected unknown section, got {other:?}"),
    }
    match service.get_record(&crate::workflows::enrollment::domain::EnrollmentId("enr-none".into())) {
        Err(EnrollmentError::Repository(RepositoryError::NotFound)) => {}
        other => panic!("expected not found, got {other:?}"),
    }
}

#[test]
fn add_deadline_gates_new_requests() {
    let (service, _, _) = build_service();
    let section_id = SectionId("CS-101-A".into());
    service.open_section(section("CS-101-A", 5)).expect("opens");

    match service.request_enrollment(
        student("stu-a"),
        section_id,
        "registrar",
        between_drop_and_withdraw(),
    ) {
        Err(EnrollmentError::DeadlinePassed { .. }) => {}
        other => panic!("expected deadline rejection, got {other:?}"),
    }
}

#[test]
fn storage_failure_surfaces_and_returns_the_reserved_seat() {
    let repository = Arc::new(UnavailableRepository);
    let events = Arc::new(MemoryEvents::default());
    let service = EnrollmentService::new(repository, events, enrollment_config());
    let section_id = SectionId("CS-101-A".into());
    service.open_section(section("CS-101-A", 1)).expect("opens");

    match service.request_enrollment(student("stu-a"), section_id.clone(), "registrar", now()) {
        Err(EnrollmentError::Repository(RepositoryError::Unavailable(_))) => {}
        other => panic!("expected repository failure, got {other:?}"),
    }

    // The compensating release keeps the seat available for the next caller.
    let status = service.section_status(&section_id).expect("status");
    assert_eq!(status.enrolled, 0);
}

#[test]
fn concurrent_requests_for_the_last_seat_enroll_exactly_one_student() {
    let (service, _, _) = build_service();
    let section_id = SectionId("CS-101-A".into());
    service.open_section(section("CS-101-A", 1)).expect("opens");

    let handles: Vec<_> = (0..4)
        .map(|index| {
            let service = service.clone();
            let section_id = section_id.clone();
            thread::spawn(move || {
                service
                    .request_enrollment(
                        student(&format!("stu-{index}")),
                        section_id,
                        "registrar",
                        now(),
                    )
                    .expect("request handled")
            })
        })
        .collect();

    let records: Vec<_> = handles
        .into_iter()
        .map(|handle| handle.join().expect("thread completes"))
        .collect();

    let enrolled = records
        .iter()
        .filter(|record| record.status == EnrollmentStatus::Enrolled)
        .count();
    let waitlisted: Vec<u32> = {
        let mut positions: Vec<u32> = records
            .iter()
            .filter_map(|record| record.waitlist_position)
            .collect();
        positions.sort_unstable();
        positions
    };

    assert_eq!(enrolled, 1, "exactly one request wins the last seat");
    assert_eq!(waitlisted, vec![1, 2, 3], "losers hold dense positions");

    let status = service.section_status(&section_id).expect("status");
    assert_eq!(status.enrolled, 1);
    assert_eq!(status.waitlist_length, 3);
}
