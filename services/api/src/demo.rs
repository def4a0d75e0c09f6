use crate::infra::{InMemoryEnrollmentRepository, InMemoryEventPublisher};
use chrono::{Duration, Utc};
use clap::Args;
use registrar::config::EnrollmentConfig;
use registrar::error::AppError;
use registrar::workflows::enrollment::{
    EnrollmentService, EnrollmentStatus, SectionId, SectionProfile, StudentId, TermCalendar,
};
use std::sync::Arc;

#[derive(Args, Debug)]
pub(crate) struct DemoArgs {
    /// Seats in the demo section.
    #[arg(long, default_value_t = 2)]
    pub(crate) capacity: u32,
    /// Students requesting enrollment (extras land on the waitlist).
    #[arg(long, default_value_t = 4)]
    pub(crate) students: u32,
    /// Let the first seat offer lapse instead of accepting it.
    #[arg(long)]
    pub(crate) expire_offer: bool,
}

impl Default for DemoArgs {
    fn default() -> Self {
        Self {
            capacity: 2,
            students: 4,
            expire_offer: false,
        }
    }
}

pub(crate) fn run_demo(args: DemoArgs) -> Result<(), AppError> {
    let DemoArgs {
        capacity,
        students,
        expire_offer,
    } = args;

    let now = Utc::now();
    let config = EnrollmentConfig::default();
    let offer_window = Duration::hours(config.offer_window_hours);

    let repository = Arc::new(InMemoryEnrollmentRepository::default());
    let events = Arc::new(InMemoryEventPublisher::default());
    let service = Arc::new(EnrollmentService::new(
        repository.clone(),
        events.clone(),
        config,
    ));

    let section_id = SectionId("CS-101-A".to_string());
    let profile = SectionProfile {
        section_id: section_id.clone(),
        term: TermCalendar {
            term_code: "2026-SP".to_string(),
            add_deadline: now + Duration::days(7),
            drop_deadline: now + Duration::days(21),
            withdraw_deadline: now + Duration::days(60),
        },
        capacity,
        waitlist_capacity: None,
    };
    if let Err(err) = service.open_section(profile) {
        println!("Unable to open demo section: {err}");
        return Ok(());
    }

    println!("Enrollment workflow demo");
    println!("Section CS-101-A: {capacity} seats, unbounded waitlist");

    println!("\nEnrollment requests");
    let mut records = Vec::new();
    for index in 1..=students {
        let student = StudentId(format!("stu-{index:02}"));
        match service.request_enrollment(student.clone(), section_id.clone(), "demo-registrar", now)
        {
            Ok(record) => {
                match record.waitlist_position {
                    Some(position) => {
                        println!("- {} -> waitlisted at position {position}", student.0)
                    }
                    None => println!("- {} -> enrolled", student.0),
                }
                records.push(record);
            }
            Err(err) => println!("- {} -> rejected: {err}", student.0),
        }
    }

    render_section_status(&service, &section_id);

    let Some(first_enrolled) = records
        .iter()
        .find(|record| record.status == EnrollmentStatus::Enrolled)
    else {
        println!("\nNo enrolled student to drop; demo ends here");
        return Ok(());
    };
    let Some(head) = records
        .iter()
        .find(|record| record.status == EnrollmentStatus::Waitlisted)
    else {
        println!("\nWaitlist is empty; demo ends here");
        return Ok(());
    };

    println!(
        "\n{} drops; a seat frees and the waitlist head is promoted",
        first_enrolled.student_id.0
    );
    let drop_at = now + Duration::hours(1);
    if let Err(err) = service.request_drop(&first_enrolled.enrollment_id, drop_at) {
        println!("Drop rejected: {err}");
        return Ok(());
    }

    match service.pending_offer(&head.enrollment_id) {
        Some(offer) => println!(
            "- offer opened for {} (expires {})",
            head.student_id.0, offer.expires_at
        ),
        None => println!("- no offer found for the waitlist head"),
    }

    if expire_offer {
        let past_window = drop_at + offer_window + Duration::minutes(1);
        match service.sweep_expired_offers(past_window) {
            Ok(reaped) => println!(
                "- offer left unanswered; sweep reaped {reaped} offer(s) and promoted the next head"
            ),
            Err(err) => println!("- sweep failed: {err}"),
        }
    } else {
        match service.accept_offer(&head.enrollment_id, drop_at + Duration::hours(1)) {
            Ok(record) => println!("- {} accepted and is now {}", record.student_id.0, record.status.label()),
            Err(err) => println!("- acceptance failed: {err}"),
        }
    }

    render_section_status(&service, &section_id);

    println!("\nDomain events published");
    for event in events.events() {
        match serde_json::to_string(&event) {
            Ok(json) => println!("- {json}"),
            Err(err) => println!("- unserializable event: {err}"),
        }
    }

    Ok(())
}

fn render_section_status(
    service: &EnrollmentService<InMemoryEnrollmentRepository, InMemoryEventPublisher>,
    section_id: &SectionId,
) {
    match service.section_status(section_id) {
        Ok(status) => println!(
            "\nSection status: {}/{} seats filled, {} waiting",
            status.enrolled, status.capacity, status.waitlist_length
        ),
        Err(err) => println!("\nSection status unavailable: {err}"),
    }
}
