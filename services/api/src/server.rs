use crate::cli::ServeArgs;
use crate::infra::{AppState, InMemoryEnrollmentRepository, InMemoryEventPublisher};
use crate::routes::with_enrollment_routes;
use axum::Extension;
use axum_prometheus::PrometheusMetricLayer;
use chrono::Utc;
use registrar::config::AppConfig;
use registrar::error::AppError;
use registrar::telemetry;
use registrar::workflows::enrollment::EnrollmentService;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

pub(crate) async fn run(mut args: ServeArgs) -> Result<(), AppError> {
    let mut config = AppConfig::load()?;

    if let Some(host) = args.host.take() {
        config.server.host = host;
    }
    if let Some(port) = args.port.take() {
        config.server.port = port;
    }

    telemetry::init(&config.telemetry)?;

    let (prometheus_layer, prometheus_handle) = PrometheusMetricLayer::pair();
    let readiness_flag = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let app_state = AppState {
        readiness: readiness_flag.clone(),
        metrics: Arc::new(prometheus_handle),
    };

    let repository = Arc::new(InMemoryEnrollmentRepository::default());
    let events = Arc::new(InMemoryEventPublisher::default());
    let enrollment_service = Arc::new(EnrollmentService::new(
        repository,
        events,
        config.enrollment.clone(),
    ));

    spawn_offer_sweep(
        enrollment_service.clone(),
        config.enrollment.sweep_interval_secs,
    );

    let app = with_enrollment_routes(enrollment_service)
        .layer(Extension(app_state))
        .layer(prometheus_layer);

    let addr = config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    readiness_flag.store(true, Ordering::Release);

    info!(?config.environment, %addr, "enrollment service ready");

    axum::serve(listener, app).await?;
    Ok(())
}

/// Periodic reaper for lapsed seat offers. The sweep is idempotent, so a
/// restarted worker or an overlapping pass never double-processes an offer.
fn spawn_offer_sweep(
    service: Arc<EnrollmentService<InMemoryEnrollmentRepository, InMemoryEventPublisher>>,
    interval_secs: u64,
) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs));
        loop {
            ticker.tick().await;
            match service.sweep_expired_offers(Utc::now()) {
                Ok(0) => {}
                Ok(reaped) => info!(reaped, "expired waitlist offers reaped"),
                Err(err) => warn!(error = %err, "offer sweep failed; will retry"),
            }
        }
    });
}
