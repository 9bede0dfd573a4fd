pub mod config;
pub mod handlers;
pub mod models;
pub mod services;

use axum::middleware::from_fn;
use axum::{
    routing::{get, post},
    Router,
};
use secrecy::ExposeSecret;
use service_core::middleware::{metrics::metrics_middleware, tracing::request_id_middleware};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use config::Config;
use services::deal::DealManager;
use services::floa::FloaClient;
use services::prebook::PrebookOrchestrator;
use services::reconcile::WebhookReconciler;
use services::repository::{BookingStore, InMemoryStore, PgStore};
use services::supplier::SupplierClient;
use services::systempay::SystempayClient;

#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub store: Arc<dyn BookingStore>,
    pub supplier: Arc<SupplierClient>,
    pub floa: FloaClient,
    pub systempay: SystempayClient,
    pub prebooks: PrebookOrchestrator,
    pub deals: DealManager,
    pub reconciler: WebhookReconciler,
}

pub struct Application {
    port: u16,
    listener: tokio::net::TcpListener,
    router: Router,
    state: AppState,
}

impl Application {
    pub async fn build(config: Config) -> anyhow::Result<Self> {
        let store: Arc<dyn BookingStore> = match &config.database.url {
            Some(url) => {
                let store =
                    PgStore::connect(url.expose_secret(), config.database.max_connections).await?;
                store.run_migrations().await?;
                tracing::info!("connected to postgres");
                Arc::new(store)
            }
            None => {
                tracing::warn!("DATABASE_URL not set, using in-memory store");
                Arc::new(InMemoryStore::new())
            }
        };

        let supplier = Arc::new(SupplierClient::new(config.supplier.clone()));
        let floa = FloaClient::new(config.floa.clone());
        if !floa.is_configured() {
            tracing::warn!("floa credentials not configured, installment features disabled");
        }
        let systempay = SystempayClient::new(config.systempay.clone());

        let prebooks = PrebookOrchestrator::new(supplier.clone(), store.clone());
        let deals = DealManager::new(floa.clone(), store.clone());
        let reconciler = WebhookReconciler::new(store.clone());

        let state = AppState {
            config: config.clone(),
            store,
            supplier,
            floa,
            systempay,
            prebooks,
            deals,
            reconciler,
        };

        let router = Router::new()
            .route("/health", get(handlers::health_check))
            .route("/ready", get(handlers::readiness_check))
            .route("/metrics", get(handlers::metrics_endpoint))
            // Booking flow
            .route("/prebook", post(handlers::booking::prebook))
            .route("/booking/form", post(handlers::booking::booking_form))
            .route("/booking/start", post(handlers::booking::start_booking))
            .route("/booking/check", post(handlers::booking::check_booking))
            .route("/booking/status", get(handlers::booking::booking_status))
            // Installment payments
            .route(
                "/payments/floa/hotel/deal",
                post(handlers::floa::create_deal),
            )
            .route(
                "/payments/floa/deal/:reference/finalize",
                post(handlers::floa::finalize_deal),
            )
            .route(
                "/payments/floa/deal/:reference/cancel",
                post(handlers::floa::cancel_deal),
            )
            .route(
                "/payments/floa/deal/:reference",
                get(handlers::floa::get_installment_plan),
            )
            .route(
                "/payments/floa/simulate",
                post(handlers::floa::simulate_plan),
            )
            // Card payments
            .route(
                "/payments/systempay/create-order",
                post(handlers::systempay::create_order),
            )
            .route("/webhook/systempay", post(handlers::systempay::webhook))
            // route_layer so the matched route template is available for
            // the path label; unmatched 404s are not counted.
            .route_layer(from_fn(metrics_middleware))
            .layer(from_fn(request_id_middleware))
            .layer(
                TraceLayer::new_for_http().make_span_with(|request: &axum::http::Request<_>| {
                    // Filled in by the request-id middleware, which also
                    // generates an id when the caller sent none.
                    tracing::info_span!(
                        "http_request",
                        request_id = tracing::field::Empty,
                        method = %request.method(),
                        uri = %request.uri(),
                    )
                }),
            )
            .with_state(state.clone());

        let addr = format!("{}:{}", config.server.host, config.server.port);
        let listener = tokio::net::TcpListener::bind(&addr).await?;
        let port = listener.local_addr()?.port();

        Ok(Self {
            port,
            listener,
            router,
            state,
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn state(&self) -> AppState {
        self.state.clone()
    }

    pub async fn run_until_stopped(self) -> anyhow::Result<()> {
        tracing::info!("listening on {}", self.listener.local_addr()?);
        axum::serve(self.listener, self.router).await?;
        Ok(())
    }
}
