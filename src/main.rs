use std::{process, sync::Arc};

use restcache::{
    application::{
        coordinator::WorkerPool,
        error::AppError,
        privileged::PrivilegedAccessor,
        resource::CacheResource,
        router::CacheRouter,
        store::CacheStore,
    },
    config,
    infra::{
        error::InfraError,
        http::{self, HttpState},
        memory::{CacheDefinition, ClusterView, InMemoryStore},
        telemetry,
    },
};
use tracing::{Dispatch, Level, dispatcher, error, info};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli().map_err(|err| {
        AppError::from(InfraError::configuration(format!(
            "failed to load configuration: {err}"
        )))
    })?;

    let command = cli_args
        .command
        .unwrap_or(config::Command::Serve(Box::<config::ServeArgs>::default()));

    match command {
        config::Command::Serve(_) => {
            telemetry::init(&settings.logging).map_err(AppError::from)?;
            run_serve(settings).await
        }
        config::Command::CheckConfig => {
            for line in settings.summary() {
                println!("{line}");
            }
            Ok(())
        }
    }
}

async fn run_serve(settings: config::Settings) -> Result<(), AppError> {
    let store: Arc<dyn CacheStore> = Arc::new(build_store(&settings));
    let privileged = PrivilegedAccessor::new(
        Arc::clone(&store),
        settings.server.elevated_principal.clone(),
    );
    let workers = WorkerPool::new(settings.workers.pool_size);
    let resource = CacheResource::new(
        store,
        privileged,
        workers,
        settings.server.extended_headers,
    );
    let state = HttpState {
        router: CacheRouter::new(resource),
    };
    let app = http::build_router(state, &settings.server.context_path);

    let listener = tokio::net::TcpListener::bind(settings.server.addr)
        .await
        .map_err(|err| InfraError::bind(settings.server.addr, err))?;

    info!(
        addr = %settings.server.addr,
        context_path = %settings.server.context_path,
        node = %settings.server.node_name,
        caches = settings.caches.len(),
        workers = settings.workers.pool_size.get(),
        "restcache listening"
    );

    axum::serve(listener, app.into_make_service())
        .await
        .map_err(|err| AppError::from(InfraError::Serve(err)))
}

fn build_store(settings: &config::Settings) -> InMemoryStore {
    let cluster = ClusterView {
        node_name: settings.server.node_name.clone(),
        server_address: settings.server.addr.to_string(),
        members: settings.cluster.members.clone(),
    };
    let definitions = settings.caches.iter().map(|cache| CacheDefinition {
        name: cache.name.clone(),
        lifespan: cache.lifespan,
        max_idle: cache.max_idle,
        storage: cache.storage_media_type.clone(),
    });
    InMemoryStore::new(cluster, definitions)
}
