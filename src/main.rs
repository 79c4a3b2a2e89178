use std::net::SocketAddr;

use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::Config;
use crate::hub::Hub;
use crate::notifier::ChangeNotifier;
use crate::watcher::{DeploymentWatcher, WatchTarget};
use crate::webserver::AppState;

mod config;
mod hub;
mod image_id;
mod image_reference;
mod message;
mod notifier;
mod watcher;
mod webserver;

#[cfg(target_env = "musl")]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();
    info!("Starting kube-spa-reloader {}", env!("CARGO_PKG_VERSION"));

    let config = Config::from_env();

    info!("Initializing K8s client");
    let client = watcher::create_client().await?;

    let shutdown = CancellationToken::new();

    let (hub, hub_handle) = Hub::new();
    tokio::spawn(hub.run(shutdown.clone()));

    let notifier = ChangeNotifier::new(hub_handle.clone());
    let target = WatchTarget {
        namespace: config.namespace.clone(),
        name: config.name.clone(),
    };
    let (deployment_watcher, watcher_handle) =
        DeploymentWatcher::new(client, target, config.resync_seconds, notifier);
    deployment_watcher.start(shutdown.clone()).await?;

    let app = webserver::create_app(AppState {
        hub: hub_handle,
        watcher: watcher_handle,
    });
    let addr = SocketAddr::from(([0, 0, 0, 0], config.websocket_port));
    info!("Starting webserver on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown))
        .await?;

    Ok(())
}

async fn shutdown_signal(shutdown: CancellationToken) {
    let terminate = async {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{SignalKind, signal};
            match signal(SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    sigterm.recv().await;
                }
                Err(e) => {
                    tracing::error!("Failed to install SIGTERM handler: {}", e);
                    std::future::pending::<()>().await;
                }
            }
        }
        #[cfg(not(unix))]
        std::future::pending::<()>().await;
    };

    let interrupt = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for ctrl-c: {}", e);
            std::future::pending::<()>().await;
        }
    };

    tokio::select! {
        _ = interrupt => {}
        _ = terminate => {}
    }

    info!("Termination signal received, shutting down");
    shutdown.cancel();
}
