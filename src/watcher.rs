use std::time::Duration;

use anyhow::Context as _;
use futures::StreamExt;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{ContainerStatus, Pod};
use kube::api::ListParams;
use kube::runtime::watcher::{self, watcher};
use kube::{Api, Client};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::image_id::sha256_from_image_id;
use crate::image_reference::ImageReference;
use crate::message::{ImageChangeEvent, ImageDescriptor};
use crate::notifier::ChangeNotifier;

static RUNNING_PHASE: &str = "Running";
const QUERY_QUEUE_SIZE: usize = 8;

/// The deployment being watched; an empty name means every deployment in
/// the namespace. Fixed for the process lifetime.
#[derive(Debug, Clone)]
pub struct WatchTarget {
    pub namespace: String,
    pub name: String,
}

struct StateQuery {
    reply: oneshot::Sender<Option<ImageDescriptor>>,
}

/// Read access to the watcher's current image. Queries are answered by the
/// watch task itself, so no state is shared across tasks.
#[derive(Clone)]
pub struct WatcherHandle {
    queries: mpsc::Sender<StateQuery>,
    target: WatchTarget,
}

impl WatcherHandle {
    pub fn target(&self) -> &WatchTarget {
        &self.target
    }

    pub async fn current_image(&self) -> Option<ImageDescriptor> {
        let (reply, response) = oneshot::channel();
        self.queries.send(StateQuery { reply }).await.ok()?;
        response.await.ok().flatten()
    }
}

pub async fn create_client() -> anyhow::Result<Client> {
    let client = Client::try_default()
        .await
        .context("Failed to construct Kubernetes client")?;
    let api_server_info = client
        .apiserver_version()
        .await
        .context("Failed to reach the Kubernetes API server")?;
    info!(
        "Connected to namespace {}, Kubernetes API server with version {}.{}",
        client.default_namespace(),
        api_server_info.major,
        api_server_info.minor
    );
    Ok(client)
}

/// Maintains the "current running image" fact for the watch target and
/// emits a change event whenever the running digest genuinely changes.
pub struct DeploymentWatcher {
    client: Client,
    target: WatchTarget,
    resync: Duration,
    notifier: ChangeNotifier,
    current: Option<ImageDescriptor>,
    queries: mpsc::Receiver<StateQuery>,
}

impl DeploymentWatcher {
    pub fn new(
        client: Client,
        target: WatchTarget,
        resync_seconds: u64,
        notifier: ChangeNotifier,
    ) -> (Self, WatcherHandle) {
        let (queries_tx, queries_rx) = mpsc::channel(QUERY_QUEUE_SIZE);
        let handle = WatcherHandle {
            queries: queries_tx,
            target: target.clone(),
        };
        let deployment_watcher = Self {
            client,
            target,
            // interval_at rejects a zero period
            resync: Duration::from_secs(resync_seconds.max(1)),
            notifier,
            current: None,
            queries: queries_rx,
        };
        (deployment_watcher, handle)
    }

    /// Verifies the watch can be established, then runs the event loop as an
    /// independent task. Startup fails only if the initial list is rejected;
    /// once running, per-event errors are logged and the loop continues.
    pub async fn start(self, shutdown: CancellationToken) -> anyhow::Result<JoinHandle<()>> {
        self.deployments()
            .list(&self.list_params())
            .await
            .with_context(|| {
                format!(
                    "Failed to list deployments in namespace {}",
                    self.target.namespace
                )
            })?;
        info!(
            "Watching deployment {:?} in namespace {}",
            self.target.name, self.target.namespace
        );
        Ok(tokio::spawn(self.run(shutdown)))
    }

    async fn run(mut self, shutdown: CancellationToken) {
        let mut config = watcher::Config::default();
        if let Some(fields) = self.field_selector() {
            config = config.fields(&fields);
        }
        let mut events = watcher(self.deployments(), config).boxed();
        let mut resync = tokio::time::interval_at(
            tokio::time::Instant::now() + self.resync,
            self.resync,
        );

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Deployment watcher shutting down");
                    break;
                }
                event = events.next() => match event {
                    Some(Ok(event)) => self.handle_event(event).await,
                    Some(Err(e)) => warn!("Deployment watch error: {}", e),
                    None => {
                        warn!("Deployment watch stream ended");
                        break;
                    }
                },
                _ = resync.tick() => self.handle_resync().await,
                Some(query) = self.queries.recv() => {
                    let _ = query.reply.send(self.current.clone());
                }
            }
        }
    }

    async fn handle_event(&mut self, event: watcher::Event<Deployment>) {
        match event {
            // The initial listing and post-interruption re-lists deliver
            // known objects here; only an unprimed watcher treats them as
            // adds, everything else goes through change detection
            watcher::Event::InitApply(deployment) => {
                if self.current.is_none() {
                    self.handle_added(deployment).await;
                } else {
                    self.handle_updated(deployment).await;
                }
            }
            watcher::Event::Apply(deployment) => self.handle_updated(deployment).await,
            watcher::Event::Init | watcher::Event::InitDone => {}
            watcher::Event::Delete(_) => {}
        }
    }

    /// Seeds the current image from the first pod that already reports an
    /// image ID. Priming never produces a broadcast.
    async fn handle_added(&mut self, deployment: Deployment) {
        let name = deployment_name(&deployment);
        info!("Deployment {} added", name);

        let pods = match self.pods_for_deployment(&deployment).await {
            Ok(pods) => pods,
            Err(e) => {
                error!("Failed to list pods for deployment {}: {:?}", name, e);
                return;
            }
        };

        match primed_descriptor(&pods) {
            Some(descriptor) => {
                info!(
                    "Priming current image for deployment {} to {} with digest {}",
                    name, descriptor.reference_name, descriptor.digest
                );
                self.current = Some(descriptor);
            }
            None => debug!("No pod of deployment {} reports an image ID yet", name),
        }
    }

    /// Digest-based change detection. At most one event is emitted per
    /// delivery; the first qualifying pod in list order wins.
    async fn handle_updated(&mut self, deployment: Deployment) {
        let name = deployment_name(&deployment).to_string();
        let declared = match declared_image(&deployment) {
            Some(image) if !image.is_empty() => image,
            // Declared reference not resolvable yet; the next resync
            // redelivers this deployment
            _ => return,
        };
        let declared = match ImageReference::parse(&declared) {
            Ok(reference) => reference,
            Err(e) => {
                warn!(
                    "Cannot parse declared image {} of deployment {}: {}",
                    declared, name, e
                );
                return;
            }
        };
        debug!(
            "Processing deployment {} with declared image {}",
            name, declared
        );

        let pods = match self.pods_for_deployment(&deployment).await {
            Ok(pods) => pods,
            Err(e) => {
                error!("Failed to list pods for deployment {}: {:?}", name, e);
                return;
            }
        };

        if let Some(descriptor) = changed_descriptor(&pods, &declared, self.current.as_ref()) {
            match &self.current {
                Some(previous) => info!(
                    "Detected image change for deployment {} from digest {} to {}",
                    name, previous.digest, descriptor.digest
                ),
                None => info!(
                    "Detected image change for deployment {} to digest {}",
                    name, descriptor.digest
                ),
            }
            let event = ImageChangeEvent::new(
                &self.target.namespace,
                &self.target.name,
                descriptor.clone(),
                self.current.as_ref(),
            );
            self.current = Some(descriptor);
            if let Err(e) = self.notifier.notify(&event).await {
                error!("Failed to broadcast image change: {:?}", e);
            }
        }
    }

    /// Periodic re-list routed through the update path, so transitions the
    /// watch missed are eventually picked up.
    async fn handle_resync(&mut self) {
        let deployments = match self.deployments().list(&self.list_params()).await {
            Ok(list) => list.items,
            Err(e) => {
                warn!("Resync list failed: {}", e);
                return;
            }
        };
        debug!("Resyncing {} deployments", deployments.len());
        for deployment in deployments {
            self.handle_updated(deployment).await;
        }
    }

    async fn pods_for_deployment(&self, deployment: &Deployment) -> anyhow::Result<Vec<Pod>> {
        let selector = deployment
            .spec
            .as_ref()
            .and_then(|spec| spec.selector.match_labels.as_ref())
            .context("Deployment has no pod selector labels")?;

        // Build a label selector string like "key1=value1,key2=value2"
        let label_selector = selector
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join(",");

        let lp = ListParams::default().labels(&label_selector);
        let pods = self
            .pods()
            .list(&lp)
            .await
            .with_context(|| format!("Failed to list pods with selector {}", label_selector))?;
        Ok(pods.items)
    }

    fn deployments(&self) -> Api<Deployment> {
        Api::namespaced(self.client.clone(), &self.target.namespace)
    }

    fn pods(&self) -> Api<Pod> {
        Api::namespaced(self.client.clone(), &self.target.namespace)
    }

    fn field_selector(&self) -> Option<String> {
        if self.target.name.is_empty() {
            None
        } else {
            Some(format!("metadata.name={}", self.target.name))
        }
    }

    fn list_params(&self) -> ListParams {
        match self.field_selector() {
            Some(fields) => ListParams::default().fields(&fields),
            None => ListParams::default(),
        }
    }
}

/// Picks the seed image from a freshly added deployment: the first pod whose
/// primary container already reports a non-empty image ID.
fn primed_descriptor(pods: &[Pod]) -> Option<ImageDescriptor> {
    for pod in pods {
        let status = match primary_container_status(pod) {
            Some(status) => status,
            None => continue,
        };
        if status.image_id.is_empty() {
            continue;
        }
        let reference = match ImageReference::parse(&status.image) {
            Ok(reference) => reference,
            Err(e) => {
                warn!(
                    "Skipping pod {}: cannot parse image reference {}: {}",
                    pod_name(pod),
                    status.image,
                    e
                );
                continue;
            }
        };
        return Some(ImageDescriptor::new(
            reference.to_string(),
            sha256_from_image_id(&status.image_id),
        ));
    }
    None
}

/// Scans running pods whose primary container matches the declared reference
/// and returns the first descriptor whose digest differs from `current`.
fn changed_descriptor(
    pods: &[Pod],
    declared: &ImageReference,
    current: Option<&ImageDescriptor>,
) -> Option<ImageDescriptor> {
    for pod in pods {
        if !is_running(pod) {
            continue;
        }
        let status = match primary_container_status(pod) {
            Some(status) => status,
            None => continue,
        };
        let reported = match ImageReference::parse(&status.image) {
            Ok(reference) => reference,
            Err(e) => {
                warn!(
                    "Skipping pod {}: cannot parse image reference {}: {}",
                    pod_name(pod),
                    status.image,
                    e
                );
                continue;
            }
        };
        if reported != *declared {
            continue;
        }
        // An empty image ID means the pod is still starting
        if status.image_id.is_empty() {
            continue;
        }
        let digest = sha256_from_image_id(&status.image_id);
        if digest.is_empty() {
            continue;
        }
        if current.is_some_and(|current| current.digest == digest) {
            continue;
        }
        return Some(ImageDescriptor::new(declared.to_string(), digest));
    }
    None
}

fn deployment_name(deployment: &Deployment) -> &str {
    deployment.metadata.name.as_deref().unwrap_or("<unnamed>")
}

fn pod_name(pod: &Pod) -> &str {
    pod.metadata.name.as_deref().unwrap_or("<unnamed>")
}

fn declared_image(deployment: &Deployment) -> Option<String> {
    deployment
        .spec
        .as_ref()?
        .template
        .spec
        .as_ref()?
        .containers
        .first()?
        .image
        .clone()
}

fn primary_container_status(pod: &Pod) -> Option<&ContainerStatus> {
    pod.status.as_ref()?.container_statuses.as_ref()?.first()
}

fn is_running(pod: &Pod) -> bool {
    pod.status
        .as_ref()
        .and_then(|status| status.phase.as_deref())
        == Some(RUNNING_PHASE)
}
