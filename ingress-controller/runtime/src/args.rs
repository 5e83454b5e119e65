use crate::{
    core::Reloader,
    index::{Index, Settings},
    index_list::IndexList,
    k8s::{self, IngressClass, ResourceId},
    metrics::ReconcileMetrics,
    queue::WorkQueue,
    reconcile::{self, Reconciler},
    reload::FileReloader,
    status::{KubeStatusWriter, StatusManager},
};
use anyhow::{bail, Result};
use clap::Parser;
use kube::runtime::watcher;
use parking_lot::RwLock;
use prometheus_client::registry::Registry;
use std::{path::PathBuf, sync::Arc};
use tokio::time::Duration;
use tracing::{info, info_span, Instrument};

// Keys beyond this many are dropped; any queued key triggers a full rebuild.
const QUEUE_CAPACITY: usize = 1024;

#[derive(Debug, Parser)]
#[clap(name = "ingress-controller", about = "An ingress load balancer controller")]
pub struct Args {
    #[clap(
        long,
        default_value = "ingress=info,warn",
        env = "INGRESS_CONTROLLER_LOG"
    )]
    log_level: kubert::LogFilter,

    #[clap(long, default_value = "plain")]
    log_format: kubert::LogFormat,

    #[clap(flatten)]
    client: kubert::ClientArgs,

    #[clap(flatten)]
    admin: kubert::AdminArgs,

    /// The interval at which the configuration is rebuilt regardless of changes.
    #[clap(long, default_value = "30")]
    resync_period_secs: u64,

    /// The `namespace/name` of the service that receives requests no ingress
    /// rule matches.
    #[clap(long)]
    default_backend_service: ResourceId,

    /// Limits the ingress watch to a single namespace.
    ///
    /// Ingresses in all namespaces are watched by default.
    #[clap(long, default_value = "")]
    watch_namespace: String,

    /// The `namespace/name` of a ConfigMap with extra proxy configuration.
    #[clap(long)]
    config_map: Option<ResourceId>,

    #[clap(long, default_value = "nghttpx")]
    ingress_class: String,

    /// The `namespace/name` of the secret holding the default TLS credential.
    #[clap(long)]
    default_tls_secret: Option<ResourceId>,

    /// The name of this controller's pod.
    #[clap(long, env = "POD_NAME")]
    pod_name: String,

    /// The namespace of this controller's pod.
    #[clap(long, env = "POD_NAMESPACE")]
    pod_namespace: String,

    #[clap(long, default_value = "/etc/ingress-lb")]
    config_dir: PathBuf,

    #[clap(long, default_value = "/etc/ingress-lb/tls")]
    tls_dir: PathBuf,

    /// A command run after each configuration change, e.g. to signal the proxy.
    #[clap(long)]
    reload_command: Option<String>,

    #[clap(long, default_value = "5000")]
    patch_timeout_ms: u64,
}

impl Args {
    #[inline]
    pub async fn parse_and_run() -> Result<()> {
        Self::parse().run().await
    }

    pub async fn run(self) -> Result<()> {
        let Self {
            admin,
            client,
            log_level,
            log_format,
            resync_period_secs,
            default_backend_service,
            watch_namespace,
            config_map,
            ingress_class,
            default_tls_secret,
            pod_name,
            pod_namespace,
            config_dir,
            tls_dir,
            reload_command,
            patch_timeout_ms,
        } = self;

        if pod_name.is_empty() || pod_namespace.is_empty() {
            bail!("--pod-name and --pod-namespace must be set");
        }
        if resync_period_secs == 0 {
            bail!("--resync-period-secs must be positive");
        }

        let ingress_class = IngressClass::new(ingress_class);
        let settings = Settings {
            default_backend: default_backend_service,
            ingress_class: ingress_class.clone(),
            config_map,
            default_tls_secret,
            tls_dir: tls_dir.clone(),
        };

        let index = Index::shared();
        let queue = WorkQueue::new(QUEUE_CAPACITY);

        let mut prom = <Registry>::default();
        let metrics = ReconcileMetrics::register(prom.sub_registry_with_prefix("ingress"));

        let mut runtime = kubert::Runtime::builder()
            .with_log(log_level, log_format)
            .with_admin(admin.into_builder().with_prometheus(prom))
            .with_client(client)
            .build()
            .await?;

        // Every watch event updates the index and then queues a sync.
        let indexes = IndexList::new(index.clone())
            .push(Arc::new(RwLock::new(queue.clone())))
            .shared();

        // Spawn resource watches.

        if watch_namespace.is_empty() {
            let ingresses = runtime.watch_all::<k8s::Ingress>(watcher::Config::default());
            tokio::spawn(
                kubert::index::namespaced(indexes.clone(), ingresses)
                    .instrument(info_span!("ingresses")),
            );
        } else {
            let ingresses = runtime
                .watch_namespaced::<k8s::Ingress>(watch_namespace.clone(), watcher::Config::default());
            tokio::spawn(
                kubert::index::namespaced(indexes.clone(), ingresses)
                    .instrument(info_span!("ingresses", ns = %watch_namespace)),
            );
        }

        let services = runtime.watch_all::<k8s::Service>(watcher::Config::default());
        tokio::spawn(
            kubert::index::namespaced(indexes.clone(), services)
                .instrument(info_span!("services")),
        );

        let endpoints = runtime.watch_all::<k8s::Endpoints>(watcher::Config::default());
        tokio::spawn(
            kubert::index::namespaced(indexes.clone(), endpoints)
                .instrument(info_span!("endpoints")),
        );

        let secrets = runtime.watch_all::<k8s::Secret>(watcher::Config::default());
        tokio::spawn(
            kubert::index::namespaced(indexes.clone(), secrets).instrument(info_span!("secrets")),
        );

        let config_maps = runtime.watch_all::<k8s::ConfigMap>(watcher::Config::default());
        tokio::spawn(
            kubert::index::namespaced(indexes.clone(), config_maps)
                .instrument(info_span!("configmaps")),
        );

        let pods = runtime.watch_all::<k8s::Pod>(watcher::Config::default());
        tokio::spawn(
            kubert::index::namespaced(indexes.clone(), pods).instrument(info_span!("pods")),
        );

        let nodes = runtime.watch_all::<k8s::Node>(watcher::Config::default());
        tokio::spawn(kubert::index::cluster(indexes, nodes).instrument(info_span!("nodes")));

        // Spawn the reloader, the periodic resync, and the reconcile loop.

        let reloader = Arc::new(FileReloader::new(config_dir, tls_dir, reload_command));
        tokio::spawn({
            let reloader = reloader.clone();
            let shutdown = runtime.shutdown_handle();
            async move { reloader.start(shutdown).await }.instrument(info_span!("reloader"))
        });

        tokio::spawn(
            reconcile::resync(
                queue.clone(),
                Duration::from_secs(resync_period_secs),
                runtime.shutdown_handle(),
            )
            .instrument(info_span!("resync")),
        );

        let controller = ResourceId::new(pod_namespace, pod_name);
        info!(%controller, class = %ingress_class, "Starting ingress controller");
        let status = StatusManager::new(
            index.clone(),
            KubeStatusWriter::new(runtime.client(), Duration::from_millis(patch_timeout_ms)),
            controller,
            ingress_class,
        );
        let reconciler = Reconciler::new(index, settings, reloader, status, metrics);
        tokio::spawn(
            reconciler
                .run(queue, runtime.shutdown_handle())
                .instrument(info_span!("reconcile")),
        );

        // Block the main thread on the shutdown signal. Once it fires, wait for the background tasks to
        // complete before exiting.
        if runtime.run().await.is_err() {
            bail!("Aborted");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_flags() {
        let args = Args::try_parse_from([
            "ingress-controller",
            "--default-backend-service=kube-system/default-http-backend",
            "--config-map=kube-system/ing-config",
            "--pod-name=ingress-0",
            "--pod-namespace=kube-system",
        ])
        .unwrap();

        assert_eq!(
            args.default_backend_service,
            ResourceId::new("kube-system", "default-http-backend")
        );
        assert_eq!(
            args.config_map,
            Some(ResourceId::new("kube-system", "ing-config"))
        );
        assert_eq!(args.ingress_class, "nghttpx");
        assert_eq!(args.default_tls_secret, None);
        assert_eq!(args.resync_period_secs, 30);
        assert_eq!(args.patch_timeout_ms, 5000);
        assert_eq!(args.watch_namespace, "");
    }

    #[test]
    fn rejects_malformed_references() {
        assert!(Args::try_parse_from([
            "ingress-controller",
            "--default-backend-service=default-http-backend",
            "--pod-name=ingress-0",
            "--pod-namespace=kube-system",
        ])
        .is_err());
    }
}
