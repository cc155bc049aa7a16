//! Runtime plumbing: startup protocol, the gRPC service, graceful shutdown.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use rand::Rng;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Mutex, Notify};
use tokio::task;
use tokio::time::sleep;
use tokio_stream::wrappers::TcpListenerStream;
use tonic::transport::Server;
use tonic::{Request, Response, Status};
use tracing::{info, warn};

use common::rpc::worker_server::{Worker, WorkerServer};
use common::rpc::{
    MapReply, MapRequest, ShuffleReply, ShuffleRequest, TerminateReply, TerminateRequest,
};
use common::Workload;

use crate::{map, reduce};

const RETRY_BACKOFF: Duration = Duration::from_secs(1);

/// How a worker process is started.
pub struct WorkerConfig {
    /// `host:port` of the coordinator's announcement listener.
    pub registry_addr: String,

    /// The host name this worker advertises; the coordinator dials it.
    pub advertise_host: String,

    pub workload: Workload,

    /// Application arguments, forwarded verbatim to every callback.
    pub aux: Vec<String>,

    /// Replay prior result shards instead of re-mapping, when present.
    pub load_previous: bool,
}

/// Identity and application state shared by every request.
pub struct WorkerContext {
    pub host: String,
    pub port: u16,
    pub workload: Workload,
    pub aux: Vec<String>,
    pub load_previous: bool,
}

struct WorkerService {
    ctx: Arc<WorkerContext>,

    // One unit at a time: the runtime never executes two units concurrently.
    busy: Mutex<()>,

    shutdown: Arc<Notify>,
}

#[tonic::async_trait]
impl Worker for WorkerService {
    async fn map(&self, request: Request<MapRequest>) -> Result<Response<MapReply>, Status> {
        let _serial = self.busy.lock().await;

        let ctx = Arc::clone(&self.ctx);
        let shard = request.into_inner().shard;
        let result = task::spawn_blocking(move || map::perform_map(&ctx, &shard))
            .await
            .map_err(|e| Status::internal(format!("map task died: {e}")))?;

        match result {
            Ok(Some((shard, prefixes))) => Ok(Response::new(MapReply {
                failed: false,
                shard,
                prefixes,
            })),
            Ok(None) => Ok(Response::new(MapReply {
                failed: true,
                shard: String::new(),
                prefixes: Vec::new(),
            })),
            Err(e) => Err(Status::internal(format!("map failed: {e:#}"))),
        }
    }

    async fn shuffle(
        &self,
        request: Request<ShuffleRequest>,
    ) -> Result<Response<ShuffleReply>, Status> {
        let _serial = self.busy.lock().await;

        let ctx = Arc::clone(&self.ctx);
        let request = request.into_inner();
        let result = task::spawn_blocking(move || {
            reduce::perform_shuffle(&ctx, &request.prefixes, &request.base_path, &request.shards)
        })
        .await
        .map_err(|e| Status::internal(format!("shuffle task died: {e}")))?;

        match result {
            Ok(shard) => Ok(Response::new(ShuffleReply { shard })),
            Err(e) => Err(Status::internal(format!("shuffle failed: {e:#}"))),
        }
    }

    async fn terminate(
        &self,
        _request: Request<TerminateRequest>,
    ) -> Result<Response<TerminateReply>, Status> {
        let _serial = self.busy.lock().await;

        info!("terminate received");
        self.shutdown.notify_one();
        Ok(Response::new(TerminateReply { ok: true }))
    }
}

/// Send one fire-and-forget membership announcement.
pub async fn announce(registry_addr: &str, host: &str, port: u16, up: bool) -> Result<()> {
    let mut stream = TcpStream::connect(registry_addr).await?;
    let direction = if up { "UP" } else { "DOWN" };
    stream
        .write_all(format!("{host} {port} {direction}\n").as_bytes())
        .await?;
    stream.shutdown().await?;
    Ok(())
}

/// Startup protocol: pick a random high port, announce UP, then try to bind
/// the RPC listener on it; on failure pick a new port and retry after a
/// fixed backoff. No central port allocator, at the cost of occasional
/// collisions.
async fn announce_and_bind(config: &WorkerConfig) -> Result<(TcpListener, u16)> {
    loop {
        let port = rand::thread_rng().gen_range(40_000..60_000);
        info!(
            "{}:{port} notifying {} of startup",
            config.advertise_host, config.registry_addr
        );

        if let Err(e) = announce(&config.registry_addr, &config.advertise_host, port, true).await {
            warn!("could not reach registry at {}: {e:#}", config.registry_addr);
            sleep(RETRY_BACKOFF).await;
            continue;
        }

        match TcpListener::bind(("0.0.0.0", port)).await {
            Ok(listener) => return Ok((listener, port)),
            Err(e) => {
                warn!("could not bind port {port}: {e}");
                sleep(RETRY_BACKOFF).await;
            }
        }
    }
}

/// Serve one generation's work, until the coordinator says terminate.
pub async fn run(config: WorkerConfig) -> Result<()> {
    let shutdown = Arc::new(Notify::new());
    let (listener, port) = announce_and_bind(&config).await?;

    let ctx = Arc::new(WorkerContext {
        host: config.advertise_host.clone(),
        port,
        workload: config.workload,
        aux: config.aux.clone(),
        load_previous: config.load_previous,
    });
    let service = WorkerService {
        ctx,
        busy: Mutex::new(()),
        shutdown: Arc::clone(&shutdown),
    };

    info!("worker serving on port {port}");

    let signal = Arc::clone(&shutdown);
    Server::builder()
        .add_service(WorkerServer::new(service))
        .serve_with_incoming_shutdown(TcpListenerStream::new(listener), async move {
            signal.notified().await
        })
        .await?;

    if let Err(e) = announce(&config.registry_addr, &config.advertise_host, port, false).await {
        warn!("could not announce DOWN: {e:#}");
    }
    info!("worker exited");
    Ok(())
}
