//! Server bootstrap: wire the label cache, the Redis resolver, the hub, the
//! capture pipeline and the gRPC listener together, then supervise them
//! until shutdown.

mod capture;
mod proto;
mod resolver;
mod service;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{ArgGroup, Parser};
use tokio::signal;
use tokio::sync::watch;
use tonic::transport::Server;
use tracing::info;
use tracing_subscriber::EnvFilter;

use bumsniff_core::cache::TtlCache;
use bumsniff_core::hub::Hub;

use crate::capture::CaptureSource;
use crate::proto::bum_sniff_service_server::BumSniffServiceServer;
use crate::resolver::RedisLabelResolver;
use crate::service::SniffService;

/// Cadence of server-side HTTP/2 keepalive pings, bounding how long a dead
/// client can hold a session open.
const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(5);
const KEEPALIVE_TIMEOUT: Duration = Duration::from_secs(20);

#[derive(Debug, Parser)]
#[command(about = "Stream decoded VPLS BUM traffic to gRPC subscribers", version)]
#[command(group(ArgGroup::new("source").required(true).args(["interface", "read_file"])))]
struct Opt {
    /// Address for the gRPC listener.
    #[arg(short = 'a', long = "addr", default_value = "127.0.0.1:50005")]
    addr: SocketAddr,

    /// Read packets from a live interface.
    #[arg(short = 'i', long = "interface", value_name = "INTERFACE")]
    interface: Option<String>,

    /// Read packets from a pcap savefile.
    #[arg(short = 'r', long = "read", value_name = "FILE")]
    read_file: Option<PathBuf>,

    /// URL of the Redis label store.
    #[arg(long = "redis-url", env = "REDIS_URL", default_value = "redis://localhost:6379")]
    redis_url: String,

    /// Lifetime in seconds of cached label context.
    #[arg(long = "cache-ttl", value_name = "SECONDS", default_value_t = 300)]
    cache_ttl: u64,
}

impl Opt {
    fn capture_source(&self) -> CaptureSource {
        match (&self.interface, &self.read_file) {
            (Some(name), _) => CaptureSource::Interface(name.clone()),
            (_, Some(path)) => CaptureSource::File(path.clone()),
            // clap requires exactly one member of the source group.
            _ => unreachable!("no capture source"),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    run(Opt::parse()).await
}

async fn run(opt: Opt) -> anyhow::Result<()> {
    let cache = TtlCache::new(Some(Duration::from_secs(opt.cache_ttl)));
    let resolver = RedisLabelResolver::new(&opt.redis_url, Arc::downgrade(&cache))
        .with_context(|| format!("invalid Redis URL {:?}", opt.redis_url))?;
    cache.set_resolver(resolver);

    let hub = Arc::new(Hub::new());

    let cap = capture::open(&opt.capture_source()).context("could not open the capture handle")?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let mut ingest = {
        let cache = cache.clone();
        let hub = hub.clone();
        tokio::spawn(async move {
            info!("start BUM sniffer");
            let result = capture::run(cap, cache, hub.clone()).await;
            // End of ingest ends every subscriber stream.
            hub.close();
            result
        })
    };

    let addr = opt.addr;
    let mut server = {
        let hub = hub.clone();
        let mut shutdown_rx = shutdown_rx.clone();
        tokio::spawn(async move {
            info!(%addr, "start gRPC server");
            Server::builder()
                .http2_keepalive_interval(Some(KEEPALIVE_INTERVAL))
                .http2_keepalive_timeout(Some(KEEPALIVE_TIMEOUT))
                .tcp_keepalive(Some(KEEPALIVE_INTERVAL))
                .add_service(BumSniffServiceServer::new(SniffService::new(hub)))
                .serve_with_shutdown(addr, async move {
                    let _ = shutdown_rx.wait_for(|stop| *stop).await;
                })
                .await
        })
    };

    let outcome: anyhow::Result<()> = tokio::select! {
        res = &mut ingest => match res.context("ingest task panicked")? {
            Ok(()) => {
                info!("capture finished, shutting down");
                Ok(())
            }
            Err(err) => Err(err).context("capture failed"),
        },
        res = &mut server => match res.context("server task panicked")? {
            Ok(()) => Err(anyhow::anyhow!("gRPC server stopped unexpectedly")),
            Err(err) => Err(err).context("failed to serve gRPC"),
        },
        _ = signal::ctrl_c() => {
            info!("interrupt received, shutting down");
            Ok(())
        }
    };

    // Stop the listener and end every session; a graceful drain would
    // otherwise wait on idle streams forever.
    let _ = shutdown_tx.send(true);
    hub.close();
    if !server.is_finished() {
        let drained = server.await.context("server task panicked")?;
        if outcome.is_ok() {
            drained.context("failed to serve gRPC")?;
        }
    }
    ingest.abort();

    outcome
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::Opt;

    #[test]
    fn test_opt_requires_exactly_one_source() {
        assert!(Opt::try_parse_from(["bumsniff-server", "-i", "eth0"]).is_ok());
        assert!(Opt::try_parse_from(["bumsniff-server", "-r", "dump.pcap"]).is_ok());
        assert!(Opt::try_parse_from(["bumsniff-server"]).is_err());
        assert!(Opt::try_parse_from(["bumsniff-server", "-i", "eth0", "-r", "dump.pcap"]).is_err());
    }

    #[test]
    fn test_opt_defaults() {
        let opt = Opt::try_parse_from(["bumsniff-server", "-i", "eth0"]).unwrap();
        assert_eq!("127.0.0.1:50005".parse::<std::net::SocketAddr>().unwrap(), opt.addr);
        assert_eq!(300, opt.cache_ttl);
    }
}
