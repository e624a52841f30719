//! Packet ingest: a capture thread reads, decodes and copies frames off the
//! wire, and an async enrich stage attaches label context before handing
//! them to the hub.

use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use pcap::{Activated, Capture};
use tokio::sync::mpsc;
use tracing::{debug, info};

use bumsniff_core::hub::{BumFrame, Hub};
use bumsniff_core::l2vpn::VplsFrame;
use bumsniff_core::label::LabelCache;

/// Snap length for live captures.
pub const SNAPSHOT_LEN: i32 = 65536;

/// Capacity of the bridge between the capture thread and the enrich stage.
const BRIDGE_CAPACITY: usize = 1000;

/// Where frames come from.
#[derive(Debug, Clone)]
pub enum CaptureSource {
    /// Live capture on the named interface.
    Interface(String),
    /// Offline replay of a pcap savefile.
    File(PathBuf),
}

/// A decoded frame copied out of the capture buffer, before label lookup.
struct CapturedFrame {
    data: Bytes,
    label: u32,
    timestamp: SystemTime,
}

/// Open a capture handle for the configured source.
pub fn open(source: &CaptureSource) -> Result<Capture<dyn Activated>, pcap::Error> {
    match source {
        CaptureSource::Interface(name) => {
            let cap = Capture::from_device(name.as_str())?
                .snaplen(SNAPSHOT_LEN)
                .promisc(true)
                .open()?;
            Ok(cap.into())
        }
        CaptureSource::File(path) => Ok(Capture::from_file(path)?.into()),
    }
}

/// Run the ingest pipeline to completion: spawn the capture thread and drive
/// the enrich stage. Returns once the capture ends; an error is fatal for
/// the process.
pub async fn run(
    cap: Capture<dyn Activated>,
    cache: Arc<LabelCache>,
    hub: Arc<Hub>,
) -> Result<(), pcap::Error> {
    let (tx, rx) = mpsc::channel(BRIDGE_CAPACITY);
    thread::spawn(move || read_loop(cap, tx));
    enrich_loop(rx, cache, hub).await
}

/// Blocking read/decode loop. Runs on its own thread: a libpcap read may
/// block indefinitely and must not occupy the async runtime.
fn read_loop(
    mut cap: Capture<dyn Activated>,
    tx: mpsc::Sender<Result<CapturedFrame, pcap::Error>>,
) {
    loop {
        match cap.next_packet() {
            Ok(packet) => {
                let frame = match VplsFrame::decode(packet.data) {
                    Ok(frame) => frame,
                    // Not VPLS BUM traffic; skip it silently.
                    Err(_) => continue,
                };
                let captured = CapturedFrame {
                    // The capture buffer is reused on the next read; the
                    // inner frame has to be copied out before we move on.
                    data: Bytes::copy_from_slice(frame.inner),
                    label: frame.label(),
                    timestamp: packet_time(packet.header),
                };
                if tx.blocking_send(Ok(captured)).is_err() {
                    // The enrich stage is gone; stop reading.
                    return;
                }
            }
            Err(pcap::Error::NoMorePackets) => {
                info!("capture reached end of stream");
                return;
            }
            Err(pcap::Error::TimeoutExpired) => continue,
            Err(err) => {
                let _ = tx.blocking_send(Err(err));
                return;
            }
        }
    }
}

/// Attach label context and publish. Frames whose label resolves to nothing
/// are dropped.
async fn enrich_loop(
    mut rx: mpsc::Receiver<Result<CapturedFrame, pcap::Error>>,
    cache: Arc<LabelCache>,
    hub: Arc<Hub>,
) -> Result<(), pcap::Error> {
    while let Some(next) = rx.recv().await {
        let captured = next?;
        let context = match cache.get(&captured.label).await {
            Some(context) => context,
            None => {
                debug!(label = captured.label, "no context for label, dropping frame");
                continue;
            }
        };
        hub.publish(Arc::new(BumFrame {
            data: captured.data,
            label: captured.label,
            domain: context.domain,
            remote: context.remote,
            timestamp: captured.timestamp,
        }));
    }
    Ok(())
}

fn packet_time(header: &pcap::PacketHeader) -> SystemTime {
    UNIX_EPOCH + Duration::new(header.ts.tv_sec as u64, header.ts.tv_usec as u32 * 1_000)
}
