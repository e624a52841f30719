//! The streaming RPC surface: each `Sniff` call becomes a hub subscription
//! whose frames are filtered and forwarded until the client goes away.

use std::sync::Arc;

use pcap::{BpfProgram, Capture, Linktype};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tonic::{Request, Response, Status};
use tracing::debug;

use bumsniff_core::hub::{BumFrame, Hub};

use crate::proto;
use crate::proto::bum_sniff_service_server::BumSniffService;

pub struct SniffService {
    hub: Arc<Hub>,
}

impl SniffService {
    pub fn new(hub: Arc<Hub>) -> Self {
        Self { hub }
    }
}

/// A compiled BPF predicate over inner Ethernet frames.
///
/// The compiled program is a plain instruction buffer; libpcap does not tie
/// it to the thread that compiled it.
struct SessionFilter(BpfProgram);

unsafe impl Send for SessionFilter {}

impl SessionFilter {
    fn compile(filter: &str) -> Result<Self, pcap::Error> {
        let cap = Capture::dead(Linktype::ETHERNET)?;
        Ok(SessionFilter(cap.compile(filter, true)?))
    }

    fn matches(&self, data: &[u8]) -> bool {
        self.0.filter(data)
    }
}

#[tonic::async_trait]
impl BumSniffService for SniffService {
    type SniffStream = ReceiverStream<Result<proto::Packet, Status>>;

    async fn sniff(
        &self,
        request: Request<proto::Request>,
    ) -> Result<Response<Self::SniffStream>, Status> {
        let req = request.into_inner();

        let bpf = if req.filter.is_empty() {
            None
        } else {
            let program = SessionFilter::compile(&req.filter).map_err(|err| {
                Status::invalid_argument(format!("invalid BPF filter {:?}: {}", req.filter, err))
            })?;
            Some(program)
        };

        let (id, rx) = self.hub.subscribe();
        // Capacity 1 keeps teardown after a cancel bounded by one in-flight
        // packet.
        let (tx, out) = mpsc::channel(1);
        tokio::spawn(session(self.hub.clone(), id, rx, tx, req.domain, bpf));

        Ok(Response::new(ReceiverStream::new(out)))
    }
}

/// Per-subscriber loop: apply the session filters and forward matching
/// frames until the hub closes the subscription or the client goes away.
async fn session(
    hub: Arc<Hub>,
    id: String,
    mut rx: mpsc::Receiver<Arc<BumFrame>>,
    tx: mpsc::Sender<Result<proto::Packet, Status>>,
    domain: String,
    bpf: Option<SessionFilter>,
) {
    while let Some(frame) = rx.recv().await {
        if !domain.is_empty() && domain != frame.domain {
            continue;
        }
        if let Some(bpf) = &bpf {
            if !bpf.matches(&frame.data) {
                continue;
            }
        }
        if tx.send(Ok(to_packet(&frame))).await.is_err() {
            debug!(id = %id, "stop sending packets to the stream");
            break;
        }
    }
    hub.unsubscribe(&id);
}

fn to_packet(frame: &BumFrame) -> proto::Packet {
    proto::Packet {
        data: frame.data.clone(),
        label: frame.label,
        remote: frame.remote.clone(),
        domain: frame.domain.clone(),
        timestamp: Some(frame.timestamp.into()),
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, SystemTime};

    use bytes::Bytes;
    use tokio_stream::StreamExt;

    use super::*;

    fn ether_frame(ethertype: u16) -> Bytes {
        let mut data = vec![
            0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff, // destination
            0x11, 0x22, 0x33, 0x44, 0x55, 0x66, // source
        ];
        data.extend_from_slice(&ethertype.to_be_bytes());
        data.extend_from_slice(&[0u8; 46]);
        Bytes::from(data)
    }

    fn frame(label: u32, domain: &str, ethertype: u16) -> Arc<BumFrame> {
        Arc::new(BumFrame {
            data: ether_frame(ethertype),
            label,
            domain: domain.to_string(),
            remote: "pe1".to_string(),
            timestamp: SystemTime::UNIX_EPOCH + Duration::from_secs(1),
        })
    }

    fn sniff_request(filter: &str, domain: &str) -> Request<proto::Request> {
        Request::new(proto::Request {
            filter: filter.to_string(),
            domain: domain.to_string(),
        })
    }

    #[tokio::test]
    async fn test_sniff_round_trip() {
        let hub = Arc::new(Hub::new());
        let service = SniffService::new(hub.clone());

        let response = service.sniff(sniff_request("", "")).await.unwrap();
        let mut stream = response.into_inner();

        hub.publish(frame(100, "blue", 0x0800));
        let packet = stream.next().await.unwrap().unwrap();
        assert_eq!(100, packet.label);
        assert_eq!("blue", packet.domain);
        assert_eq!("pe1", packet.remote);
        assert_eq!(ether_frame(0x0800), packet.data);
        assert_eq!(
            Some(prost_types::Timestamp {
                seconds: 1,
                nanos: 0
            }),
            packet.timestamp
        );

        // Closing the hub ends the stream.
        hub.close();
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_domain_filter() {
        let hub = Arc::new(Hub::new());
        let service = SniffService::new(hub.clone());

        let response = service.sniff(sniff_request("", "green")).await.unwrap();
        let mut stream = response.into_inner();

        hub.publish(frame(100, "blue", 0x0800));
        hub.publish(frame(200, "green", 0x0800));
        hub.close();

        let packet = stream.next().await.unwrap().unwrap();
        assert_eq!("green", packet.domain);
        assert_eq!(200, packet.label);
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_bpf_filter() {
        let hub = Arc::new(Hub::new());
        let service = SniffService::new(hub.clone());

        let response = service.sniff(sniff_request("arp", "")).await.unwrap();
        let mut stream = response.into_inner();

        hub.publish(frame(100, "blue", 0x0800));
        hub.publish(frame(200, "blue", 0x0806));
        hub.close();

        let packet = stream.next().await.unwrap().unwrap();
        assert_eq!(200, packet.label);
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_invalid_bpf_filter_is_rejected() {
        let hub = Arc::new(Hub::new());
        let service = SniffService::new(hub.clone());

        let status = service.sniff(sniff_request("((", "")).await.unwrap_err();
        assert_eq!(tonic::Code::InvalidArgument, status.code());
        assert!(hub.is_empty());
    }

    #[tokio::test]
    async fn test_client_disconnect_unsubscribes() {
        let hub = Arc::new(Hub::new());
        let service = SniffService::new(hub.clone());

        let response = service.sniff(sniff_request("", "")).await.unwrap();
        let stream = response.into_inner();
        assert_eq!(1, hub.len());

        // The session notices the dropped stream on its next forward.
        drop(stream);
        hub.publish(frame(100, "blue", 0x0800));

        tokio::time::timeout(Duration::from_secs(1), async {
            while !hub.is_empty() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
    }
}
