//! UDP front-end exposing the throttle to the connection-accept path

use crate::error::NetworkError;
use crate::notify::{AcceptedEvent, NotificationHandle};
use crate::throttle::{Admission, LoginThrottle};
use bincode::{deserialize, serialize, serialized_size};
use log::{debug, error, info, warn};
use shared::{Packet, TelemetryReport, ThrottleSnapshot, MAX_DATAGRAM_SIZE, PROTOCOL_VERSION};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;

/// Messages sent from network tasks to the main server loop
#[derive(Debug)]
pub enum ServerMessage {
    PacketReceived { packet: Packet, addr: SocketAddr },
    Shutdown,
}

/// Bytes reserved for the `Packet` envelope around a snapshot.
const SNAPSHOT_ENVELOPE: usize = 16;

/// Messages queued for the sender task
#[derive(Debug)]
pub enum OutboundMessage {
    SendPacket { packet: Packet, addr: SocketAddr },
}

pub struct Server {
    socket: Arc<UdpSocket>,
    throttle: Arc<LoginThrottle>,

    server_tx: mpsc::UnboundedSender<ServerMessage>,
    server_rx: mpsc::UnboundedReceiver<ServerMessage>,
    outbound_tx: mpsc::UnboundedSender<OutboundMessage>,
    outbound_rx: Option<mpsc::UnboundedReceiver<OutboundMessage>>,
    telemetry_tx: mpsc::UnboundedSender<TelemetryReport>,
    telemetry_rx: Option<mpsc::UnboundedReceiver<TelemetryReport>>,
}

impl Server {
    pub async fn bind(addr: &str, throttle: Arc<LoginThrottle>) -> Result<Self, NetworkError> {
        let socket = Arc::new(UdpSocket::bind(addr).await?);
        info!("Login gate listening on {}", socket.local_addr()?);

        let (server_tx, server_rx) = mpsc::unbounded_channel();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (telemetry_tx, telemetry_rx) = mpsc::unbounded_channel();

        Ok(Server {
            socket,
            throttle,
            server_tx,
            server_rx,
            outbound_tx,
            outbound_rx: Some(outbound_rx),
            telemetry_tx,
            telemetry_rx: Some(telemetry_rx),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, NetworkError> {
        Ok(self.socket.local_addr()?)
    }

    /// Sender that stops [`run`](Self::run) when given `ServerMessage::Shutdown`.
    pub fn control_handle(&self) -> mpsc::UnboundedSender<ServerMessage> {
        self.server_tx.clone()
    }

    /// Spawns task that continuously listens for incoming packets
    fn spawn_network_receiver(&self) {
        let socket = Arc::clone(&self.socket);
        let server_tx = self.server_tx.clone();

        tokio::spawn(async move {
            let mut buffer = vec![0u8; MAX_DATAGRAM_SIZE];

            loop {
                match socket.recv_from(&mut buffer).await {
                    Ok((len, addr)) => match deserialize::<Packet>(&buffer[..len]) {
                        Ok(packet) => {
                            if server_tx
                                .send(ServerMessage::PacketReceived { packet, addr })
                                .is_err()
                            {
                                break;
                            }
                        }
                        Err(e) => warn!("Failed to deserialize packet from {}: {}", addr, e),
                    },
                    Err(e) => {
                        error!("Error receiving packet: {}", e);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    }
                }
            }
        });
    }

    /// Spawns task that drains the outgoing packet queue
    fn spawn_network_sender(&mut self) {
        let socket = Arc::clone(&self.socket);
        let Some(mut outbound_rx) = self.outbound_rx.take() else {
            return;
        };

        tokio::spawn(async move {
            while let Some(message) = outbound_rx.recv().await {
                match message {
                    OutboundMessage::SendPacket { packet, addr } => {
                        if let Err(e) = Self::send_packet_impl(&socket, &packet, addr).await {
                            error!("Failed to send packet to {}: {}", addr, e);
                        }
                    }
                }
            }
        });
    }

    /// Spawns task that applies telemetry reports in arrival order.
    ///
    /// Reading the limit may touch the disk, so it runs on the blocking pool
    /// and never delays login handling in the main loop.
    fn spawn_telemetry_applier(&mut self) {
        let throttle = Arc::clone(&self.throttle);
        let Some(mut telemetry_rx) = self.telemetry_rx.take() else {
            return;
        };

        tokio::spawn(async move {
            while let Some(report) = telemetry_rx.recv().await {
                let Some(sample) = LoginThrottle::validate_report(&report) else {
                    continue;
                };
                let source = throttle.limit_source();
                match tokio::task::spawn_blocking(move || source.current_limit()).await {
                    Ok(limit) => {
                        throttle.apply_sample(sample, limit);
                    }
                    Err(e) => error!("Limit lookup failed, report dropped: {}", e),
                }
            }
        });
    }

    async fn send_packet_impl(
        socket: &UdpSocket,
        packet: &Packet,
        addr: SocketAddr,
    ) -> Result<(), NetworkError> {
        let data = serialize(packet)?;
        socket.send_to(&data, addr).await?;
        Ok(())
    }

    fn send_packet(&self, packet: Packet, addr: SocketAddr) {
        if let Err(e) = self
            .outbound_tx
            .send(OutboundMessage::SendPacket { packet, addr })
        {
            error!("Failed to queue packet for sending: {}", e);
        }
    }

    fn handle_packet(&self, packet: Packet, addr: SocketAddr) {
        match packet {
            Packet::Login {
                client_version,
                user_id,
            } => self.handle_login(client_version, user_id, addr),

            Packet::Telemetry { report } => {
                if self.telemetry_tx.send(report).is_err() {
                    debug!("Telemetry from {} dropped, applier stopped", addr);
                }
            }

            Packet::Cancel { user_id } => {
                self.throttle.cancel(&user_id);
            }

            Packet::SnapshotRequest => {
                let snapshot = fit_snapshot(self.throttle.snapshot());
                self.send_packet(Packet::Snapshot { snapshot }, addr);
            }

            _ => {
                warn!("Unexpected packet type from {}", addr);
            }
        }
    }

    fn handle_login(&self, client_version: u32, user_id: String, addr: SocketAddr) {
        if client_version != PROTOCOL_VERSION {
            let reason = format!(
                "Protocol version mismatch (server {}, client {})",
                PROTOCOL_VERSION, client_version
            );
            self.send_packet(Packet::Rejected { user_id, reason }, addr);
            return;
        }
        if user_id.is_empty() {
            let reason = "Missing user id".to_string();
            self.send_packet(Packet::Rejected { user_id, reason }, addr);
            return;
        }

        let (handle, accepted_rx) = NotificationHandle::channel();
        match self.throttle.admit(handle, &user_id) {
            Admission::Admitted { tier } => {
                info!("Login accepted for {} ({}) from {}", user_id, tier, addr);
                self.send_packet(Packet::LoginAccepted { user_id }, addr);
            }
            Admission::Queued { tier } => {
                info!("Login for {} from {} queued in {}", user_id, addr, tier);
                self.send_packet(Packet::Queued { user_id, tier }, addr);
                self.spawn_acceptance_forwarder(accepted_rx, addr);
            }
        }
    }

    /// Waits for the throttle's accepted event and relays it to `addr`.
    ///
    /// The task ends without sending if the waiter is cancelled or replaced,
    /// because the throttle then drops its handle.
    fn spawn_acceptance_forwarder(
        &self,
        mut accepted_rx: mpsc::UnboundedReceiver<AcceptedEvent>,
        addr: SocketAddr,
    ) {
        let outbound_tx = self.outbound_tx.clone();

        tokio::spawn(async move {
            if let Some(AcceptedEvent { user_id }) = accepted_rx.recv().await {
                let packet = Packet::LoginAccepted { user_id };
                if outbound_tx
                    .send(OutboundMessage::SendPacket { packet, addr })
                    .is_err()
                {
                    debug!("Server stopped before acceptance for {} was sent", addr);
                }
            }
        });
    }

    /// Main loop: dispatches packets until shut down
    pub async fn run(mut self) -> Result<(), NetworkError> {
        self.spawn_network_receiver();
        self.spawn_network_sender();
        self.spawn_telemetry_applier();

        info!("Login gate started");

        while let Some(message) = self.server_rx.recv().await {
            match message {
                ServerMessage::PacketReceived { packet, addr } => {
                    self.handle_packet(packet, addr);
                }
                ServerMessage::Shutdown => {
                    info!("Login gate shutting down");
                    break;
                }
            }
        }

        Ok(())
    }
}

/// Shortens the snapshot's lists until it fits in one datagram.
fn fit_snapshot(mut snapshot: ThrottleSnapshot) -> ThrottleSnapshot {
    let budget = (MAX_DATAGRAM_SIZE - SNAPSHOT_ENVELOPE) as u64;
    let mut per_list = snapshot
        .queues
        .values()
        .map(Vec::len)
        .chain(std::iter::once(snapshot.awaiting_release.len()))
        .max()
        .unwrap_or(0);

    while per_list > 0 {
        match serialized_size(&snapshot) {
            Ok(size) if size <= budget => break,
            Ok(_) => {
                per_list /= 2;
                snapshot.truncate(per_list);
            }
            Err(e) => {
                warn!("Failed to size snapshot: {}", e);
                break;
            }
        }
    }

    if snapshot.truncated {
        debug!("Snapshot truncated to {} ids per list", per_list);
    }
    snapshot
}
