use crate::error::ClientError;
use crate::retry::RetryPolicy;
use bincode::{deserialize, serialize};
use log::{debug, info, warn};
use shared::{
    Packet, TelemetryReport, ThrottleSnapshot, Tier, MAX_DATAGRAM_SIZE, PROTOCOL_VERSION,
};
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tokio::net::UdpSocket;
use tokio::time::{sleep, timeout_at};

/// How a successful login got through the gate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginOutcome {
    Accepted,
    AcceptedAfterQueue { tier: Tier, waited: Duration },
}

pub struct LoginClient {
    socket: UdpSocket,
    server_addr: SocketAddr,
    buffer: Vec<u8>,
}

impl LoginClient {
    pub async fn connect(server_addr: &str) -> Result<Self, ClientError> {
        let server_addr: SocketAddr = server_addr.parse()?;
        let bind_addr = if server_addr.is_ipv4() {
            "0.0.0.0:0"
        } else {
            "[::]:0"
        };
        let socket = UdpSocket::bind(bind_addr).await?;

        Ok(LoginClient {
            socket,
            server_addr,
            buffer: vec![0u8; MAX_DATAGRAM_SIZE],
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ClientError> {
        Ok(self.socket.local_addr()?)
    }

    pub fn server_addr(&self) -> SocketAddr {
        self.server_addr
    }

    async fn send_packet(&self, packet: &Packet) -> Result<(), ClientError> {
        let data = serialize(packet)?;
        self.socket.send_to(&data, self.server_addr).await?;
        Ok(())
    }

    /// Next packet from the gate, or `None` once `deadline` passes.
    async fn recv_until(&mut self, deadline: Instant) -> Result<Option<Packet>, ClientError> {
        loop {
            let received =
                match timeout_at(deadline.into(), self.socket.recv_from(&mut self.buffer)).await {
                    Ok(result) => result?,
                    Err(_) => return Ok(None),
                };
            let (len, addr) = received;

            if addr != self.server_addr {
                debug!("Ignoring datagram from {}", addr);
                continue;
            }

            match deserialize::<Packet>(&self.buffer[..len]) {
                Ok(packet) => return Ok(Some(packet)),
                Err(e) => warn!("Failed to deserialize packet from gate: {}", e),
            }
        }
    }

    /// Asks the gate to let `user_id` in and waits up to `wait` for the
    /// answer, staying on the line while queued.
    pub async fn login(&mut self, user_id: &str, wait: Duration) -> Result<LoginOutcome, ClientError> {
        let started = Instant::now();
        let deadline = started + wait;
        let mut queued_in = None;

        self.send_packet(&Packet::Login {
            client_version: PROTOCOL_VERSION,
            user_id: user_id.to_string(),
        })
        .await?;

        loop {
            let Some(packet) = self.recv_until(deadline).await? else {
                return Err(ClientError::Timeout {
                    user_id: user_id.to_string(),
                });
            };

            match packet {
                Packet::LoginAccepted { user_id: accepted } if accepted == user_id => {
                    return Ok(match queued_in {
                        Some(tier) => LoginOutcome::AcceptedAfterQueue {
                            tier,
                            waited: started.elapsed(),
                        },
                        None => LoginOutcome::Accepted,
                    });
                }
                Packet::Queued {
                    user_id: queued,
                    tier,
                } if queued == user_id => {
                    info!("{} queued in {} tier", user_id, tier);
                    queued_in = Some(tier);
                }
                Packet::Rejected {
                    user_id: rejected,
                    reason,
                } if rejected == user_id => {
                    return Err(ClientError::Rejected { reason });
                }
                other => debug!("Ignoring packet while logging in: {:?}", other),
            }
        }
    }

    /// [`login`](Self::login) repeated on timeouts and I/O errors, sleeping
    /// per `policy` between attempts.
    pub async fn login_with_retry(
        &mut self,
        user_id: &str,
        wait: Duration,
        policy: &RetryPolicy,
    ) -> Result<LoginOutcome, ClientError> {
        let attempts = policy.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            match self.login(user_id, wait).await {
                Err(e) if e.is_retryable() && attempt + 1 < attempts => {
                    let delay = policy.delay_for(attempt);
                    warn!(
                        "Login attempt {} for {} failed ({}), retrying in {:?}",
                        attempt + 1,
                        user_id,
                        e,
                        delay
                    );
                    sleep(delay).await;
                    attempt += 1;
                }
                result => return result,
            }
        }
    }

    pub async fn report(&self, report: TelemetryReport) -> Result<(), ClientError> {
        self.send_packet(&Packet::Telemetry { report }).await
    }

    /// Reports the lobby's current connected-client count.
    pub async fn report_telemetry(&self, total: i64) -> Result<(), ClientError> {
        self.report(TelemetryReport::with_total(total)).await
    }

    pub async fn cancel(&self, user_id: &str) -> Result<(), ClientError> {
        self.send_packet(&Packet::Cancel {
            user_id: user_id.to_string(),
        })
        .await
    }

    pub async fn snapshot(&mut self, wait: Duration) -> Result<ThrottleSnapshot, ClientError> {
        let deadline = Instant::now() + wait;
        self.send_packet(&Packet::SnapshotRequest).await?;

        loop {
            match self.recv_until(deadline).await? {
                Some(Packet::Snapshot { snapshot }) => return Ok(snapshot),
                Some(other) => debug!("Ignoring packet while waiting for snapshot: {:?}", other),
                None => {
                    return Err(ClientError::Timeout {
                        user_id: String::new(),
                    })
                }
            }
        }
    }
}
