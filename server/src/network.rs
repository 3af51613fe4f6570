//! Server network layer: the UDP socket tasks and the heartbeat loop

use crate::auth::AuthServer;
use crate::config::ServerConfig;
use crate::console::{process_line, ConsoleFlow};
use log::{debug, error, info, trace};
use shared::packets::MAX_PACKET_SIZE;
use shared::Packet;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::time::interval;

/// Messages sent from network and console tasks to the main server loop
#[derive(Debug)]
pub enum ServerMessage {
    PacketReceived { packet: Packet, addr: SocketAddr },
    ConsoleLine(String),
    Shutdown,
}

/// Replies queued by the main loop for the sender task
#[derive(Debug)]
struct OutboundPacket {
    packet: Packet,
    addr: SocketAddr,
}

/// Authentication server bound to a UDP socket
pub struct Server {
    socket: Arc<UdpSocket>,
    auth: AuthServer,
    tick_duration: Duration,

    server_tx: mpsc::UnboundedSender<ServerMessage>,
    server_rx: mpsc::UnboundedReceiver<ServerMessage>,
    outbound_tx: mpsc::UnboundedSender<OutboundPacket>,
    outbound_rx: Option<mpsc::UnboundedReceiver<OutboundPacket>>,
}

impl Server {
    pub async fn new(
        config: &ServerConfig,
        auth: AuthServer,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let socket = Arc::new(UdpSocket::bind(config.address()).await?);
        info!("Server listening on {}", socket.local_addr()?);

        let (server_tx, server_rx) = mpsc::unbounded_channel();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();

        Ok(Server {
            socket,
            auth,
            tick_duration: Duration::from_secs_f64(1.0 / f64::from(config.tick_rate.max(1))),
            server_tx,
            server_rx,
            outbound_tx,
            outbound_rx: Some(outbound_rx),
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    pub fn auth(&self) -> &AuthServer {
        &self.auth
    }

    /// Channel into the main loop, for console input and shutdown.
    pub fn sender(&self) -> mpsc::UnboundedSender<ServerMessage> {
        self.server_tx.clone()
    }

    /// Spawns task that continuously listens for incoming packets
    fn spawn_network_receiver(&self) {
        let socket = Arc::clone(&self.socket);
        let server_tx = self.server_tx.clone();

        tokio::spawn(async move {
            let mut buffer = vec![0u8; MAX_PACKET_SIZE as usize];

            loop {
                match socket.recv_from(&mut buffer).await {
                    Ok((len, addr)) => {
                        let packet = Packet::from_bytes(buffer[..len].to_vec());
                        if let Err(e) = server_tx.send(ServerMessage::PacketReceived { packet, addr })
                        {
                            debug!("Main loop gone, stopping receiver: {}", e);
                            break;
                        }
                    }
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
        let Some(mut outbound_rx) = self.outbound_rx.take() else {
            return;
        };
        let socket = Arc::clone(&self.socket);

        tokio::spawn(async move {
            while let Some(OutboundPacket { packet, addr }) = outbound_rx.recv().await {
                if let Err(e) = socket.send_to(packet.as_bytes(), addr).await {
                    error!("Failed to send packet to {}: {}", addr, e);
                }
            }
        });
    }

    fn handle_packet(&mut self, packet: Packet, addr: SocketAddr) {
        trace!("{} bytes from {}", packet.len(), addr);
        if let Some(reply) = self.auth.handle_packet(addr, &packet) {
            if let Err(e) = self.outbound_tx.send(OutboundPacket {
                packet: reply,
                addr,
            }) {
                error!("Failed to queue reply for {}: {}", addr, e);
            }
        }
    }

    /// Runs one console command. Returns true when the server should exit.
    fn handle_console_line(&mut self, line: &str) -> bool {
        let response = process_line(&mut self.auth, line);
        if response.flow == ConsoleFlow::Clear {
            // ANSI clear screen and home cursor
            print!("\x1B[2J\x1B[1;1H");
        }
        response.flow == ConsoleFlow::Exit
    }

    /// Main server loop: answers packets and console lines as they arrive
    /// and flushes deferred saves on every tick
    pub async fn run(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        self.spawn_network_receiver();
        self.spawn_network_sender();

        let mut tick_interval = interval(self.tick_duration);
        info!("Server started successfully");

        loop {
            tokio::select! {
                message = self.server_rx.recv() => {
                    match message {
                        Some(ServerMessage::PacketReceived { packet, addr }) => {
                            self.handle_packet(packet, addr);
                        },
                        Some(ServerMessage::ConsoleLine(line)) => {
                            if self.handle_console_line(&line) {
                                info!("Server shutting down");
                                break;
                            }
                        },
                        Some(ServerMessage::Shutdown) | None => {
                            info!("Server shutting down");
                            break;
                        }
                    }
                },

                _ = tick_interval.tick() => {
                    self.auth.end_tick();
                },
            }
        }

        Ok(())
    }
}
