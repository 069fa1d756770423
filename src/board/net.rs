//! WiFi station and TCP/TLS transport
//!
//! Plain HTTP goes straight over an embassy-net `TcpSocket`; HTTPS wraps the
//! socket in embedded-tls. Socket and TLS buffers are owned by the
//! [`TcpConnector`] and lent to one connection at a time.

use alloc::boxed::Box;
use alloc::string::String;

use embassy_net::dns::DnsQueryType;
use embassy_net::tcp::TcpSocket;
use embassy_net::{IpAddress, Stack};
use embassy_time::Duration;
use embedded_io::{Error as _, ErrorKind};
use embedded_io_async::{ErrorType, Read, Write};
use embedded_tls::{Aes128GcmSha256, TlsConfig, TlsConnection, TlsContext, UnsecureProvider};
use esp_hal::rng::Rng;
use esp_radio::wifi::{ClientConfig, ModeConfig, WifiController};
use rand_core::{CryptoRng, RngCore};

use crate::http::{Connector, HttpError, Scheme, Url};
use crate::wifi::{NetError, Network};

/// TLS record buffers; the read side must hold a full 16 KiB record
pub const TLS_READ_BUF_SIZE: usize = 16640;
pub const TLS_WRITE_BUF_SIZE: usize = 4096;
const SOCKET_RX_SIZE: usize = 4096;
const SOCKET_TX_SIZE: usize = 1024;
/// Socket-level inactivity limit, above the cycle's own bounds
const SOCKET_TIMEOUT: Duration = Duration::from_secs(90);

/// Station-mode WiFi over esp-radio
pub struct WifiNetwork<'d> {
    controller: WifiController<'d>,
    stack: Stack<'d>,
}

impl<'d> WifiNetwork<'d> {
    pub fn new(controller: WifiController<'d>, stack: Stack<'d>) -> Self {
        Self { controller, stack }
    }
}

impl Network for WifiNetwork<'_> {
    async fn begin_join(&mut self, ssid: &str, password: &str) -> Result<(), NetError> {
        let client_config = ModeConfig::Client(
            ClientConfig::default()
                .with_ssid(String::from(ssid))
                .with_password(String::from(password)),
        );
        self.controller.set_config(&client_config).map_err(|e| {
            log::warn!("WiFi config rejected: {:?}", e);
            NetError::InvalidCredentials
        })?;

        if !matches!(self.controller.is_started(), Ok(true)) {
            self.controller.start_async().await.map_err(|e| {
                log::error!("WiFi start failed: {:?}", e);
                NetError::Radio
            })?;
        }

        self.controller.connect_async().await.map_err(|e| {
            log::warn!("WiFi connect failed: {:?}", e);
            NetError::Rejected
        })
    }

    fn is_joined(&mut self) -> bool {
        matches!(self.controller.is_connected(), Ok(true)) && self.stack.config_v4().is_some()
    }

    fn rssi(&mut self) -> Option<i8> {
        self.controller
            .rssi()
            .ok()
            .map(|rssi| rssi.clamp(i8::MIN as i32, i8::MAX as i32) as i8)
    }

    fn mac_address(&mut self) -> [u8; 6] {
        esp_hal::efuse::Efuse::mac_address()
    }
}

/// TLS randomness from the hardware RNG, which is entropy-backed while the
/// radio is running
pub struct HardwareRng(Rng);

impl RngCore for HardwareRng {
    fn next_u32(&mut self) -> u32 {
        self.0.random()
    }

    fn next_u64(&mut self) -> u64 {
        (self.next_u32() as u64) << 32 | self.next_u32() as u64
    }

    fn fill_bytes(&mut self, dest: &mut [u8]) {
        for chunk in dest.chunks_mut(4) {
            let word = self.next_u32().to_le_bytes();
            chunk.copy_from_slice(&word[..chunk.len()]);
        }
    }

    fn try_fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), rand_core::Error> {
        self.fill_bytes(dest);
        Ok(())
    }
}

impl CryptoRng for HardwareRng {}

/// An open connection, plain or TLS
pub enum NetConnection<'a> {
    Plain(TcpSocket<'a>),
    Tls(TlsConnection<'a, TcpSocket<'a>, Aes128GcmSha256>),
}

impl ErrorType for NetConnection<'_> {
    type Error = ErrorKind;
}

impl Read for NetConnection<'_> {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        match self {
            Self::Plain(socket) => socket.read(buf).await.map_err(|e| e.kind()),
            Self::Tls(tls) => tls.read(buf).await.map_err(|e| e.kind()),
        }
    }
}

impl Write for NetConnection<'_> {
    async fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        match self {
            Self::Plain(socket) => socket.write(buf).await.map_err(|e| e.kind()),
            Self::Tls(tls) => tls.write(buf).await.map_err(|e| e.kind()),
        }
    }

    async fn flush(&mut self) -> Result<(), Self::Error> {
        match self {
            Self::Plain(socket) => socket.flush().await.map_err(|e| e.kind()),
            Self::Tls(tls) => tls.flush().await.map_err(|e| e.kind()),
        }
    }
}

/// Opens TCP (and TLS) connections on the embassy-net stack
pub struct TcpConnector<'d> {
    stack: Stack<'d>,
    rx_buf: Box<[u8; SOCKET_RX_SIZE]>,
    tx_buf: Box<[u8; SOCKET_TX_SIZE]>,
    tls_read_buf: Box<[u8; TLS_READ_BUF_SIZE]>,
    tls_write_buf: Box<[u8; TLS_WRITE_BUF_SIZE]>,
    rng: HardwareRng,
}

impl<'d> TcpConnector<'d> {
    /// Buffers live on the heap to keep them off the main task's stack
    pub fn new(stack: Stack<'d>, rng: Rng) -> Self {
        Self {
            stack,
            rx_buf: Box::new([0; SOCKET_RX_SIZE]),
            tx_buf: Box::new([0; SOCKET_TX_SIZE]),
            tls_read_buf: Box::new([0; TLS_READ_BUF_SIZE]),
            tls_write_buf: Box::new([0; TLS_WRITE_BUF_SIZE]),
            rng: HardwareRng(rng),
        }
    }
}

/// Resolve a hostname to an address, accepting dotted IPv4 literals as-is
async fn resolve_host(stack: Stack<'_>, host: &str) -> Result<IpAddress, HttpError> {
    if let Ok(ip) = host.parse::<core::net::Ipv4Addr>() {
        return Ok(IpAddress::Ipv4(ip));
    }

    log::debug!("Resolving hostname: {}", host);
    let addrs = stack
        .dns_query(host, DnsQueryType::A)
        .await
        .map_err(|e| {
            log::warn!("DNS lookup for {} failed: {:?}", host, e);
            HttpError::Connect
        })?;
    addrs.first().copied().ok_or(HttpError::Connect)
}

impl<'d> Connector for TcpConnector<'d> {
    type Connection<'a>
        = NetConnection<'a>
    where
        Self: 'a;

    async fn connect<'a>(
        &'a mut self,
        url: &Url<'_>,
        insecure_tls: bool,
    ) -> Result<NetConnection<'a>, HttpError> {
        if url.scheme == Scheme::Https && !insecure_tls {
            log::error!("Certificate verification is not available; refusing {}", url.host);
            return Err(HttpError::Tls);
        }

        let ip = resolve_host(self.stack, url.host).await?;
        let mut socket = TcpSocket::new(self.stack, &mut self.rx_buf[..], &mut self.tx_buf[..]);
        socket.set_timeout(Some(SOCKET_TIMEOUT));
        socket.connect((ip, url.port)).await.map_err(|e| {
            log::warn!("TCP connect to {}:{} failed: {:?}", url.host, url.port, e);
            HttpError::Connect
        })?;

        match url.scheme {
            Scheme::Http => Ok(NetConnection::Plain(socket)),
            Scheme::Https => {
                log::info!("Starting TLS handshake with {}", url.host);
                let config = TlsConfig::new().with_server_name(url.host);
                let mut tls = TlsConnection::new(
                    socket,
                    &mut self.tls_read_buf[..],
                    &mut self.tls_write_buf[..],
                );
                // Certificate checks skipped, see `use_insecure_tls`
                tls.open(TlsContext::new(&config, UnsecureProvider::new(&mut self.rng)))
                    .await
                    .map_err(|e| {
                        log::error!("TLS handshake failed: {:?}", e);
                        HttpError::Tls
                    })?;
                Ok(NetConnection::Tls(tls))
            }
        }
    }
}
