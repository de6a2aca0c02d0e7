use eyre::WrapErr;
use session::{ConnectOptions, Connection};
use transport::{DEFAULT_RIDE_PORT, TcpTransport};

use crate::state::ConnectTarget;

/// Produces an established interpreter link for `launch` and `attach`.
pub trait Connector: Send + Sync {
    fn connect(&self, target: &ConnectTarget, options: &ConnectOptions)
    -> eyre::Result<Connection>;
}

/// Connects over TCP, retrying with exponential back-off.
#[derive(Debug, Clone)]
pub struct TcpConnector {
    pub host: String,
    pub port: u16,
    pub attempts: usize,
}

impl Default for TcpConnector {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_RIDE_PORT,
            attempts: 5,
        }
    }
}

impl Connector for TcpConnector {
    #[tracing::instrument(skip(self, options))]
    fn connect(
        &self,
        target: &ConnectTarget,
        options: &ConnectOptions,
    ) -> eyre::Result<Connection> {
        let host = target.host.as_deref().unwrap_or(&self.host);
        let port = target.port.unwrap_or(self.port);
        let addr = format!("{host}:{port}");

        let transport = TcpTransport::connect_with_retry(addr.as_str(), self.attempts)
            .wrap_err_with(|| format!("connecting to interpreter at {addr}"))?;
        Connection::establish(transport, options)
            .wrap_err_with(|| format!("starting RIDE session with {addr}"))
    }
}
