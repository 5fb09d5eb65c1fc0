use clap::Parser;

/// Default game port
pub const DEFAULT_PORT: u16 = 5000;

/// Default bind address, all interfaces
pub const DEFAULT_HOST: &str = "0.0.0.0";

/// Two-player tic-tac-toe server
#[derive(Debug, Clone, Parser)]
#[command(version)]
pub struct ServerConfig {
    /// Address to listen on
    #[arg(long, env = "TICTACTOE_HOST", default_value = DEFAULT_HOST)]
    pub host: String,

    /// Port to listen on
    #[arg(short, long, env = "TICTACTOE_PORT", default_value_t = DEFAULT_PORT)]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
        }
    }
}

impl ServerConfig {
    #[must_use]
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    #[must_use]
    pub const fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// `host:port` string handed to the listener
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
