use std::net::SocketAddr;

use envconfig::Envconfig;

#[derive(Envconfig, Clone)]
pub struct Config {
    #[envconfig(default = "127.0.0.1:8080")]
    pub address: SocketAddr,

    /// Grace given to in-flight requests when the gateway shuts down.
    #[envconfig(default = "30")]
    pub close_timeout_seconds: u64,
}
