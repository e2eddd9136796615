pub mod api;

use crate::cli::Args;
use api::AppState;
use std::error::Error;
use std::net::SocketAddr;

pub struct Server {
    addr: String,
    state: AppState,
    args: Args,
}

impl Server {
    pub fn new(addr: String, state: AppState, args: Args) -> Self {
        Self { addr, state, args }
    }

    pub async fn run(&self) -> Result<(), Box<dyn Error + Send + Sync>> {
        let addr: SocketAddr = self.addr
            .parse()
            .map_err(|e| format!("Invalid server address '{}': {}", self.addr, e))?;
        api::start_http_server(addr, self.state.clone(), self.args.clone()).await
    }
}
