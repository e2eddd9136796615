pub mod cli;
pub mod client;
pub mod config;
pub mod llm;
pub mod models;
pub mod prompt;
pub mod server;
pub mod session;
pub mod stream;

#[cfg(test)]
mod testing;

use cli::Args;
use config::roles::{ load_roles, RoleRegistry };
use llm::{ chat::new_client, LlmConfig };
use log::{ info, warn };
use server::{ api::AppState, Server };
use std::error::Error;
use std::sync::Arc;

pub async fn run(args: Args) -> Result<(), Box<dyn Error + Send + Sync>> {
    info!("--- Core Configuration ---");
    info!("Server Address: {}", args.server_addr);
    info!("Chat LLM Type: {}", args.chat_llm_type);
    info!("Chat Model: {}", args.chat_model.as_deref().unwrap_or("(provider default)"));
    info!("Chat Base URL: {}", args.chat_base_url.as_deref().unwrap_or("(provider default)"));
    info!("Max Tokens: {}", args.chat_max_tokens);
    info!("Temperature: {}", args.chat_temperature);
    info!("Roles Path: {}", args.roles_path);
    info!("CORS Origins: {}", args.cors_origins.join(", "));
    info!("TLS Enabled: {}", args.enable_tls);
    info!("-------------------------");

    let roles = match load_roles(&args.roles_path) {
        Ok(roles) => Some(roles),
        Err(e) => {
            warn!("Role configuration unavailable, conversions will fail: {}", e);
            None
        }
    };

    let llm_config = LlmConfig {
        llm_type: args.chat_llm_type.parse()?,
        api_key: Some(args.chat_api_key.clone()).filter(|k| !k.is_empty()),
        completion_model: args.chat_model.clone(),
        base_url: args.chat_base_url.clone(),
        max_tokens: args.chat_max_tokens,
        temperature: args.chat_temperature,
    };
    let chat_client = new_client(&llm_config)?;

    let state = AppState {
        registry: Arc::new(RoleRegistry::new(roles)),
        chat_client,
    };

    let addr = args.server_addr.clone();
    info!("Starting server on: {}", addr);
    let server = Server::new(addr, state, args);
    server.run().await?;

    Ok(())
}
