// ABOUTME: Chat relay server binary
// ABOUTME: Loads configuration, initializes logging and serves the chat API until shutdown
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

//! # Rube Chat Server Binary
//!
//! Starts the HTTP API that streams tool-augmented assistant replies and
//! persists conversation history.

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use rube_chat_server::{config::ServerConfig, logging, resources::ServerResources, server};
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "rube-chat-server")]
#[command(about = "Rube chat relay - streams tool-augmented LLM replies")]
pub struct Args {
    /// Override HTTP port
    #[arg(long)]
    http_port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    logging::init_from_env()?;

    let mut config = ServerConfig::from_env()?;
    if let Some(http_port) = args.http_port {
        config.http_port = http_port;
    }

    info!("Starting Rube chat server");
    info!("{}", config.summary());

    let resources = Arc::new(ServerResources::from_config(config).await?);

    if let Err(e) = server::run(resources).await {
        error!("Server error: {e:#}");
        return Err(e);
    }

    Ok(())
}
