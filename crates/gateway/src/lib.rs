//! HTTP surface: the conversation and campaign APIs, provider webhooks and
//! media uploads.
//!
//! Lifecycle:
//! 1. Open the store and run migrations
//! 2. Build the transport and the services over it
//! 3. Close out dispatch runs interrupted by a previous process
//! 4. Start the window sweeper and campaign scheduler
//! 5. Serve until ctrl-c

pub mod auth_middleware;
pub mod campaign_routes;
pub mod conversation_routes;
pub mod error;
pub mod server;
pub mod state;
pub mod upload_routes;
pub mod webhook_routes;

pub use {
    error::ApiError,
    server::{AppState, build_gateway_app, start_gateway},
    state::{GatewayState, MediaSettings},
};
