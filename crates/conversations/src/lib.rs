//! Conversation window state machine, inbound processing and outbound sends.

pub mod inbound;
pub mod media;
pub mod outbound;
pub mod sweep;
pub mod window;

pub use {
    inbound::{InboundAttachment, InboundOutcome, InboundPayload, InboundProcessor},
    outbound::{OutboundGateway, SendOutcome, SendRequest},
    sweep::{WindowSweeper, sweep_once},
    window::{WINDOW_MS, WindowState, is_within_window, window_state},
};
