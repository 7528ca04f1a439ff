//! Client SDK for the GitHub Copilot CLI runtime.
//!
//! The SDK spawns (or connects to) the Copilot CLI, speaks JSON-RPC 2.0 to it
//! and exposes conversation sessions. Custom tools, permission prompts,
//! lifecycle hooks and user-input requests raised by the runtime are answered
//! by handlers registered on each session.
//!
//! ```no_run
//! use copilot_sdk::{Client, ClientOptions, SessionConfig};
//!
//! # async fn run() -> copilot_sdk::Result<()> {
//! let client = Client::new(ClientOptions::default())?;
//! client.start().await?;
//! let session = client
//!     .create_session(SessionConfig::default().with_model("gpt-5"))
//!     .await?;
//! session.on(|event| println!("{:?}", event.event_type));
//! session.send("What is 2 + 2?").await?;
//! client.stop().await;
//! # Ok(())
//! # }
//! ```
//
// # Mutex Usage Policy
//
//   - `tokio::sync::Mutex`: held across `.await` (connection slot,
//     transport writer, pending-call table).
//
//   - `parking_lot::Mutex`: sync-only state touched briefly from async code
//     (session registry, subscriber lists, process state, steering queue).
//     Never held across an `.await`.

/// SDK version reported in logs.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

mod bridge;
pub mod client;
pub mod error;
pub mod handlers;
pub mod options;
pub mod probe;
pub mod process;
pub mod protocol;
mod router;
pub mod session;
pub mod session_config;
pub mod steering;
pub mod tools;

pub use client::{Client, ConnectionState};
pub use error::{Error, HandlerError, ProcessLaunchError, Result, ToolExecutionError};
pub use handlers::{
    EventHandler, HookHandler, PermissionHandler, SessionHooks, ToolErrorHandler,
    UserInputHandler, approve_all, permission_handler, user_input_handler,
};
pub use options::{AcquisitionOptions, ClientOptions, Endpoint, LogLevel};
pub use probe::RuntimeProbe;
pub use process::ProcessState;
pub use protocol::{
    Attachment, MessageOptions, PermissionOutcome, PermissionRequest, SessionEvent,
    SessionEventType, ToolInvocation, ToolResult,
};
pub use session::{Session, SubscriptionId};
pub use session_config::SessionConfig;
pub use steering::{ConversationManager, MessageQueue, Priority, QueueFull, QueuedMessage};
pub use tools::Tool;

pub use copilot_sdk_acquire as acquire;
pub use copilot_sdk_rpc as rpc;
