//! 传输层
//!
//! - `selector`：根据托管环境决定先走实时通道还是直接轮询
//! - `socketio`：Socket.IO v4 文本帧编解码
//! - `stream`：实时通道 trait 与 WebSocket 实现

pub mod selector;
pub mod socketio;
pub mod stream;

pub use selector::{
    EnvironmentSignals, HostingPlatform, TransportKind, TransportPlan, TransportSelector,
};
pub use stream::{StreamConnection, StreamTransport, WebSocketTransport};
