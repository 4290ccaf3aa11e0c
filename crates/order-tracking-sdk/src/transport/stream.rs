//! 实时通道抽象
//!
//! `StreamTransport` 负责建立连接（含握手），`StreamConnection` 是一条已建立的连接。
//! Supervisor 只依赖这两个 trait，测试里用内存实现替换。

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use super::socketio::{
    self, EnginePacket, OpenHandshake, SocketPacket, EVENT_ORDER_UPDATED,
    EVENT_UPDATE_ORDER_LOCATION,
};
use crate::error::{OrderTrackingError, Result};
use crate::models::{LocationUpdate, Order};

/// 建立实时连接
#[async_trait]
pub trait StreamTransport: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn StreamConnection>>;
}

/// 一条已建立的实时连接
#[async_trait]
pub trait StreamConnection: Send {
    /// 等待下一条订单更新，`Ok(None)` 表示对端正常关闭
    ///
    /// 实现必须是取消安全的：Supervisor 会在 select! 中丢弃未完成的 future。
    /// 读取过程中需要回写的帧（如 pong）在被丢弃时不能丢失。
    async fn next_update(&mut self) -> Result<Option<Order>>;

    /// 上报订单坐标
    async fn send_location(&mut self, update: &LocationUpdate) -> Result<()>;

    /// 主动关闭
    async fn close(&mut self);
}

/// 基于 tokio-tungstenite 的 Socket.IO 传输
#[derive(Debug, Clone)]
pub struct WebSocketTransport {
    endpoint: String,
    connect_timeout: Duration,
}

impl WebSocketTransport {
    /// `base_url` 为 http(s) 或 ws(s) 地址，路径固定为 `/socket.io/`
    pub fn new(base_url: &str, connect_timeout: Duration) -> Self {
        Self {
            endpoint: socketio::endpoint_url(base_url),
            connect_timeout,
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn handshake(&self) -> Result<WebSocketConnection> {
        let (mut socket, _response) = connect_async(self.endpoint.as_str()).await?;

        let open = match read_packet(&mut socket).await? {
            Some(EnginePacket::Open(open)) => open,
            other => {
                return Err(OrderTrackingError::Protocol(format!(
                    "期望 Engine.IO open 包，收到 {:?}",
                    other
                )))
            }
        };
        debug!("Engine.IO 已打开: sid={}", open.sid);

        socket.send(Message::Text(socketio::encode_connect())).await?;

        loop {
            match read_packet(&mut socket).await? {
                Some(EnginePacket::Message(SocketPacket::Connect(_))) => break,
                Some(EnginePacket::Message(SocketPacket::ConnectError(reason))) => {
                    return Err(OrderTrackingError::Transport(format!(
                        "Socket.IO 拒绝连接: {}",
                        reason
                    )))
                }
                Some(EnginePacket::Ping(payload)) => {
                    socket.send(Message::Text(socketio::encode_pong(&payload))).await?;
                }
                Some(_) => continue,
                None => {
                    return Err(OrderTrackingError::Transport(
                        "握手期间连接被关闭".to_string(),
                    ))
                }
            }
        }

        Ok(WebSocketConnection {
            socket,
            open,
            pending_pong: None,
        })
    }
}

#[async_trait]
impl StreamTransport for WebSocketTransport {
    async fn connect(&self) -> Result<Box<dyn StreamConnection>> {
        info!("🔗 正在连接实时通道: {}", self.endpoint);
        let connection = tokio::time::timeout(self.connect_timeout, self.handshake())
            .await
            .map_err(|_| {
                OrderTrackingError::Timeout(format!(
                    "实时通道握手超过 {}ms",
                    self.connect_timeout.as_millis()
                ))
            })??;
        info!("✅ 实时通道已连接");
        Ok(Box::new(connection))
    }
}

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// 读取下一个 Engine.IO 包，`None` 表示连接已关闭
async fn read_packet(socket: &mut Socket) -> Result<Option<EnginePacket>> {
    while let Some(next) = socket.next().await {
        match next? {
            Message::Text(text) => return socketio::decode(&text).map(Some),
            Message::Close(_) => return Ok(None),
            _ => continue,
        }
    }
    Ok(None)
}

/// 一条 Socket.IO over WebSocket 连接
pub struct WebSocketConnection {
    socket: Socket,
    open: OpenHandshake,
    /// 尚未发出的 pong，发送成功后才清空
    pending_pong: Option<String>,
}

impl WebSocketConnection {
    async fn flush_pong(&mut self) -> Result<()> {
        if let Some(frame) = self.pending_pong.clone() {
            self.socket.send(Message::Text(frame)).await?;
            self.pending_pong = None;
        }
        Ok(())
    }
}

#[async_trait]
impl StreamConnection for WebSocketConnection {
    async fn next_update(&mut self) -> Result<Option<Order>> {
        let window = self.open.liveness_window();
        loop {
            self.flush_pong().await?;
            let packet = tokio::time::timeout(window, read_packet(&mut self.socket))
                .await
                .map_err(|_| {
                    OrderTrackingError::Timeout(format!("{}ms 内未收到心跳", window.as_millis()))
                })?;

            match packet {
                Ok(Some(EnginePacket::Ping(payload))) => {
                    self.pending_pong = Some(socketio::encode_pong(&payload));
                }
                Ok(Some(EnginePacket::Message(SocketPacket::Event { name, data }))) => {
                    if name != EVENT_ORDER_UPDATED {
                        debug!("忽略事件: {}", name);
                        continue;
                    }
                    match serde_json::from_value::<Order>(data) {
                        Ok(order) => return Ok(Some(order)),
                        Err(e) => warn!("⚠️ 无法解析 orderUpdated 载荷，已丢弃: {}", e),
                    }
                }
                Ok(Some(EnginePacket::Message(SocketPacket::Disconnect)))
                | Ok(Some(EnginePacket::Close))
                | Ok(None) => {
                    info!("实时通道被服务端关闭");
                    return Ok(None);
                }
                Ok(Some(_)) => continue,
                Err(OrderTrackingError::Protocol(reason)) => {
                    warn!("⚠️ 忽略无法识别的帧: {}", reason);
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn send_location(&mut self, update: &LocationUpdate) -> Result<()> {
        self.flush_pong().await?;
        let frame = socketio::encode_event(EVENT_UPDATE_ORDER_LOCATION, update)?;
        self.socket.send(Message::Text(frame)).await?;
        debug!("📍 已上报坐标: {} ({}, {})", update.id, update.lat, update.lng);
        Ok(())
    }

    async fn close(&mut self) {
        // 对端可能已经断开，关闭失败无需处理
        let _ = self
            .socket
            .send(Message::Text(socketio::encode_disconnect()))
            .await;
        let _ = self.socket.close(None).await;
    }
}
