//! Socket.IO v4 文本帧编解码
//!
//! 只覆盖订单通道用到的部分：Engine.IO 握手 / 心跳，
//! 以及默认命名空间上的 CONNECT / EVENT / DISCONNECT。二进制帧不支持。

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

use crate::error::{OrderTrackingError, Result};

/// 服务端推送订单变化的事件名
pub const EVENT_ORDER_UPDATED: &str = "orderUpdated";
/// 客户端上报坐标的事件名
pub const EVENT_UPDATE_ORDER_LOCATION: &str = "updateOrderLocation";

/// Engine.IO 握手参数（`0{...}` 帧）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenHandshake {
    pub sid: String,
    #[serde(default)]
    pub upgrades: Vec<String>,
    #[serde(default = "default_ping_interval")]
    pub ping_interval: u64,
    #[serde(default = "default_ping_timeout")]
    pub ping_timeout: u64,
}

fn default_ping_interval() -> u64 {
    25_000
}

fn default_ping_timeout() -> u64 {
    20_000
}

impl OpenHandshake {
    /// 超过该时长没有收到任何帧（包括 ping）即视为连接已死
    pub fn liveness_window(&self) -> Duration {
        Duration::from_millis(self.ping_interval + self.ping_timeout)
    }
}

/// Engine.IO 包
#[derive(Debug, Clone, PartialEq)]
pub enum EnginePacket {
    Open(OpenHandshake),
    Close,
    Ping(String),
    Pong(String),
    Message(SocketPacket),
    Upgrade,
    Noop,
}

/// Socket.IO 包（承载在 Engine.IO message 中）
#[derive(Debug, Clone, PartialEq)]
pub enum SocketPacket {
    Connect(Option<Value>),
    Disconnect,
    Event { name: String, data: Value },
    Ack,
    ConnectError(Value),
}

/// 解码一个文本帧
pub fn decode(frame: &str) -> Result<EnginePacket> {
    let mut chars = frame.chars();
    let kind = chars
        .next()
        .ok_or_else(|| OrderTrackingError::Protocol("空帧".to_string()))?;
    let rest = chars.as_str();

    match kind {
        '0' => Ok(EnginePacket::Open(parse_json(rest)?)),
        '1' => Ok(EnginePacket::Close),
        '2' => Ok(EnginePacket::Ping(rest.to_string())),
        '3' => Ok(EnginePacket::Pong(rest.to_string())),
        '4' => Ok(EnginePacket::Message(decode_socket_packet(rest)?)),
        '5' => Ok(EnginePacket::Upgrade),
        '6' => Ok(EnginePacket::Noop),
        other => Err(OrderTrackingError::Protocol(format!(
            "未知 Engine.IO 包类型: {}",
            other
        ))),
    }
}

fn decode_socket_packet(body: &str) -> Result<SocketPacket> {
    let mut chars = body.chars();
    let kind = chars
        .next()
        .ok_or_else(|| OrderTrackingError::Protocol("空 Socket.IO 包".to_string()))?;
    let payload = strip_ack_id(strip_namespace(chars.as_str()));

    match kind {
        '0' => {
            if payload.is_empty() {
                Ok(SocketPacket::Connect(None))
            } else {
                Ok(SocketPacket::Connect(Some(parse_json(payload)?)))
            }
        }
        '1' => Ok(SocketPacket::Disconnect),
        '2' => decode_event(payload),
        '3' => Ok(SocketPacket::Ack),
        '4' => Ok(SocketPacket::ConnectError(
            serde_json::from_str(payload).unwrap_or(Value::Null),
        )),
        '5' | '6' => Err(OrderTrackingError::Protocol(
            "不支持二进制 Socket.IO 包".to_string(),
        )),
        other => Err(OrderTrackingError::Protocol(format!(
            "未知 Socket.IO 包类型: {}",
            other
        ))),
    }
}

/// 去掉 `/ns,` 命名空间前缀
fn strip_namespace(payload: &str) -> &str {
    if payload.starts_with('/') {
        match payload.find(',') {
            Some(idx) => &payload[idx + 1..],
            None => "",
        }
    } else {
        payload
    }
}

/// 去掉 ack id（事件数组前的数字）
fn strip_ack_id(payload: &str) -> &str {
    payload.trim_start_matches(|c: char| c.is_ascii_digit())
}

/// 帧内 JSON 损坏属于协议错误，单帧丢弃即可
fn parse_json<T: DeserializeOwned>(text: &str) -> Result<T> {
    serde_json::from_str(text)
        .map_err(|e| OrderTrackingError::Protocol(format!("帧载荷不是合法 JSON: {}", e)))
}

fn decode_event(payload: &str) -> Result<SocketPacket> {
    let value: Value = parse_json(payload)?;
    let mut items = match value {
        Value::Array(items) => items.into_iter(),
        other => {
            return Err(OrderTrackingError::Protocol(format!(
                "事件载荷不是数组: {}",
                other
            )))
        }
    };
    let name = match items.next() {
        Some(Value::String(name)) => name,
        _ => {
            return Err(OrderTrackingError::Protocol(
                "事件缺少名称".to_string(),
            ))
        }
    };
    Ok(SocketPacket::Event {
        name,
        data: items.next().unwrap_or(Value::Null),
    })
}

/// 连接默认命名空间
pub fn encode_connect() -> String {
    "40".to_string()
}

/// 主动断开默认命名空间
pub fn encode_disconnect() -> String {
    "41".to_string()
}

/// 回应服务端 ping
pub fn encode_pong(payload: &str) -> String {
    format!("3{}", payload)
}

/// 编码一个事件：`42["name",data]`
pub fn encode_event<T: Serialize>(name: &str, data: &T) -> Result<String> {
    let body = serde_json::to_string(&(name, data))?;
    Ok(format!("42{}", body))
}

/// 由 http(s)/ws(s) 基础地址生成 WebSocket 端点
pub fn endpoint_url(base: &str) -> String {
    let base = base.trim_end_matches('/');
    let base = if let Some(rest) = base.strip_prefix("https://") {
        format!("wss://{}", rest)
    } else if let Some(rest) = base.strip_prefix("http://") {
        format!("ws://{}", rest)
    } else {
        base.to_string()
    };
    format!("{}/socket.io/?EIO=4&transport=websocket", base)
}
