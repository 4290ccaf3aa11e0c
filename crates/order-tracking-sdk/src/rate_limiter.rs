//! 重连限流模块
//!
//! 实时通道断开后的重连节奏控制：
//!
//! 1. **有限次数** - 超过预算后交给轮询降级，不再无限重连
//! 2. **指数退避** - 延迟逐次翻倍，封顶
//! 3. **防重连风暴** - 只有连接稳定存活一段时间后才重置预算，
//!    "连上即断"的抖动会持续消耗预算，最终落到轮询
//!
//! | 参数 | 默认值 |
//! |------|--------|
//! | 最大尝试次数 | 10 |
//! | 初始间隔 | 1 秒 |
//! | 最大间隔 | 5 秒 |
//! | 稳定阈值 | 30 秒 |

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

/// 重连退避配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconnectConfig {
    /// 最大连接尝试次数（含首次）
    pub max_attempts: u32,
    /// 初始重连间隔（毫秒）
    pub initial_delay_ms: u64,
    /// 最大重连间隔（毫秒）
    pub max_delay_ms: u64,
    /// 退避倍数
    pub backoff_multiplier: f64,
    /// 随机抖动因子 (0.0-1.0)
    pub jitter_factor: f64,
    /// 连接存活超过该时长后断开，重置尝试预算（毫秒）
    pub stable_after_ms: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            initial_delay_ms: 1000,   // 初始 1 秒
            max_delay_ms: 5000,       // 1s → 2s → 4s → 5s 封顶
            backoff_multiplier: 2.0,
            jitter_factor: 0.1,
            stable_after_ms: 30_000,
        }
    }
}

impl ReconnectConfig {
    /// 无抖动版本（测试和可复现场景使用）
    pub fn without_jitter(mut self) -> Self {
        self.jitter_factor = 0.0;
        self
    }

    /// 第 `failures` 次失败之后的基础延迟（不含抖动）
    pub fn delay_after(&self, failures: u32) -> Duration {
        if failures == 0 {
            return Duration::ZERO;
        }
        let raw = self.initial_delay_ms as f64 * self.backoff_multiplier.powi(failures as i32 - 1);
        Duration::from_millis(raw.min(self.max_delay_ms as f64) as u64)
    }
}

/// 重连退避器
///
/// 功能：
/// 1. 控制重连频率（指数退避）
/// 2. 限制尝试次数
/// 3. 稳定连接后自动重置预算
#[derive(Debug)]
pub struct ReconnectBackoff {
    config: ReconnectConfig,
    /// 已消耗的尝试次数
    attempts: RwLock<u32>,
    /// 最近一次连接成功的时间
    connected_at: RwLock<Option<Instant>>,
}

impl ReconnectBackoff {
    pub fn new(config: ReconnectConfig) -> Self {
        Self {
            config,
            attempts: RwLock::new(0),
            connected_at: RwLock::new(None),
        }
    }

    /// 申请下一次连接尝试
    ///
    /// 返回：
    /// - Some(Duration) - 需要先等待的时间（首次为 0）
    /// - None - 预算已耗尽，应降级到轮询
    pub fn next_attempt(&self) -> Option<Duration> {
        // 连接稳定存活过一段时间才重置预算
        if let Some(connected_at) = self.connected_at.write().take() {
            let alive = Instant::now().duration_since(connected_at);
            if alive >= Duration::from_millis(self.config.stable_after_ms) {
                info!("连接已稳定 {}s，重置重连预算", alive.as_secs());
                *self.attempts.write() = 0;
            } else {
                debug!("连接仅存活 {}ms，不重置重连预算", alive.as_millis());
            }
        }

        let mut attempts = self.attempts.write();
        if *attempts >= self.config.max_attempts {
            return None;
        }

        let base = self.config.delay_after(*attempts);
        *attempts += 1;

        let delay = if self.config.jitter_factor > 0.0 && !base.is_zero() {
            let jitter = base.as_secs_f64() * self.config.jitter_factor * (rand::random::<f64>() - 0.5);
            let max = Duration::from_millis(self.config.max_delay_ms).as_secs_f64();
            Duration::from_secs_f64((base.as_secs_f64() + jitter).clamp(0.0, max))
        } else {
            base
        };

        debug!(
            "重连尝试 #{}/{}，等待 {}ms",
            *attempts,
            self.config.max_attempts,
            delay.as_millis()
        );
        Some(delay)
    }

    /// 标记连接成功
    pub fn mark_connected(&self) {
        info!(
            "连接成功（已尝试 {} 次）",
            *self.attempts.read()
        );
        *self.connected_at.write() = Some(Instant::now());
    }

    /// 完全重置（新会话）
    pub fn reset(&self) {
        *self.attempts.write() = 0;
        *self.connected_at.write() = None;
    }

    pub fn attempts(&self) -> u32 {
        *self.attempts.read()
    }

    pub fn max_attempts(&self) -> u32 {
        self.config.max_attempts
    }

    /// 获取统计信息
    pub fn stats(&self) -> ReconnectBackoffStats {
        ReconnectBackoffStats {
            attempts: *self.attempts.read(),
            max_attempts: self.config.max_attempts,
            connected_for_ms: self
                .connected_at
                .read()
                .map(|t| Instant::now().duration_since(t).as_millis() as u64),
        }
    }
}

/// 重连退避统计信息
#[derive(Debug, Clone)]
pub struct ReconnectBackoffStats {
    pub attempts: u32,
    pub max_attempts: u32,
    pub connected_for_ms: Option<u64>,
}
