//! SDK 版本与运行时元信息
//!
//! - **SDK Version** → Cargo.toml（唯一权威源）
//! - **Build Metadata** → build.rs（vergen）

/// SDK semver，来自 Cargo.toml
pub const SDK_VERSION: &str = env!("CARGO_PKG_VERSION");

/// git commit（由 vergen 在 build.rs 中生成，缺失时为 "unknown"）
pub const GIT_SHA: &str = match option_env!("VERGEN_GIT_SHA") {
    Some(sha) => sha,
    None => "unknown",
};

/// build time（由 vergen 在 build.rs 中生成）
pub const BUILD_TIME: &str = match option_env!("VERGEN_BUILD_TIMESTAMP") {
    Some(ts) => ts,
    None => "unknown",
};

/// 用于日志和 User-Agent 的版本串，例如 `order-tracking-sdk/0.1.0 (a1b2c3d)`
pub fn user_agent() -> String {
    format!("order-tracking-sdk/{} ({})", SDK_VERSION, GIT_SHA)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_agent_contains_version() {
        let ua = user_agent();
        assert!(ua.starts_with("order-tracking-sdk/"));
        assert!(ua.contains(SDK_VERSION));
    }
}
