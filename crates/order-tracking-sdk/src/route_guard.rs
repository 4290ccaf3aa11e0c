//! 路由访问控制
//!
//! 角色是封闭集合，每个角色对应一组路径模式：
//! - 精确匹配：`/home`
//! - 前缀匹配：`/users/*` 匹配 `/users/` 开头的所有路径
//! - `*` 匹配一切

use serde::{Deserialize, Serialize};
use std::fmt;

/// 用户角色
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Employee,
    #[default]
    Public,
}

const ADMIN_ROUTES: &[&str] = &[
    "/home",
    "/users",
    "/users/*",
    "/sales",
    "/sales/*",
    "/customers",
    "/customers/*",
    "/orders",
    "/orders/*",
];

const EMPLOYEE_ROUTES: &[&str] = &[
    "/home",
    "/sales",
    "/sales/*",
    "/customers",
    "/customers/*",
    "/orders",
    "/orders/*",
];

const PUBLIC_ROUTES: &[&str] = &["/", "/login"];

impl Role {
    /// 未知角色一律视为 Public
    pub fn parse(value: &str) -> Role {
        match value.trim().to_ascii_lowercase().as_str() {
            "admin" => Role::Admin,
            "employee" => Role::Employee,
            _ => Role::Public,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Employee => "employee",
            Role::Public => "public",
        }
    }

    pub fn routes(&self) -> &'static [&'static str] {
        match self {
            Role::Admin => ADMIN_ROUTES,
            Role::Employee => EMPLOYEE_ROUTES,
            Role::Public => PUBLIC_ROUTES,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn matches(pattern: &str, path: &str) -> bool {
    if pattern == "*" {
        return true;
    }
    match pattern.strip_suffix('*') {
        Some(prefix) => path.starts_with(prefix),
        None => path == pattern,
    }
}

/// 角色是否可以访问该路径
pub fn is_allowed(role: Role, path: &str) -> bool {
    role.routes().iter().any(|pattern| matches(pattern, path))
}

/// 不需要登录即可访问的路径
pub fn is_public(path: &str) -> bool {
    is_allowed(Role::Public, path)
}

/// 访问判定结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteDecision {
    Allow,
    /// 已登录但无权限
    RedirectHome,
    /// 未登录
    RedirectLogin,
}

impl RouteDecision {
    pub fn redirect_target(&self) -> Option<&'static str> {
        match self {
            RouteDecision::Allow => None,
            RouteDecision::RedirectHome => Some("/home"),
            RouteDecision::RedirectLogin => Some("/login"),
        }
    }
}

/// 综合判定：公开路径放行，其次按角色放行，否则按是否登录决定跳转目标
pub fn authorize(role: Role, path: &str) -> RouteDecision {
    if is_public(path) || is_allowed(role, path) {
        return RouteDecision::Allow;
    }
    match role {
        Role::Admin | Role::Employee => RouteDecision::RedirectHome,
        Role::Public => RouteDecision::RedirectLogin,
    }
}
