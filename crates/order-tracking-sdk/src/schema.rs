//! 订单字段描述
//!
//! 表单渲染和提交前校验共用同一份显式字段列表。

use crate::error::{OrderTrackingError, Result};
use crate::models::{OrderDraft, OrderStatus, OrderType};

/// 字段类型
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FieldKind {
    /// 单行文本
    Text,
    /// 多行文本
    LongText,
    /// 枚举，取值为序列化后的字符串
    Enum(&'static [&'static str]),
    /// 坐标，闭区间
    Coordinate { min: f64, max: f64 },
}

/// 字段描述
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FieldDescriptor {
    /// JSON 字段名
    pub name: &'static str,
    pub kind: FieldKind,
    pub required: bool,
}

impl FieldDescriptor {
    /// 展示用标签：`relatedId` → `Related Id`
    pub fn label(&self) -> String {
        let mut label = String::with_capacity(self.name.len() + 4);
        for (i, c) in self.name.chars().enumerate() {
            if i == 0 {
                label.extend(c.to_uppercase());
            } else if c.is_uppercase() {
                label.push(' ');
                label.push(c);
            } else {
                label.push(c);
            }
        }
        label
    }
}

const ORDER_TYPES: &[&str] = &["disposal", "sale"];
const ORDER_STATUSES: &[&str] = &["pending", "in_transit", "delivered", "cancelled"];

/// 订单可编辑字段（不含 id / 时间戳）
pub const ORDER_FIELDS: &[FieldDescriptor] = &[
    FieldDescriptor {
        name: "relatedId",
        kind: FieldKind::Text,
        required: true,
    },
    FieldDescriptor {
        name: "type",
        kind: FieldKind::Enum(ORDER_TYPES),
        required: true,
    },
    FieldDescriptor {
        name: "description",
        kind: FieldKind::LongText,
        required: false,
    },
    FieldDescriptor {
        name: "status",
        kind: FieldKind::Enum(ORDER_STATUSES),
        required: true,
    },
    FieldDescriptor {
        name: "lat",
        kind: FieldKind::Coordinate {
            min: -90.0,
            max: 90.0,
        },
        required: false,
    },
    FieldDescriptor {
        name: "lng",
        kind: FieldKind::Coordinate {
            min: -180.0,
            max: 180.0,
        },
        required: false,
    },
];

pub fn field(name: &str) -> Option<&'static FieldDescriptor> {
    ORDER_FIELDS.iter().find(|field| field.name == name)
}

/// 提交前校验新建订单
pub fn validate_draft(draft: &OrderDraft) -> Result<()> {
    for descriptor in ORDER_FIELDS {
        match (descriptor.name, descriptor.kind) {
            ("relatedId", _) if descriptor.required && draft.related_id.trim().is_empty() => {
                return Err(missing(descriptor));
            }
            ("type", FieldKind::Enum(options)) => {
                check_option(descriptor, options, draft.order_type.as_str())?
            }
            ("status", FieldKind::Enum(options)) => {
                check_option(descriptor, options, draft.status.as_str())?
            }
            ("lat", FieldKind::Coordinate { min, max }) => check_range(descriptor, draft.lat, min, max)?,
            ("lng", FieldKind::Coordinate { min, max }) => check_range(descriptor, draft.lng, min, max)?,
            _ => {}
        }
    }

    if draft.lat.is_some() != draft.lng.is_some() {
        return Err(OrderTrackingError::InvalidInput(
            "Lat 和 Lng 必须同时填写".to_string(),
        ));
    }
    Ok(())
}

fn missing(descriptor: &FieldDescriptor) -> OrderTrackingError {
    OrderTrackingError::InvalidInput(format!("{} 为必填项", descriptor.label()))
}

fn check_option(descriptor: &FieldDescriptor, options: &[&str], value: &str) -> Result<()> {
    if options.contains(&value) {
        Ok(())
    } else {
        Err(OrderTrackingError::InvalidInput(format!(
            "{} 取值无效: {}",
            descriptor.label(),
            value
        )))
    }
}

fn check_range(descriptor: &FieldDescriptor, value: Option<f64>, min: f64, max: f64) -> Result<()> {
    match value {
        Some(v) if !v.is_finite() || v < min || v > max => Err(OrderTrackingError::InvalidInput(
            format!("{} 超出范围 [{}, {}]: {}", descriptor.label(), min, max, v),
        )),
        _ => Ok(()),
    }
}
