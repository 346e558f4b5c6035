// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # Exception 模块
//!
//! 该模块定义了控制器层在声明期、挂载期和请求期可能产生的各类错误。
//!
//! ## 设计意图
//! - **配置错误**：声明期参数非法（未知引擎、错误处理器指向不存在的 action、重复挂载），
//!   属于程序员错误，应当中止应用启动。
//! - **配置已关闭**：控制器锁定后的任何写操作都返回 [`Exception::SetupLocked`]，
//!   存储内容保持不变，调用方可以选择忽略。
//! - **请求期错误**：模板缺失、action 执行失败且没有注册 500 处理器时向宿主服务器传播。
//!
//! [`ActionError`] 则是 action / hook 内部使用的控制流通道，
//! 由分发器转换为响应或继续向上传播。

use std::fmt;

use crate::response::Response;

/// 控制器层处理过程中发生的异常类型。
#[derive(Debug, Clone, PartialEq)]
pub enum Exception {
    /// 客户端发送的请求字节流无法解析为合法的 UTF-8 字符串。
    RequestIsNotUtf8,
    /// 客户端使用了不支持的 HTTP 方法，或请求行格式不正确。
    UnSupportedRequestMethod,
    /// 客户端使用了服务器不支持的 HTTP 协议版本。
    UnsupportedHttpVersion,
    /// 请求目标不是以 `/` 开头的绝对路径。
    InvalidPath,
    /// 控制器已经锁定，声明式配置不再接受修改。
    SetupLocked(String),
    /// 控制器已经被挂载过一次。
    AlreadyMounted(String),
    /// 引擎表中找不到给定名称的模板引擎。
    UnknownEngine(String),
    /// 错误处理器引用了一个尚未声明的 action。
    UnknownHandlerAction { status: u16, action: String },
    /// `render_layout` 被调用，但该 action 没有任何布局。
    LayoutMissing { controller: String, action: String },
    /// 模板文件不存在。
    TemplateNotFound(String),
    /// 读取模板文件时发生 I/O 错误。
    TemplateIoFailed(String),
    /// 缓存条目的构造函数在同一线程内再次请求同一个键。
    CacheReentry(String),
    /// action 执行失败且没有可用的 500 处理器。
    ActionFailed(String),
}

use Exception::*;

impl fmt::Display for Exception {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestIsNotUtf8 => write!(f, "Request bytes can't be parsed in UTF-8"),
            UnSupportedRequestMethod => write!(f, "Unsupported request method"),
            UnsupportedHttpVersion => write!(f, "Unsupported HTTP version"),
            InvalidPath => write!(f, "Invalid path (400)"),
            SetupLocked(ctrl) => write!(f, "{} is locked, setup can not be changed", ctrl),
            AlreadyMounted(ctrl) => write!(f, "{} was already mounted", ctrl),
            UnknownEngine(name) => write!(f, "Unknown template engine: {}", name),
            UnknownHandlerAction { status, action } => write!(
                f,
                "Error handler for {} points to undeclared action `{}`",
                status, action
            ),
            LayoutMissing { controller, action } => write!(
                f,
                "seems there are no layout defined for {}#{} action",
                controller, action
            ),
            TemplateNotFound(path) => write!(f, "No such template: {}", path),
            TemplateIoFailed(reason) => write!(f, "Couldn't read template: {}", reason),
            CacheReentry(key) => write!(f, "Cache entry {} is already being built by this thread", key),
            ActionFailed(reason) => write!(f, "{}", reason),
        }
    }
}

impl std::error::Error for Exception {}

/// action 与 hook 的控制流结果。
///
/// 三种情形分别对应：立即发送的响应、带状态码的显式错误、运行期失败。
#[derive(Debug, Clone)]
pub enum ActionError {
    /// 立即发送给客户端，跳过剩余的处理流程。
    Halt(Response),
    /// 显式错误，例如 `ctx.error(404, "...")`，会经过错误处理器查找。
    Status { status: u16, message: Option<String> },
    /// 运行期失败，只有注册了 500 处理器时才在本地恢复。
    Failed(String),
}

impl ActionError {
    pub fn failed(reason: impl Into<String>) -> Self {
        ActionError::Failed(reason.into())
    }

    pub fn status(status: u16, message: Option<&str>) -> Self {
        ActionError::Status {
            status,
            message: message.map(str::to_string),
        }
    }

    /// 传给错误处理器的消息文本。
    pub fn message(&self) -> String {
        match self {
            ActionError::Halt(response) => response.information().to_string(),
            ActionError::Status { message, .. } => message.clone().unwrap_or_default(),
            ActionError::Failed(reason) => reason.clone(),
        }
    }
}

impl fmt::Display for ActionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActionError::Halt(response) => write!(f, "halted with {}", response.status_code()),
            ActionError::Status { status, message } => match message {
                Some(m) => write!(f, "{}: {}", status, m),
                None => write!(f, "{}", status),
            },
            ActionError::Failed(reason) => write!(f, "{}", reason),
        }
    }
}

impl From<Exception> for ActionError {
    fn from(e: Exception) -> Self {
        ActionError::Failed(e.to_string())
    }
}

/// 声明式 setup 调用的返回值。
pub type SetupResult = Result<(), Exception>;

/// action 与 hook 的返回值。
pub type ActionResult<T> = Result<T, ActionError>;
