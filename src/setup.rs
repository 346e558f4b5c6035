// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 控制器声明式配置
//!
//! `ControllerSetup` 收集一个控制器的全部声明（hook、认证、响应头属性、视图绑定、
//! 错误处理器、缓存池），并经历 `Open → Mounting → Locked` 三个状态：
//!
//! - **Open**：控制器自身的声明；
//! - **Mounting**：挂载时 slice 闭包在同一个构建器上继续声明；
//! - **Locked**：挂载完成，之后所有写入口都返回 [`Exception::SetupLocked`]，存储保持不变。
//!
//! 普通写入（如 `charset`）从不覆盖已有值，`force_` 前缀的写入总是覆盖，
//! 这一规则对控制器层与 slice 层一视同仁，slice 只是排在后面执行。

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use log::{debug, warn};
use regex::Regex;

use crate::{
    action::{ActionDescriptor, ActionSet},
    attribute::AttributeSlot,
    auth::{
        AuthRegistry, AuthRestriction, BasicChallenge, Challenge, DigestChallenge, DigestOptions,
        Scheme,
    },
    cache::{CacheKey, SharedPool},
    controller::Hook,
    error_handler::{ErrorHandlerRegistry, Handler},
    exception::{Exception, SetupResult},
    hook::{HookRegistry, Position},
    param::mime_type,
    view::{engine_by_name, CompilerPool, EngineBinding, Layout, ViewSettings},
};

pub type ValuePool = SharedPool<CacheKey, String>;

/// 构建器所处的状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetupState {
    Open,
    Mounting,
    Locked,
}

/// Cache-Control 指令
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheDirective {
    Public,
    Private,
    NoCache,
    NoStore,
    MustRevalidate,
    ProxyRevalidate,
    MaxAge(u64),
    MinStale(u64),
    SMaxAge(u64),
}

impl fmt::Display for CacheDirective {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheDirective::Public => write!(f, "public"),
            CacheDirective::Private => write!(f, "private"),
            CacheDirective::NoCache => write!(f, "no-cache"),
            CacheDirective::NoStore => write!(f, "no-store"),
            CacheDirective::MustRevalidate => write!(f, "must-revalidate"),
            CacheDirective::ProxyRevalidate => write!(f, "proxy-revalidate"),
            CacheDirective::MaxAge(n) => write!(f, "max-age={}", n),
            CacheDirective::MinStale(n) => write!(f, "min-stale={}", n),
            CacheDirective::SMaxAge(n) => write!(f, "s-maxage={}", n),
        }
    }
}

pub fn cache_control_value(directives: &[CacheDirective]) -> String {
    directives
        .iter()
        .map(|d| d.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// 过期时间：相对秒数或绝对时间
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ExpiryAmount {
    Seconds(i64),
    At(DateTime<Utc>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Expiry {
    pub amount: ExpiryAmount,
    pub directives: Vec<CacheDirective>,
}

impl Expiry {
    pub fn new(amount: ExpiryAmount, directives: &[CacheDirective]) -> Self {
        Self {
            amount,
            directives: directives.to_vec(),
        }
    }

    /// 计算 (Expires 时间, Cache-Control 值)，max-age 不小于 0。
    /// 超出时间范围的秒数被截断到可表示的最早或最晚时刻。
    pub fn resolve(&self, now: DateTime<Utc>) -> (DateTime<Utc>, String) {
        let (at, max_age) = match self.amount {
            ExpiryAmount::Seconds(n) => {
                let at = TimeDelta::try_seconds(n)
                    .and_then(|delta| now.checked_add_signed(delta))
                    .unwrap_or(if n < 0 { DateTime::<Utc>::MIN_UTC } else { DateTime::<Utc>::MAX_UTC });
                (at, n)
            }
            ExpiryAmount::At(at) => (at, (at - now).num_seconds()),
        };
        let mut directives = self.directives.clone();
        directives.push(CacheDirective::MaxAge(max_age.max(0) as u64));
        (at, cache_control_value(&directives))
    }
}

pub struct ControllerSetup {
    name: String,
    state: SetupState,
    declared: Vec<String>,
    targets: ActionSet,
    pub(crate) content_type: AttributeSlot<String>,
    pub(crate) charset: AttributeSlot<String>,
    pub(crate) cache_control: AttributeSlot<Vec<CacheDirective>>,
    pub(crate) expires: AttributeSlot<Expiry>,
    pub(crate) formats: AttributeSlot<Vec<String>>,
    pub(crate) cache_pool: AttributeSlot<ValuePool>,
    pub(crate) view: ViewSettings,
    pub(crate) hooks: HookRegistry<Hook>,
    pub(crate) auth: AuthRegistry,
    pub(crate) errors: ErrorHandlerRegistry,
}

impl ControllerSetup {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            state: SetupState::Open,
            declared: vec![],
            targets: ActionSet::All,
            content_type: AttributeSlot::new(),
            charset: AttributeSlot::new(),
            cache_control: AttributeSlot::new(),
            expires: AttributeSlot::new(),
            formats: AttributeSlot::new(),
            cache_pool: AttributeSlot::new(),
            view: ViewSettings::new(),
            hooks: HookRegistry::new(),
            auth: AuthRegistry::new(),
            errors: ErrorHandlerRegistry::new(),
        }
    }

    pub fn controller_name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> SetupState {
        self.state
    }

    pub fn declared_actions(&self) -> &[String] {
        &self.declared
    }

    // --- 状态迁移 ---

    pub(crate) fn declare_action(&mut self, name: &str) -> SetupResult {
        self.ensure_open("action")?;
        if !self.declared.iter().any(|a| a == name) {
            self.declared.push(name.to_string());
        }
        Ok(())
    }

    /// Open → Mounting，只能发生一次
    pub fn begin_mount(&mut self) -> SetupResult {
        match self.state {
            SetupState::Open => {
                self.state = SetupState::Mounting;
                self.targets = ActionSet::All;
                debug!("{}开始挂载", self.name);
                Ok(())
            }
            _ => Err(Exception::AlreadyMounted(self.name.clone())),
        }
    }

    /// 进入 Locked 状态，此后不再接受任何声明
    pub fn lock(&mut self) {
        self.state = SetupState::Locked;
        self.targets = ActionSet::All;
        debug!("{}已锁定", self.name);
    }

    fn ensure_open(&self, what: &str) -> SetupResult {
        match self.state {
            SetupState::Locked => {
                warn!("{}已锁定，忽略对{}的修改", self.name, what);
                Err(Exception::SetupLocked(self.name.clone()))
            }
            SetupState::Open | SetupState::Mounting => Ok(()),
        }
    }

    // 检查状态并计算当前作用的描述符
    fn writable_targets(&self, what: &str) -> Result<Vec<ActionDescriptor>, Exception> {
        self.ensure_open(what)?;
        let targets = self.targets.resolve(&self.declared);
        debug!(
            "{}[{:?}]设置{}，目标：{:?}",
            self.name,
            self.state,
            what,
            targets.iter().map(|t| t.to_string()).collect::<Vec<_>>()
        );
        Ok(targets)
    }

    // --- 作用域 ---

    /// 在给定 action 上执行声明，空列表表示所有 action
    pub fn setup<F>(&mut self, actions: &[&str], f: F) -> SetupResult
    where
        F: FnOnce(&mut Self) -> SetupResult,
    {
        self.scoped(ActionSet::from_names(actions), f)
    }

    /// 在名称匹配正则的、此刻已声明的 action 上执行声明
    pub fn setup_matching<F>(&mut self, pattern: Regex, f: F) -> SetupResult
    where
        F: FnOnce(&mut Self) -> SetupResult,
    {
        self.scoped(ActionSet::Matching(pattern), f)
    }

    fn scoped<F>(&mut self, targets: ActionSet, f: F) -> SetupResult
    where
        F: FnOnce(&mut Self) -> SetupResult,
    {
        self.ensure_open("setup")?;
        let previous = std::mem::replace(&mut self.targets, targets);
        let result = f(self);
        self.targets = previous;
        result
    }

    // --- 响应头属性 ---

    pub fn content_type(&mut self, content_type: &str) -> SetupResult {
        self.set_content_type(content_type, true)
    }

    pub fn force_content_type(&mut self, content_type: &str) -> SetupResult {
        self.set_content_type(content_type, false)
    }

    fn set_content_type(&mut self, content_type: &str, keep: bool) -> SetupResult {
        let targets = self.writable_targets("content_type")?;
        let value = resolve_content_type(content_type);
        self.content_type.set(&targets, value, keep);
        Ok(())
    }

    pub fn charset(&mut self, charset: &str) -> SetupResult {
        self.set_charset(charset, true)
    }

    pub fn force_charset(&mut self, charset: &str) -> SetupResult {
        self.set_charset(charset, false)
    }

    fn set_charset(&mut self, charset: &str, keep: bool) -> SetupResult {
        let targets = self.writable_targets("charset")?;
        self.charset.set(&targets, charset.to_string(), keep);
        Ok(())
    }

    pub fn cache_control(&mut self, directives: &[CacheDirective]) -> SetupResult {
        self.set_cache_control(directives, true)
    }

    pub fn force_cache_control(&mut self, directives: &[CacheDirective]) -> SetupResult {
        self.set_cache_control(directives, false)
    }

    fn set_cache_control(&mut self, directives: &[CacheDirective], keep: bool) -> SetupResult {
        let targets = self.writable_targets("cache_control")?;
        self.cache_control.set(&targets, directives.to_vec(), keep);
        Ok(())
    }

    pub fn expires(&mut self, amount: ExpiryAmount, directives: &[CacheDirective]) -> SetupResult {
        self.set_expires(amount, directives, true)
    }

    pub fn force_expires(&mut self, amount: ExpiryAmount, directives: &[CacheDirective]) -> SetupResult {
        self.set_expires(amount, directives, false)
    }

    fn set_expires(&mut self, amount: ExpiryAmount, directives: &[CacheDirective], keep: bool) -> SetupResult {
        let targets = self.writable_targets("expires")?;
        self.expires.set(&targets, Expiry::new(amount, directives), keep);
        Ok(())
    }

    /// 声明 action 接受的格式后缀，如 `.json`
    pub fn formats(&mut self, formats: &[&str]) -> SetupResult {
        self.set_formats(formats, true)
    }

    pub fn force_formats(&mut self, formats: &[&str]) -> SetupResult {
        self.set_formats(formats, false)
    }

    fn set_formats(&mut self, formats: &[&str], keep: bool) -> SetupResult {
        let targets = self.writable_targets("formats")?;
        let formats: Vec<String> = formats
            .iter()
            .map(|f| {
                if f.starts_with('.') {
                    f.to_string()
                } else {
                    format!(".{}", f)
                }
            })
            .collect();
        self.formats.set(&targets, formats, keep);
        Ok(())
    }

    // --- 视图 ---

    pub fn engine(&mut self, name: &str, options: &[&str]) -> SetupResult {
        self.set_engine(name, options, true)
    }

    pub fn force_engine(&mut self, name: &str, options: &[&str]) -> SetupResult {
        self.set_engine(name, options, false)
    }

    fn set_engine(&mut self, name: &str, options: &[&str], keep: bool) -> SetupResult {
        let targets = self.writable_targets("engine")?;
        if engine_by_name(name).is_none() {
            return Err(Exception::UnknownEngine(name.to_string()));
        }
        let binding = EngineBinding {
            name: name.to_string(),
            options: options.iter().map(|o| o.to_string()).collect(),
        };
        self.view.engine.set(&targets, binding, keep);
        Ok(())
    }

    pub fn engine_ext(&mut self, ext: &str) -> SetupResult {
        self.set_engine_ext(ext, true)
    }

    pub fn force_engine_ext(&mut self, ext: &str) -> SetupResult {
        self.set_engine_ext(ext, false)
    }

    fn set_engine_ext(&mut self, ext: &str, keep: bool) -> SetupResult {
        let targets = self.writable_targets("engine_ext")?;
        let ext = if ext.starts_with('.') {
            ext.to_string()
        } else {
            format!(".{}", ext)
        };
        self.view.engine_ext.set(&targets, ext, keep);
        Ok(())
    }

    /// 带格式后缀的目标（如 `index.json`）会把后缀追加到布局名上
    pub fn layout(&mut self, name: &str) -> SetupResult {
        self.set_layout(Some(name), true)
    }

    pub fn force_layout(&mut self, name: &str) -> SetupResult {
        self.set_layout(Some(name), false)
    }

    /// 明确禁用布局，与未设置不同
    pub fn no_layout(&mut self) -> SetupResult {
        self.set_layout(None, true)
    }

    pub fn force_no_layout(&mut self) -> SetupResult {
        self.set_layout(None, false)
    }

    fn set_layout(&mut self, name: Option<&str>, keep: bool) -> SetupResult {
        let targets = self.writable_targets("layout")?;
        self.view.layout.set_with(&targets, keep, |target| match (name, target.format()) {
            (Some(name), Some(format)) => Layout::Named(format!("{}{}", name, format)),
            (Some(name), None) => Layout::Named(name.to_string()),
            (None, _) => Layout::Disabled,
        });
        Ok(())
    }

    pub fn inline_layout(&mut self, source: &str) -> SetupResult {
        self.set_inline_layout(source, true)
    }

    pub fn force_inline_layout(&mut self, source: &str) -> SetupResult {
        self.set_inline_layout(source, false)
    }

    fn set_inline_layout(&mut self, source: &str, keep: bool) -> SetupResult {
        let targets = self.writable_targets("inline_layout")?;
        self.view
            .layout
            .set(&targets, Layout::Inline(source.to_string()), keep);
        Ok(())
    }

    pub fn view_path(&mut self, path: &str) -> SetupResult {
        self.set_view_path(path, true)
    }

    pub fn force_view_path(&mut self, path: &str) -> SetupResult {
        self.set_view_path(path, false)
    }

    fn set_view_path(&mut self, path: &str, keep: bool) -> SetupResult {
        let targets = self.writable_targets("view_path")?;
        self.view.view_path.set(&targets, path.to_string(), keep);
        Ok(())
    }

    /// 绝对路径的视图根目录，优先于 view_path
    pub fn view_fullpath(&mut self, path: &str) -> SetupResult {
        self.set_view_fullpath(path, true)
    }

    pub fn force_view_fullpath(&mut self, path: &str) -> SetupResult {
        self.set_view_fullpath(path, false)
    }

    fn set_view_fullpath(&mut self, path: &str, keep: bool) -> SetupResult {
        let targets = self.writable_targets("view_fullpath")?;
        self.view.view_fullpath.set(&targets, path.to_string(), keep);
        Ok(())
    }

    pub fn layouts_path(&mut self, path: &str) -> SetupResult {
        self.set_layouts_path(path, true)
    }

    pub fn force_layouts_path(&mut self, path: &str) -> SetupResult {
        self.set_layouts_path(path, false)
    }

    fn set_layouts_path(&mut self, path: &str, keep: bool) -> SetupResult {
        let targets = self.writable_targets("layouts_path")?;
        self.view.layouts_path.set(&targets, path.to_string(), keep);
        Ok(())
    }

    // --- 缓存池 ---

    pub fn compiler_pool(&mut self, pool: CompilerPool) -> SetupResult {
        self.set_compiler_pool(pool, true)
    }

    pub fn force_compiler_pool(&mut self, pool: CompilerPool) -> SetupResult {
        self.set_compiler_pool(pool, false)
    }

    fn set_compiler_pool(&mut self, pool: CompilerPool, keep: bool) -> SetupResult {
        let targets = self.writable_targets("compiler_pool")?;
        self.view.compiler_pool.set(&targets, pool, keep);
        Ok(())
    }

    pub fn cache_pool(&mut self, pool: ValuePool) -> SetupResult {
        self.set_cache_pool(pool, true)
    }

    pub fn force_cache_pool(&mut self, pool: ValuePool) -> SetupResult {
        self.set_cache_pool(pool, false)
    }

    fn set_cache_pool(&mut self, pool: ValuePool, keep: bool) -> SetupResult {
        let targets = self.writable_targets("cache_pool")?;
        self.cache_pool.set(&targets, pool, keep);
        Ok(())
    }

    // --- Hook ---

    pub fn before<F>(&mut self, f: F) -> SetupResult
    where
        F: for<'a> Fn(&mut crate::controller::Context<'a>) -> crate::exception::ActionResult<()>
            + Send
            + Sync
            + 'static,
    {
        self.add_hook(Position::Before, 0, Arc::new(f))
    }

    pub fn after<F>(&mut self, f: F) -> SetupResult
    where
        F: for<'a> Fn(&mut crate::controller::Context<'a>) -> crate::exception::ActionResult<()>
            + Send
            + Sync
            + 'static,
    {
        self.add_hook(Position::After, 0, Arc::new(f))
    }

    /// 优先级高的先执行，同优先级按登记顺序
    pub fn before_with_priority<F>(&mut self, priority: i32, f: F) -> SetupResult
    where
        F: for<'a> Fn(&mut crate::controller::Context<'a>) -> crate::exception::ActionResult<()>
            + Send
            + Sync
            + 'static,
    {
        self.add_hook(Position::Before, priority, Arc::new(f))
    }

    pub fn after_with_priority<F>(&mut self, priority: i32, f: F) -> SetupResult
    where
        F: for<'a> Fn(&mut crate::controller::Context<'a>) -> crate::exception::ActionResult<()>
            + Send
            + Sync
            + 'static,
    {
        self.add_hook(Position::After, priority, Arc::new(f))
    }

    fn add_hook(&mut self, position: Position, priority: i32, hook: Hook) -> SetupResult {
        let targets = self.writable_targets("hook")?;
        self.hooks.add(position, priority, &targets, hook);
        Ok(())
    }

    // --- 认证 ---

    /// Basic 认证，realm 默认为 `AccessRestricted`
    pub fn auth<F>(&mut self, check: F) -> SetupResult
    where
        F: Fn(&str, &str) -> bool + Send + Sync + 'static,
    {
        self.basic_auth(None, check)
    }

    pub fn basic_auth<F>(&mut self, realm: Option<&str>, check: F) -> SetupResult
    where
        F: Fn(&str, &str) -> bool + Send + Sync + 'static,
    {
        let challenge = BasicChallenge::new(realm, Arc::new(check));
        self.restrict(Arc::new(challenge), true)
    }

    pub fn force_basic_auth<F>(&mut self, realm: Option<&str>, check: F) -> SetupResult
    where
        F: Fn(&str, &str) -> bool + Send + Sync + 'static,
    {
        let challenge = BasicChallenge::new(realm, Arc::new(check));
        self.restrict(Arc::new(challenge), false)
    }

    /// 查找函数按 `passwords_hashed` 返回明文密码或 md5("user:realm:password")
    pub fn digest_auth<F>(&mut self, options: DigestOptions, lookup: F) -> SetupResult
    where
        F: Fn(&str) -> Option<String> + Send + Sync + 'static,
    {
        let challenge = DigestChallenge::new(options, Arc::new(lookup));
        self.restrict(Arc::new(challenge), true)
    }

    pub fn force_digest_auth<F>(&mut self, options: DigestOptions, lookup: F) -> SetupResult
    where
        F: Fn(&str) -> Option<String> + Send + Sync + 'static,
    {
        let challenge = DigestChallenge::new(options, Arc::new(lookup));
        self.restrict(Arc::new(challenge), false)
    }

    /// 绑定任意实现了 [`Challenge`] 的质询
    pub fn restrict(&mut self, challenge: Arc<dyn Challenge>, keep: bool) -> SetupResult {
        let scheme = challenge.scheme();
        let targets = self.writable_targets(match scheme {
            Scheme::Basic => "basic_auth",
            Scheme::Digest => "digest_auth",
        })?;
        self.auth
            .restrict(&targets, AuthRestriction::new(challenge), keep);
        Ok(())
    }

    // --- 错误处理器 ---

    pub fn error(&mut self, status: u16, handler: Handler) -> SetupResult {
        self.set_error(status, handler, true)
    }

    pub fn force_error(&mut self, status: u16, handler: Handler) -> SetupResult {
        self.set_error(status, handler, false)
    }

    fn set_error(&mut self, status: u16, handler: Handler, keep: bool) -> SetupResult {
        let targets = self.writable_targets("error")?;
        if let Handler::Action(action) = &handler {
            if !self.declared.iter().any(|a| a == action) {
                return Err(Exception::UnknownHandlerAction {
                    status,
                    action: action.clone(),
                });
            }
        }
        self.errors.register(status, &targets, handler, keep);
        Ok(())
    }
}

/// 以 `.` 开头的值按扩展名查 MIME 表
fn resolve_content_type(content_type: &str) -> String {
    if content_type.starts_with('.') {
        match mime_type(content_type) {
            Some(mime) => mime.to_string(),
            None => {
                warn!("未知的扩展名{}，原样作为Content-Type", content_type);
                content_type.to_string()
            }
        }
    } else {
        content_type.to_string()
    }
}

// --- 查询 ---

impl ControllerSetup {
    pub fn charset_for(&self, action: &str) -> Option<&str> {
        self.charset
            .get(&ActionDescriptor::parse(action))
            .map(String::as_str)
    }

    pub fn content_type_for(&self, action: &str) -> Option<&str> {
        self.content_type
            .get(&ActionDescriptor::parse(action))
            .map(String::as_str)
    }

    pub fn cache_control_for(&self, action: &str) -> Option<&[CacheDirective]> {
        self.cache_control
            .get(&ActionDescriptor::parse(action))
            .map(Vec::as_slice)
    }

    pub fn layout_for(&self, action: &str) -> Option<&Layout> {
        self.view.layout(&ActionDescriptor::parse(action))
    }

    pub fn engine_for(&self, action: &str) -> Option<&str> {
        self.view
            .engine(&ActionDescriptor::parse(action))
            .map(|b| b.name.as_str())
    }

    pub fn formats_for(&self, action: &str) -> &[String] {
        self.formats
            .get(&ActionDescriptor::parse(action))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn hook_count(&self, position: Position, action: &str) -> usize {
        self.hooks.len(position, &ActionDescriptor::parse(action))
    }

    pub fn auth_scheme_for(&self, action: &str) -> Option<Scheme> {
        self.auth
            .restriction(&ActionDescriptor::parse(action))
            .map(|r| r.scheme())
    }

    pub fn has_error_handler(&self, status: u16, action: &str) -> bool {
        self.errors
            .lookup(status, &ActionDescriptor::parse(action))
            .is_some()
    }
}
