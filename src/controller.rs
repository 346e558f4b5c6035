// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 控制器与请求上下文
//!
//! `Controller` 持有 action 闭包与声明式配置，挂载后以 `Arc<Controller>` 的形式
//! 被多个工作线程并发只读访问。每个请求创建一个 `Context`，按以下顺序分发：
//!
//! 1. 解析 action 与格式后缀（带动词前缀的 action 优先）；
//! 2. 认证检查，质询失败时直接返回质询响应，hook 与 action 都不执行；
//! 3. 写入配置的响应头（Cache-Control、Expires、Content-Type + charset）；
//! 4. 依次执行 before hook 与 action 本体；
//! 5. 出错时查找错误处理器，运行期失败没有 500 处理器时向调用方传播；
//! 6. 响应由 action 或错误处理器产生后执行 after hook，`Halt` 的响应原样发送。

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use lazy_static::lazy_static;
use log::{debug, error, info, warn};
use regex::Regex;

use crate::{
    action::ActionDescriptor,
    auth::Verdict,
    cache::{pool_with_capacity, CacheKey},
    error_handler::Handler,
    exception::{ActionError, ActionResult, Exception},
    hook::Position,
    param::{mime_type, HttpRequestMethod, DEFAULT_CONTENT_TYPE, INDEX_ACTION},
    request::Request,
    response::Response,
    setup::{cache_control_value, CacheDirective, ControllerSetup, Expiry, ExpiryAmount, ValuePool},
    util::{http_date, parse_http_date, HtmlBuilder},
    view::{RenderOptions, ViewScope},
};

pub type ActionFn = Arc<dyn for<'a> Fn(&mut Context<'a>) -> ActionResult<String> + Send + Sync>;
pub type Hook = Arc<dyn for<'a> Fn(&mut Context<'a>) -> ActionResult<()> + Send + Sync>;

lazy_static! {
    static ref DEFAULT_VALUE_POOL: ValuePool = pool_with_capacity(0);
}

pub struct Controller {
    name: String,
    base_url: String,
    app_root: String,
    actions: Vec<(String, ActionFn)>,
    setup: ControllerSetup,
}

impl Controller {
    /// 默认挂载在 `/<小写名称>`
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            base_url: format!("/{}", name.to_lowercase()),
            app_root: "./".to_string(),
            actions: vec![],
            setup: ControllerSetup::new(name),
        }
    }

    pub fn map(mut self, base_url: &str) -> Self {
        self.base_url = normalize_base_url(base_url);
        self
    }

    /// 在现有 base_url 前加上根路径
    pub fn remap(mut self, root: &str) -> Self {
        self.base_url = normalize_base_url(&format!("{}/{}", root, self.base_url));
        self
    }

    /// 声明一个 action，`post_login` 这样的名称只响应对应的 HTTP 方法
    pub fn action<F>(mut self, name: &str, f: F) -> Self
    where
        F: for<'a> Fn(&mut Context<'a>) -> ActionResult<String> + Send + Sync + 'static,
    {
        if let Err(e) = self.setup.declare_action(name) {
            warn!("无法声明action {}：{}", name, e);
            return self;
        }
        self.actions.retain(|(n, _)| n != name);
        self.actions.push((name.to_string(), Arc::new(f)));
        self
    }

    /// 在控制器层执行声明，默认作用于所有 action
    pub fn configure<F>(mut self, f: F) -> Result<Self, Exception>
    where
        F: FnOnce(&mut ControllerSetup) -> crate::exception::SetupResult,
    {
        f(&mut self.setup)?;
        Ok(self)
    }

    pub(crate) fn setup_mut(&mut self) -> &mut ControllerSetup {
        &mut self.setup
    }

    pub(crate) fn set_app_root(&mut self, app_root: &str) {
        self.app_root = app_root.to_string();
    }

    fn find_action(&self, name: &str) -> Option<&ActionFn> {
        self.actions.iter().find(|(n, _)| n == name).map(|(_, f)| f)
    }

    fn has_action(&self, name: &str) -> bool {
        self.find_action(name).is_some()
    }

    // 带动词前缀的 action 优先，HEAD 请求也可以由 get_ 前缀的 action 响应
    fn action_for(&self, method: HttpRequestMethod, name: &str) -> Option<String> {
        let mut verbs = vec![method.verb_prefix()];
        if method == HttpRequestMethod::Head {
            verbs.push(HttpRequestMethod::Get.verb_prefix());
        }
        for verb in verbs {
            let candidate = format!("{}_{}", verb, name);
            if self.has_action(&candidate) {
                return Some(candidate);
            }
        }
        if self.has_action(name) {
            Some(name.to_string())
        } else {
            None
        }
    }

    /// 把 base_url 之后的路径解析为 (描述符, 位置参数)。
    ///
    /// `index.json` 只有在 `.json` 被声明为该 action 的格式时才拆分。
    fn resolve(&self, method: HttpRequestMethod, rest: &str) -> Option<(ActionDescriptor, Vec<String>)> {
        let segments: Vec<String> = rest
            .split('/')
            .filter(|s| !s.is_empty())
            .map(|s| match urlencoding::decode(s) {
                Ok(decoded) => decoded.into_owned(),
                Err(_) => s.to_string(),
            })
            .collect();
        let first = match segments.first() {
            Some(first) => first,
            None => {
                return self
                    .action_for(method, INDEX_ACTION)
                    .map(|a| (ActionDescriptor::bare(&a), vec![]))
            }
        };
        let params = segments[1..].to_vec();
        if let Some(action) = self.action_for(method, first) {
            return Some((ActionDescriptor::bare(&action), params));
        }
        let (name, format) = first.split_once('.')?;
        let action = self.action_for(method, name)?;
        let descriptor = ActionDescriptor::bare(&action).with_format(Some(format));
        let declared = self
            .setup
            .formats
            .get(&descriptor)
            .map_or(false, |formats| formats.iter().any(|f| Some(f.as_str()) == descriptor.format()));
        if declared {
            Some((descriptor, params))
        } else {
            None
        }
    }

    /// 处理 base_url 之后的路径
    pub fn call(&self, request: &Request, rest: &str, id: u128) -> Result<Response, Exception> {
        match self.resolve(request.method(), rest) {
            Some((descriptor, params)) => {
                debug!("[ID{}]{} {}由{}#{}处理", id, request.method(), request.path(), self.name, descriptor);
                self.dispatch(request, descriptor, params, id)
            }
            None => {
                info!("[ID{}]{}中没有与{}匹配的action", id, self.name, request.path());
                Ok(Response::from_status_code(404, None))
            }
        }
    }

    pub(crate) fn dispatch(
        &self,
        request: &Request,
        descriptor: ActionDescriptor,
        params: Vec<String>,
        id: u128,
    ) -> Result<Response, Exception> {
        let action = match self.find_action(descriptor.name()) {
            Some(a) => a,
            None => {
                return Err(Exception::ActionFailed(format!(
                    "{}#{} is not declared",
                    self.name,
                    descriptor.name()
                )))
            }
        };
        let mut ctx = Context::new(self, request, descriptor, params, id);

        if let Some(verdict) = self.setup.auth.check(&ctx.descriptor, request) {
            match verdict {
                Verdict::Challenged(response) => {
                    info!(
                        "[ID{}]{}#{}认证未通过，返回{}",
                        id,
                        self.name,
                        ctx.descriptor,
                        response.status_code()
                    );
                    return Ok(response);
                }
                Verdict::Passed(user) => ctx.user = Some(user),
            }
        }

        ctx.apply_configured_headers();

        let outcome = match ctx.run_hooks(Position::Before) {
            Ok(()) => action(&mut ctx),
            Err(e) => Err(e),
        };

        match outcome {
            Ok(body) => {
                ctx.response.set_body(body);
            }
            Err(ActionError::Halt(response)) => return Ok(response),
            Err(e) => {
                let status = match &e {
                    ActionError::Status { status, .. } => *status,
                    _ => 500,
                };
                match self.setup.errors.lookup(status, &ctx.descriptor) {
                    Some(handler) => {
                        warn!("[ID{}]{}#{}出错（{}），交给{}处理器", id, self.name, ctx.descriptor, e, status);
                        ctx.response.set_code(status);
                        match ctx.invoke_handler(handler, &e) {
                            Ok(body) => {
                                ctx.response.set_body(body);
                            }
                            Err(ActionError::Halt(response)) => return Ok(response),
                            Err(inner) => {
                                error!("[ID{}]{}处理器本身出错：{}", id, status, inner);
                                return Err(Exception::ActionFailed(inner.message()));
                            }
                        }
                    }
                    None => match e {
                        ActionError::Status { status, message } => {
                            ctx.response
                                .set_code(status)
                                .set_content_type("text/html;charset=utf-8")
                                .set_body(HtmlBuilder::from_status_code(status, message.as_deref()).build());
                        }
                        other => {
                            error!("[ID{}]{}#{}执行失败且没有500处理器：{}", id, self.name, ctx.descriptor, other);
                            return Err(Exception::ActionFailed(other.message()));
                        }
                    },
                }
            }
        }

        match ctx.run_hooks(Position::After) {
            Ok(()) => Ok(ctx.response),
            Err(ActionError::Halt(response)) => Ok(response),
            Err(e) => {
                error!("[ID{}]after hook执行失败：{}", id, e);
                Err(Exception::ActionFailed(e.message()))
            }
        }
    }

    /// action 对应的 URL，动词前缀被去掉，`index` 对应 base_url 本身
    pub fn route(&self, action: &str, params: &[&str]) -> String {
        let name = route_name(action);
        let mut parts: Vec<&str> = vec![];
        if !(name == INDEX_ACTION && params.is_empty()) {
            parts.push(name);
        }
        parts.extend_from_slice(params);
        let base = self.base_url.trim_end_matches('/');
        if parts.is_empty() {
            if base.is_empty() {
                "/".to_string()
            } else {
                base.to_string()
            }
        } else {
            format!("{}/{}", base, parts.join("/"))
        }
    }
}

// --- Getter 访问器实现 ---

impl Controller {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn setup(&self) -> &ControllerSetup {
        &self.setup
    }

    pub fn action_names(&self) -> Vec<&str> {
        self.actions.iter().map(|(n, _)| n.as_str()).collect()
    }
}

fn normalize_base_url(base_url: &str) -> String {
    let trimmed = crate::util::normalize_path(&format!("/{}", base_url));
    let trimmed = trimmed.trim_end_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else {
        trimmed.to_string()
    }
}

fn route_name(action: &str) -> &str {
    for method in HttpRequestMethod::all() {
        if let Some(rest) = action
            .strip_prefix(method.verb_prefix())
            .and_then(|r| r.strip_prefix('_'))
        {
            if !rest.is_empty() {
                return rest;
            }
        }
    }
    action
}

fn etag_matches(list: &str, tag: &str) -> bool {
    list.split(',').map(str::trim).any(|t| t == "*" || t == tag)
}

/// 单次请求的处理上下文
pub struct Context<'a> {
    controller: &'a Controller,
    request: &'a Request,
    id: u128,
    descriptor: ActionDescriptor,
    params: Vec<String>,
    response: Response,
    user: Option<String>,
    content_type: String,
    // 显式设置的 charset 在之后修改 Content-Type 时仍然保留
    charset: Option<String>,
    vars: HashMap<String, String>,
}

impl<'a> Context<'a> {
    fn new(
        controller: &'a Controller,
        request: &'a Request,
        descriptor: ActionDescriptor,
        params: Vec<String>,
        id: u128,
    ) -> Self {
        Self {
            controller,
            request,
            id,
            descriptor,
            params,
            response: Response::new(),
            user: None,
            content_type: DEFAULT_CONTENT_TYPE.to_string(),
            charset: None,
            vars: HashMap::new(),
        }
    }

    fn run_hooks(&mut self, position: Position) -> ActionResult<()> {
        let controller = self.controller;
        for hook in controller.setup.hooks.query(position, &self.descriptor) {
            hook(self)?;
        }
        Ok(())
    }

    fn invoke_handler(&mut self, handler: &Handler, error: &ActionError) -> ActionResult<String> {
        match handler {
            Handler::Plain(f) => f(self),
            Handler::WithError(f) => f(self, error),
            Handler::Action(name) => match self.controller.find_action(name) {
                Some(action) => action(self),
                None => Err(ActionError::failed(format!("handler action {} is not declared", name))),
            },
        }
    }

    fn apply_configured_headers(&mut self) {
        let controller = self.controller;
        let setup = &controller.setup;
        if let Some(directives) = setup.cache_control.get(&self.descriptor) {
            self.response
                .set_header("Cache-Control", &cache_control_value(directives));
        }
        if let Some(expiry) = setup.expires.get(&self.descriptor) {
            self.apply_expiry(expiry);
        }
        self.content_type = match self.descriptor.format().and_then(mime_type) {
            Some(mime) => mime.to_string(),
            None => setup
                .content_type
                .get(&self.descriptor)
                .cloned()
                .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string()),
        };
        self.refresh_content_type();
    }

    fn apply_expiry(&mut self, expiry: &Expiry) {
        let (at, cache_control) = expiry.resolve(Utc::now());
        self.response
            .set_header("Expires", &http_date(&at))
            .set_header("Cache-Control", &cache_control);
    }

    fn refresh_content_type(&mut self) {
        let controller = self.controller;
        let charset = self
            .charset
            .clone()
            .or_else(|| controller.setup.charset.get(&self.descriptor).cloned());
        let value = match charset {
            Some(charset) => {
                let base = self.content_type.split(';').next().unwrap_or("").trim();
                format!("{}; charset={}", base, charset)
            }
            None => self.content_type.clone(),
        };
        self.response.set_content_type(&value);
    }

    fn halt_status(&self, status: u16) -> ActionError {
        let mut response = self.response.clone();
        response.set_code(status).set_body("");
        ActionError::Halt(response)
    }

    fn value_pool(&self) -> ValuePool {
        match self.controller.setup.cache_pool.get(&self.descriptor) {
            Some(pool) => Arc::clone(pool),
            None => Arc::clone(&DEFAULT_VALUE_POOL),
        }
    }

    fn view(&self) -> ViewScope<'_> {
        let controller = self.controller;
        ViewScope::new(
            &controller.setup.view,
            &self.descriptor,
            &controller.name,
            &controller.app_root,
            &controller.base_url,
        )
    }

    // --- 请求信息 ---

    pub fn request(&self) -> &Request {
        self.request
    }

    pub fn id(&self) -> u128 {
        self.id
    }

    pub fn controller_name(&self) -> &str {
        &self.controller.name
    }

    pub fn action(&self) -> &str {
        self.descriptor.name()
    }

    pub fn format(&self) -> Option<&str> {
        self.descriptor.format()
    }

    pub fn descriptor(&self) -> &ActionDescriptor {
        &self.descriptor
    }

    /// 路径中 action 之后的位置参数
    pub fn params(&self) -> &[String] {
        &self.params
    }

    pub fn param(&self, index: usize) -> Option<&str> {
        self.params.get(index).map(String::as_str)
    }

    /// 查询字符串与表单参数
    pub fn query(&self, name: &str) -> Option<&str> {
        self.request.param(name)
    }

    /// 认证通过后的用户名
    pub fn user(&self) -> Option<&str> {
        self.user.as_deref()
    }

    pub fn accepts(&self, mime: &str) -> bool {
        match self.request.accept() {
            Some(accept) => accept
                .split(',')
                .map(|t| t.split(';').next().unwrap_or("").trim())
                .any(|t| t == mime || t == "*/*"),
            None => false,
        }
    }

    // --- 请求内变量，同时作为渲染的默认局部变量 ---

    pub fn var(&self, name: &str) -> Option<&str> {
        self.vars.get(name).map(String::as_str)
    }

    pub fn set_var(&mut self, name: &str, value: &str) {
        self.vars.insert(name.to_string(), value.to_string());
    }

    // --- 响应 ---

    pub fn response(&self) -> &Response {
        &self.response
    }

    pub fn response_mut(&mut self) -> &mut Response {
        &mut self.response
    }

    pub fn set_status(&mut self, status: u16) {
        self.response.set_code(status);
    }

    pub fn set_header(&mut self, name: &str, value: &str) {
        self.response.set_header(name, value);
    }

    /// 替换响应体，通常在 after hook 中使用
    pub fn set_body(&mut self, body: &str) {
        self.response.set_body(body.to_string());
    }

    /// `.json` 这样的值按 MIME 表解析
    pub fn set_content_type(&mut self, content_type: &str) {
        self.content_type = if content_type.starts_with('.') {
            mime_type(content_type)
                .unwrap_or(content_type)
                .to_string()
        } else {
            content_type.to_string()
        };
        self.refresh_content_type();
    }

    pub fn set_charset(&mut self, charset: &str) {
        self.charset = Some(charset.to_string());
        self.refresh_content_type();
    }

    pub fn set_cache_control(&mut self, directives: &[CacheDirective]) {
        self.response
            .set_header("Cache-Control", &cache_control_value(directives));
    }

    pub fn set_expires(&mut self, amount: ExpiryAmount, directives: &[CacheDirective]) {
        self.apply_expiry(&Expiry::new(amount, directives));
    }

    /// 设置 Last-Modified，并按条件请求头决定是否以 304 / 412 结束
    pub fn last_modified(&mut self, time: DateTime<Utc>) -> ActionResult<()> {
        self.response.set_header("Last-Modified", &http_date(&time));
        if self.request.header("if-none-match").is_some() {
            return Ok(());
        }
        let modified = time.timestamp();
        if self.response.status_code() == 200 {
            if let Some(since) = self.request.header("if-modified-since").and_then(parse_http_date) {
                if since.timestamp() >= modified {
                    return Err(self.halt_status(304));
                }
            }
        }
        if let Some(since) = self.request.header("if-unmodified-since").and_then(parse_http_date) {
            if since.timestamp() < modified {
                return Err(self.halt_status(412));
            }
        }
        Ok(())
    }

    /// 设置 ETag，并按 If-None-Match / If-Match 决定是否以 304 / 412 结束
    pub fn etag(&mut self, value: &str, weak: bool) -> ActionResult<()> {
        let tag = format!("{}\"{}\"", if weak { "W/" } else { "" }, value);
        self.response.set_header("ETag", &tag);
        if !(200..300).contains(&self.response.status_code()) {
            return Ok(());
        }
        if let Some(none_match) = self.request.header("if-none-match") {
            if etag_matches(none_match, &tag) {
                let status = if self.request.method().is_safe() { 304 } else { 412 };
                return Err(self.halt_status(status));
            }
        }
        if let Some(if_match) = self.request.header("if-match") {
            if !etag_matches(if_match, &tag) {
                return Err(self.halt_status(412));
            }
        }
        Ok(())
    }

    // --- 控制流 ---

    /// 以给定状态码结束，经过错误处理器查找
    pub fn error<T>(&self, status: u16, message: Option<&str>) -> ActionResult<T> {
        Err(ActionError::status(status, message))
    }

    /// 立即发送当前响应，跳过剩余的处理流程
    pub fn halt<T>(&self, status: u16, body: &str) -> ActionResult<T> {
        let mut response = self.response.clone();
        response.set_code(status).set_body(body.to_string());
        Err(ActionError::Halt(response))
    }

    /// 用同一个请求调用本控制器的另一个 action，经过完整的认证与 hook 流程
    pub fn invoke(&self, action: &str, params: &[&str]) -> ActionResult<Response> {
        let params = params.iter().map(|p| p.to_string()).collect();
        self.controller
            .dispatch(self.request, ActionDescriptor::parse(action), params, self.id)
            .map_err(ActionError::from)
    }

    pub fn fetch(&self, action: &str, params: &[&str]) -> ActionResult<String> {
        self.invoke(action, params).map(|r| r.body_str())
    }

    /// 把控制权交给另一个 action，它的响应被直接发送
    pub fn pass<T>(&self, action: &str, params: &[&str]) -> ActionResult<T> {
        let response = self.invoke(action, params)?;
        Err(ActionError::Halt(response))
    }

    pub fn route(&self, action: &str, params: &[&str]) -> String {
        self.controller.route(action, params)
    }

    // --- 计算值缓存 ---

    /// 没有给出键时以调用位置为键
    #[track_caller]
    pub fn cache<F>(&self, key: Option<CacheKey>, mut make: F) -> ActionResult<String>
    where
        F: FnMut() -> String,
    {
        let key = match key {
            Some(key) => key,
            None => CacheKey::here(),
        };
        let pool = self.value_pool();
        Ok(pool.get_or_create(&key, &mut || Ok(make()))?)
    }

    /// 空列表清空整个池
    pub fn clear_cache(&self, keys: &[CacheKey]) {
        let pool = self.value_pool();
        if keys.is_empty() {
            pool.invalidate_all();
        } else {
            for key in keys {
                pool.invalidate_exact(key);
            }
        }
    }

    pub fn clear_cache_like_prefix(&self, prefix: &[&str]) -> usize {
        let prefix: Vec<String> = prefix.iter().map(|s| s.to_string()).collect();
        self.value_pool().invalidate_prefix(&prefix)
    }

    pub fn clear_cache_like(&self, pattern: &Regex) -> usize {
        self.value_pool().invalidate_matching(pattern)
    }

    pub fn clear_cache_if<P>(&self, predicate: P) -> usize
    where
        P: Fn(&CacheKey) -> bool,
    {
        self.value_pool().invalidate_if(&predicate)
    }

    /// 使编译池中给定 id 的模板失效，空列表清空整个编译池
    pub fn update_compiler(&self, keys: &[CacheKey]) {
        let pool = self.controller.setup.view.compiler_pool(&self.descriptor);
        if keys.is_empty() {
            pool.invalidate_all();
        } else {
            for key in keys {
                pool.invalidate_exact(key);
            }
        }
    }

    // --- 渲染 ---

    /// 渲染与 action 同名的模板（去掉动词前缀，保留格式后缀，如 `index.json.tpl`），并套上布局
    pub fn render(&self, options: RenderOptions) -> ActionResult<String> {
        let name = format!(
            "{}{}",
            route_name(self.descriptor.name()),
            self.descriptor.format().unwrap_or("")
        );
        self.render_template(&name, options)
    }

    pub fn render_template(&self, name: &str, options: RenderOptions) -> ActionResult<String> {
        let options = options.with_default_locals(&self.vars);
        Ok(self.view().render(name, &options)?)
    }

    pub fn render_partial(&self, name: &str, options: RenderOptions) -> ActionResult<String> {
        let options = options.with_default_locals(&self.vars);
        Ok(self.view().render_partial(name, &options)?)
    }

    pub fn render_layout(&self, content: &str, options: RenderOptions) -> ActionResult<String> {
        let options = options.with_default_locals(&self.vars);
        Ok(self.view().render_layout(content, &options)?)
    }

    pub fn render_file(&self, file: &str, options: RenderOptions) -> ActionResult<String> {
        let options = options.with_default_locals(&self.vars);
        Ok(self.view().render_file(file, &options)?)
    }

    pub fn render_inline(&self, source: &str, options: RenderOptions) -> ActionResult<String> {
        let options = options.with_default_locals(&self.vars);
        Ok(self.view().render_inline(source, &options)?)
    }
}
