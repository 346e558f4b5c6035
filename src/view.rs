//! # 视图模块
//!
//! 负责为某个 action 解析 (引擎, 引擎参数, 模板路径, 布局路径)，并渲染模板。
//!
//! 解析优先级：
//! 1. 渲染调用时显式传入的参数（引擎、扩展名、布局、文件路径）；
//! 2. 该 action 的配置；
//! 3. 通配配置；
//! 4. 内置默认引擎，无布局。
//!
//! 布局路径 = 视图根目录 + layouts_path + 布局名 + 扩展名；
//! 模板路径 = 视图根目录 + 路由前缀 + 模板名 + 扩展名。

use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::sync::{Arc, RwLock};

use lazy_static::lazy_static;
use log::{debug, warn};
use regex::Regex;

use crate::{
    action::ActionDescriptor,
    attribute::AttributeSlot,
    cache::{fetch_or_build, pool_with_capacity, ArtifactKey, CacheKey, SharedPool},
    exception::Exception,
    util::{normalize_dir, normalize_path},
};

pub const INTERPOLATION: &str = "Interpolation";
pub const VERBATIM: &str = "Verbatim";

/// 编译后的模板实例
pub trait Template: Send + Sync {
    /// `content` 是布局中 `{{ yield }}` 的替换内容
    fn render(&self, locals: &HashMap<String, String>, content: Option<&str>) -> String;
}

/// 模板引擎适配器
pub trait Engine: Send + Sync {
    fn name(&self) -> &str;
    fn extensions(&self) -> Vec<String>;
    fn compile(&self, source: &str, options: &[String]) -> Result<Arc<dyn Template>, Exception>;
}

pub type CompilerPool = SharedPool<ArtifactKey, Arc<dyn Template>>;

lazy_static! {
    static ref PLACEHOLDER: Regex = Regex::new(r"\{\{\s*([\w.]+)\s*\}\}").unwrap();
    static ref ENGINES: RwLock<Vec<Arc<dyn Engine>>> = RwLock::new(vec![
        Arc::new(InterpolationEngine) as Arc<dyn Engine>,
        Arc::new(VerbatimEngine) as Arc<dyn Engine>,
    ]);
    static ref DEFAULT_COMPILER_POOL: CompilerPool = pool_with_capacity(0);
}

enum Segment {
    Text(String),
    Local(String),
    Yield,
}

struct InterpolationTemplate {
    segments: Vec<Segment>,
}

impl Template for InterpolationTemplate {
    fn render(&self, locals: &HashMap<String, String>, content: Option<&str>) -> String {
        let mut output = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Text(text) => output.push_str(text),
                Segment::Local(name) => {
                    if let Some(value) = locals.get(name) {
                        output.push_str(value);
                    }
                }
                Segment::Yield => output.push_str(content.unwrap_or("")),
            }
        }
        output
    }
}

/// 基础引擎：`{{ name }}` 替换为局部变量，`{{ yield }}` 替换为被包裹的内容
pub struct InterpolationEngine;

impl Engine for InterpolationEngine {
    fn name(&self) -> &str {
        INTERPOLATION
    }

    fn extensions(&self) -> Vec<String> {
        vec!["tpl".to_string(), "template".to_string()]
    }

    fn compile(&self, source: &str, _options: &[String]) -> Result<Arc<dyn Template>, Exception> {
        let mut segments = vec![];
        let mut last = 0;
        for caps in PLACEHOLDER.captures_iter(source) {
            let (whole, name) = match (caps.get(0), caps.get(1)) {
                (Some(w), Some(n)) => (w, n.as_str()),
                _ => continue,
            };
            if whole.start() > last {
                segments.push(Segment::Text(source[last..whole.start()].to_string()));
            }
            segments.push(match name {
                "yield" => Segment::Yield,
                _ => Segment::Local(name.to_string()),
            });
            last = whole.end();
        }
        if last < source.len() {
            segments.push(Segment::Text(source[last..].to_string()));
        }
        Ok(Arc::new(InterpolationTemplate { segments }))
    }
}

struct VerbatimTemplate {
    source: String,
}

impl Template for VerbatimTemplate {
    fn render(&self, _locals: &HashMap<String, String>, content: Option<&str>) -> String {
        match content {
            Some(content) => self.source.replace("{{ yield }}", content),
            None => self.source.clone(),
        }
    }
}

/// 原样输出源码，仅替换 `{{ yield }}`
pub struct VerbatimEngine;

impl Engine for VerbatimEngine {
    fn name(&self) -> &str {
        VERBATIM
    }

    fn extensions(&self) -> Vec<String> {
        vec!["txt".to_string(), "text".to_string()]
    }

    fn compile(&self, source: &str, _options: &[String]) -> Result<Arc<dyn Template>, Exception> {
        Ok(Arc::new(VerbatimTemplate {
            source: source.to_string(),
        }))
    }
}

/// 向进程级引擎表登记引擎，同名引擎被替换
pub fn register_engine(engine: Arc<dyn Engine>) {
    let mut engines = match ENGINES.write() {
        Ok(guard) => guard,
        Err(poisoned) => {
            warn!("引擎表锁被污染，继续使用其中的数据");
            poisoned.into_inner()
        }
    };
    engines.retain(|e| e.name() != engine.name());
    debug!("登记模板引擎{}，扩展名{:?}", engine.name(), engine.extensions());
    engines.push(engine);
}

fn engines() -> Vec<Arc<dyn Engine>> {
    match ENGINES.read() {
        Ok(guard) => guard.clone(),
        Err(poisoned) => {
            warn!("引擎表锁被污染，继续使用其中的数据");
            poisoned.into_inner().clone()
        }
    }
}

pub fn engine_by_name(name: &str) -> Option<Arc<dyn Engine>> {
    engines().into_iter().find(|e| e.name() == name)
}

/// 引擎的默认扩展名。
///
/// 扩展名按长度降序遍历，后写入的覆盖先写入的，因此重叠登记时取最短的那个。
pub fn default_extension(engine: &dyn Engine) -> String {
    let mut extensions = engine.extensions();
    extensions.sort_by(|a, b| b.len().cmp(&a.len()));
    let mut chosen = String::new();
    for ext in extensions {
        chosen = ext;
    }
    format!(".{}", chosen)
}

/// 扩展名是否属于任一已登记引擎
pub fn is_registered_extension(ext: &str) -> bool {
    let ext = ext.trim_start_matches('.');
    engines()
        .iter()
        .any(|e| e.extensions().iter().any(|x| x == ext))
}

#[derive(Debug, Clone, PartialEq)]
pub struct EngineBinding {
    pub name: String,
    pub options: Vec<String>,
}

/// 布局绑定。`Disabled` 明确表示不使用布局，与未设置不同。
#[derive(Debug, Clone, PartialEq)]
pub enum Layout {
    Named(String),
    /// 直接给出的布局源码，使用 action 的引擎编译
    Inline(String),
    Disabled,
}

/// 每个 action 的视图配置
#[derive(Clone, Default)]
pub struct ViewSettings {
    pub(crate) engine: AttributeSlot<EngineBinding>,
    pub(crate) engine_ext: AttributeSlot<String>,
    pub(crate) layout: AttributeSlot<Layout>,
    pub(crate) view_path: AttributeSlot<String>,
    pub(crate) layouts_path: AttributeSlot<String>,
    pub(crate) view_fullpath: AttributeSlot<String>,
    pub(crate) compiler_pool: AttributeSlot<CompilerPool>,
}

impl ViewSettings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn engine(&self, descriptor: &ActionDescriptor) -> Option<&EngineBinding> {
        self.engine.get(descriptor)
    }

    pub fn layout(&self, descriptor: &ActionDescriptor) -> Option<&Layout> {
        self.layout.get(descriptor)
    }

    pub fn compiler_pool(&self, descriptor: &ActionDescriptor) -> CompilerPool {
        match self.compiler_pool.get(descriptor) {
            Some(pool) => Arc::clone(pool),
            None => Arc::clone(&DEFAULT_COMPILER_POOL),
        }
    }
}

/// 单次渲染调用的显式参数，优先级高于一切配置
#[derive(Debug, Clone, Default)]
pub struct RenderOptions {
    engine: Option<EngineBinding>,
    ext: Option<String>,
    layout: Option<Layout>,
    locals: HashMap<String, String>,
    compiler_key: Option<CacheKey>,
}

impl RenderOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn engine(mut self, name: &str, options: &[&str]) -> Self {
        self.engine = Some(EngineBinding {
            name: name.to_string(),
            options: options.iter().map(|o| o.to_string()).collect(),
        });
        self
    }

    pub fn ext(mut self, ext: &str) -> Self {
        self.ext = Some(ext.to_string());
        self
    }

    pub fn layout(mut self, name: &str) -> Self {
        self.layout = Some(Layout::Named(name.to_string()));
        self
    }

    pub fn no_layout(mut self) -> Self {
        self.layout = Some(Layout::Disabled);
        self
    }

    pub fn local(mut self, name: &str, value: &str) -> Self {
        self.locals.insert(name.to_string(), value.to_string());
        self
    }

    /// 给出键时编译结果进入编译池，否则每次重新编译
    pub fn cached(mut self, key: impl Into<CacheKey>) -> Self {
        self.compiler_key = Some(key.into());
        self
    }

    pub fn locals(&self) -> &HashMap<String, String> {
        &self.locals
    }

    // 显式给出的局部变量优先
    pub(crate) fn with_default_locals(mut self, defaults: &HashMap<String, String>) -> Self {
        for (name, value) in defaults {
            self.locals
                .entry(name.clone())
                .or_insert_with(|| value.clone());
        }
        self
    }
}

/// 某个 action 的视图解析上下文
pub struct ViewScope<'a> {
    settings: &'a ViewSettings,
    descriptor: &'a ActionDescriptor,
    controller: &'a str,
    app_root: &'a str,
    route_prefix: String,
}

impl<'a> ViewScope<'a> {
    /// `base_url` 去掉首尾的 `/` 后作为模板路径的路由前缀
    pub fn new(
        settings: &'a ViewSettings,
        descriptor: &'a ActionDescriptor,
        controller: &'a str,
        app_root: &'a str,
        base_url: &str,
    ) -> Self {
        Self {
            settings,
            descriptor,
            controller,
            app_root,
            route_prefix: normalize_dir(base_url.trim_matches('/')),
        }
    }

    pub fn engine(&self, options: &RenderOptions) -> Result<(Arc<dyn Engine>, Vec<String>), Exception> {
        let binding = match &options.engine {
            Some(b) => Some(b),
            None => self.settings.engine.get(self.descriptor),
        };
        match binding {
            Some(b) => match engine_by_name(&b.name) {
                Some(engine) => Ok((engine, b.options.clone())),
                None => Err(Exception::UnknownEngine(b.name.clone())),
            },
            None => engine_by_name(INTERPOLATION)
                .map(|e| (e, vec![]))
                .ok_or_else(|| Exception::UnknownEngine(INTERPOLATION.to_string())),
        }
    }

    pub fn extension(&self, engine: &dyn Engine, options: &RenderOptions) -> String {
        let configured = options
            .ext
            .as_ref()
            .or_else(|| self.settings.engine_ext.get(self.descriptor));
        match configured {
            Some(ext) if ext.starts_with('.') => ext.clone(),
            Some(ext) => format!(".{}", ext),
            None => default_extension(engine),
        }
    }

    /// 视图根目录：绝对路径配置优先，其次是 app_root + view_path
    pub fn view_root(&self) -> String {
        if let Some(full) = self.settings.view_fullpath.get(self.descriptor) {
            return normalize_dir(full);
        }
        let view_path = self
            .settings
            .view_path
            .get(self.descriptor)
            .map(String::as_str)
            .unwrap_or(crate::param::DEFAULT_VIEW_PATH);
        if view_path.starts_with('/') {
            normalize_dir(view_path)
        } else {
            normalize_dir(&format!("{}{}", normalize_dir(self.app_root), view_path))
        }
    }

    pub fn layouts_root(&self) -> String {
        let layouts = self
            .settings
            .layouts_path
            .get(self.descriptor)
            .map(String::as_str)
            .unwrap_or("");
        normalize_dir(&format!("{}{}", self.view_root(), normalize_dir(layouts)))
    }

    // 名称已带已登记引擎的扩展名时不再追加
    fn with_extension(name: &str, ext: &str) -> String {
        let has_ext = name
            .rsplit_once('.')
            .map_or(false, |(stem, e)| !stem.is_empty() && !e.contains('/') && is_registered_extension(e));
        if has_ext {
            name.to_string()
        } else {
            format!("{}{}", name, ext)
        }
    }

    pub fn template_path(&self, name: &str, options: &RenderOptions) -> Result<String, Exception> {
        let (engine, _) = self.engine(options)?;
        let ext = self.extension(engine.as_ref(), options);
        Ok(normalize_path(&format!(
            "{}{}{}",
            self.view_root(),
            self.route_prefix,
            Self::with_extension(name, &ext)
        )))
    }

    pub fn layout_path(&self, name: &str, options: &RenderOptions) -> Result<String, Exception> {
        let (engine, _) = self.engine(options)?;
        let ext = self.extension(engine.as_ref(), options);
        Ok(normalize_path(&format!(
            "{}{}",
            self.layouts_root(),
            Self::with_extension(name, &ext)
        )))
    }

    /// 生效的布局，`None` 表示不使用布局
    pub fn layout(&self, options: &RenderOptions) -> Option<Layout> {
        let layout = match &options.layout {
            Some(l) => Some(l.clone()),
            None => self.settings.layout.get(self.descriptor).cloned(),
        };
        match layout {
            Some(Layout::Disabled) | None => None,
            some => some,
        }
    }

    fn compile(
        &self,
        engine: &Arc<dyn Engine>,
        engine_options: &[String],
        options: &RenderOptions,
        path: Option<&str>,
        inline: Option<&str>,
    ) -> Result<Arc<dyn Template>, Exception> {
        // 构造参数 = 引擎参数 + 模板路径
        let key = options.compiler_key.as_ref().map(|id| {
            let mut args = engine_options.to_vec();
            args.extend(path.map(str::to_string));
            ArtifactKey::new(id.clone(), engine.name(), args, inline.map(str::to_string))
        });
        let pool = self.settings.compiler_pool(self.descriptor);
        fetch_or_build(pool.as_ref(), key.as_ref(), &mut || {
            let source = match (inline, path) {
                (Some(source), _) => source.to_string(),
                (None, Some(path)) => read_template(path)?,
                (None, None) => String::new(),
            };
            engine.compile(&source, engine_options)
        })
    }

    fn render_path(&self, path: &str, options: &RenderOptions, content: Option<&str>) -> Result<String, Exception> {
        let (engine, engine_options) = self.engine(options)?;
        let template = self.compile(&engine, &engine_options, options, Some(path), None)?;
        Ok(template.render(&options.locals, content))
    }

    /// 渲染模板，有布局时套上布局
    pub fn render(&self, name: &str, options: &RenderOptions) -> Result<String, Exception> {
        let content = self.render_partial(name, options)?;
        match self.layout(options) {
            Some(layout) => self.wrap(&layout, &content, options),
            None => Ok(content),
        }
    }

    /// 渲染模板，不使用布局
    pub fn render_partial(&self, name: &str, options: &RenderOptions) -> Result<String, Exception> {
        let path = self.template_path(name, options)?;
        debug!("{}#{}渲染模板{}", self.controller, self.descriptor, path);
        self.render_path(&path, options, None)
    }

    /// 用布局包裹给定内容，没有布局时报错
    pub fn render_layout(&self, content: &str, options: &RenderOptions) -> Result<String, Exception> {
        match self.layout(options) {
            Some(layout) => self.wrap(&layout, content, options),
            None => Err(Exception::LayoutMissing {
                controller: self.controller.to_string(),
                action: self.descriptor.to_string(),
            }),
        }
    }

    /// 渲染相对于视图根目录的文件，缺少扩展名时追加引擎扩展名
    pub fn render_file(&self, file: &str, options: &RenderOptions) -> Result<String, Exception> {
        let (engine, _) = self.engine(options)?;
        let ext = self.extension(engine.as_ref(), options);
        let path = normalize_path(&format!(
            "{}{}",
            self.view_root(),
            Self::with_extension(file.trim_start_matches('/'), &ext)
        ));
        self.render_path(&path, options, None)
    }

    /// 渲染代码中直接给出的模板源码，不使用布局
    pub fn render_inline(&self, source: &str, options: &RenderOptions) -> Result<String, Exception> {
        let (engine, engine_options) = self.engine(options)?;
        let template = self.compile(&engine, &engine_options, options, None, Some(source))?;
        Ok(template.render(&options.locals, None))
    }

    fn wrap(&self, layout: &Layout, content: &str, options: &RenderOptions) -> Result<String, Exception> {
        match layout {
            Layout::Named(name) => {
                let path = self.layout_path(name, options)?;
                self.render_path(&path, options, Some(content))
            }
            Layout::Inline(source) => {
                let (engine, engine_options) = self.engine(options)?;
                let template = self.compile(&engine, &engine_options, options, None, Some(source))?;
                Ok(template.render(&options.locals, Some(content)))
            }
            Layout::Disabled => Ok(content.to_string()),
        }
    }
}

fn read_template(path: &str) -> Result<String, Exception> {
    fs::read_to_string(path).map_err(|e| match e.kind() {
        ErrorKind::NotFound => Exception::TemplateNotFound(path.to_string()),
        _ => Exception::TemplateIoFailed(format!("{}: {}", path, e)),
    })
}
