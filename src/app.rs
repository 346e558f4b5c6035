use std::sync::Arc;

use log::{debug, info, warn};

use crate::{
    cache::pool_with_capacity,
    config::Config,
    controller::Controller,
    exception::{Exception, SetupResult},
    request::Request,
    response::Response,
    setup::ControllerSetup,
    view::CompilerPool,
};

/// 已挂载控制器的集合。
///
/// 挂载顺序：进入 Mounting 状态，执行 slice，补上应用级默认值，最后锁定。
/// slice 中的普通声明不会覆盖控制器自己的设置，force 版本则总是覆盖。
pub struct App {
    config: Config,
    controllers: Vec<Arc<Controller>>,
    compiler_pool: Option<CompilerPool>,
}

impl App {
    pub fn new(config: Config) -> Self {
        let compiler_pool = match config.compiler_pool_size() {
            0 => None,
            size => Some(pool_with_capacity(size)),
        };
        Self {
            config,
            controllers: vec![],
            compiler_pool,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn mount<F>(&mut self, mut controller: Controller, slice: F) -> Result<&mut Self, Exception>
    where
        F: FnOnce(&mut ControllerSetup) -> SetupResult,
    {
        if self.controllers.iter().any(|c| c.name() == controller.name()) {
            return Err(Exception::AlreadyMounted(controller.name().to_string()));
        }
        let setup = controller.setup_mut();
        setup.begin_mount()?;
        slice(setup)?;
        self.apply_defaults(setup)?;
        setup.lock();
        controller.set_app_root(self.config.app_root());

        info!(
            "{}挂载到{}，共{}个action",
            controller.name(),
            controller.base_url(),
            controller.action_names().len()
        );
        self.controllers.push(Arc::new(controller));
        Ok(self)
    }

    pub fn mount_bare(&mut self, controller: Controller) -> Result<&mut Self, Exception> {
        self.mount(controller, |_| Ok(()))
    }

    /// 同一个 slice 依次作用于多个控制器
    pub fn mount_many<F>(&mut self, controllers: Vec<Controller>, slice: F) -> Result<&mut Self, Exception>
    where
        F: Fn(&mut ControllerSetup) -> SetupResult,
    {
        for controller in controllers {
            self.mount(controller, &slice)?;
        }
        Ok(self)
    }

    // 应用级默认值，优先级最低
    fn apply_defaults(&self, setup: &mut ControllerSetup) -> SetupResult {
        if let Some(charset) = self.config.default_charset() {
            setup.charset(charset)?;
        }
        setup.view_path(self.config.view_path())?;
        if !self.config.layouts_path().is_empty() {
            setup.layouts_path(self.config.layouts_path())?;
        }
        if let Some(pool) = &self.compiler_pool {
            setup.compiler_pool(Arc::clone(pool))?;
        }
        Ok(())
    }

    /// 按最长 base_url 前缀选择控制器
    pub fn find(&self, path: &str) -> Option<(&Arc<Controller>, String)> {
        self.controllers
            .iter()
            .filter_map(|c| {
                let base = c.base_url().trim_end_matches('/');
                let rest = path.strip_prefix(base)?;
                if rest.is_empty() || rest.starts_with('/') {
                    Some((c, base.len(), rest.to_string()))
                } else {
                    None
                }
            })
            .max_by_key(|(_, len, _)| *len)
            .map(|(c, _, rest)| (c, rest))
    }

    /// 返回的响应已按 Accept-Encoding 压缩。
    /// 未被任何处理器接住的运行期失败以 `Err` 返回，由宿主决定如何应答。
    pub fn call(&self, request: &Request, id: u128) -> Result<Response, Exception> {
        let mut response = match self.find(request.path()) {
            Some((controller, rest)) => {
                debug!("[ID{}]{}由控制器{}处理", id, request.path(), controller.name());
                controller.call(request, &rest, id)?
            }
            None => {
                warn!("[ID{}]没有控制器匹配{}，返回404", id, request.path());
                Response::from_status_code(404, None)
            }
        };
        response.finish(request, id);
        Ok(response)
    }

    /// (URL, 控制器, action) 列表
    pub fn url_map(&self) -> Vec<(String, String, String)> {
        let mut map = vec![];
        for controller in &self.controllers {
            for action in controller.action_names() {
                map.push((
                    controller.route(action, &[]),
                    controller.name().to_string(),
                    action.to_string(),
                ));
            }
        }
        map
    }

    pub fn controllers(&self) -> &[Arc<Controller>] {
        &self.controllers
    }
}
