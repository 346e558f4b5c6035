use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::{
    action::ActionDescriptor,
    attribute::AttributeSlot,
    controller::Context,
    exception::{ActionError, ActionResult},
};

pub type PlainHandler = Arc<dyn for<'a> Fn(&mut Context<'a>) -> ActionResult<String> + Send + Sync>;
pub type ErrorAwareHandler =
    Arc<dyn for<'a> Fn(&mut Context<'a>, &ActionError) -> ActionResult<String> + Send + Sync>;

/// 错误处理器。是否接收触发它的错误由构造时选择的变体决定。
#[derive(Clone)]
pub enum Handler {
    Plain(PlainHandler),
    WithError(ErrorAwareHandler),
    /// 转交给同一控制器中已声明的 action
    Action(String),
}

impl Handler {
    pub fn plain<F>(f: F) -> Self
    where
        F: for<'a> Fn(&mut Context<'a>) -> ActionResult<String> + Send + Sync + 'static,
    {
        Handler::Plain(Arc::new(f))
    }

    pub fn with_error<F>(f: F) -> Self
    where
        F: for<'a> Fn(&mut Context<'a>, &ActionError) -> ActionResult<String>
            + Send
            + Sync
            + 'static,
    {
        Handler::WithError(Arc::new(f))
    }

    pub fn action(name: &str) -> Self {
        Handler::Action(name.to_string())
    }
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Handler::Plain(_) => write!(f, "Handler::Plain"),
            Handler::WithError(_) => write!(f, "Handler::WithError"),
            Handler::Action(name) => write!(f, "Handler::Action({})", name),
        }
    }
}

/// 以 (状态码, 描述符) 为键的错误处理器表
#[derive(Clone, Default)]
pub struct ErrorHandlerRegistry {
    handlers: HashMap<u16, AttributeSlot<Handler>>,
}

impl ErrorHandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        status: u16,
        targets: &[ActionDescriptor],
        handler: Handler,
        keep_existing: bool,
    ) -> usize {
        self.handlers
            .entry(status)
            .or_default()
            .set(targets, handler, keep_existing)
    }

    pub fn lookup(&self, status: u16, descriptor: &ActionDescriptor) -> Option<&Handler> {
        self.handlers.get(&status).and_then(|slot| slot.get(descriptor))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(registry: &ErrorHandlerRegistry, status: u16, action: &str) -> Option<String> {
        registry
            .lookup(status, &ActionDescriptor::parse(action))
            .map(|h| format!("{:?}", h))
    }

    #[test]
    fn test_lookup_specific_then_wildcard() {
        let mut registry = ErrorHandlerRegistry::new();
        registry.register(404, &[ActionDescriptor::wildcard()], Handler::action("missing"), true);
        registry.register(404, &[ActionDescriptor::bare("show")], Handler::action("gone"), true);

        assert_eq!(names(&registry, 404, "show"), Some("Handler::Action(gone)".to_string()));
        assert_eq!(names(&registry, 404, "index"), Some("Handler::Action(missing)".to_string()));
        assert_eq!(names(&registry, 500, "index"), None);
    }

    #[test]
    fn test_keep_existing_per_status() {
        let mut registry = ErrorHandlerRegistry::new();
        let all = [ActionDescriptor::wildcard()];
        registry.register(500, &all, Handler::action("first"), true);
        assert_eq!(registry.register(500, &all, Handler::action("second"), true), 0);
        assert_eq!(registry.register(404, &all, Handler::action("other"), true), 1);
        assert_eq!(names(&registry, 500, "x"), Some("Handler::Action(first)".to_string()));

        registry.register(500, &all, Handler::action("forced"), false);
        assert_eq!(names(&registry, 500, "x"), Some("Handler::Action(forced)".to_string()));
    }

    #[test]
    fn test_variant_chosen_by_constructor() {
        let plain = Handler::plain(|_ctx| Ok("plain".to_string()));
        let aware = Handler::with_error(|_ctx, e| Ok(format!("got {}", e.message())));
        assert!(matches!(plain, Handler::Plain(_)));
        assert!(matches!(aware, Handler::WithError(_)));
    }
}
