#[cfg(test)]
mod setup_tests {
    //! # 分层声明与挂载测试
    //!
    //! 控制器层先声明，挂载 slice 后声明；普通声明不覆盖已有值，force 声明总是覆盖。

    use actionweb::{
        hook::Position, App, Config, Controller, Exception, Handler, Request, SetupState,
    };
    use regex::Regex;

    fn pages() -> Controller {
        Controller::new("Pages")
            .action("index", |_| Ok("index".to_string()))
            .action("about", |_| Ok("about".to_string()))
            .configure(|s| s.setup(&["index"], |s| s.charset("X")))
            .unwrap()
    }

    #[test]
    fn test_slice_soft_write_keeps_controller_value() {
        let mut app = App::new(Config::new());
        app.mount(pages(), |s| s.setup(&["index"], |s| s.charset("Y"))).unwrap();
        assert_eq!(app.controllers()[0].setup().charset_for("index"), Some("X"));
    }

    #[test]
    fn test_slice_force_write_overrides() {
        let mut app = App::new(Config::new());
        app.mount(pages(), |s| s.setup(&["index"], |s| s.force_charset("Y"))).unwrap();
        assert_eq!(app.controllers()[0].setup().charset_for("index"), Some("Y"));
    }

    #[test]
    fn test_slice_wildcard_fills_gaps_only() {
        let mut app = App::new(Config::new());
        app.mount(pages(), |s| s.charset("Z")).unwrap();
        let setup = app.controllers()[0].setup();
        assert_eq!(setup.charset_for("index"), Some("X"));
        assert_eq!(setup.charset_for("about"), Some("Z"));
    }

    #[test]
    fn test_response_reflects_layered_charset() {
        let mut app = App::new(Config::new().with_default_charset("UTF-8"));
        app.mount(pages(), |s| s.setup(&["about"], |s| s.charset("Y"))).unwrap();
        let index = app.call(&Request::get("/pages"), 0).unwrap();
        let about = app.call(&Request::get("/pages/about"), 1).unwrap();
        assert_eq!(index.content_type(), Some("text/html; charset=X"));
        assert_eq!(about.content_type(), Some("text/html; charset=Y"));
    }

    /// 锁定之后的声明返回 SetupLocked，读取结果保持不变
    #[test]
    fn test_lock_invariant() {
        let mut app = App::new(Config::new());
        let mut leaked = None;
        app.mount(pages(), |s| {
            s.before(|_| Ok(()))?;
            leaked = Some(s.controller_name().to_string());
            Ok(())
        })
        .unwrap();
        assert_eq!(leaked.as_deref(), Some("Pages"));

        let controller = &app.controllers()[0];
        let setup = controller.setup();
        assert_eq!(setup.state(), SetupState::Locked);
        assert_eq!(setup.hook_count(Position::Before, "index"), 1);
        assert_eq!(setup.charset_for("index"), Some("X"));
    }

    #[test]
    fn test_mutators_rejected_after_lock() {
        let mut setup = actionweb::ControllerSetup::new("Detached");
        setup.charset("A").unwrap();
        setup.begin_mount().unwrap();
        setup.lock();

        assert_eq!(setup.force_charset("B"), Err(Exception::SetupLocked("Detached".to_string())));
        assert_eq!(setup.before(|_| Ok(())), Err(Exception::SetupLocked("Detached".to_string())));
        assert!(setup.setup(&["index"], |_| Ok(())).is_err());
        assert_eq!(setup.charset_for("index"), Some("A"));
        assert_eq!(setup.hook_count(Position::Before, "index"), 0);
        assert_eq!(setup.begin_mount(), Err(Exception::AlreadyMounted("Detached".to_string())));
    }

    /// 正则在 setup 调用时求值，之后声明的 action 不受影响
    #[test]
    fn test_regex_setup_depends_on_declaration_order() {
        let controller = Controller::new("Reports")
            .action("daily_sales", |_| Ok(String::new()))
            .configure(|s| s.setup_matching(Regex::new("^daily_").unwrap(), |s| s.charset("R")))
            .unwrap()
            .action("daily_costs", |_| Ok(String::new()));
        let setup = controller.setup();
        assert_eq!(setup.charset_for("daily_sales"), Some("R"));
        assert_eq!(setup.charset_for("daily_costs"), None);
    }

    #[test]
    fn test_mount_many_branches_on_name() {
        let mut app = App::new(Config::new());
        let controllers = vec![
            Controller::new("Public").action("index", |_| Ok(String::new())),
            Controller::new("Private").action("index", |_| Ok(String::new())),
        ];
        app.mount_many(controllers, |s| {
            if s.controller_name() == "Private" {
                s.auth(|_, _| false)
            } else {
                Ok(())
            }
        })
        .unwrap();

        assert_eq!(app.call(&Request::get("/public"), 0).unwrap().status_code(), 200);
        assert_eq!(app.call(&Request::get("/private"), 1).unwrap().status_code(), 401);
    }

    #[test]
    fn test_remap_before_mount() {
        let mut app = App::new(Config::new());
        app.mount_bare(
            Controller::new("Users")
                .remap("/admin")
                .action("index", |_| Ok("users".to_string())),
        )
        .unwrap();
        assert_eq!(app.controllers()[0].base_url(), "/admin/users");
        assert_eq!(app.call(&Request::get("/admin/users"), 0).unwrap().body_str(), "users");
        assert_eq!(app.call(&Request::get("/users"), 1).unwrap().status_code(), 404);
    }

    #[test]
    fn test_force_error_handler_from_slice() {
        let controller = Controller::new("Shop")
            .action("index", |ctx| ctx.error(404, None))
            .configure(|s| s.error(404, Handler::plain(|_| Ok("controller".to_string()))))
            .unwrap();
        let mut app = App::new(Config::new());
        app.mount(controller, |s| s.force_error(404, Handler::plain(|_| Ok("slice".to_string()))))
            .unwrap();
        assert_eq!(app.call(&Request::get("/shop"), 0).unwrap().body_str(), "slice");
    }
}
