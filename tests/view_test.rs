#[cfg(test)]
mod view_tests {
    //! # 模板渲染测试
    //!
    //! 在临时目录中布置视图文件，通过完整的请求流程渲染模板与布局。

    use std::fs;
    use std::path::Path;

    use actionweb::{
        pool_with_capacity, view::CompilerPool, App, CacheKey, Config, Controller, Exception,
        Pool, RenderOptions, Request,
    };
    use tempfile::TempDir;

    fn write(root: &Path, relative: &str, content: &str) {
        let path = root.join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, content).unwrap();
    }

    fn site() -> TempDir {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "view/layouts/main.tpl", "<main>{{ yield }}</main>");
        write(dir.path(), "view/layouts/alt.tpl", "<alt>{{ yield }}</alt>");
        write(dir.path(), "view/blog/index.tpl", "<h1>{{ title }}</h1>");
        write(dir.path(), "view/blog/index.json.tpl", "{\"title\": \"{{ title }}\"}");
        write(dir.path(), "view/blog/post.tpl", "post {{ id }}");
        write(dir.path(), "view/blog/feed.txt", "raw {{ title }} feed");
        write(dir.path(), "view/shared/footer.tpl", "footer {{ year }}");
        dir
    }

    fn blog() -> Controller {
        Controller::new("Blog")
            .action("index", |ctx| {
                ctx.set_var("title", "Home");
                ctx.render(RenderOptions::new())
            })
            .action("get_post", |ctx| {
                let id = ctx.param(0).unwrap_or("0").to_string();
                ctx.render(RenderOptions::new().local("id", &id))
            })
            .action("feed", |ctx| ctx.render(RenderOptions::new().local("title", "T")))
            .action("footer", |ctx| {
                ctx.render_file("shared/footer", RenderOptions::new().local("year", "2026"))
            })
            .action("wrapped", |ctx| {
                let inner = ctx.render_partial("post", RenderOptions::new().local("id", "7"))?;
                ctx.render_layout(&inner, RenderOptions::new().layout("alt"))
            })
            .action("inline", |ctx| {
                ctx.render_inline("hi {{ who }}", RenderOptions::new().local("who", "there"))
            })
            .action("missing", |ctx| ctx.render_template("nope", RenderOptions::new()))
            .action("bare", |ctx| ctx.render_layout("x", RenderOptions::new()))
            .configure(|s| {
                s.layout("main")?;
                s.setup(&["index"], |s| s.formats(&[".json"]))?;
                s.setup(&["index.json"], |s| s.no_layout())?;
                s.setup(&["feed"], |s| {
                    s.engine("Verbatim", &[])?;
                    s.no_layout()
                })?;
                s.setup(&["bare"], |s| s.no_layout())
            })
            .unwrap()
    }

    fn app(dir: &TempDir) -> App {
        let root = dir.path().to_string_lossy().to_string();
        let config = Config::from_toml_str(&format!(
            "app_root = \"{}\"\nport = 7878\nworker_threads = 1\nlocal = true\nlayouts_path = \"layouts\"\n",
            root
        ));
        let mut app = App::new(config);
        app.mount_bare(blog()).unwrap();
        app
    }

    fn get(app: &App, path: &str) -> String {
        app.call(&Request::get(path), 0).unwrap().body_str()
    }

    #[test]
    fn test_render_with_layout_and_vars() {
        let dir = site();
        let app = app(&dir);
        assert_eq!(get(&app, "/blog"), "<main><h1>Home</h1></main>");
        assert_eq!(get(&app, "/blog/post/12"), "<main>post 12</main>");
    }

    /// 带格式的请求渲染同名的格式模板
    #[test]
    fn test_formatted_action_renders_format_template() {
        let dir = site();
        let app = app(&dir);
        let response = app.call(&Request::get("/blog/index.json"), 0).unwrap();
        assert_eq!(response.status_code(), 200);
        assert_eq!(response.body_str(), "{\"title\": \"Home\"}");
        assert_eq!(response.content_type(), Some("application/json"));
        assert_eq!(get(&app, "/blog/index"), "<main><h1>Home</h1></main>");
    }

    #[test]
    fn test_engine_binding_and_no_layout() {
        let dir = site();
        let app = app(&dir);
        assert_eq!(get(&app, "/blog/feed"), "raw {{ title }} feed");
    }

    #[test]
    fn test_partial_file_layout_and_inline() {
        let dir = site();
        let app = app(&dir);
        assert_eq!(get(&app, "/blog/footer"), "footer 2026");
        assert_eq!(get(&app, "/blog/wrapped"), "<alt>post 7</alt>");
        assert_eq!(get(&app, "/blog/inline"), "hi there");
    }

    #[test]
    fn test_missing_template_and_layout_propagate() {
        let dir = site();
        let app = app(&dir);
        match app.call(&Request::get("/blog/missing"), 0) {
            Err(Exception::ActionFailed(message)) => assert!(message.contains("nope.tpl")),
            other => panic!("unexpected result: {:?}", other.map(|r| r.status_code())),
        }
        assert!(app.call(&Request::get("/blog/bare"), 0).is_err());
    }

    /// 带编译键的模板进入编译池，修改文件后需要 update_compiler 才能生效
    #[test]
    fn test_compiler_pool_and_update() {
        let dir = site();
        let pool: CompilerPool = pool_with_capacity(0);
        let controller = Controller::new("Docs")
            .action("index", |ctx| {
                ctx.render(RenderOptions::new().no_layout().cached("docs-index"))
            })
            .action("refresh", |ctx| {
                ctx.update_compiler(&[CacheKey::name("docs-index")]);
                Ok(String::new())
            });
        write(dir.path(), "view/docs/index.tpl", "v1");

        let root = dir.path().to_string_lossy().to_string();
        let mut app = App::new(Config::new().with_app_root(&root));
        let injected = pool.clone();
        app.mount(controller, move |s| s.compiler_pool(injected)).unwrap();

        assert_eq!(get(&app, "/docs"), "v1");
        assert_eq!(pool.len(), 1);

        write(dir.path(), "view/docs/index.tpl", "v2");
        assert_eq!(get(&app, "/docs"), "v1");

        get(&app, "/docs/refresh");
        assert!(pool.is_empty());
        assert_eq!(get(&app, "/docs"), "v2");
    }
}
