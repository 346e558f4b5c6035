// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 演示宿主
//!
//! 基于 Tokio 运行时的多线程 HTTP 服务器，把解析好的请求交给挂载了
//! 演示控制器的 `App`，再把序列化后的响应写回连接。

use actionweb::{
    auth::DigestOptions,
    setup::{CacheDirective, ExpiryAmount},
    util::HtmlBuilder,
    App, Config, Controller, Exception, Handler, RenderOptions, Request, Response,
};

use chrono::{TimeZone, Utc};
use log::{debug, error, info, warn};
use tokio::{
    io::AsyncWriteExt,
    net::{TcpListener, TcpStream},
    runtime::Builder,
};

use std::{
    net::{Ipv4Addr, SocketAddrV4},
    sync::{Arc, Mutex},
    time::Instant,
};

fn main() {
    if let Err(e) = log4rs::init_file("config/log4rs.yaml", Default::default()) {
        eprintln!("无法初始化日志系统：{}", e);
    }

    let config = Config::from_toml("config/development.toml");
    info!("配置文件已载入，app root: {}", config.app_root());

    let runtime = match Builder::new_multi_thread()
        .worker_threads(config.worker_threads())
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("无法创建运行时：{}", e);
            return;
        }
    };

    let app = match build_app(config.clone()) {
        Ok(app) => Arc::new(app),
        Err(e) => {
            error!("挂载控制器失败：{}", e);
            return;
        }
    };
    for (url, controller, action) in app.url_map() {
        info!("{:<24} {}#{}", url, controller, action);
    }

    runtime.block_on(serve(app, config));
}

/// 挂载演示控制器
fn build_app(config: Config) -> Result<App, Exception> {
    let mut app = App::new(config);

    let pages = Controller::new("Pages")
        .map("/")
        .action("index", |ctx| {
            ctx.set_var("title", "actionweb");
            ctx.render(RenderOptions::new())
        })
        .action("about", |ctx| {
            ctx.render_inline(
                "<p>{{ name }} {{ version }}</p>",
                RenderOptions::new()
                    .local("name", "actionweb")
                    .local("version", env!("CARGO_PKG_VERSION"))
                    .cached("about"),
            )
        })
        .action("status", |ctx| {
            let body = serde_json::json!({
                "controller": ctx.controller_name(),
                "action": ctx.action(),
                "format": ctx.format(),
            });
            Ok(body.to_string())
        })
        .action("clock", |ctx| {
            let now = ctx.cache(None, || Utc::now().to_rfc2822())?;
            Ok(format!("cached at {}", now))
        })
        .action("notes", |ctx| {
            ctx.etag("notes-v1", false)?;
            if let Some(published) = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).single() {
                ctx.last_modified(published)?;
            }
            Ok("immutable notes".to_string())
        })
        .action("crash", |_ctx| Err(actionweb::ActionError::failed("demo failure")))
        .configure(|s| {
            s.layout("main")?;
            s.setup(&["status"], |s| {
                s.formats(&[".json"])?;
                s.no_layout()
            })?;
            s.setup(&["clock"], |s| {
                s.expires(ExpiryAmount::Seconds(60), &[CacheDirective::Public])?;
                s.no_layout()
            })?;
            s.error(500, Handler::with_error(|_ctx, e| Ok(format!("FatalErrorOccurred: {}", e.message()))))
        })?;

    let admin = Controller::new("Admin")
        .action("index", |ctx| {
            Ok(format!("hello {}", ctx.user().unwrap_or("anonymous")))
        })
        .action("digest", |ctx| {
            Ok(format!("digest user {}", ctx.user().unwrap_or("anonymous")))
        })
        .configure(|s| {
            s.setup(&["index"], |s| {
                s.basic_auth(Some("admin"), |user, pass| user == "admin" && pass == "admin")
            })?;
            s.setup(&["digest"], |s| {
                s.digest_auth(DigestOptions::default(), |user| {
                    (user == "admin").then(|| "admin".to_string())
                })
            })
        })?;

    app.mount(pages, |s| s.charset("UTF-8"))?;
    app.mount(admin, |s| {
        s.cache_control(&[CacheDirective::Private, CacheDirective::NoStore])
    })?;
    Ok(app)
}

async fn serve(app: Arc<App>, config: Config) {
    let port = config.port();
    let address = match config.local() {
        true => Ipv4Addr::new(127, 0, 0, 1),
        false => Ipv4Addr::new(0, 0, 0, 0),
    };
    info!("服务端将在{}:{}上监听Socket连接", address, port);
    let listener = match TcpListener::bind(SocketAddrV4::new(address, port)).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("无法绑定端口：{}，错误：{}", port, e);
            return;
        }
    };

    let active_connection = Arc::new(Mutex::new(0u32));
    let mut id: u128 = 0;

    loop {
        let (mut stream, addr) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                warn!("接受连接失败：{}", e);
                continue;
            }
        };
        debug!("[ID{}]TCP连接已建立：{}", id, addr);

        let app = Arc::clone(&app);
        let active_connection = Arc::clone(&active_connection);
        tokio::spawn(async move {
            adjust(&active_connection, 1);
            handle_connection(&mut stream, id, app).await;
            adjust(&active_connection, -1);
        });
        id += 1;
    }
}

fn adjust(counter: &Mutex<u32>, delta: i32) {
    let mut lock = match counter.lock() {
        Ok(lock) => lock,
        Err(poisoned) => {
            warn!("连接计数器的锁已中毒，继续使用内部数据");
            poisoned.into_inner()
        }
    };
    *lock = lock.saturating_add_signed(delta);
}

async fn handle_connection(stream: &mut TcpStream, id: u128, app: Arc<App>) {
    let mut buffer = vec![0; 8192];

    if let Err(e) = stream.readable().await {
        error!("[ID{}]等待TCPStream可读时遇到错误: {}", id, e);
        return;
    }
    let size = match stream.try_read(&mut buffer) {
        Ok(0) => return,
        Ok(size) => size,
        Err(e) => {
            error!("[ID{}]读取TCPStream时遇到错误: {}", id, e);
            return;
        }
    };
    let start_time = Instant::now();

    let response = match Request::try_from(&buffer[..size], id) {
        Ok(request) => {
            // 分发是同步的，可能阻塞在模板读取与缓存构造上，放到阻塞线程池执行
            let dispatched = tokio::task::spawn_blocking(move || {
                let result = app.call(&request, id);
                (request, result)
            })
            .await;
            let (request, result) = match dispatched {
                Ok(pair) => pair,
                Err(e) => {
                    error!("[ID{}]分发任务异常终止: {}，返回500", id, e);
                    let mut response = Response::with_status(500);
                    response
                        .set_content_type("text/html;charset=utf-8")
                        .set_body(HtmlBuilder::from_status_code(500, None).build());
                    if let Err(e) = stream.write_all(&response.as_bytes()).await {
                        error!("[ID{}]发送响应失败: {}", id, e);
                    }
                    return;
                }
            };
            let response = match result {
                Ok(response) => response,
                Err(e) => {
                    error!("[ID{}]请求未能恢复：{}，返回500", id, e);
                    let mut response = Response::from_status_code(500, None);
                    response.finish(&request, id);
                    response
                }
            };
            info!(
                "[ID{}] {}, {}, {}, {}, {}, {}",
                id,
                request.version(),
                request.path(),
                request.method(),
                response.status_code(),
                response.information(),
                request.user_agent(),
            );
            response
        }
        Err(e) => {
            warn!("[ID{}]解析HTTP请求失败: {}，返回400", id, e);
            let mut response = Response::with_status(400);
            response
                .set_content_type("text/html;charset=utf-8")
                .set_body(HtmlBuilder::from_status_code(400, None).build());
            response
        }
    };

    debug!(
        "[ID{}]HTTP响应构建完成，服务端用时{}ms。",
        id,
        start_time.elapsed().as_millis()
    );
    if let Err(e) = stream.write_all(&response.as_bytes()).await {
        error!("[ID{}]发送响应失败: {}", id, e);
        return;
    }
    let _ = stream.flush().await;
}
