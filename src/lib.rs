pub mod action;
pub mod app;
pub mod attribute;
pub mod auth;
pub mod cache;
pub mod config;
pub mod controller;
pub mod error_handler;
pub mod exception;
pub mod hook;
pub mod param;
pub mod request;
pub mod response;
pub mod setup;
pub mod util;
pub mod view;

pub use action::{ActionDescriptor, ActionSet};
pub use app::App;
pub use auth::{BasicChallenge, Challenge, DigestChallenge, DigestOptions, Scheme, Verdict};
pub use cache::{pool_with_capacity, CacheKey, LruPool, MemoryPool, Pool, SharedPool};
pub use config::Config;
pub use controller::{Context, Controller};
pub use error_handler::Handler;
pub use exception::{ActionError, ActionResult, Exception, SetupResult};
pub use hook::Position;
pub use param::{HttpEncoding, HttpRequestMethod, HttpVersion};
pub use request::Request;
pub use response::Response;
pub use setup::{CacheDirective, ControllerSetup, ExpiryAmount, SetupState};
pub use util::HtmlBuilder;
pub use view::{Engine, RenderOptions, Template};
