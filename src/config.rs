use num_cpus;
use serde_derive::Deserialize;
use serde_derive::Serialize;

use core::str;
use log::{error, warn};
use std::fs::File;
use std::io::prelude::*;

use crate::param::DEFAULT_VIEW_PATH;

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Config {
    app_root: String,
    port: u16,
    worker_threads: usize,
    local: bool,
    #[serde(default = "default_view_path")]
    view_path: String,
    #[serde(default)]
    layouts_path: String,
    // 0 表示不限容量的内存池，其余值表示 LRU 池的容量
    #[serde(default)]
    compiler_pool_size: usize,
    #[serde(default)]
    default_charset: Option<String>,
}

fn default_view_path() -> String {
    DEFAULT_VIEW_PATH.to_string()
}

impl Config {
    pub fn new() -> Self {
        Self {
            app_root: "./".to_string(),
            port: 7878,
            worker_threads: 0,
            local: true,
            view_path: default_view_path(),
            layouts_path: String::new(),
            compiler_pool_size: 0,
            default_charset: None,
        }
    }

    pub fn from_toml(filename: &str) -> Self {
        let mut file = match File::open(filename) {
            Ok(f) => f,
            Err(e) => {
                error!("无法打开配置文件{}：{}，使用默认配置", filename, e);
                return Config::new().normalized();
            }
        };
        let mut str_val = String::new();
        if let Err(e) = file.read_to_string(&mut str_val) {
            error!("读取配置文件{}失败：{}，使用默认配置", filename, e);
            return Config::new().normalized();
        }
        Self::from_toml_str(&str_val)
    }

    pub fn from_toml_str(source: &str) -> Self {
        let raw_config: Config = match toml::from_str(source) {
            Ok(t) => t,
            Err(e) => {
                error!("无法成功从配置文件构建配置对象：{}，使用默认配置", e);
                Config::new()
            }
        };
        raw_config.normalized()
    }

    fn normalized(mut self) -> Self {
        if self.worker_threads == 0 {
            self.worker_threads = num_cpus::get();
        }
        if !self.app_root.ends_with('/') {
            self.app_root.push('/');
        }
        if self.view_path.is_empty() {
            warn!("view_path被设置为空字符串，将使用默认值{}", DEFAULT_VIEW_PATH);
            self.view_path = default_view_path();
        }
        self
    }

    /// 在测试和嵌入场景下指定应用根目录
    pub fn with_app_root(mut self, root: &str) -> Self {
        self.app_root = root.to_string();
        self.normalized()
    }

    pub fn with_compiler_pool_size(mut self, size: usize) -> Self {
        self.compiler_pool_size = size;
        self
    }

    pub fn with_default_charset(mut self, charset: &str) -> Self {
        self.default_charset = Some(charset.to_string());
        self
    }
}

impl Default for Config {
    fn default() -> Self {
        Config::new().normalized()
    }
}

impl Config {
    pub fn app_root(&self) -> &str {
        &self.app_root
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn worker_threads(&self) -> usize {
        self.worker_threads
    }

    pub fn local(&self) -> bool {
        self.local
    }

    pub fn view_path(&self) -> &str {
        &self.view_path
    }

    pub fn layouts_path(&self) -> &str {
        &self.layouts_path
    }

    pub fn compiler_pool_size(&self) -> usize {
        self.compiler_pool_size
    }

    pub fn default_charset(&self) -> Option<&str> {
        self.default_charset.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_toml_str_full() {
        let config = Config::from_toml_str(
            r#"
            app_root = "/srv/app"
            port = 8080
            worker_threads = 4
            local = false
            view_path = "templates/"
            layouts_path = "layouts/"
            compiler_pool_size = 64
            default_charset = "UTF-8"
            "#,
        );
        assert_eq!(config.app_root(), "/srv/app/");
        assert_eq!(config.port(), 8080);
        assert_eq!(config.worker_threads(), 4);
        assert!(!config.local());
        assert_eq!(config.view_path(), "templates/");
        assert_eq!(config.layouts_path(), "layouts/");
        assert_eq!(config.compiler_pool_size(), 64);
        assert_eq!(config.default_charset(), Some("UTF-8"));
    }

    #[test]
    fn test_from_toml_str_defaults() {
        let config = Config::from_toml_str(
            r#"
            app_root = "."
            port = 7878
            worker_threads = 0
            local = true
            "#,
        );
        assert_eq!(config.view_path(), "view/");
        assert_eq!(config.layouts_path(), "");
        assert_eq!(config.compiler_pool_size(), 0);
        assert!(config.worker_threads() > 0);
        assert_eq!(config.default_charset(), None);
    }

    #[test]
    fn test_invalid_toml_falls_back() {
        let config = Config::from_toml_str("port = \"not a number\"");
        assert_eq!(config.port(), 7878);
        assert_eq!(config.app_root(), "./");
    }

    #[test]
    fn test_missing_file_falls_back() {
        let config = Config::from_toml("config/definitely-missing.toml");
        assert_eq!(config.port(), 7878);
    }
}
