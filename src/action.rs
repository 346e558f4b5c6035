//! Action 描述符与 setup 目标集合的解析。

use std::fmt;

use log::debug;
use regex::Regex;

use crate::param::WILDCARD;

/// 标识一个 action，可带请求格式后缀（如 `index.json`）。
/// `*` 是匹配所有 action 的通配描述符。
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ActionDescriptor {
    name: String,
    // 带前导 `.`，例如 `.json`
    format: Option<String>,
}

impl ActionDescriptor {
    pub fn wildcard() -> Self {
        Self {
            name: WILDCARD.to_string(),
            format: None,
        }
    }

    /// 解析 `name` 或 `name.format`，后缀原样保留
    pub fn parse(target: &str) -> Self {
        match target.split_once('.') {
            Some((name, format)) if !name.is_empty() && !format.is_empty() => Self {
                name: name.to_string(),
                format: Some(format!(".{}", format)),
            },
            _ => Self {
                name: target.to_string(),
                format: None,
            },
        }
    }

    pub fn bare(name: &str) -> Self {
        Self {
            name: name.to_string(),
            format: None,
        }
    }

    pub fn with_format(&self, format: Option<&str>) -> Self {
        Self {
            name: self.name.clone(),
            format: format.map(|f| {
                if f.starts_with('.') {
                    f.to_string()
                } else {
                    format!(".{}", f)
                }
            }),
        }
    }

    /// 去掉格式后缀的描述符
    pub fn without_format(&self) -> Self {
        Self::bare(&self.name)
    }

    pub fn is_wildcard(&self) -> bool {
        self.name == WILDCARD
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn format(&self) -> Option<&str> {
        self.format.as_deref()
    }
}

impl fmt::Display for ActionDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.format {
            Some(format) => write!(f, "{}{}", self.name, format),
            None => write!(f, "{}", self.name),
        }
    }
}

impl From<&str> for ActionDescriptor {
    fn from(target: &str) -> Self {
        Self::parse(target)
    }
}

/// setup 声明所作用的 action 集合。
#[derive(Debug, Clone)]
pub enum ActionSet {
    /// 未给出任何 action，作用于通配描述符
    All,
    /// 显式列出的 action，可带格式后缀
    Named(Vec<ActionDescriptor>),
    /// 名称匹配正则的、当前已声明的 action
    Matching(Regex),
}

impl ActionSet {
    pub fn from_names(names: &[&str]) -> Self {
        if names.is_empty() {
            ActionSet::All
        } else {
            ActionSet::Named(names.iter().map(|n| ActionDescriptor::parse(n)).collect())
        }
    }

    /// 针对此刻已声明的 action 计算目标描述符。
    ///
    /// 正则集合每次调用都重新求值，因此声明顺序会影响结果：
    /// 在 setup 之后才声明的 action 不会被之前的正则选中。
    pub fn resolve(&self, declared: &[String]) -> Vec<ActionDescriptor> {
        match self {
            ActionSet::All => vec![ActionDescriptor::wildcard()],
            ActionSet::Named(descriptors) => descriptors.clone(),
            ActionSet::Matching(pattern) => {
                let matched: Vec<ActionDescriptor> = declared
                    .iter()
                    .filter(|name| pattern.is_match(name))
                    .map(|name| ActionDescriptor::bare(name))
                    .collect();
                debug!("正则{}选中了{}个action", pattern, matched.len());
                matched
            }
        }
    }
}
