// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # HTTP 请求处理模块
//!
//! 该模块负责将 TCP 流中读取的原始字节码解析为强类型的 `Request` 结构体，
//! 供控制器分发使用。它涵盖了：
//! 1. 请求行（Request-Line）的解析（方法、路径、查询字符串、版本）。
//! 2. 全部 HTTP 标头（Headers）的提取，字段名大小写不敏感。
//! 3. 查询参数与 `application/x-www-form-urlencoded` 请求体参数的解析。
//! 4. 内容协商（Content Negotiation）相关的编码解析。

use std::collections::HashMap;

use crate::{exception::Exception, param::*};
use log::error;

/// 表示一个完整的 HTTP 请求。
#[derive(Debug, Clone)]
pub struct Request {
    /// HTTP 请求方法（GET, POST 等）
    method: HttpRequestMethod,
    /// 请求的资源路径（不含查询字符串）
    path: String,
    /// 原始查询字符串（不含 `?`）
    query_string: String,
    /// HTTP 协议版本
    version: HttpVersion,
    /// 客户端标识字符串
    user_agent: String,
    /// 客户端支持的压缩编码列表（按解析顺序排列）
    accept_encoding: Vec<HttpEncoding>,
    /// 客户端接受的内容类型（MIME）
    accept: Option<String>,
    /// 全部标头，字段名统一为小写
    headers: Vec<(String, String)>,
    /// 查询参数与表单参数，表单参数覆盖同名查询参数
    params: HashMap<String, String>,
    /// 请求体
    body: String,
}

impl Request {
    /// 从原始字节缓冲区尝试构建 `Request` 实例。
    ///
    /// # 逻辑步骤
    /// 1. 验证编码：确保请求数据是合法的 UTF-8 字符串。
    /// 2. 解析请求行：提取方法、路径、查询字符串和协议版本。
    /// 3. 迭代解析标头，直到遇到空行。
    /// 4. 空行之后的内容作为请求体，表单类型的请求体会被解析为参数。
    ///
    /// # 参数
    /// * `buffer` - 从网络 Socket 读取的原始数据。
    /// * `id` - 全局请求 ID，用于在多线程环境下追踪日志。
    pub fn try_from(buffer: &[u8], id: u128) -> Result<Self, Exception> {
        // 缓冲区尾部可能是未使用的 0 字节
        let end = buffer.iter().rposition(|b| *b != 0).map_or(0, |i| i + 1);
        let request_string = match String::from_utf8(buffer[..end].to_vec()) {
            Ok(string) => string,
            Err(_) => {
                error!("[ID{}]无法解析HTTP请求", id);
                return Err(Exception::RequestIsNotUtf8);
            }
        };

        let (head, body) = match request_string.split_once("\r\n\r\n") {
            Some((h, b)) => (h, b.to_string()),
            None => (request_string.as_str(), String::new()),
        };
        let request_lines: Vec<&str> = head.split(CRLF).collect();

        // 1. 解析请求行 (e.g., "GET /index.html HTTP/1.1")
        let first_line_parts: Vec<&str> = request_lines[0].split(' ').collect();

        if first_line_parts.len() < 3 {
            error!("[ID{}]HTTP请求行格式不正确：{}", id, request_lines[0]);
            return Err(Exception::UnSupportedRequestMethod);
        }

        let method = match HttpRequestMethod::parse(first_line_parts[0]) {
            Some(m) => m,
            None => {
                error!("[ID{}]不支持的HTTP请求方法：{}", id, first_line_parts[0]);
                return Err(Exception::UnSupportedRequestMethod);
            }
        };

        let version_str = first_line_parts[first_line_parts.len() - 1].to_uppercase();
        let version = match version_str.as_str() {
            "HTTP/1.1" => HttpVersion::V1_1,
            _ => {
                error!("[ID{}]不支持的HTTP协议版本：{}", id, &version_str);
                return Err(Exception::UnsupportedHttpVersion);
            }
        };

        // 路径中可能包含空格，虽然不规范但通过 join 尝试恢复
        let target = if first_line_parts.len() == 3 {
            first_line_parts[1].to_string()
        } else {
            first_line_parts[1..first_line_parts.len() - 1].join(" ")
        };
        if !target.starts_with('/') {
            error!("[ID{}]请求路径不是以/开头：{}", id, target);
            return Err(Exception::InvalidPath);
        }

        // 2. 迭代各行解析 Headers
        let mut headers = Vec::new();
        for line in request_lines.iter().skip(1) {
            if let Some((name, value)) = line.split_once(':') {
                headers.push((name.trim().to_lowercase(), value.trim().to_string()));
            }
        }

        let mut request = Self::new(method, &target);
        request.version = version;
        request.body = body;
        for (name, value) in headers {
            request = request.with_header(&name, &value);
        }
        request.parse_form_body();
        Ok(request)
    }

    /// 直接构造请求，`target` 可以携带查询字符串。
    pub fn new(method: HttpRequestMethod, target: &str) -> Self {
        let (path, query_string) = match target.split_once('?') {
            Some((p, q)) => (p.to_string(), q.to_string()),
            None => (target.to_string(), String::new()),
        };
        let params = parse_query(&query_string);
        Self {
            method,
            path,
            query_string,
            version: HttpVersion::V1_1,
            user_agent: String::new(),
            accept_encoding: vec![],
            accept: None,
            headers: vec![],
            params,
            body: String::new(),
        }
    }

    pub fn get(target: &str) -> Self {
        Self::new(HttpRequestMethod::Get, target)
    }

    pub fn post(target: &str) -> Self {
        Self::new(HttpRequestMethod::Post, target)
    }

    /// 追加一个标头，同时更新 User-Agent / Accept / Accept-Encoding 等派生字段。
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        let name = name.to_lowercase();
        match name.as_str() {
            "user-agent" => self.user_agent = value.to_string(),
            "accept" => self.accept = Some(value.to_string()),
            // 这里的逻辑比较简单，只要包含关键词即视为支持
            "accept-encoding" => {
                self.accept_encoding.clear();
                if value.contains("gzip") {
                    self.accept_encoding.push(HttpEncoding::Gzip);
                }
                if value.contains("deflate") {
                    self.accept_encoding.push(HttpEncoding::Deflate);
                }
                if value.contains("br") {
                    self.accept_encoding.push(HttpEncoding::Br);
                }
            }
            _ => {}
        }
        self.headers.retain(|(n, _)| n != &name);
        self.headers.push((name, value.to_string()));
        self
    }

    pub fn with_body(mut self, body: &str) -> Self {
        self.body = body.to_string();
        self.parse_form_body();
        self
    }

    fn parse_form_body(&mut self) {
        let is_form = self
            .header("content-type")
            .map_or(false, |t| t.starts_with("application/x-www-form-urlencoded"));
        if is_form {
            let form = parse_query(&self.body);
            self.params.extend(form);
        }
    }
}

fn parse_query(query: &str) -> HashMap<String, String> {
    let mut params = HashMap::new();
    for pair in query.split('&').filter(|p| !p.is_empty()) {
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        let key = decode_component(key);
        let value = decode_component(value);
        params.insert(key, value);
    }
    params
}

fn decode_component(raw: &str) -> String {
    let raw = raw.replace('+', " ");
    match urlencoding::decode(&raw) {
        Ok(decoded) => decoded.into_owned(),
        Err(_) => raw,
    }
}

// --- Getter 访问器实现 ---

impl Request {
    /// 获取 HTTP 协议版本
    pub fn version(&self) -> &HttpVersion {
        &self.version
    }

    /// 获取请求路径（不含查询参数）
    pub fn path(&self) -> &str {
        &self.path
    }

    /// 获取原始查询字符串
    pub fn query_string(&self) -> &str {
        &self.query_string
    }

    /// 获取请求方法
    pub fn method(&self) -> HttpRequestMethod {
        self.method
    }

    /// 获取用户代理字符串
    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }

    /// 获取客户端支持的压缩算法列表
    pub fn accept_encoding(&self) -> &[HttpEncoding] {
        &self.accept_encoding
    }

    /// 获取客户端接受的文件 MIME 类型
    pub fn accept(&self) -> Option<&str> {
        self.accept.as_deref()
    }

    /// 按名称查询标头，大小写不敏感
    pub fn header(&self, name: &str) -> Option<&str> {
        let name = name.to_lowercase();
        self.headers
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, v)| v.as_str())
    }

    /// 获取 Authorization 标头
    pub fn authorization(&self) -> Option<&str> {
        self.header("authorization")
    }

    /// 获取查询参数或表单参数
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }

    pub fn params(&self) -> &HashMap<String, String> {
        &self.params
    }

    pub fn body(&self) -> &str {
        &self.body
    }
}
