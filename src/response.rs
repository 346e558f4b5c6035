use crate::{
    param::*,
    request::Request,
    util::{http_date, HtmlBuilder},
};

use brotli::enc::{self, backward_references::BrotliEncoderParams};
use bytes::Bytes;
use chrono::prelude::*;
use flate2::{
    write::{DeflateEncoder, GzEncoder},
    Compression,
};
use log::{debug, warn};

use std::io::{self, Write};

#[derive(Debug, Clone)]
pub struct Response {
    version: HttpVersion,
    status_code: u16,
    information: String,
    content_type: Option<String>,
    date: DateTime<Utc>,
    content_encoding: Option<HttpEncoding>,
    server_name: String,
    // 除 Content-Type / Content-Encoding / Content-Length / Date / Server 以外的标头
    headers: Vec<(String, String)>,
    content: Option<Bytes>,
    // HEAD 请求只发送标头
    omit_body: bool,
}

impl Response {
    pub fn new() -> Self {
        Self {
            version: HttpVersion::V1_1,
            status_code: 200,
            information: "OK".to_string(),
            content_type: None,
            date: Utc::now(),
            content_encoding: None,
            server_name: SERVER_NAME.to_string(),
            headers: vec![],
            content: None,
            omit_body: false,
        }
    }

    pub fn with_status(code: u16) -> Self {
        let mut response = Self::new();
        response.set_code(code);
        response
    }

    /// 生成只含状态码说明的默认 HTML 页面
    pub fn from_status_code(code: u16, note: Option<&str>) -> Self {
        let mut response = Self::with_status(code);
        response.content_type = Some("text/html;charset=utf-8".to_string());
        response.set_body(HtmlBuilder::from_status_code(code, note).build());
        response
    }

    pub fn set_code(&mut self, code: u16) -> &mut Self {
        self.status_code = code;
        self.information = match reason_phrase(code) {
            Some(info) => info.to_string(),
            None => {
                warn!("未登记的状态码：{}", code);
                "Unknown".to_string()
            }
        };
        self
    }

    pub fn set_content_type(&mut self, content_type: &str) -> &mut Self {
        self.content_type = Some(content_type.to_string());
        self
    }

    /// 设置标头，同名标头（大小写不敏感）被替换
    pub fn set_header(&mut self, name: &str, value: &str) -> &mut Self {
        if name.eq_ignore_ascii_case("content-type") {
            return self.set_content_type(value);
        }
        self.headers.retain(|(n, _)| !n.eq_ignore_ascii_case(name));
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    pub fn remove_header(&mut self, name: &str) -> &mut Self {
        if name.eq_ignore_ascii_case("content-type") {
            self.content_type = None;
        }
        self.headers.retain(|(n, _)| !n.eq_ignore_ascii_case(name));
        self
    }

    pub fn set_body(&mut self, body: impl Into<Bytes>) -> &mut Self {
        self.content = Some(body.into());
        self.content_encoding = None;
        self
    }

    /// 根据请求完成响应：协商压缩编码，HEAD 请求去掉响应体
    pub fn finish(&mut self, request: &Request, id: u128) -> &mut Self {
        self.date = Utc::now();
        self.encode(request.accept_encoding(), id);
        if request.method() == HttpRequestMethod::Head {
            self.omit_body = true;
        }
        self
    }

    pub fn encode(&mut self, accept_encoding: &[HttpEncoding], id: u128) -> &mut Self {
        if self.content_encoding.is_some() {
            return self;
        }
        let content = match &self.content {
            Some(c) if !c.is_empty() => c.clone(),
            _ => return self,
        };
        if let Some(t) = &self.content_type {
            if should_skip_compression(t) {
                debug!("[ID{}]{}类型的响应体不压缩", id, t);
                return self;
            }
        }
        let encoding = match decide_encoding(accept_encoding) {
            Some(e) => e,
            None => return self,
        };
        match compress(content.to_vec(), Some(encoding)) {
            Ok(compressed) => {
                self.content = Some(Bytes::from(compressed));
                self.content_encoding = Some(encoding);
            }
            Err(e) => {
                warn!("[ID{}]压缩响应体失败：{}，发送原始内容", id, e);
            }
        }
        self
    }

    pub fn as_bytes(&self) -> Vec<u8> {
        let version: &str = match self.version {
            HttpVersion::V1_1 => "HTTP/1.1",
        };
        let content_length = self.content.as_ref().map_or(0, |c| c.len());

        let mut header = [
            version,
            " ",
            &self.status_code.to_string(),
            " ",
            &self.information,
            CRLF,
        ]
        .concat();
        if let Some(t) = &self.content_type {
            header.push_str(&["Content-Type: ", t, CRLF].concat());
        }
        if let Some(e) = self.content_encoding {
            header.push_str(&format!("Content-Encoding: {}{}", e, CRLF));
        }
        header.push_str(&format!("Content-Length: {}{}", content_length, CRLF));
        header.push_str(&["Date: ", &http_date(&self.date), CRLF].concat());
        header.push_str(&["Server: ", &self.server_name, CRLF].concat());
        for (name, value) in &self.headers {
            header.push_str(&[name.as_str(), ": ", value, CRLF].concat());
        }
        header.push_str(CRLF);

        let body: &[u8] = match &self.content {
            Some(c) if !self.omit_body => c,
            _ => b"",
        };
        [header.as_bytes(), body].concat()
    }
}

impl Default for Response {
    fn default() -> Self {
        Self::new()
    }
}

// --- Getter 访问器实现 ---

impl Response {
    pub fn status_code(&self) -> u16 {
        self.status_code
    }

    pub fn information(&self) -> &str {
        &self.information
    }

    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    pub fn content_encoding(&self) -> Option<HttpEncoding> {
        self.content_encoding
    }

    /// 按名称查询标头，大小写不敏感
    pub fn header(&self, name: &str) -> Option<&str> {
        if name.eq_ignore_ascii_case("content-type") {
            return self.content_type();
        }
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    pub fn body(&self) -> &[u8] {
        match &self.content {
            Some(c) => c,
            None => b"",
        }
    }

    /// 未压缩的响应体按 UTF-8 解读
    pub fn body_str(&self) -> String {
        String::from_utf8_lossy(self.body()).into_owned()
    }
}

fn compress(data: Vec<u8>, mode: Option<HttpEncoding>) -> io::Result<Vec<u8>> {
    let original_size = data.len();
    let result = match mode {
        Some(HttpEncoding::Gzip) => {
            let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
            encoder.write_all(&data)?;
            encoder.finish()
        }
        Some(HttpEncoding::Deflate) => {
            let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
            encoder.write_all(&data)?;
            encoder.finish()
        }
        Some(HttpEncoding::Br) => {
            let params = BrotliEncoderParams::default();
            let mut output = Vec::new();
            enc::BrotliCompress(&mut io::Cursor::new(data), &mut output, &params)?;
            Ok(output)
        }
        None => Ok(data),
    };

    if let Ok(ref compressed) = result {
        let compressed_size = compressed.len();
        let ratio = if original_size > 0 {
            ((original_size as i64 - compressed_size as i64) as f64 / original_size as f64) * 100.0
        } else {
            0.0
        };
        debug!(
            "压缩完成: {:?}, 原始大小: {} bytes, 压缩后: {} bytes, 压缩率: {:.1}%",
            mode, original_size, compressed_size, ratio
        );
    }

    result
}

fn should_skip_compression(mime_type: &str) -> bool {
    let skip_types = [
        "image/jpeg",
        "image/jpg",
        "image/png",
        "image/gif",
        "image/webp",
        "image/bmp",
        "image/x-icon",
        "video/",
        "audio/",
        "application/zip",
        "application/x-rar",
        "application/x-7z-compressed",
        "application/gzip",
        "application/x-gzip",
        "font/woff",
        "font/woff2",
        "application/vnd.ms-fontobject",
    ];

    skip_types
        .iter()
        .any(|&skip_type| mime_type.starts_with(skip_type))
}

// br 暂不参与协商
fn decide_encoding(accept_encoding: &[HttpEncoding]) -> Option<HttpEncoding> {
    if accept_encoding.contains(&HttpEncoding::Gzip) {
        Some(HttpEncoding::Gzip)
    } else if accept_encoding.contains(&HttpEncoding::Deflate) {
        Some(HttpEncoding::Deflate)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compress_none() {
        let data = b"Hello, World!".to_vec();
        let result = compress(data.clone(), None).unwrap();
        assert_eq!(result, data);
    }

    #[test]
    fn test_compress_gzip() {
        let data = b"Hello, World! This is a test string for compression.".to_vec();
        let result = compress(data.clone(), Some(HttpEncoding::Gzip)).unwrap();

        assert_ne!(result, data);
        assert_eq!(&result[0..2], &[0x1f, 0x8b]);
    }

    #[test]
    fn test_compress_brotli() {
        let data = b"Hello, World! This is a test string for compression.".to_vec();
        let result = compress(data.clone(), Some(HttpEncoding::Br)).unwrap();

        assert_ne!(result, data);
        assert!(!result.is_empty());
    }

    #[test]
    fn test_compress_large_data() {
        let data = vec![b'A'; 10000];
        let result_gzip = compress(data.clone(), Some(HttpEncoding::Gzip)).unwrap();
        let result_deflate = compress(data.clone(), Some(HttpEncoding::Deflate)).unwrap();

        assert!(result_gzip.len() < data.len());
        assert!(result_deflate.len() < data.len());
    }

    #[test]
    fn test_decide_encoding() {
        assert_eq!(
            decide_encoding(&[HttpEncoding::Deflate, HttpEncoding::Gzip]),
            Some(HttpEncoding::Gzip)
        );
        assert_eq!(
            decide_encoding(&[HttpEncoding::Deflate]),
            Some(HttpEncoding::Deflate)
        );
        assert_eq!(decide_encoding(&[HttpEncoding::Br]), None);
        assert_eq!(decide_encoding(&[]), None);
    }

    #[test]
    fn test_should_skip_compression() {
        assert!(should_skip_compression("image/png"));
        assert!(should_skip_compression("video/mp4"));
        assert!(!should_skip_compression("text/html;charset=utf-8"));
    }

    #[test]
    fn test_response_status_code_various() {
        for (code, expected_info) in [
            (200, "OK"),
            (304, "Not Modified"),
            (401, "Unauthorized"),
            (404, "Not Found"),
            (412, "Precondition Failed"),
            (500, "Internal Server Error"),
        ] {
            let response = Response::with_status(code);
            assert_eq!(response.status_code(), code);
            assert_eq!(response.information(), expected_info);
        }
    }

    /// 未登记的状态码不再导致 panic
    #[test]
    fn test_response_unknown_status_code() {
        let response = Response::with_status(599);
        assert_eq!(response.status_code(), 599);
        assert_eq!(response.information(), "Unknown");
    }

    #[test]
    fn test_response_as_bytes_with_content() {
        let mut response = Response::new();
        response.set_content_type("text/plain").set_body("Hello");
        response.set_header("Cache-Control", "no-cache");

        let bytes = response.as_bytes();
        let response_str = String::from_utf8_lossy(&bytes);

        assert!(response_str.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(response_str.contains("Content-Type: text/plain\r\n"));
        assert!(response_str.contains("Content-Length: 5\r\n"));
        assert!(response_str.contains("Server: actionweb\r\n"));
        assert!(response_str.contains("Cache-Control: no-cache\r\n"));
        assert!(response_str.contains("Date: "));
        assert!(response_str.ends_with("\r\n\r\nHello"));
    }

    #[test]
    fn test_set_header_replaces_case_insensitive() {
        let mut response = Response::new();
        response.set_header("ETag", "\"a\"");
        response.set_header("etag", "\"b\"");
        assert_eq!(response.header("ETAG"), Some("\"b\""));
        assert_eq!(response.headers().len(), 1);

        response.remove_header("Etag");
        assert_eq!(response.header("etag"), None);
    }

    #[test]
    fn test_from_status_code_page() {
        let response = Response::from_status_code(404, None);
        assert_eq!(response.status_code(), 404);
        assert!(response.body_str().contains("Not Found"));
        assert_eq!(response.content_type(), Some("text/html;charset=utf-8"));
    }

    #[test]
    fn test_finish_with_gzip() {
        let request = Request::get("/").with_header("Accept-Encoding", "gzip");
        let mut response = Response::new();
        response
            .set_content_type("text/plain")
            .set_body("test test test test");
        response.finish(&request, 0);

        assert_eq!(response.content_encoding(), Some(HttpEncoding::Gzip));
        let bytes = response.as_bytes();
        let response_str = String::from_utf8_lossy(&bytes);
        assert!(response_str.contains("Content-Encoding: gzip"));
    }

    #[test]
    fn test_finish_head_omits_body() {
        let request = Request::new(HttpRequestMethod::Head, "/");
        let mut response = Response::from_status_code(200, None);
        response.finish(&request, 1);

        let bytes = response.as_bytes();
        let response_str = String::from_utf8_lossy(&bytes);
        assert!(response_str.starts_with("HTTP/1.1 200 OK"));
        assert!(!response_str.contains("Content-Length: 0"));
        assert!(!response_str.contains("<!DOCTYPE html>"));
    }
}
