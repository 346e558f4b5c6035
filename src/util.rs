use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use lazy_static::lazy_static;
use regex::Regex;

use crate::param::reason_phrase;

lazy_static! {
    static ref MULTI_SLASH: Regex = Regex::new(r"/{2,}").unwrap();
}

pub struct HtmlBuilder {
    title: String,
    css: String,
    body: String,
}

impl HtmlBuilder {
    pub fn from_status_code(code: u16, note: Option<&str>) -> Self {
        let title = format!("{}", code);
        let css = r"
            body {
                width: 35em;
                margin: 0 auto;
                font-family: Tahoma, Verdana, Arial, sans-serif;
            }
            "
        .to_string();
        let description = match note {
            Some(n) => n,
            None => reason_phrase(code).unwrap_or("Unknown Status"),
        };
        let body = format!(
            r"
            <h1>{}</h1>
            <p>{}</p>
            ",
            code, description
        );
        Self { title, css, body }
    }

    pub fn build(&self) -> String {
        format!(
            r##"<!DOCTYPE html>
            <html>
                <head>
                    <meta charset="utf-8">
                    <title>{}</title>
                    <style>{}</style>
                </head>
                <body>
                {}
                </body>
            </html>"##,
            self.title, self.css, self.body
        )
    }
}

// 合并重复的斜杠
pub fn normalize_path(path: &str) -> String {
    MULTI_SLASH.replace_all(path, "/").into_owned()
}

// 目录路径统一以单个 `/` 结尾，空字符串保持为空
pub fn normalize_dir(path: &str) -> String {
    if path.is_empty() {
        return String::new();
    }
    let mut path = normalize_path(path);
    if !path.ends_with('/') {
        path.push('/');
    }
    path
}

// RFC 7231 IMF-fixdate，用于 Date / Expires / Last-Modified
pub fn http_date(date: &DateTime<Utc>) -> String {
    date.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

pub fn parse_http_date(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(date) = DateTime::parse_from_rfc2822(value.trim()) {
        return Some(date.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(value.trim(), "%a, %d %b %Y %H:%M:%S GMT")
        .ok()
        .map(|naive| Utc.from_utc_datetime(&naive))
}
