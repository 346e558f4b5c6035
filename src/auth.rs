// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 认证模块
//!
//! 每个 action 可以绑定一条认证限制（Basic 或 Digest）。
//! 分发时按 带格式的描述符 → action → 通配 的顺序查找限制，
//! 质询失败时返回的响应会被立即发送，action 本体不会执行。

use std::collections::HashMap;
use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::Utc;
use lazy_static::lazy_static;
use log::debug;
use md5::{Digest, Md5};
use regex::Regex;
use uuid::Uuid;

use crate::{
    action::ActionDescriptor, attribute::AttributeSlot, param::DEFAULT_REALM, request::Request,
    response::Response,
};

lazy_static! {
    static ref AUTH_PARAM: Regex = Regex::new(r#"(\w+)=(?:"([^"]*)"|([^,\s]*))"#).unwrap();
}

const QOP: &str = "auth";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    Basic,
    Digest,
}

/// 一次质询的结果
#[derive(Debug, Clone)]
pub enum Verdict {
    /// 通过，携带已认证的用户名
    Passed(String),
    /// 未通过，该响应（401 / 400）应直接发送
    Challenged(Response),
}

/// 认证质询的协作者接口
#[cfg_attr(test, mockall::automock)]
pub trait Challenge: Send + Sync {
    fn scheme(&self) -> Scheme;
    fn evaluate(&self, request: &Request) -> Verdict;
}

pub type BasicCheck = Arc<dyn Fn(&str, &str) -> bool + Send + Sync>;
pub type DigestLookup = Arc<dyn Fn(&str) -> Option<String> + Send + Sync>;

fn md5_hex(data: &str) -> String {
    let mut hasher = Md5::new();
    hasher.update(data.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn unauthorized(challenge: String) -> Verdict {
    let mut response = Response::with_status(401);
    response
        .set_content_type("text/plain")
        .set_header("WWW-Authenticate", &challenge);
    Verdict::Challenged(response)
}

fn bad_request() -> Verdict {
    let mut response = Response::with_status(400);
    response.set_content_type("text/plain");
    Verdict::Challenged(response)
}

pub struct BasicChallenge {
    realm: String,
    check: BasicCheck,
}

impl BasicChallenge {
    pub fn new(realm: Option<&str>, check: BasicCheck) -> Self {
        Self {
            realm: realm.unwrap_or(DEFAULT_REALM).to_string(),
            check,
        }
    }

    pub fn realm(&self) -> &str {
        &self.realm
    }

    fn challenge(&self) -> String {
        format!("Basic realm=\"{}\"", self.realm)
    }
}

impl Challenge for BasicChallenge {
    fn scheme(&self) -> Scheme {
        Scheme::Basic
    }

    fn evaluate(&self, request: &Request) -> Verdict {
        let header = match request.authorization() {
            Some(h) => h,
            None => return unauthorized(self.challenge()),
        };
        let encoded = match header.split_once(' ') {
            Some((scheme, rest)) if scheme.eq_ignore_ascii_case("basic") => rest.trim(),
            _ => return bad_request(),
        };
        let decoded = match STANDARD
            .decode(encoded)
            .ok()
            .and_then(|bytes| String::from_utf8(bytes).ok())
        {
            Some(d) => d,
            None => return bad_request(),
        };
        let (user, pass) = decoded.split_once(':').unwrap_or((decoded.as_str(), ""));
        if (self.check)(user, pass) {
            Verdict::Passed(user.to_string())
        } else {
            debug!("Basic认证失败，用户：{}", user);
            unauthorized(self.challenge())
        }
    }
}

/// Digest 认证的可选参数
#[derive(Debug, Clone, Default)]
pub struct DigestOptions {
    pub realm: Option<String>,
    /// 默认与 realm 相同
    pub opaque: Option<String>,
    /// 为真时查找函数返回 md5("user:realm:password")，否则返回明文密码
    pub passwords_hashed: bool,
    /// nonce 的有效秒数，`None` 表示永不过期
    pub nonce_ttl: Option<i64>,
}

pub struct DigestChallenge {
    realm: String,
    opaque: String,
    passwords_hashed: bool,
    nonce_ttl: Option<i64>,
    private_key: String,
    lookup: DigestLookup,
}

impl DigestChallenge {
    pub fn new(options: DigestOptions, lookup: DigestLookup) -> Self {
        let realm = options.realm.unwrap_or_else(|| DEFAULT_REALM.to_string());
        let opaque = options.opaque.unwrap_or_else(|| realm.clone());
        Self {
            realm,
            opaque,
            passwords_hashed: options.passwords_hashed,
            nonce_ttl: options.nonce_ttl,
            private_key: Uuid::new_v4().to_string(),
            lookup,
        }
    }

    pub fn realm(&self) -> &str {
        &self.realm
    }

    pub fn opaque(&self) -> &str {
        &self.opaque
    }

    /// base64("<时间戳> md5(<时间戳>:<私钥>)")
    pub fn nonce(&self) -> String {
        self.nonce_at(Utc::now().timestamp())
    }

    fn nonce_at(&self, timestamp: i64) -> String {
        let digest = md5_hex(&format!("{}:{}", timestamp, self.private_key));
        STANDARD.encode(format!("{} {}", timestamp, digest))
    }

    fn challenge(&self, stale: bool) -> String {
        let mut challenge = format!(
            "Digest realm=\"{}\", nonce=\"{}\", opaque=\"{}\", qop=\"{}\"",
            self.realm,
            self.nonce(),
            md5_hex(&self.opaque),
            QOP
        );
        if stale {
            challenge.push_str(", stale=\"true\"");
        }
        challenge
    }

    // 返回 nonce 的时间戳，签名不符时返回 None
    fn verify_nonce(&self, nonce: &str) -> Option<i64> {
        let decoded = String::from_utf8(STANDARD.decode(nonce).ok()?).ok()?;
        let (timestamp, digest) = decoded.split_once(' ')?;
        let timestamp: i64 = timestamp.parse().ok()?;
        if md5_hex(&format!("{}:{}", timestamp, self.private_key)) == digest {
            Some(timestamp)
        } else {
            None
        }
    }

    fn expected_response(&self, params: &HashMap<String, String>, method: &str, secret: &str) -> String {
        let get = |k: &str| params.get(k).map(String::as_str).unwrap_or("");
        let ha1 = if self.passwords_hashed {
            secret.to_string()
        } else {
            md5_hex(&format!("{}:{}:{}", get("username"), self.realm, secret))
        };
        let ha2 = md5_hex(&format!("{}:{}", method, get("uri")));
        md5_hex(&format!(
            "{}:{}:{}:{}:{}:{}",
            ha1,
            get("nonce"),
            get("nc"),
            get("cnonce"),
            QOP,
            ha2
        ))
    }
}

fn parse_auth_params(source: &str) -> HashMap<String, String> {
    AUTH_PARAM
        .captures_iter(source)
        .map(|caps| {
            let value = caps
                .get(2)
                .or_else(|| caps.get(3))
                .map_or("", |m| m.as_str());
            (caps[1].to_string(), value.to_string())
        })
        .collect()
}

fn full_path(request: &Request) -> String {
    if request.query_string().is_empty() {
        request.path().to_string()
    } else {
        format!("{}?{}", request.path(), request.query_string())
    }
}

impl Challenge for DigestChallenge {
    fn scheme(&self) -> Scheme {
        Scheme::Digest
    }

    fn evaluate(&self, request: &Request) -> Verdict {
        let header = match request.authorization() {
            Some(h) => h,
            None => return unauthorized(self.challenge(false)),
        };
        let rest = match header.split_once(' ') {
            Some((scheme, rest)) if scheme.eq_ignore_ascii_case("digest") => rest,
            _ => return bad_request(),
        };
        let params = parse_auth_params(rest);
        let get = |k: &str| params.get(k).map(String::as_str).unwrap_or("");
        if get("uri") != full_path(request) {
            return bad_request();
        }

        let user = get("username");
        let valid_qop = get("qop") == QOP;
        let valid_opaque = get("opaque") == md5_hex(&self.opaque);
        let nonce_time = self.verify_nonce(get("nonce"));
        let secret = (self.lookup)(user);
        let valid_digest = match &secret {
            Some(secret) => {
                self.expected_response(&params, &request.method().to_string(), secret)
                    == get("response")
            }
            None => false,
        };

        match nonce_time {
            Some(timestamp) if valid_qop && valid_opaque && valid_digest => {
                let stale = self
                    .nonce_ttl
                    .map_or(false, |ttl| Utc::now().timestamp() - timestamp > ttl);
                if stale {
                    unauthorized(self.challenge(true))
                } else {
                    Verdict::Passed(user.to_string())
                }
            }
            _ => {
                debug!("Digest认证失败，用户：{}", user);
                unauthorized(self.challenge(false))
            }
        }
    }
}

/// 绑定在某个 action 上的认证限制
#[derive(Clone)]
pub struct AuthRestriction {
    challenge: Arc<dyn Challenge>,
}

impl AuthRestriction {
    pub fn new(challenge: Arc<dyn Challenge>) -> Self {
        Self { challenge }
    }

    pub fn scheme(&self) -> Scheme {
        self.challenge.scheme()
    }

    pub fn evaluate(&self, request: &Request) -> Verdict {
        self.challenge.evaluate(request)
    }
}

#[derive(Clone, Default)]
pub struct AuthRegistry {
    restrictions: AttributeSlot<AuthRestriction>,
}

impl AuthRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn restrict(
        &mut self,
        targets: &[ActionDescriptor],
        restriction: AuthRestriction,
        keep_existing: bool,
    ) -> usize {
        self.restrictions.set(targets, restriction, keep_existing)
    }

    /// 未设置限制的 action 直接通过，用户为空
    pub fn check(&self, descriptor: &ActionDescriptor, request: &Request) -> Option<Verdict> {
        self.restrictions
            .get(descriptor)
            .map(|restriction| restriction.evaluate(request))
    }

    pub fn restriction(&self, descriptor: &ActionDescriptor) -> Option<&AuthRestriction> {
        self.restrictions.get(descriptor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn basic(realm: Option<&str>) -> BasicChallenge {
        BasicChallenge::new(realm, Arc::new(|u, p| (u, p) == ("b", "b")))
    }

    fn basic_header(user: &str, pass: &str) -> String {
        format!("Basic {}", STANDARD.encode(format!("{}:{}", user, pass)))
    }

    fn status(verdict: &Verdict) -> u16 {
        match verdict {
            Verdict::Passed(_) => 200,
            Verdict::Challenged(r) => r.status_code(),
        }
    }

    #[test]
    fn test_basic_without_credentials() {
        let verdict = basic(None).evaluate(&Request::get("/basic"));
        match verdict {
            Verdict::Challenged(r) => {
                assert_eq!(r.status_code(), 401);
                assert_eq!(
                    r.header("WWW-Authenticate"),
                    Some("Basic realm=\"AccessRestricted\"")
                );
            }
            _ => panic!("Expected Challenged"),
        }
    }

    #[test]
    fn test_basic_with_credentials() {
        let challenge = basic(Some("Admin"));
        let ok = Request::get("/basic").with_header("Authorization", &basic_header("b", "b"));
        let wrong = Request::get("/basic").with_header("Authorization", &basic_header("b", "x"));
        match challenge.evaluate(&ok) {
            Verdict::Passed(user) => assert_eq!(user, "b"),
            _ => panic!("Expected Passed"),
        }
        assert_eq!(status(&challenge.evaluate(&wrong)), 401);
    }

    #[test]
    fn test_basic_malformed_header() {
        let challenge = basic(None);
        let other = Request::get("/").with_header("Authorization", "Bearer abc");
        let garbage = Request::get("/").with_header("Authorization", "Basic !!!");
        assert_eq!(status(&challenge.evaluate(&other)), 400);
        assert_eq!(status(&challenge.evaluate(&garbage)), 400);
    }

    fn digest(hashed: bool) -> DigestChallenge {
        let lookup: DigestLookup = if hashed {
            Arc::new(|u| (u == "d").then(|| md5_hex("d:AccessRestricted:d")))
        } else {
            Arc::new(|u| (u == "d").then(|| "d".to_string()))
        };
        DigestChallenge::new(
            DigestOptions {
                passwords_hashed: hashed,
                ..Default::default()
            },
            lookup,
        )
    }

    // 模拟客户端按 RFC 2617 计算 response
    fn digest_header(challenge: &DigestChallenge, method: &str, uri: &str, password: &str) -> String {
        let nonce = challenge.nonce();
        let ha1 = md5_hex(&format!("d:{}:{}", challenge.realm(), password));
        let ha2 = md5_hex(&format!("{}:{}", method, uri));
        let response = md5_hex(&format!("{}:{}:00000001:abcdef:auth:{}", ha1, nonce, ha2));
        format!(
            "Digest username=\"d\", realm=\"{}\", nonce=\"{}\", uri=\"{}\", qop=auth, nc=00000001, cnonce=\"abcdef\", response=\"{}\", opaque=\"{}\"",
            challenge.realm(),
            nonce,
            uri,
            response,
            md5_hex(challenge.opaque())
        )
    }

    #[test]
    fn test_digest_defaults() {
        let challenge = digest(false);
        assert_eq!(challenge.realm(), "AccessRestricted");
        assert_eq!(challenge.opaque(), "AccessRestricted");
        let verdict = challenge.evaluate(&Request::get("/digest"));
        match verdict {
            Verdict::Challenged(r) => {
                assert_eq!(r.status_code(), 401);
                let header = r.header("WWW-Authenticate").unwrap();
                assert!(header.starts_with("Digest realm=\"AccessRestricted\""));
                assert!(header.contains("qop=\"auth\""));
            }
            _ => panic!("Expected Challenged"),
        }
    }

    #[test]
    fn test_digest_plain_password() {
        let challenge = digest(false);
        let good = Request::get("/digest")
            .with_header("Authorization", &digest_header(&challenge, "GET", "/digest", "d"));
        let bad = Request::get("/digest")
            .with_header("Authorization", &digest_header(&challenge, "GET", "/digest", "x"));
        assert_eq!(status(&challenge.evaluate(&good)), 200);
        assert_eq!(status(&challenge.evaluate(&bad)), 401);
    }

    #[test]
    fn test_digest_hashed_password() {
        let challenge = digest(true);
        let request = Request::post("/digest")
            .with_header("Authorization", &digest_header(&challenge, "POST", "/digest", "d"));
        assert_eq!(status(&challenge.evaluate(&request)), 200);
    }

    #[test]
    fn test_digest_uri_mismatch_is_bad_request() {
        let challenge = digest(false);
        let request = Request::get("/digest")
            .with_header("Authorization", &digest_header(&challenge, "GET", "/other", "d"));
        assert_eq!(status(&challenge.evaluate(&request)), 400);
    }

    #[test]
    fn test_digest_forged_nonce() {
        let challenge = digest(false);
        let other = digest(false);
        // 另一个实例签发的 nonce 使用不同的私钥
        let request = Request::get("/digest")
            .with_header("Authorization", &digest_header(&other, "GET", "/digest", "d"));
        assert_eq!(status(&challenge.evaluate(&request)), 401);
    }

    #[test]
    fn test_parse_auth_params() {
        let params = parse_auth_params(r#"username="d", qop=auth, nc=00000001, uri="/a?b=c""#);
        assert_eq!(params.get("username").map(String::as_str), Some("d"));
        assert_eq!(params.get("qop").map(String::as_str), Some("auth"));
        assert_eq!(params.get("uri").map(String::as_str), Some("/a?b=c"));
    }

    /// 注册表按 带格式 → action → 通配 的顺序查找限制
    #[test]
    fn test_registry_lookup_with_mock_challenge() {
        let mut mock = MockChallenge::new();
        mock.expect_evaluate()
            .times(2)
            .returning(|_| Verdict::Challenged(Response::with_status(401)));
        mock.expect_scheme().return_const(Scheme::Basic);

        let mut registry = AuthRegistry::new();
        let restriction = AuthRestriction::new(Arc::new(mock));
        registry.restrict(&[ActionDescriptor::bare("secret")], restriction, true);

        let request = Request::get("/secret");
        assert!(registry
            .check(&ActionDescriptor::parse("secret.json"), &request)
            .is_some());
        assert!(registry
            .check(&ActionDescriptor::bare("secret"), &request)
            .is_some());
        assert!(registry
            .check(&ActionDescriptor::bare("public"), &request)
            .is_none());
        assert_eq!(
            registry
                .restriction(&ActionDescriptor::bare("secret"))
                .map(|r| r.scheme()),
            Some(Scheme::Basic)
        );
    }

    #[test]
    fn test_registry_keep_existing() {
        let mut first = MockChallenge::new();
        first.expect_scheme().return_const(Scheme::Basic);
        let mut second = MockChallenge::new();
        second.expect_scheme().return_const(Scheme::Digest);

        let mut registry = AuthRegistry::new();
        let all = [ActionDescriptor::wildcard()];
        registry.restrict(&all, AuthRestriction::new(Arc::new(first)), true);
        assert_eq!(
            registry.restrict(&all, AuthRestriction::new(Arc::new(second)), true),
            0
        );
        assert_eq!(
            registry
                .restriction(&ActionDescriptor::bare("any"))
                .map(|r| r.scheme()),
            Some(Scheme::Basic)
        );
    }
}
