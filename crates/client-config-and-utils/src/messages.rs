//! Generic user-facing messages.
//!
//! Server-provided reasons always win; these are only shown when the server
//! gave none (network failure, empty rejection body).

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// UI language for generic messages.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Locale {
    #[default]
    #[serde(rename = "en")]
    En,
    #[serde(rename = "zh-CN")]
    ZhCn,
}

impl Locale {
    pub fn as_str(&self) -> &'static str {
        match self {
            Locale::En => "en",
            Locale::ZhCn => "zh-CN",
        }
    }
}

impl fmt::Display for Locale {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Locale {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "en" | "en-us" | "en-gb" => Ok(Locale::En),
            "zh" | "zh-cn" | "zh-hans" => Ok(Locale::ZhCn),
            other => Err(format!("Unsupported locale: {}", other)),
        }
    }
}

/// Message catalog for one locale.
#[derive(Debug, Clone, Copy)]
pub struct Messages {
    locale: Locale,
}

impl Messages {
    pub fn new(locale: Locale) -> Self {
        Self { locale }
    }

    /// Login was rejected without a server-provided reason.
    pub fn login_failed(&self) -> &'static str {
        match self.locale {
            Locale::En => "Login failed, please try again",
            Locale::ZhCn => "登录失败，请重试",
        }
    }

    /// The request never completed.
    pub fn network_unavailable(&self) -> &'static str {
        match self.locale {
            Locale::En => "Unable to reach the server, please check your connection",
            Locale::ZhCn => "无法连接服务器，请检查网络",
        }
    }

    /// The identity provider redirected back with an error code.
    pub fn provider_denied(&self) -> &'static str {
        match self.locale {
            Locale::En => "Third-party login was cancelled or denied",
            Locale::ZhCn => "第三方登录已取消或被拒绝",
        }
    }

    /// The session could not be saved locally.
    pub fn session_not_saved(&self) -> &'static str {
        match self.locale {
            Locale::En => "Login succeeded but the session could not be saved",
            Locale::ZhCn => "登录成功，但无法保存会话",
        }
    }
}
