//! Per-user chat session state.
//!
//! Everything the client needs to build a chat request lives in one
//! [`SessionContext`] owned by the host: the backend session created by the
//! spreadsheet upload, the optional API key, and the student's profile.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::rate_limit::RateLimitGate;
use crate::store::KeyValueStore;

/// Category id the backend uses for "no filter".
pub const ALL_CATEGORIES_ID: &str = "all";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CategoryKind {
    All,
    /// 共通科目
    Common,
    /// 専門科目
    Specialized,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Category {
    pub id: &'static str,
    pub name: &'static str,
    pub kind: CategoryKind,
}

const fn category(id: &'static str, name: &'static str, kind: CategoryKind) -> Category {
    Category { id, name, kind }
}

/// Course categories offered by the backend, in display order.
pub const CATEGORIES: &[Category] = &[
    category("all", "すべて", CategoryKind::All),
    category("1", "総合科目・学士基盤科目", CategoryKind::Common),
    category("2", "体育", CategoryKind::Common),
    category("3", "英語", CategoryKind::Common),
    category("4", "初修外国語（独・中）", CategoryKind::Common),
    category("5", "初修外国語（仏・露・西）", CategoryKind::Common),
    category("6", "情報", CategoryKind::Common),
    category("7", "芸術", CategoryKind::Common),
    category("8", "自由科目", CategoryKind::Common),
    category("9", "教職・博物館", CategoryKind::Common),
    category("A", "人文・文化学群", CategoryKind::Specialized),
    category("B", "社会・国際学群", CategoryKind::Specialized),
    category("C", "人間学群", CategoryKind::Specialized),
    category("E", "生命環境学群", CategoryKind::Specialized),
    category("F", "理工学群", CategoryKind::Specialized),
    category("G", "情報学群", CategoryKind::Specialized),
    category("H", "医学群", CategoryKind::Specialized),
    category("WT", "体育専門学群", CategoryKind::Specialized),
    category("Y", "芸術専門学群", CategoryKind::Specialized),
    category("V", "グローバル教育院", CategoryKind::Specialized),
];

pub fn category_by_id(id: &str) -> Option<&'static Category> {
    CATEGORIES.iter().find(|c| c.id == id)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CourseType {
    Specialized,
    Common,
}

/// Filters the student picked in the sidebar.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StudentProfile {
    pub category: Option<String>,
    pub year_level: Option<String>,
    pub course_type: Option<CourseType>,
}

/// Body of `POST /upload`'s response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadResponse {
    pub session_id: String,
    pub course_count: usize,
    pub message: String,
}

/// Body of `POST /chat`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatRequest {
    pub message: String,
    pub session_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub year_level: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub course_type: Option<CourseType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    pub stream: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionError {
    /// The message was empty or whitespace.
    EmptyMessage,
    /// No spreadsheet has been uploaded yet.
    NoSession,
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionError::EmptyMessage => write!(f, "メッセージを入力してください"),
            SessionError::NoSession => {
                write!(f, "XLSXファイルをアップロードしてください")
            }
        }
    }
}

impl std::error::Error for SessionError {}

#[derive(Debug, Clone, Default)]
pub struct SessionContext {
    pub session_id: Option<String>,
    pub course_count: usize,
    pub api_key: Option<String>,
    pub profile: StudentProfile,
}

impl SessionContext {
    pub fn new(api_key: Option<String>) -> Self {
        Self {
            api_key,
            ..Self::default()
        }
    }

    /// Records the session created by a successful upload.
    pub fn attach(&mut self, upload: UploadResponse) {
        tracing::info!(
            session_id = %upload.session_id,
            course_count = upload.course_count,
            "attached session"
        );
        self.session_id = Some(upload.session_id);
        self.course_count = upload.course_count;
    }

    pub fn is_ready(&self) -> bool {
        self.session_id.is_some()
    }

    fn credential(&self) -> Option<&str> {
        self.api_key
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty())
    }

    /// Requests are only rate limited when they go to the model, which
    /// happens only with a credential.
    pub fn requires_rate_limit(&self) -> bool {
        self.credential().is_some()
    }

    /// Builds the chat request body for `message`.
    pub fn chat_request(&self, message: &str) -> Result<ChatRequest, SessionError> {
        if message.trim().is_empty() {
            return Err(SessionError::EmptyMessage);
        }
        let session_id = self.session_id.clone().ok_or(SessionError::NoSession)?;

        let category = self
            .profile
            .category
            .clone()
            .filter(|c| !c.is_empty() && c != ALL_CATEGORIES_ID);

        Ok(ChatRequest {
            message: message.to_string(),
            session_id,
            category,
            year_level: self.profile.year_level.clone().filter(|y| !y.is_empty()),
            course_type: self.profile.course_type,
            api_key: self.credential().map(str::to_string),
            stream: true,
        })
    }

    /// Forgets the credential and all rate-limit bookkeeping.
    pub fn clear_credential<S, Tz>(&mut self, gate: &mut RateLimitGate<S, Tz>)
    where
        S: KeyValueStore,
        Tz: chrono::TimeZone,
        Tz::Offset: fmt::Display,
    {
        self.api_key = None;
        gate.reset();
    }
}
