//! Operation categories
//!
//! Every gated route belongs to exactly one category, and each category has
//! its own quota tier.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Named quota tier for a class of operations
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "UPPERCASE", from = "String")]
pub enum Category {
    /// General API requests
    #[default]
    General,
    /// Login and registration
    Auth,
    /// Create, update and delete operations
    Write,
    /// Privileged operations
    Admin,
    /// Large payloads and file uploads
    Upload,
}

impl Category {
    /// All categories, in declaration order
    pub const ALL: [Category; 5] = [
        Category::General,
        Category::Auth,
        Category::Write,
        Category::Admin,
        Category::Upload,
    ];

    /// Upper-case name used in bucket keys, headers and JSON
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::General => "GENERAL",
            Category::Auth => "AUTH",
            Category::Write => "WRITE",
            Category::Admin => "ADMIN",
            Category::Upload => "UPLOAD",
        }
    }

    /// Parse a category name, falling back to `General` for anything unknown
    pub fn from_name_or_default(name: &str) -> Self {
        name.parse().unwrap_or_else(|_| {
            tracing::debug!("Unknown rate limit category {:?}, using GENERAL", name);
            Category::General
        })
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl From<String> for Category {
    fn from(name: String) -> Self {
        Category::from_name_or_default(&name)
    }
}

impl FromStr for Category {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "GENERAL" => Ok(Category::General),
            "AUTH" => Ok(Category::Auth),
            "WRITE" => Ok(Category::Write),
            "ADMIN" => Ok(Category::Admin),
            "UPLOAD" => Ok(Category::Upload),
            _ => Err(format!("Invalid rate limit category: {}", s)),
        }
    }
}
