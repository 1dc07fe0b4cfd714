//! Input rules for account and profile fields.

use once_cell::sync::Lazy;
use regex::Regex;

static EMAIL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[a-zA-Z0-9.!#$%&'*+/=?^_`{|}~-]+@[a-zA-Z0-9-]+(?:\.[a-zA-Z0-9-]+)*$")
        .expect("email pattern compiles")
});

static NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-zA-Z]{3,}(\s[a-zA-Z]+)?$").expect("name pattern compiles"));

static USERNAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-zA-Z0-9_.]+$").expect("username pattern compiles"));

static URL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(concat!(
        r"(?i)^(https?://)?",
        r"((([a-z\d]([a-z\d-]*[a-z\d])*)\.)+[a-z]{2,}|",
        r"((\d{1,3}\.){3}\d{1,3}))",
        r"(:\d+)?(/[-a-z\d%_.~+]*)*",
        r"(\?[;&a-z\d%_.~+=-]*)?",
        r"(#[-a-z\d_]*)?$",
    ))
    .expect("url pattern compiles")
});

pub const RESERVED_USERNAMES: &[&str] = &["signup", "profile", "explore", "post", "newpost", "404"];

pub const MIN_PASSWORD_LEN: usize = 6;

pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

pub fn is_valid_email(email: &str) -> bool {
    EMAIL_RE.is_match(email)
}

/// At least six characters with a digit, a lowercase and an uppercase letter.
pub fn is_strong_password(password: &str) -> bool {
    password.chars().count() >= MIN_PASSWORD_LEN
        && password.chars().any(|c| c.is_ascii_digit())
        && password.chars().any(|c| c.is_ascii_lowercase())
        && password.chars().any(|c| c.is_ascii_uppercase())
}

pub fn is_valid_name(name: &str) -> bool {
    NAME_RE.is_match(name)
}

pub fn is_valid_username(username: &str) -> bool {
    username.chars().count() >= 3 && USERNAME_RE.is_match(username)
}

pub fn is_reserved_username(username: &str) -> bool {
    let lower = username.to_lowercase();
    RESERVED_USERNAMES.contains(&lower.as_str())
}

pub fn is_valid_url(url: &str) -> bool {
    URL_RE.is_match(url)
}

/// Editable profile fields with their accepted length ranges.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProfileField {
    Name,
    Username,
    Website,
    Bio,
    Email,
}

impl ProfileField {
    pub fn parse(change: &str) -> Option<Self> {
        match change {
            "name" => Some(Self::Name),
            "username" => Some(Self::Username),
            "website" => Some(Self::Website),
            "bio" => Some(Self::Bio),
            "email" => Some(Self::Email),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Name => "name",
            Self::Username => "username",
            Self::Website => "website",
            Self::Bio => "bio",
            Self::Email => "email",
        }
    }

    pub fn length_range(&self) -> (usize, usize) {
        match self {
            Self::Name => (3, 50),
            Self::Username => (3, 20),
            Self::Website => (0, 120),
            Self::Bio => (0, 120),
            Self::Email => (0, 100),
        }
    }

    pub fn is_unique(&self) -> bool {
        matches!(self, Self::Username | Self::Email)
    }

    /// Checks length and format. Uniqueness is checked against the store.
    pub fn accepts(&self, value: &str) -> bool {
        let len = value.chars().count();
        let (min, max) = self.length_range();
        if len < min || len > max {
            return false;
        }
        match self {
            Self::Email => is_valid_email(value),
            Self::Website if len > 1 => is_valid_url(value),
            Self::Username => USERNAME_RE.is_match(value),
            _ => true,
        }
    }
}
