//! Bearer tokens issued by the appliance token endpoint.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// The two token kinds the appliance issues, told apart by their structure.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TokenKind {
    /// Opaque single-segment token.
    Bearer,
    /// Three `.` separated segments (header, payload and signature).
    SignedBearer,
}

impl TokenKind {
    /// Classifies a raw token by counting its `.` separated segments.
    ///
    /// ```
    /// use scc_client::auth::TokenKind;
    ///
    /// assert_eq!(TokenKind::classify("abc").unwrap(), TokenKind::Bearer);
    /// assert_eq!(TokenKind::classify("a.b.c").unwrap(), TokenKind::SignedBearer);
    /// assert!(TokenKind::classify("a.b").is_err());
    /// ```
    pub fn classify(value: &str) -> Result<Self, TokenError> {
        match value.split('.').count() {
            1 => Ok(TokenKind::Bearer),
            3 => Ok(TokenKind::SignedBearer),
            segments => Err(TokenError::UnidentifiedFormat(segments)),
        }
    }

    /// Scheme used in the `Authorization` header.
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenKind::Bearer => "Bearer",
            TokenKind::SignedBearer => "SignedBearer",
        }
    }
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug, PartialEq)]
pub enum TokenError {
    #[error("token is in an unidentified format: {0} segments")]
    UnidentifiedFormat(usize),
    #[error("token is empty")]
    Empty,
}

/// A short-lived access token, only ever held in memory.
#[derive(Clone, PartialEq, Eq)]
pub struct Token {
    value: String,
    kind: TokenKind,
}

impl Token {
    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn kind(&self) -> TokenKind {
        self.kind
    }

    /// Value of the `Authorization` header carrying this token.
    pub fn authorization(&self) -> String {
        format!("{} {}", self.kind, self.value)
    }
}

impl FromStr for Token {
    type Err = TokenError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        if value.is_empty() {
            return Err(TokenError::Empty);
        }
        Ok(Token {
            kind: TokenKind::classify(value)?,
            value: value.to_string(),
        })
    }
}

// tokens must never reach the logs
impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Token")
            .field("kind", &self.kind)
            .field("value", &"<redacted>")
            .finish()
    }
}
