//! Token based authentication for appliance requests.
mod authenticator;
mod token;

pub use authenticator::{
    AuthCredential, AuthError, HistoryEntry, ResponseHistory, TokenAuthenticator, TOKEN_PATH,
};
pub use token::{Token, TokenError, TokenKind};
