//! Client for the NWPU unified identity gateway (CAS) and the campus services behind it.
//!
//! A [`Session`] holds the cookie jar. [`OaLogin`] runs one login against the gateway, by
//! password (with optional MFA) or by QR code. The modules under [`service`] turn an
//! authenticated session into per-service tokens and typed API clients.

pub mod login;
pub mod redirect;
pub mod service;
pub mod session;
pub mod settings;
pub mod utils;

pub use login::{OaLogin, PasswordStep};
pub use redirect::RedirectChain;
pub use session::Session;
pub use settings::Settings;
