//! An administrative client for a digital staff-card platform.
//!
//! The [`SessionStore`] keeps track of who is logged in and what their
//! organization looks like, persisting it to a [`Storage`] so it survives
//! restarts. A [`Panel`] ties the session to the platform's API, logging the
//! user out whenever the server rejects their token.

#![forbid(unsafe_code)]

#[cfg(test)]
#[macro_use]
extern crate pretty_assertions;

pub mod endpoints;
mod panel;
mod profile;
mod records;
pub mod router;
mod session;
mod signal;
pub mod storage;

pub use endpoints::{ApiClient, ApiError, OrganizationApi};
pub use panel::{Panel, SettingsError, SignInError};
pub use profile::{asset_url, OrganizationProfile, PLACEHOLDER_LOGO};
pub use records::{Brand, Credentials, Organization, User, STAFF_ROLE};
pub use session::{BrandSync, BrandTicket, FailureKind, SessionStore};
pub use signal::{Subscription, UnauthorizedSignal};
pub use storage::{FileStorage, MemoryStorage, Storage, StorageError};

/// The default user agent to use when communicating with the platform.
pub const DEFAULT_USER_AGENT: &str =
    concat!(env!("CARGO_PKG_NAME"), "-", env!("CARGO_PKG_VERSION"));
