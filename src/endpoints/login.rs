use super::{ApiClient, ApiError, Auth};
use crate::Credentials;
use reqwest::Method;
use serde_derive::Serialize;
use std::fmt::{self, Debug, Formatter};

const PATH: &str = "organization-login";

/// Authenticate with the platform and get the [`Credentials`] for a new
/// session.
///
/// This doesn't touch the current session. A rejected login is reported as
/// [`ApiError::Unauthorized`] without raising the unauthorized signal.
pub async fn login(
    api: &ApiClient,
    email: &str,
    password: &str,
) -> Result<Credentials, ApiError> {
    let data = LoginData { email, password };
    log::trace!("Payload: {:#?}", data);

    let request = api.request(Method::POST, PATH)?.json(&data);
    let credentials: Credentials = api.send(request, Auth::Anonymous).await?;

    log::debug!(
        "Authenticated as {:?} with role {:?}",
        credentials.user.email,
        credentials.user.role
    );

    Ok(credentials)
}

#[derive(Copy, Clone, Serialize)]
struct LoginData<'a> {
    email: &'a str,
    password: &'a str,
}

impl<'a> Debug for LoginData<'a> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoginData")
            .field("email", &self.email)
            .field("password", &"********")
            .finish()
    }
}
