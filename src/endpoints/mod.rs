//! The staff-card platform's REST endpoints.

mod brand_settings;
mod login;
mod organization;

pub use brand_settings::{save_brand_settings, BrandSettings, Permissions, Upload};
pub use login::login;
pub use organization::organization_settings;

use crate::{
    storage::{Storage, AUTH_TOKEN},
    Brand, Credentials, FailureKind, UnauthorizedSignal,
};
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde_derive::Deserialize;
use std::{
    fmt::{self, Debug, Formatter},
    sync::Arc,
};
use url::Url;

/// The operations the panel needs from the server.
///
/// [`ApiClient`] is the real thing.
#[allow(async_fn_in_trait)]
pub trait OrganizationApi {
    /// The signal raised whenever the server rejects our token.
    fn unauthorized(&self) -> &UnauthorizedSignal;

    /// Where the API lives. Uploaded assets are served relative to this.
    fn base_url(&self) -> &Url;

    async fn login(
        &self,
        email: &str,
        password: &str,
    ) -> Result<Credentials, ApiError>;

    async fn organization_settings(&self) -> Result<Option<Brand>, ApiError>;

    async fn save_brand_settings(
        &self,
        settings: &BrandSettings,
    ) -> Result<Option<Brand>, ApiError>;
}

/// A HTTP client which knows how to talk to the platform.
///
/// The bearer token is read from storage on every request, so the client
/// always uses whatever the session most recently saved.
pub struct ApiClient {
    client: Client,
    base_url: Url,
    storage: Arc<dyn Storage>,
    unauthorized: UnauthorizedSignal,
}

impl ApiClient {
    pub fn new(
        client: Client,
        mut base_url: Url,
        storage: Arc<dyn Storage>,
    ) -> Self {
        // make sure relative paths are joined onto the end of the base URL
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        ApiClient {
            client,
            base_url,
            storage,
            unauthorized: UnauthorizedSignal::new(),
        }
    }

    pub fn base_url(&self) -> &Url { &self.base_url }

    pub fn unauthorized(&self) -> &UnauthorizedSignal { &self.unauthorized }

    pub(crate) fn endpoint(&self, path: &str) -> Result<Url, ApiError> {
        self.base_url
            .join(path.trim_start_matches('/'))
            .map_err(ApiError::from)
    }

    pub(crate) fn request(
        &self,
        method: Method,
        path: &str,
    ) -> Result<RequestBuilder, ApiError> {
        let url = self.endpoint(path)?;
        log::debug!("Sending a {} request to {}", method, url);

        Ok(self.client.request(method, url))
    }

    fn token(&self) -> Option<String> {
        match self.storage.get(AUTH_TOKEN) {
            Ok(token) => token,
            Err(e) => {
                log::warn!("Unable to read the auth token: {}", e);
                None
            },
        }
    }

    pub(crate) async fn send<T>(
        &self,
        request: RequestBuilder,
        auth: Auth,
    ) -> Result<T, ApiError>
    where
        T: DeserializeOwned,
    {
        let request = match (auth, self.token()) {
            (Auth::Bearer, Some(token)) => request.bearer_auth(token),
            _ => request,
        };

        let response = request.send().await?;
        let status = response.status();
        log::trace!("Headers: {:#?}", response.headers());

        let body = response.text().await?;
        log::trace!("Response ({}): {}", status, body);

        self.interpret(status, &body, auth)
    }

    fn interpret<T>(
        &self,
        status: StatusCode,
        body: &str,
        auth: Auth,
    ) -> Result<T, ApiError>
    where
        T: DeserializeOwned,
    {
        if status == StatusCode::UNAUTHORIZED {
            let message = error_message(body);

            if auth == Auth::Bearer {
                log::warn!("The server rejected our token");
                self.unauthorized.raise();
            }

            return Err(ApiError::Unauthorized { message });
        }

        if !status.is_success() {
            return Err(ApiError::Server {
                status: status.as_u16(),
                message: error_message(body),
            });
        }

        serde_json::from_str(body).map_err(ApiError::from)
    }
}

impl OrganizationApi for ApiClient {
    fn unauthorized(&self) -> &UnauthorizedSignal { &self.unauthorized }

    fn base_url(&self) -> &Url { &self.base_url }

    async fn login(
        &self,
        email: &str,
        password: &str,
    ) -> Result<Credentials, ApiError> {
        login(self, email, password).await
    }

    async fn organization_settings(&self) -> Result<Option<Brand>, ApiError> {
        organization_settings(self).await
    }

    async fn save_brand_settings(
        &self,
        settings: &BrandSettings,
    ) -> Result<Option<Brand>, ApiError> {
        save_brand_settings(self, settings).await
    }
}

impl Debug for ApiClient {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiClient")
            .field("base_url", &self.base_url.as_str())
            .field("unauthorized", &self.unauthorized)
            .finish()
    }
}

/// Should a request carry the bearer token?
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) enum Auth {
    Bearer,
    /// Used when logging in, a rejection here is just a bad password.
    Anonymous,
}

/// Most responses wrap their payload in a `data` field.
#[derive(Debug, Deserialize)]
pub(crate) struct Envelope<T> {
    #[serde(default)]
    pub(crate) data: Option<T>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: Option<String>,
}

fn error_message(body: &str) -> Option<String> {
    serde_json::from_str::<ErrorBody>(body)
        .ok()
        .and_then(|b| b.message)
        .filter(|m| !m.trim().is_empty())
}

/// Errors that may occur while talking to the server.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// The request never made it to the server, or the response never made
    /// it back.
    #[error("Unable to send the request")]
    Network(#[from] reqwest::Error),
    #[error("Unable to build the request URL")]
    BadUrl(#[from] url::ParseError),
    /// The server didn't accept our credentials.
    #[error("Unauthorized")]
    Unauthorized { message: Option<String> },
    #[error("The server responded with {status}")]
    Server {
        status: u16,
        message: Option<String>,
    },
    /// Unable to parse the response.
    #[error("Unable to parse the response")]
    Parse(#[from] serde_json::Error),
    #[error("Unable to read the file to upload")]
    Upload(#[source] std::io::Error),
}

impl ApiError {
    pub fn kind(&self) -> FailureKind {
        match self {
            ApiError::Network(e) if e.is_decode() => FailureKind::Parse,
            ApiError::Network(_) | ApiError::BadUrl(_) => FailureKind::Network,
            ApiError::Unauthorized { .. } => FailureKind::Unauthorized,
            ApiError::Server { .. } => FailureKind::Server,
            ApiError::Parse(_) => FailureKind::Parse,
            ApiError::Upload(_) => FailureKind::Storage,
        }
    }

    /// The message the server gave us, if any, otherwise `fallback`.
    pub fn user_message<'a>(&'a self, fallback: &'a str) -> &'a str {
        match self {
            ApiError::Unauthorized {
                message: Some(message),
            }
            | ApiError::Server {
                message: Some(message),
                ..
            } => message.as_str(),
            _ => fallback,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryStorage;
    use std::sync::atomic::{AtomicUsize, Ordering};

    pub(crate) fn client(base: &str) -> ApiClient {
        ApiClient::new(
            Client::new(),
            Url::parse(base).unwrap(),
            Arc::new(MemoryStorage::new()),
        )
    }

    fn count_signals(
        api: &ApiClient,
    ) -> (Arc<AtomicUsize>, crate::Subscription) {
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        let subscription = api.unauthorized().subscribe(move || {
            c.fetch_add(1, Ordering::SeqCst);
        });

        (count, subscription)
    }

    #[test]
    fn endpoints_are_relative_to_the_base_url() {
        let api = client("https://cards.example.com/api");

        let got = api.endpoint("/organizations/brand-settings").unwrap();

        assert_eq!(
            got.as_str(),
            "https://cards.example.com/api/organizations/brand-settings"
        );
    }

    #[test]
    fn a_rejected_token_raises_the_signal() {
        let api = client("https://cards.example.com/api/");
        let (count, _subscription) = count_signals(&api);

        let got: Result<Envelope<Brand>, _> = api.interpret(
            StatusCode::UNAUTHORIZED,
            r#"{"message":"Unauthenticated."}"#,
            Auth::Bearer,
        );

        let err = got.unwrap_err();
        assert_eq!(err.kind(), FailureKind::Unauthorized);
        assert_eq!(err.user_message("nope"), "Unauthenticated.");
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn anonymous_requests_never_raise_the_signal() {
        let api = client("https://cards.example.com/api/");
        let (count, _subscription) = count_signals(&api);

        let got: Result<Credentials, _> =
            api.interpret(StatusCode::UNAUTHORIZED, "", Auth::Anonymous);

        assert!(matches!(got, Err(ApiError::Unauthorized { message: None })));
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn server_errors_keep_their_message() {
        let api = client("https://cards.example.com/api/");

        let got: Result<Envelope<Brand>, _> = api.interpret(
            StatusCode::UNPROCESSABLE_ENTITY,
            r#"{"message":"The logo field is required."}"#,
            Auth::Bearer,
        );

        let err = got.unwrap_err();
        assert_eq!(err.kind(), FailureKind::Server);
        assert_eq!(
            err.user_message("Unable to save settings"),
            "The logo field is required."
        );
    }

    #[test]
    fn server_errors_without_a_body_use_the_fallback() {
        let api = client("https://cards.example.com/api/");

        let got: Result<Envelope<Brand>, _> = api.interpret(
            StatusCode::INTERNAL_SERVER_ERROR,
            "<html>oops</html>",
            Auth::Bearer,
        );

        let err = got.unwrap_err();
        assert!(matches!(err, ApiError::Server { status: 500, .. }));
        assert_eq!(
            err.user_message("Unable to load settings"),
            "Unable to load settings"
        );
    }

    #[test]
    fn garbage_bodies_are_parse_errors() {
        let api = client("https://cards.example.com/api/");

        let got: Result<Envelope<Brand>, _> =
            api.interpret(StatusCode::OK, "<html>", Auth::Bearer);

        assert_eq!(got.unwrap_err().kind(), FailureKind::Parse);
    }
}
