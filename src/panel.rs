//! The admin panel's application context.

use crate::{
    endpoints::{ApiError, BrandSettings, OrganizationApi},
    router::{gate, Gate, Navigation, Route, Router},
    Brand, BrandSync, OrganizationProfile, SessionStore, Storage,
    StorageError, Subscription,
};
use std::sync::Arc;

/// Owns the session and wires it up to the API and the router.
///
/// Creating a [`Panel`] restores the previous session and starts listening
/// for the API's unauthorized signal. The listener is removed when the panel
/// is dropped.
pub struct Panel<A> {
    api: A,
    session: Arc<SessionStore>,
    router: Arc<dyn Router>,
    _unauthorized: Subscription,
}

impl<A: OrganizationApi> Panel<A> {
    pub fn mount(
        api: A,
        storage: Arc<dyn Storage>,
        router: Arc<dyn Router>,
    ) -> Self {
        let session = Arc::new(SessionStore::new(storage));

        let subscription = {
            let session = Arc::clone(&session);
            let router = Arc::clone(&router);

            api.unauthorized().subscribe(move || {
                if let Err(e) = session.logout() {
                    log::warn!("Unable to clear the rejected session: {}", e);
                }
                router.navigate(Route::Login, Navigation::Replace);
            })
        };

        session.boot();

        Panel {
            api,
            session,
            router,
            _unauthorized: subscription,
        }
    }

    pub fn session(&self) -> &Arc<SessionStore> { &self.session }

    pub fn api(&self) -> &A { &self.api }

    /// Fetch the organization's brand if the session is waiting on one.
    ///
    /// This never fails, problems are logged and reported in the returned
    /// [`BrandSync`].
    pub async fn sync_brand(&self) -> BrandSync {
        let ticket = match self.session.take_brand_fetch() {
            Some(ticket) => ticket,
            None => return BrandSync::Idle,
        };

        let result = self.api.organization_settings().await;
        self.session.finish_brand_fetch(ticket, result)
    }

    /// Log in, then go to the user's home page.
    ///
    /// If the server rejects the login the session is left alone.
    pub async fn sign_in(
        &self,
        email: &str,
        password: &str,
    ) -> Result<Route, SignInError> {
        let credentials = self.api.login(email, password).await?;
        let home = Route::home_for(&credentials.user);

        self.session.login(credentials)?;
        self.router.navigate(home, Navigation::Push);

        let outcome = self.sync_brand().await;
        log::debug!("Brand sync after login: {:?}", outcome);

        Ok(home)
    }

    pub fn sign_out(&self) -> Result<(), StorageError> {
        let outcome = self.session.logout();
        self.router.navigate(Route::Login, Navigation::Replace);

        outcome
    }

    /// Get the brand settings form, pre-filled with what the server has.
    pub async fn load_brand_settings(&self) -> Result<BrandSettings, ApiError> {
        let settings = match self.api.organization_settings().await? {
            Some(brand) => BrandSettings::from_brand(&brand),
            None => BrandSettings::default(),
        };

        Ok(settings)
    }

    /// Save the brand settings form and use the result as the session's
    /// brand.
    pub async fn save_brand_settings(
        &self,
        settings: &BrandSettings,
    ) -> Result<Brand, SettingsError> {
        validate(settings)?;

        let brand = self
            .api
            .save_brand_settings(settings)
            .await?
            .ok_or(SettingsError::EmptyResponse)?;

        self.session.update_brand(brand.clone())?;
        log::info!("Brand settings updated successfully");

        Ok(brand)
    }

    /// Can `route` be shown right now?
    pub fn gate(&self, route: Route) -> Gate { gate(route, &self.session) }

    /// What the dashboard shows about the organization.
    pub fn organization_profile(&self) -> OrganizationProfile {
        OrganizationProfile::derive(
            self.session.user().as_ref(),
            self.session.brand().as_ref(),
            self.api.base_url(),
        )
    }
}

/// The logo is required unless the server already has one, and anything
/// uploaded has to be an image.
fn validate(settings: &BrandSettings) -> Result<(), SettingsError> {
    if settings.logo.is_none() && settings.new_logo.is_none() {
        return Err(SettingsError::LogoRequired);
    }

    let uploads = settings.new_logo.iter().chain(settings.new_cover.iter());
    for upload in uploads {
        if !upload.is_image() {
            return Err(SettingsError::NotAnImage {
                file_name: upload.file_name.clone(),
            });
        }
    }

    Ok(())
}

/// Errors from [`Panel::sign_in()`].
#[derive(Debug, thiserror::Error)]
pub enum SignInError {
    #[error("The login request failed")]
    Api(#[from] ApiError),
    #[error("Unable to save the session")]
    Storage(#[from] StorageError),
}

impl SignInError {
    pub fn user_message(&self) -> &str {
        match self {
            SignInError::Api(e) => e.user_message("Unable to sign in"),
            SignInError::Storage(_) => "Unable to save the session",
        }
    }
}

/// Errors from saving the brand settings form.
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("Logo is required")]
    LogoRequired,
    #[error("\"{file_name}\" is not an image")]
    NotAnImage { file_name: String },
    #[error("The server didn't send back the updated brand")]
    EmptyResponse,
    #[error("Unable to save the brand settings")]
    Api(#[from] ApiError),
    #[error("Unable to store the updated brand")]
    Storage(#[from] StorageError),
}
