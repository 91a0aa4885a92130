use super::{ApiClient, ApiError, Auth, Envelope};
use crate::Brand;
use reqwest::Method;

const PATH: &str = "settings-orginization";

/// Fetch the logged in user's organization settings.
///
/// Returns `None` when the server doesn't have any settings for the
/// organization yet.
pub async fn organization_settings(
    api: &ApiClient,
) -> Result<Option<Brand>, ApiError> {
    let request = api.request(Method::GET, PATH)?;
    let envelope: Envelope<Brand> = api.send(request, Auth::Bearer).await?;
    log::trace!("Parsed response: {:#?}", envelope);

    Ok(envelope.data)
}
