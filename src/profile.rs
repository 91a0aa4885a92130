use crate::{Brand, User};
use url::Url;

/// Shown when an organization hasn't uploaded a logo.
pub const PLACEHOLDER_LOGO: &str = "https://via.placeholder.com/80?text=Logo";

/// The organization card at the top of the dashboard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrganizationProfile {
    pub name: String,
    pub email: String,
    pub phone: String,
    pub logo: String,
    pub cover: Option<String>,
}

impl OrganizationProfile {
    pub fn derive(
        user: Option<&User>,
        brand: Option<&Brand>,
        api_base: &Url,
    ) -> Self {
        let name = brand
            .and_then(|b| non_empty(&b.brand_name))
            .or_else(|| {
                user.and_then(|u| u.organization.as_ref())
                    .and_then(|o| non_empty(&o.name))
            })
            .unwrap_or("Organization");

        let email = user.and_then(|u| non_empty(&u.email)).unwrap_or("N/A");
        let phone = user.and_then(|u| non_empty(&u.phone)).unwrap_or("N/A");

        let logo = brand
            .and_then(|b| b.logo.as_deref())
            .and_then(|path| asset_url(api_base, path))
            .unwrap_or_else(|| String::from(PLACEHOLDER_LOGO));
        let cover = brand
            .and_then(|b| b.cover_page.as_deref())
            .and_then(|path| asset_url(api_base, path));

        OrganizationProfile {
            name: name.to_string(),
            email: email.to_string(),
            phone: phone.to_string(),
            logo,
            cover,
        }
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|s| !s.is_empty())
}

/// Turn a path returned by the server into something which can be fetched.
///
/// Absolute URLs are left alone. Anything else lives under `/storage` on the
/// same host as the API (minus its `/api` prefix).
pub fn asset_url(api_base: &Url, path: &str) -> Option<String> {
    if path.is_empty() {
        return None;
    }
    if path.starts_with("http") {
        return Some(path.to_string());
    }

    let base = api_base.as_str().trim_end_matches('/');
    let root = base.strip_suffix("/api").unwrap_or(base);

    Some(format!("{}/storage/{}", root, path.trim_start_matches('/')))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn api_base() -> Url { Url::parse("https://cards.example.com/api/").unwrap() }

    #[test]
    fn relative_assets_live_under_storage() {
        let got = asset_url(&api_base(), "logos/onedesk.png");

        assert_eq!(
            got.as_deref(),
            Some("https://cards.example.com/storage/logos/onedesk.png")
        );
    }

    #[test]
    fn absolute_assets_are_untouched() {
        let url = "https://cdn.example.com/cover.jpg";

        assert_eq!(asset_url(&api_base(), url).as_deref(), Some(url));
        assert_eq!(asset_url(&api_base(), ""), None);
    }

    #[test]
    fn the_brand_name_wins() {
        let user: User = serde_json::from_value(json!({
            "email": "admin@onedesk.example",
            "organization": { "name": "OneDesk Pty Ltd" },
        }))
        .unwrap();
        let mut brand = Brand::named("OneDesk");
        brand.logo = Some(String::from("logos/onedesk.png"));

        let got =
            OrganizationProfile::derive(Some(&user), Some(&brand), &api_base());

        assert_eq!(
            got,
            OrganizationProfile {
                name: String::from("OneDesk"),
                email: String::from("admin@onedesk.example"),
                phone: String::from("N/A"),
                logo: String::from(
                    "https://cards.example.com/storage/logos/onedesk.png"
                ),
                cover: None,
            }
        );
    }

    #[test]
    fn fall_back_to_the_users_organization() {
        let user: User = serde_json::from_value(json!({
            "organization": { "name": "OneDesk Pty Ltd" },
        }))
        .unwrap();

        let got = OrganizationProfile::derive(Some(&user), None, &api_base());

        assert_eq!(got.name, "OneDesk Pty Ltd");
        assert_eq!(got.logo, PLACEHOLDER_LOGO);
    }

    #[test]
    fn nobody_logged_in() {
        let got = OrganizationProfile::derive(None, None, &api_base());

        assert_eq!(got.name, "Organization");
        assert_eq!(got.email, "N/A");
        assert_eq!(got.cover, None);
    }
}
