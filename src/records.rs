//! The records the platform hands back to us.

use serde::Deserializer;
use serde_derive::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// The role which only gets access to their own card.
pub const STAFF_ROLE: &str = "user";

/// The logged in administrator (or staff member).
///
/// Only the fields the panel reads are named, everything else the server
/// sends is kept in `extra` so the record survives a round trip through
/// storage untouched.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
#[non_exhaustive]
pub struct User {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organization: Option<Organization>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl User {
    pub fn with_role<S: Into<String>>(role: S) -> Self {
        User {
            role: Some(role.into()),
            ..User::default()
        }
    }

    /// Does this user only get to see their own card?
    pub fn is_staff(&self) -> bool {
        self.role.as_deref() == Some(STAFF_ROLE)
    }
}

/// The organization a [`User`] belongs to.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
#[non_exhaustive]
pub struct Organization {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// An organization's branding and the permissions it grants its staff.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
#[non_exhaustive]
pub struct Brand {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub brand_name: Option<String>,
    /// Either an absolute URL or a path relative to the storage root.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logo: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cover_page: Option<String>,
    /// May staff pick their own card template?
    #[serde(
        default,
        deserialize_with = "flag",
        skip_serializing_if = "Option::is_none"
    )]
    pub template_change: Option<bool>,
    /// May staff change their cover image?
    #[serde(
        default,
        deserialize_with = "flag",
        skip_serializing_if = "Option::is_none"
    )]
    pub cover_change: Option<bool>,
    #[serde(
        default,
        deserialize_with = "flag",
        skip_serializing_if = "Option::is_none"
    )]
    pub custom_community_logo: Option<bool>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Brand {
    pub fn named<S: Into<String>>(brand_name: S) -> Self {
        Brand {
            brand_name: Some(brand_name.into()),
            ..Brand::default()
        }
    }
}

/// Everything needed to start a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Credentials {
    pub token: String,
    pub user: User,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub brand: Option<Brand>,
}

impl Credentials {
    pub fn new<S: Into<String>>(token: S, user: User) -> Self {
        Credentials {
            token: token.into(),
            user,
            brand: None,
        }
    }

    pub fn with_brand(self, brand: Brand) -> Self {
        Credentials {
            brand: Some(brand),
            ..self
        }
    }
}

/// The server is inconsistent about flags, we've seen booleans, integers
/// and strings.
fn flag<'de, D>(deserializer: D) -> Result<Option<bool>, D::Error>
where
    D: Deserializer<'de>,
{
    let value: Option<Value> = serde::Deserialize::deserialize(deserializer)?;

    let flag = match value {
        None | Some(Value::Null) => None,
        Some(Value::Bool(b)) => Some(b),
        Some(Value::Number(n)) => Some(n.as_f64().map_or(false, |n| n != 0.0)),
        Some(Value::String(s)) => {
            let s = s.trim();
            Some(!(s.is_empty() || s == "0" || s.eq_ignore_ascii_case("false")))
        },
        Some(other) => {
            return Err(serde::de::Error::custom(format!(
                "expected a flag, found {}",
                other
            )))
        },
    };

    Ok(flag)
}
