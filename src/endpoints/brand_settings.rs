use super::{ApiClient, ApiError, Auth, Envelope};
use crate::Brand;
use reqwest::{
    multipart::{Form, Part},
    Method,
};
use std::{
    fmt::{self, Debug, Formatter},
    fs,
    path::Path,
};

const PATH: &str = "organizations/brand-settings";

/// The brand settings form.
#[derive(Debug, Clone, PartialEq)]
pub struct BrandSettings {
    pub brand_name: String,
    /// The logo the server already has.
    pub logo: Option<String>,
    /// The cover image the server already has.
    pub cover: Option<String>,
    pub new_logo: Option<Upload>,
    pub new_cover: Option<Upload>,
    pub permissions: Permissions,
}

impl BrandSettings {
    /// Fill out the form using an organization's current brand.
    pub fn from_brand(brand: &Brand) -> Self {
        BrandSettings {
            brand_name: brand.brand_name.clone().unwrap_or_default(),
            logo: brand.logo.clone(),
            cover: brand.cover_page.clone(),
            new_logo: None,
            new_cover: None,
            permissions: Permissions {
                template_change: brand.template_change.unwrap_or(false),
                cover_change: brand.cover_change.unwrap_or(false),
                custom_community_logo: brand
                    .custom_community_logo
                    .unwrap_or(false),
            },
        }
    }

    /// The plain text fields, in the order they're sent.
    fn fields(&self) -> Vec<(&'static str, String)> {
        let flag = |on: bool| String::from(if on { "1" } else { "0" });

        vec![
            ("brand_name", self.brand_name.clone()),
            ("template_change", flag(self.permissions.template_change)),
            ("cover_change", flag(self.permissions.cover_change)),
            (
                "custom_community_logo",
                flag(self.permissions.custom_community_logo),
            ),
        ]
    }

    fn form(&self) -> Result<Form, ApiError> {
        let mut form = Form::new();

        for (name, value) in self.fields() {
            form = form.text(name, value);
        }
        // only attach files which were actually picked
        if let Some(ref logo) = self.new_logo {
            form = form.part("logo", logo.part()?);
        }
        if let Some(ref cover) = self.new_cover {
            form = form.part("cover_image", cover.part()?);
        }

        Ok(form)
    }
}

impl Default for BrandSettings {
    fn default() -> Self {
        BrandSettings {
            brand_name: String::new(),
            logo: None,
            cover: None,
            new_logo: None,
            new_cover: None,
            permissions: Permissions::default(),
        }
    }
}

/// What an organization lets its staff change on their cards.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Permissions {
    pub template_change: bool,
    pub cover_change: bool,
    pub custom_community_logo: bool,
}

impl Default for Permissions {
    fn default() -> Self {
        Permissions {
            template_change: true,
            cover_change: true,
            custom_community_logo: false,
        }
    }
}

/// A file to be uploaded.
#[derive(Clone, PartialEq)]
pub struct Upload {
    pub file_name: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

impl Upload {
    pub fn new<S: Into<String>>(file_name: S, bytes: Vec<u8>) -> Self {
        let file_name = file_name.into();
        let mime_type = guess_mime_type(&file_name).to_string();

        Upload {
            file_name,
            mime_type,
            bytes,
        }
    }

    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, ApiError> {
        let path = path.as_ref();
        let bytes = fs::read(path).map_err(ApiError::Upload)?;
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| String::from("upload"));

        Ok(Upload::new(file_name, bytes))
    }

    pub fn is_image(&self) -> bool { self.mime_type.starts_with("image/") }

    fn part(&self) -> Result<Part, ApiError> {
        Part::bytes(self.bytes.clone())
            .file_name(self.file_name.clone())
            .mime_str(&self.mime_type)
            .map_err(ApiError::from)
    }
}

impl Debug for Upload {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("Upload")
            .field("file_name", &self.file_name)
            .field("mime_type", &self.mime_type)
            .field("len", &self.bytes.len())
            .finish()
    }
}

fn guess_mime_type(file_name: &str) -> &'static str {
    let extension = file_name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();

    match extension.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "svg" => "image/svg+xml",
        "bmp" => "image/bmp",
        _ => "application/octet-stream",
    }
}

/// Save an organization's brand settings, returning the updated brand.
pub async fn save_brand_settings(
    api: &ApiClient,
    settings: &BrandSettings,
) -> Result<Option<Brand>, ApiError> {
    log::trace!("Payload: {:#?}", settings);

    let form = settings.form()?;
    let request = api.request(Method::POST, PATH)?.multipart(form);
    let envelope: Envelope<Brand> = api.send(request, Auth::Bearer).await?;
    log::trace!("Parsed response: {:#?}", envelope);

    Ok(envelope.data)
}
