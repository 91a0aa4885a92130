use anyhow::{Context, Error};
use cardpanel::{
    endpoints::{BrandSettings, Upload},
    router::{History, Route},
    ApiClient, FileStorage, Panel, Storage,
};
use reqwest::Client;
use std::{
    path::{Path, PathBuf},
    sync::Arc,
};
use structopt::StructOpt;
use url::Url;

#[tokio::main]
async fn main() -> Result<(), Error> {
    env_logger::init();
    let args = Args::from_args();

    log::debug!("Starting application with {:#?}", args);

    let storage: Arc<dyn Storage> = Arc::new(
        FileStorage::open(&args.session_file).with_context(|| {
            format!("Unable to open {}", args.session_file.display())
        })?,
    );

    let client = Client::builder()
        .user_agent(cardpanel::DEFAULT_USER_AGENT)
        .build()?;
    let api =
        ApiClient::new(client, args.api_url.clone(), Arc::clone(&storage));

    let history = Arc::new(History::starting_at(Route::Dashboard));
    let panel = Panel::mount(api, storage, history.clone());

    // a restored session still needs its brand refreshed
    let outcome = panel.sync_brand().await;
    log::debug!("Brand sync on start up: {:?}", outcome);

    match args.cmd {
        Command::Login { email, password } => {
            match panel.sign_in(&email, &password).await {
                Ok(home) => println!("Logged in, continue at {}", home),
                Err(e) => {
                    log::debug!("{:?}", e);
                    anyhow::bail!("{}", e.user_message());
                },
            }
        },
        Command::Logout => {
            panel.sign_out()?;
            println!("Logged out");
        },
        Command::Whoami => match panel.session().user() {
            Some(user) => {
                let profile = panel.organization_profile();
                let role = user.role.as_deref().unwrap_or("?");
                println!("Role:         {}", role);
                println!("Organization: {}", profile.name);
                println!("Email:        {}", profile.email);
                println!("Phone:        {}", profile.phone);
                println!("Logo:         {}", profile.logo);
                if let Some(cover) = profile.cover {
                    println!("Cover:        {}", cover);
                }
            },
            None => println!("Not logged in"),
        },
        Command::Brand => {
            require_login(&panel)?;
            let settings = panel.load_brand_settings().await.map_err(|e| {
                report(e.user_message("Unable to load settings"), &history)
            })?;
            print_settings(&settings);
        },
        Command::BrandSettings(changes) => {
            require_login(&panel)?;
            let mut settings =
                panel.load_brand_settings().await.map_err(|e| {
                    report(e.user_message("Unable to load settings"), &history)
                })?;
            changes.apply(&mut settings)?;

            let brand = panel.save_brand_settings(&settings).await?;
            println!("Brand settings updated successfully");
            print_settings(&BrandSettings::from_brand(&brand));
        },
    }

    Ok(())
}

fn require_login<A: cardpanel::OrganizationApi>(
    panel: &Panel<A>,
) -> Result<(), Error> {
    if panel.session().is_authenticated() {
        Ok(())
    } else {
        anyhow::bail!("Not logged in, run the \"login\" command first")
    }
}

/// Turn an API failure into an error for the user, mentioning when it
/// ended the session.
fn report(message: &str, history: &History) -> Error {
    if history.current() == Route::Login {
        anyhow::anyhow!(
            "{} (the session has expired, please log in again)",
            message
        )
    } else {
        anyhow::anyhow!("{}", message)
    }
}

fn print_settings(settings: &BrandSettings) {
    let show = |value: &Option<String>| {
        value.clone().unwrap_or_else(|| String::from("(none)"))
    };

    println!("Brand name:            {}", settings.brand_name);
    println!("Logo:                  {}", show(&settings.logo));
    println!("Cover:                 {}", show(&settings.cover));
    println!(
        "Template change:       {}",
        settings.permissions.template_change
    );
    println!("Cover change:          {}", settings.permissions.cover_change);
    println!(
        "Custom community logo: {}",
        settings.permissions.custom_community_logo
    );
}

#[derive(Debug, StructOpt)]
struct Args {
    #[structopt(
        long = "api-url",
        env = "CARDPANEL_API_URL",
        default_value = "http://localhost:8000/api",
        help = "The platform's API base URL"
    )]
    api_url: Url,
    #[structopt(
        long = "session-file",
        env = "CARDPANEL_SESSION_FILE",
        default_value = "cardpanel-session.json",
        parse(from_os_str),
        help = "Where the session is kept between runs"
    )]
    session_file: PathBuf,
    #[structopt(subcommand)]
    cmd: Command,
}

#[derive(Debug, StructOpt)]
enum Command {
    #[structopt(about = "Log in as an organization administrator")]
    Login {
        #[structopt(short = "e", long = "email", help = "Your email address")]
        email: String,
        #[structopt(short = "p", long = "password", help = "Your password")]
        password: String,
    },
    #[structopt(about = "Forget the current session")]
    Logout,
    #[structopt(about = "Show the logged in user and their organization")]
    Whoami,
    #[structopt(about = "Show the organization's brand settings")]
    Brand,
    #[structopt(about = "Change the organization's brand settings")]
    BrandSettings(BrandChanges),
}

#[derive(Debug, StructOpt)]
struct BrandChanges {
    #[structopt(long = "brand-name", help = "The organization's public name")]
    brand_name: Option<String>,
    #[structopt(long = "logo", parse(from_os_str), help = "A new logo image")]
    logo: Option<PathBuf>,
    #[structopt(
        long = "cover",
        parse(from_os_str),
        help = "A new cover image"
    )]
    cover: Option<PathBuf>,
    #[structopt(long = "template-change", help = "Let staff change templates")]
    template_change: Option<bool>,
    #[structopt(long = "cover-change", help = "Let staff change their cover")]
    cover_change: Option<bool>,
    #[structopt(
        long = "custom-community-logo",
        help = "Let staff use a custom community logo"
    )]
    custom_community_logo: Option<bool>,
}

impl BrandChanges {
    fn apply(self, settings: &mut BrandSettings) -> Result<(), Error> {
        if let Some(brand_name) = self.brand_name {
            settings.brand_name = brand_name;
        }
        if let Some(path) = self.logo {
            settings.new_logo = Some(read_upload(&path)?);
        }
        if let Some(path) = self.cover {
            settings.new_cover = Some(read_upload(&path)?);
        }

        let permissions = &mut settings.permissions;
        if let Some(on) = self.template_change {
            permissions.template_change = on;
        }
        if let Some(on) = self.cover_change {
            permissions.cover_change = on;
        }
        if let Some(on) = self.custom_community_logo {
            permissions.custom_community_logo = on;
        }

        Ok(())
    }
}

fn read_upload(path: &Path) -> Result<Upload, Error> {
    Upload::from_path(path)
        .with_context(|| format!("Unable to read {}", path.display()))
}
