use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "drift")]
#[command(about = "Anonymous one-to-one video pairing client")]
pub struct Cli {
    /// Pier URL
    #[arg(long, env = "DRIFT_SERVER", default_value = "ws://localhost:4520")]
    pub server: String,

    /// Comma-separated interests to advertise when searching
    #[arg(long, value_delimiter = ',')]
    pub interests: Vec<String>,

    #[arg(long)]
    pub gender: Option<String>,

    #[arg(long)]
    pub age: Option<u32>,

    #[arg(long)]
    pub country: Option<String>,

    /// Profile file (TOML) holding persisted preferences
    #[arg(long)]
    pub profile: Option<PathBuf>,
}

impl Cli {
    /// Flag values that override the profile store
    pub fn pref_overrides(&self) -> Vec<(String, String)> {
        let mut overrides = Vec::new();
        if !self.interests.is_empty() {
            overrides.push(("interests".to_string(), self.interests.join(",")));
        }
        if let Some(gender) = &self.gender {
            overrides.push(("gender".to_string(), gender.clone()));
        }
        if let Some(age) = self.age {
            overrides.push(("age".to_string(), age.to_string()));
        }
        if let Some(country) = &self.country {
            overrides.push(("country".to_string(), country.clone()));
        }
        overrides
    }
}
