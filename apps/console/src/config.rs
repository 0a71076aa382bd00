use std::collections::HashMap;
use std::fs;

use url::Url;

#[derive(Debug, Clone)]
pub struct Settings {
    pub service_url: String,
    pub database_url: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            service_url: "http://127.0.0.1:5000".into(),
            database_url: "sqlite://./data/console.db".into(),
        }
    }
}

pub fn load_settings() -> Settings {
    let mut settings = Settings::default();

    if let Ok(raw) = fs::read_to_string("console.toml") {
        if let Ok(file_cfg) = toml::from_str::<HashMap<String, String>>(&raw) {
            if let Some(v) = file_cfg.get("service_url") {
                settings.service_url = v.clone();
            }
            if let Some(v) = file_cfg.get("database_url") {
                settings.database_url = v.clone();
            }
        }
    }

    if let Ok(v) = std::env::var("SIM_SERVICE_URL") {
        settings.service_url = v;
    }
    if let Ok(v) = std::env::var("APP__SERVICE_URL") {
        settings.service_url = v;
    }

    if let Ok(v) = std::env::var("DATABASE_URL") {
        settings.database_url = v;
    }
    if let Ok(v) = std::env::var("APP__DATABASE_URL") {
        settings.database_url = v;
    }

    settings.service_url = normalize_service_url(&settings.service_url);
    settings.database_url = normalize_database_url(&settings.database_url);
    settings
}

fn normalize_service_url(raw_service_url: &str) -> String {
    let raw_service_url = raw_service_url.trim().trim_end_matches('/');

    if raw_service_url.is_empty() || Url::parse(raw_service_url).is_err() {
        return Settings::default().service_url;
    }

    raw_service_url.to_string()
}

fn normalize_database_url(raw_database_url: &str) -> String {
    let raw_database_url = raw_database_url.trim();

    if raw_database_url.is_empty() {
        return Settings::default().database_url;
    }

    if raw_database_url.starts_with("sqlite::memory:")
        || raw_database_url.starts_with("sqlite://")
        || raw_database_url.contains("://")
    {
        return raw_database_url.to_string();
    }

    if let Some(path) = raw_database_url.strip_prefix("sqlite:") {
        let path = path.replace('\\', "/");
        return format!("sqlite://{path}");
    }

    format!("sqlite://{}", raw_database_url.replace('\\', "/"))
}
