use anyhow::{Context, Result, anyhow, bail};
use dotenvy::dotenv;
use serde::Deserialize;
use std::{fs, path::PathBuf, time::Duration};
use url::Url;

use mpup::{S3Settings, orchestrator::DEFAULT_PART_URL_TTL};

pub const ENV_PREFIX: &str = "MPUP_";
// Longest expiry S3 accepts for a presigned request.
const MAX_PART_URL_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// One source of settings: the config file or the environment.
#[derive(Debug, Deserialize, Default)]
struct ConfigLayer {
    region: Option<String>,
    endpoint_url: Option<Url>,
    profile: Option<String>,
    force_path_style: Option<bool>,
    part_url_ttl: Option<String>,
}

#[derive(Debug)]
pub struct Config {
    pub s3: S3Settings,
    pub part_url_ttl: Duration,
}

fn parse_part_url_ttl(value: &str) -> Result<Duration> {
    let ttl = humantime::parse_duration(value)
        .with_context(|| format!("Invalid part URL TTL '{}'", value))?;

    if ttl.is_zero() {
        bail!("Part URL TTL must be greater than zero");
    }
    if ttl > MAX_PART_URL_TTL {
        bail!(
            "Part URL TTL '{}' exceeds the maximum of {}",
            value,
            humantime::format_duration(MAX_PART_URL_TTL)
        );
    }

    Ok(ttl)
}

fn merge_config(base: ConfigLayer, override_config: ConfigLayer) -> Result<Config> {
    let part_url_ttl = match override_config.part_url_ttl.or(base.part_url_ttl) {
        Some(ttl) => parse_part_url_ttl(&ttl)?,
        None => DEFAULT_PART_URL_TTL,
    };

    Ok(Config {
        s3: S3Settings {
            region: override_config.region.or(base.region),
            endpoint_url: override_config.endpoint_url.or(base.endpoint_url),
            profile: override_config.profile.or(base.profile),
            force_path_style: override_config
                .force_path_style
                .or(base.force_path_style)
                .unwrap_or(false),
        },
        part_url_ttl,
    })
}

pub fn config_file_path() -> Result<PathBuf> {
    let project_dirs = directories::ProjectDirs::from("com", "mpup", "mpup")
        .ok_or(anyhow!("Unable to determine home directory"))?;
    Ok(project_dirs.config_dir().join("config.toml"))
}

pub fn read_config() -> Result<Config> {
    let _ = dotenv();
    let env_config = envy::prefixed(ENV_PREFIX)
        .from_env::<ConfigLayer>()
        .with_context(|| format!("Invalid {}* environment variable", ENV_PREFIX))?;

    let config_file = config_file_path()?;
    let file_config = if let Ok(config) = fs::read_to_string(&config_file) {
        toml::from_str(&config)
            .with_context(|| format!("Failed to parse {}", config_file.display()))?
    } else {
        ConfigLayer::default()
    };

    merge_config(file_config, env_config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_environment_overrides_file() {
        let file: ConfigLayer = toml::from_str(
            r#"
            region = "eu-west-1"
            endpoint_url = "http://localhost:9000"
            force_path_style = true
            part_url_ttl = "30m"
            "#,
        )
        .unwrap();
        let env = ConfigLayer {
            region: Some("us-east-2".to_string()),
            part_url_ttl: Some("2h".to_string()),
            ..Default::default()
        };

        let config = merge_config(file, env).unwrap();

        assert_eq!(config.s3.region.as_deref(), Some("us-east-2"));
        assert_eq!(
            config.s3.endpoint_url.as_ref().map(Url::as_str),
            Some("http://localhost:9000/")
        );
        assert!(config.s3.force_path_style);
        assert_eq!(config.part_url_ttl, Duration::from_secs(2 * 60 * 60));
        assert_eq!(config.s3.profile, None);
    }

    #[test]
    fn test_defaults() {
        let config = merge_config(ConfigLayer::default(), ConfigLayer::default()).unwrap();

        assert_eq!(config.part_url_ttl, DEFAULT_PART_URL_TTL);
        assert!(!config.s3.force_path_style);
        assert!(config.s3.region.is_none());
    }

    #[test]
    fn test_part_url_ttl_bounds() {
        assert_eq!(
            parse_part_url_ttl("90s").unwrap(),
            Duration::from_secs(90)
        );
        assert!(parse_part_url_ttl("0s").is_err());
        assert!(parse_part_url_ttl("8days").is_err());
        assert!(parse_part_url_ttl("soon").is_err());
    }
}
