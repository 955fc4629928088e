//! Process configuration, resolved from the environment exactly once and held
//! for the lifetime of the process.

use std::sync::LazyLock;

use thiserror::Error;
use tokio::sync::OnceCell;

static ENV_VARS: LazyLock<OnceCell<Env>> = LazyLock::new(OnceCell::new);

pub async fn get_var(var: Var) -> EnvResult<&'static str> {
    let vars = ENV_VARS.get_or_try_init(|| async { Env::new() }).await?;
    Ok(match var {
        Var::DatabaseUrl => &vars.database_url,
        Var::ServerApiPort => &vars.server_api_port,
        Var::CorsAllowOrigins => &vars.cors_allow_origins,
        Var::InternalToken => &vars.internal_post_token,
    })
}

/// The OTLP collector endpoint is the one knob that may legitimately be
/// absent: without it the process logs to stdout only.
pub async fn otel_endpoint() -> EnvResult<Option<&'static str>> {
    let vars = ENV_VARS.get_or_try_init(|| async { Env::new() }).await?;
    Ok(vars.otel_exporter_otlp_endpoint.as_deref())
}

#[derive(Debug, Clone)]
pub struct Env {
    pub database_url: String,
    pub server_api_port: String,
    pub cors_allow_origins: String,
    pub internal_post_token: String,
    pub otel_exporter_otlp_endpoint: Option<String>,
}

impl Env {
    pub fn new() -> EnvResult<Self> {
        Ok(Self {
            database_url: required("DATABASE_URL")?,
            server_api_port: required("SERVER_API_PORT")?,
            cors_allow_origins: required("CORS_ALLOW_ORIGINS")?,
            internal_post_token: required("INTERNAL_POST_TOKEN")?,
            otel_exporter_otlp_endpoint: optional("OTEL_EXPORTER_OTLP_ENDPOINT"),
        })
    }
}

fn required(name: &'static str) -> EnvResult<String> {
    match dotenvy::var(name) {
        Ok(value) if !value.trim().is_empty() => Ok(value),
        Ok(_) => Err(EnvErr::MissingValue(name)),
        Err(dotenvy::Error::EnvVar(std::env::VarError::NotPresent)) => {
            Err(EnvErr::MissingValue(name))
        }
        Err(e) => Err(EnvErr::Dotenvy(e)),
    }
}

fn optional(name: &'static str) -> Option<String> {
    dotenvy::var(name).ok().filter(|v| !v.trim().is_empty())
}

#[derive(Debug)]
pub enum Var {
    DatabaseUrl,
    ServerApiPort,
    CorsAllowOrigins,
    InternalToken,
}

#[macro_export]
macro_rules! var {
    ($ev:expr) => {
        $crate::util::env::get_var($ev)
    };
}

pub type EnvResult<T> = core::result::Result<T, EnvErr>;

#[derive(Debug, Error)]
pub enum EnvErr {
    #[error(transparent)]
    Dotenvy(#[from] dotenvy::Error),

    #[error("missing required environment variable '{0}'")]
    MissingValue(&'static str),
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_required_missing_is_typed() {
        let err = required("AULA_DEFINITELY_NOT_SET").unwrap_err();
        assert!(matches!(
            err,
            EnvErr::MissingValue("AULA_DEFINITELY_NOT_SET")
        ));
    }

    #[test]
    fn test_optional_missing_is_none() {
        assert!(optional("AULA_DEFINITELY_NOT_SET_EITHER").is_none());
    }
}
