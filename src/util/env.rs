//! Process configuration, read once from the environment (with `.env`
//! support via [`dotenvy`]) and cached for the lifetime of the process.

use std::sync::LazyLock;

use thiserror::Error;
use tokio::sync::OnceCell;

static ENV_VARS: LazyLock<OnceCell<Env>> = LazyLock::new(OnceCell::new);

pub async fn get_var(var: Var) -> EnvResult<&'static str> {
    let vars = ENV_VARS.get_or_try_init(|| async { Env::new() }).await?;
    Ok(match var {
        Var::DatabaseUrl => &vars.database_url,
        Var::ServerApiPort => &vars.server_api_port,
        Var::TokenSecret => &vars.token_secret,
        Var::TokenExpiryMinutes => &vars.token_expiry_minutes,
        Var::PosHmacSecret => &vars.pos_hmac_secret,
        Var::InternalToken => &vars.internal_token,
        Var::OtelExporterEndpoint => &vars.otel_exporter_otlp_endpoint,
        Var::ApiServiceName => &vars.api_service_name,
        Var::ApiTracerName => &vars.api_tracer_name,
    })
}

#[derive(Debug, Clone)]
pub struct Env {
    pub database_url: String,
    pub server_api_port: String,
    pub token_secret: String,
    pub token_expiry_minutes: String,
    pub pos_hmac_secret: String,
    pub internal_token: String,
    pub otel_exporter_otlp_endpoint: String,
    pub api_service_name: String,
    pub api_tracer_name: String,
}

impl Env {
    pub fn new() -> EnvResult<Self> {
        dotenvy::dotenv().ok();

        Ok(Self {
            database_url: required("DATABASE_URL")?,
            server_api_port: optional("SERVER_API_PORT", "8080"),
            token_secret: required("TOKEN_SECRET")?,
            token_expiry_minutes: optional("TOKEN_EXPIRY_MINUTES", "15"),
            pos_hmac_secret: required("POS_HMAC_SECRET")?,
            internal_token: required("INTERNAL_TOKEN")?,
            otel_exporter_otlp_endpoint: optional(
                "OTEL_EXPORTER_OTLP_ENDPOINT",
                "http://localhost:4317",
            ),
            api_service_name: optional("API_SERVICE_NAME", "tally-server"),
            api_tracer_name: optional("API_TRACER_NAME", "tally-tracer"),
        })
    }
}

fn required(key: &'static str) -> EnvResult<String> {
    std::env::var(key).map_err(|_| EnvErr::MissingValue(key))
}

fn optional(key: &'static str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

#[derive(Debug)]
pub enum Var {
    DatabaseUrl,
    ServerApiPort,
    TokenSecret,
    TokenExpiryMinutes,
    PosHmacSecret,
    InternalToken,
    OtelExporterEndpoint,
    ApiServiceName,
    ApiTracerName,
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
