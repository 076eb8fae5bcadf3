//! ログ出力の初期化

use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::error::{ClassifierError, Result};
use crate::model::LoggingSettings;

/// tracing subscriber を登録する
///
/// `RUST_LOG` があればそちらを優先します。二重初期化はエラー。
pub fn init(settings: &LoggingSettings) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&settings.level));

    let subscriber = tracing_subscriber::registry().with(filter);

    if settings.json {
        subscriber
            .with(fmt::layer().json())
            .try_init()
            .map_err(|e| ClassifierError::Config(format!("failed to init logging: {}", e)))?;
    } else {
        subscriber
            .with(fmt::layer())
            .try_init()
            .map_err(|e| ClassifierError::Config(format!("failed to init logging: {}", e)))?;
    }

    info!(level = %settings.level, json = settings.json, "ログを初期化しました");
    Ok(())
}
