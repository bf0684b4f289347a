use std::path::PathBuf;

use clap::Parser;
use copilot_server::{AppError, config::LoggingConfig, load_config, start_server};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Cloudera Copilot chat and model provider server
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// TOML configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// Override `server.host`
    #[arg(long)]
    host: Option<String>,

    /// Override `server.port`
    #[arg(short, long)]
    port: Option<u16>,
}

/// 主函数 - Copilot服务的入口点
///
/// 负责解析命令行参数、加载配置、初始化日志系统并启动HTTP服务器
#[tokio::main]
async fn main() -> Result<(), AppError> {
    let args = Args::parse();

    // 加载配置文件和环境变量配置
    let mut config = load_config(&args.config)
        .map_err(|e| AppError::ConfigError(format!("加载配置失败: {:#}", e)))?;
    if let Some(host) = args.host {
        config.server.host = host;
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }

    init_tracing(&config.logging)?;

    tracing::info!(
        host = %config.server.host,
        port = %config.server.port,
        catalog = ?config.copilot.config_path,
        "Configuration loaded successfully"
    );

    start_server(config).await
}

/// 初始化结构化日志系统
///
/// `RUST_LOG`优先；否则使用配置中的日志级别。输出格式由`logging.format`决定
fn init_tracing(logging: &LoggingConfig) -> Result<(), AppError> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("copilot_server={},tower_http=debug", logging.level)));

    let registry = tracing_subscriber::registry().with(env_filter);
    let result = match logging.format.as_str() {
        "pretty" => registry.with(fmt::layer().pretty()).try_init(),
        "compact" => registry.with(fmt::layer().compact()).try_init(),
        _ => registry
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_thread_ids(true)
                    .with_file(true)
                    .with_line_number(true)
                    .json(),
            )
            .try_init(),
    };
    result.map_err(|e| AppError::ConfigError(format!("Failed to initialize tracing: {}", e)))?;

    tracing::info!(format = %logging.format, "Structured logging system initialized");
    Ok(())
}
