//! 손실 복구 오케스트레이터 CLI.
//!
//! # 사용 예시
//!
//! ```bash
//! # 페이퍼 거래소에서 복구 시뮬레이션 (손실 포지션 5개, 500틱)
//! recovery simulate --positions 5 --ticks 500 --seed 42
//!
//! # TOML 설정 파일로 시뮬레이션
//! recovery simulate --config recovery.toml --tick-ms 20
//!
//! # 현재 적용되는 설정 출력
//! recovery config
//! recovery config --file recovery.toml
//!
//! # JSON 로그
//! recovery --log-format json simulate
//! ```

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;

use commands::{
    config::print_config,
    simulate::{run_simulation, SimulateConfig},
};

#[derive(Parser)]
#[command(name = "recovery")]
#[command(about = "손실 복구 오케스트레이터 CLI", long_about = None)]
#[command(version)]
struct Cli {
    /// 로그 레벨 (RUST_LOG가 없을 때 사용)
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    /// 로그 출력 형식
    #[arg(long, value_enum, default_value = "text", global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// 페이퍼 거래소에서 복구 시뮬레이션 실행
    Simulate {
        /// 가격 틱 수
        #[arg(long, default_value = "300")]
        ticks: u32,

        /// 난수 시드 (같은 시드 = 같은 가격 경로)
        #[arg(long, default_value = "7")]
        seed: u64,

        /// 초기 손실 포지션 수
        #[arg(long, default_value = "3")]
        positions: usize,

        /// 틱 간격 (밀리초)
        #[arg(long, default_value = "50")]
        tick_ms: u64,

        /// 설정 파일 (없으면 환경변수 + 기본값)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// 적용되는 설정을 TOML로 출력
    Config {
        /// 설정 파일 경로
        #[arg(short, long)]
        file: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // .env 파일 로드 (없어도 에러 안남)
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    init_tracing(&cli.log_level, cli.log_format);

    match cli.command {
        Commands::Simulate {
            ticks,
            seed,
            positions,
            tick_ms,
            config,
        } => {
            let config = SimulateConfig {
                ticks,
                seed,
                positions,
                tick_ms,
                config_path: config,
            };
            run_simulation(config).await?;
        }

        Commands::Config { file } => {
            print_config(file.as_deref())?;
        }
    }

    Ok(())
}

/// 로깅 초기화 (RUST_LOG 우선, 없으면 `--log-level`).
fn init_tracing(log_level: &str, format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!(
            "trader_recovery={},trader_execution={},recovery={}",
            log_level, log_level, log_level
        )
        .into()
    });

    let json = format == LogFormat::Json;
    tracing_subscriber::registry()
        .with(filter)
        .with(json.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!json).then(|| tracing_subscriber::fmt::layer()))
        .init();
}
