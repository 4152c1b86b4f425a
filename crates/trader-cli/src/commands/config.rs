//! 설정 출력 명령.

use std::path::Path;

use anyhow::Result;
use trader_recovery::RecoveryConfig;

/// 설정 로드 (파일이 있으면 파일 + 환경변수, 없으면 환경변수 + 기본값).
pub fn load_config(file: Option<&Path>) -> Result<RecoveryConfig> {
    let config = match file {
        Some(path) => RecoveryConfig::from_file(path)?,
        None => RecoveryConfig::from_env()?,
    };
    Ok(config)
}

/// 적용되는 설정을 TOML로 출력.
pub fn print_config(file: Option<&Path>) -> Result<()> {
    let config = load_config(file)?;
    println!("{}", config.to_toml_string()?);
    Ok(())
}
