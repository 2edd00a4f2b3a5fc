//! lm-cli 主程序职责：
//! 1. 读取或生成安装实例身份，必要时向云端注册。
//! 2. 完成登录，并按参数切换咖啡机电源。
//! 3. 查询 dashboard 并输出当前电源状态。

use anyhow::Context;
use lm_cloud::{CloudClient, CloudConfig};
use tracing::info;

mod cli;
mod config;
mod logging;
mod store;

use cli::{CliDispatch, RunOptions, power_label};
use config::Config;

#[tokio::main]
/// CLI 入口：解析参数、初始化日志、执行一次设备操作。
async fn main() -> anyhow::Result<()> {
    let args = std::env::args().skip(1).collect::<Vec<String>>();
    let options = match cli::dispatch(&args)? {
        CliDispatch::Run(options) => options,
        CliDispatch::Exit => return Ok(()),
    };

    let _log_runtime = logging::init("lm-cli")?;
    let cfg = Config::from_env()?;
    run(cfg, options).await
}

/// 执行注册、鉴权与设备操作。
async fn run(cfg: Config, options: RunOptions) -> anyhow::Result<()> {
    let (identity, created) = store::load_or_create_installation_key(&cfg.key_path)?;
    info!(
        "installation key ready installation_id={} created={created}",
        identity.installation_id()
    );

    let cloud_cfg = CloudConfig::new(cfg.username.clone(), cfg.password.clone())?
        .with_base_url(&cfg.api_base_url)?
        .with_timeout(cfg.timeout);
    let client = CloudClient::new(cloud_cfg, identity)?;

    if options.register || created {
        println!("Registering installation key...");
        client
            .register_client()
            .await
            .context("register installation failed")?;
        println!("Registration complete.");
    }

    let Some(serial) = cfg.serial.as_deref() else {
        println!("No LM_SERIAL provided; auth flow check only.");
        client.get_access_token().await.context("sign-in failed")?;
        println!("Sign-in succeeded.");
        return Ok(());
    };

    if let Some(enabled) = options.power {
        println!(
            "Setting power to {}...",
            if enabled { "on" } else { "standby" }
        );
        client
            .set_power(serial, enabled)
            .await
            .context("change machine mode failed")?;
    }

    let dashboard = client
        .get_dashboard(serial)
        .await
        .context("fetch dashboard failed")?;
    println!("Machine power: {}", power_label(dashboard.power()));
    Ok(())
}
