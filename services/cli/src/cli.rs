//! CLI 参数分发：`run`（默认）、`help`、`version`。

use anyhow::anyhow;

/// 一次运行的选项。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct RunOptions {
    /// 目标电源状态；`None` 表示只查询。
    pub(crate) power: Option<bool>,
    /// 强制重新注册安装实例。
    pub(crate) register: bool,
}

/// CLI 分发结果。
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum CliDispatch {
    /// 进入鉴权与设备操作流程。
    Run(RunOptions),
    /// 命令已处理完成，主程序应退出。
    Exit,
}

/// 解析并执行 CLI 参数。
pub(crate) fn dispatch(args: &[String]) -> anyhow::Result<CliDispatch> {
    let mut rest = args;
    if let Some(first) = args.first() {
        match first.trim() {
            "-h" | "--help" | "help" => {
                print_root_help();
                return Ok(CliDispatch::Exit);
            }
            "version" | "--version" => {
                println!("{}", env!("CARGO_PKG_VERSION"));
                return Ok(CliDispatch::Exit);
            }
            "run" => rest = &args[1..],
            _ => {}
        }
    }

    let mut options = RunOptions::default();
    let mut iter = rest.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--register" => options.register = true,
            "--power" => {
                let value = iter
                    .next()
                    .ok_or_else(|| anyhow!("usage: lm-cli --power <on|off>"))?;
                options.power = Some(parse_power(value)?);
            }
            other => {
                return Err(anyhow!(
                    "unknown argument: {other}; run `lm-cli --help` for usage"
                ));
            }
        }
    }
    Ok(CliDispatch::Run(options))
}

/// 解析电源参数。
fn parse_power(raw: &str) -> anyhow::Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "on" | "true" | "1" => Ok(true),
        "off" | "false" | "0" | "standby" => Ok(false),
        other => Err(anyhow!("unsupported power value: {other}; use on|off")),
    }
}

/// 将 dashboard 中的电源状态转为展示文本。
pub(crate) fn power_label(power: Option<bool>) -> &'static str {
    match power {
        Some(true) => "on",
        Some(false) => "standby",
        None => "unknown",
    }
}

/// 打印 root help。
fn print_root_help() {
    println!("lm-cli usage:");
    println!("  lm-cli [run] [--register] [--power on|off]");
    println!("  lm-cli version");
    println!();
    println!("environment:");
    println!("  LM_USERNAME, LM_PASSWORD   account credentials (required)");
    println!("  LM_SERIAL                  machine serial; omit to only check sign-in");
    println!("  LM_KEY_PATH                installation key file (default ./installation_key.json)");
    println!("  LM_API_BASE_URL            customer-app API base url");
    println!("  LM_TIMEOUT_MS              request timeout in milliseconds (default 10000)");
    println!("  LM_LOG_DIR                 also write daily log files to this directory");
}
