// 文件职责：
// 1) 定义云端 customer-app API 的请求/响应结构与鉴权 header 名称。
// 2) 定义咖啡机模式、切换模式命令与 dashboard 只读模型。
// 3) 提供 dashboard 电源状态解析，供客户端与 CLI 共用。

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// 安装实例 ID header。
pub const HEADER_INSTALLATION_ID: &str = "X-App-Installation-Id";
/// 请求时间戳（毫秒）header。
pub const HEADER_TIMESTAMP: &str = "X-Timestamp";
/// 请求 nonce header。
pub const HEADER_NONCE: &str = "X-Nonce";
/// ECDSA 请求签名 header。
pub const HEADER_REQUEST_SIGNATURE: &str = "X-Request-Signature";
/// 注册请求专用的 proof header。
pub const HEADER_REQUEST_PROOF: &str = "X-Request-Proof";

/// 承载机器运行模式的状态组件 code。
pub const MACHINE_STATUS_WIDGET_CODE: &str = "CMMachineStatus";

/// `/auth/init` 注册请求体。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistrationRequest {
    // base64 编码的 SPKI DER 公钥。
    pub pk: String,
}

/// `/auth/signin` 登录请求体。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignInRequest {
    pub username: String,
    pub password: String,
}

/// `/auth/refreshtoken` 续期请求体。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshTokenRequest {
    pub username: String,
    pub refresh_token: String,
}

/// 登录/续期成功响应。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenResponse {
    pub access_token: String,
    pub refresh_token: String,
}

/// 咖啡机可切换的两种目标模式。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MachineMode {
    BrewingMode,
    StandBy,
}

impl MachineMode {
    /// 电源开关映射为目标模式：开机即 `BrewingMode`，关机即 `StandBy`。
    pub fn from_power(enabled: bool) -> Self {
        if enabled {
            MachineMode::BrewingMode
        } else {
            MachineMode::StandBy
        }
    }

    /// 线上字符串形式。
    pub fn as_str(self) -> &'static str {
        match self {
            MachineMode::BrewingMode => "BrewingMode",
            MachineMode::StandBy => "StandBy",
        }
    }
}

/// `CoffeeMachineChangeMode` 命令请求体。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeModeCommand {
    pub mode: MachineMode,
}

impl ChangeModeCommand {
    /// 根据电源开关构造命令。
    pub fn for_power(enabled: bool) -> Self {
        Self {
            mode: MachineMode::from_power(enabled),
        }
    }
}

/// 设备 dashboard（只读，字段全部宽松解析）。
///
/// 反序列化从不失败：根不是对象时得到空 dashboard，`widgets` 不是数组或条目不是对象时
/// 忽略对应部分，类型不符的 `serialNumber`/`code`/`mode` 视为缺失。
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", from = "Value")]
pub struct Dashboard {
    pub serial_number: Option<String>,
    pub widgets: Option<Vec<DashboardWidget>>,
    // 未建模字段原样保留，便于调用方自行检查。
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// dashboard 组件。
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(from = "Value")]
pub struct DashboardWidget {
    pub code: Option<String>,
    pub output: Option<WidgetOutput>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// 组件输出。
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(from = "Value")]
pub struct WidgetOutput {
    pub mode: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl From<Value> for Dashboard {
    fn from(raw: Value) -> Self {
        let Value::Object(mut fields) = raw else {
            return Self::default();
        };
        let serial_number = take_string(&mut fields, "serialNumber");
        let widgets = match fields.remove("widgets") {
            Some(Value::Array(items)) => Some(
                items
                    .into_iter()
                    .filter(Value::is_object)
                    .map(DashboardWidget::from)
                    .collect(),
            ),
            _ => None,
        };
        Self {
            serial_number,
            widgets,
            extra: fields,
        }
    }
}

impl From<Value> for DashboardWidget {
    fn from(raw: Value) -> Self {
        let Value::Object(mut fields) = raw else {
            return Self::default();
        };
        let code = take_string(&mut fields, "code");
        let output = match fields.remove("output") {
            Some(output @ Value::Object(_)) => Some(WidgetOutput::from(output)),
            _ => None,
        };
        Self {
            code,
            output,
            extra: fields,
        }
    }
}

impl From<Value> for WidgetOutput {
    fn from(raw: Value) -> Self {
        let Value::Object(mut fields) = raw else {
            return Self::default();
        };
        Self {
            mode: take_string(&mut fields, "mode"),
            extra: fields,
        }
    }
}

/// 取出字符串字段；非字符串值一并移除并视为缺失。
fn take_string(fields: &mut Map<String, Value>, key: &str) -> Option<String> {
    match fields.remove(key)? {
        Value::String(value) => Some(value),
        _ => None,
    }
}

impl Dashboard {
    /// 返回机器状态组件（若存在）。
    pub fn machine_status(&self) -> Option<&DashboardWidget> {
        self.widgets
            .as_ref()?
            .iter()
            .find(|widget| widget.code.as_deref() == Some(MACHINE_STATUS_WIDGET_CODE))
    }

    /// 解析电源状态：`BrewingMode` 为开机，其余模式为待机，缺字段为未知。
    pub fn power(&self) -> Option<bool> {
        let mode = self
            .machine_status()?
            .output
            .as_ref()?
            .mode
            .as_deref()
            .filter(|mode| !mode.is_empty())?;
        Some(mode == MachineMode::BrewingMode.as_str())
    }
}

/// 从任意 JSON 中解析电源状态；结构不符时返回 `None`，从不报错。
pub fn extract_power(raw: &Value) -> Option<bool> {
    let widgets = raw.get("widgets")?.as_array()?;
    let status = widgets.iter().find(|widget| {
        widget.get("code").and_then(Value::as_str) == Some(MACHINE_STATUS_WIDGET_CODE)
    })?;
    let mode = status
        .get("output")?
        .get("mode")?
        .as_str()
        .filter(|mode| !mode.is_empty())?;
    Some(mode == MachineMode::BrewingMode.as_str())
}
