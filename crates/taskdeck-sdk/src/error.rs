use thiserror::Error;

#[derive(Debug, Error)]
pub enum TaskdeckSDKError {
    #[error("JSON error: {0}")]
    JsonError(String),
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("IO error: {0}")]
    IO(String),
    #[error("KV store error: {0}")]
    KvStore(String),
    #[error("Transport error: {0}")]
    Transport(String),
    #[error("Config error: {0}")]
    Config(String),
    #[error("Not initialized: {0}")]
    NotInitialized(String),
    // 未登录（无会话）时的远端调用
    #[error("Not authenticated")]
    NotAuthenticated,
    // 资料尚未加载
    #[error("Profile not loaded")]
    ProfileNotLoaded,
    // 登录凭据错误，Display 直接给界面内联展示
    #[error("Credenciales incorrectas. Verifica tu correo o contraseña.")]
    InvalidCredentials,
    #[error("Authentication error: {0}")]
    Auth(String),
    // 远端网关拒绝请求（insert/update/delete/select/storage）
    #[error("Remote rejected {operation} on {target}: {message}")]
    Remote {
        operation: &'static str,
        target: String,
        message: String,
    },
    #[error("Other error: {0}")]
    Other(String),
}

impl From<serde_json::Error> for TaskdeckSDKError {
    fn from(error: serde_json::Error) -> Self {
        TaskdeckSDKError::JsonError(error.to_string())
    }
}

impl From<std::io::Error> for TaskdeckSDKError {
    fn from(error: std::io::Error) -> Self {
        TaskdeckSDKError::IO(error.to_string())
    }
}

impl From<sled::Error> for TaskdeckSDKError {
    fn from(error: sled::Error) -> Self {
        TaskdeckSDKError::KvStore(error.to_string())
    }
}

impl From<reqwest::Error> for TaskdeckSDKError {
    fn from(error: reqwest::Error) -> Self {
        TaskdeckSDKError::Transport(error.to_string())
    }
}

impl TaskdeckSDKError {
    /// 构造远端拒绝错误
    pub fn remote(operation: &'static str, target: impl Into<String>, message: impl Into<String>) -> Self {
        TaskdeckSDKError::Remote {
            operation,
            target: target.into(),
            message: message.into(),
        }
    }

    /// 判断是否是网关拒绝（触发回滚策略的那类错误）
    pub fn is_remote_rejection(&self) -> bool {
        matches!(
            self,
            TaskdeckSDKError::Remote { .. } | TaskdeckSDKError::Transport(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, TaskdeckSDKError>;
