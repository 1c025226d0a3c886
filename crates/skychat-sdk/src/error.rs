use thiserror::Error;

/// 后端容器返回的错误码
///
/// 与 Skygear 服务端的 skyerr 编号保持一致，未知编号统一归为 `UnexpectedError`。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendErrorCode {
    NotAuthenticated,
    PermissionDenied,
    AccessKeyNotAccepted,
    AccessTokenNotAccepted,
    InvalidCredentials,
    InvalidSignature,
    BadRequest,
    InvalidArgument,
    Duplicated,
    ResourceNotFound,
    NotSupported,
    NotImplemented,
    ConstraintViolated,
    IncompatibleSchema,
    AtomicOperationFailure,
    PartialOperationFailure,
    UndefinedOperation,
    PluginUnavailable,
    PluginTimeout,
    RecordQueryInvalid,
    PluginInitializing,
    ResponseTimeout,
    DeniedArgument,
    RecordQueryDenied,
    UnexpectedError,
}

impl BackendErrorCode {
    pub fn from_code(code: u32) -> Self {
        match code {
            101 => Self::NotAuthenticated,
            102 => Self::PermissionDenied,
            103 => Self::AccessKeyNotAccepted,
            104 => Self::AccessTokenNotAccepted,
            105 => Self::InvalidCredentials,
            106 => Self::InvalidSignature,
            107 => Self::BadRequest,
            108 => Self::InvalidArgument,
            109 => Self::Duplicated,
            110 => Self::ResourceNotFound,
            111 => Self::NotSupported,
            112 => Self::NotImplemented,
            113 => Self::ConstraintViolated,
            114 => Self::IncompatibleSchema,
            115 => Self::AtomicOperationFailure,
            116 => Self::PartialOperationFailure,
            117 => Self::UndefinedOperation,
            118 => Self::PluginUnavailable,
            119 => Self::PluginTimeout,
            120 => Self::RecordQueryInvalid,
            121 => Self::PluginInitializing,
            122 => Self::ResponseTimeout,
            123 => Self::DeniedArgument,
            124 => Self::RecordQueryDenied,
            _ => Self::UnexpectedError,
        }
    }

    pub fn code(&self) -> u32 {
        match self {
            Self::NotAuthenticated => 101,
            Self::PermissionDenied => 102,
            Self::AccessKeyNotAccepted => 103,
            Self::AccessTokenNotAccepted => 104,
            Self::InvalidCredentials => 105,
            Self::InvalidSignature => 106,
            Self::BadRequest => 107,
            Self::InvalidArgument => 108,
            Self::Duplicated => 109,
            Self::ResourceNotFound => 110,
            Self::NotSupported => 111,
            Self::NotImplemented => 112,
            Self::ConstraintViolated => 113,
            Self::IncompatibleSchema => 114,
            Self::AtomicOperationFailure => 115,
            Self::PartialOperationFailure => 116,
            Self::UndefinedOperation => 117,
            Self::PluginUnavailable => 118,
            Self::PluginTimeout => 119,
            Self::RecordQueryInvalid => 120,
            Self::PluginInitializing => 121,
            Self::ResponseTimeout => 122,
            Self::DeniedArgument => 123,
            Self::RecordQueryDenied => 124,
            Self::UnexpectedError => 10000,
        }
    }
}

/// 错误分类（调用方只需关心这五类）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// 网络/传输失败
    Transport,
    /// 认证失败
    Authentication,
    /// 权限不足
    Permission,
    /// 会话/消息/记录不存在
    NotFound,
    /// 参数校验失败
    Validation,
}

#[derive(Debug, Error)]
pub enum ChatSDKError {
    #[error("Transport error: {0}")]
    Transport(String),
    #[error("Authentication error: {0}")]
    Auth(String),
    #[error("Permission denied: {0}")]
    PermissionDenied(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    /// 后端返回了无法解析的数据
    #[error("Invalid data: {0}")]
    InvalidData(String),
    #[error("Config error: {0}")]
    Config(String),
    /// 其余后端错误，保留原始错误码
    #[error("Backend error [{}]: {message}", code.code())]
    Backend {
        code: BackendErrorCode,
        message: String,
    },
}

impl From<serde_json::Error> for ChatSDKError {
    fn from(error: serde_json::Error) -> Self {
        ChatSDKError::InvalidData(error.to_string())
    }
}

impl From<std::io::Error> for ChatSDKError {
    fn from(error: std::io::Error) -> Self {
        match error.kind() {
            std::io::ErrorKind::NotFound => ChatSDKError::NotFound(error.to_string()),
            _ => ChatSDKError::Transport(error.to_string()),
        }
    }
}

impl From<reqwest::Error> for ChatSDKError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_decode() {
            ChatSDKError::InvalidData(error.to_string())
        } else {
            ChatSDKError::Transport(error.to_string())
        }
    }
}

impl ChatSDKError {
    /// 归类到五种错误之一
    pub fn kind(&self) -> ErrorKind {
        match self {
            ChatSDKError::Transport(_) | ChatSDKError::InvalidData(_) => ErrorKind::Transport,
            ChatSDKError::Auth(_) => ErrorKind::Authentication,
            ChatSDKError::PermissionDenied(_) => ErrorKind::Permission,
            ChatSDKError::NotFound(_) => ErrorKind::NotFound,
            ChatSDKError::InvalidArgument(_) | ChatSDKError::Config(_) => ErrorKind::Validation,
            ChatSDKError::Backend { code, .. } => match code {
                BackendErrorCode::BadRequest
                | BackendErrorCode::InvalidArgument
                | BackendErrorCode::Duplicated
                | BackendErrorCode::ConstraintViolated
                | BackendErrorCode::IncompatibleSchema
                | BackendErrorCode::RecordQueryInvalid
                | BackendErrorCode::DeniedArgument
                | BackendErrorCode::UndefinedOperation => ErrorKind::Validation,
                _ => ErrorKind::Transport,
            },
        }
    }

    /// 后端错误码（如果有）
    pub fn backend_code(&self) -> Option<BackendErrorCode> {
        match self {
            ChatSDKError::Backend { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// 从后端错误响应创建错误
    pub fn from_backend(code: u32, message: impl Into<String>) -> Self {
        let message = message.into();
        match BackendErrorCode::from_code(code) {
            BackendErrorCode::NotAuthenticated
            | BackendErrorCode::AccessKeyNotAccepted
            | BackendErrorCode::AccessTokenNotAccepted
            | BackendErrorCode::InvalidCredentials
            | BackendErrorCode::InvalidSignature => ChatSDKError::Auth(message),
            BackendErrorCode::PermissionDenied | BackendErrorCode::RecordQueryDenied => {
                ChatSDKError::PermissionDenied(message)
            }
            BackendErrorCode::ResourceNotFound => ChatSDKError::NotFound(message),
            BackendErrorCode::InvalidArgument => ChatSDKError::InvalidArgument(message),
            code => ChatSDKError::Backend { code, message },
        }
    }
}

pub type Result<T> = std::result::Result<T, ChatSDKError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_code_mapping() {
        assert_eq!(ChatSDKError::from_backend(101, "no token").kind(), ErrorKind::Authentication);
        assert_eq!(ChatSDKError::from_backend(104, "expired").kind(), ErrorKind::Authentication);
        assert_eq!(ChatSDKError::from_backend(102, "denied").kind(), ErrorKind::Permission);
        assert_eq!(ChatSDKError::from_backend(110, "gone").kind(), ErrorKind::NotFound);
        assert_eq!(ChatSDKError::from_backend(108, "bad").kind(), ErrorKind::Validation);
        assert_eq!(ChatSDKError::from_backend(113, "constraint").kind(), ErrorKind::Validation);
        assert_eq!(ChatSDKError::from_backend(119, "slow plugin").kind(), ErrorKind::Transport);
    }

    #[test]
    fn test_unknown_code_keeps_message() {
        let err = ChatSDKError::from_backend(4242, "boom");
        assert_eq!(err.backend_code(), Some(BackendErrorCode::UnexpectedError));
        assert_eq!(err.to_string(), "Backend error [10000]: boom");
    }

    #[test]
    fn test_io_not_found_maps_to_not_found() {
        let err: ChatSDKError = std::io::Error::new(std::io::ErrorKind::NotFound, "voice.m4a").into();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }
}
