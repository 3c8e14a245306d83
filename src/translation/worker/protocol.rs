//! 执行单元消息协议
//!
//! 每个请求携带唯一的关联 id，执行单元对每个请求恰好回复一次，
//! 回复携带相同的 id 以及结果或错误。

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::translation::storage::ResourceBundle;
use crate::translation::types::{ModelKey, Response, TextInput};

/// 执行单元内部抛出并转发回调度器的错误
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error("{name}: {message}")]
pub struct RemoteError {
    pub name: String,
    pub message: String,
}

impl RemoteError {
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
        }
    }
}

/// 执行单元的方法表
#[derive(Debug, Clone)]
pub enum WorkerCall {
    HasModel(ModelKey),
    LoadModel {
        key: ModelKey,
        bundle: Arc<ResourceBundle>,
    },
    FreeModel(ModelKey),
    Translate {
        models: Vec<ModelKey>,
        texts: Vec<TextInput>,
    },
}

impl WorkerCall {
    /// 方法名，用于日志
    pub fn method(&self) -> &'static str {
        match self {
            WorkerCall::HasModel(_) => "hasTranslationModel",
            WorkerCall::LoadModel { .. } => "loadTranslationModel",
            WorkerCall::FreeModel(_) => "freeTranslationModel",
            WorkerCall::Translate { .. } => "translate",
        }
    }
}

/// 调度器发往执行单元的请求
#[derive(Debug, Clone)]
pub struct WorkerRequest {
    pub id: u64,
    pub call: WorkerCall,
}

/// 调用的返回值
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerValue {
    Flag(bool),
    Done,
    Responses(Vec<Response>),
}

/// 执行单元的回复
#[derive(Debug, Clone)]
pub struct WorkerReply {
    pub id: u64,
    pub outcome: Result<WorkerValue, RemoteError>,
}

impl WorkerReply {
    pub fn ok(id: u64, value: WorkerValue) -> Self {
        Self {
            id,
            outcome: Ok(value),
        }
    }

    pub fn err(id: u64, error: RemoteError) -> Self {
        Self {
            id,
            outcome: Err(error),
        }
    }
}
