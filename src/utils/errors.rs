// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use sea_orm::DbErr;
use thiserror::Error;

/// 仓库层错误类型
#[derive(Error, Debug)]
pub enum RepositoryError {
    #[error("数据库错误: {0}")]
    Database(#[from] DbErr),

    #[error("存储不可用: {0}")]
    Unavailable(String),

    #[error("序列化错误: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Worker错误类型
#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("总线错误: {0}")]
    BusError(String),
}
