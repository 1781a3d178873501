// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::domain::models::record::{ExtractedRecord, Identifier};
use crate::utils::errors::RepositoryError;
use async_trait::async_trait;

/// 持久化记录存储特质
///
/// 去重引擎只依赖 `load_all_identifiers` 做启动时的一次性预热
#[async_trait]
pub trait RecordRepository: Send + Sync {
    /// 按标识写入或覆盖记录
    async fn save(
        &self,
        identifier: &Identifier,
        record: &ExtractedRecord,
    ) -> Result<(), RepositoryError>;

    /// 读取全部已持久化的标识
    async fn load_all_identifiers(&self) -> Result<Vec<Identifier>, RepositoryError>;
}
