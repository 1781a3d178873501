// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use anyhow::Result;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use std::collections::HashMap;

/// Redis客户端
///
/// 提供对Redis数据库的异步操作接口，同时为流式总线提供连接
#[derive(Clone)]
pub struct RedisClient {
    /// Redis客户端
    client: redis::Client,
}

impl RedisClient {
    /// 创建新的Redis客户端实例
    ///
    /// # 参数
    ///
    /// * `redis_url` - Redis连接URL
    ///
    /// # 返回值
    ///
    /// * `Ok(RedisClient)` - Redis客户端实例
    /// * `Err(anyhow::Error)` - URL无效
    pub async fn new(redis_url: &str) -> Result<Self> {
        let client = redis::Client::open(redis_url)?;
        Ok(Self { client })
    }

    /// 获取一个新的多路复用连接
    pub async fn connection(&self) -> redis::RedisResult<MultiplexedConnection> {
        self.client.get_multiplexed_async_connection().await
    }

    /// 写入哈希字段并刷新整个键的过期时间
    ///
    /// # 参数
    ///
    /// * `key` - 键
    /// * `field` - 字段
    /// * `value` - 值
    /// * `ttl_seconds` - 过期时间（秒）
    pub async fn hset_with_ttl(
        &self,
        key: &str,
        field: &str,
        value: &str,
        ttl_seconds: u64,
    ) -> Result<()> {
        let mut con = self.connection().await?;
        let _: () = redis::pipe()
            .atomic()
            .hset(key, field, value)
            .ignore()
            .expire(key, ttl_seconds as i64)
            .ignore()
            .query_async(&mut con)
            .await?;
        Ok(())
    }

    /// 读取哈希的全部字段
    pub async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>> {
        let mut con = self.connection().await?;
        let values: HashMap<String, String> = con.hgetall(key).await?;
        Ok(values)
    }

    /// 删除哈希字段
    pub async fn hdel(&self, key: &str, field: &str) -> Result<()> {
        let mut con = self.connection().await?;
        let _: () = con.hdel(key, field).await?;
        Ok(())
    }
}
