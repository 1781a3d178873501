// Copyright 2025 Kirky.X
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use crate::domain::models::record::{ExtractedRecord, Identifier};
use crate::domain::repositories::record_repository::RecordRepository;
use crate::infrastructure::database::entities::opportunity;
use crate::utils::errors::RepositoryError;
use async_trait::async_trait;
use sea_orm::sea_query::OnConflict;
use sea_orm::*;
use std::sync::Arc;

/// 机会记录仓库实现
pub struct RecordRepositoryImpl {
    /// 数据库连接
    db: Arc<DatabaseConnection>,
}

impl RecordRepositoryImpl {
    /// 创建新的记录仓库实例
    ///
    /// # 参数
    ///
    /// * `db` - 数据库连接
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl RecordRepository for RecordRepositoryImpl {
    async fn save(
        &self,
        identifier: &Identifier,
        record: &ExtractedRecord,
    ) -> Result<(), RepositoryError> {
        let now = chrono::Utc::now();
        let model = opportunity::ActiveModel {
            identifier: Set(identifier.as_str().to_string()),
            title: Set(record.title.clone()),
            organization: Set(record.organization.clone()),
            amount: Set(record.amount),
            amount_display: Set(record.amount_display.clone()),
            deadline: Set(record.deadline.clone()),
            geo_tags: Set(serde_json::to_value(&record.geo_tags)?),
            type_tags: Set(serde_json::to_value(&record.type_tags)?),
            description: Set(record.description.clone()),
            source_url: Set(record.source_url.clone()),
            provenance: Set(record.provenance.as_str().to_string()),
            is_update: Set(record.is_update),
            mission_id: Set(record.mission_id.clone()),
            created_at: Set(now.into()),
            updated_at: Set(now.into()),
        };

        // 按标识覆盖，保留首次写入时间
        opportunity::Entity::insert(model)
            .on_conflict(
                OnConflict::column(opportunity::Column::Identifier)
                    .update_columns([
                        opportunity::Column::Title,
                        opportunity::Column::Organization,
                        opportunity::Column::Amount,
                        opportunity::Column::AmountDisplay,
                        opportunity::Column::Deadline,
                        opportunity::Column::GeoTags,
                        opportunity::Column::TypeTags,
                        opportunity::Column::Description,
                        opportunity::Column::SourceUrl,
                        opportunity::Column::Provenance,
                        opportunity::Column::IsUpdate,
                        opportunity::Column::MissionId,
                        opportunity::Column::UpdatedAt,
                    ])
                    .to_owned(),
            )
            .exec(self.db.as_ref())
            .await?;
        Ok(())
    }

    async fn load_all_identifiers(&self) -> Result<Vec<Identifier>, RepositoryError> {
        let identifiers: Vec<String> = opportunity::Entity::find()
            .select_only()
            .column(opportunity::Column::Identifier)
            .into_tuple()
            .all(self.db.as_ref())
            .await?;

        Ok(identifiers.into_iter().map(Identifier::from_stored).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::record::Provenance;

    async fn setup() -> Arc<DatabaseConnection> {
        let db = Database::connect("sqlite::memory:").await.unwrap();
        let backend = db.get_database_backend();
        let schema = Schema::new(backend);
        db.execute(backend.build(&schema.create_table_from_entity(opportunity::Entity)))
            .await
            .unwrap();
        Arc::new(db)
    }

    fn record(deadline: Option<&str>) -> ExtractedRecord {
        ExtractedRecord {
            title: "Solana Grant".to_string(),
            organization: "Superteam".to_string(),
            amount: Some(5000.0),
            amount_display: Some("$5,000".to_string()),
            deadline: deadline.map(str::to_string),
            geo_tags: vec!["global".to_string()],
            type_tags: vec!["grant".to_string()],
            description: "Build on Solana".to_string(),
            source_url: "https://superteam.fun/grants/solana".to_string(),
            provenance: Provenance::Standard,
            is_update: false,
            mission_id: None,
        }
    }

    #[tokio::test]
    async fn test_save_upserts_by_identifier() {
        let db = setup().await;
        let repo = RecordRepositoryImpl::new(db.clone());
        let first = record(None);
        let id = first.identifier();

        repo.save(&id, &first).await.unwrap();
        let mut second = record(Some("2030-01-31"));
        second.is_update = true;
        repo.save(&id, &second).await.unwrap();

        let stored = opportunity::Entity::find_by_id(id.as_str().to_string())
            .one(db.as_ref())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.deadline.as_deref(), Some("2030-01-31"));
        assert!(stored.is_update);
        assert_eq!(repo.load_all_identifiers().await.unwrap(), vec![id]);
    }

    #[tokio::test]
    async fn test_load_all_identifiers_empty_store() {
        let repo = RecordRepositoryImpl::new(setup().await);
        assert!(repo.load_all_identifiers().await.unwrap().is_empty());
    }
}
