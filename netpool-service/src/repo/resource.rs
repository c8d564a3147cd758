// Copyright 2024 Golem Cloud
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

use std::ops::Deref;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use sqlx::{Database, Encode, Pool, QueryBuilder, Type};
use uuid::Uuid;

use crate::model::{
    NewResource, Resource, ResourceFilters, ResourceSearch, ResourceStatus, ResourceUpdate,
};
use crate::repo::RepoError;

#[derive(sqlx::FromRow, Debug, Clone)]
pub struct ResourceRecord {
    pub id: Uuid,
    pub driver: String,
    pub class: String,
    pub status: String,
    pub pool: Option<String>,
    pub processing: bool,
    pub allocated: bool,
    pub deleted: bool,
    pub description: Option<String>,
    pub data: String,
}

impl TryFrom<ResourceRecord> for Resource {
    type Error = RepoError;

    fn try_from(record: ResourceRecord) -> Result<Self, Self::Error> {
        let status = ResourceStatus::from_str(&record.status).map_err(RepoError::Internal)?;
        let data: serde_json::Value = serde_json::from_str(&record.data)?;
        Ok(Resource {
            id: record.id,
            driver: record.driver,
            class: record.class,
            status,
            pool: record.pool,
            processing: record.processing,
            allocated: record.allocated,
            deleted: record.deleted,
            description: record.description,
            data,
        })
    }
}

/// The authoritative store of resources. All cross-component coordination is
/// expressed as operations on this store; `compare_update` is the only
/// primitive strong enough to gate concurrent state transitions.
#[async_trait]
pub trait ResourceRepo {
    /// Insert a new resource, assigning its id.
    async fn create(&self, resource: &NewResource) -> Result<Resource, RepoError>;

    async fn get(&self, id: &Uuid) -> Result<Resource, RepoError>;

    /// Merge the given values into the record. Known scalar fields are set at
    /// the top level, `data` keys are shallow-merged into the stored object.
    async fn update(&self, id: &Uuid, update: &ResourceUpdate) -> Result<Resource, RepoError>;

    /// Atomic conditional update: apply `update` and return the new row only
    /// if the row currently matches `filters`; otherwise return `None`.
    async fn compare_update(
        &self,
        id: &Uuid,
        filters: &ResourceFilters,
        update: &ResourceUpdate,
    ) -> Result<Option<Resource>, RepoError>;

    async fn delete(&self, id: &Uuid) -> Result<(), RepoError>;

    async fn find(&self, search: &ResourceSearch) -> Result<Vec<Resource>, RepoError>;

    async fn count(&self, filters: &ResourceFilters) -> Result<u64, RepoError>;
}

pub struct DbResourceRepo<DB: Database> {
    db_pool: Arc<Pool<DB>>,
}

impl<DB: Database> DbResourceRepo<DB> {
    pub fn new(db_pool: Arc<Pool<DB>>) -> Self {
        Self { db_pool }
    }
}

fn push_filters<'a, DB>(builder: &mut QueryBuilder<'a, DB>, filters: &'a ResourceFilters)
where
    DB: Database,
    String: for<'q> Encode<'q, DB> + Type<DB>,
    bool: for<'q> Encode<'q, DB> + Type<DB>,
{
    if let Some(driver) = &filters.driver {
        builder.push(" AND driver = ");
        builder.push_bind(driver.clone());
    }
    if let Some(class) = &filters.class {
        builder.push(" AND class = ");
        builder.push_bind(class.clone());
    }
    if let Some(statuses) = &filters.statuses {
        if statuses.is_empty() {
            builder.push(" AND 1 = 0");
        } else {
            builder.push(" AND status IN (");
            let mut separated = builder.separated(", ");
            for status in statuses {
                separated.push_bind(status.to_string());
            }
            builder.push(")");
        }
    }
    if let Some(pool) = &filters.pool {
        builder.push(" AND pool = ");
        builder.push_bind(pool.clone());
    }
    if filters.unused {
        builder.push(" AND pool IS NULL");
    }
    if let Some(processing) = filters.processing {
        builder.push(" AND processing = ");
        builder.push_bind(processing);
    }
    if let Some(allocated) = filters.allocated {
        builder.push(" AND allocated = ");
        builder.push_bind(allocated);
    }
    if let Some(deleted) = filters.deleted {
        builder.push(" AND deleted = ");
        builder.push_bind(deleted);
    }
}

const PG_COLUMNS: &str =
    "id, driver, class, status, pool, processing, allocated, deleted, description, data::text AS data";

#[async_trait]
impl ResourceRepo for DbResourceRepo<sqlx::Postgres> {
    async fn create(&self, resource: &NewResource) -> Result<Resource, RepoError> {
        let id = Uuid::new_v4();
        let data = serde_json::to_string(&resource.data)?;
        let record: ResourceRecord = sqlx::query_as(&format!(
            r#"
              INSERT INTO resources
                (id, driver, class, status, pool, processing, allocated, deleted, description, data)
              VALUES
                ($1, $2, $3, $4, NULL, $5, FALSE, FALSE, $6, $7::jsonb)
              RETURNING {PG_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(resource.driver.clone())
        .bind(resource.class.clone())
        .bind(resource.status.to_string())
        .bind(resource.processing)
        .bind(resource.description.clone())
        .bind(data)
        .fetch_one(self.db_pool.deref())
        .await?;

        record.try_into()
    }

    async fn get(&self, id: &Uuid) -> Result<Resource, RepoError> {
        let record: Option<ResourceRecord> =
            sqlx::query_as(&format!("SELECT {PG_COLUMNS} FROM resources WHERE id = $1"))
                .bind(id)
                .fetch_optional(self.db_pool.deref())
                .await?;

        record.ok_or(RepoError::NotFound(*id))?.try_into()
    }

    async fn update(&self, id: &Uuid, update: &ResourceUpdate) -> Result<Resource, RepoError> {
        if update.is_empty() {
            return self.get(id).await;
        }

        let mut builder: QueryBuilder<sqlx::Postgres> = QueryBuilder::new("UPDATE resources SET ");
        push_pg_set_clauses(&mut builder, update)?;
        builder.push(" WHERE id = ");
        builder.push_bind(*id);
        builder.push(format!(" RETURNING {PG_COLUMNS}"));

        let record: Option<ResourceRecord> = builder
            .build_query_as()
            .fetch_optional(self.db_pool.deref())
            .await?;

        record.ok_or(RepoError::NotFound(*id))?.try_into()
    }

    async fn compare_update(
        &self,
        id: &Uuid,
        filters: &ResourceFilters,
        update: &ResourceUpdate,
    ) -> Result<Option<Resource>, RepoError> {
        if update.is_empty() {
            let mut builder: QueryBuilder<sqlx::Postgres> =
                QueryBuilder::new(format!("SELECT {PG_COLUMNS} FROM resources WHERE id = "));
            builder.push_bind(*id);
            push_filters(&mut builder, filters);
            let record: Option<ResourceRecord> = builder
                .build_query_as()
                .fetch_optional(self.db_pool.deref())
                .await?;
            return record.map(Resource::try_from).transpose();
        }

        let mut builder: QueryBuilder<sqlx::Postgres> = QueryBuilder::new("UPDATE resources SET ");
        push_pg_set_clauses(&mut builder, update)?;
        builder.push(" WHERE id = ");
        builder.push_bind(*id);
        push_filters(&mut builder, filters);
        builder.push(format!(" RETURNING {PG_COLUMNS}"));

        let record: Option<ResourceRecord> = builder
            .build_query_as()
            .fetch_optional(self.db_pool.deref())
            .await?;

        record.map(Resource::try_from).transpose()
    }

    async fn delete(&self, id: &Uuid) -> Result<(), RepoError> {
        let result = sqlx::query("DELETE FROM resources WHERE id = $1")
            .bind(id)
            .execute(self.db_pool.deref())
            .await?;

        if result.rows_affected() == 0 {
            Err(RepoError::NotFound(*id))
        } else {
            Ok(())
        }
    }

    async fn find(&self, search: &ResourceSearch) -> Result<Vec<Resource>, RepoError> {
        let mut builder: QueryBuilder<sqlx::Postgres> =
            QueryBuilder::new(format!("SELECT {PG_COLUMNS} FROM resources WHERE 1 = 1"));
        push_filters(&mut builder, &search.filters);
        if let Some(limit) = search.limit {
            builder.push(" LIMIT ");
            builder.push_bind(limit as i64);
        }
        if let Some(offset) = search.offset {
            builder.push(" OFFSET ");
            builder.push_bind(offset as i64);
        }

        let records: Vec<ResourceRecord> = builder
            .build_query_as()
            .fetch_all(self.db_pool.deref())
            .await?;

        records.into_iter().map(Resource::try_from).collect()
    }

    async fn count(&self, filters: &ResourceFilters) -> Result<u64, RepoError> {
        let mut builder: QueryBuilder<sqlx::Postgres> =
            QueryBuilder::new("SELECT COUNT(*) FROM resources WHERE 1 = 1");
        push_filters(&mut builder, filters);

        let count: i64 = builder
            .build_query_scalar()
            .fetch_one(self.db_pool.deref())
            .await?;

        Ok(count as u64)
    }
}

fn push_pg_set_clauses<'a>(
    builder: &mut QueryBuilder<'a, sqlx::Postgres>,
    update: &'a ResourceUpdate,
) -> Result<(), RepoError> {
    let mut separated = builder.separated(", ");
    if let Some(status) = update.status {
        separated.push("status = ");
        separated.push_bind_unseparated(status.to_string());
    }
    if let Some(pool) = &update.pool {
        separated.push("pool = ");
        separated.push_bind_unseparated(pool.clone());
    }
    if let Some(processing) = update.processing {
        separated.push("processing = ");
        separated.push_bind_unseparated(processing);
    }
    if let Some(allocated) = update.allocated {
        separated.push("allocated = ");
        separated.push_bind_unseparated(allocated);
    }
    if let Some(deleted) = update.deleted {
        separated.push("deleted = ");
        separated.push_bind_unseparated(deleted);
    }
    if let Some(description) = &update.description {
        separated.push("description = ");
        separated.push_bind_unseparated(description.clone());
    }
    if let Some(data) = &update.data {
        if !data.is_empty() {
            separated.push("data = data || ");
            separated.push_bind_unseparated(serde_json::to_string(data)?);
            separated.push_unseparated("::jsonb");
        }
    }
    Ok(())
}

const SQLITE_COLUMNS: &str =
    "id, driver, class, status, pool, processing, allocated, deleted, description, data";

#[async_trait]
impl ResourceRepo for DbResourceRepo<sqlx::Sqlite> {
    async fn create(&self, resource: &NewResource) -> Result<Resource, RepoError> {
        let id = Uuid::new_v4();
        let data = serde_json::to_string(&resource.data)?;
        let record: ResourceRecord = sqlx::query_as(&format!(
            r#"
              INSERT INTO resources
                (id, driver, class, status, pool, processing, allocated, deleted, description, data)
              VALUES
                ($1, $2, $3, $4, NULL, $5, FALSE, FALSE, $6, $7)
              RETURNING {SQLITE_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(resource.driver.clone())
        .bind(resource.class.clone())
        .bind(resource.status.to_string())
        .bind(resource.processing)
        .bind(resource.description.clone())
        .bind(data)
        .fetch_one(self.db_pool.deref())
        .await?;

        record.try_into()
    }

    async fn get(&self, id: &Uuid) -> Result<Resource, RepoError> {
        let record: Option<ResourceRecord> = sqlx::query_as(&format!(
            "SELECT {SQLITE_COLUMNS} FROM resources WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(self.db_pool.deref())
        .await?;

        record.ok_or(RepoError::NotFound(*id))?.try_into()
    }

    async fn update(&self, id: &Uuid, update: &ResourceUpdate) -> Result<Resource, RepoError> {
        if update.is_empty() {
            return self.get(id).await;
        }

        let mut builder: QueryBuilder<sqlx::Sqlite> = QueryBuilder::new("UPDATE resources SET ");
        push_sqlite_set_clauses(&mut builder, update)?;
        builder.push(" WHERE id = ");
        builder.push_bind(*id);
        builder.push(format!(" RETURNING {SQLITE_COLUMNS}"));

        let record: Option<ResourceRecord> = builder
            .build_query_as()
            .fetch_optional(self.db_pool.deref())
            .await?;

        record.ok_or(RepoError::NotFound(*id))?.try_into()
    }

    async fn compare_update(
        &self,
        id: &Uuid,
        filters: &ResourceFilters,
        update: &ResourceUpdate,
    ) -> Result<Option<Resource>, RepoError> {
        if update.is_empty() {
            let mut builder: QueryBuilder<sqlx::Sqlite> =
                QueryBuilder::new(format!("SELECT {SQLITE_COLUMNS} FROM resources WHERE id = "));
            builder.push_bind(*id);
            push_filters(&mut builder, filters);
            let record: Option<ResourceRecord> = builder
                .build_query_as()
                .fetch_optional(self.db_pool.deref())
                .await?;
            return record.map(Resource::try_from).transpose();
        }

        let mut builder: QueryBuilder<sqlx::Sqlite> = QueryBuilder::new("UPDATE resources SET ");
        push_sqlite_set_clauses(&mut builder, update)?;
        builder.push(" WHERE id = ");
        builder.push_bind(*id);
        push_filters(&mut builder, filters);
        builder.push(format!(" RETURNING {SQLITE_COLUMNS}"));

        let record: Option<ResourceRecord> = builder
            .build_query_as()
            .fetch_optional(self.db_pool.deref())
            .await?;

        record.map(Resource::try_from).transpose()
    }

    async fn delete(&self, id: &Uuid) -> Result<(), RepoError> {
        let result = sqlx::query("DELETE FROM resources WHERE id = $1")
            .bind(id)
            .execute(self.db_pool.deref())
            .await?;

        if result.rows_affected() == 0 {
            Err(RepoError::NotFound(*id))
        } else {
            Ok(())
        }
    }

    async fn find(&self, search: &ResourceSearch) -> Result<Vec<Resource>, RepoError> {
        let mut builder: QueryBuilder<sqlx::Sqlite> =
            QueryBuilder::new(format!("SELECT {SQLITE_COLUMNS} FROM resources WHERE 1 = 1"));
        push_filters(&mut builder, &search.filters);
        match (search.limit, search.offset) {
            (Some(limit), Some(offset)) => {
                builder.push(" LIMIT ");
                builder.push_bind(limit as i64);
                builder.push(" OFFSET ");
                builder.push_bind(offset as i64);
            }
            (Some(limit), None) => {
                builder.push(" LIMIT ");
                builder.push_bind(limit as i64);
            }
            (None, Some(offset)) => {
                // sqlite requires a LIMIT clause before OFFSET
                builder.push(" LIMIT -1 OFFSET ");
                builder.push_bind(offset as i64);
            }
            (None, None) => {}
        }

        let records: Vec<ResourceRecord> = builder
            .build_query_as()
            .fetch_all(self.db_pool.deref())
            .await?;

        records.into_iter().map(Resource::try_from).collect()
    }

    async fn count(&self, filters: &ResourceFilters) -> Result<u64, RepoError> {
        let mut builder: QueryBuilder<sqlx::Sqlite> =
            QueryBuilder::new("SELECT COUNT(*) FROM resources WHERE 1 = 1");
        push_filters(&mut builder, filters);

        let count: i64 = builder
            .build_query_scalar()
            .fetch_one(self.db_pool.deref())
            .await?;

        Ok(count as u64)
    }
}

fn push_sqlite_set_clauses<'a>(
    builder: &mut QueryBuilder<'a, sqlx::Sqlite>,
    update: &'a ResourceUpdate,
) -> Result<(), RepoError> {
    let mut separated = builder.separated(", ");
    if let Some(status) = update.status {
        separated.push("status = ");
        separated.push_bind_unseparated(status.to_string());
    }
    if let Some(pool) = &update.pool {
        separated.push("pool = ");
        separated.push_bind_unseparated(pool.clone());
    }
    if let Some(processing) = update.processing {
        separated.push("processing = ");
        separated.push_bind_unseparated(processing);
    }
    if let Some(allocated) = update.allocated {
        separated.push("allocated = ");
        separated.push_bind_unseparated(allocated);
    }
    if let Some(deleted) = update.deleted {
        separated.push("deleted = ");
        separated.push_bind_unseparated(deleted);
    }
    if let Some(description) = &update.description {
        separated.push("description = ");
        separated.push_bind_unseparated(description.clone());
    }
    if let Some(data) = &update.data {
        if !data.is_empty() {
            separated.push("data = json_patch(data, ");
            separated.push_bind_unseparated(serde_json::to_string(data)?);
            separated.push_unseparated(")");
        }
    }
    Ok(())
}
