//! Postgres-backed implementation of the roster store.
//!
//! # Purpose
//! Durable, shared storage for organizations, categories, sub-groups, roles,
//! members, links and membership requests, via `sqlx`.
//!
//! # Key invariants
//! - Uniqueness rules live in the schema (`migrations/`), so upserts are single
//!   `INSERT ... ON CONFLICT` statements and atomic under concurrency.
//! - `roles_scope_key` is `UNIQUE NULLS NOT DISTINCT`, which makes organization
//!   roles (`sub_group_id IS NULL`) unique per kind too. Requires Postgres 15+.
//! - Role deletion cascades to links through `ON DELETE CASCADE`.
//!
//! # Error mapping
//! - `23505` (unique violation) and `23514` (check violation) become `Conflict`.
//! - `23503` (foreign key violation) becomes `NotFound` for the referenced entity.
//!
//! # Security notes
//! - Database URLs may contain credentials; avoid logging them.
//! - Dynamic SQL is limited to `find_roles`, which only binds values.
use super::{
    Activity, CategoryStore, LinkStore, MemberStore, OrganizationStore, RequestStore, RoleStore,
    RosterStore, StoreError, StoreResult, SubGroupStore,
};
use crate::config::PostgresConfig;
use crate::error::Entity;
use crate::model::{
    Category, CategoryId, HeldRole, Member, MemberId, MembershipRequest, NewMember,
    NewMembershipRequest, NewOrganization, NewRole, NewSubGroup, Organization, OrganizationId,
    RequestId, Role, RoleCriteria, RoleId, RoleKind, SubGroup, SubGroupId,
};
use anyhow::anyhow;
use async_trait::async_trait;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::{FromRow, PgPool, Postgres, QueryBuilder};
use std::str::FromStr;
use std::time::Duration;

const ROLE_COLUMNS: &str = "id, display_name, kind, organization_id, sub_group_id, external_tag";
const SUB_GROUP_COLUMNS: &str =
    "id, organization_id, category_id, external_id, display_name, active";
const REQUEST_COLUMNS: &str = "id, member_id, category_id, organization_id, sub_group_id";

/// Durable roster store backed by Postgres.
///
/// # Example
/// ```rust,no_run
/// use roster::config::PostgresConfig;
/// use roster::store::postgres::PostgresStore;
///
/// async fn open(pg: PostgresConfig) {
///     let _ = PostgresStore::connect(&pg).await;
/// }
/// ```
pub struct PostgresStore {
    pool: PgPool,
}

#[derive(Debug, Clone, FromRow)]
struct DbOrganization {
    id: i64,
    display_name: String,
    external_id: Option<String>,
    active: bool,
}

#[derive(Debug, Clone, FromRow)]
struct DbCategory {
    id: i64,
    name: String,
}

#[derive(Debug, Clone, FromRow)]
struct DbSubGroup {
    id: i64,
    organization_id: i64,
    category_id: i64,
    external_id: String,
    display_name: String,
    active: bool,
}

/// Row shape for `roles`. `kind` is stored as text and parsed on the way out.
#[derive(Debug, Clone, FromRow)]
struct DbRole {
    id: i64,
    display_name: String,
    kind: String,
    organization_id: i64,
    sub_group_id: Option<i64>,
    external_tag: Option<String>,
}

#[derive(Debug, Clone, FromRow)]
struct DbMember {
    id: i64,
    display_name: String,
    external_id: Option<String>,
    active: bool,
}

/// Role joined with its (optional) sub-group; the `sg_` columns are null for
/// organization roles.
#[derive(Debug, Clone, FromRow)]
struct DbHeldRole {
    id: i64,
    display_name: String,
    kind: String,
    organization_id: i64,
    sub_group_id: Option<i64>,
    external_tag: Option<String>,
    sg_category_id: Option<i64>,
    sg_external_id: Option<String>,
    sg_display_name: Option<String>,
    sg_active: Option<bool>,
}

#[derive(Debug, Clone, FromRow)]
struct DbRequest {
    id: i64,
    member_id: i64,
    category_id: i64,
    organization_id: i64,
    sub_group_id: Option<i64>,
}

impl PostgresStore {
    /// Connect to Postgres and run the embedded migrations.
    ///
    /// # Errors
    /// - Connection, migration, or pool setup failures.
    pub async fn connect(pg: &PostgresConfig) -> StoreResult<Self> {
        Self::connect_internal(pg, true).await
    }

    /// Connect without running migrations, for tests that manage the schema.
    #[cfg(any(test, feature = "pg-tests"))]
    pub async fn connect_without_migrations(pg: &PostgresConfig) -> StoreResult<Self> {
        Self::connect_internal(pg, false).await
    }

    async fn connect_internal(pg: &PostgresConfig, run_migrations: bool) -> StoreResult<Self> {
        // Fail fast on a slow database instead of stalling every worker.
        let connect_options = PgConnectOptions::from_str(&pg.url)?;
        let connect = PgPoolOptions::new()
            .max_connections(pg.max_connections)
            .acquire_timeout(Duration::from_millis(pg.acquire_timeout_ms))
            .connect_with(connect_options);
        let pool = tokio::time::timeout(Duration::from_millis(pg.connect_timeout_ms), connect)
            .await
            .map_err(|_| StoreError::Unexpected(anyhow!("postgres connect timed out")))??;

        if run_migrations {
            sqlx::migrate!("./migrations").run(&pool).await?;
        }

        Ok(Self { pool })
    }

    /// Underlying pool, for test fixtures that reset tables.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn include_inactive(activity: Activity) -> bool {
    activity == Activity::IncludeInactive
}

/// Unique or check constraint violation.
fn is_constraint_conflict(err: &sqlx::Error) -> bool {
    if let sqlx::Error::Database(db_err) = err {
        return db_err
            .code()
            .map(|code| code == "23505" || code == "23514")
            .unwrap_or(false);
    }
    false
}

/// Entity referenced by a violated foreign key, if the error is one.
fn foreign_key_target(err: &sqlx::Error) -> Option<Entity> {
    let sqlx::Error::Database(db_err) = err else {
        return None;
    };
    if db_err.code().is_none_or(|code| code != "23503") {
        return None;
    }
    let constraint = db_err.constraint().unwrap_or_default();
    let entity = if constraint.ends_with("_organization_fk") {
        Entity::Organization
    } else if constraint.ends_with("_category_fk") {
        Entity::Category
    } else if constraint.ends_with("_sub_group_fk") {
        Entity::SubGroup
    } else if constraint.ends_with("_role_fk") {
        Entity::Role
    } else if constraint.ends_with("_member_fk") {
        Entity::Member
    } else {
        return None;
    };
    Some(entity)
}

fn write_error(err: sqlx::Error, conflict: &str) -> StoreError {
    if is_constraint_conflict(&err) {
        return StoreError::Conflict(conflict.into());
    }
    if let Some(entity) = foreign_key_target(&err) {
        return StoreError::NotFound(entity);
    }
    StoreError::Unexpected(err.into())
}

fn ids<T>(values: &[T], raw: impl Fn(&T) -> i64) -> Vec<i64> {
    values.iter().map(raw).collect()
}

fn organization_from_db(row: DbOrganization) -> Organization {
    Organization {
        id: OrganizationId(row.id),
        display_name: row.display_name,
        external_id: row.external_id,
        active: row.active,
    }
}

fn category_from_db(row: DbCategory) -> Category {
    Category {
        id: CategoryId(row.id),
        name: row.name,
    }
}

fn sub_group_from_db(row: DbSubGroup) -> SubGroup {
    SubGroup {
        id: SubGroupId(row.id),
        organization_id: OrganizationId(row.organization_id),
        category_id: CategoryId(row.category_id),
        external_id: row.external_id,
        display_name: row.display_name,
        active: row.active,
    }
}

fn parse_role_kind(raw: &str) -> StoreResult<RoleKind> {
    RoleKind::from_str(raw).map_err(|err| StoreError::Unexpected(anyhow!(err)))
}

fn role_from_db(row: DbRole) -> StoreResult<Role> {
    Ok(Role {
        id: RoleId(row.id),
        display_name: row.display_name,
        kind: parse_role_kind(&row.kind)?,
        organization_id: OrganizationId(row.organization_id),
        sub_group_id: row.sub_group_id.map(SubGroupId),
        external_tag: row.external_tag,
    })
}

fn roles_from_db(rows: Vec<DbRole>) -> StoreResult<Vec<Role>> {
    rows.into_iter().map(role_from_db).collect()
}

fn held_role_from_db(row: DbHeldRole) -> StoreResult<HeldRole> {
    let sub_group = match (
        row.sub_group_id,
        row.sg_category_id,
        row.sg_external_id,
        row.sg_display_name,
        row.sg_active,
    ) {
        (Some(id), Some(category_id), Some(external_id), Some(display_name), Some(active)) => {
            Some(SubGroup {
                id: SubGroupId(id),
                organization_id: OrganizationId(row.organization_id),
                category_id: CategoryId(category_id),
                external_id,
                display_name,
                active,
            })
        }
        _ => None,
    };
    Ok(HeldRole {
        role: Role {
            id: RoleId(row.id),
            display_name: row.display_name,
            kind: parse_role_kind(&row.kind)?,
            organization_id: OrganizationId(row.organization_id),
            sub_group_id: row.sub_group_id.map(SubGroupId),
            external_tag: row.external_tag,
        },
        sub_group,
    })
}

fn member_from_db(row: DbMember) -> Member {
    Member {
        id: MemberId(row.id),
        display_name: row.display_name,
        external_id: row.external_id,
        active: row.active,
    }
}

fn request_from_db(row: DbRequest) -> MembershipRequest {
    MembershipRequest {
        id: RequestId(row.id),
        member_id: MemberId(row.member_id),
        category_id: CategoryId(row.category_id),
        organization_id: OrganizationId(row.organization_id),
        sub_group_id: row.sub_group_id.map(SubGroupId),
    }
}

#[async_trait]
impl OrganizationStore for PostgresStore {
    async fn upsert_organization(
        &self,
        organization: NewOrganization,
    ) -> StoreResult<Organization> {
        let row = sqlx::query_as::<_, DbOrganization>(
            r#"INSERT INTO organizations (display_name, external_id) VALUES ($1, $2)
               ON CONFLICT (external_id) DO UPDATE SET display_name = EXCLUDED.display_name
               RETURNING id, display_name, external_id, active"#,
        )
        .bind(&organization.display_name)
        .bind(&organization.external_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|err| write_error(err, "organization exists"))?;
        Ok(organization_from_db(row))
    }

    async fn get_organization(
        &self,
        id: OrganizationId,
        activity: Activity,
    ) -> StoreResult<Organization> {
        let row = sqlx::query_as::<_, DbOrganization>(
            r#"SELECT id, display_name, external_id, active FROM organizations
               WHERE id = $1 AND ($2 OR active)"#,
        )
        .bind(id.0)
        .bind(include_inactive(activity))
        .fetch_optional(&self.pool)
        .await?;
        row.map(organization_from_db)
            .ok_or(StoreError::NotFound(Entity::Organization))
    }

    async fn find_organization_by_external_id(
        &self,
        external_id: &str,
        activity: Activity,
    ) -> StoreResult<Option<Organization>> {
        let row = sqlx::query_as::<_, DbOrganization>(
            r#"SELECT id, display_name, external_id, active FROM organizations
               WHERE external_id = $1 AND ($2 OR active)"#,
        )
        .bind(external_id)
        .bind(include_inactive(activity))
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(organization_from_db))
    }

    async fn set_organization_active(&self, id: OrganizationId, active: bool) -> StoreResult<()> {
        let result = sqlx::query("UPDATE organizations SET active = $2 WHERE id = $1")
            .bind(id.0)
            .bind(active)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(Entity::Organization));
        }
        Ok(())
    }
}

#[async_trait]
impl CategoryStore for PostgresStore {
    async fn upsert_category(&self, name: &str) -> StoreResult<Category> {
        // The no-op update makes RETURNING yield the existing row on conflict.
        let row = sqlx::query_as::<_, DbCategory>(
            r#"INSERT INTO categories (name) VALUES ($1)
               ON CONFLICT (name) DO UPDATE SET name = EXCLUDED.name
               RETURNING id, name"#,
        )
        .bind(name)
        .fetch_one(&self.pool)
        .await?;
        Ok(category_from_db(row))
    }

    async fn get_category(&self, id: CategoryId) -> StoreResult<Category> {
        let row = sqlx::query_as::<_, DbCategory>("SELECT id, name FROM categories WHERE id = $1")
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await?;
        row.map(category_from_db)
            .ok_or(StoreError::NotFound(Entity::Category))
    }

    async fn list_categories(&self) -> StoreResult<Vec<Category>> {
        let rows = sqlx::query_as::<_, DbCategory>("SELECT id, name FROM categories ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(category_from_db).collect())
    }
}

#[async_trait]
impl SubGroupStore for PostgresStore {
    async fn upsert_sub_group(&self, sub_group: NewSubGroup) -> StoreResult<SubGroup> {
        let query = format!(
            r#"INSERT INTO sub_groups (organization_id, category_id, external_id, display_name)
               VALUES ($1, $2, $3, $4)
               ON CONFLICT ON CONSTRAINT sub_groups_key
               DO UPDATE SET display_name = EXCLUDED.display_name, active = TRUE
               RETURNING {SUB_GROUP_COLUMNS}"#
        );
        let row = sqlx::query_as::<_, DbSubGroup>(&query)
            .bind(sub_group.organization_id.0)
            .bind(sub_group.category_id.0)
            .bind(&sub_group.external_id)
            .bind(&sub_group.display_name)
            .fetch_one(&self.pool)
            .await
            .map_err(|err| write_error(err, "sub-group exists"))?;
        Ok(sub_group_from_db(row))
    }

    async fn get_sub_group(&self, id: SubGroupId, activity: Activity) -> StoreResult<SubGroup> {
        let query = format!(
            "SELECT {SUB_GROUP_COLUMNS} FROM sub_groups WHERE id = $1 AND ($2 OR active)"
        );
        let row = sqlx::query_as::<_, DbSubGroup>(&query)
            .bind(id.0)
            .bind(include_inactive(activity))
            .fetch_optional(&self.pool)
            .await?;
        row.map(sub_group_from_db)
            .ok_or(StoreError::NotFound(Entity::SubGroup))
    }

    async fn find_sub_group(
        &self,
        organization_id: OrganizationId,
        category_id: CategoryId,
        external_id: &str,
        activity: Activity,
    ) -> StoreResult<Option<SubGroup>> {
        let query = format!(
            r#"SELECT {SUB_GROUP_COLUMNS} FROM sub_groups
               WHERE organization_id = $1 AND category_id = $2 AND external_id = $3
                 AND ($4 OR active)"#
        );
        let row = sqlx::query_as::<_, DbSubGroup>(&query)
            .bind(organization_id.0)
            .bind(category_id.0)
            .bind(external_id)
            .bind(include_inactive(activity))
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(sub_group_from_db))
    }

    async fn list_sub_groups(
        &self,
        organization_id: OrganizationId,
        category_id: Option<CategoryId>,
        activity: Activity,
    ) -> StoreResult<Vec<SubGroup>> {
        let query = format!(
            r#"SELECT {SUB_GROUP_COLUMNS} FROM sub_groups
               WHERE organization_id = $1
                 AND ($2::BIGINT IS NULL OR category_id = $2)
                 AND ($3 OR active)
               ORDER BY id"#
        );
        let rows = sqlx::query_as::<_, DbSubGroup>(&query)
            .bind(organization_id.0)
            .bind(category_id.map(|id| id.0))
            .bind(include_inactive(activity))
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(sub_group_from_db).collect())
    }

    async fn set_sub_group_active(&self, id: SubGroupId, active: bool) -> StoreResult<()> {
        let result = sqlx::query("UPDATE sub_groups SET active = $2 WHERE id = $1")
            .bind(id.0)
            .bind(active)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(Entity::SubGroup));
        }
        Ok(())
    }
}

#[async_trait]
impl RoleStore for PostgresStore {
    async fn create_role(&self, role: NewRole) -> StoreResult<Role> {
        let query = format!(
            r#"INSERT INTO roles (display_name, kind, organization_id, sub_group_id, external_tag)
               VALUES ($1, $2, $3, $4, $5)
               RETURNING {ROLE_COLUMNS}"#
        );
        let row = sqlx::query_as::<_, DbRole>(&query)
            .bind(&role.display_name)
            .bind(role.kind.as_str())
            .bind(role.organization_id.0)
            .bind(role.sub_group_id.map(|id| id.0))
            .bind(&role.external_tag)
            .fetch_one(&self.pool)
            .await
            .map_err(|err| write_error(err, "role exists for this scope or tag"))?;
        role_from_db(row)
    }

    async fn upsert_role(&self, role: NewRole) -> StoreResult<Role> {
        let query = format!(
            r#"INSERT INTO roles (display_name, kind, organization_id, sub_group_id, external_tag)
               VALUES ($1, $2, $3, $4, $5)
               ON CONFLICT ON CONSTRAINT roles_scope_key
               DO UPDATE SET display_name = EXCLUDED.display_name,
                             external_tag = EXCLUDED.external_tag
               RETURNING {ROLE_COLUMNS}"#
        );
        let row = sqlx::query_as::<_, DbRole>(&query)
            .bind(&role.display_name)
            .bind(role.kind.as_str())
            .bind(role.organization_id.0)
            .bind(role.sub_group_id.map(|id| id.0))
            .bind(&role.external_tag)
            .fetch_one(&self.pool)
            .await
            .map_err(|err| write_error(err, "role tag already in use"))?;
        role_from_db(row)
    }

    async fn get_role(&self, id: RoleId) -> StoreResult<Role> {
        let query = format!("SELECT {ROLE_COLUMNS} FROM roles WHERE id = $1");
        let row = sqlx::query_as::<_, DbRole>(&query)
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => role_from_db(row),
            None => Err(StoreError::NotFound(Entity::Role)),
        }
    }

    async fn find_role(
        &self,
        organization_id: OrganizationId,
        sub_group_id: Option<SubGroupId>,
        kind: RoleKind,
    ) -> StoreResult<Option<Role>> {
        let query = format!(
            r#"SELECT {ROLE_COLUMNS} FROM roles
               WHERE organization_id = $1 AND sub_group_id IS NOT DISTINCT FROM $2 AND kind = $3"#
        );
        let row = sqlx::query_as::<_, DbRole>(&query)
            .bind(organization_id.0)
            .bind(sub_group_id.map(|id| id.0))
            .bind(kind.as_str())
            .fetch_optional(&self.pool)
            .await?;
        row.map(role_from_db).transpose()
    }

    async fn find_roles_by_tags(
        &self,
        organization_id: OrganizationId,
        tags: &[String],
    ) -> StoreResult<Vec<Role>> {
        if tags.is_empty() {
            return Ok(Vec::new());
        }
        let query = format!(
            r#"SELECT {ROLE_COLUMNS} FROM roles
               WHERE organization_id = $1 AND external_tag = ANY($2)
               ORDER BY id"#
        );
        let rows = sqlx::query_as::<_, DbRole>(&query)
            .bind(organization_id.0)
            .bind(tags)
            .fetch_all(&self.pool)
            .await?;
        roles_from_db(rows)
    }

    async fn find_roles(&self, criteria: &[RoleCriteria]) -> StoreResult<Vec<Role>> {
        if criteria.is_empty() {
            return Ok(Vec::new());
        }
        let mut builder: QueryBuilder<Postgres> =
            QueryBuilder::new(format!("SELECT {ROLE_COLUMNS} FROM roles WHERE "));
        for (index, criteria) in criteria.iter().enumerate() {
            if index > 0 {
                builder.push(" OR ");
            }
            builder
                .push("(organization_id = ")
                .push_bind(criteria.organization_id.0);
            if let Some(sub_group_id) = criteria.sub_group_id {
                builder.push(" AND sub_group_id = ").push_bind(sub_group_id.0);
            }
            if let Some(kind) = criteria.kind {
                builder.push(" AND kind = ").push_bind(kind.as_str());
            }
            builder.push(")");
        }
        builder.push(" ORDER BY id");
        let rows = builder
            .build_query_as::<DbRole>()
            .fetch_all(&self.pool)
            .await?;
        roles_from_db(rows)
    }

    async fn delete_role(&self, id: RoleId) -> StoreResult<()> {
        let result = sqlx::query("DELETE FROM roles WHERE id = $1")
            .bind(id.0)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(Entity::Role));
        }
        Ok(())
    }
}

#[async_trait]
impl MemberStore for PostgresStore {
    async fn upsert_member(&self, member: NewMember) -> StoreResult<Member> {
        let row = sqlx::query_as::<_, DbMember>(
            r#"INSERT INTO members (display_name, external_id) VALUES ($1, $2)
               ON CONFLICT (external_id) DO UPDATE SET display_name = EXCLUDED.display_name
               RETURNING id, display_name, external_id, active"#,
        )
        .bind(&member.display_name)
        .bind(&member.external_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|err| write_error(err, "member exists"))?;
        Ok(member_from_db(row))
    }

    async fn get_member(&self, id: MemberId, activity: Activity) -> StoreResult<Member> {
        let row = sqlx::query_as::<_, DbMember>(
            r#"SELECT id, display_name, external_id, active FROM members
               WHERE id = $1 AND ($2 OR active)"#,
        )
        .bind(id.0)
        .bind(include_inactive(activity))
        .fetch_optional(&self.pool)
        .await?;
        row.map(member_from_db)
            .ok_or(StoreError::NotFound(Entity::Member))
    }

    async fn find_member_by_external_id(
        &self,
        external_id: &str,
        activity: Activity,
    ) -> StoreResult<Option<Member>> {
        let row = sqlx::query_as::<_, DbMember>(
            r#"SELECT id, display_name, external_id, active FROM members
               WHERE external_id = $1 AND ($2 OR active)"#,
        )
        .bind(external_id)
        .bind(include_inactive(activity))
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(member_from_db))
    }

    async fn set_member_active(&self, id: MemberId, active: bool) -> StoreResult<()> {
        let result = sqlx::query("UPDATE members SET active = $2 WHERE id = $1")
            .bind(id.0)
            .bind(active)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(Entity::Member));
        }
        Ok(())
    }
}

#[async_trait]
impl LinkStore for PostgresStore {
    async fn create_link(&self, member_id: MemberId, role_id: RoleId) -> StoreResult<bool> {
        let result = sqlx::query(
            r#"INSERT INTO member_roles (member_id, role_id) VALUES ($1, $2)
               ON CONFLICT DO NOTHING"#,
        )
        .bind(member_id.0)
        .bind(role_id.0)
        .execute(&self.pool)
        .await
        .map_err(|err| write_error(err, "link exists"))?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_link(&self, member_id: MemberId, role_id: RoleId) -> StoreResult<bool> {
        let result = sqlx::query("DELETE FROM member_roles WHERE member_id = $1 AND role_id = $2")
            .bind(member_id.0)
            .bind(role_id.0)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_member_roles(
        &self,
        member_id: MemberId,
        organization_id: OrganizationId,
    ) -> StoreResult<Vec<HeldRole>> {
        let rows = sqlx::query_as::<_, DbHeldRole>(
            r#"SELECT r.id, r.display_name, r.kind, r.organization_id, r.sub_group_id, r.external_tag,
                      sg.category_id AS sg_category_id,
                      sg.external_id AS sg_external_id,
                      sg.display_name AS sg_display_name,
                      sg.active AS sg_active
               FROM member_roles mr
               JOIN roles r ON r.id = mr.role_id
               LEFT JOIN sub_groups sg ON sg.id = r.sub_group_id
               WHERE mr.member_id = $1 AND r.organization_id = $2
               ORDER BY r.id"#,
        )
        .bind(member_id.0)
        .bind(organization_id.0)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(held_role_from_db).collect()
    }

    async fn member_holds_any_role(
        &self,
        member_id: MemberId,
        role_ids: &[RoleId],
    ) -> StoreResult<bool> {
        if role_ids.is_empty() {
            return Ok(false);
        }
        let held: bool = sqlx::query_scalar(
            r#"SELECT EXISTS (
                   SELECT 1 FROM member_roles WHERE member_id = $1 AND role_id = ANY($2)
               )"#,
        )
        .bind(member_id.0)
        .bind(ids(role_ids, |id| id.0))
        .fetch_one(&self.pool)
        .await?;
        Ok(held)
    }
}

#[async_trait]
impl RequestStore for PostgresStore {
    async fn create_request(
        &self,
        request: NewMembershipRequest,
    ) -> StoreResult<MembershipRequest> {
        let query = format!(
            r#"INSERT INTO membership_requests (member_id, category_id, organization_id, sub_group_id)
               VALUES ($1, $2, $3, $4)
               RETURNING {REQUEST_COLUMNS}"#
        );
        let row = sqlx::query_as::<_, DbRequest>(&query)
            .bind(request.member_id.0)
            .bind(request.category_id.0)
            .bind(request.organization_id.0)
            .bind(request.sub_group_id.map(|id| id.0))
            .fetch_one(&self.pool)
            .await
            .map_err(|err| write_error(err, "membership request exists"))?;
        Ok(request_from_db(row))
    }

    async fn get_request(&self, id: RequestId) -> StoreResult<MembershipRequest> {
        let query = format!("SELECT {REQUEST_COLUMNS} FROM membership_requests WHERE id = $1");
        let row = sqlx::query_as::<_, DbRequest>(&query)
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await?;
        row.map(request_from_db)
            .ok_or(StoreError::NotFound(Entity::Request))
    }

    async fn find_request(
        &self,
        member_id: MemberId,
        organization_id: OrganizationId,
        category_id: CategoryId,
    ) -> StoreResult<Option<MembershipRequest>> {
        let query = format!(
            r#"SELECT {REQUEST_COLUMNS} FROM membership_requests
               WHERE member_id = $1 AND organization_id = $2 AND category_id = $3"#
        );
        let row = sqlx::query_as::<_, DbRequest>(&query)
            .bind(member_id.0)
            .bind(organization_id.0)
            .bind(category_id.0)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(request_from_db))
    }

    async fn delete_request(&self, id: RequestId) -> StoreResult<()> {
        let result = sqlx::query("DELETE FROM membership_requests WHERE id = $1")
            .bind(id.0)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(Entity::Request));
        }
        Ok(())
    }
}

#[async_trait]
impl RosterStore for PostgresStore {
    async fn health_check(&self) -> StoreResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    fn is_durable(&self) -> bool {
        true
    }

    fn backend_name(&self) -> &'static str {
        "postgres"
    }
}
