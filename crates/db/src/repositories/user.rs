use std::collections::BTreeSet;

use sqlx::{sqlite::SqliteRow, Row, SqliteConnection};

use resourcing_core::domain::user::{Permission, Profession, ProfessionId, User, UserId};

use super::{RepositoryError, UserRepository};
use crate::DbPool;

pub struct SqlUserRepository {
    pool: DbPool,
}

impl SqlUserRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl UserRepository for SqlUserRepository {
    async fn find_by_id(&self, id: &UserId) -> Result<Option<User>, RepositoryError> {
        let mut conn = self.pool.acquire().await?;
        load_user(&mut conn, id).await
    }

    async fn list(&self) -> Result<Vec<User>, RepositoryError> {
        let mut conn = self.pool.acquire().await?;
        let rows = sqlx::query(
            "SELECT id, email, first_name, last_name, profession_id, is_superuser
             FROM app_user
             ORDER BY last_name ASC, first_name ASC, id ASC",
        )
        .fetch_all(&mut *conn)
        .await?;

        let mut users = Vec::with_capacity(rows.len());
        for row in rows {
            let mut user = user_from_row(row)?;
            user.permissions = load_permissions(&mut conn, &user.id).await?;
            users.push(user);
        }
        Ok(users)
    }

    async fn save(&self, user: &User) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO app_user (id, email, first_name, last_name, profession_id, is_superuser)
             VALUES (?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                email = excluded.email,
                first_name = excluded.first_name,
                last_name = excluded.last_name,
                profession_id = excluded.profession_id,
                is_superuser = excluded.is_superuser",
        )
        .bind(&user.id.0)
        .bind(&user.email)
        .bind(&user.first_name)
        .bind(&user.last_name)
        .bind(user.profession.as_ref().map(|profession| profession.0.as_str()))
        .bind(user.is_superuser)
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM user_permission WHERE user_id = ?")
            .bind(&user.id.0)
            .execute(&mut *tx)
            .await?;

        for permission in &user.permissions {
            sqlx::query("INSERT INTO user_permission (user_id, codename) VALUES (?, ?)")
                .bind(&user.id.0)
                .bind(permission.codename())
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn find_profession(
        &self,
        id: &ProfessionId,
    ) -> Result<Option<Profession>, RepositoryError> {
        let row = sqlx::query("SELECT id, name FROM profession WHERE id = ?")
            .bind(&id.0)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|row| {
            Ok(Profession { id: ProfessionId(row.try_get("id")?), name: row.try_get("name")? })
        })
        .transpose()
    }

    async fn save_profession(&self, profession: &Profession) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO profession (id, name) VALUES (?, ?)
             ON CONFLICT(id) DO UPDATE SET name = excluded.name",
        )
        .bind(&profession.id.0)
        .bind(&profession.name)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

pub(crate) async fn load_user(
    conn: &mut SqliteConnection,
    id: &UserId,
) -> Result<Option<User>, RepositoryError> {
    let row = sqlx::query(
        "SELECT id, email, first_name, last_name, profession_id, is_superuser
         FROM app_user
         WHERE id = ?",
    )
    .bind(&id.0)
    .fetch_optional(&mut *conn)
    .await?;

    let Some(row) = row else {
        return Ok(None);
    };
    let mut user = user_from_row(row)?;
    user.permissions = load_permissions(conn, &user.id).await?;
    Ok(Some(user))
}

async fn load_permissions(
    conn: &mut SqliteConnection,
    user_id: &UserId,
) -> Result<BTreeSet<Permission>, RepositoryError> {
    let codenames: Vec<String> =
        sqlx::query_scalar("SELECT codename FROM user_permission WHERE user_id = ?")
            .bind(&user_id.0)
            .fetch_all(&mut *conn)
            .await?;

    codenames
        .into_iter()
        .map(|codename| {
            Permission::parse(&codename).ok_or_else(|| {
                RepositoryError::Decode(format!("unknown permission codename `{codename}`"))
            })
        })
        .collect()
}

fn user_from_row(row: SqliteRow) -> Result<User, RepositoryError> {
    Ok(User {
        id: UserId(row.try_get("id")?),
        email: row.try_get("email")?,
        first_name: row.try_get("first_name")?,
        last_name: row.try_get("last_name")?,
        profession: row.try_get::<Option<String>, _>("profession_id")?.map(ProfessionId),
        is_superuser: row.try_get("is_superuser")?,
        permissions: BTreeSet::new(),
    })
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use resourcing_core::domain::approval::ApprovalType;
    use resourcing_core::domain::user::{Permission, Profession, ProfessionId, User, UserId};

    use super::SqlUserRepository;
    use crate::repositories::UserRepository;
    use crate::{connect_with_settings, migrations};

    #[tokio::test]
    async fn save_replaces_permissions_and_keeps_profession() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        let repo = SqlUserRepository::new(pool);

        let profession =
            Profession { id: ProfessionId("ddat".to_string()), name: "DDaT".to_string() };
        repo.save_profession(&profession).await.expect("profession");

        let mut user = User {
            id: UserId("hop".to_string()),
            email: "hop@example.gov.uk".to_string(),
            first_name: "Hana".to_string(),
            last_name: "Okafor".to_string(),
            profession: Some(profession.id.clone()),
            is_superuser: false,
            permissions: BTreeSet::from([
                Permission::GiveApproval(ApprovalType::HeadOfProfession),
                Permission::AddComment,
            ]),
        };
        repo.save(&user).await.expect("save");

        user.permissions = BTreeSet::from([Permission::AddComment]);
        repo.save(&user).await.expect("save again");

        let loaded = repo.find_by_id(&user.id).await.expect("find").expect("user exists");
        assert_eq!(loaded, user);
        assert_eq!(loaded.full_name(), "Hana Okafor");
        assert_eq!(
            repo.find_profession(&profession.id).await.expect("find profession"),
            Some(profession)
        );
        assert_eq!(repo.list().await.expect("list").len(), 1);
    }
}
