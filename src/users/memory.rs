use async_trait::async_trait;
use std::collections::HashMap;
use time::OffsetDateTime;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::repo::UserStore;
use super::repo_types::{DuplicateKey, NewUser, ProfileChanges, User};
use crate::bmi::repo::{BmiRecord, BmiStore, NewBmiRecord};

#[derive(Default)]
struct Tables {
    users: HashMap<Uuid, User>,
    bmi: Vec<BmiRecord>,
}

/// Both relational tables in process memory, with the same uniqueness and
/// cascade rules as the Postgres schema.
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn taken(
    tables: &Tables,
    skip: Option<Uuid>,
    email: Option<&str>,
    username: Option<&str>,
) -> Option<&'static str> {
    tables
        .users
        .values()
        .filter(|u| Some(u.id) != skip)
        .find_map(|u| {
            if email.is_some_and(|e| e == u.email) {
                Some("email")
            } else if username.is_some_and(|n| n == u.username) {
                Some("username")
            } else {
                None
            }
        })
}

#[async_trait]
impl UserStore for MemoryStore {
    async fn find_by_id(&self, id: Uuid) -> anyhow::Result<Option<User>> {
        Ok(self.tables.read().await.users.get(&id).cloned())
    }

    async fn find_by_email(&self, email: &str) -> anyhow::Result<Option<User>> {
        let tables = self.tables.read().await;
        Ok(tables.users.values().find(|u| u.email == email).cloned())
    }

    async fn find_conflicts(&self, email: &str, username: &str) -> anyhow::Result<Vec<User>> {
        let tables = self.tables.read().await;
        Ok(tables
            .users
            .values()
            .filter(|u| u.email == email || u.username == username)
            .cloned()
            .collect())
    }

    async fn create(&self, user: NewUser) -> anyhow::Result<User> {
        let mut tables = self.tables.write().await;
        if let Some(field) = taken(&tables, None, Some(&user.email), Some(&user.username)) {
            return Err(DuplicateKey(field).into());
        }
        let now = OffsetDateTime::now_utc();
        let created = User {
            id: Uuid::new_v4(),
            email: user.email,
            username: user.username,
            password_hash: user.password_hash,
            fullname: user.fullname,
            age: user.age,
            gender: user.gender,
            country: user.country,
            preferred_language: user.preferred_language,
            height: user.height,
            weight: user.weight,
            social_login: user.social_login,
            is_social_login: user.social_login,
            created_at: now,
            updated_at: now,
        };
        tables.users.insert(created.id, created.clone());
        Ok(created)
    }

    async fn update_password(
        &self,
        id: Uuid,
        password_hash: &str,
        social_login: bool,
    ) -> anyhow::Result<()> {
        let mut tables = self.tables.write().await;
        if let Some(user) = tables.users.get_mut(&id) {
            user.password_hash = password_hash.to_string();
            user.social_login = social_login;
            user.updated_at = OffsetDateTime::now_utc();
        }
        Ok(())
    }

    async fn update_profile(
        &self,
        id: Uuid,
        changes: ProfileChanges,
    ) -> anyhow::Result<Option<User>> {
        let mut tables = self.tables.write().await;
        if let Some(field) = taken(&tables, Some(id), None, changes.username.as_deref()) {
            return Err(DuplicateKey(field).into());
        }
        let Some(user) = tables.users.get_mut(&id) else {
            return Ok(None);
        };
        if let Some(v) = changes.fullname {
            user.fullname = v;
        }
        if let Some(v) = changes.username {
            user.username = v;
        }
        if let Some(v) = changes.age {
            user.age = v;
        }
        if let Some(v) = changes.gender {
            user.gender = v;
        }
        if let Some(v) = changes.country {
            user.country = v;
        }
        if let Some(v) = changes.preferred_language {
            user.preferred_language = v;
        }
        user.updated_at = OffsetDateTime::now_utc();
        Ok(Some(user.clone()))
    }

    async fn update_measurements(&self, id: Uuid, height: f64, weight: f64) -> anyhow::Result<()> {
        let mut tables = self.tables.write().await;
        if let Some(user) = tables.users.get_mut(&id) {
            user.height = height;
            user.weight = weight;
            user.updated_at = OffsetDateTime::now_utc();
        }
        Ok(())
    }

    async fn delete(&self, id: Uuid) -> anyhow::Result<bool> {
        let mut tables = self.tables.write().await;
        let existed = tables.users.remove(&id).is_some();
        tables.bmi.retain(|r| r.user_id != id);
        Ok(existed)
    }
}

#[async_trait]
impl BmiStore for MemoryStore {
    async fn insert(&self, record: NewBmiRecord) -> anyhow::Result<BmiRecord> {
        let mut tables = self.tables.write().await;
        if !tables.users.contains_key(&record.user_id) {
            anyhow::bail!("bmi_records.user_id references a missing user");
        }
        let row = BmiRecord {
            id: Uuid::new_v4(),
            user_id: record.user_id,
            bmi: record.bmi,
            calculation_unit: record.calculation_unit,
            category: record.category,
            height: record.height,
            weight: record.weight,
            created_at: OffsetDateTime::now_utc(),
        };
        tables.bmi.push(row.clone());
        Ok(row)
    }

    async fn list_by_user(&self, user_id: Uuid) -> anyhow::Result<Vec<BmiRecord>> {
        let tables = self.tables.read().await;
        // insertion order is chronological
        Ok(tables
            .bmi
            .iter()
            .rev()
            .filter(|r| r.user_id == user_id)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_user(email: &str, username: &str) -> NewUser {
        NewUser {
            email: email.into(),
            username: username.into(),
            password_hash: "$argon2id$fake".into(),
            fullname: "Test User".into(),
            age: 30,
            gender: "female".into(),
            country: "Germany".into(),
            preferred_language: "English".into(),
            height: 170.0,
            weight: 65.0,
            social_login: false,
        }
    }

    fn bmi_for(user_id: Uuid, bmi: f64) -> NewBmiRecord {
        NewBmiRecord {
            user_id,
            bmi,
            calculation_unit: "metric".into(),
            category: "Normal weight".into(),
            height: 170.0,
            weight: 65.0,
        }
    }

    #[tokio::test]
    async fn duplicate_email_and_username_are_rejected() {
        let store = MemoryStore::new();
        store.create(new_user("a@x.com", "ada")).await.unwrap();

        let err = store.create(new_user("a@x.com", "other")).await.unwrap_err();
        assert_eq!(DuplicateKey::find(&err).map(|d| d.0), Some("email"));

        let err = store.create(new_user("b@x.com", "ada")).await.unwrap_err();
        assert_eq!(DuplicateKey::find(&err).map(|d| d.0), Some("username"));
    }

    #[tokio::test]
    async fn profile_update_keeps_unset_fields() {
        let store = MemoryStore::new();
        let user = store.create(new_user("a@x.com", "ada")).await.unwrap();
        let updated = store
            .update_profile(
                user.id,
                ProfileChanges {
                    fullname: Some("Ada L".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.fullname, "Ada L");
        assert_eq!(updated.username, "ada");
        assert_eq!(updated.country, "Germany");
    }

    #[tokio::test]
    async fn delete_cascades_to_history() {
        let store = MemoryStore::new();
        let user = store.create(new_user("a@x.com", "ada")).await.unwrap();
        store.insert(bmi_for(user.id, 21.0)).await.unwrap();
        store.insert(bmi_for(user.id, 22.0)).await.unwrap();

        let history = store.list_by_user(user.id).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].bmi, 22.0);

        assert!(store.delete(user.id).await.unwrap());
        assert!(store.list_by_user(user.id).await.unwrap().is_empty());
        assert!(!store.delete(user.id).await.unwrap());
    }
}
