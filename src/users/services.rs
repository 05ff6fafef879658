use std::sync::Arc;

use anyhow::Context;
use tracing::{info, instrument};

use crate::db::{classify, StoreError, StoreErrorKind};
use crate::events::{EventPublisher, Topic};
use crate::users::{
    dto::UserPayload,
    errors::{UserError, UserResult},
    password::CredentialHasher,
    repo::UserStore,
    repo_types::{User, EMAIL_UNIQUE_CONSTRAINT},
};

/// Drives every user operation: validate, hash, persist, classify, publish.
///
/// The store write and the bus publish share no transaction. When the write
/// succeeds and the publish fails the row stays changed, no event is sent,
/// and the request fails with [`UserError::Fatal`]. Nothing is rolled back.
#[derive(Clone)]
pub struct UserService {
    store: Arc<dyn UserStore>,
    events: EventPublisher,
    hasher: CredentialHasher,
}

impl UserService {
    pub fn new(store: Arc<dyn UserStore>, events: EventPublisher, hasher: CredentialHasher) -> Self {
        Self {
            store,
            events,
            hasher,
        }
    }

    pub fn events(&self) -> &EventPublisher {
        &self.events
    }

    #[instrument(skip(self, payload))]
    pub async fn create(&self, payload: &UserPayload) -> UserResult<User> {
        let input = payload.decode()?;

        let user = User {
            id: 0,
            password_hash: self.hash(&input.password).await?,
            email: input.email,
            first_name: input.first_name,
            last_name: input.last_name,
            nickname: input.nickname,
            country: input.country,
        };

        let user = self
            .store
            .insert(&user)
            .await
            .map_err(|e| write_error(e, &user.email))?;

        self.publish(Topic::UserCreate, &user).await?;
        info!(user_id = user.id, "user created");
        Ok(user)
    }

    #[instrument(skip(self))]
    pub async fn view(&self, id: &str) -> UserResult<User> {
        let id = parse_id(id)?;
        self.find(id).await?.ok_or(UserError::NotFound)
    }

    /// Lists users by ascending id. An empty country means no filter.
    #[instrument(skip(self))]
    pub async fn index(&self, country: Option<&str>) -> UserResult<Vec<User>> {
        let country = country.filter(|c| !c.is_empty());
        let users = self
            .store
            .find_all(country)
            .await
            .context("list users")?;
        Ok(users)
    }

    /// Existence is checked before the body is decoded: a missing id reports
    /// not-found even when the body is invalid.
    #[instrument(skip(self, payload))]
    pub async fn update(&self, id: &str, payload: &UserPayload) -> UserResult<()> {
        let id = parse_id(id)?;
        let mut user = self.find(id).await?.ok_or(UserError::NotFound)?;

        let input = payload.decode()?;

        user.email = input.email;
        user.first_name = input.first_name;
        user.last_name = input.last_name;
        user.nickname = input.nickname;
        user.country = input.country;
        // always re-hashed, there is no "unchanged password" path
        user.password_hash = self.hash(&input.password).await?;

        self.store.update(&user).await.map_err(|e| match e {
            StoreError::RowNotFound => UserError::NotFound,
            other => write_error(other, &user.email),
        })?;

        self.publish(Topic::UserUpdate, &user).await?;
        info!(user_id = user.id, "user updated");
        Ok(())
    }

    /// Idempotent: deleting an absent user succeeds without publishing.
    #[instrument(skip(self))]
    pub async fn delete(&self, id: &str) -> UserResult<()> {
        let id = parse_id(id)?;
        let Some(user) = self.find(id).await? else {
            return Ok(());
        };

        self.store
            .delete(user.id)
            .await
            .with_context(|| format!("delete user {}", user.id))?;

        self.publish(Topic::UserDelete, &user).await?;
        info!(user_id = user.id, "user deleted");
        Ok(())
    }

    async fn find(&self, id: i64) -> UserResult<Option<User>> {
        let user = self
            .store
            .find_by_id(id)
            .await
            .with_context(|| format!("find user {}", id))?;
        Ok(user)
    }

    /// Argon2 is CPU-bound, so it runs on the blocking pool instead of a
    /// runtime worker.
    async fn hash(&self, password: &str) -> UserResult<String> {
        let hasher = self.hasher.clone();
        let password = password.to_owned();
        // no weak or empty credential is ever stored
        let hash = tokio::task::spawn_blocking(move || hasher.hash(&password))
            .await
            .context("hashing task did not complete")?
            .context("hash password")?;
        Ok(hash)
    }

    async fn publish(&self, topic: Topic, user: &User) -> UserResult<()> {
        self.events
            .publish(topic, user)
            .await
            .with_context(|| format!("user {} persisted but event was not published", user.id))?;
        Ok(())
    }
}

fn parse_id(id: &str) -> UserResult<i64> {
    id.parse::<i64>().map_err(|_| UserError::InvalidId)
}

fn write_error(err: StoreError, email: &str) -> UserError {
    match classify(&err, EMAIL_UNIQUE_CONSTRAINT) {
        StoreErrorKind::DuplicateKey => UserError::DuplicateEmail(email.to_string()),
        StoreErrorKind::Unknown => UserError::Fatal(anyhow::Error::new(err).context("write user")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::testing::RecordingBus;
    use crate::users::dto::UserInput;
    use crate::users::repo::memory::MemoryUserStore;
    use bytes::Bytes;

    struct Harness {
        service: UserService,
        store: Arc<MemoryUserStore>,
        bus: Arc<RecordingBus>,
    }

    fn harness() -> Harness {
        let store = Arc::new(MemoryUserStore::new());
        let bus = Arc::new(RecordingBus::new());
        let service = UserService::new(
            store.clone(),
            EventPublisher::new(bus.clone()),
            CredentialHasher::cheap(),
        );
        Harness {
            service,
            store,
            bus,
        }
    }

    fn input(email: &str, country: &str) -> UserInput {
        UserInput {
            email: email.into(),
            password: "secret".into(),
            first_name: "A".into(),
            last_name: "B".into(),
            nickname: "C".into(),
            country: country.into(),
        }
    }

    fn payload(input: &UserInput) -> UserPayload {
        UserPayload::new(Bytes::from(serde_json::to_vec(input).unwrap()))
    }

    #[tokio::test]
    async fn create_returns_entity_and_publishes() {
        let h = harness();
        let submitted = input("a@x.com", "US");

        let user = h.service.create(&payload(&submitted)).await.expect("create");

        assert_eq!(user.id, 1);
        assert_eq!(user.email, submitted.email);
        assert_eq!(user.first_name, submitted.first_name);
        assert_eq!(user.last_name, submitted.last_name);
        assert_eq!(user.nickname, submitted.nickname);
        assert_eq!(user.country, submitted.country);
        assert_ne!(user.password_hash, submitted.password);
        assert!(CredentialHasher::cheap()
            .verify(&submitted.password, &user.password_hash)
            .unwrap());

        let sent = h.bus.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "user.create");
        assert_eq!(sent[0].1["id"], 1);
        assert!(sent[0].1.get("password_hash").is_none());
    }

    #[tokio::test]
    async fn create_duplicate_email_is_business_error() {
        let h = harness();
        h.service.create(&payload(&input("a@x.com", "US"))).await.unwrap();

        let err = h
            .service
            .create(&payload(&input("a@x.com", "CA")))
            .await
            .unwrap_err();

        assert!(matches!(err, UserError::DuplicateEmail(ref e) if e == "a@x.com"));
        assert_eq!(h.service.view("1").await.unwrap().country, "US");
        assert_eq!(h.bus.topics(), vec!["user.create"]);
    }

    #[tokio::test]
    async fn create_invalid_input_touches_nothing() {
        let h = harness();
        let err = h
            .service
            .create(&payload(&input("nope", "US")))
            .await
            .unwrap_err();
        assert!(matches!(err, UserError::Validation(_)));
        assert_eq!(h.store.len().await, 0);
        assert!(h.bus.sent().is_empty());
    }

    #[tokio::test]
    async fn create_with_store_down_is_fatal() {
        let h = harness();
        h.store.break_connection();
        let err = h
            .service
            .create(&payload(&input("a@x.com", "US")))
            .await
            .unwrap_err();
        assert!(matches!(err, UserError::Fatal(_)));
        assert!(h.bus.sent().is_empty());
    }

    #[tokio::test]
    async fn publish_failure_after_write_is_fatal_and_keeps_row() {
        let h = harness();
        h.bus.fail_sends(true);

        let err = h
            .service
            .create(&payload(&input("a@x.com", "US")))
            .await
            .unwrap_err();

        assert!(matches!(err, UserError::Fatal(_)));
        // the write is not rolled back
        assert_eq!(h.service.view("1").await.unwrap().email, "a@x.com");
    }

    #[tokio::test]
    async fn update_publish_failure_is_fatal_and_keeps_change() {
        let h = harness();
        h.service.create(&payload(&input("a@x.com", "US"))).await.unwrap();
        h.bus.fail_sends(true);

        let err = h
            .service
            .update("1", &payload(&input("a@x.com", "CA")))
            .await
            .unwrap_err();

        assert!(matches!(err, UserError::Fatal(_)));
        assert_eq!(h.service.view("1").await.unwrap().country, "CA");
        assert_eq!(h.bus.topics(), vec!["user.create"]);
    }

    #[tokio::test]
    async fn delete_publish_failure_is_fatal_and_row_stays_gone() {
        let h = harness();
        h.service.create(&payload(&input("a@x.com", "US"))).await.unwrap();
        h.bus.fail_sends(true);

        let err = h.service.delete("1").await.unwrap_err();
        assert!(matches!(err, UserError::Fatal(_)));
        assert!(matches!(h.service.view("1").await, Err(UserError::NotFound)));

        // the row is already gone, so a retry has nothing to announce
        h.bus.fail_sends(false);
        h.service.delete("1").await.expect("retry");
        assert_eq!(h.bus.topics(), vec!["user.create"]);
    }

    #[tokio::test]
    async fn update_with_store_down_is_fatal() {
        let h = harness();
        h.service.create(&payload(&input("a@x.com", "US"))).await.unwrap();
        h.store.break_connection();

        let err = h
            .service
            .update("1", &payload(&input("a@x.com", "CA")))
            .await
            .unwrap_err();

        assert!(matches!(err, UserError::Fatal(_)));
        assert_eq!(h.bus.topics(), vec!["user.create"]);
    }

    #[tokio::test]
    async fn view_malformed_or_missing_is_not_found() {
        let h = harness();
        assert!(matches!(h.service.view("abc").await, Err(UserError::InvalidId)));
        assert!(matches!(h.service.view("").await, Err(UserError::InvalidId)));
        assert!(matches!(h.service.view("42").await, Err(UserError::NotFound)));
    }

    #[tokio::test]
    async fn index_filters_by_country_in_id_order() {
        let h = harness();
        h.service.create(&payload(&input("a@x.com", "RU"))).await.unwrap();
        h.service.create(&payload(&input("b@x.com", "US"))).await.unwrap();
        h.service.create(&payload(&input("c@x.com", "RU"))).await.unwrap();

        let ru = h.service.index(Some("RU")).await.unwrap();
        assert!(ru.iter().all(|u| u.country == "RU"));
        assert_eq!(ru.iter().map(|u| u.id).collect::<Vec<_>>(), vec![1, 3]);

        assert_eq!(h.service.index(None).await.unwrap().len(), 3);
        assert_eq!(h.service.index(Some("")).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn update_overwrites_fields_and_rehashes() {
        let h = harness();
        let created = h.service.create(&payload(&input("a@x.com", "US"))).await.unwrap();

        let mut changed = input("new@x.com", "CA");
        changed.password = "another".into();
        changed.nickname = "D".into();
        h.service.update("1", &payload(&changed)).await.expect("update");

        let user = h.service.view("1").await.unwrap();
        assert_eq!(user.email, "new@x.com");
        assert_eq!(user.country, "CA");
        assert_eq!(user.nickname, "D");
        assert_ne!(user.password_hash, created.password_hash);
        assert!(CredentialHasher::cheap().verify("another", &user.password_hash).unwrap());

        let sent = h.bus.sent();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[1].0, "user.update");
        assert_eq!(sent[1].1["country"], "CA");
    }

    #[tokio::test]
    async fn update_unchanged_password_still_rehashes() {
        let h = harness();
        let submitted = input("a@x.com", "US");
        let created = h.service.create(&payload(&submitted)).await.unwrap();
        h.service.update("1", &payload(&submitted)).await.unwrap();
        let user = h.service.view("1").await.unwrap();
        assert_ne!(user.password_hash, created.password_hash);
    }

    #[tokio::test]
    async fn update_missing_id_wins_over_invalid_body() {
        let h = harness();
        let garbage = UserPayload::new(Bytes::from_static(b"{{{"));
        assert!(matches!(
            h.service.update("9", &garbage).await,
            Err(UserError::NotFound)
        ));
        assert!(matches!(
            h.service.update("x", &garbage).await,
            Err(UserError::InvalidId)
        ));

        h.service.create(&payload(&input("a@x.com", "US"))).await.unwrap();
        assert!(matches!(
            h.service.update("1", &garbage).await,
            Err(UserError::Malformed(_))
        ));
        assert!(matches!(
            h.service.update("1", &payload(&input("a@x.com", "USA"))).await,
            Err(UserError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn update_to_taken_email_is_duplicate() {
        let h = harness();
        h.service.create(&payload(&input("a@x.com", "US"))).await.unwrap();
        h.service.create(&payload(&input("b@x.com", "US"))).await.unwrap();

        let err = h
            .service
            .update("2", &payload(&input("a@x.com", "US")))
            .await
            .unwrap_err();

        assert!(matches!(err, UserError::DuplicateEmail(ref e) if e == "a@x.com"));
        assert_eq!(h.service.view("2").await.unwrap().email, "b@x.com");
        assert_eq!(h.bus.topics(), vec!["user.create", "user.create"]);
    }

    #[tokio::test]
    async fn delete_is_idempotent_and_publishes_once() {
        let h = harness();
        h.service.create(&payload(&input("a@x.com", "US"))).await.unwrap();

        h.service.delete("1").await.expect("first delete");
        h.service.delete("1").await.expect("second delete");
        h.service.delete("77").await.expect("never existed");

        assert!(matches!(h.service.view("1").await, Err(UserError::NotFound)));
        let sent = h.bus.sent();
        assert_eq!(h.bus.topics(), vec!["user.create", "user.delete"]);
        assert_eq!(sent[1].1["email"], "a@x.com");
    }

    #[tokio::test]
    async fn delete_malformed_id_is_not_found() {
        let h = harness();
        assert!(matches!(h.service.delete("one").await, Err(UserError::InvalidId)));
    }

    #[tokio::test]
    async fn recreate_after_delete_gets_new_id() {
        let h = harness();
        h.service.create(&payload(&input("a@x.com", "US"))).await.unwrap();
        h.service.delete("1").await.unwrap();
        let again = h.service.create(&payload(&input("a@x.com", "US"))).await.unwrap();
        assert_eq!(again.id, 2);
    }

    #[tokio::test]
    async fn scenario() {
        let h = harness();
        let a = input("a@x.com", "US");

        let created = h.service.create(&payload(&a)).await.unwrap();
        assert_eq!(created.id, 1);

        assert!(matches!(
            h.service.create(&payload(&a)).await,
            Err(UserError::DuplicateEmail(_))
        ));

        let moved = UserInput {
            country: "CA".into(),
            ..a.clone()
        };
        h.service.update("1", &payload(&moved)).await.unwrap();
        assert_eq!(h.service.view("1").await.unwrap().country, "CA");

        h.service.delete("1").await.unwrap();
        h.service.delete("1").await.unwrap();
        assert!(h.service.view("1").await.unwrap_err().is_not_found());
    }
}
