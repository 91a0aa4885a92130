use crate::{
    endpoints::ApiError,
    storage::{Storage, StorageError, ADMIN_USER, AUTH_TOKEN, ORG_BRAND},
    Brand, Credentials, User,
};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use std::{
    fmt::{self, Debug, Formatter},
    sync::Arc,
};

/// The logged in user, their organization's brand, and the token used to
/// talk to the server.
///
/// There should only be one of these per process. Share it with an `Arc`,
/// the operations on this type are the only way session state gets written.
///
/// Anything which writes to storage also holds a writer lock until memory
/// has caught up, so a [`Storage`] must never call back into the session.
pub struct SessionStore {
    storage: Arc<dyn Storage>,
    writer: Mutex<()>,
    state: Mutex<State>,
}

#[derive(Debug)]
struct State {
    token: Option<String>,
    user: Option<User>,
    brand: Option<Brand>,
    loading: bool,
    /// Incremented every time the logged in identity changes.
    epoch: u64,
    brand_fetch_due: bool,
}

impl SessionStore {
    /// Create an empty session which is still loading.
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        SessionStore {
            storage,
            writer: Mutex::new(()),
            state: Mutex::new(State {
                token: None,
                user: None,
                brand: None,
                loading: true,
                epoch: 0,
                brand_fetch_due: false,
            }),
        }
    }

    /// Restore the previous session from storage.
    ///
    /// Anything missing or unreadable is treated as absent, and a token
    /// without a user (or a user without a token) is thrown away. Loading is
    /// finished afterwards no matter what was found.
    pub fn boot(&self) {
        let _writing = self.writer.lock();

        let token = match self.storage.get(AUTH_TOKEN) {
            Ok(token) => token,
            Err(e) => {
                log::warn!("Unable to read the stored token: {}", e);
                None
            },
        };
        let user: Option<User> = self.hydrate(ADMIN_USER);
        let brand: Option<Brand> = self.hydrate(ORG_BRAND);

        let (token, user) = match (token, user) {
            (Some(token), Some(user)) => {
                log::info!("Restored the session for {}", describe(&user));
                (Some(token), Some(user))
            },
            (None, None) => (None, None),
            (token, user) => {
                log::warn!(
                    "Discarding a partial session (token: {}, user: {})",
                    token.is_some(),
                    user.is_some()
                );
                let _ = self.remove_all(&[AUTH_TOKEN, ADMIN_USER]);
                (None, None)
            },
        };

        let mut state = self.state.lock();
        state.brand_fetch_due = user.is_some();
        state.token = token;
        state.user = user;
        state.brand = brand;
        state.loading = false;
    }

    fn hydrate<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = match self.storage.get(key) {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                log::warn!("Unable to read \"{}\" from storage: {}", key, e);
                return None;
            },
        };

        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                log::warn!("Ignoring the malformed \"{}\" entry: {}", key, e);
                None
            },
        }
    }

    /// Remove every key, carrying on past failures. The first error is
    /// returned.
    fn remove_all(&self, keys: &[&str]) -> Result<(), StorageError> {
        let mut outcome = Ok(());

        for key in keys {
            if let Err(e) = self.storage.remove(key) {
                log::warn!("Unable to remove \"{}\" from storage: {}", key, e);
                if outcome.is_ok() {
                    outcome = Err(e);
                }
            }
        }

        outcome
    }

    /// Start a new session.
    ///
    /// The caller is expected to have already authenticated with the server.
    /// If storage can't be written the in-memory session is left untouched.
    pub fn login(&self, credentials: Credentials) -> Result<(), StorageError> {
        let Credentials { token, user, brand } = credentials;

        let user_json = serde_json::to_string(&user)?;
        let brand_json = brand.as_ref().map(serde_json::to_string).transpose()?;

        let _writing = self.writer.lock();

        let mut written = Vec::new();
        let mut persist = |key: &'static str, value: &str| {
            let result = self.storage.set(key, value);
            if result.is_ok() {
                written.push(key);
            }
            result
        };

        let result = persist(AUTH_TOKEN, &token)
            .and_then(|_| persist(ADMIN_USER, &user_json))
            .and_then(|_| match brand_json {
                Some(ref json) => persist(ORG_BRAND, json),
                None => Ok(()),
            });

        if let Err(e) = result {
            // don't leave half a session behind
            let _ = self.remove_all(&written);
            return Err(e);
        }

        log::info!("Logged in as {}", describe(&user));

        let mut state = self.state.lock();
        state.token = Some(token);
        state.user = Some(user);
        if brand.is_some() {
            state.brand = brand;
        }
        state.epoch += 1;
        state.brand_fetch_due = true;

        Ok(())
    }

    /// Replace the organization's brand.
    pub fn update_brand(&self, brand: Brand) -> Result<(), StorageError> {
        let _writing = self.writer.lock();
        self.store_brand(brand)
    }

    /// Only call this while holding the writer lock.
    fn store_brand(&self, brand: Brand) -> Result<(), StorageError> {
        let json = serde_json::to_string(&brand)?;
        self.storage.set(ORG_BRAND, &json)?;

        log::debug!("Brand updated to {:?}", brand.brand_name);
        self.state.lock().brand = Some(brand);

        Ok(())
    }

    /// Forget the current session, both in memory and in storage.
    ///
    /// Logging out twice is the same as logging out once.
    pub fn logout(&self) -> Result<(), StorageError> {
        let _writing = self.writer.lock();

        {
            let mut state = self.state.lock();
            if let Some(ref user) = state.user {
                log::info!("Logging out {}", describe(user));
            }

            state.token = None;
            state.user = None;
            state.brand = None;
            state.epoch += 1;
            state.brand_fetch_due = false;
        }

        self.remove_all(&[AUTH_TOKEN, ADMIN_USER, ORG_BRAND])
    }

    pub fn token(&self) -> Option<String> { self.state.lock().token.clone() }

    pub fn user(&self) -> Option<User> { self.state.lock().user.clone() }

    pub fn brand(&self) -> Option<Brand> { self.state.lock().brand.clone() }

    /// Is the session still being restored from storage?
    pub fn is_loading(&self) -> bool { self.state.lock().loading }

    pub fn is_authenticated(&self) -> bool { self.state.lock().user.is_some() }

    /// Claim the brand fetch scheduled by the last login (or boot).
    ///
    /// Returns `None` when there is nothing to fetch.
    pub fn take_brand_fetch(&self) -> Option<BrandTicket> {
        let mut state = self.state.lock();

        if !state.brand_fetch_due || state.user.is_none() {
            return None;
        }

        state.brand_fetch_due = false;
        Some(BrandTicket { epoch: state.epoch })
    }

    /// Apply the result of a brand fetch.
    ///
    /// Results for a session which has since been logged out (or replaced by
    /// another login) are thrown away. Failures are logged and otherwise
    /// ignored.
    pub fn finish_brand_fetch(
        &self,
        ticket: BrandTicket,
        result: Result<Option<Brand>, ApiError>,
    ) -> BrandSync {
        // nobody else may change the identity until the brand is stored
        let _writing = self.writer.lock();

        let current = self.state.lock().epoch;
        if current != ticket.epoch {
            log::debug!(
                "Discarding a brand fetch from session {} (now on {})",
                ticket.epoch,
                current
            );
            return BrandSync::Stale;
        }

        match result {
            Ok(Some(brand)) => match self.store_brand(brand) {
                Ok(()) => BrandSync::Applied,
                Err(e) => {
                    log::warn!("Unable to save the fetched brand: {}", e);
                    BrandSync::Failed(FailureKind::Storage)
                },
            },
            Ok(None) => {
                log::debug!("The server has no brand for this organization");
                BrandSync::Empty
            },
            Err(e) => {
                let kind = e.kind();
                log::warn!("Organization fetch failed ({:?}): {}", kind, e);
                BrandSync::Failed(kind)
            },
        }
    }
}

impl Debug for SessionStore {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();

        f.debug_struct("SessionStore")
            .field("user", &state.user)
            .field("brand", &state.brand)
            .field("loading", &state.loading)
            .field("has_token", &state.token.is_some())
            .finish()
    }
}

fn describe(user: &User) -> &str {
    user.email
        .as_deref()
        .or_else(|| user.name.as_deref())
        .unwrap_or("<unnamed user>")
}

/// Permission to run one brand fetch, tagged with the session it was issued
/// for.
#[derive(Debug, PartialEq, Eq)]
#[must_use = "the brand fetch should be finished with SessionStore::finish_brand_fetch()"]
pub struct BrandTicket {
    epoch: u64,
}

/// What happened to a background brand fetch.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum BrandSync {
    /// There was no fetch to run.
    Idle,
    Applied,
    /// The server had no brand to give us.
    Empty,
    /// The session changed while the request was in flight.
    Stale,
    Failed(FailureKind),
}

/// Broad categories of failure, for reporting.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// The request never got a response.
    Network,
    /// The server rejected our credentials.
    Unauthorized,
    /// The server responded with an error.
    Server,
    /// The response wasn't what we expected.
    Parse,
    /// Local storage couldn't be read or written.
    Storage,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryStorage;
    use serde_json::json;
    use std::{
        io,
        sync::mpsc::{self, Receiver, Sender},
        thread,
        time::Duration,
    };

    /// Refuses to write or remove particular keys.
    #[derive(Debug, Default)]
    struct FailingStorage {
        inner: MemoryStorage,
        failing_sets: Vec<&'static str>,
        failing_removes: Vec<&'static str>,
    }

    impl FailingStorage {
        fn error(key: &str) -> StorageError {
            StorageError::Io {
                path: "session.json".into(),
                source: io::Error::new(
                    io::ErrorKind::Other,
                    format!("no room for {}", key),
                ),
            }
        }
    }

    impl Storage for FailingStorage {
        fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
            self.inner.get(key)
        }

        fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
            if self.failing_sets.contains(&key) {
                return Err(FailingStorage::error(key));
            }
            self.inner.set(key, value)
        }

        fn remove(&self, key: &str) -> Result<(), StorageError> {
            if self.failing_removes.contains(&key) {
                return Err(FailingStorage::error(key));
            }
            self.inner.remove(key)
        }
    }

    /// Pauses the first write to one key until the test says to carry on.
    struct StallingStorage {
        inner: MemoryStorage,
        key: &'static str,
        entered: Mutex<Option<Sender<()>>>,
        release: Mutex<Receiver<()>>,
    }

    impl StallingStorage {
        fn new(key: &'static str) -> (Arc<Self>, Receiver<()>, Sender<()>) {
            let (entered_tx, entered_rx) = mpsc::channel();
            let (release_tx, release_rx) = mpsc::channel();
            let storage = StallingStorage {
                inner: MemoryStorage::new(),
                key,
                entered: Mutex::new(Some(entered_tx)),
                release: Mutex::new(release_rx),
            };

            (Arc::new(storage), entered_rx, release_tx)
        }
    }

    impl Storage for StallingStorage {
        fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
            self.inner.get(key)
        }

        fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
            if key == self.key {
                if let Some(entered) = self.entered.lock().take() {
                    entered.send(()).unwrap();
                    let release = self.release.lock();
                    let _ = release.recv_timeout(Duration::from_secs(5));
                }
            }
            self.inner.set(key, value)
        }

        fn remove(&self, key: &str) -> Result<(), StorageError> {
            self.inner.remove(key)
        }
    }

    fn booted() -> (Arc<MemoryStorage>, SessionStore) {
        let storage = Arc::new(MemoryStorage::new());
        let session = SessionStore::new(storage.clone());
        session.boot();

        (storage, session)
    }

    fn employer() -> User {
        serde_json::from_value(json!({ "id": 1, "role": "employeer" }))
            .unwrap()
    }

    fn brand(value: serde_json::Value) -> Brand {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn booting_with_nothing_stored() {
        let storage = Arc::new(MemoryStorage::new());
        let session = SessionStore::new(storage);
        assert!(session.is_loading());

        session.boot();

        assert!(!session.is_loading());
        assert_eq!(session.user(), None);
        assert_eq!(session.brand(), None);
        assert!(!session.is_authenticated());
        assert_eq!(session.take_brand_fetch(), None);
    }

    #[test]
    fn booting_restores_the_stored_session() {
        let user = employer();
        let brand = brand(json!({ "brand_name": "A", "logo": "x" }));
        let storage = Arc::new(MemoryStorage::new());
        storage.set(AUTH_TOKEN, "t1").unwrap();
        storage
            .set(ADMIN_USER, &serde_json::to_string(&user).unwrap())
            .unwrap();
        storage
            .set(ORG_BRAND, &serde_json::to_string(&brand).unwrap())
            .unwrap();
        let session = SessionStore::new(storage);

        session.boot();

        assert_eq!(session.user(), Some(user));
        assert_eq!(session.brand(), Some(brand));
        assert_eq!(session.token().as_deref(), Some("t1"));
        assert!(session.take_brand_fetch().is_some());
    }

    #[test]
    fn booting_with_a_user_but_no_token() {
        let storage = Arc::new(MemoryStorage::new());
        storage
            .set(ADMIN_USER, &serde_json::to_string(&employer()).unwrap())
            .unwrap();
        let session = SessionStore::new(storage.clone());

        session.boot();

        assert!(!session.is_loading());
        assert!(!session.is_authenticated());
        assert_eq!(session.token(), None);
        assert_eq!(session.take_brand_fetch(), None);
        assert_eq!(storage.get(ADMIN_USER).unwrap(), None);
    }

    #[test]
    fn booting_with_a_token_but_no_user() {
        let storage = Arc::new(MemoryStorage::new());
        storage.set(AUTH_TOKEN, "t1").unwrap();
        storage.set(ADMIN_USER, "{ definitely not json").unwrap();
        storage
            .set(ORG_BRAND, &serde_json::to_string(&Brand::named("A")).unwrap())
            .unwrap();
        let session = SessionStore::new(storage.clone());

        session.boot();

        assert!(!session.is_authenticated());
        assert_eq!(session.token(), None);
        assert_eq!(session.brand(), Some(Brand::named("A")));
        assert_eq!(session.take_brand_fetch(), None);
        assert_eq!(storage.get(AUTH_TOKEN).unwrap(), None);
        assert_eq!(storage.get(ADMIN_USER).unwrap(), None);
    }

    #[test]
    fn malformed_stored_values_are_ignored() {
        let storage = Arc::new(MemoryStorage::new());
        storage.set(ADMIN_USER, "{ definitely not json").unwrap();
        storage.set(ORG_BRAND, "[1, 2, 3]").unwrap();
        let session = SessionStore::new(storage);

        session.boot();

        assert!(!session.is_loading());
        assert_eq!(session.user(), None);
        assert_eq!(session.brand(), None);
    }

    #[test]
    fn login_sets_and_persists() {
        let (storage, session) = booted();

        session.login(Credentials::new("t1", employer())).unwrap();

        assert!(session.is_authenticated());
        assert_eq!(storage.get(AUTH_TOKEN).unwrap().as_deref(), Some("t1"));
        assert!(storage.get(ADMIN_USER).unwrap().is_some());
        assert_eq!(storage.get(ORG_BRAND).unwrap(), None);
        assert_eq!(session.brand(), None);
    }

    #[test]
    fn a_failed_login_rolls_back_what_it_wrote() {
        let storage = Arc::new(FailingStorage {
            failing_sets: vec![ORG_BRAND],
            ..Default::default()
        });
        let session = SessionStore::new(storage.clone());
        session.boot();

        let got = session.login(
            Credentials::new("t1", employer()).with_brand(Brand::named("A")),
        );

        assert!(matches!(got, Err(StorageError::Io { .. })));
        assert!(!session.is_authenticated());
        assert_eq!(session.token(), None);
        assert_eq!(session.brand(), None);
        assert_eq!(session.take_brand_fetch(), None);
        assert!(storage.inner.is_empty());
    }

    #[test]
    fn login_without_a_brand_keeps_the_current_one() {
        let (_, session) = booted();
        session.update_brand(Brand::named("A")).unwrap();

        session.login(Credentials::new("t1", employer())).unwrap();

        assert_eq!(session.brand(), Some(Brand::named("A")));
    }

    #[test]
    fn login_with_a_brand_persists_it() {
        let (storage, session) = booted();

        session
            .login(Credentials::new("t1", employer()).with_brand(Brand::named("A")))
            .unwrap();

        assert_eq!(session.brand(), Some(Brand::named("A")));
        assert_eq!(
            storage.get(ORG_BRAND).unwrap().as_deref(),
            Some(r#"{"brand_name":"A"}"#)
        );
    }

    #[test]
    fn logout_clears_everything() {
        let (storage, session) = booted();
        session
            .login(Credentials::new("t1", employer()).with_brand(Brand::named("A")))
            .unwrap();

        session.logout().unwrap();

        assert_eq!(session.user(), None);
        assert_eq!(session.brand(), None);
        assert_eq!(session.token(), None);
        for key in &[AUTH_TOKEN, ADMIN_USER, ORG_BRAND] {
            assert_eq!(storage.get(key).unwrap(), None);
        }
        assert!(storage.is_empty());
    }

    #[test]
    fn logging_out_twice_is_harmless() {
        let (storage, session) = booted();
        session.login(Credentials::new("t1", employer())).unwrap();

        session.logout().unwrap();
        session.logout().unwrap();

        assert!(!session.is_authenticated());
        assert_eq!(session.brand(), None);
        assert!(storage.is_empty());
    }

    #[test]
    fn logout_clears_memory_even_if_storage_fails() {
        let storage = Arc::new(FailingStorage {
            failing_removes: vec![AUTH_TOKEN],
            ..Default::default()
        });
        let session = SessionStore::new(storage.clone());
        session.boot();
        session
            .login(Credentials::new("t1", employer()).with_brand(Brand::named("A")))
            .unwrap();

        let got = session.logout();

        assert!(matches!(got, Err(StorageError::Io { .. })));
        assert!(!session.is_authenticated());
        assert_eq!(session.token(), None);
        assert_eq!(session.brand(), None);
        assert_eq!(session.take_brand_fetch(), None);
        // the other keys are still removed
        assert_eq!(storage.get(ADMIN_USER).unwrap(), None);
        assert_eq!(storage.get(ORG_BRAND).unwrap(), None);
    }

    #[test]
    fn update_brand_replaces_rather_than_merges() {
        let (storage, session) = booted();
        session
            .update_brand(brand(json!({ "brand_name": "A", "logo": "x" })))
            .unwrap();

        session.update_brand(brand(json!({ "brand_name": "B" }))).unwrap();

        let got = session.brand().unwrap();
        assert_eq!(got, Brand::named("B"));
        assert_eq!(got.logo, None);
        assert_eq!(
            storage.get(ORG_BRAND).unwrap().as_deref(),
            Some(r#"{"brand_name":"B"}"#)
        );
    }

    #[test]
    fn a_fetched_brand_is_applied() {
        let (_, session) = booted();
        session.login(Credentials::new("t1", employer())).unwrap();
        let ticket = session.take_brand_fetch().unwrap();

        let outcome =
            session.finish_brand_fetch(ticket, Ok(Some(Brand::named("A"))));

        assert_eq!(outcome, BrandSync::Applied);
        assert_eq!(session.brand(), Some(Brand::named("A")));
        assert_eq!(session.take_brand_fetch(), None);
    }

    #[test]
    fn a_brand_fetched_after_logout_is_discarded() {
        let (storage, session) = booted();
        session.login(Credentials::new("t1", employer())).unwrap();
        let ticket = session.take_brand_fetch().unwrap();

        session.logout().unwrap();
        let outcome =
            session.finish_brand_fetch(ticket, Ok(Some(Brand::named("A"))));

        assert_eq!(outcome, BrandSync::Stale);
        assert_eq!(session.brand(), None);
        assert_eq!(storage.get(ORG_BRAND).unwrap(), None);
    }

    #[test]
    fn a_logout_while_the_fetched_brand_is_saved_still_wins() {
        let (storage, entered, release) = StallingStorage::new(ORG_BRAND);
        let session = Arc::new(SessionStore::new(storage.clone()));
        session.boot();
        session.login(Credentials::new("t1", employer())).unwrap();
        let ticket = session.take_brand_fetch().unwrap();

        let fetch = {
            let session = Arc::clone(&session);
            thread::spawn(move || {
                session.finish_brand_fetch(ticket, Ok(Some(Brand::named("A"))))
            })
        };
        entered.recv().unwrap();
        let logout = {
            let session = Arc::clone(&session);
            thread::spawn(move || session.logout())
        };
        thread::sleep(Duration::from_millis(50));
        release.send(()).unwrap();

        assert_eq!(fetch.join().unwrap(), BrandSync::Applied);
        logout.join().unwrap().unwrap();
        assert!(!session.is_authenticated());
        assert_eq!(session.brand(), None);
        assert_eq!(storage.get(ORG_BRAND).unwrap(), None);
    }

    #[test]
    fn a_logout_during_login_leaves_nothing_behind() {
        let (storage, entered, release) = StallingStorage::new(ADMIN_USER);
        let session = Arc::new(SessionStore::new(storage.clone()));
        session.boot();

        let login = {
            let session = Arc::clone(&session);
            thread::spawn(move || {
                session.login(Credentials::new("t1", employer()))
            })
        };
        entered.recv().unwrap();
        let logout = {
            let session = Arc::clone(&session);
            thread::spawn(move || session.logout())
        };
        thread::sleep(Duration::from_millis(50));
        release.send(()).unwrap();

        login.join().unwrap().unwrap();
        logout.join().unwrap().unwrap();
        assert!(!session.is_authenticated());
        assert_eq!(session.token(), None);
        assert_eq!(storage.get(AUTH_TOKEN).unwrap(), None);
        assert_eq!(storage.get(ADMIN_USER).unwrap(), None);
    }

    #[test]
    fn a_brand_fetched_for_a_previous_login_is_discarded() {
        let (_, session) = booted();
        session.login(Credentials::new("t1", employer())).unwrap();
        let ticket = session.take_brand_fetch().unwrap();

        session.login(Credentials::new("t2", employer())).unwrap();
        let outcome =
            session.finish_brand_fetch(ticket, Ok(Some(Brand::named("A"))));

        assert_eq!(outcome, BrandSync::Stale);
        assert_eq!(session.brand(), None);
        assert!(session.take_brand_fetch().is_some());
    }

    #[test]
    fn failed_fetches_leave_the_session_alone() {
        let (_, session) = booted();
        session
            .login(Credentials::new("t1", employer()).with_brand(Brand::named("A")))
            .unwrap();
        let ticket = session.take_brand_fetch().unwrap();
        let err = ApiError::Server {
            status: 500,
            message: None,
        };

        let outcome = session.finish_brand_fetch(ticket, Err(err));

        assert_eq!(outcome, BrandSync::Failed(FailureKind::Server));
        assert_eq!(session.brand(), Some(Brand::named("A")));
        assert!(session.is_authenticated());
    }

    #[test]
    fn nothing_to_fetch_after_logout() {
        let (_, session) = booted();
        session.login(Credentials::new("t1", employer())).unwrap();

        session.logout().unwrap();

        assert_eq!(session.take_brand_fetch(), None);
    }
}
