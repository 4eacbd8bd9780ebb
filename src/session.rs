// Jarvis Engine — Sessions
// A session binds one credential to one provider plus the conversation
// context sent with every request. The manager owns the pool and the
// single active session, and performs the startup walk over credentials.

use std::sync::Arc;

use log::{error, info, warn};

use crate::credentials::{Credential, CredentialPool};
use crate::error::{EngineError, EngineResult};
use crate::provider::{ChunkStream, GenerativeProvider, ProviderError, ProviderFactory};
use crate::types::{seeded_history, ChatTurn, MessagePart};

// ── Session ────────────────────────────────────────────────────────────

/// An established conversation bound to one credential. History starts at
/// the seeded greeting exchange and grows as exchanges complete; nothing
/// carries across credentials on failover.
pub struct ChatSession {
    credential: Credential,
    provider: Arc<dyn GenerativeProvider>,
    history: Vec<ChatTurn>,
}

impl ChatSession {
    pub fn credential(&self) -> &Credential {
        &self.credential
    }

    pub fn history(&self) -> &[ChatTurn] {
        &self.history
    }

    /// Record a completed exchange. Called only after a response arrived in
    /// full — a failed send leaves the history untouched.
    pub fn record_exchange(&mut self, parts: Vec<MessagePart>, reply: &str) {
        self.history.push(ChatTurn::user(parts));
        self.history.push(ChatTurn::model(reply));
    }

    pub async fn send_once(&self, parts: &[MessagePart]) -> Result<String, ProviderError> {
        self.provider.generate(&self.history, parts).await
    }

    pub async fn open_stream(&self, parts: &[MessagePart]) -> Result<ChunkStream, ProviderError> {
        self.provider.generate_stream(&self.history, parts).await
    }
}

/// Try to establish a session on `credential`: create its provider and send
/// a greeting probe. A failed probe disqualifies the credential.
pub async fn initialize_session(
    factory: &dyn ProviderFactory,
    credential: &Credential,
) -> EngineResult<ChatSession> {
    let provider = factory.create(credential);
    let probe = [MessagePart::Text("Hello".into())];
    match provider.generate(&[], &probe).await {
        Ok(_) => Ok(ChatSession {
            credential: credential.clone(),
            provider,
            history: seeded_history(),
        }),
        Err(e) => {
            warn!(
                "[engine] Failed to initialize session with key ending in ...{}: {e}",
                credential.last4()
            );
            Err(EngineError::Initialization(e.to_string()))
        }
    }
}

// ── Manager ────────────────────────────────────────────────────────────

/// Owns the credential pool and the single active session.
pub struct SessionManager {
    pool: CredentialPool,
    factory: Arc<dyn ProviderFactory>,
    active: Option<ChatSession>,
}

impl SessionManager {
    pub fn new(pool: CredentialPool, factory: Arc<dyn ProviderFactory>) -> Self {
        SessionManager { pool, factory, active: None }
    }

    /// Walk the pool in configured order and activate the first credential
    /// that initializes. Each credential is probed at most once.
    pub async fn establish_active_session(&mut self) -> EngineResult<()> {
        let credentials: Vec<Credential> = self.pool.iter().cloned().collect();
        let mut attempts = 0;
        for credential in &credentials {
            attempts += 1;
            if let Ok(session) = initialize_session(self.factory.as_ref(), credential).await {
                info!(
                    "[engine] Session established with key ending in ...{}",
                    credential.last4()
                );
                self.active = Some(session);
                return Ok(());
            }
        }
        error!("[engine] No working credentials after {attempts} attempts");
        Err(EngineError::NoAvailableCredentials { attempts })
    }

    pub fn active(&self) -> Option<&ChatSession> {
        self.active.as_ref()
    }

    pub fn active_mut(&mut self) -> Option<&mut ChatSession> {
        self.active.as_mut()
    }

    /// Replace the active session (successful failover).
    pub fn install(&mut self, session: ChatSession) {
        self.active = Some(session);
    }

    pub fn pool(&self) -> &CredentialPool {
        &self.pool
    }

    pub fn factory(&self) -> &dyn ProviderFactory {
        self.factory.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use async_trait::async_trait;

    struct FakeProvider {
        healthy: bool,
    }

    #[async_trait]
    impl GenerativeProvider for FakeProvider {
        async fn generate(
            &self,
            _history: &[ChatTurn],
            _parts: &[MessagePart],
        ) -> Result<String, ProviderError> {
            if self.healthy {
                Ok("ok".into())
            } else {
                Err(ProviderError::Transport("connection refused".into()))
            }
        }

        async fn generate_stream(
            &self,
            _history: &[ChatTurn],
            _parts: &[MessagePart],
        ) -> Result<ChunkStream, ProviderError> {
            Err(ProviderError::Transport("not used".into()))
        }
    }

    /// Factory whose providers succeed or fail per a scripted sequence,
    /// counting how many were created.
    struct ScriptedFactory {
        script: Mutex<Vec<bool>>,
        created: AtomicUsize,
    }

    impl ScriptedFactory {
        fn new(script: &[bool]) -> Arc<Self> {
            Arc::new(ScriptedFactory {
                script: Mutex::new(script.to_vec()),
                created: AtomicUsize::new(0),
            })
        }

        fn created(&self) -> usize {
            self.created.load(Ordering::SeqCst)
        }
    }

    impl ProviderFactory for ScriptedFactory {
        fn create(&self, _credential: &Credential) -> Arc<dyn GenerativeProvider> {
            let i = self.created.fetch_add(1, Ordering::SeqCst);
            let healthy = self.script.lock().unwrap().get(i).copied().unwrap_or(false);
            Arc::new(FakeProvider { healthy })
        }
    }

    fn pool(keys: &[&str]) -> CredentialPool {
        CredentialPool::from_slots(keys.iter().map(|k| Some(k.to_string())))
    }

    #[tokio::test]
    async fn startup_activates_first_working_credential() {
        let factory = ScriptedFactory::new(&[false, false, true]);
        let mut manager = SessionManager::new(pool(&["k1", "k2", "k3"]), factory.clone());

        manager.establish_active_session().await.unwrap();

        assert_eq!(factory.created(), 3);
        let active = manager.active().unwrap();
        assert_eq!(active.credential().secret(), "k3");
    }

    #[tokio::test]
    async fn startup_probes_each_credential_exactly_once() {
        let factory = ScriptedFactory::new(&[false, false, false]);
        let mut manager = SessionManager::new(pool(&["k1", "k2", "k3"]), factory.clone());

        let err = manager.establish_active_session().await.unwrap_err();

        assert_eq!(factory.created(), 3);
        assert!(matches!(
            err,
            EngineError::NoAvailableCredentials { attempts: 3 }
        ));
        assert!(manager.active().is_none());
    }

    #[tokio::test]
    async fn empty_pool_fails_with_zero_attempts() {
        let factory = ScriptedFactory::new(&[]);
        let mut manager = SessionManager::new(pool(&[]), factory);

        let err = manager.establish_active_session().await.unwrap_err();
        assert!(matches!(
            err,
            EngineError::NoAvailableCredentials { attempts: 0 }
        ));
    }

    #[tokio::test]
    async fn new_session_starts_from_seeded_greeting() {
        let factory = ScriptedFactory::new(&[true]);
        let credential = Credential::new("k1");
        let session = initialize_session(factory.as_ref(), &credential)
            .await
            .unwrap();

        assert_eq!(session.history().len(), 2);
        assert_eq!(session.credential().secret(), "k1");
    }

    #[tokio::test]
    async fn record_exchange_appends_user_and_model_turns() {
        let factory = ScriptedFactory::new(&[true]);
        let credential = Credential::new("k1");
        let mut session = initialize_session(factory.as_ref(), &credential)
            .await
            .unwrap();

        session.record_exchange(vec![MessagePart::Text("question".into())], "answer");

        let history = session.history();
        assert_eq!(history.len(), 4);
        assert_eq!(history[2].role, crate::types::TurnRole::User);
        assert_eq!(history[3].role, crate::types::TurnRole::Model);
    }
}
