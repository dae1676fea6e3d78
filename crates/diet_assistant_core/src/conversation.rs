//! crates/diet_assistant_core/src/conversation.rs
//!
//! The explicit context object for one active chat: who is talking, in which
//! session, and the structured turns seen so far. Handlers own one of these per
//! connection instead of sharing ambient global state.

use tracing::debug;
use uuid::Uuid;

use crate::domain::{Part, Role, StoredTurn, Turn};
use crate::ports::{MessageStore, PortResult, SessionStore};

#[derive(Debug, Clone)]
pub struct Conversation {
    user_id: Uuid,
    session_id: Uuid,
    turns: Vec<Turn>,
}

impl Conversation {
    /// An empty conversation for a freshly created session.
    pub fn new(user_id: Uuid, session_id: Uuid) -> Self {
        Self {
            user_id,
            session_id,
            turns: Vec::new(),
        }
    }

    /// Rebuilds the in-memory view from persisted turns. Each stored turn
    /// becomes a single text part; image parts come back as their placeholder.
    pub fn from_history(user_id: Uuid, session_id: Uuid, history: Vec<StoredTurn>) -> Self {
        let turns = history
            .into_iter()
            .map(|stored| Turn::new(stored.role, vec![Part::text(stored.text)]))
            .collect();
        Self {
            user_id,
            session_id,
            turns,
        }
    }

    pub async fn load(
        messages: &dyn MessageStore,
        user_id: Uuid,
        session_id: Uuid,
    ) -> PortResult<Self> {
        let history = messages.history(session_id).await?;
        debug!("Loaded {} turns for session {}", history.len(), session_id);
        Ok(Self::from_history(user_id, session_id, history))
    }

    pub fn user_id(&self) -> Uuid {
        self.user_id
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    /// Brings the in-memory turns in line with the store, which another
    /// client may have reset or extended. While memory still mirrors the
    /// stored transcript it is kept, so earlier images stay attached.
    pub async fn refresh(&mut self, messages: &dyn MessageStore) -> PortResult<()> {
        let history = messages.history(self.session_id).await?;
        let in_sync = history.len() == self.turns.len()
            && history
                .iter()
                .zip(&self.turns)
                .all(|(stored, turn)| stored.role == turn.role && stored.text == turn.flatten());
        if !in_sync {
            debug!(
                "Session {} changed in the store; reloading {} turns",
                self.session_id,
                history.len()
            );
            *self = Self::from_history(self.user_id, self.session_id, history);
        }
        Ok(())
    }

    /// Persists the flattened user turn, then adds the structured one.
    pub async fn record_user_turn(
        &mut self,
        messages: &dyn MessageStore,
        parts: Vec<Part>,
    ) -> PortResult<()> {
        self.record(messages, Turn::new(Role::User, parts)).await
    }

    pub(crate) async fn record(&mut self, messages: &dyn MessageStore, turn: Turn) -> PortResult<()> {
        messages
            .append(self.session_id, self.user_id, turn.role, &turn.flatten())
            .await?;
        self.turns.push(turn);
        Ok(())
    }

    /// "Reset conversation": purges the session's stored turns and the
    /// in-memory view. The session itself survives.
    pub async fn reset(&mut self, sessions: &dyn SessionStore) -> PortResult<()> {
        sessions.delete_all_turns(self.session_id).await?;
        self.turns.clear();
        Ok(())
    }

    /// "New chat": point at another (empty) session.
    pub fn switch_to(&mut self, session_id: Uuid) {
        self.session_id = session_id;
        self.turns.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::IMAGE_PLACEHOLDER;
    use crate::test_support::{InMemoryStore, TINY_PNG_URI};

    #[tokio::test]
    async fn user_turn_is_persisted_flattened_but_kept_structured() {
        let store = InMemoryStore::default();
        let mut conversation = Conversation::new(Uuid::new_v4(), Uuid::new_v4());

        conversation
            .record_user_turn(
                &store,
                vec![Part::image(TINY_PNG_URI), Part::text("how many calories?")],
            )
            .await
            .unwrap();

        let stored = store.history(conversation.session_id()).await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].role, Role::User);
        assert_eq!(stored[0].text, format!("{}\nhow many calories?", IMAGE_PLACEHOLDER));

        assert_eq!(conversation.turns().len(), 1);
        assert_eq!(conversation.turns()[0].parts[0], Part::image(TINY_PNG_URI));
    }

    #[tokio::test]
    async fn load_replays_history_as_text_turns() {
        let store = InMemoryStore::default();
        let (user_id, session_id) = (Uuid::new_v4(), Uuid::new_v4());
        store.append(session_id, user_id, Role::User, "hi").await.unwrap();
        store.append(session_id, user_id, Role::Assistant, "hello").await.unwrap();

        let conversation = Conversation::load(&store, user_id, session_id).await.unwrap();

        assert_eq!(
            conversation.turns(),
            &[Turn::user_text("hi"), Turn::assistant_text("hello")]
        );
    }

    #[tokio::test]
    async fn reset_purges_store_and_memory() {
        let store = InMemoryStore::default();
        let mut conversation = Conversation::new(Uuid::new_v4(), Uuid::new_v4());
        conversation
            .record_user_turn(&store, vec![Part::text("hi")])
            .await
            .unwrap();

        conversation.reset(&store).await.unwrap();

        assert!(conversation.turns().is_empty());
        assert!(store.history(conversation.session_id()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn refresh_drops_turns_purged_elsewhere() {
        let store = InMemoryStore::default();
        let mut conversation = Conversation::new(Uuid::new_v4(), Uuid::new_v4());
        conversation
            .record_user_turn(&store, vec![Part::text("old question")])
            .await
            .unwrap();

        store.delete_all_turns(conversation.session_id()).await.unwrap();
        conversation.refresh(&store).await.unwrap();

        assert!(conversation.turns().is_empty());
    }

    #[tokio::test]
    async fn refresh_keeps_images_while_in_sync() {
        let store = InMemoryStore::default();
        let mut conversation = Conversation::new(Uuid::new_v4(), Uuid::new_v4());
        conversation
            .record_user_turn(&store, vec![Part::image(TINY_PNG_URI), Part::text("and this?")])
            .await
            .unwrap();

        conversation.refresh(&store).await.unwrap();
        assert_eq!(conversation.turns()[0].parts[0], Part::image(TINY_PNG_URI));

        store
            .append(conversation.session_id(), conversation.user_id(), Role::Assistant, "a salad")
            .await
            .unwrap();
        conversation.refresh(&store).await.unwrap();
        assert_eq!(conversation.turns().len(), 2);
        assert_eq!(conversation.turns()[1], Turn::assistant_text("a salad"));
    }

    #[test]
    fn switch_to_starts_empty() {
        let mut conversation = Conversation::from_history(
            Uuid::new_v4(),
            Uuid::new_v4(),
            vec![StoredTurn {
                role: Role::User,
                text: "old".to_string(),
                created_at: chrono::Utc::now(),
            }],
        );
        let next = Uuid::new_v4();

        conversation.switch_to(next);

        assert_eq!(conversation.session_id(), next);
        assert!(conversation.turns().is_empty());
    }
}
