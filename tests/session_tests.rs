//! Integration tests for the chat session lifecycle
//!
//! Drives a `ChatController` over an in-memory store with a backend whose
//! replies are scripted through channels.

use async_trait::async_trait;
use futures::StreamExt;
use futures::channel::mpsc::{UnboundedReceiver, UnboundedSender, unbounded};
use querypal::backend::{AssistantChunk, BackendError, ChatBackend, ChunkStream};
use querypal::config::ChatConfig;
use querypal::controller::{ChatController, TurnOutcome};
use querypal::session::{ChatSession, Phase, Snapshot};
use querypal::storage::{DurableStore, MemoryStore};
use querypal::types::{Message, MessageId, MessagePart, Role, TransportStatus};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

const KEY: &str = "chat-messages";

type Script = UnboundedSender<Result<AssistantChunk, BackendError>>;

/// Each `stream` call takes the next scripted reply in order.
#[derive(Default)]
struct ScriptedBackend {
    replies: Mutex<VecDeque<UnboundedReceiver<Result<AssistantChunk, BackendError>>>>,
}

impl ScriptedBackend {
    fn script(&self) -> Script {
        let (tx, rx) = unbounded();
        self.replies.lock().unwrap().push_back(rx);
        tx
    }

    /// A reply that is complete before the turn starts.
    fn reply(&self, chunks: Vec<AssistantChunk>) {
        let tx = self.script();
        for chunk in chunks {
            tx.unbounded_send(Ok(chunk)).expect("receiver alive");
        }
    }
}

#[async_trait]
impl ChatBackend for ScriptedBackend {
    async fn stream(&self, _messages: &[Message]) -> Result<ChunkStream, BackendError> {
        let next = self.replies.lock().unwrap().pop_front();
        match next {
            Some(rx) => Ok(rx.boxed()),
            None => Err(BackendError::NotConfigured),
        }
    }
}

fn harness(store: &MemoryStore) -> (ChatController<MemoryStore>, Arc<ScriptedBackend>) {
    let backend = Arc::new(ScriptedBackend::default());
    let session = ChatSession::new(store.clone(), &ChatConfig::default());
    (ChatController::new(session, backend.clone()), backend)
}

fn stored(store: &MemoryStore) -> Snapshot {
    Snapshot::decode(store.get(KEY).expect("store readable").as_deref())
}

fn answer(id: &str, text: &str) -> Vec<AssistantChunk> {
    vec![
        AssistantChunk::Start {
            message_id: Some(id.into()),
        },
        AssistantChunk::TextDelta(text.to_string()),
        AssistantChunk::Finish,
    ]
}

/// Yield until `condition` holds, letting a concurrently joined turn run.
async fn settle(condition: impl Fn() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::task::yield_now().await;
    }
    panic!("condition never held");
}

mod hydration_tests {
    use super::*;

    #[test]
    fn test_hydrate_runs_once() {
        let store = MemoryStore::new();
        let (controller, _) = harness(&store);
        assert_eq!(controller.view().phase, Phase::Uninitialized);

        assert!(controller.hydrate());
        let first = controller.view();
        assert!(!controller.hydrate());
        assert_eq!(controller.view(), first);
        assert_eq!(first.phase, Phase::Active);
    }

    #[test]
    fn test_greeting_inserted_once_across_reloads() {
        let store = MemoryStore::new();
        let (first, _) = harness(&store);
        first.hydrate();
        let greeting = first.view().messages;
        assert_eq!(greeting.len(), 1);
        assert_eq!(greeting[0].role, Role::Assistant);
        assert!(greeting[0].id.as_str().starts_with("welcome-"));

        // A reload reads the stored greeting back instead of adding another.
        let (second, _) = harness(&store);
        second.hydrate();
        assert_eq!(second.view().messages, greeting);
        assert_eq!(stored(&store).messages, greeting);
    }

    #[test]
    fn test_stored_session_is_restored_as_is() {
        let store = MemoryStore::new();
        store.seed(
            KEY,
            r#"{
                "messages": [
                    {"id":"u1","role":"user","parts":[{"type":"text","text":"top customers?"}]},
                    {"id":"a1","role":"assistant","parts":[
                        {"type":"step-start"},
                        {"type":"text","text":"Alice, Bob","state":"done"}
                    ]}
                ],
                "durations": {"a1": 1520.5}
            }"#,
        );
        let (controller, _) = harness(&store);
        controller.hydrate();

        let view = controller.view();
        assert_eq!(view.messages.len(), 2);
        assert_eq!(view.messages[1].text(), "Alice, Bob");
        assert_eq!(view.messages[1].parts[0].kind(), "step-start");
        assert_eq!(view.durations.get(&MessageId::from("a1")), Some(1520.5));
    }

    #[test]
    fn test_unreadable_snapshot_starts_fresh() {
        let store = MemoryStore::new();
        store.seed(KEY, "not json");
        let (controller, _) = harness(&store);
        controller.hydrate();

        let view = controller.view();
        assert_eq!(view.messages.len(), 1);
        assert!(view.durations.is_empty());
        assert_eq!(stored(&store).messages, view.messages);
    }

    #[test]
    fn test_provider_fields_survive_a_resave() {
        let store = MemoryStore::new();
        store.seed(
            KEY,
            r#"{"messages":[{"id":"a1","role":"assistant","parts":[
                {"type":"text","text":"hi","providerMetadata":{"openai":{"itemId":"msg_1"}}}
            ]}],"durations":{}}"#,
        );
        let (controller, _) = harness(&store);
        controller.hydrate();
        controller
            .record_duration(MessageId::from("a1"), 10.0)
            .expect("known message");

        let raw = store.get(KEY).expect("store readable").expect("snapshot saved");
        let saved: serde_json::Value = serde_json::from_str(&raw).expect("valid json");
        assert_eq!(
            saved["messages"][0]["parts"][0]["providerMetadata"]["openai"]["itemId"],
            "msg_1"
        );
        assert_eq!(saved["durations"]["a1"], 10.0);
    }

    #[tokio::test]
    async fn test_reload_leaves_stored_blob_untouched() {
        let store = MemoryStore::new();
        let (first, backend) = harness(&store);
        first.hydrate();
        backend.reply(vec![
            AssistantChunk::Start {
                message_id: Some("a1".into()),
            },
            AssistantChunk::ReasoningDelta("count rows".into()),
            AssistantChunk::TextDelta("There are 42 orders.".into()),
            AssistantChunk::Finish,
        ]);
        first.send("How many orders?").await.expect("send");
        let written = store.get(KEY).expect("store readable");

        let (second, _) = harness(&store);
        second.hydrate();
        assert_eq!(store.get(KEY).expect("store readable"), written);

        let view = second.view();
        assert_eq!(view.messages, first.view().messages);
        assert_eq!(view.durations, first.view().durations);
        let reencoded = Snapshot {
            messages: view.messages,
            durations: view.durations,
        }
        .encode()
        .expect("encodes");
        assert_eq!(Some(reencoded), written);
    }
}

mod streaming_tests {
    use super::*;

    #[tokio::test]
    async fn test_completed_turn_persists_message_and_duration() {
        let store = MemoryStore::new();
        let (controller, backend) = harness(&store);
        controller.hydrate();
        backend.reply(answer("a1", "There are 42 orders."));

        let outcome = controller.send("How many orders?").await.expect("send");
        assert!(matches!(outcome, TurnOutcome::Completed { .. }));

        let snapshot = stored(&store);
        assert_eq!(snapshot.messages.len(), 3);
        assert_eq!(snapshot.messages[1].text(), "How many orders?");
        assert_eq!(snapshot.messages[2].text(), "There are 42 orders.");
        let duration = snapshot
            .durations
            .get(&MessageId::from("a1"))
            .expect("duration stored with the message");
        assert!(duration >= 0.0);
        assert_eq!(controller.status(), TransportStatus::Ready);
    }

    #[tokio::test]
    async fn test_send_while_streaming_is_rejected() {
        let store = MemoryStore::new();
        let (controller, backend) = harness(&store);
        controller.hydrate();
        let tx = backend.script();

        let (outcome, ()) = tokio::join!(controller.send("first"), async {
            tx.unbounded_send(Ok(AssistantChunk::TextDelta("par".into())))
                .unwrap();
            settle(|| controller.status() == TransportStatus::Streaming).await;
            assert!(controller.send("second").await.is_err());
            tx.unbounded_send(Ok(AssistantChunk::Finish)).unwrap();
        });

        assert!(matches!(outcome, Ok(TurnOutcome::Completed { .. })));
        assert_eq!(controller.view().messages.len(), 3);
    }

    #[tokio::test]
    async fn test_stop_keeps_received_parts() {
        let store = MemoryStore::new();
        let (controller, backend) = harness(&store);
        controller.hydrate();
        let tx = backend.script();

        let assistant_parts = || {
            controller
                .view()
                .messages
                .last()
                .filter(|message| message.role == Role::Assistant && !message.parts.is_empty())
                .map(|message| message.parts.len())
        };

        let (outcome, ()) = tokio::join!(controller.send("list categories"), async {
            for text in ["Books", "Games"] {
                tx.unbounded_send(Ok(AssistantChunk::Part(MessagePart::text(text))))
                    .unwrap();
            }
            settle(|| assistant_parts() == Some(2)).await;
            assert!(controller.stop());
            for text in ["Garden", "Toys"] {
                let _ = tx.unbounded_send(Ok(AssistantChunk::Part(MessagePart::text(text))));
            }
        });

        assert_eq!(outcome.expect("send"), TurnOutcome::Stopped);
        let view = controller.view();
        assert_eq!(view.status, TransportStatus::Ready);
        assert_eq!(assistant_parts(), Some(2));
        assert!(view.durations.is_empty());

        let snapshot = stored(&store);
        assert_eq!(snapshot.messages.last().map(|m| m.parts.len()), Some(2));
    }

    #[tokio::test]
    async fn test_backend_error_keeps_partial_output() {
        let store = MemoryStore::new();
        let (controller, backend) = harness(&store);
        controller.hydrate();
        let tx = backend.script();
        tx.unbounded_send(Ok(AssistantChunk::TextDelta("Partial ans".into())))
            .unwrap();
        tx.unbounded_send(Err(BackendError::Stream("upstream timeout".into())))
            .unwrap();

        let outcome = controller.send("revenue by month").await.expect("send");
        assert_eq!(outcome, TurnOutcome::Failed("upstream timeout".into()));

        let view = controller.view();
        assert_eq!(view.status, TransportStatus::Error);
        assert_eq!(view.last_error.as_deref(), Some("upstream timeout"));
        assert_eq!(view.messages[2].text(), "Partial ans");
        assert!(view.durations.is_empty());
        assert_eq!(stored(&store).messages, view.messages);

        // The next turn is allowed after an error.
        backend.reply(answer("a2", "Retry worked."));
        let retry = controller.send("revenue by month").await.expect("send");
        assert!(matches!(retry, TurnOutcome::Completed { .. }));
    }
}

mod reset_tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_reset_greets_again_after_delay() {
        let store = MemoryStore::new();
        let (controller, backend) = harness(&store);
        controller.hydrate();
        backend.reply(answer("a1", "Alice"));
        controller.send("top customer?").await.expect("send");
        assert_eq!(stored(&store).durations.len(), 1);

        let pending = controller.reset().expect("reset");
        assert!(controller.view().messages.is_empty());
        assert!(stored(&store).is_empty());

        let waiter = pending.wait();
        tokio::pin!(waiter);
        let early = tokio::time::timeout(Duration::from_millis(50), &mut waiter).await;
        assert!(early.is_err());
        assert!(controller.view().messages.is_empty());

        assert!(waiter.await);
        let view = controller.view();
        assert_eq!(view.messages.len(), 1);
        assert_eq!(view.messages[0].role, Role::Assistant);
        assert!(view.durations.is_empty());

        let snapshot = stored(&store);
        assert_eq!(snapshot.messages, view.messages);
        assert!(snapshot.durations.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_reset_during_delay_greets_once() {
        let store = MemoryStore::new();
        let (controller, _) = harness(&store);
        controller.hydrate();

        let first = controller.reset().expect("reset");
        let second = controller.reset().expect("reset");
        assert!(!first.wait().await);
        assert!(second.wait().await);
        assert_eq!(controller.view().messages.len(), 1);
        assert_eq!(stored(&store).messages.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_message_during_delay_suppresses_greeting() {
        let store = MemoryStore::new();
        let (controller, backend) = harness(&store);
        controller.hydrate();

        let pending = controller.reset().expect("reset");
        backend.reply(answer("a1", "Hello again"));
        controller.send("hi").await.expect("send");

        assert!(!pending.wait().await);
        let roles: Vec<Role> = controller.view().messages.iter().map(|m| m.role).collect();
        assert_eq!(roles, vec![Role::User, Role::Assistant]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_during_stream_stops_the_turn() {
        let store = MemoryStore::new();
        let (controller, backend) = harness(&store);
        controller.hydrate();
        let tx = backend.script();

        let (outcome, greeted) = tokio::join!(controller.send("slow question"), async {
            tx.unbounded_send(Ok(AssistantChunk::TextDelta("thinking".into())))
                .unwrap();
            settle(|| controller.status() == TransportStatus::Streaming).await;
            let pending = controller.reset().expect("reset");
            let _ = tx.unbounded_send(Ok(AssistantChunk::TextDelta("late".into())));
            pending.wait().await
        });

        assert_eq!(outcome.expect("send"), TurnOutcome::Stopped);
        assert!(greeted);
        let view = controller.view();
        assert_eq!(view.status, TransportStatus::Ready);
        assert_eq!(view.messages.len(), 1);
        assert!(!view.messages[0].text().contains("late"));
    }
}
