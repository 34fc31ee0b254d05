use crate::config::ChatConfig;
use crate::controller::ChatController;
use crate::prompts::CLEAR_CHAT_TEXT;
use crate::session::SessionView;
use crate::storage::{DurableStore, MemoryStore, platform_store};
use crate::views::ChatView;
use anyhow::Context as _;
use dioxus::prelude::*;
use std::sync::Arc;

const MAIN_CSS: Asset = asset!("/assets/main.css");
const APP_ID: &str = "querypal";

/// Store handle shared by the UI; boxed so the platform store and the
/// in-memory fallback look the same.
pub type UiStore = Arc<dyn DurableStore>;
pub type UiController = ChatController<UiStore>;

fn open_store() -> anyhow::Result<UiStore> {
    let store: UiStore = Arc::new(platform_store(APP_ID).context("opening durable storage")?);
    Ok(store)
}

fn build_controller(config: &ChatConfig) -> UiController {
    let store = open_store().unwrap_or_else(|err| {
        tracing::error!(error = %format!("{err:#}"), "falling back to in-memory chat history");
        let fallback: UiStore = Arc::new(MemoryStore::new());
        fallback
    });
    ChatController::from_config(store, config)
}

#[component]
pub fn App() -> Element {
    let config = use_context_provider(ChatConfig::from_env);
    let controller = use_context_provider(|| build_controller(&config));
    let view = use_signal(|| controller.view());
    use_context_provider(|| view);

    rsx! {
        document::Link { rel: "stylesheet", href: MAIN_CSS }
        div { class: "page",
            AppHeader { ai_name: config.ai_name.clone(), view }
            ChatView {}
            footer { class: "footer", "{config.owner_name}" }
        }
    }
}

#[component]
fn AppHeader(ai_name: String, view: Signal<SessionView>) -> Element {
    let controller = use_context::<UiController>();
    let loading = view.read().is_loading();

    let on_clear = move |_| {
        let mut view = view;
        match controller.reset() {
            Ok(pending) => {
                view.set(controller.view());
                let controller = controller.clone();
                spawn(async move {
                    if pending.wait().await {
                        view.set(controller.view());
                    }
                });
            }
            Err(err) => tracing::warn!(error = %err, "clear chat ignored"),
        }
    };

    rsx! {
        div { class: "header",
            div { class: "header-content",
                h1 { class: "wordmark", "{ai_name}" }
                button {
                    class: "btn btn-ghost",
                    r#type: "button",
                    disabled: loading,
                    onclick: on_clear,
                    "{CLEAR_CHAT_TEXT}"
                }
            }
        }
    }
}
